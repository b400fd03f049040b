//! Purchasing domain module (event-sourced).
//!
//! A purchase is one checkout of one or more products. It is resolved either by
//! the payment gateway (`pendiente → completado`) or by an administrator
//! reviewing an uploaded proof of payment (`pendiente → en_revision →
//! aprobado | rechazado`).

pub mod purchase;

pub use purchase::{
    AGGREGATE_TYPE as PURCHASE_AGGREGATE_TYPE,
    ApprovePurchase, AttachCheckoutSession, CheckoutSessionAttached, ConfirmGatewayPayment,
    CreatePurchase, DEFAULT_REJECTION_REASON, LineItem, PaymentConfirmed, PaymentMethod,
    PaymentMethodKind, PaymentState, ProofSubmitted, Purchase, PurchaseApproved, PurchaseCommand,
    PurchaseCreated, PurchaseEvent, PurchaseId, PurchaseRejected, PurchaseVoided, RejectPurchase,
    SubmitProof, VoidPurchase,
};
