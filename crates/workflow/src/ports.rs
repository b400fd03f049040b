//! External collaborators.
//!
//! Adapters (gateway SDK, object storage, mailer, user store) live outside this
//! workspace. Their failures are opaque to the workflow and come back as
//! `anyhow::Error`; the workflow decides whether to surface or log them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use coursemart_catalog::{Product, ProductId};
use coursemart_core::UserId;
use coursemart_pricing::{Amount, Currency};
use coursemart_purchasing::{Purchase, PurchaseId};

/// Name used on certificates and e-mails when the profile has none.
pub const DEFAULT_STUDENT_NAME: &str = "Student";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutLine {
    pub product_id: ProductId,
    pub title: String,
    pub unit_amount: Amount,
    pub currency: Currency,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub lines: Vec<CheckoutLine>,
    pub success_url: String,
    pub cancel_url: String,
    pub customer_email: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// A hosted checkout page opened by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: String,
}

/// Gateway view of a checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySession {
    pub session_id: String,
    pub payment_status: String,
    pub payment_intent_id: Option<String>,
}

impl GatewaySession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }
}

#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> anyhow::Result<CheckoutSession>;

    async fn retrieve_session(&self, session_id: &str) -> anyhow::Result<GatewaySession>;
}

/// A proof-of-payment file as received from the buyer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait::async_trait]
pub trait ProofStorage: Send + Sync {
    /// Persist the upload and return a stable reference URL.
    async fn store(&self, purchase: PurchaseId, upload: &ProofUpload) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub email: Option<String>,
}

impl UserProfile {
    pub fn anonymous(id: UserId) -> Self {
        Self {
            id,
            name: DEFAULT_STUDENT_NAME.to_string(),
            email: None,
        }
    }
}

#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync {
    async fn profile(&self, user: UserId) -> anyhow::Result<Option<UserProfile>>;
}

/// Buyer notifications. Delivery is best effort.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_approved(
        &self,
        user: &UserProfile,
        products: &[Product],
        purchase: &Purchase,
    ) -> anyhow::Result<()>;

    async fn notify_rejected(&self, user: &UserProfile, reason: &str) -> anyhow::Result<()>;
}
