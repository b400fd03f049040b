use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coursemart_catalog::ProductId;
use coursemart_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId};
use coursemart_events::Event;
use coursemart_pricing::{Amount, Country, Currency};

/// Reason recorded when an administrator rejects without giving one.
pub const DEFAULT_REJECTION_REASON: &str = "invalid proof of payment";

/// Purchase identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseId(pub AggregateId);

impl PurchaseId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.0
    }
}

impl core::fmt::Display for PurchaseId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Payment state lifecycle.
///
/// ```text
/// pendiente ──► en_revision ──► aprobado | rechazado
///     │
///     └──────► completado
/// ```
///
/// `aprobado` and `completado` grant access. Voiding a granting purchase moves
/// it to `rechazado`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentState {
    #[serde(rename = "pendiente")]
    Pending,
    #[serde(rename = "en_revision")]
    InReview,
    #[serde(rename = "aprobado")]
    Approved,
    #[serde(rename = "rechazado")]
    Rejected,
    #[serde(rename = "completado")]
    Completed,
}

impl PaymentState {
    pub fn is_granting(self) -> bool {
        matches!(self, PaymentState::Approved | PaymentState::Completed)
    }

    /// Awaiting a payment decision (gateway or admin).
    pub fn is_open(self) -> bool {
        matches!(self, PaymentState::Pending | PaymentState::InReview)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentState::Pending => "pendiente",
            PaymentState::InReview => "en_revision",
            PaymentState::Approved => "aprobado",
            PaymentState::Rejected => "rechazado",
            PaymentState::Completed => "completado",
        }
    }
}

impl core::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the buyer pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethodKind {
    /// Card checkout through the payment gateway.
    #[serde(rename = "stripe")]
    Card,
    #[serde(rename = "transferencia")]
    BankTransfer,
    #[serde(rename = "yape")]
    Yape,
    #[serde(rename = "plin")]
    Plin,
    #[serde(rename = "mercadopago")]
    MercadoPago,
    #[serde(rename = "pagomovil")]
    PagoMovil,
    #[serde(rename = "binance")]
    Binance,
    #[serde(rename = "paypal")]
    Paypal,
}

impl PaymentMethodKind {
    /// Resolved by gateway confirmation rather than a proof upload.
    pub fn is_gateway(self) -> bool {
        self == PaymentMethodKind::Card
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub kind: PaymentMethodKind,
    pub label: Option<String>,
}

impl PaymentMethod {
    pub fn card() -> Self {
        Self {
            kind: PaymentMethodKind::Card,
            label: None,
        }
    }

    pub fn manual(kind: PaymentMethodKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: Some(label.into()),
        }
    }
}

/// Purchase line item; the price is snapshotted at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub title: String,
    pub unit_price: Amount,
    pub currency: Currency,
}

/// Aggregate root: Purchase.
#[derive(Debug, Clone, PartialEq)]
pub struct Purchase {
    id: PurchaseId,
    user: Option<UserId>,
    lines: Vec<LineItem>,
    total: Amount,
    currency: Currency,
    country: Country,
    method: Option<PaymentMethod>,
    state: PaymentState,
    proof_url: Option<String>,
    gateway_session_id: Option<String>,
    gateway_transaction_id: Option<String>,
    admin_notes: Option<String>,
    rejection_reason: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    approved_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Purchase {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PurchaseId) -> Self {
        Self {
            id,
            user: None,
            lines: Vec::new(),
            total: Amount::ZERO,
            currency: Currency::Usd,
            country: Country::International,
            method: None,
            state: PaymentState::Pending,
            proof_url: None,
            gateway_session_id: None,
            gateway_transaction_id: None,
            admin_notes: None,
            rejection_reason: None,
            approved_at: None,
            approved_by: None,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PurchaseId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn user(&self) -> Option<UserId> {
        self.user
    }

    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.user == Some(user)
    }

    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    pub fn product_ids(&self) -> Vec<ProductId> {
        self.lines.iter().map(|l| l.product_id).collect()
    }

    pub fn total(&self) -> Amount {
        self.total
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn country(&self) -> Country {
        self.country
    }

    pub fn method(&self) -> Option<&PaymentMethod> {
        self.method.as_ref()
    }

    pub fn state(&self) -> PaymentState {
        self.state
    }

    pub fn proof_url(&self) -> Option<&str> {
        self.proof_url.as_deref()
    }

    pub fn gateway_session_id(&self) -> Option<&str> {
        self.gateway_session_id.as_deref()
    }

    pub fn gateway_transaction_id(&self) -> Option<&str> {
        self.gateway_transaction_id.as_deref()
    }

    pub fn admin_notes(&self) -> Option<&str> {
        self.admin_notes.as_deref()
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

/// Stream type tag of every purchase stream.
pub const AGGREGATE_TYPE: &str = "purchasing.purchase";

impl AggregateRoot for Purchase {
    type Id = PurchaseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePurchase.
///
/// Line prices are resolved by the caller from the catalog; the aggregate
/// checks their shape and computes the total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchase {
    pub purchase_id: PurchaseId,
    pub user: UserId,
    pub lines: Vec<LineItem>,
    pub country: Country,
    pub method: PaymentMethod,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AttachCheckoutSession (gateway session opened for this purchase).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachCheckoutSession {
    pub purchase_id: PurchaseId,
    pub session_id: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitProof (buyer uploaded a proof of payment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitProof {
    pub purchase_id: PurchaseId,
    pub user: UserId,
    pub proof_url: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApprovePurchase (manual review accepted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovePurchase {
    pub purchase_id: PurchaseId,
    pub admin: UserId,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectPurchase (manual review refused).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectPurchase {
    pub purchase_id: PurchaseId,
    pub admin: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmGatewayPayment (gateway reported the session as paid).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmGatewayPayment {
    pub purchase_id: PurchaseId,
    pub session_id: String,
    pub transaction_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: VoidPurchase (administrative reversal of a granting purchase).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidPurchase {
    pub purchase_id: PurchaseId,
    pub admin: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseCommand {
    CreatePurchase(CreatePurchase),
    AttachCheckoutSession(AttachCheckoutSession),
    SubmitProof(SubmitProof),
    ApprovePurchase(ApprovePurchase),
    RejectPurchase(RejectPurchase),
    ConfirmGatewayPayment(ConfirmGatewayPayment),
    VoidPurchase(VoidPurchase),
}

/// Event: PurchaseCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseCreated {
    pub purchase_id: PurchaseId,
    pub user: UserId,
    pub lines: Vec<LineItem>,
    pub total: Amount,
    pub currency: Currency,
    pub country: Country,
    pub method: PaymentMethod,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSessionAttached {
    pub purchase_id: PurchaseId,
    pub session_id: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofSubmitted {
    pub purchase_id: PurchaseId,
    pub proof_url: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseApproved {
    pub purchase_id: PurchaseId,
    pub admin: UserId,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRejected {
    pub purchase_id: PurchaseId,
    pub admin: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmed {
    pub purchase_id: PurchaseId,
    pub session_id: String,
    pub transaction_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseVoided {
    pub purchase_id: PurchaseId,
    pub admin: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseEvent {
    PurchaseCreated(PurchaseCreated),
    CheckoutSessionAttached(CheckoutSessionAttached),
    ProofSubmitted(ProofSubmitted),
    PurchaseApproved(PurchaseApproved),
    PurchaseRejected(PurchaseRejected),
    PaymentConfirmed(PaymentConfirmed),
    PurchaseVoided(PurchaseVoided),
}

impl Event for PurchaseEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseEvent::PurchaseCreated(_) => "purchasing.purchase.created",
            PurchaseEvent::CheckoutSessionAttached(_) => "purchasing.purchase.checkout_attached",
            PurchaseEvent::ProofSubmitted(_) => "purchasing.purchase.proof_submitted",
            PurchaseEvent::PurchaseApproved(_) => "purchasing.purchase.approved",
            PurchaseEvent::PurchaseRejected(_) => "purchasing.purchase.rejected",
            PurchaseEvent::PaymentConfirmed(_) => "purchasing.purchase.payment_confirmed",
            PurchaseEvent::PurchaseVoided(_) => "purchasing.purchase.voided",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseEvent::PurchaseCreated(e) => e.occurred_at,
            PurchaseEvent::CheckoutSessionAttached(e) => e.occurred_at,
            PurchaseEvent::ProofSubmitted(e) => e.occurred_at,
            PurchaseEvent::PurchaseApproved(e) => e.occurred_at,
            PurchaseEvent::PurchaseRejected(e) => e.occurred_at,
            PurchaseEvent::PaymentConfirmed(e) => e.occurred_at,
            PurchaseEvent::PurchaseVoided(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Purchase {
    type Command = PurchaseCommand;
    type Event = PurchaseEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseEvent::PurchaseCreated(e) => {
                self.id = e.purchase_id;
                self.user = Some(e.user);
                self.lines = e.lines.clone();
                self.total = e.total;
                self.currency = e.currency;
                self.country = e.country;
                self.method = Some(e.method.clone());
                self.state = PaymentState::Pending;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            PurchaseEvent::CheckoutSessionAttached(e) => {
                self.gateway_session_id = Some(e.session_id.clone());
            }
            PurchaseEvent::ProofSubmitted(e) => {
                self.proof_url = Some(e.proof_url.clone());
                self.state = PaymentState::InReview;
            }
            PurchaseEvent::PurchaseApproved(e) => {
                self.state = PaymentState::Approved;
                self.approved_at = Some(e.occurred_at);
                self.approved_by = Some(e.admin);
                if e.notes.is_some() {
                    self.admin_notes = e.notes.clone();
                }
            }
            PurchaseEvent::PurchaseRejected(e) => {
                self.state = PaymentState::Rejected;
                self.rejection_reason = Some(e.reason.clone());
                self.admin_notes = Some(e.reason.clone());
            }
            PurchaseEvent::PaymentConfirmed(e) => {
                self.state = PaymentState::Completed;
                self.gateway_session_id = Some(e.session_id.clone());
                self.gateway_transaction_id = e.transaction_id.clone();
                self.approved_at = Some(e.occurred_at);
            }
            PurchaseEvent::PurchaseVoided(e) => {
                self.state = PaymentState::Rejected;
                if let Some(reason) = &e.reason {
                    self.admin_notes = Some(reason.clone());
                }
            }
        }

        self.updated_at = Some(event.occurred_at());
        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseCommand::CreatePurchase(cmd) => self.handle_create(cmd),
            PurchaseCommand::AttachCheckoutSession(cmd) => self.handle_attach_session(cmd),
            PurchaseCommand::SubmitProof(cmd) => self.handle_submit_proof(cmd),
            PurchaseCommand::ApprovePurchase(cmd) => self.handle_approve(cmd),
            PurchaseCommand::RejectPurchase(cmd) => self.handle_reject(cmd),
            PurchaseCommand::ConfirmGatewayPayment(cmd) => self.handle_confirm(cmd),
            PurchaseCommand::VoidPurchase(cmd) => self.handle_void(cmd),
        }
    }
}

impl Purchase {
    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("purchase {}", self.id)));
        }
        Ok(())
    }

    fn ensure_purchase_id(&self, purchase_id: PurchaseId) -> Result<(), DomainError> {
        if self.id != purchase_id {
            return Err(DomainError::validation("purchase_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreatePurchase) -> Result<Vec<PurchaseEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase already exists"));
        }
        self.ensure_purchase_id(cmd.purchase_id)?;

        let Some(first) = cmd.lines.first() else {
            return Err(DomainError::validation("a purchase needs at least one product"));
        };

        let mut seen = BTreeSet::new();
        let mut total = Amount::ZERO;
        for line in &cmd.lines {
            if !seen.insert(line.product_id) {
                return Err(DomainError::validation(format!(
                    "product {} appears more than once",
                    line.product_id
                )));
            }
            if line.unit_price.is_negative() {
                return Err(DomainError::validation("line price must be >= 0"));
            }
            if line.currency != first.currency {
                return Err(DomainError::validation(format!(
                    "mixed currencies in one purchase ({} and {})",
                    first.currency, line.currency
                )));
            }
            total = total
                .checked_add(line.unit_price)
                .ok_or_else(|| DomainError::validation("purchase total overflows"))?;
        }

        Ok(vec![PurchaseEvent::PurchaseCreated(PurchaseCreated {
            purchase_id: cmd.purchase_id,
            user: cmd.user,
            lines: cmd.lines.clone(),
            total,
            currency: first.currency,
            country: cmd.country,
            method: cmd.method.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_attach_session(
        &self,
        cmd: &AttachCheckoutSession,
    ) -> Result<Vec<PurchaseEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_purchase_id(cmd.purchase_id)?;

        if cmd.session_id.trim().is_empty() {
            return Err(DomainError::validation("session id cannot be empty"));
        }
        if self.state != PaymentState::Pending {
            return Err(DomainError::invalid_state(format!(
                "cannot attach a checkout session to a purchase in state {}",
                self.state
            )));
        }
        match self.gateway_session_id.as_deref() {
            Some(existing) if existing == cmd.session_id => return Ok(vec![]),
            Some(_) => {
                return Err(DomainError::invalid_state(
                    "purchase already has a checkout session",
                ));
            }
            None => {}
        }

        Ok(vec![PurchaseEvent::CheckoutSessionAttached(
            CheckoutSessionAttached {
                purchase_id: cmd.purchase_id,
                session_id: cmd.session_id.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_submit_proof(&self, cmd: &SubmitProof) -> Result<Vec<PurchaseEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_purchase_id(cmd.purchase_id)?;

        // Not revealing other buyers' purchases.
        if !self.is_owned_by(cmd.user) {
            return Err(DomainError::not_found(format!("purchase {}", self.id)));
        }
        if cmd.proof_url.trim().is_empty() {
            return Err(DomainError::validation("proof reference cannot be empty"));
        }
        if self.state != PaymentState::Pending {
            return Err(DomainError::invalid_state(format!(
                "proof can only be submitted for a pending purchase (state: {})",
                self.state
            )));
        }

        Ok(vec![PurchaseEvent::ProofSubmitted(ProofSubmitted {
            purchase_id: cmd.purchase_id,
            proof_url: cmd.proof_url.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApprovePurchase) -> Result<Vec<PurchaseEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_purchase_id(cmd.purchase_id)?;

        match self.state {
            PaymentState::Pending | PaymentState::InReview => {}
            PaymentState::Approved | PaymentState::Completed => {
                return Err(DomainError::already_granted(format!(
                    "purchase {} is already {}",
                    self.id, self.state
                )));
            }
            PaymentState::Rejected => {
                return Err(DomainError::invalid_state(
                    "a rejected purchase cannot be approved",
                ));
            }
        }

        Ok(vec![PurchaseEvent::PurchaseApproved(PurchaseApproved {
            purchase_id: cmd.purchase_id,
            admin: cmd.admin,
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectPurchase) -> Result<Vec<PurchaseEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_purchase_id(cmd.purchase_id)?;

        if !self.state.is_open() {
            return Err(DomainError::invalid_state(format!(
                "cannot reject a purchase in state {}",
                self.state
            )));
        }

        let reason = cmd
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REJECTION_REASON)
            .to_string();

        Ok(vec![PurchaseEvent::PurchaseRejected(PurchaseRejected {
            purchase_id: cmd.purchase_id,
            admin: cmd.admin,
            reason,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(
        &self,
        cmd: &ConfirmGatewayPayment,
    ) -> Result<Vec<PurchaseEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_purchase_id(cmd.purchase_id)?;

        match self.state {
            // Either a duplicate delivery or the manual path already granted.
            PaymentState::Completed | PaymentState::Approved => return Ok(vec![]),
            PaymentState::Rejected => {
                return Err(DomainError::invalid_state(
                    "cannot confirm payment for a rejected purchase",
                ));
            }
            PaymentState::Pending | PaymentState::InReview => {}
        }

        if let Some(existing) = &self.gateway_session_id {
            if existing != &cmd.session_id {
                return Err(DomainError::validation(
                    "session id does not belong to this purchase",
                ));
            }
        }

        Ok(vec![PurchaseEvent::PaymentConfirmed(PaymentConfirmed {
            purchase_id: cmd.purchase_id,
            session_id: cmd.session_id.clone(),
            transaction_id: cmd.transaction_id.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_void(&self, cmd: &VoidPurchase) -> Result<Vec<PurchaseEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_purchase_id(cmd.purchase_id)?;

        if !self.state.is_granting() {
            return Err(DomainError::invalid_state(format!(
                "only approved or completed purchases can be voided (state: {})",
                self.state
            )));
        }

        Ok(vec![PurchaseEvent::PurchaseVoided(PurchaseVoided {
            purchase_id: cmd.purchase_id,
            admin: cmd.admin,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_purchase_id() -> PurchaseId {
        PurchaseId::new(AggregateId::new())
    }

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn line(cents: i64, currency: Currency) -> LineItem {
        LineItem {
            product_id: test_product_id(),
            title: "Rust for Beginners".to_string(),
            unit_price: Amount::from_cents(cents),
            currency,
        }
    }

    fn exec(purchase: &mut Purchase, cmd: PurchaseCommand) -> Vec<PurchaseEvent> {
        let events = purchase.handle(&cmd).unwrap();
        for e in &events {
            purchase.apply(e);
        }
        events
    }

    fn created_with(lines: Vec<LineItem>, method: PaymentMethod) -> (Purchase, UserId) {
        let id = test_purchase_id();
        let user = UserId::new();
        let mut purchase = Purchase::empty(id);
        exec(
            &mut purchase,
            PurchaseCommand::CreatePurchase(CreatePurchase {
                purchase_id: id,
                user,
                lines,
                country: Country::International,
                method,
                occurred_at: test_time(),
            }),
        );
        (purchase, user)
    }

    fn created() -> (Purchase, UserId) {
        created_with(
            vec![line(4999, Currency::Usd)],
            PaymentMethod::manual(PaymentMethodKind::Yape, "Yape"),
        )
    }

    fn approve_cmd(purchase: &Purchase) -> PurchaseCommand {
        PurchaseCommand::ApprovePurchase(ApprovePurchase {
            purchase_id: purchase.id_typed(),
            admin: UserId::new(),
            notes: None,
            occurred_at: test_time(),
        })
    }

    fn confirm_cmd(purchase: &Purchase, session: &str) -> PurchaseCommand {
        PurchaseCommand::ConfirmGatewayPayment(ConfirmGatewayPayment {
            purchase_id: purchase.id_typed(),
            session_id: session.to_string(),
            transaction_id: Some("pi_123".to_string()),
            occurred_at: test_time(),
        })
    }

    #[test]
    fn create_sums_line_prices() {
        let (purchase, _) = created_with(
            vec![line(4999, Currency::Usd), line(1, Currency::Usd)],
            PaymentMethod::card(),
        );

        assert_eq!(purchase.total(), Amount::from_cents(5000));
        assert_eq!(purchase.currency(), Currency::Usd);
        assert_eq!(purchase.state(), PaymentState::Pending);
        assert_eq!(purchase.version(), 1);
    }

    #[test]
    fn create_rejects_empty_duplicate_and_mixed_carts() {
        let id = test_purchase_id();
        let base = CreatePurchase {
            purchase_id: id,
            user: UserId::new(),
            lines: vec![],
            country: Country::Peru,
            method: PaymentMethod::card(),
            occurred_at: test_time(),
        };
        let purchase = Purchase::empty(id);

        let err = purchase
            .handle(&PurchaseCommand::CreatePurchase(base.clone()))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let dup = line(100, Currency::Pen);
        let err = purchase
            .handle(&PurchaseCommand::CreatePurchase(CreatePurchase {
                lines: vec![dup.clone(), dup],
                ..base.clone()
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let err = purchase
            .handle(&PurchaseCommand::CreatePurchase(CreatePurchase {
                lines: vec![line(100, Currency::Pen), line(100, Currency::Usd)],
                ..base
            }))
            .unwrap_err();
        match err {
            DomainError::Validation(msg) => assert!(msg.contains("mixed currencies")),
            _ => panic!("Expected Validation error for mixed currencies"),
        }
    }

    #[test]
    fn proof_moves_pending_to_review_and_only_once() {
        let (mut purchase, user) = created();
        let submit = PurchaseCommand::SubmitProof(SubmitProof {
            purchase_id: purchase.id_typed(),
            user,
            proof_url: "https://proofs.example/receipt.png".to_string(),
            occurred_at: test_time(),
        });

        exec(&mut purchase, submit.clone());
        assert_eq!(purchase.state(), PaymentState::InReview);
        assert_eq!(purchase.proof_url(), Some("https://proofs.example/receipt.png"));

        let err = purchase.handle(&submit).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn proof_from_another_user_is_not_found() {
        let (purchase, _) = created();
        let err = purchase
            .handle(&PurchaseCommand::SubmitProof(SubmitProof {
                purchase_id: purchase.id_typed(),
                user: UserId::new(),
                proof_url: "https://proofs.example/x.png".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn approve_stamps_admin_and_second_approve_is_already_granted() {
        let (mut purchase, _) = created();
        let cmd = approve_cmd(&purchase);

        exec(&mut purchase, cmd.clone());
        assert_eq!(purchase.state(), PaymentState::Approved);
        assert!(purchase.approved_at().is_some());
        assert!(purchase.approved_by().is_some());

        let err = purchase.handle(&cmd).unwrap_err();
        assert!(matches!(err, DomainError::AlreadyGranted(_)));
    }

    #[test]
    fn reject_defaults_reason_and_is_terminal() {
        let (mut purchase, _) = created();
        let reject = PurchaseCommand::RejectPurchase(RejectPurchase {
            purchase_id: purchase.id_typed(),
            admin: UserId::new(),
            reason: Some("   ".to_string()),
            occurred_at: test_time(),
        });

        exec(&mut purchase, reject.clone());
        assert_eq!(purchase.state(), PaymentState::Rejected);
        assert_eq!(purchase.rejection_reason(), Some(DEFAULT_REJECTION_REASON));

        assert!(matches!(
            purchase.handle(&reject).unwrap_err(),
            DomainError::InvalidState(_)
        ));
        assert!(matches!(
            purchase.handle(&approve_cmd(&purchase)).unwrap_err(),
            DomainError::InvalidState(_)
        ));
        assert!(matches!(
            purchase.handle(&confirm_cmd(&purchase, "cs_1")).unwrap_err(),
            DomainError::InvalidState(_)
        ));
    }

    #[test]
    fn gateway_confirmation_completes_once() {
        let (mut purchase, _) = created_with(vec![line(4999, Currency::Usd)], PaymentMethod::card());
        let purchase_id = purchase.id_typed();
        exec(
            &mut purchase,
            PurchaseCommand::AttachCheckoutSession(AttachCheckoutSession {
                purchase_id,
                session_id: "cs_1".to_string(),
                occurred_at: test_time(),
            }),
        );

        let cmd = confirm_cmd(&purchase, "cs_1");
        let events = exec(&mut purchase, cmd);
        assert_eq!(events.len(), 1);
        assert_eq!(purchase.state(), PaymentState::Completed);
        assert_eq!(purchase.gateway_transaction_id(), Some("pi_123"));

        // Duplicate webhook delivery.
        assert!(purchase.handle(&confirm_cmd(&purchase, "cs_1")).unwrap().is_empty());
    }

    #[test]
    fn confirmation_after_manual_approval_is_a_no_op() {
        let (mut purchase, _) = created();
        let cmd = approve_cmd(&purchase);
        exec(&mut purchase, cmd);

        let events = purchase.handle(&confirm_cmd(&purchase, "cs_9")).unwrap();
        assert!(events.is_empty());
        assert_eq!(purchase.state(), PaymentState::Approved);
    }

    #[test]
    fn confirmation_with_foreign_session_is_rejected() {
        let (mut purchase, _) = created_with(vec![line(100, Currency::Usd)], PaymentMethod::card());
        let purchase_id = purchase.id_typed();
        exec(
            &mut purchase,
            PurchaseCommand::AttachCheckoutSession(AttachCheckoutSession {
                purchase_id,
                session_id: "cs_1".to_string(),
                occurred_at: test_time(),
            }),
        );

        let err = purchase.handle(&confirm_cmd(&purchase, "cs_other")).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn void_only_from_granting_states() {
        let (mut purchase, _) = created();
        let void = |p: &Purchase| {
            PurchaseCommand::VoidPurchase(VoidPurchase {
                purchase_id: p.id_typed(),
                admin: UserId::new(),
                reason: Some("chargeback".to_string()),
                occurred_at: test_time(),
            })
        };

        assert!(matches!(
            purchase.handle(&void(&purchase)).unwrap_err(),
            DomainError::InvalidState(_)
        ));

        let cmd = approve_cmd(&purchase);
        exec(&mut purchase, cmd);
        let cmd = void(&purchase);
        exec(&mut purchase, cmd);
        assert_eq!(purchase.state(), PaymentState::Rejected);
        assert_eq!(purchase.admin_notes(), Some("chargeback"));
    }

    #[test]
    fn payment_state_uses_wire_names() {
        let json = serde_json::to_string(&PaymentState::InReview).unwrap();
        assert_eq!(json, "\"en_revision\"");
        let kind: PaymentMethodKind = serde_json::from_str("\"transferencia\"").unwrap();
        assert_eq!(kind, PaymentMethodKind::BankTransfer);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: the total is exactly the sum of snapshotted line prices.
            #[test]
            fn total_equals_sum_of_lines(prices in prop::collection::vec(0i64..10_000_000, 1..8)) {
                let lines: Vec<_> = prices.iter().map(|c| line(*c, Currency::Pen)).collect();
                let (purchase, _) = created_with(lines, PaymentMethod::card());

                let expected: i64 = prices.iter().sum();
                prop_assert_eq!(purchase.total(), Amount::from_cents(expected));
            }

            /// Property: however many approvals arrive, exactly one is accepted.
            #[test]
            fn at_most_one_grant(attempts in 1usize..6, via_gateway in any::<bool>()) {
                let (mut purchase, _) = created();
                let mut granted = 0;
                for _ in 0..attempts {
                    let cmd = if via_gateway {
                        confirm_cmd(&purchase, "cs_1")
                    } else {
                        approve_cmd(&purchase)
                    };
                    if let Ok(events) = purchase.handle(&cmd) {
                        granted += events.len();
                        for e in &events {
                            purchase.apply(e);
                        }
                    }
                }
                prop_assert_eq!(granted, 1);
                prop_assert!(purchase.state().is_granting());
            }
        }
    }
}
