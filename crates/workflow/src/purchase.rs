use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;

use coursemart_catalog::{Product, ProductId};
use coursemart_core::{AggregateId, DomainError, UserId};
use coursemart_infra::command_dispatcher::DispatchError;
use coursemart_infra::projections::PurchaseFilter;
use coursemart_pricing::Country;
use coursemart_purchasing::{
    ApprovePurchase, AttachCheckoutSession, ConfirmGatewayPayment, CreatePurchase,
    DEFAULT_REJECTION_REASON, LineItem, PaymentMethod, PaymentState, Purchase, PurchaseCommand,
    PurchaseId, RejectPurchase, SubmitProof, VoidPurchase,
};

use crate::context::{Actor, MarketContext};
use crate::error::{WorkflowError, WorkflowResult};
use crate::grant::{grant_purchase, revoke_purchase};
use crate::ports::{CheckoutLine, CheckoutRequest, ProofUpload};

/// Reason recorded on entitlements revoked by [`PurchaseWorkflow::void`]
/// when the admin gives none.
pub const DEFAULT_VOID_REASON: &str = "purchase voided";

/// A purchase with its hosted checkout page.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayCheckout {
    pub purchase: Purchase,
    pub url: String,
}

/// Purchase lifecycle: creation, proof review, gateway confirmation and
/// reversal. Every transition that lands in a granting state grants the
/// purchased products before returning.
#[derive(Debug, Clone)]
pub struct PurchaseWorkflow {
    ctx: Arc<MarketContext>,
}

impl PurchaseWorkflow {
    pub(crate) fn new(ctx: Arc<MarketContext>) -> Self {
        Self { ctx }
    }

    /// Price `products` for `country` and persist a `pendiente` purchase.
    pub fn create(
        &self,
        user: UserId,
        products: &[ProductId],
        country: &str,
        method: PaymentMethod,
    ) -> WorkflowResult<Purchase> {
        let country: Country = country.parse()?;
        let lines = self.price_lines(products, country)?;

        let purchase_id = PurchaseId::new(AggregateId::new());
        let out = self.ctx.execute_purchase(
            purchase_id,
            PurchaseCommand::CreatePurchase(CreatePurchase {
                purchase_id,
                user,
                lines,
                country,
                method,
                occurred_at: Utc::now(),
            }),
        )?;

        let purchase = out.aggregate;
        tracing::info!(
            purchase = %purchase_id,
            %user,
            total = %purchase.total(),
            currency = %purchase.currency(),
            "purchase created"
        );
        Ok(purchase)
    }

    /// Create a card purchase and open a hosted checkout session for it.
    ///
    /// When the gateway fails the purchase stays `pendiente` without a
    /// session; such orphans are cleaned up outside the marketplace.
    pub async fn start_gateway_checkout(
        &self,
        user: UserId,
        products: &[ProductId],
        country: &str,
    ) -> WorkflowResult<GatewayCheckout> {
        let purchase = self.create(user, products, country, PaymentMethod::card())?;
        let purchase_id = purchase.id_typed();
        let profile = self.ctx.profile(user).await;

        let request = CheckoutRequest {
            lines: purchase
                .lines()
                .iter()
                .map(|line| CheckoutLine {
                    product_id: line.product_id,
                    title: line.title.clone(),
                    unit_amount: line.unit_price,
                    currency: line.currency,
                    quantity: 1,
                })
                .collect(),
            success_url: self.ctx.config.checkout_success_url.clone(),
            cancel_url: self.ctx.config.checkout_cancel_url.clone(),
            customer_email: profile.email,
            metadata: BTreeMap::from([
                ("purchase_id".to_string(), purchase_id.to_string()),
                ("user_id".to_string(), user.to_string()),
            ]),
        };

        let session = self
            .call_gateway(self.ctx.ports.gateway.create_checkout_session(request))
            .await?;

        let out = self.ctx.execute_purchase(
            purchase_id,
            PurchaseCommand::AttachCheckoutSession(AttachCheckoutSession {
                purchase_id,
                session_id: session.session_id.clone(),
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::info!(purchase = %purchase_id, session = %session.session_id, "checkout session opened");

        Ok(GatewayCheckout {
            purchase: out.aggregate,
            url: session.url,
        })
    }

    /// Attach an already stored proof reference; `pendiente → en_revision`.
    pub fn submit_proof(
        &self,
        user: UserId,
        purchase_id: PurchaseId,
        file_ref: &str,
    ) -> WorkflowResult<Purchase> {
        let out = self
            .ctx
            .execute_purchase(
                purchase_id,
                PurchaseCommand::SubmitProof(SubmitProof {
                    purchase_id,
                    user,
                    proof_url: file_ref.to_string(),
                    occurred_at: Utc::now(),
                }),
            )
            .map_err(|err| not_found_as_purchase(err, purchase_id))?;
        tracing::info!(purchase = %purchase_id, %user, "proof of payment submitted");
        Ok(out.aggregate)
    }

    /// Validate and store a proof-of-payment upload, then submit it.
    pub async fn upload_proof(
        &self,
        user: UserId,
        purchase_id: PurchaseId,
        upload: ProofUpload,
    ) -> WorkflowResult<Purchase> {
        let config = &self.ctx.config;
        if !config.accepts_proof_type(&upload.content_type) {
            return Err(WorkflowError::Validation(format!(
                "unsupported proof content type '{}'",
                upload.content_type
            )));
        }
        if upload.bytes.is_empty() {
            return Err(WorkflowError::Validation("proof file is empty".to_string()));
        }
        if upload.bytes.len() > config.max_proof_bytes {
            return Err(WorkflowError::Validation(format!(
                "proof file exceeds {} bytes",
                config.max_proof_bytes
            )));
        }

        let purchase = self.ctx.load_purchase(purchase_id)?;
        if !purchase.is_owned_by(user) {
            return Err(WorkflowError::PurchaseNotFound(purchase_id.to_string()));
        }
        if purchase.state() != PaymentState::Pending {
            return Err(WorkflowError::InvalidState(format!(
                "proof can only be submitted for a pending purchase (state: {})",
                purchase.state()
            )));
        }

        let file_ref = self
            .ctx
            .ports
            .proofs
            .store(purchase_id, &upload)
            .await
            .map_err(|err| WorkflowError::unavailable("proof storage", err))?;

        self.submit_proof(user, purchase_id, &file_ref)
    }

    /// Accept a manual payment and grant its products.
    ///
    /// An already granting purchase yields [`WorkflowError::AlreadyApproved`]
    /// carrying the purchase; the grant is re-run so a previously interrupted
    /// approval still ends with every entitlement in place.
    pub async fn approve(
        &self,
        admin: UserId,
        purchase_id: PurchaseId,
        notes: Option<String>,
    ) -> WorkflowResult<Purchase> {
        let command = PurchaseCommand::ApprovePurchase(ApprovePurchase {
            purchase_id,
            admin,
            notes,
            occurred_at: Utc::now(),
        });

        match self.ctx.execute_purchase(purchase_id, command) {
            Ok(out) => {
                let purchase = out.aggregate;
                tracing::info!(purchase = %purchase_id, %admin, "purchase approved");
                grant_purchase(&self.ctx, &purchase)?;
                self.notify_approved(&purchase).await;
                Ok(purchase)
            }
            Err(DispatchError::Domain(DomainError::AlreadyGranted(_))) => {
                let purchase = self.ctx.load_purchase(purchase_id)?;
                tracing::debug!(purchase = %purchase_id, state = %purchase.state(), "approval repeated");
                grant_purchase(&self.ctx, &purchase)?;
                Err(WorkflowError::AlreadyApproved(Box::new(purchase)))
            }
            Err(err) => Err(not_found_as_purchase(err, purchase_id)),
        }
    }

    /// Refuse a manual payment. No entitlement is created.
    pub async fn reject(
        &self,
        admin: UserId,
        purchase_id: PurchaseId,
        reason: Option<String>,
    ) -> WorkflowResult<Purchase> {
        let out = self
            .ctx
            .execute_purchase(
                purchase_id,
                PurchaseCommand::RejectPurchase(RejectPurchase {
                    purchase_id,
                    admin,
                    reason,
                    occurred_at: Utc::now(),
                }),
            )
            .map_err(|err| not_found_as_purchase(err, purchase_id))?;

        let purchase = out.aggregate;
        let reason = purchase
            .rejection_reason()
            .unwrap_or(DEFAULT_REJECTION_REASON)
            .to_string();
        tracing::info!(purchase = %purchase_id, %admin, %reason, "purchase rejected");

        if let Some(user) = purchase.user() {
            let profile = self.ctx.profile(user).await;
            if let Err(err) = self.ctx.ports.notifier.notify_rejected(&profile, &reason).await {
                tracing::warn!(purchase = %purchase_id, error = %err, "rejection notification failed");
            }
        }
        Ok(purchase)
    }

    /// Resolve a card purchase from its gateway session.
    ///
    /// Safe to repeat: a purchase already granting access is returned as is.
    /// Gateway failures leave the purchase untouched.
    pub async fn confirm_gateway_payment(&self, session_id: &str) -> WorkflowResult<Purchase> {
        let Some(known) = self.ctx.purchases.by_session(session_id) else {
            return Err(WorkflowError::PurchaseNotFound(session_id.to_string()));
        };
        let purchase_id = known.id_typed();

        let purchase = self.ctx.load_purchase(purchase_id)?;
        match purchase.state() {
            PaymentState::Completed | PaymentState::Approved => {
                tracing::debug!(purchase = %purchase_id, state = %purchase.state(), "payment already confirmed");
                self.resume_grant(&purchase).await?;
                return Ok(purchase);
            }
            PaymentState::Rejected => {
                return Err(WorkflowError::InvalidState(
                    "cannot confirm payment for a rejected purchase".to_string(),
                ));
            }
            PaymentState::Pending | PaymentState::InReview => {}
        }

        let session = self
            .call_gateway(self.ctx.ports.gateway.retrieve_session(session_id))
            .await?;
        if !session.is_paid() {
            return Err(WorkflowError::PaymentIncomplete(session.payment_status));
        }

        let out = self.ctx.execute_purchase(
            purchase_id,
            PurchaseCommand::ConfirmGatewayPayment(ConfirmGatewayPayment {
                purchase_id,
                session_id: session_id.to_string(),
                transaction_id: session.payment_intent_id,
                occurred_at: Utc::now(),
            }),
        )?;
        if out.is_noop() {
            // Resolved concurrently by another confirmation or an approval.
            self.resume_grant(&out.aggregate).await?;
            return Ok(out.aggregate);
        }

        let purchase = out.aggregate;
        tracing::info!(purchase = %purchase_id, session = session_id, "gateway payment confirmed");
        grant_purchase(&self.ctx, &purchase)?;
        self.notify_approved(&purchase).await;
        Ok(purchase)
    }

    /// Reverse a granting purchase: `rechazado`, and the entitlements that
    /// exist only because of it are revoked.
    pub fn void(
        &self,
        admin: UserId,
        purchase_id: PurchaseId,
        reason: Option<String>,
    ) -> WorkflowResult<Purchase> {
        let out = self
            .ctx
            .execute_purchase(
                purchase_id,
                PurchaseCommand::VoidPurchase(VoidPurchase {
                    purchase_id,
                    admin,
                    reason: reason.clone(),
                    occurred_at: Utc::now(),
                }),
            )
            .map_err(|err| not_found_as_purchase(err, purchase_id))?;

        let purchase = out.aggregate;
        let reason = reason.unwrap_or_else(|| DEFAULT_VOID_REASON.to_string());
        let revoked = revoke_purchase(&self.ctx, &purchase, &reason)?;
        tracing::info!(
            purchase = %purchase_id,
            %admin,
            revoked = revoked.len(),
            "purchase voided"
        );
        Ok(purchase)
    }

    // ---- queries ----

    /// A purchase as seen by `actor`: buyers only see their own.
    pub fn get(&self, actor: Actor, purchase_id: PurchaseId) -> WorkflowResult<Purchase> {
        self.ctx
            .purchases
            .get(purchase_id)
            .filter(|p| actor.is_admin() || p.is_owned_by(actor.user_id()))
            .ok_or_else(|| WorkflowError::PurchaseNotFound(purchase_id.to_string()))
    }

    /// Newest first.
    pub fn list_for_user(&self, user: UserId) -> Vec<Purchase> {
        self.ctx.purchases.for_user(user)
    }

    /// Purchases waiting for a decision, oldest first.
    pub fn list_pending_review(&self) -> Vec<Purchase> {
        self.ctx.purchases.pending_review()
    }

    pub fn list(&self, filter: &PurchaseFilter) -> Vec<Purchase> {
        self.ctx.purchases.list(filter)
    }

    // ---- helpers ----

    fn price_lines(&self, products: &[ProductId], country: Country) -> WorkflowResult<Vec<LineItem>> {
        if products.is_empty() {
            return Err(WorkflowError::Validation(
                "a purchase needs at least one product".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        let mut lines: Vec<LineItem> = Vec::with_capacity(products.len());
        for &product_id in products {
            if !seen.insert(product_id) {
                return Err(WorkflowError::Validation(format!(
                    "product {product_id} appears more than once"
                )));
            }

            let product = self
                .ctx
                .products
                .get(product_id)
                .filter(|p| p.exists() && p.is_active())
                .ok_or(WorkflowError::ProductUnavailable(product_id))?;
            let price = product
                .price_for(country)
                .ok_or(WorkflowError::MissingPrice(product_id))?;

            if let Some(first) = lines.first() {
                if first.currency != price.currency {
                    return Err(WorkflowError::MixedCurrency(format!(
                        "{} and {}",
                        first.currency, price.currency
                    )));
                }
            }

            lines.push(LineItem {
                product_id,
                title: product.title().to_string(),
                unit_price: price.amount,
                currency: price.currency,
            });
        }
        Ok(lines)
    }

    async fn call_gateway<T>(
        &self,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> WorkflowResult<T> {
        let timeout = self.ctx.config.gateway_timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "payment gateway call failed");
                Err(WorkflowError::unavailable("payment gateway", err))
            }
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "payment gateway call timed out");
                Err(WorkflowError::unavailable(
                    "payment gateway",
                    format!("no answer within {} ms", timeout.as_millis()),
                ))
            }
        }
    }

    /// Re-run the idempotent grant for a purchase that is already granting.
    /// Finishes a grant interrupted after the state change committed; the
    /// buyer is notified only when access was actually missing.
    async fn resume_grant(&self, purchase: &Purchase) -> WorkflowResult<()> {
        let granted = grant_purchase(&self.ctx, purchase)?;
        if !granted.is_empty() {
            tracing::info!(
                purchase = %purchase.id_typed(),
                granted = granted.len(),
                "interrupted grant completed"
            );
            self.notify_approved(purchase).await;
        }
        Ok(())
    }

    async fn notify_approved(&self, purchase: &Purchase) {
        let Some(user) = purchase.user() else {
            return;
        };
        let profile = self.ctx.profile(user).await;
        let products: Vec<Product> = purchase
            .product_ids()
            .into_iter()
            .filter_map(|id| self.ctx.products.get(id))
            .collect();

        if let Err(err) = self
            .ctx
            .ports
            .notifier
            .notify_approved(&profile, &products, purchase)
            .await
        {
            tracing::warn!(
                purchase = %purchase.id_typed(),
                error = %err,
                "approval notification failed"
            );
        }
    }
}

fn not_found_as_purchase(err: DispatchError, purchase_id: PurchaseId) -> WorkflowError {
    match err {
        DispatchError::Domain(DomainError::NotFound(_)) => {
            WorkflowError::PurchaseNotFound(purchase_id.to_string())
        }
        other => other.into(),
    }
}
