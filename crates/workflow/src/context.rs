use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;

use coursemart_catalog::{PRODUCT_AGGREGATE_TYPE, Product, ProductCommand, ProductId};
use coursemart_core::UserId;
use coursemart_entitlements::{
    ENTITLEMENT_AGGREGATE_TYPE, Entitlement, EntitlementCommand, EntitlementId,
};
use coursemart_events::{EventBus, EventEnvelope};
use coursemart_infra::command_dispatcher::{CommandDispatcher, DispatchError, Dispatched};
use coursemart_infra::event_store::EventStore;
use coursemart_infra::projections::{EntitlementProjection, ProductProjection, PurchaseProjection};
use coursemart_pricing::RateTable;
use coursemart_purchasing::{PURCHASE_AGGREGATE_TYPE, Purchase, PurchaseCommand, PurchaseId};

use crate::config::MarketConfig;
use crate::error::{WorkflowError, WorkflowResult};
use crate::ports::{Notifier, PaymentGateway, ProofStorage, UserDirectory, UserProfile};

/// Who is asking, for reads that depend on ownership.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Actor {
    User(UserId),
    Admin(UserId),
}

impl Actor {
    pub fn user_id(&self) -> UserId {
        match self {
            Actor::User(id) | Actor::Admin(id) => *id,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Admin(_))
    }
}

/// Adapters for everything outside the marketplace core.
#[derive(Clone)]
pub struct Ports {
    pub gateway: Arc<dyn PaymentGateway>,
    pub proofs: Arc<dyn ProofStorage>,
    pub notifier: Arc<dyn Notifier>,
    pub users: Arc<dyn UserDirectory>,
}

impl core::fmt::Debug for Ports {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Ports").finish_non_exhaustive()
    }
}

/// State shared by every service of one marketplace.
///
/// Commands go through the dispatcher (fresh read, decide, conditional
/// append); the resulting aggregate is pushed into the matching projection
/// before the call returns, so reads observe the caller's own writes.
#[derive(Debug)]
pub(crate) struct MarketContext {
    pub(crate) config: MarketConfig,
    pub(crate) rates: RwLock<RateTable>,
    pub(crate) dispatcher: CommandDispatcher,
    pub(crate) products: ProductProjection,
    pub(crate) purchases: PurchaseProjection,
    pub(crate) entitlements: EntitlementProjection,
    pub(crate) ports: Ports,
}

impl MarketContext {
    pub(crate) fn new(
        config: MarketConfig,
        ports: Ports,
        store: Arc<dyn EventStore>,
        bus: Arc<dyn EventBus<EventEnvelope<JsonValue>>>,
    ) -> Self {
        let dispatcher =
            CommandDispatcher::new(store, bus).with_max_attempts(config.dispatch_attempts);
        Self {
            rates: RwLock::new(config.rates.clone()),
            config,
            dispatcher,
            products: ProductProjection::new(),
            purchases: PurchaseProjection::new(),
            entitlements: EntitlementProjection::new(),
            ports,
        }
    }

    pub(crate) fn rates(&self) -> RateTable {
        match self.rates.read() {
            Ok(rates) => rates.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn set_rates(&self, rates: RateTable) {
        match self.rates.write() {
            Ok(mut current) => *current = rates,
            Err(poisoned) => *poisoned.into_inner() = rates,
        }
    }

    pub(crate) fn store(&self) -> &dyn EventStore {
        self.dispatcher.store().as_ref()
    }

    // ---- products ----

    pub(crate) fn product(&self, id: ProductId) -> WorkflowResult<Product> {
        self.products
            .get(id)
            .filter(Product::exists)
            .ok_or(WorkflowError::ProductNotFound(id))
    }

    pub(crate) fn execute_product(
        &self,
        id: ProductId,
        command: ProductCommand,
    ) -> Result<Dispatched<Product>, DispatchError> {
        let out = self.dispatcher.dispatch(
            id.aggregate_id(),
            PRODUCT_AGGREGATE_TYPE,
            command,
            |aggregate_id| Product::empty(ProductId::new(aggregate_id)),
        )?;
        self.products.refresh(&out.aggregate);
        Ok(out)
    }

    // ---- purchases ----

    /// Authoritative read of a purchase (event store, not the read model).
    pub(crate) fn load_purchase(&self, id: PurchaseId) -> WorkflowResult<Purchase> {
        let purchase = self
            .dispatcher
            .load(id.aggregate_id(), |aggregate_id| {
                Purchase::empty(PurchaseId::new(aggregate_id))
            })?;
        if !purchase.exists() {
            return Err(WorkflowError::PurchaseNotFound(id.to_string()));
        }
        self.purchases.refresh(&purchase);
        Ok(purchase)
    }

    pub(crate) fn execute_purchase(
        &self,
        id: PurchaseId,
        command: PurchaseCommand,
    ) -> Result<Dispatched<Purchase>, DispatchError> {
        let out = self.dispatcher.dispatch(
            id.aggregate_id(),
            PURCHASE_AGGREGATE_TYPE,
            command,
            |aggregate_id| Purchase::empty(PurchaseId::new(aggregate_id)),
        )?;
        self.purchases.refresh(&out.aggregate);
        Ok(out)
    }

    // ---- entitlements ----

    /// Authoritative read of the (user, product) entitlement stream. The
    /// returned aggregate may be empty or revoked.
    pub(crate) fn load_entitlement(
        &self,
        user: UserId,
        product: ProductId,
    ) -> WorkflowResult<Entitlement> {
        let entitlement = self.dispatcher.load(
            EntitlementId::for_pair(user, product).aggregate_id(),
            |aggregate_id| Entitlement::empty(EntitlementId(aggregate_id)),
        )?;
        self.entitlements.refresh(&entitlement);
        Ok(entitlement)
    }

    pub(crate) fn active_entitlement(
        &self,
        user: UserId,
        product: ProductId,
    ) -> WorkflowResult<Entitlement> {
        let entitlement = self.load_entitlement(user, product)?;
        if !entitlement.is_active() {
            return Err(WorkflowError::NotEntitled(product));
        }
        Ok(entitlement)
    }

    pub(crate) fn execute_entitlement(
        &self,
        id: EntitlementId,
        command: EntitlementCommand,
    ) -> Result<Dispatched<Entitlement>, DispatchError> {
        let out = self.dispatcher.dispatch(
            id.aggregate_id(),
            ENTITLEMENT_AGGREGATE_TYPE,
            command,
            |aggregate_id| Entitlement::empty(EntitlementId(aggregate_id)),
        )?;
        self.entitlements.refresh(&out.aggregate);
        Ok(out)
    }

    // ---- ports ----

    /// Profile of `user`, falling back to an anonymous one when the directory
    /// has none or is unreachable.
    pub(crate) async fn profile(&self, user: UserId) -> UserProfile {
        match self.ports.users.profile(user).await {
            Ok(Some(profile)) => profile,
            Ok(None) => UserProfile::anonymous(user),
            Err(err) => {
                tracing::warn!(%user, error = %err, "user directory lookup failed");
                UserProfile::anonymous(user)
            }
        }
    }

    pub(crate) fn rebuild_read_models(&self) -> WorkflowResult<()> {
        let store = self.store();
        let products = self.products.rebuild(store)?;
        let purchases = self.purchases.rebuild(store)?;
        let entitlements = self.entitlements.rebuild(store)?;
        tracing::info!(products, purchases, entitlements, "read models rebuilt");
        Ok(())
    }
}
