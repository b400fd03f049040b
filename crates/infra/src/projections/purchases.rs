use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use coursemart_catalog::ProductId;
use coursemart_core::UserId;
use coursemart_events::EventEnvelope;
use coursemart_purchasing::{
    PURCHASE_AGGREGATE_TYPE, PaymentMethodKind, PaymentState, Purchase, PurchaseId,
};

use crate::event_store::EventStore;
use crate::read_model::{InMemoryReadStore, ReadStore};

use super::snapshot::{ProjectionError, SnapshotProjection};

/// Criteria for the administrative purchase listing. Empty fields match all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseFilter {
    pub state: Option<PaymentState>,
    pub user: Option<UserId>,
    pub product: Option<ProductId>,
    pub method: Option<PaymentMethodKind>,
    /// Inclusive lower bound on the creation time.
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on the creation time.
    pub created_until: Option<DateTime<Utc>>,
}

impl PurchaseFilter {
    pub fn matches(&self, purchase: &Purchase) -> bool {
        self.state.is_none_or(|s| purchase.state() == s)
            && self.user.is_none_or(|u| purchase.is_owned_by(u))
            && self
                .product
                .is_none_or(|p| purchase.lines().iter().any(|l| l.product_id == p))
            && self
                .method
                .is_none_or(|m| purchase.method().is_some_and(|pm| pm.kind == m))
            && self
                .created_from
                .is_none_or(|from| purchase.created_at().is_some_and(|at| at >= from))
            && self
                .created_until
                .is_none_or(|until| purchase.created_at().is_some_and(|at| at < until))
    }
}

/// Purchase snapshots plus a gateway session index.
#[derive(Debug)]
pub struct PurchaseProjection {
    snapshots: SnapshotProjection<Purchase>,
    sessions: InMemoryReadStore<String, PurchaseId>,
}

impl Default for PurchaseProjection {
    fn default() -> Self {
        Self::new()
    }
}

impl PurchaseProjection {
    pub fn new() -> Self {
        Self {
            snapshots: SnapshotProjection::in_memory(PURCHASE_AGGREGATE_TYPE, |id| {
                Purchase::empty(PurchaseId::new(id))
            }),
            sessions: InMemoryReadStore::new(),
        }
    }

    pub fn refresh(&self, purchase: &Purchase) {
        if !purchase.exists() {
            return;
        }
        self.snapshots.refresh(purchase.id_typed().aggregate_id(), purchase);
        self.index(purchase);
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
        store: &dyn EventStore,
    ) -> Result<Option<Purchase>, ProjectionError> {
        let updated = self.snapshots.apply_envelope(envelope, store)?;
        if let Some(purchase) = &updated {
            self.index(purchase);
        }
        Ok(updated)
    }

    pub fn rebuild(&self, store: &dyn EventStore) -> Result<usize, ProjectionError> {
        self.sessions.clear();
        let rebuilt = self.snapshots.rebuild(store)?;
        for purchase in self.snapshots.list() {
            self.index(&purchase);
        }
        Ok(rebuilt)
    }

    pub fn get(&self, purchase_id: PurchaseId) -> Option<Purchase> {
        self.snapshots.get(purchase_id.aggregate_id())
    }

    /// Purchase that opened the given gateway checkout session.
    pub fn by_session(&self, session_id: &str) -> Option<Purchase> {
        self.sessions
            .get(&session_id.to_string())
            .and_then(|id| self.get(id))
    }

    /// The buyer's purchases, newest first.
    pub fn for_user(&self, user: UserId) -> Vec<Purchase> {
        self.list(&PurchaseFilter {
            user: Some(user),
            ..PurchaseFilter::default()
        })
    }

    /// Purchases still awaiting a payment decision, oldest first.
    pub fn pending_review(&self) -> Vec<Purchase> {
        let mut out: Vec<Purchase> = self
            .list(&PurchaseFilter::default())
            .into_iter()
            .filter(|p| p.state().is_open())
            .collect();
        out.reverse();
        out
    }

    /// Granting purchases of `user` that include `product`.
    pub fn granting(&self, user: UserId, product: ProductId) -> Vec<Purchase> {
        self.list(&PurchaseFilter {
            user: Some(user),
            product: Some(product),
            ..PurchaseFilter::default()
        })
        .into_iter()
        .filter(|p| p.state().is_granting())
        .collect()
    }

    /// Matching purchases, newest first.
    pub fn list(&self, filter: &PurchaseFilter) -> Vec<Purchase> {
        let mut out: Vec<Purchase> = self
            .snapshots
            .list()
            .into_iter()
            .filter(|p| filter.matches(p))
            .collect();
        out.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id_typed().cmp(&a.id_typed()))
        });
        out
    }

    fn index(&self, purchase: &Purchase) {
        if let Some(session) = purchase.gateway_session_id() {
            self.sessions.upsert(session.to_string(), purchase.id_typed());
        }
    }
}
