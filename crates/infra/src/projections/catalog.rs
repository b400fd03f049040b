use serde_json::Value as JsonValue;

use coursemart_catalog::{PRODUCT_AGGREGATE_TYPE, Product, ProductId};
use coursemart_events::EventEnvelope;

use crate::event_store::EventStore;

use super::snapshot::{ProjectionError, SnapshotProjection};

/// Product snapshots (the storefront catalog).
#[derive(Debug)]
pub struct ProductProjection {
    snapshots: SnapshotProjection<Product>,
}

impl Default for ProductProjection {
    fn default() -> Self {
        Self::new()
    }
}

impl ProductProjection {
    pub fn new() -> Self {
        Self {
            snapshots: SnapshotProjection::in_memory(PRODUCT_AGGREGATE_TYPE, |id| {
                Product::empty(ProductId::new(id))
            }),
        }
    }

    pub fn refresh(&self, product: &Product) {
        if product.exists() {
            self.snapshots.refresh(product.id_typed().aggregate_id(), product);
        }
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
        store: &dyn EventStore,
    ) -> Result<Option<Product>, ProjectionError> {
        self.snapshots.apply_envelope(envelope, store)
    }

    pub fn rebuild(&self, store: &dyn EventStore) -> Result<usize, ProjectionError> {
        self.snapshots.rebuild(store)
    }

    pub fn get(&self, product_id: ProductId) -> Option<Product> {
        self.snapshots.get(product_id.aggregate_id())
    }

    /// Every product, ordered by title.
    pub fn all(&self) -> Vec<Product> {
        let mut out = self.snapshots.list();
        out.sort_by(|a, b| {
            a.title()
                .cmp(b.title())
                .then_with(|| a.id_typed().cmp(&b.id_typed()))
        });
        out
    }

    /// Products currently on sale, ordered by title.
    pub fn active(&self) -> Vec<Product> {
        self.all().into_iter().filter(Product::is_active).collect()
    }
}
