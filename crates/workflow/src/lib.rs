//! Marketplace workflows.
//!
//! [`Marketplace`] wires the event store, the read models and the external
//! ports together and hands out the services buyers and administrators use:
//! the catalog, purchases, progress tracking and certificates.

pub mod catalog;
pub mod certificate;
pub mod config;
pub mod context;
pub mod error;
pub mod ports;
pub mod progress;
pub mod purchase;
pub mod telemetry;

mod grant;

use std::sync::Arc;

use serde_json::Value as JsonValue;

use coursemart_events::{EventBus, EventEnvelope, InMemoryEventBus};
use coursemart_infra::event_store::{EventStore, InMemoryEventStore};

pub use catalog::{CatalogService, ContentRevision, NewProduct};
pub use certificate::{CertificateIssuer, CertificateRecord, CodeGenerator, TimeRandomCodes};
pub use config::{ConfigError, LogConfig, MarketConfig};
pub use context::{Actor, Ports};
pub use error::{ErrorKind, WorkflowError, WorkflowResult};
pub use progress::{LegacyAccess, LibraryEntry, ProgressTracker};
pub use purchase::{GatewayCheckout, PurchaseWorkflow};

use context::MarketContext;

/// One marketplace instance.
#[derive(Debug, Clone)]
pub struct Marketplace {
    ctx: Arc<MarketContext>,
}

impl Marketplace {
    /// In-memory event store and bus.
    pub fn new(config: MarketConfig, ports: Ports) -> Self {
        Self::with_infrastructure(
            config,
            ports,
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::<EventEnvelope<JsonValue>>::new()),
        )
    }

    pub fn with_infrastructure(
        config: MarketConfig,
        ports: Ports,
        store: Arc<dyn EventStore>,
        bus: Arc<dyn EventBus<EventEnvelope<JsonValue>>>,
    ) -> Self {
        Self {
            ctx: Arc::new(MarketContext::new(config, ports, store, bus)),
        }
    }

    pub fn config(&self) -> &MarketConfig {
        &self.ctx.config
    }

    pub fn catalog(&self) -> CatalogService {
        CatalogService::new(self.ctx.clone())
    }

    pub fn purchases(&self) -> PurchaseWorkflow {
        PurchaseWorkflow::new(self.ctx.clone())
    }

    pub fn progress(&self) -> ProgressTracker {
        ProgressTracker::new(self.ctx.clone())
    }

    pub fn certificates(&self) -> CertificateIssuer {
        self.certificates_with(Arc::new(TimeRandomCodes))
    }

    pub fn certificates_with(&self, codes: Arc<dyn CodeGenerator>) -> CertificateIssuer {
        CertificateIssuer::new(self.ctx.clone(), codes)
    }

    /// Rebuild every read model from the event store.
    pub fn rebuild_read_models(&self) -> WorkflowResult<()> {
        self.ctx.rebuild_read_models()
    }
}
