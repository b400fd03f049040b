//! Read models built from the event streams.
//!
//! Every projection here is disposable: it can be dropped and rebuilt from the
//! event store, and it tolerates at-least-once delivery from the bus.

pub mod catalog;
pub mod entitlements;
pub mod purchases;
pub mod snapshot;

pub use catalog::ProductProjection;
pub use entitlements::EntitlementProjection;
pub use purchases::{PurchaseFilter, PurchaseProjection};
pub use snapshot::{ProjectionError, SnapshotProjection};
