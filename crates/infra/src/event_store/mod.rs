//! Append-only event store boundary.
//!
//! One stream per aggregate instance. Appends carry an [`ExpectedVersion`]
//! so that every read-decide-write cycle is a conditional write.
//!
//! [`ExpectedVersion`]: coursemart_core::ExpectedVersion

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
