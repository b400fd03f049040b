//! Event contracts shared by the domain modules and the infrastructure layer.
//!
//! - [`Event`]: typed domain facts emitted by aggregates.
//! - [`EventEnvelope`]: stream metadata wrapped around a committed payload.
//! - [`EventBus`]: fan-out of committed envelopes to downstream consumers.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{BusError, EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::InMemoryEventBus;
