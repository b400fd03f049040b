//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus distributes envelopes **after** they were appended to the event
//! store; the store stays the source of truth. Delivery is at-least-once and
//! consumers must tolerate duplicates (projections skip sequence numbers they
//! have already applied).

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use thiserror::Error;

/// A subscription to an event stream (broadcast: each subscriber gets a copy).
///
/// Designed for single-threaded consumption.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Publication failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    /// Internal lock poisoned; the message was not fanned out.
    #[error("event bus lock poisoned")]
    Poisoned,

    /// Transport-level failure of a remote bus.
    #[error("event bus transport failed: {0}")]
    Transport(String),
}

/// Transport-agnostic pub/sub of committed envelopes.
///
/// Object safe so services can hold an `Arc<dyn EventBus<_>>`.
pub trait EventBus<M>: Send + Sync {
    fn publish(&self, message: M) -> Result<(), BusError>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    fn publish(&self, message: M) -> Result<(), BusError> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
