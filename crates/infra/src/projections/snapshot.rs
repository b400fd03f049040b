//! Aggregate snapshots kept as read models.
//!
//! A snapshot is the rehydrated aggregate itself, keyed by stream id. Its
//! `version()` doubles as the projection cursor: an envelope at or below it has
//! already been seen, the next one is applied in place, and anything further
//! ahead means envelopes were missed, so the stream is reloaded from the store.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use coursemart_core::{Aggregate, AggregateId};
use coursemart_events::EventEnvelope;

use crate::event_store::{EventStore, EventStoreError, StoredEvent};
use crate::read_model::{InMemoryReadStore, ReadStore};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(#[from] EventStoreError),
}

type MakeAggregate<A> = Box<dyn Fn(AggregateId) -> A + Send + Sync>;

pub struct SnapshotProjection<A, S = InMemoryReadStore<AggregateId, A>> {
    aggregate_type: &'static str,
    snapshots: S,
    make: MakeAggregate<A>,
}

impl<A, S> core::fmt::Debug for SnapshotProjection<A, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SnapshotProjection")
            .field("aggregate_type", &self.aggregate_type)
            .finish_non_exhaustive()
    }
}

impl<A> SnapshotProjection<A>
where
    A: Aggregate + Clone + Send + Sync + 'static,
    A::Event: DeserializeOwned,
{
    pub fn in_memory(
        aggregate_type: &'static str,
        make: impl Fn(AggregateId) -> A + Send + Sync + 'static,
    ) -> Self {
        Self::new(aggregate_type, InMemoryReadStore::new(), make)
    }
}

impl<A, S> SnapshotProjection<A, S>
where
    A: Aggregate + Clone,
    A::Event: DeserializeOwned,
    S: ReadStore<AggregateId, A>,
{
    pub fn new(
        aggregate_type: &'static str,
        snapshots: S,
        make: impl Fn(AggregateId) -> A + Send + Sync + 'static,
    ) -> Self {
        Self {
            aggregate_type,
            snapshots,
            make: Box::new(make),
        }
    }

    pub fn aggregate_type(&self) -> &'static str {
        self.aggregate_type
    }

    pub fn get(&self, aggregate_id: AggregateId) -> Option<A> {
        self.snapshots.get(&aggregate_id)
    }

    pub fn list(&self) -> Vec<A> {
        self.snapshots.list()
    }

    /// Store `aggregate` unless the snapshot already holds the same or a newer
    /// version. Returns whether the snapshot changed.
    pub fn refresh(&self, aggregate_id: AggregateId, aggregate: &A) -> bool {
        let version = aggregate.version();
        self.snapshots
            .upsert_if(aggregate_id, aggregate.clone(), &|current: &A| {
                current.version() < version
            })
    }

    /// Fold one published envelope into the snapshot of its stream.
    ///
    /// Returns the updated snapshot, or `None` when the envelope belongs to
    /// another aggregate type or was already applied.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
        store: &dyn EventStore,
    ) -> Result<Option<A>, ProjectionError> {
        if envelope.aggregate_type() != self.aggregate_type {
            return Ok(None);
        }

        let aggregate_id = envelope.aggregate_id();
        let mut snapshot = self
            .get(aggregate_id)
            .unwrap_or_else(|| (self.make)(aggregate_id));
        let seq = envelope.sequence_number();

        if seq <= snapshot.version() {
            return Ok(None);
        }

        if seq == snapshot.version() + 1 {
            let event = decode::<A>(envelope.payload())?;
            snapshot.apply(&event);
        } else {
            tracing::debug!(
                %aggregate_id,
                have = snapshot.version(),
                received = seq,
                "snapshot behind by more than one event, reloading stream"
            );
            snapshot = self.load(aggregate_id, store)?;
        }

        self.refresh(aggregate_id, &snapshot);
        Ok(Some(snapshot))
    }

    /// Rehydrate one stream from the store and refresh its snapshot.
    pub fn reload(
        &self,
        aggregate_id: AggregateId,
        store: &dyn EventStore,
    ) -> Result<A, ProjectionError> {
        let snapshot = self.load(aggregate_id, store)?;
        self.refresh(aggregate_id, &snapshot);
        Ok(snapshot)
    }

    /// Drop every snapshot and replay all streams of this aggregate type.
    /// Returns the number of snapshots rebuilt.
    pub fn rebuild(&self, store: &dyn EventStore) -> Result<usize, ProjectionError> {
        let events = store.load_by_type(self.aggregate_type)?;

        let mut streams: BTreeMap<AggregateId, Vec<StoredEvent>> = BTreeMap::new();
        for e in events {
            streams.entry(e.aggregate_id).or_default().push(e);
        }

        self.snapshots.clear();
        for (aggregate_id, history) in &streams {
            let snapshot = self.fold(*aggregate_id, history)?;
            self.snapshots.upsert(*aggregate_id, snapshot);
        }

        tracing::info!(
            aggregate_type = self.aggregate_type,
            streams = streams.len(),
            "snapshots rebuilt"
        );
        Ok(streams.len())
    }

    fn load(&self, aggregate_id: AggregateId, store: &dyn EventStore) -> Result<A, ProjectionError> {
        let history = store.load_stream(aggregate_id)?;
        self.fold(aggregate_id, &history)
    }

    fn fold(&self, aggregate_id: AggregateId, history: &[StoredEvent]) -> Result<A, ProjectionError> {
        let mut aggregate = (self.make)(aggregate_id);
        for stored in history {
            aggregate.apply(&decode::<A>(&stored.payload)?);
        }
        Ok(aggregate)
    }
}

fn decode<A>(payload: &JsonValue) -> Result<A::Event, ProjectionError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    serde_json::from_value(payload.clone()).map_err(|e| ProjectionError::Deserialize(e.to_string()))
}
