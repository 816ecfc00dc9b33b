//! In-memory backend for the `foldstore` event-sourcing core
//!
//! This crate implements every storage contract from `foldstore::store`
//! over plain hash maps behind an `RwLock`, useful for testing and
//! development scenarios where persistence is not required. The semantics
//! match what a durable backend must provide: atomic commits with
//! occupied-slot conflict detection, paged event reads with real
//! continuation tokens, highest-at-or-below snapshot lookup, and an
//! arrival-ordered commit feed over the persisted documents.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use foldstore::errors::{StorageError, StorageResult};
use foldstore::event::{Commit, SerializedEvent};
use foldstore::snapshot::SerializedSnapshot;
use foldstore::store::{
    CheckpointStore, CommitFeed, EventPage, EventQuery, EventReader, EventWriter, FeedPage,
    SnapshotReader, SnapshotWriter, WriteError,
};
use foldstore::types::{
    AggregateId, CommitSequence, ContinuationToken, EventSequence, FeedCheckpoint, ObserverId,
};
use tracing::debug;

/// One aggregate's persisted history.
#[derive(Debug)]
struct AggregateRecords {
    /// Flattened committed events, in sequence order.
    events: Vec<SerializedEvent>,
    /// The next unoccupied commit slot.
    next_slot: CommitSequence,
    /// Snapshots, sorted by event sequence.
    snapshots: Vec<SerializedSnapshot>,
}

impl AggregateRecords {
    fn new() -> Self {
        Self {
            events: Vec::new(),
            next_slot: CommitSequence::FIRST,
            snapshots: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    aggregates: HashMap<AggregateId, AggregateRecords>,
    /// Commit documents across all aggregates, in arrival order.
    feed: Vec<Vec<u8>>,
}

/// Thread-safe in-memory store implementing every storage contract.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// How many events are persisted for the aggregate.
    pub fn event_count(&self, aggregate_id: &AggregateId) -> usize {
        let inner = self.inner.read().expect("RwLock poisoned");
        inner
            .aggregates
            .get(aggregate_id)
            .map_or(0, |records| records.events.len())
    }

    /// How many commit documents the feed holds.
    pub fn feed_len(&self) -> usize {
        self.inner.read().expect("RwLock poisoned").feed.len()
    }
}

/// Continuation tokens and feed checkpoints are decimal offsets into the
/// store's ordering; only this backend can mint or interpret them.
fn parse_offset(bytes: &[u8]) -> StorageResult<usize> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| StorageError::Backend("unrecognized continuation cursor".to_string()))
}

#[async_trait]
impl EventReader for InMemoryStore {
    async fn read_events(&self, query: EventQuery) -> StorageResult<EventPage> {
        let inner = self.inner.read().expect("RwLock poisoned");
        let Some(records) = inner.aggregates.get(&query.aggregate_id) else {
            return Ok(EventPage::empty());
        };

        let matching: Vec<&SerializedEvent> = records
            .events
            .iter()
            .filter(|event| {
                event.sequence >= query.from
                    && query.to.map_or(true, |to| event.sequence <= to)
            })
            .collect();

        let start = match &query.continuation {
            Some(token) => parse_offset(token.as_bytes())?,
            None => 0,
        };
        let events: Vec<SerializedEvent> = matching
            .iter()
            .skip(start)
            .take(query.max_items)
            .map(|event| (*event).clone())
            .collect();
        let next = start + events.len();
        let continuation =
            (next < matching.len()).then(|| ContinuationToken::new(next.to_string().into_bytes()));
        Ok(EventPage {
            events,
            continuation,
        })
    }
}

#[async_trait]
impl EventWriter for InMemoryStore {
    async fn write_commit(&self, commit: &Commit) -> Result<(), WriteError> {
        // Render the persisted document outside the lock.
        let document = commit
            .to_document()
            .map_err(|err| WriteError::Storage(StorageError::Backend(err.to_string())))?;

        let mut inner = self.inner.write().expect("RwLock poisoned");
        let records = inner
            .aggregates
            .entry(commit.aggregate_id.clone())
            .or_insert_with(AggregateRecords::new);

        if commit.commit_sequence < records.next_slot {
            return Err(WriteError::Conflict {
                existing: commit.commit_sequence,
            });
        }
        if commit.commit_sequence != records.next_slot {
            return Err(WriteError::Storage(StorageError::Backend(format!(
                "commit slot {} skips unoccupied slot {}",
                commit.commit_sequence, records.next_slot
            ))));
        }

        records.events.extend(commit.events().iter().cloned());
        records.next_slot = records.next_slot.next();
        inner.feed.push(document);
        debug!(
            aggregate_id = %commit.aggregate_id,
            commit_sequence = commit.commit_sequence.get(),
            events = commit.events().len(),
            "commit stored"
        );
        Ok(())
    }
}

#[async_trait]
impl SnapshotReader for InMemoryStore {
    async fn read_snapshot(
        &self,
        aggregate_id: &AggregateId,
        at_or_below: EventSequence,
    ) -> StorageResult<Option<SerializedSnapshot>> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(inner.aggregates.get(aggregate_id).and_then(|records| {
            records
                .snapshots
                .iter()
                .rev()
                .find(|snapshot| snapshot.event_sequence <= at_or_below)
                .cloned()
        }))
    }
}

#[async_trait]
impl SnapshotWriter for InMemoryStore {
    async fn write_snapshot(&self, snapshot: &SerializedSnapshot) -> StorageResult<()> {
        let mut inner = self.inner.write().expect("RwLock poisoned");
        let records = inner
            .aggregates
            .entry(snapshot.aggregate_id.clone())
            .or_insert_with(AggregateRecords::new);
        match records
            .snapshots
            .binary_search_by_key(&snapshot.event_sequence, |s| s.event_sequence)
        {
            // Overwriting at the same position is allowed; snapshots are an
            // acceleration, not history.
            Ok(index) => records.snapshots[index] = snapshot.clone(),
            Err(index) => records.snapshots.insert(index, snapshot.clone()),
        }
        Ok(())
    }
}

#[async_trait]
impl CommitFeed for InMemoryStore {
    async fn poll(
        &self,
        checkpoint: Option<&FeedCheckpoint>,
        max_items: usize,
    ) -> StorageResult<FeedPage> {
        let inner = self.inner.read().expect("RwLock poisoned");
        let start = match checkpoint {
            Some(checkpoint) => parse_offset(checkpoint.as_bytes())?,
            None => 0,
        };
        let documents: Vec<Vec<u8>> = inner
            .feed
            .iter()
            .skip(start)
            .take(max_items)
            .cloned()
            .collect();
        let next = start + documents.len();
        Ok(FeedPage {
            documents,
            checkpoint: FeedCheckpoint::new(next.to_string().into_bytes()),
        })
    }
}

/// Thread-safe in-memory checkpoint store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<RwLock<HashMap<ObserverId, FeedCheckpoint>>>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty checkpoint store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, observer: &ObserverId) -> StorageResult<Option<FeedCheckpoint>> {
        Ok(self
            .checkpoints
            .read()
            .expect("RwLock poisoned")
            .get(observer)
            .cloned())
    }

    async fn save(&self, observer: &ObserverId, checkpoint: &FeedCheckpoint) -> StorageResult<()> {
        self.checkpoints
            .write()
            .expect("RwLock poisoned")
            .insert(observer.clone(), checkpoint.clone());
        Ok(())
    }

    async fn delete(&self, observer: &ObserverId) -> StorageResult<()> {
        self.checkpoints
            .write()
            .expect("RwLock poisoned")
            .remove(observer);
        Ok(())
    }
}
