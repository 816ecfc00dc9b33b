//! Storage contracts.
//!
//! Concrete backends (blob storage, wide-column stores, document databases,
//! in-memory maps) are external collaborators reached only through these
//! narrow read/write ports. Every operation may block on I/O and is
//! cancellable by dropping its future; all cross-writer coordination is
//! pushed to the backend through the atomic-commit contract, so the core
//! holds no in-process lock around an aggregate's sequence counter.

use crate::errors::{StorageError, StorageResult};
use crate::event::{Commit, SerializedEvent};
use crate::snapshot::SerializedSnapshot;
use crate::types::{
    AggregateId, CommitSequence, ContinuationToken, EventSequence, FeedCheckpoint, ObserverId,
};
use async_trait::async_trait;

/// One page of events returned by [`EventReader::read_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPage {
    /// The events on this page, in sequence order.
    pub events: Vec<SerializedEvent>,
    /// Present when more events remain; pass it back to resume.
    pub continuation: Option<ContinuationToken>,
}

impl EventPage {
    /// A page with nothing on it and nothing after it.
    pub const fn empty() -> Self {
        Self {
            events: Vec::new(),
            continuation: None,
        }
    }
}

/// Bounds for one paged event read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    /// The aggregate whose history is read.
    pub aggregate_id: AggregateId,
    /// First event position to return (inclusive).
    pub from: EventSequence,
    /// Last event position to return (inclusive); `None` means to the end.
    pub to: Option<EventSequence>,
    /// Page size bound.
    pub max_items: usize,
    /// Cursor from the previous page, if resuming.
    pub continuation: Option<ContinuationToken>,
}

/// Reads an aggregate's events in sequence order, page by page.
#[async_trait]
pub trait EventReader: Send + Sync {
    /// Returns the next page of events matching `query`.
    ///
    /// Events arrive in strictly increasing sequence order with no event
    /// outside `[from, to]`. An aggregate with no matching events yields an
    /// empty page with no continuation.
    async fn read_events(&self, query: EventQuery) -> StorageResult<EventPage>;
}

/// A commit write was not accepted.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// The commit slot is already occupied; nothing was written.
    #[error("commit slot {existing} already occupied")]
    Conflict {
        /// The occupied slot the write collided with.
        existing: CommitSequence,
    },

    /// The backend failed; the batch may be retried as-is by the caller.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Writes commits atomically.
#[async_trait]
pub trait EventWriter: Send + Sync {
    /// Writes one commit: all of its events become durable together, or
    /// none do. A write targeting an occupied commit slot fails with
    /// [`WriteError::Conflict`] and must not disturb the existing commit.
    async fn write_commit(&self, commit: &Commit) -> Result<(), WriteError>;
}

/// Reads snapshots.
#[async_trait]
pub trait SnapshotReader: Send + Sync {
    /// Returns the stored snapshot with the highest event sequence at or
    /// below `at_or_below`, or `None` when no snapshot qualifies.
    async fn read_snapshot(
        &self,
        aggregate_id: &AggregateId,
        at_or_below: EventSequence,
    ) -> StorageResult<Option<SerializedSnapshot>>;
}

/// Writes snapshots.
#[async_trait]
pub trait SnapshotWriter: Send + Sync {
    /// Persists a snapshot. Overwriting an older snapshot at the same
    /// position is allowed; snapshots are an acceleration, not history.
    async fn write_snapshot(&self, snapshot: &SerializedSnapshot) -> StorageResult<()>;
}

/// One page of the all-aggregates commit feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPage {
    /// Raw persisted commit documents, in arrival order. Kept as bytes so
    /// the consumer can decode selectively with the token reader.
    pub documents: Vec<Vec<u8>>,
    /// Where the next poll should resume.
    pub checkpoint: FeedCheckpoint,
}

/// Enumerates commits across all aggregates in arrival order, for
/// downstream projections.
#[async_trait]
pub trait CommitFeed: Send + Sync {
    /// Returns the next page of commit documents.
    ///
    /// A `None` checkpoint is a cold start from the beginning of the feed.
    /// The returned checkpoint resumes after the last document on the page,
    /// including when the page is empty.
    async fn poll(
        &self,
        checkpoint: Option<&FeedCheckpoint>,
        max_items: usize,
    ) -> StorageResult<FeedPage>;
}

/// Persists each feed consumer's resume position.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Loads the consumer's saved checkpoint, or `None` before its first
    /// save.
    async fn load(&self, observer: &ObserverId) -> StorageResult<Option<FeedCheckpoint>>;

    /// Saves the consumer's checkpoint, replacing any previous one.
    async fn save(&self, observer: &ObserverId, checkpoint: &FeedCheckpoint) -> StorageResult<()>;

    /// Forgets the consumer's checkpoint, so its next run starts cold.
    async fn delete(&self, observer: &ObserverId) -> StorageResult<()>;
}
