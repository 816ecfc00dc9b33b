//! Committing buffered events under optimistic concurrency.
//!
//! The writer submits an aggregate's pending events as one atomic commit
//! claiming the next slot in the aggregate's commit history. The backend
//! is the arbiter: when two writers race for the same slot, exactly one
//! wins and the loser gets a conflict to retry at the application layer.
//! There is no in-process lock and no internal retry.
//!
//! After a successful commit the configured [`SnapshotPolicy`] is asked
//! whether to persist a fresh snapshot. Snapshot writes accelerate later
//! reads but are not history: a failure there is reported on the receipt
//! without touching the commit that already succeeded.

use crate::aggregate::Aggregate;
use crate::codec::PayloadCodec;
use crate::errors::{CommitError, CommitResult, EncodeError, StorageError};
use crate::event::{Commit, SerializedEvent};
use crate::snapshot::Snapshot;
use crate::store::{EventWriter, SnapshotWriter, WriteError};
use crate::types::{CommitSequence, EventSequence};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Decides, after each successful commit, whether the aggregate's current
/// memento should be persisted as a snapshot.
///
/// Policies hold no per-aggregate state beyond what each call provides.
pub trait SnapshotPolicy: Send + Sync {
    /// Whether to snapshot an aggregate now at the given positions.
    fn should_snapshot(
        &self,
        commit_sequence: CommitSequence,
        event_sequence: EventSequence,
    ) -> bool;
}

/// Snapshots after every `n`-th commit.
#[derive(Debug, Clone, Copy)]
pub struct EveryNCommits {
    every: i64,
}

impl EveryNCommits {
    /// Creates the policy. `every` must be positive.
    pub const fn new(every: i64) -> Self {
        assert!(every > 0, "snapshot interval must be positive");
        Self { every }
    }
}

impl SnapshotPolicy for EveryNCommits {
    fn should_snapshot(&self, commit_sequence: CommitSequence, _: EventSequence) -> bool {
        // Slots are numbered from 0, so slot n-1 completes the n-th commit.
        (commit_sequence.get() + 1) % self.every == 0
    }
}

/// Snapshots after every commit.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysSnapshot;

impl SnapshotPolicy for AlwaysSnapshot {
    fn should_snapshot(&self, _: CommitSequence, _: EventSequence) -> bool {
        true
    }
}

/// Never snapshots; replay always starts from the beginning of history.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSnapshot;

impl SnapshotPolicy for NeverSnapshot {
    fn should_snapshot(&self, _: CommitSequence, _: EventSequence) -> bool {
        false
    }
}

/// Why a post-commit snapshot write did not land.
#[derive(Debug, Error)]
pub enum SnapshotFailure {
    /// The memento could not be serialized.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The snapshot store rejected the write.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The outcome of a successful commit.
#[derive(Debug)]
pub struct CommitReceipt<M> {
    /// The aggregate after the commit: pending events cleared, sequence
    /// fields advanced to the committed positions.
    pub aggregate: Aggregate<M>,
    /// How many events the commit wrote. Zero for a no-op commit.
    pub events_committed: usize,
    /// Set when the commit landed but the policy-triggered snapshot write
    /// did not. Warning-class: the commit itself is durable.
    pub snapshot_error: Option<SnapshotFailure>,
}

/// Commits aggregates' buffered events to the event store.
///
/// Stateless apart from its collaborators; any number of callers may share
/// one writer concurrently.
pub struct AggregateWriter<W, S, C> {
    events: W,
    snapshots: S,
    codec: C,
}

impl<W, S, C> AggregateWriter<W, S, C>
where
    W: EventWriter,
    S: SnapshotWriter,
    C: PayloadCodec,
{
    /// Creates a writer over the given storage contracts.
    pub const fn new(events: W, snapshots: S, codec: C) -> Self {
        Self {
            events,
            snapshots,
            codec,
        }
    }

    /// Writes the aggregate's pending events as one atomic commit at the
    /// next commit slot.
    ///
    /// An aggregate with nothing pending is a no-op returning the aggregate
    /// unchanged. An occupied slot yields [`CommitError::Conflict`]; the
    /// caller re-reads and retries with fresh state.
    #[instrument(skip_all, fields(aggregate_id = %aggregate.aggregate_id()))]
    pub async fn commit<M, P>(
        &self,
        aggregate: Aggregate<M>,
        policy: &P,
    ) -> CommitResult<CommitReceipt<M>>
    where
        M: Serialize + Send,
        P: SnapshotPolicy + ?Sized,
    {
        if !aggregate.has_pending() {
            return Ok(CommitReceipt {
                aggregate,
                events_committed: 0,
                snapshot_error: None,
            });
        }

        let slot = aggregate.commit_sequence().next();
        let (aggregate, pending) = aggregate.split_pending();
        let events: Vec<SerializedEvent> = pending
            .into_iter()
            .map(|event| SerializedEvent {
                aggregate_id: aggregate.aggregate_id().clone(),
                partition_key: aggregate.partition_key().clone(),
                event_type: event.event_type,
                sequence: event.sequence,
                commit_sequence: CommitSequence::NONE,
                timestamp: event.timestamp,
                payload: event.payload,
            })
            .collect();
        let commit = Commit::try_new(
            aggregate.aggregate_id().clone(),
            aggregate.partition_key().clone(),
            slot,
            events,
        )?;
        let events_committed = commit.events().len();

        match self.events.write_commit(&commit).await {
            Ok(()) => {}
            Err(WriteError::Conflict { .. }) => {
                return Err(CommitError::Conflict {
                    aggregate_id: aggregate.aggregate_id().clone(),
                    attempted: slot,
                });
            }
            Err(WriteError::Storage(err)) => return Err(err.into()),
        }

        let aggregate = aggregate.committed();
        debug!(
            commit_sequence = aggregate.commit_sequence().get(),
            event_sequence = aggregate.event_sequence().get(),
            events_committed,
            "commit accepted"
        );

        let snapshot_error = if policy
            .should_snapshot(aggregate.commit_sequence(), aggregate.event_sequence())
        {
            self.write_snapshot(&aggregate).await.err()
        } else {
            None
        };
        if let Some(failure) = &snapshot_error {
            warn!(error = %failure, "post-commit snapshot write failed");
        }

        Ok(CommitReceipt {
            aggregate,
            events_committed,
            snapshot_error,
        })
    }

    async fn write_snapshot<M: Serialize>(
        &self,
        aggregate: &Aggregate<M>,
    ) -> Result<(), SnapshotFailure> {
        let snapshot = Snapshot {
            aggregate_id: aggregate.aggregate_id().clone(),
            partition_key: aggregate.partition_key().clone(),
            commit_sequence: aggregate.commit_sequence(),
            event_sequence: aggregate.event_sequence(),
            memento: aggregate.memento(),
        }
        .serialize(&self.codec)?;
        self.snapshots.write_snapshot(&snapshot).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::dispatch::Dispatcher;
    use crate::errors::StorageResult;
    use crate::snapshot::SerializedSnapshot;
    use crate::types::{AggregateId, EventType, PartitionKey, Timestamp};
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct ItemAdded {
        id: String,
    }

    type Items = BTreeSet<String>;

    fn dispatcher() -> Dispatcher<Items> {
        Dispatcher::builder()
            .on("ItemAdded", |mut m: Items, e: ItemAdded| {
                m.insert(e.id);
                m
            })
            .build()
    }

    /// Accepts every commit, or conflicts on a fixed slot.
    struct ScriptedStore {
        conflict_at: Option<CommitSequence>,
        written: Mutex<Vec<Commit>>,
        snapshots: Mutex<Vec<SerializedSnapshot>>,
        fail_snapshots: bool,
    }

    impl ScriptedStore {
        fn accepting() -> Self {
            Self {
                conflict_at: None,
                written: Mutex::new(Vec::new()),
                snapshots: Mutex::new(Vec::new()),
                fail_snapshots: false,
            }
        }
    }

    #[async_trait]
    impl EventWriter for &ScriptedStore {
        async fn write_commit(&self, commit: &Commit) -> Result<(), WriteError> {
            if self.conflict_at == Some(commit.commit_sequence) {
                return Err(WriteError::Conflict {
                    existing: commit.commit_sequence,
                });
            }
            self.written.lock().unwrap().push(commit.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl SnapshotWriter for &ScriptedStore {
        async fn write_snapshot(&self, snapshot: &SerializedSnapshot) -> StorageResult<()> {
            if self.fail_snapshots {
                return Err(StorageError::Unavailable("snapshot store down".into()));
            }
            self.snapshots.lock().unwrap().push(snapshot.clone());
            Ok(())
        }
    }

    fn aggregate_with_pending(n: usize) -> Aggregate<Items> {
        let d = dispatcher();
        let mut aggregate = Aggregate::empty(
            AggregateId::try_new("list-1").unwrap(),
            PartitionKey::try_new("p0").unwrap(),
        );
        for i in 0..n {
            aggregate = aggregate
                .record(
                    &d,
                    &JsonCodec,
                    EventType::try_new("ItemAdded").unwrap(),
                    Timestamp::from_epoch_millis(1_700_000_000_000),
                    &ItemAdded {
                        id: format!("item-{i}"),
                    },
                )
                .unwrap();
        }
        aggregate
    }

    #[tokio::test]
    async fn empty_commit_is_a_no_op() {
        let store = ScriptedStore::accepting();
        let writer = AggregateWriter::new(&store, &store, JsonCodec);
        let aggregate = aggregate_with_pending(0);
        let receipt = writer.commit(aggregate, &NeverSnapshot).await.unwrap();
        assert_eq!(receipt.events_committed, 0);
        assert_eq!(receipt.aggregate.commit_sequence(), CommitSequence::NONE);
        assert!(store.written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_commit_claims_slot_zero() {
        let store = ScriptedStore::accepting();
        let writer = AggregateWriter::new(&store, &store, JsonCodec);
        let receipt = writer
            .commit(aggregate_with_pending(3), &NeverSnapshot)
            .await
            .unwrap();

        assert_eq!(receipt.events_committed, 3);
        assert_eq!(receipt.aggregate.commit_sequence(), CommitSequence::new(0));
        assert_eq!(receipt.aggregate.event_sequence(), EventSequence::new(3));
        assert!(!receipt.aggregate.has_pending());

        let written = store.written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].commit_sequence, CommitSequence::new(0));
        assert_eq!(written[0].first_sequence(), EventSequence::new(1));
        assert_eq!(written[0].last_sequence(), EventSequence::new(3));
    }

    #[tokio::test]
    async fn occupied_slot_is_a_conflict() {
        let store = ScriptedStore {
            conflict_at: Some(CommitSequence::new(0)),
            ..ScriptedStore::accepting()
        };
        let writer = AggregateWriter::new(&store, &store, JsonCodec);
        let err = writer
            .commit(aggregate_with_pending(1), &NeverSnapshot)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommitError::Conflict { attempted, .. } if attempted == CommitSequence::new(0)
        ));
        assert!(store.written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn policy_triggers_snapshot_after_commit() {
        let store = ScriptedStore::accepting();
        let writer = AggregateWriter::new(&store, &store, JsonCodec);
        let receipt = writer
            .commit(aggregate_with_pending(2), &AlwaysSnapshot)
            .await
            .unwrap();
        assert!(receipt.snapshot_error.is_none());

        let snapshots = store.snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].commit_sequence, CommitSequence::new(0));
        assert_eq!(snapshots[0].event_sequence, EventSequence::new(2));
    }

    #[tokio::test]
    async fn snapshot_failure_does_not_fail_the_commit() {
        let store = ScriptedStore {
            fail_snapshots: true,
            ..ScriptedStore::accepting()
        };
        let writer = AggregateWriter::new(&store, &store, JsonCodec);
        let receipt = writer
            .commit(aggregate_with_pending(1), &AlwaysSnapshot)
            .await
            .unwrap();

        // The commit landed; only the acceleration was lost.
        assert_eq!(store.written.lock().unwrap().len(), 1);
        assert_eq!(receipt.aggregate.commit_sequence(), CommitSequence::new(0));
        assert!(matches!(
            receipt.snapshot_error,
            Some(SnapshotFailure::Storage(_))
        ));
    }

    #[test]
    fn every_n_commits_counts_from_slot_zero() {
        let policy = EveryNCommits::new(3);
        let at = EventSequence::new(1);
        assert!(!policy.should_snapshot(CommitSequence::new(0), at));
        assert!(!policy.should_snapshot(CommitSequence::new(1), at));
        assert!(policy.should_snapshot(CommitSequence::new(2), at));
        assert!(!policy.should_snapshot(CommitSequence::new(3), at));
        assert!(policy.should_snapshot(CommitSequence::new(5), at));
    }
}
