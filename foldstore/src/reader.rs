//! Aggregate reconstruction.
//!
//! The reader combines a snapshot lookup with paginated event replay:
//! start from the newest snapshot at or below the target position (or from
//! nothing), then fold every later event into the memento in strict
//! sequence order. The result is identical whether or not a snapshot
//! existed and however the backend pages the history.

use crate::aggregate::Aggregate;
use crate::codec::PayloadCodec;
use crate::dispatch::Dispatcher;
use crate::errors::{ReplayError, ReplayResult};
use crate::event::SerializedEvent;
use crate::replay::apply_serialized;
use crate::store::{EventQuery, EventReader, SnapshotReader};
use crate::types::{AggregateId, EventSequence, PartitionKey};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Tuning for the read path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Upper bound on events requested per storage page.
    pub page_size: usize,
}

impl ReaderConfig {
    /// Default page bound.
    pub const DEFAULT_PAGE_SIZE: usize = 256;

    /// Creates the default configuration.
    pub const fn new() -> Self {
        Self {
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }

    /// Overrides the per-page event bound.
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Reconstructs aggregates from snapshots and event history.
///
/// Stateless apart from its collaborators; any number of callers may share
/// one reader concurrently.
pub struct AggregateReader<E, S, C, M> {
    events: E,
    snapshots: S,
    codec: C,
    dispatcher: Arc<Dispatcher<M>>,
    config: ReaderConfig,
}

impl<E, S, C, M> AggregateReader<E, S, C, M>
where
    E: EventReader,
    S: SnapshotReader,
    C: PayloadCodec,
    M: Default + DeserializeOwned + 'static,
{
    /// Creates a reader over the given storage contracts.
    pub fn new(events: E, snapshots: S, codec: C, dispatcher: Arc<Dispatcher<M>>) -> Self {
        Self {
            events,
            snapshots,
            codec,
            dispatcher,
            config: ReaderConfig::new(),
        }
    }

    /// Replaces the read-path tuning.
    #[must_use]
    pub fn with_config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Reconstructs the aggregate's latest state.
    ///
    /// An aggregate with no history is born empty: default memento, both
    /// sequence fields at their unborn sentinel, no error.
    pub async fn read(
        &self,
        aggregate_id: AggregateId,
        partition_key: PartitionKey,
    ) -> ReplayResult<Aggregate<M>> {
        self.read_at(aggregate_id, partition_key, None).await
    }

    /// Reconstructs the aggregate as of `target`, or its latest state when
    /// `target` is `None`.
    ///
    /// Storage pages are walked via continuation tokens until the history
    /// (up to the target) is exhausted.
    #[instrument(skip_all, fields(aggregate_id = %aggregate_id, target = ?target))]
    pub async fn read_at(
        &self,
        aggregate_id: AggregateId,
        partition_key: PartitionKey,
        target: Option<EventSequence>,
    ) -> ReplayResult<Aggregate<M>> {
        let at_or_below = target.unwrap_or_else(|| EventSequence::new(i64::MAX));
        let snapshot = self
            .snapshots
            .read_snapshot(&aggregate_id, at_or_below)
            .await?;

        let mut aggregate = match snapshot {
            Some(serialized) => {
                let snapshot = serialized.deserialize::<M, C>(&self.codec)?;
                debug!(
                    event_sequence = snapshot.event_sequence.get(),
                    commit_sequence = snapshot.commit_sequence.get(),
                    "restoring from snapshot"
                );
                Aggregate::restored(
                    aggregate_id.clone(),
                    partition_key,
                    snapshot.commit_sequence,
                    snapshot.event_sequence,
                    snapshot.memento,
                )
            }
            None => Aggregate::empty(aggregate_id.clone(), partition_key),
        };

        // A snapshot exactly at the target needs no replay at all.
        if target == Some(aggregate.event_sequence()) {
            return Ok(aggregate);
        }

        let from = aggregate.event_sequence().next();
        let mut continuation = None;
        let mut pages = 0_u64;
        let mut applied = 0_u64;
        loop {
            let page = self
                .events
                .read_events(EventQuery {
                    aggregate_id: aggregate_id.clone(),
                    from,
                    to: target,
                    max_items: self.config.page_size,
                    continuation,
                })
                .await?;
            pages += 1;
            for event in &page.events {
                aggregate = fold_into(&self.dispatcher, aggregate, event)?;
                applied += 1;
            }
            match page.continuation {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }
        debug!(
            pages,
            applied,
            event_sequence = aggregate.event_sequence().get(),
            "replay complete"
        );
        Ok(aggregate)
    }
}

/// Folds one serialized event into a reconstructed aggregate, advancing
/// its memento and both sequence fields.
fn fold_into<M: 'static>(
    dispatcher: &Dispatcher<M>,
    aggregate: Aggregate<M>,
    event: &SerializedEvent,
) -> Result<Aggregate<M>, ReplayError> {
    let expected = aggregate.event_sequence().next();
    let (aggregate_id, partition_key) =
        (aggregate.aggregate_id().clone(), aggregate.partition_key().clone());
    let memento = apply_serialized(dispatcher, aggregate.into_memento(), expected, event)?;
    Ok(Aggregate::restored(
        aggregate_id,
        partition_key,
        event.commit_sequence,
        event.sequence,
        memento,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::errors::StorageResult;
    use crate::event::SerializedEvent;
    use crate::snapshot::{SerializedSnapshot, Snapshot};
    use crate::store::EventPage;
    use crate::types::{CommitSequence, ContinuationToken, EventType, Timestamp};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeSet;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct ItemAdded {
        id: String,
    }

    type Items = BTreeSet<String>;

    fn dispatcher() -> Arc<Dispatcher<Items>> {
        Arc::new(
            Dispatcher::builder()
                .on("ItemAdded", |mut m: Items, e: ItemAdded| {
                    m.insert(e.id);
                    m
                })
                .build(),
        )
    }

    fn event(seq: i64, commit: i64, id: &str) -> SerializedEvent {
        SerializedEvent {
            aggregate_id: AggregateId::try_new("list-1").unwrap(),
            partition_key: PartitionKey::try_new("p0").unwrap(),
            event_type: EventType::try_new("ItemAdded").unwrap(),
            sequence: EventSequence::new(seq),
            commit_sequence: CommitSequence::new(commit),
            timestamp: Timestamp::from_epoch_millis(seq * 1000),
            payload: format!(r#"{{"id":"{id}"}}"#).into_bytes(),
        }
    }

    /// Serves a fixed history, paged with `page_size` events per response.
    struct FixedHistory {
        events: Vec<SerializedEvent>,
        page_size: usize,
    }

    #[async_trait]
    impl EventReader for FixedHistory {
        async fn read_events(&self, query: EventQuery) -> StorageResult<EventPage> {
            let start = match &query.continuation {
                Some(token) => std::str::from_utf8(token.as_bytes())
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(0),
                None => 0,
            };
            let matching: Vec<_> = self
                .events
                .iter()
                .filter(|e| {
                    e.sequence >= query.from
                        && query.to.map_or(true, |to| e.sequence <= to)
                })
                .cloned()
                .collect();
            let limit = self.page_size.min(query.max_items);
            let page: Vec<_> = matching.iter().skip(start).take(limit).cloned().collect();
            let next = start + page.len();
            let continuation = (next < matching.len())
                .then(|| ContinuationToken::new(next.to_string().into_bytes()));
            Ok(EventPage {
                events: page,
                continuation,
            })
        }
    }

    struct NoSnapshots;

    #[async_trait]
    impl SnapshotReader for NoSnapshots {
        async fn read_snapshot(
            &self,
            _aggregate_id: &AggregateId,
            _at_or_below: EventSequence,
        ) -> StorageResult<Option<SerializedSnapshot>> {
            Ok(None)
        }
    }

    struct OneSnapshot(SerializedSnapshot);

    #[async_trait]
    impl SnapshotReader for OneSnapshot {
        async fn read_snapshot(
            &self,
            _aggregate_id: &AggregateId,
            at_or_below: EventSequence,
        ) -> StorageResult<Option<SerializedSnapshot>> {
            Ok((self.0.event_sequence <= at_or_below).then(|| self.0.clone()))
        }
    }

    fn ids() -> (AggregateId, PartitionKey) {
        (
            AggregateId::try_new("list-1").unwrap(),
            PartitionKey::try_new("p0").unwrap(),
        )
    }

    #[tokio::test]
    async fn no_history_is_born_empty() {
        let reader = AggregateReader::new(
            FixedHistory {
                events: vec![],
                page_size: 10,
            },
            NoSnapshots,
            JsonCodec,
            dispatcher(),
        );
        let (id, pk) = ids();
        let aggregate = reader.read(id, pk).await.unwrap();
        assert_eq!(aggregate.event_sequence(), EventSequence::NONE);
        assert_eq!(aggregate.commit_sequence(), CommitSequence::NONE);
        assert!(aggregate.memento().is_empty());
        assert!(!aggregate.has_pending());
    }

    #[tokio::test]
    async fn replays_full_history_in_order() {
        let reader = AggregateReader::new(
            FixedHistory {
                events: vec![event(1, 0, "A"), event(2, 0, "B"), event(3, 1, "C")],
                page_size: 10,
            },
            NoSnapshots,
            JsonCodec,
            dispatcher(),
        );
        let (id, pk) = ids();
        let aggregate = reader.read(id, pk).await.unwrap();
        assert_eq!(aggregate.event_sequence(), EventSequence::new(3));
        assert_eq!(aggregate.commit_sequence(), CommitSequence::new(1));
        assert_eq!(
            aggregate.memento(),
            &Items::from(["A".into(), "B".into(), "C".into()])
        );
    }

    #[tokio::test]
    async fn pagination_is_invisible_to_the_result() {
        let events = vec![event(1, 0, "A"), event(2, 0, "B"), event(3, 1, "C")];
        let (id, pk) = ids();

        let one_page = AggregateReader::new(
            FixedHistory {
                events: events.clone(),
                page_size: 100,
            },
            NoSnapshots,
            JsonCodec,
            dispatcher(),
        )
        .read(id.clone(), pk.clone())
        .await
        .unwrap();

        let tiny_pages = AggregateReader::new(
            FixedHistory {
                events,
                page_size: 1,
            },
            NoSnapshots,
            JsonCodec,
            dispatcher(),
        )
        .read(id, pk)
        .await
        .unwrap();

        assert_eq!(one_page.memento(), tiny_pages.memento());
        assert_eq!(one_page.event_sequence(), tiny_pages.event_sequence());
        assert_eq!(one_page.commit_sequence(), tiny_pages.commit_sequence());
    }

    #[tokio::test]
    async fn snapshot_skips_replayed_prefix() {
        let (id, pk) = ids();
        let snapshot = Snapshot {
            aggregate_id: id.clone(),
            partition_key: pk.clone(),
            commit_sequence: CommitSequence::new(0),
            event_sequence: EventSequence::new(2),
            memento: Items::from(["A".into(), "B".into()]),
        }
        .serialize(&JsonCodec)
        .unwrap();

        let reader = AggregateReader::new(
            FixedHistory {
                // Only the tail after the snapshot is served.
                events: vec![event(3, 1, "C")],
                page_size: 10,
            },
            OneSnapshot(snapshot),
            JsonCodec,
            dispatcher(),
        );
        let aggregate = reader.read(id, pk).await.unwrap();
        assert_eq!(aggregate.event_sequence(), EventSequence::new(3));
        assert_eq!(aggregate.commit_sequence(), CommitSequence::new(1));
        assert_eq!(
            aggregate.memento(),
            &Items::from(["A".into(), "B".into(), "C".into()])
        );
    }

    #[tokio::test]
    async fn snapshot_at_target_short_circuits_replay() {
        let (id, pk) = ids();
        let snapshot = Snapshot {
            aggregate_id: id.clone(),
            partition_key: pk.clone(),
            commit_sequence: CommitSequence::new(3),
            event_sequence: EventSequence::new(10),
            memento: Items::from(["A".into()]),
        }
        .serialize(&JsonCodec)
        .unwrap();

        let reader = AggregateReader::new(
            FixedHistory {
                // A gap right after the snapshot would fail replay; the
                // short-circuit must never request these.
                events: vec![event(13, 5, "Z")],
                page_size: 10,
            },
            OneSnapshot(snapshot),
            JsonCodec,
            dispatcher(),
        );
        let aggregate = reader
            .read_at(id, pk, Some(EventSequence::new(10)))
            .await
            .unwrap();
        assert_eq!(aggregate.event_sequence(), EventSequence::new(10));
        assert_eq!(aggregate.memento(), &Items::from(["A".into()]));
    }

    #[tokio::test]
    async fn sequence_gap_in_history_fails_the_read() {
        let reader = AggregateReader::new(
            FixedHistory {
                events: vec![event(1, 0, "A"), event(3, 1, "C")],
                page_size: 10,
            },
            NoSnapshots,
            JsonCodec,
            dispatcher(),
        );
        let (id, pk) = ids();
        let err = reader.read(id, pk).await.unwrap_err();
        assert!(matches!(err, ReplayError::SequenceGap { .. }));
    }
}
