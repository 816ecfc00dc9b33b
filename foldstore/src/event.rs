//! Event and commit value types.
//!
//! Events are immutable records of state changes. A [`Commit`] is the unit
//! of atomicity: an ordered batch of serialized events for one aggregate,
//! written in full or not at all.

use crate::types::{AggregateId, CommitSequence, EventSequence, EventType, PartitionKey, Timestamp};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A typed domain event, positioned within its aggregate's history.
///
/// The generic type `P` is the payload type specific to each aggregate
/// definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event<P> {
    /// The tag naming the payload's shape.
    pub event_type: EventType,
    /// The event's 1-based position within the aggregate's full history.
    pub sequence: EventSequence,
    /// When the event was recorded.
    pub timestamp: Timestamp,
    /// The domain-specific payload.
    pub payload: P,
}

impl<P> Event<P> {
    /// Creates an event at the given history position.
    pub const fn new(
        event_type: EventType,
        sequence: EventSequence,
        timestamp: Timestamp,
        payload: P,
    ) -> Self {
        Self {
            event_type,
            sequence,
            timestamp,
            payload,
        }
    }
}

/// The wire form of an event, with its payload as opaque encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// The aggregate this event belongs to.
    pub aggregate_id: AggregateId,
    /// The partition the aggregate's records live under.
    pub partition_key: PartitionKey,
    /// The tag naming the payload's shape.
    pub event_type: EventType,
    /// The event's position within the aggregate's history.
    pub sequence: EventSequence,
    /// The commit slot that wrote this event. Stamped when the event is
    /// batched into a [`Commit`]; [`CommitSequence::NONE`] until then.
    pub commit_sequence: CommitSequence,
    /// When the event was recorded, as epoch milliseconds on the wire.
    pub timestamp: Timestamp,
    /// The encoded payload; self-describing, decodable without the schema.
    pub payload: Vec<u8>,
}

impl SerializedEvent {
    /// The storage key a backend files this event under:
    /// `aggregateId + "__" + sequenceNumber`.
    pub fn storage_key(&self) -> String {
        storage_key(&self.aggregate_id, self.sequence.get())
    }
}

/// Composes the persisted-record key shared by commits and snapshots.
pub fn storage_key(aggregate_id: &AggregateId, sequence: i64) -> String {
    format!("{aggregate_id}__{sequence}")
}

/// A commit failed shape validation at construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidCommit {
    /// A commit must carry at least one event.
    #[error("a commit must contain at least one event")]
    Empty,

    /// Events inside one commit must carry consecutive sequence numbers.
    #[error("events in a commit must be consecutive: {previous} followed by {found}")]
    NonConsecutive {
        /// The sequence of the prior event in the batch.
        previous: EventSequence,
        /// The out-of-order sequence that followed it.
        found: EventSequence,
    },

    /// Every event in a commit must target the commit's aggregate.
    #[error("event for aggregate '{found}' in a commit for '{expected}'")]
    ForeignAggregate {
        /// The aggregate the commit targets.
        expected: AggregateId,
        /// The aggregate an enclosed event targets.
        found: AggregateId,
    },
}

/// An atomically-written batch of events for one aggregate.
///
/// `commit_sequence` is strictly increasing per aggregate; a write targeting
/// an already-occupied slot is a conflict, never an overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// The aggregate this commit extends.
    pub aggregate_id: AggregateId,
    /// The partition the aggregate's records live under.
    pub partition_key: PartitionKey,
    /// The slot this commit occupies in the aggregate's commit history.
    pub commit_sequence: CommitSequence,
    /// The events written by this commit, in sequence order.
    events: Vec<SerializedEvent>,
}

impl Commit {
    /// Builds a commit, validating its shape: at least one event, all events
    /// targeting the commit's aggregate, with consecutive sequence numbers.
    pub fn try_new(
        aggregate_id: AggregateId,
        partition_key: PartitionKey,
        commit_sequence: CommitSequence,
        mut events: Vec<SerializedEvent>,
    ) -> Result<Self, InvalidCommit> {
        if events.is_empty() {
            return Err(InvalidCommit::Empty);
        }
        let mut previous: Option<EventSequence> = None;
        for event in &events {
            if event.aggregate_id != aggregate_id {
                return Err(InvalidCommit::ForeignAggregate {
                    expected: aggregate_id,
                    found: event.aggregate_id.clone(),
                });
            }
            if let Some(prev) = previous {
                if event.sequence != prev.next() {
                    return Err(InvalidCommit::NonConsecutive {
                        previous: prev,
                        found: event.sequence,
                    });
                }
            }
            previous = Some(event.sequence);
        }
        for event in &mut events {
            event.commit_sequence = commit_sequence;
        }
        Ok(Self {
            aggregate_id,
            partition_key,
            commit_sequence,
            events,
        })
    }

    /// The events in this commit, in sequence order.
    pub fn events(&self) -> &[SerializedEvent] {
        &self.events
    }

    /// Consumes the commit, yielding its events.
    pub fn into_events(self) -> Vec<SerializedEvent> {
        self.events
    }

    /// The history position of the first event in this commit.
    pub fn first_sequence(&self) -> EventSequence {
        // Shape validation guarantees at least one event.
        self.events[0].sequence
    }

    /// The history position of the last event in this commit.
    pub fn last_sequence(&self) -> EventSequence {
        self.events[self.events.len() - 1].sequence
    }

    /// The storage key a backend files this commit under:
    /// `aggregateId + "__" + commitSequenceNumber`.
    pub fn storage_key(&self) -> String {
        storage_key(&self.aggregate_id, self.commit_sequence.get())
    }
}

/// The persisted JSON form of an event envelope.
///
/// Field names follow the wire-level record shape (`aggregateId`,
/// `eventType`, ...); the payload is spliced in as raw JSON so a reader can
/// extract it selectively without decoding the rest of the envelope.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventDocument<'a> {
    aggregate_id: &'a AggregateId,
    partition_key: &'a PartitionKey,
    event_type: &'a EventType,
    sequence_number: i64,
    timestamp: i64,
    payload: &'a serde_json::value::RawValue,
}

/// The persisted JSON form of a commit.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommitDocument<'a> {
    aggregate_id: &'a AggregateId,
    partition_key: &'a PartitionKey,
    commit_sequence_number: i64,
    events: Vec<EventDocument<'a>>,
}

impl SerializedEvent {
    /// The payload bytes as raw JSON, validated to be splicable.
    fn payload_raw(&self) -> Result<&serde_json::value::RawValue, crate::errors::EncodeError> {
        let text = std::str::from_utf8(&self.payload).map_err(|_| {
            crate::errors::EncodeError::new(
                format!("payload of {}", self.event_type),
                serde::ser::Error::custom("payload bytes are not valid UTF-8 JSON"),
            )
        })?;
        serde_json::from_str(text).map_err(|e| {
            crate::errors::EncodeError::new(format!("payload of {}", self.event_type), e)
        })
    }
}

impl Commit {
    /// Renders this commit as its persisted JSON document, with every
    /// event's payload embedded as raw JSON.
    pub fn to_document(&self) -> Result<Vec<u8>, crate::errors::EncodeError> {
        let events = self
            .events
            .iter()
            .map(|event| {
                Ok(EventDocument {
                    aggregate_id: &event.aggregate_id,
                    partition_key: &event.partition_key,
                    event_type: &event.event_type,
                    sequence_number: event.sequence.get(),
                    timestamp: event.timestamp.epoch_millis(),
                    payload: event.payload_raw()?,
                })
            })
            .collect::<Result<Vec<_>, crate::errors::EncodeError>>()?;
        let document = CommitDocument {
            aggregate_id: &self.aggregate_id,
            partition_key: &self.partition_key,
            commit_sequence_number: self.commit_sequence.get(),
            events,
        };
        serde_json::to_vec(&document)
            .map_err(|e| crate::errors::EncodeError::new("commit document", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serialized(id: &str, seq: i64) -> SerializedEvent {
        SerializedEvent {
            aggregate_id: AggregateId::try_new(id).unwrap(),
            partition_key: PartitionKey::try_new("p0").unwrap(),
            event_type: EventType::try_new("ItemAdded").unwrap(),
            sequence: EventSequence::new(seq),
            commit_sequence: CommitSequence::NONE,
            timestamp: Timestamp::from_epoch_millis(1_700_000_000_000),
            payload: br#"{"id":"A"}"#.to_vec(),
        }
    }

    #[test]
    fn storage_key_joins_id_and_sequence() {
        let event = serialized("list-1", 4);
        assert_eq!(event.storage_key(), "list-1__4");
    }

    #[test]
    fn commit_accepts_consecutive_events() {
        let commit = Commit::try_new(
            AggregateId::try_new("list-1").unwrap(),
            PartitionKey::try_new("p0").unwrap(),
            CommitSequence::FIRST,
            vec![serialized("list-1", 1), serialized("list-1", 2)],
        )
        .unwrap();
        assert_eq!(commit.first_sequence(), EventSequence::new(1));
        assert_eq!(commit.last_sequence(), EventSequence::new(2));
        assert_eq!(commit.storage_key(), "list-1__0");
        for event in commit.events() {
            assert_eq!(event.commit_sequence, CommitSequence::FIRST);
        }
    }

    #[test]
    fn commit_rejects_empty_batches() {
        let err = Commit::try_new(
            AggregateId::try_new("list-1").unwrap(),
            PartitionKey::try_new("p0").unwrap(),
            CommitSequence::FIRST,
            vec![],
        )
        .unwrap_err();
        assert_eq!(err, InvalidCommit::Empty);
    }

    #[test]
    fn commit_rejects_sequence_gaps() {
        let err = Commit::try_new(
            AggregateId::try_new("list-1").unwrap(),
            PartitionKey::try_new("p0").unwrap(),
            CommitSequence::FIRST,
            vec![serialized("list-1", 1), serialized("list-1", 3)],
        )
        .unwrap_err();
        assert_eq!(
            err,
            InvalidCommit::NonConsecutive {
                previous: EventSequence::new(1),
                found: EventSequence::new(3),
            }
        );
    }

    #[test]
    fn commit_rejects_foreign_events() {
        let err = Commit::try_new(
            AggregateId::try_new("list-1").unwrap(),
            PartitionKey::try_new("p0").unwrap(),
            CommitSequence::FIRST,
            vec![serialized("list-2", 1)],
        )
        .unwrap_err();
        assert!(matches!(err, InvalidCommit::ForeignAggregate { .. }));
    }

    #[test]
    fn serialized_event_roundtrips_through_json() {
        let event = serialized("list-1", 7);
        let json = serde_json::to_string(&event).unwrap();
        let back: SerializedEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
