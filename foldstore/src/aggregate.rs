//! The aggregate value.
//!
//! An [`Aggregate`] is owned exclusively by the caller holding it and is
//! never mutated in place: every operation consumes the value and returns a
//! new one with updated fields, so concurrent callers holding "the same"
//! aggregate never observe each other's in-memory edits. Divergence is
//! resolved only through the commit/conflict protocol.

use crate::codec::PayloadCodec;
use crate::dispatch::Dispatcher;
use crate::errors::{EncodeError, ReplayError};
use crate::event::Event;
use crate::types::{AggregateId, CommitSequence, EventSequence, EventType, PartitionKey, Timestamp};
use thiserror::Error;

/// Recording a new event on an aggregate failed.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The fold handler rejected the payload.
    #[error(transparent)]
    Fold(#[from] ReplayError),

    /// The payload could not be serialized for the pending buffer.
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// An aggregate: its identity, its position in history, its memento, and
/// the events recorded since the last commit.
///
/// Aggregates are *read* (via the aggregate reader) or *born empty* at
/// sequence -1; callers never assemble one field-by-field. The pending
/// buffer is append-only and is cleared exactly once, atomically with the
/// sequence-number bump, when a commit succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate<M> {
    aggregate_id: AggregateId,
    partition_key: PartitionKey,
    commit_sequence: CommitSequence,
    event_sequence: EventSequence,
    memento: M,
    pending: Vec<Event<Vec<u8>>>,
}

impl<M: Default> Aggregate<M> {
    /// An aggregate with no history: sequence -1, default memento, nothing
    /// pending.
    pub fn empty(aggregate_id: AggregateId, partition_key: PartitionKey) -> Self {
        Self {
            aggregate_id,
            partition_key,
            commit_sequence: CommitSequence::NONE,
            event_sequence: EventSequence::NONE,
            memento: M::default(),
            pending: Vec::new(),
        }
    }
}

impl<M> Aggregate<M> {
    /// Reassembles an aggregate at a known position, as produced by replay
    /// or a snapshot. The pending buffer starts empty.
    pub fn restored(
        aggregate_id: AggregateId,
        partition_key: PartitionKey,
        commit_sequence: CommitSequence,
        event_sequence: EventSequence,
        memento: M,
    ) -> Self {
        Self {
            aggregate_id,
            partition_key,
            commit_sequence,
            event_sequence,
            memento,
            pending: Vec::new(),
        }
    }

    /// The aggregate's identity.
    pub const fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    /// The partition the aggregate's records live under.
    pub const fn partition_key(&self) -> &PartitionKey {
        &self.partition_key
    }

    /// The last committed commit slot.
    pub const fn commit_sequence(&self) -> CommitSequence {
        self.commit_sequence
    }

    /// The last committed event position.
    pub const fn event_sequence(&self) -> EventSequence {
        self.event_sequence
    }

    /// The projected state, reflecting committed history plus pending
    /// events.
    pub const fn memento(&self) -> &M {
        &self.memento
    }

    /// Consumes the aggregate, yielding its memento.
    pub fn into_memento(self) -> M {
        self.memento
    }

    /// Events recorded since the last commit, in order.
    pub fn pending(&self) -> &[Event<Vec<u8>>] {
        &self.pending
    }

    /// Whether any events are buffered for the next commit.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// The history position the next recorded event will take.
    pub fn next_event_sequence(&self) -> EventSequence {
        self.event_sequence.advance(self.pending.len() as i64 + 1)
    }

    /// Records a domain event: folds the payload into the memento through
    /// the dispatcher's typed entry point and appends the serialized form
    /// to the pending buffer. Returns the advanced aggregate.
    pub fn record<P, C>(
        self,
        dispatcher: &Dispatcher<M>,
        codec: &C,
        event_type: EventType,
        timestamp: Timestamp,
        payload: &P,
    ) -> Result<Self, RecordError>
    where
        P: serde::Serialize + std::any::Any,
        C: PayloadCodec,
        M: 'static,
    {
        let Self {
            aggregate_id,
            partition_key,
            commit_sequence,
            event_sequence,
            memento,
            mut pending,
        } = self;
        let sequence = event_sequence.advance(pending.len() as i64 + 1);
        let memento = dispatcher.apply_typed(memento, event_type.as_ref(), payload)?;
        let bytes = codec.encode(payload, event_type.as_ref())?;
        pending.push(Event::new(event_type, sequence, timestamp, bytes));
        Ok(Self {
            aggregate_id,
            partition_key,
            commit_sequence,
            event_sequence,
            memento,
            pending,
        })
    }

    /// The advanced aggregate after its pending buffer was durably
    /// committed: sequences bumped to the committed positions, pending
    /// cleared. Sequence bump and clear happen together, never separately.
    pub(crate) fn committed(self) -> Self {
        let events = self.pending.len() as i64;
        Self {
            commit_sequence: self.commit_sequence.next(),
            event_sequence: self.event_sequence.advance(events),
            pending: Vec::new(),
            ..self
        }
    }

    /// Splits the aggregate into the value to keep and the pending events
    /// to serialize into a commit.
    pub(crate) fn split_pending(mut self) -> (Self, Vec<Event<Vec<u8>>>) {
        let pending = std::mem::take(&mut self.pending);
        (self, pending)
    }
}
