//! Snapshot value types.
//!
//! A snapshot is a cached memento at a known commit/event position, used to
//! shortcut replay. Its recorded positions must correspond to a commit that
//! was durably accepted; reconstruction through a snapshot must equal
//! reconstruction from events alone.

use crate::codec::PayloadCodec;
use crate::errors::{DecodeError, EncodeError};
use crate::event::storage_key;
use crate::types::{AggregateId, CommitSequence, EventSequence, PartitionKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A typed memento persisted at a known position in an aggregate's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot<M> {
    /// The aggregate this snapshot summarizes.
    pub aggregate_id: AggregateId,
    /// The partition the aggregate's records live under.
    pub partition_key: PartitionKey,
    /// The commit slot the snapshot reflects.
    pub commit_sequence: CommitSequence,
    /// The last event folded into the memento.
    pub event_sequence: EventSequence,
    /// The projected state as of `event_sequence`.
    pub memento: M,
}

impl<M> Snapshot<M> {
    /// Serializes the memento, producing the wire form of this snapshot.
    pub fn serialize<C: PayloadCodec>(
        &self,
        codec: &C,
    ) -> Result<SerializedSnapshot, EncodeError>
    where
        M: Serialize,
    {
        Ok(SerializedSnapshot {
            aggregate_id: self.aggregate_id.clone(),
            partition_key: self.partition_key.clone(),
            commit_sequence: self.commit_sequence,
            event_sequence: self.event_sequence,
            memento: codec.encode(&self.memento, "memento")?,
        })
    }
}

/// The wire form of a snapshot, with the memento as opaque encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedSnapshot {
    /// The aggregate this snapshot summarizes.
    pub aggregate_id: AggregateId,
    /// The partition the aggregate's records live under.
    pub partition_key: PartitionKey,
    /// The commit slot the snapshot reflects.
    pub commit_sequence: CommitSequence,
    /// The last event folded into the memento.
    pub event_sequence: EventSequence,
    /// The encoded memento.
    pub memento: Vec<u8>,
}

impl SerializedSnapshot {
    /// Decodes the memento, producing the typed snapshot.
    pub fn deserialize<M, C>(&self, codec: &C) -> Result<Snapshot<M>, DecodeError>
    where
        M: DeserializeOwned,
        C: PayloadCodec,
    {
        Ok(Snapshot {
            aggregate_id: self.aggregate_id.clone(),
            partition_key: self.partition_key.clone(),
            commit_sequence: self.commit_sequence,
            event_sequence: self.event_sequence,
            memento: codec.decode(&self.memento, "memento")?,
        })
    }

    /// The storage key a backend files this snapshot under:
    /// `aggregateId + "__" + eventSequenceNumber`.
    pub fn storage_key(&self) -> String {
        storage_key(&self.aggregate_id, self.event_sequence.get())
    }
}
