//! Error types for foldstore.
//!
//! Each subsystem gets its own error enum so callers can tell recoverable
//! outcomes from fatal ones:
//!
//! - [`StorageError`]: backend I/O failures, surfaced as-is; retry and
//!   backoff policy belongs to the caller, never to this core.
//! - [`StreamError`]: structurally invalid input hit by the incremental
//!   token reader; fatal to the current decode.
//! - [`DecodeError`] / [`EncodeError`]: one value's bytes failed to convert;
//!   fatal to that value, not necessarily to its siblings.
//! - [`ReplayError`]: a reconstruction could not complete (sequence gap,
//!   unknown event type, decode failure, storage failure).
//! - [`CommitError`]: a write could not be accepted; the conflict variant is
//!   the optimistic-concurrency signal callers retry on with fresh state.
//! - [`FeedError`]: the feed/checkpoint read path could not make progress.
//!
//! Nothing here is logged-and-swallowed internally; every failure reaches
//! the immediate caller.

use crate::types::{AggregateId, CommitSequence, EventSequence};
use thiserror::Error;

/// A backend-level storage failure (network, throttling, unavailability).
///
/// The core performs no automatic retry; these are reported to the caller
/// unchanged so a wrapping layer can decide on backoff.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend rejected or could not complete the operation.
    #[error("storage backend failure: {0}")]
    Backend(String),

    /// The backend is temporarily unavailable or throttling requests.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// An I/O error occurred talking to the backend.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation did not complete within the backend's deadline.
    #[error("storage operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// The incremental token reader hit structurally invalid input.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The stream violated the encoding's structure (unbalanced brackets,
    /// a misplaced separator, an invalid scalar).
    #[error("malformed stream at byte {offset}: {reason}")]
    Malformed {
        /// Absolute byte offset where the violation was detected.
        offset: u64,
        /// What was wrong at that position.
        reason: String,
    },

    /// The stream ended in the middle of a token or an open container.
    #[error("truncated stream at byte {offset}")]
    Truncated {
        /// Absolute byte offset of the last byte seen.
        offset: u64,
    },

    /// The underlying byte source failed.
    #[error("stream source error: {0}")]
    Source(#[from] std::io::Error),
}

/// A value's bytes could not be decoded as its declared type.
#[derive(Debug, Error)]
#[error("failed to decode {context}: {source}")]
pub struct DecodeError {
    /// What was being decoded when the failure occurred.
    pub context: String,
    /// The underlying serde failure.
    #[source]
    pub source: serde_json::Error,
}

impl DecodeError {
    /// Wraps a serde failure with the name of the value being decoded.
    pub fn new(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self {
            context: context.into(),
            source,
        }
    }
}

/// A value could not be encoded into its wire form.
#[derive(Debug, Error)]
#[error("failed to encode {context}: {source}")]
pub struct EncodeError {
    /// What was being encoded when the failure occurred.
    pub context: String,
    /// The underlying serde failure.
    #[source]
    pub source: serde_json::Error,
}

impl EncodeError {
    /// Wraps a serde failure with the name of the value being encoded.
    pub fn new(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self {
            context: context.into(),
            source,
        }
    }
}

/// A reconstruction or event application could not complete.
///
/// All variants are fatal to the fold in progress: a partial memento would
/// silently misrepresent history, so nothing here is ever skipped over.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// An event's sequence number did not follow the expected previous
    /// value. Indicates corrupted storage or out-of-order delivery.
    #[error("sequence gap: expected event {expected}, found {found}")]
    SequenceGap {
        /// The sequence the fold expected next.
        expected: EventSequence,
        /// The sequence actually carried by the event.
        found: EventSequence,
    },

    /// No fold handler is registered for an event's type tag.
    ///
    /// Skipping the event instead would corrupt the memento, so this aborts
    /// the reconstruction.
    #[error("unrecognized event type '{0}'")]
    UnrecognizedEventType(String),

    /// An event or snapshot payload failed to decode.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The serialized event stream was structurally invalid.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// The backing store failed mid-read.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A commit could not be accepted by the event store.
#[derive(Debug, Error)]
pub enum CommitError {
    /// The target commit slot is already occupied.
    ///
    /// Recoverable: re-read the aggregate, re-derive the intended changes
    /// against fresh state, and retry. The writer never retries internally
    /// and never overwrites the existing commit.
    #[error("concurrency conflict on aggregate '{aggregate_id}': commit slot {attempted} already occupied")]
    Conflict {
        /// The aggregate both writers targeted.
        aggregate_id: AggregateId,
        /// The slot this writer tried to claim.
        attempted: CommitSequence,
    },

    /// The pending batch failed commit shape validation.
    #[error(transparent)]
    Invalid(#[from] crate::event::InvalidCommit),

    /// A pending event's payload could not be serialized.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The backing store failed during the write.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The feed/checkpoint read path could not make progress.
#[derive(Debug, Error)]
pub enum FeedError {
    /// A commit document pulled from the feed could not be applied.
    #[error(transparent)]
    Replay(#[from] ReplayError),

    /// The feed or checkpoint store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The consumer's checkpoint could not be persisted.
    #[error("failed to save checkpoint for '{observer}': {source}")]
    CheckpointSave {
        /// The consumer whose checkpoint was being saved.
        observer: String,
        /// The underlying storage failure.
        #[source]
        source: StorageError,
    },
}

/// Result alias for storage-facing operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result alias for token-reader operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Result alias for reconstruction and event application.
pub type ReplayResult<T> = Result<T, ReplayError>;

/// Result alias for commit operations.
pub type CommitResult<T> = Result<T, CommitError>;

/// Result alias for feed-processing operations.
pub type FeedResult<T> = Result<T, FeedError>;
