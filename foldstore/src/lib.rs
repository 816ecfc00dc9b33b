//! `FoldStore` - Event-sourcing storage core
//!
//! This library reconstructs aggregate state from an append-only history
//! of events, optionally accelerated by snapshots, and commits new events
//! under optimistic concurrency control. Storage backends stay external,
//! reached only through the narrow contracts in [`store`]; an in-memory
//! backend ships in the companion `foldstore-memory` crate.
//!
//! The read path leans on the [`stream`] module's incremental token
//! reader: events are applied to in-memory state by extracting just the
//! fields a fold needs from pooled buffer segments, without materializing
//! whole documents.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregate;
pub mod codec;
pub mod dispatch;
pub mod errors;
pub mod event;
pub mod feed;
pub mod reader;
pub mod replay;
pub mod snapshot;
pub mod store;
pub mod stream;
pub mod types;
pub mod writer;

pub use aggregate::{Aggregate, RecordError};
pub use codec::{JsonCodec, PayloadCodec};
pub use dispatch::{Dispatcher, DispatcherBuilder};
pub use errors::{
    CommitError, CommitResult, DecodeError, EncodeError, FeedError, FeedResult, ReplayError,
    ReplayResult, StorageError, StorageResult, StreamError, StreamResult,
};
pub use event::{Commit, Event, InvalidCommit, SerializedEvent};
pub use feed::{FeedBatch, FeedConfig, FeedProcessor, FeedStop};
pub use reader::{AggregateReader, ReaderConfig};
pub use replay::{apply_serialized, fold_commit_document, fold_envelope, AppliedCommit, AppliedEvent};
pub use snapshot::{SerializedSnapshot, Snapshot};
pub use stream::{SegmentPool, Span, Token, TokenReader};
pub use types::{
    AggregateId, CommitSequence, ContinuationToken, EventSequence, EventType, FeedCheckpoint,
    ObserverId, PartitionKey, Timestamp,
};
pub use writer::{
    AggregateWriter, AlwaysSnapshot, CommitReceipt, EveryNCommits, NeverSnapshot, SnapshotFailure,
    SnapshotPolicy,
};
