//! Core types for the foldstore event sourcing core.
//!
//! This module defines the fundamental identifier and sequence types used
//! throughout the library. All string identifiers use smart constructors so
//! that validity is established at construction time, following the
//! "parse, don't validate" principle.

use chrono::{DateTime, TimeZone, Utc};
use nutype::nutype;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identifies one aggregate: a consistency boundary reconstructed from its
/// event history.
///
/// `AggregateId` values are guaranteed non-empty and at most 255 characters.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct AggregateId(String);

/// The partition an aggregate's records are stored under.
///
/// Backends that shard by partition use this to co-locate one aggregate's
/// commits and snapshots; single-partition backends may pass a constant.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct PartitionKey(String);

/// The type tag naming an event's payload shape.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct EventType(String);

/// Names a feed consumer so its checkpoint can be persisted and resumed.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ObserverId(String);

/// An event's position within its owning aggregate's full history.
///
/// Real events are numbered from 1 and the numbering is contiguous and
/// strictly increasing, never reused. The sentinel [`EventSequence::NONE`]
/// (-1) marks an aggregate with no history yet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EventSequence(i64);

impl EventSequence {
    /// The "no events yet" sentinel carried by an unborn aggregate.
    pub const NONE: Self = Self(-1);

    /// The position of the first event in any history.
    pub const FIRST: Self = Self(1);

    /// Wraps a raw sequence number.
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw sequence number.
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Whether this is the unborn-aggregate sentinel.
    pub const fn is_none(self) -> bool {
        self.0 < 0
    }

    /// The position following this one. `NONE.next()` is `FIRST`.
    #[must_use]
    pub const fn next(self) -> Self {
        if self.0 < 0 {
            Self::FIRST
        } else {
            Self(self.0 + 1)
        }
    }

    /// The position `n` events after this one.
    #[must_use]
    pub const fn advance(self, n: i64) -> Self {
        if self.0 < 0 {
            Self(n)
        } else {
            Self(self.0 + n)
        }
    }
}

impl std::fmt::Display for EventSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The position of one atomic commit within an aggregate's commit history.
///
/// Successive successful commits are numbered 0, 1, 2, ... with no gaps.
/// The sentinel [`CommitSequence::NONE`] (-1) marks an aggregate that has
/// never committed; its first commit claims slot 0.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CommitSequence(i64);

impl CommitSequence {
    /// The "never committed" sentinel.
    pub const NONE: Self = Self(-1);

    /// The slot claimed by an aggregate's first commit.
    pub const FIRST: Self = Self(0);

    /// Wraps a raw commit number.
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw commit number.
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Whether this is the never-committed sentinel.
    pub const fn is_none(self) -> bool {
        self.0 < 0
    }

    /// The slot following this one. `NONE.next()` is `FIRST`.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for CommitSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A timestamp recorded on every event.
///
/// Wraps a UTC `DateTime` in memory but serializes as epoch milliseconds
/// (i64), which is the wire form persisted by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp from a UTC `DateTime`, truncated to millisecond
    /// precision so an in-memory value always equals its wire round-trip.
    pub fn new(datetime: DateTime<Utc>) -> Self {
        Self::from_epoch_millis(datetime.timestamp_millis())
    }

    /// The current moment, at millisecond precision.
    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    /// Creates a timestamp from epoch milliseconds.
    pub fn from_epoch_millis(millis: i64) -> Self {
        // timestamp_millis_opt only fails outside the representable range,
        // which i64 milliseconds cannot exceed for chrono's bounds in
        // practice; clamp to the epoch on the degenerate inputs.
        Self(
            Utc.timestamp_millis_opt(millis)
                .single()
                .unwrap_or_default(),
        )
    }

    /// This timestamp as epoch milliseconds.
    pub fn epoch_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// The underlying `DateTime`.
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self::new(datetime)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.epoch_millis())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let millis = i64::deserialize(deserializer)?;
        Ok(Self::from_epoch_millis(millis))
    }
}

/// An opaque cursor returned by a paged event read, allowing the next page
/// request to resume where the previous one stopped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContinuationToken(Vec<u8>);

impl ContinuationToken {
    /// Wraps backend-produced cursor bytes.
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The raw cursor bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the token, yielding the cursor bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// A feed consumer's persisted resume position.
///
/// Opaque to the core; only the backend that minted it can interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedCheckpoint(Vec<u8>);

impl FeedCheckpoint {
    /// Wraps backend-produced checkpoint bytes.
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The raw checkpoint bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn aggregate_id_accepts_valid_strings(s in "[a-zA-Z0-9_-]{1,255}") {
            let id = AggregateId::try_new(s.clone());
            prop_assert!(id.is_ok());
            prop_assert_eq!(id.unwrap().into_inner(), s);
        }

        #[test]
        fn aggregate_id_rejects_blank_strings(s in " {0,40}") {
            prop_assert!(AggregateId::try_new(s).is_err());
        }

        #[test]
        fn event_sequence_next_increments_by_one(v in 1i64..i64::MAX - 1) {
            let seq = EventSequence::new(v);
            prop_assert_eq!(seq.next().get(), v + 1);
        }

        #[test]
        fn event_sequence_advance_matches_repeated_next(v in 1i64..1_000_000i64, n in 1i64..64) {
            let mut stepped = EventSequence::new(v);
            for _ in 0..n {
                stepped = stepped.next();
            }
            prop_assert_eq!(EventSequence::new(v).advance(n), stepped);
        }

        #[test]
        fn timestamp_roundtrips_through_epoch_millis(millis in -8_000_000_000_000i64..8_000_000_000_000i64) {
            let ts = Timestamp::from_epoch_millis(millis);
            prop_assert_eq!(ts.epoch_millis(), millis);
        }

        #[test]
        fn timestamp_serde_is_epoch_millis(millis in -8_000_000_000_000i64..8_000_000_000_000i64) {
            let ts = Timestamp::from_epoch_millis(millis);
            let json = serde_json::to_string(&ts).unwrap();
            prop_assert_eq!(&json, &millis.to_string());
            let back: Timestamp = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(back, ts);
        }
    }

    #[test]
    fn sentinels_chain_into_first_positions() {
        assert_eq!(EventSequence::NONE.next(), EventSequence::FIRST);
        assert_eq!(CommitSequence::NONE.next(), CommitSequence::FIRST);
        assert!(EventSequence::NONE.is_none());
        assert!(!EventSequence::FIRST.is_none());
    }

    #[test]
    fn event_sequence_advance_from_none_counts_from_one() {
        assert_eq!(EventSequence::NONE.advance(3), EventSequence::new(3));
    }

    #[test]
    fn timestamp_new_truncates_to_millis() {
        let ts = Timestamp::now();
        assert_eq!(ts, Timestamp::from_epoch_millis(ts.epoch_millis()));
    }

    #[test]
    fn continuation_token_preserves_bytes() {
        let token = ContinuationToken::new(vec![1, 2, 3]);
        assert_eq!(token.as_bytes(), &[1, 2, 3]);
        assert_eq!(token.into_bytes(), vec![1, 2, 3]);
    }
}
