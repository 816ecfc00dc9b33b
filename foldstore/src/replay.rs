//! Serialized event application.
//!
//! Two routes feed the dispatcher from storage: already-decoded
//! [`SerializedEvent`] structs returned by an event reader page, and raw
//! commit documents pulled from the feed, walked incrementally with the
//! token reader so only the fields a fold needs are ever decoded.
//!
//! Both routes verify the contiguity invariant as they go: an event whose
//! sequence is not the expected previous + 1 aborts the fold with a
//! sequence gap.

use crate::dispatch::Dispatcher;
use crate::errors::{ReplayError, ReplayResult, StreamError};
use crate::event::SerializedEvent;
use crate::stream::{Token, TokenReader};
use crate::types::{CommitSequence, EventSequence, Timestamp};
use std::io::Read;

/// The result of folding one serialized event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEvent<M> {
    /// The advanced memento.
    pub memento: M,
    /// The applied event's position.
    pub sequence: EventSequence,
    /// The applied event's timestamp.
    pub timestamp: Timestamp,
}

/// Folds one already-materialized serialized event into the memento,
/// verifying it carries the expected sequence.
pub fn apply_serialized<M: 'static>(
    dispatcher: &Dispatcher<M>,
    memento: M,
    expected: EventSequence,
    event: &SerializedEvent,
) -> ReplayResult<M> {
    if event.sequence != expected {
        return Err(ReplayError::SequenceGap {
            expected,
            found: event.sequence,
        });
    }
    dispatcher.apply_raw(memento, event.event_type.as_ref().as_bytes(), &event.payload)
}

/// Folds one event envelope directly from a token stream.
///
/// The reader must be positioned at the envelope's opening `{`. Only the
/// type tag, sequence number, timestamp, and payload are decoded; every
/// other envelope field is skipped without materializing it. The tag is
/// matched against registered constants without building a string.
///
/// When `expected` is `None` the envelope's own sequence is accepted as-is;
/// feed consumers use this for the first event of a foreign commit.
pub fn fold_envelope<M: 'static, R: Read>(
    dispatcher: &Dispatcher<M>,
    memento: M,
    expected: Option<EventSequence>,
    reader: &mut TokenReader<R>,
) -> ReplayResult<AppliedEvent<M>> {
    match reader.next_token()? {
        Some(Token::ObjectStart) => {}
        _ => {
            return Err(StreamError::Malformed {
                offset: reader.position(),
                reason: "expected an event envelope object".to_string(),
            }
            .into())
        }
    }
    fold_envelope_fields(dispatcher, memento, expected, reader)
}

/// Walks envelope fields after the opening `{` has been consumed.
fn fold_envelope_fields<M: 'static, R: Read>(
    dispatcher: &Dispatcher<M>,
    memento: M,
    expected: Option<EventSequence>,
    reader: &mut TokenReader<R>,
) -> ReplayResult<AppliedEvent<M>> {
    let mut event_type: Option<Vec<u8>> = None;
    let mut sequence: Option<i64> = None;
    let mut timestamp: Option<i64> = None;
    let mut payload: Option<Vec<u8>> = None;

    loop {
        let token = reader.next_token()?.ok_or(StreamError::Truncated {
            offset: reader.position(),
        })?;
        let span = match token {
            Token::ObjectEnd => break,
            Token::Key(span) => span,
            _ => {
                return Err(StreamError::Malformed {
                    offset: reader.position(),
                    reason: "expected a property name in event envelope".to_string(),
                }
                .into())
            }
        };

        if reader.span_matches(span, b"eventType") {
            match reader.next_token()? {
                Some(Token::String(tag)) => event_type = Some(reader.copy_span(tag)),
                _ => return Err(envelope_field_error(reader, "eventType")),
            }
        } else if reader.span_matches(span, b"sequenceNumber") {
            sequence = Some(reader.extract_json("sequenceNumber")?);
        } else if reader.span_matches(span, b"timestamp") {
            timestamp = Some(reader.extract_json("timestamp")?);
        } else if reader.span_matches(span, b"payload") {
            payload = Some(reader.extract_with(|bytes| Ok(bytes.to_vec()))?);
        } else {
            // Unrecognized envelope fields are skipped, not decoded.
            reader.skip_value()?;
        }
    }

    let event_type = event_type.ok_or_else(|| missing_field(reader, "eventType"))?;
    let sequence = EventSequence::new(sequence.ok_or_else(|| missing_field(reader, "sequenceNumber"))?);
    let timestamp = Timestamp::from_epoch_millis(
        timestamp.ok_or_else(|| missing_field(reader, "timestamp"))?,
    );
    let payload = payload.ok_or_else(|| missing_field(reader, "payload"))?;

    if let Some(expected) = expected {
        if sequence != expected {
            return Err(ReplayError::SequenceGap {
                expected,
                found: sequence,
            });
        }
    }
    let memento = dispatcher.apply_raw(memento, &event_type, &payload)?;
    Ok(AppliedEvent {
        memento,
        sequence,
        timestamp,
    })
}

/// The result of folding one commit document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedCommit<M> {
    /// The advanced memento.
    pub memento: M,
    /// The commit's slot, as recorded in the document.
    pub commit_sequence: CommitSequence,
    /// The position of the last event in the commit.
    pub last_sequence: EventSequence,
    /// How many events the commit carried.
    pub events_applied: usize,
}

/// Folds one raw commit document (as stored by a backend or delivered by
/// the feed) into the memento.
///
/// The reader must be positioned at the document's opening `{`. The
/// document's events are applied in order; the first is checked against
/// `expected_next` when given (`None` accepts the commit wherever it
/// starts), and the rest must follow contiguously.
pub fn fold_commit_document<M: 'static, R: Read>(
    dispatcher: &Dispatcher<M>,
    memento: M,
    expected_next: Option<EventSequence>,
    reader: &mut TokenReader<R>,
) -> ReplayResult<AppliedCommit<M>> {
    match reader.next_token()? {
        Some(Token::ObjectStart) => {}
        _ => {
            return Err(StreamError::Malformed {
                offset: reader.position(),
                reason: "expected a commit document object".to_string(),
            }
            .into())
        }
    }

    let mut memento = memento;
    let mut commit_sequence: Option<i64> = None;
    let mut expected = expected_next;
    let mut last_sequence = None;
    let mut events_applied = 0usize;

    loop {
        let token = reader.next_token()?.ok_or(StreamError::Truncated {
            offset: reader.position(),
        })?;
        let span = match token {
            Token::ObjectEnd => break,
            Token::Key(span) => span,
            _ => {
                return Err(StreamError::Malformed {
                    offset: reader.position(),
                    reason: "expected a property name in commit document".to_string(),
                }
                .into())
            }
        };

        if reader.span_matches(span, b"commitSequenceNumber") {
            commit_sequence = Some(reader.extract_json("commitSequenceNumber")?);
        } else if reader.span_matches(span, b"events") {
            match reader.next_token()? {
                Some(Token::ArrayStart) => {}
                _ => return Err(envelope_field_error(reader, "events")),
            }
            loop {
                match reader.next_token()? {
                    Some(Token::ArrayEnd) => break,
                    Some(Token::ObjectStart) => {
                        let applied =
                            fold_envelope_fields(dispatcher, memento, expected, reader)?;
                        memento = applied.memento;
                        expected = Some(applied.sequence.next());
                        last_sequence = Some(applied.sequence);
                        events_applied += 1;
                    }
                    _ => {
                        return Err(StreamError::Malformed {
                            offset: reader.position(),
                            reason: "expected an event envelope in events array".to_string(),
                        }
                        .into())
                    }
                }
            }
        } else {
            reader.skip_value()?;
        }
    }

    let commit_sequence = CommitSequence::new(
        commit_sequence.ok_or_else(|| missing_field(reader, "commitSequenceNumber"))?,
    );
    let last_sequence = last_sequence.ok_or_else(|| {
        ReplayError::from(StreamError::Malformed {
            offset: reader.position(),
            reason: "commit document carried no events".to_string(),
        })
    })?;
    Ok(AppliedCommit {
        memento,
        commit_sequence,
        last_sequence,
        events_applied,
    })
}

fn envelope_field_error<R: Read>(reader: &TokenReader<R>, field: &str) -> ReplayError {
    StreamError::Malformed {
        offset: reader.position(),
        reason: format!("unexpected value for '{field}'"),
    }
    .into()
}

fn missing_field<R: Read>(reader: &TokenReader<R>, field: &str) -> ReplayError {
    StreamError::Malformed {
        offset: reader.position(),
        reason: format!("event envelope missing '{field}'"),
    }
    .into()
}
