//! The encode/decode seam between typed payloads and persisted bytes.
//!
//! The core treats every persisted payload as an opaque self-describing
//! span; [`PayloadCodec`] is the contract a concrete encoding must satisfy.
//! [`JsonCodec`] is the reference implementation and the encoding the
//! incremental token reader understands.

use crate::errors::{DecodeError, EncodeError};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Converts typed values to and from their persisted byte form.
///
/// `context` names the value being converted (an event type tag, "memento",
/// ...) so a failure can say what it was working on. Conversion failures are
/// returned, never swallowed; a decode failure is fatal to that one value
/// but does not invalidate sibling values already decoded.
pub trait PayloadCodec: Send + Sync {
    /// Encodes a value into its wire form.
    fn encode<T: Serialize>(&self, value: &T, context: &str) -> Result<Vec<u8>, EncodeError>;

    /// Decodes a value from its wire form.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8], context: &str) -> Result<T, DecodeError>;
}

/// The reference JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T, context: &str) -> Result<Vec<u8>, EncodeError> {
        serde_json::to_vec(value).map_err(|e| EncodeError::new(context, e))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8], context: &str) -> Result<T, DecodeError> {
        serde_json::from_slice(bytes).map_err(|e| DecodeError::new(context, e))
    }
}
