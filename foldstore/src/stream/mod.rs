//! Incremental, allocation-minimizing token reader.
//!
//! Commits and feed pages can hold many events, and decoding every field of
//! every event defeats the purpose of a hot-path fold. This module turns a
//! byte stream into structural tokens while bounding memory to a small
//! multiple of the configured segment size, regardless of total stream
//! length, and supports extracting exactly one sub-value for typed decoding
//! without re-scanning from the start.
//!
//! A [`TokenReader`] owns a forward chain of fixed-size buffer segments
//! rented from a shared [`SegmentPool`]. Segments whose bytes lie entirely
//! behind the cursor are returned to the pool after every token, except
//! while a value extraction is in flight. Every exit path, including decode
//! errors and early abandonment, returns all held segments.

mod pool;
mod reader;
mod token;

pub use pool::SegmentPool;
pub use reader::{ExtractError, TokenReader};
pub use token::{Span, Token};
