//! Structural tokens and byte spans.

/// A half-open range of absolute stream offsets.
///
/// Spans index into the reader's retained window. A span is valid only
/// until the next token is produced; after that, the segments holding its
/// bytes may have been returned to the pool. Callers match or copy span
/// bytes immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// First byte of the span.
    pub start: u64,
    /// One past the last byte of the span.
    pub end: u64,
}

impl Span {
    /// The span's length in bytes.
    pub const fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Whether the span covers no bytes.
    pub const fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// One structural token produced by the reader.
///
/// String-ish tokens carry [`Span`]s rather than owned strings so a consumer
/// can match a property name against a known set of expected names without
/// allocating. String spans cover the raw bytes between the quotes, with
/// escape sequences unresolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// `{`
    ObjectStart,
    /// `}`
    ObjectEnd,
    /// `[`
    ArrayStart,
    /// `]`
    ArrayEnd,
    /// A property name inside an object.
    Key(Span),
    /// A string scalar value.
    String(Span),
    /// A number scalar value; the span covers the full literal.
    Number(Span),
    /// `true` or `false`.
    Bool(bool),
    /// `null`
    Null,
}

impl Token {
    /// Whether this token opens or wholly is a value; a scalar counts as
    /// immediately closed.
    pub const fn starts_value(&self) -> bool {
        !matches!(self, Self::ObjectEnd | Self::ArrayEnd | Self::Key(_))
    }
}
