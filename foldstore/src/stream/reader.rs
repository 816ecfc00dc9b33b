//! The incremental token reader.

use super::pool::{Segment, SegmentPool};
use super::token::{Span, Token};
use crate::errors::{DecodeError, ReplayError, StreamError, StreamResult};
use std::borrow::Cow;
use std::collections::VecDeque;
use std::io::Read;
use thiserror::Error;

/// A value extraction failed.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The stream was structurally invalid inside the value.
    #[error(transparent)]
    Stream(#[from] StreamError),
    /// The value's bytes did not decode as the requested type.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl From<ExtractError> for ReplayError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Stream(e) => Self::Stream(e),
            ExtractError::Decode(e) => Self::Decode(e),
        }
    }
}

/// What the parser expects at the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    /// At top level, before a value; end of input is also acceptable here.
    TopValue,
    /// Just after `{`: a key or `}`.
    KeyOrObjectEnd,
    /// After a `,` inside an object: a key only.
    Key,
    /// After a key: `:`.
    Colon,
    /// After `:`: a value.
    ObjectValue,
    /// After a value inside an object: `,` or `}`.
    CommaOrObjectEnd,
    /// Just after `[`: a value or `]`.
    ValueOrArrayEnd,
    /// After a `,` inside an array: a value only.
    ArrayValue,
    /// After a value inside an array: `,` or `]`.
    CommaOrArrayEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Object,
    Array,
}

/// An incremental tokenizer over a byte stream of JSON documents.
///
/// The reader is single-owner mutable cursor state: one logical consumer at
/// a time. It holds a forward chain of pooled segments covering the unread
/// tail of the stream plus any value mid-extraction; everything behind that
/// window is returned to the pool as tokens are produced, so live memory is
/// bounded independent of document size.
///
/// Multiple whitespace-separated top-level values are accepted, which keeps
/// newline-delimited feeds readable with a single reader.
pub struct TokenReader<R> {
    source: R,
    pool: SegmentPool,
    segments: VecDeque<Segment>,
    /// Absolute offset of the first retained byte.
    chain_start: u64,
    /// Absolute offset one past the last buffered byte.
    filled: u64,
    /// Absolute cursor: the next unread byte.
    pos: u64,
    /// While a value extraction is in flight, segments at or after this
    /// offset must not be released.
    retain_from: Option<u64>,
    eof: bool,
    stack: Vec<Frame>,
    expect: Expect,
}

impl<R: Read> TokenReader<R> {
    /// Creates a reader over `source`, renting segments from `pool`.
    pub fn new(source: R, pool: SegmentPool) -> Self {
        Self {
            source,
            pool,
            segments: VecDeque::new(),
            chain_start: 0,
            filled: 0,
            pos: 0,
            retain_from: None,
            eof: false,
            stack: Vec::new(),
            expect: Expect::TopValue,
        }
    }

    /// The absolute offset of the cursor.
    pub const fn position(&self) -> u64 {
        self.pos
    }

    /// Produces the next structural token.
    ///
    /// Returns `Ok(None)` only when the source is exhausted and no partial
    /// token or open container remains. Structurally invalid input fails
    /// with [`StreamError::Malformed`]; input that ends mid-token or with an
    /// open container fails with [`StreamError::Truncated`].
    pub fn next_token(&mut self) -> StreamResult<Option<Token>> {
        self.release();
        loop {
            self.skip_whitespace()?;
            let Some(byte) = self.peek()? else {
                if self.expect == Expect::TopValue && self.stack.is_empty() {
                    return Ok(None);
                }
                return Err(StreamError::Truncated { offset: self.pos });
            };

            match self.expect {
                Expect::TopValue | Expect::ObjectValue | Expect::ArrayValue => {
                    return self.scan_value(byte).map(Some);
                }
                Expect::ValueOrArrayEnd => {
                    if byte == b']' {
                        self.pos += 1;
                        self.stack.pop();
                        self.after_value();
                        return Ok(Some(Token::ArrayEnd));
                    }
                    return self.scan_value(byte).map(Some);
                }
                Expect::KeyOrObjectEnd => {
                    if byte == b'}' {
                        self.pos += 1;
                        self.stack.pop();
                        self.after_value();
                        return Ok(Some(Token::ObjectEnd));
                    }
                    return self.scan_key(byte).map(Some);
                }
                Expect::Key => return self.scan_key(byte).map(Some),
                Expect::Colon => {
                    if byte != b':' {
                        return Err(self.malformed("expected ':' after property name"));
                    }
                    self.pos += 1;
                    self.expect = Expect::ObjectValue;
                }
                Expect::CommaOrObjectEnd => match byte {
                    b',' => {
                        self.pos += 1;
                        self.expect = Expect::Key;
                    }
                    b'}' => {
                        self.pos += 1;
                        self.stack.pop();
                        self.after_value();
                        return Ok(Some(Token::ObjectEnd));
                    }
                    _ => return Err(self.malformed("expected ',' or '}' after value")),
                },
                Expect::CommaOrArrayEnd => match byte {
                    b',' => {
                        self.pos += 1;
                        self.expect = Expect::ArrayValue;
                    }
                    b']' => {
                        self.pos += 1;
                        self.stack.pop();
                        self.after_value();
                        return Ok(Some(Token::ArrayEnd));
                    }
                    _ => return Err(self.malformed("expected ',' or ']' after value")),
                },
            }
        }
    }

    /// Extracts exactly one structural sub-value, decoding it with `decode`.
    ///
    /// Only valid when the cursor is positioned at the start of a value (an
    /// object, array, or scalar). Segment release is suspended while the
    /// value is consumed, so `decode` sees the exact bytes of the value as
    /// one contiguous view, however many segments it spans. Release resumes
    /// on every exit path. Nesting extractions is not supported.
    pub fn extract_with<T, F>(&mut self, decode: F) -> Result<T, ExtractError>
    where
        F: FnOnce(&[u8]) -> Result<T, DecodeError>,
    {
        let outcome = self.extract_inner(decode);
        self.retain_from = None;
        self.release();
        outcome
    }

    /// Extracts one sub-value and decodes it as JSON into `T`.
    pub fn extract_json<T>(&mut self, context: &str) -> Result<T, ExtractError>
    where
        T: serde::de::DeserializeOwned,
    {
        self.extract_with(|bytes| {
            serde_json::from_slice(bytes).map_err(|e| DecodeError::new(context, e))
        })
    }

    /// Consumes one value without decoding it.
    ///
    /// Used to step over envelope fields a consumer does not care about.
    pub fn skip_value(&mut self) -> StreamResult<()> {
        self.consume_value()?;
        Ok(())
    }

    /// Whether `span`'s bytes equal `expected`, compared in place across
    /// however many segments hold them, without allocating.
    pub fn span_matches(&self, span: Span, expected: &[u8]) -> bool {
        if span.len() != expected.len() as u64 {
            return false;
        }
        self.span_bytes_iter(span).eq(expected.iter().copied())
    }

    /// Copies `span`'s bytes into an owned buffer.
    pub fn copy_span(&self, span: Span) -> Vec<u8> {
        self.span_bytes_iter(span).collect()
    }

    fn extract_inner<T, F>(&mut self, decode: F) -> Result<T, ExtractError>
    where
        F: FnOnce(&[u8]) -> Result<T, DecodeError>,
    {
        self.seek_value_start()?;
        let start = self.pos;
        self.retain_from = Some(start);
        let end = self.consume_value()?;
        let view = self.view_range(start, end);
        decode(&view).map_err(ExtractError::Decode)
    }

    /// Advances the cursor to the first byte of the upcoming value. Right
    /// after a key token the separating `:` has not been consumed yet; it
    /// must not be captured into an extracted view.
    fn seek_value_start(&mut self) -> StreamResult<()> {
        self.skip_whitespace()?;
        if self.expect == Expect::Colon {
            match self.peek()? {
                Some(b':') => {
                    self.pos += 1;
                    self.expect = Expect::ObjectValue;
                }
                Some(_) => return Err(self.malformed("expected ':' after property name")),
                None => return Err(StreamError::Truncated { offset: self.pos }),
            }
            self.skip_whitespace()?;
        }
        Ok(())
    }

    /// Consumes one whole value, returning the offset one past its last
    /// byte. Tracks nesting depth: value-open increments, value-close
    /// decrements, a scalar is immediately closed.
    fn consume_value(&mut self) -> StreamResult<u64> {
        match self.expect {
            Expect::TopValue | Expect::ObjectValue | Expect::ArrayValue
            | Expect::ValueOrArrayEnd | Expect::Colon => {}
            _ => return Err(self.malformed("not positioned at the start of a value")),
        }
        let mut depth = 0u32;
        let mut first = true;
        loop {
            let token = self
                .next_token()?
                .ok_or(StreamError::Truncated { offset: self.pos })?;
            if first && !token.starts_value() {
                return Err(self.malformed("not positioned at the start of a value"));
            }
            first = false;
            match token {
                Token::ObjectStart | Token::ArrayStart => depth += 1,
                Token::ObjectEnd | Token::ArrayEnd => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(self.pos);
                    }
                }
                Token::Key(_) => {}
                // A scalar opens and closes in one token.
                Token::String(_) | Token::Number(_) | Token::Bool(_) | Token::Null => {
                    if depth == 0 {
                        return Ok(self.pos);
                    }
                }
            }
        }
    }

    fn scan_value(&mut self, byte: u8) -> StreamResult<Token> {
        match byte {
            b'{' => {
                self.pos += 1;
                self.stack.push(Frame::Object);
                self.expect = Expect::KeyOrObjectEnd;
                Ok(Token::ObjectStart)
            }
            b'[' => {
                self.pos += 1;
                self.stack.push(Frame::Array);
                self.expect = Expect::ValueOrArrayEnd;
                Ok(Token::ArrayStart)
            }
            b'"' => {
                let span = self.scan_string()?;
                self.after_value();
                Ok(Token::String(span))
            }
            b'-' | b'0'..=b'9' => {
                let span = self.scan_number()?;
                self.after_value();
                Ok(Token::Number(span))
            }
            b't' => {
                self.expect_literal(b"true")?;
                self.after_value();
                Ok(Token::Bool(true))
            }
            b'f' => {
                self.expect_literal(b"false")?;
                self.after_value();
                Ok(Token::Bool(false))
            }
            b'n' => {
                self.expect_literal(b"null")?;
                self.after_value();
                Ok(Token::Null)
            }
            _ => Err(self.malformed("expected a value")),
        }
    }

    fn scan_key(&mut self, byte: u8) -> StreamResult<Token> {
        if byte != b'"' {
            return Err(self.malformed("expected a property name"));
        }
        let span = self.scan_string()?;
        self.expect = Expect::Colon;
        Ok(Token::Key(span))
    }

    /// Sets the expectation that follows a completed value.
    fn after_value(&mut self) {
        self.expect = match self.stack.last() {
            None => Expect::TopValue,
            Some(Frame::Object) => Expect::CommaOrObjectEnd,
            Some(Frame::Array) => Expect::CommaOrArrayEnd,
        };
    }

    /// Scans a string starting at the opening quote; the returned span
    /// covers the raw bytes between the quotes.
    fn scan_string(&mut self) -> StreamResult<Span> {
        self.pos += 1;
        let start = self.pos;
        loop {
            let Some(byte) = self.peek()? else {
                return Err(StreamError::Truncated { offset: self.pos });
            };
            self.pos += 1;
            match byte {
                b'"' => {
                    return Ok(Span {
                        start,
                        end: self.pos - 1,
                    })
                }
                b'\\' => {
                    // For \uXXXX the hex digits are ordinary characters and
                    // fall through the scan.
                    let Some(escape) = self.peek()? else {
                        return Err(StreamError::Truncated { offset: self.pos });
                    };
                    if !matches!(
                        escape,
                        b'"' | b'\\' | b'/' | b'b' | b'f' | b'n' | b'r' | b't' | b'u'
                    ) {
                        return Err(self.malformed("invalid escape sequence in string"));
                    }
                    self.pos += 1;
                }
                0x00..=0x1F => {
                    self.pos -= 1;
                    return Err(self.malformed("unescaped control character in string"));
                }
                _ => {}
            }
        }
    }

    fn scan_number(&mut self) -> StreamResult<Span> {
        let start = self.pos;
        while let Some(byte) = self.peek()? {
            if byte.is_ascii_digit() || matches!(byte, b'-' | b'+' | b'.' | b'e' | b'E') {
                self.pos += 1;
            } else {
                break;
            }
        }
        let span = Span {
            start,
            end: self.pos,
        };
        if !self.number_is_valid(span) {
            self.pos = start;
            return Err(self.malformed("invalid number literal"));
        }
        Ok(span)
    }

    /// Validates a number literal against the JSON grammar.
    fn number_is_valid(&self, span: Span) -> bool {
        let mut bytes = self.span_bytes_iter(span).peekable();
        if bytes.peek() == Some(&b'-') {
            bytes.next();
        }
        // Integer part: one zero, or a nonzero digit followed by digits.
        match bytes.next() {
            Some(b'0') => {}
            Some(b'1'..=b'9') => {
                while matches!(bytes.peek(), Some(b) if b.is_ascii_digit()) {
                    bytes.next();
                }
            }
            _ => return false,
        }
        // Fraction.
        if bytes.peek() == Some(&b'.') {
            bytes.next();
            if !matches!(bytes.next(), Some(b) if b.is_ascii_digit()) {
                return false;
            }
            while matches!(bytes.peek(), Some(b) if b.is_ascii_digit()) {
                bytes.next();
            }
        }
        // Exponent.
        if matches!(bytes.peek(), Some(b'e' | b'E')) {
            bytes.next();
            if matches!(bytes.peek(), Some(b'+' | b'-')) {
                bytes.next();
            }
            if !matches!(bytes.next(), Some(b) if b.is_ascii_digit()) {
                return false;
            }
            while matches!(bytes.peek(), Some(b) if b.is_ascii_digit()) {
                bytes.next();
            }
        }
        bytes.next().is_none()
    }

    fn expect_literal(&mut self, literal: &[u8]) -> StreamResult<()> {
        for &expected in literal {
            match self.peek()? {
                Some(byte) if byte == expected => self.pos += 1,
                Some(_) => return Err(self.malformed("invalid literal")),
                None => return Err(StreamError::Truncated { offset: self.pos }),
            }
        }
        Ok(())
    }

    fn skip_whitespace(&mut self) -> StreamResult<()> {
        while let Some(byte) = self.peek()? {
            if matches!(byte, b' ' | b'\t' | b'\n' | b'\r') {
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Peeks the byte at the cursor, refilling from the source by renting
    /// one more segment when the window is exhausted.
    fn peek(&mut self) -> StreamResult<Option<u8>> {
        while self.pos >= self.filled {
            if !self.fill_one()? {
                return Ok(None);
            }
        }
        Ok(Some(self.byte_at(self.pos)))
    }

    /// Rents one segment, fills it from the source, and appends it to the
    /// chain. Returns false when the source is exhausted.
    fn fill_one(&mut self) -> StreamResult<bool> {
        if self.eof {
            return Ok(false);
        }
        let mut segment = self.pool.rent();
        let mut len = 0;
        while len < segment.capacity() {
            match self.source.read(&mut segment.buf_mut()[len..]) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => len += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.pool.give_back(segment);
                    return Err(e.into());
                }
            }
        }
        if len == 0 {
            self.pool.give_back(segment);
            return Ok(false);
        }
        segment.set_len(len);
        self.filled += len as u64;
        self.segments.push_back(segment);
        Ok(true)
    }

    /// Returns leading segments whose entire byte range lies behind the
    /// window lower bound (the cursor, or the retain floor mid-extraction).
    fn release(&mut self) {
        let keep_from = self
            .retain_from
            .map_or(self.pos, |floor| floor.min(self.pos));
        while let Some(front_len) = self.segments.front().map(Segment::len) {
            let front_end = self.chain_start + front_len as u64;
            if front_end > keep_from {
                break;
            }
            self.chain_start = front_end;
            if let Some(segment) = self.segments.pop_front() {
                self.pool.give_back(segment);
            }
        }
    }

    fn byte_at(&self, offset: u64) -> u8 {
        debug_assert!(offset >= self.chain_start && offset < self.filled);
        let mut segment_start = self.chain_start;
        for segment in &self.segments {
            let segment_end = segment_start + segment.len() as u64;
            if offset < segment_end {
                return segment.bytes()[(offset - segment_start) as usize];
            }
            segment_start = segment_end;
        }
        unreachable!("offset outside retained window")
    }

    fn span_bytes_iter(&self, span: Span) -> impl Iterator<Item = u8> + '_ {
        (span.start..span.end).map(|offset| self.byte_at(offset))
    }

    /// A contiguous view of `[start, end)`: a borrow when the range lies in
    /// one segment, an assembled buffer when it crosses a seam.
    fn view_range(&self, start: u64, end: u64) -> Cow<'_, [u8]> {
        let mut segment_start = self.chain_start;
        for segment in &self.segments {
            let segment_end = segment_start + segment.len() as u64;
            if start >= segment_start && end <= segment_end {
                let a = (start - segment_start) as usize;
                let b = (end - segment_start) as usize;
                return Cow::Borrowed(&segment.bytes()[a..b]);
            }
            segment_start = segment_end;
        }
        Cow::Owned(self.span_bytes_iter(Span { start, end }).collect())
    }

    fn malformed(&self, reason: &str) -> StreamError {
        StreamError::Malformed {
            offset: self.pos,
            reason: reason.to_string(),
        }
    }
}

impl<R> Drop for TokenReader<R> {
    fn drop(&mut self) {
        // Every exit path returns all held segments to the pool.
        while let Some(segment) = self.segments.pop_front() {
            self.pool.give_back(segment);
        }
    }
}
