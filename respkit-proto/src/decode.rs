//! # RESP Decoding
//!
//! Purpose: Parse one reply from the front of a byte buffer, accepting both
//! RESP2 and RESP3 encodings.
//!
//! ## Design Principles
//! 1. **Two Passes**: `FrameScanner` finds where a frame ends while bytes stream
//!    in, resuming where it stopped; `decode` then builds the value once.
//! 2. **Fail Fast**: Invalid framing returns a `ProtocolError` immediately.
//! 3. **Bounded Work**: Depth, line length, bulk size and aggregate size are
//!    capped by `DecodeLimits` so a hostile peer cannot trigger huge allocations
//!    or unbounded recursion.
//!
//! ## Grammar Notes
//! - `$-1` and `*-1` are RESP2 nulls and stay distinct from empty values.
//! - `%-1`, `~-1` and `>-1` decode to `Reply::Null`.
//! - `|` attributes are parsed and dropped; the value they annotate is returned.

use std::io::{self, Read};

use bytes::{Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::reply::Reply;

/// Largest bulk payload accepted by default (Redis `proto-max-bulk-len`).
pub const DEFAULT_MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Deepest aggregate nesting accepted by default.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Largest aggregate element count accepted by default.
pub const DEFAULT_MAX_AGGREGATE_LEN: usize = u32::MAX as usize;

/// Longest simple line (status, error, number) accepted by default.
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024;

// Upper bound for up-front Vec capacity; longer aggregates grow as they parse.
const PREALLOC_LIMIT: usize = 1024;

/// Caps applied while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_depth: usize,
    pub max_bulk_len: usize,
    pub max_aggregate_len: usize,
    pub max_line_len: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        DecodeLimits {
            max_depth: DEFAULT_MAX_DEPTH,
            max_bulk_len: DEFAULT_MAX_BULK_LEN,
            max_aggregate_len: DEFAULT_MAX_AGGREGATE_LEN,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}

/// Error returned by [`read_reply`].
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Decodes one reply from the start of `buf`.
///
/// Returns `Ok(Some((reply, consumed)))` when a full frame is present,
/// `Ok(None)` when more bytes are needed.
pub fn decode(buf: &[u8], limits: &DecodeLimits) -> Result<Option<(Reply, usize)>, ProtocolError> {
    let mut parser = Parser { buf, pos: 0, limits };
    match parser.reply(0) {
        Ok(reply) => Ok(Some((reply, parser.pos))),
        Err(Step::Incomplete) => Ok(None),
        Err(Step::Invalid(err)) => Err(err),
    }
}

/// Takes the next complete reply off the front of `buf`.
///
/// Returns `Ok(None)` until `scanner` has seen the whole frame; keep the
/// same scanner across calls while bytes are appended to `buf`.
pub fn decode_buffered(
    buf: &mut BytesMut,
    scanner: &mut FrameScanner,
    limits: &DecodeLimits,
) -> Result<Option<Reply>, ProtocolError> {
    let len = match scanner.scan(&buf[..], limits)? {
        Some(len) => len,
        None => return Ok(None),
    };
    let frame = buf.split_to(len);
    match decode(&frame[..], limits)? {
        Some((reply, _)) => Ok(Some(reply)),
        None => Err(ProtocolError::TruncatedFrame),
    }
}

/// Reads exactly one reply from `reader`, buffering surplus bytes in `buf`.
///
/// Bytes left in `buf` after the reply belong to the next reply.
pub fn read_reply<R: Read>(
    reader: &mut R,
    buf: &mut BytesMut,
    limits: &DecodeLimits,
) -> Result<Reply, ReadError> {
    let mut scanner = FrameScanner::new();
    let mut chunk = [0u8; 8 * 1024];
    loop {
        if let Some(reply) = decode_buffered(buf, &mut scanner, limits)? {
            return Ok(reply);
        }
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            return Err(ReadError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-reply",
            )));
        }
        buf.extend_from_slice(&chunk[..read]);
    }
}

/// Resumable search for the end of the frame at the front of a buffer.
///
/// Only headers are inspected and no values are built, so a large reply
/// arriving in many reads is walked once instead of once per read.
#[derive(Debug, Default)]
pub struct FrameScanner {
    pos: usize,
    // Values still owed by each open aggregate; the bottom entry is the frame itself.
    pending: Vec<usize>,
}

impl FrameScanner {
    pub fn new() -> Self {
        FrameScanner::default()
    }

    /// Returns the byte length of the complete frame at the front of `buf`,
    /// or `None` while more bytes are needed.
    ///
    /// Bytes seen by earlier calls must still be at the front of `buf`. The
    /// scanner resets itself once it reports a frame.
    pub fn scan(&mut self, buf: &[u8], limits: &DecodeLimits) -> Result<Option<usize>, ProtocolError> {
        if self.pending.is_empty() {
            self.pending.push(1);
        }
        loop {
            let prefix = match buf.get(self.pos) {
                Some(&prefix) => prefix,
                None => return Ok(None),
            };
            let (line, mut next) = match find_line(buf, self.pos + 1, limits)? {
                Some(found) => found,
                None => return Ok(None),
            };

            let owed = match prefix {
                b'+' | b'-' | b':' | b'_' | b',' | b'#' | b'(' => 0,
                b'$' | b'!' | b'=' => {
                    if let Some(len) = parse_length(line)? {
                        check_bulk(len, limits)?;
                        let end = next
                            .checked_add(len)
                            .and_then(|end| end.checked_add(2))
                            .ok_or(ProtocolError::InvalidLength(len as i64))?;
                        if buf.len() < end {
                            return Ok(None);
                        }
                        next = end;
                    }
                    0
                }
                b'*' | b'~' | b'>' => {
                    let len = parse_length(line)?.unwrap_or(0);
                    check_aggregate(len, limits)?;
                    len
                }
                b'%' | b'|' => {
                    let len = parse_length(line)?.unwrap_or(0);
                    check_aggregate(len, limits)?;
                    len.checked_mul(2).ok_or(ProtocolError::InvalidLength(len as i64))?
                }
                other => return Err(ProtocolError::InvalidPrefix(other)),
            };
            self.pos = next;

            if prefix == b'|' {
                // The attribute pairs come first; the annotated value still fills the slot.
                if let Some(slot) = self.pending.last_mut() {
                    *slot = slot.saturating_add(owed);
                }
                continue;
            }
            if owed > 0 {
                if self.pending.len() > limits.max_depth {
                    return Err(ProtocolError::NestingTooDeep(self.pending.len()));
                }
                self.pending.push(owed);
                continue;
            }

            // One value finished; close every aggregate it completes.
            while let Some(slot) = self.pending.last_mut() {
                *slot -= 1;
                if *slot > 0 {
                    break;
                }
                self.pending.pop();
            }
            if self.pending.is_empty() {
                let len = self.pos;
                self.pos = 0;
                return Ok(Some(len));
            }
        }
    }
}

enum Step {
    Incomplete,
    Invalid(ProtocolError),
}

impl From<ProtocolError> for Step {
    fn from(err: ProtocolError) -> Self {
        Step::Invalid(err)
    }
}

type Parsed<T> = Result<T, Step>;

struct Parser<'a> {
    buf: &'a [u8],
    pos: usize,
    limits: &'a DecodeLimits,
}

impl<'a> Parser<'a> {
    fn reply(&mut self, depth: usize) -> Parsed<Reply> {
        if depth > self.limits.max_depth {
            return Err(ProtocolError::NestingTooDeep(depth).into());
        }
        let prefix = *self.buf.get(self.pos).ok_or(Step::Incomplete)?;
        self.pos += 1;

        match prefix {
            b'+' => Ok(Reply::Status(lossy(self.line()?))),
            b'-' => Ok(Reply::error_from_text(&lossy(self.line()?))),
            b':' => Ok(Reply::Integer(parse_i64(self.line()?)?)),
            b'$' => match self.length()? {
                None => Ok(Reply::Bulk(None)),
                Some(len) => Ok(Reply::Bulk(Some(self.blob(len)?))),
            },
            b'*' => match self.length()? {
                None => Ok(Reply::Array(None)),
                Some(len) => Ok(Reply::Array(Some(self.items(len, depth)?))),
            },
            b'_' => {
                if !self.line()?.is_empty() {
                    return Err(ProtocolError::MissingCrlf.into());
                }
                Ok(Reply::Null)
            }
            b',' => {
                let text = lossy(self.line()?);
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ProtocolError::InvalidDouble(text.clone()))?;
                Ok(Reply::Double(value))
            }
            b'#' => match self.line()? {
                b"t" => Ok(Reply::Boolean(true)),
                b"f" => Ok(Reply::Boolean(false)),
                _ => Err(ProtocolError::InvalidBoolean.into()),
            },
            b'(' => {
                let text = lossy(self.line()?);
                let digits = text.strip_prefix('-').unwrap_or(&text);
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(ProtocolError::InvalidBigNumber(text).into());
                }
                Ok(Reply::BigNumber(text))
            }
            b'!' => match self.length()? {
                None => Ok(Reply::Null),
                Some(len) => {
                    let data = self.blob(len)?;
                    Ok(Reply::error_from_text(&String::from_utf8_lossy(&data)))
                }
            },
            b'=' => match self.length()? {
                None => Ok(Reply::Null),
                Some(len) => {
                    let data = self.blob(len)?;
                    if data.len() < 4 || data[3] != b':' {
                        return Err(ProtocolError::InvalidVerbatim.into());
                    }
                    let format = [data[0], data[1], data[2]];
                    Ok(Reply::Verbatim {
                        format,
                        data: data.slice(4..),
                    })
                }
            },
            b'~' => match self.length()? {
                None => Ok(Reply::Null),
                Some(len) => Ok(Reply::Set(self.items(len, depth)?)),
            },
            b'>' => match self.length()? {
                None => Ok(Reply::Null),
                Some(len) => Ok(Reply::Push(self.items(len, depth)?)),
            },
            b'%' => match self.length()? {
                None => Ok(Reply::Null),
                Some(len) => Ok(Reply::Map(self.pairs(len, depth)?)),
            },
            b'|' => {
                let len = self.length()?.unwrap_or(0);
                self.pairs(len, depth)?;
                self.reply(depth + 1)
            }
            other => Err(ProtocolError::InvalidPrefix(other).into()),
        }
    }

    /// Returns the current line without its CRLF and moves past it.
    fn line(&mut self) -> Parsed<&'a [u8]> {
        let buf: &'a [u8] = self.buf;
        let (line, next) = find_line(buf, self.pos, self.limits)?.ok_or(Step::Incomplete)?;
        self.pos = next;
        Ok(line)
    }

    /// Parses a length line; `-1` yields `None`.
    fn length(&mut self) -> Parsed<Option<usize>> {
        Ok(parse_length(self.line()?)?)
    }

    fn blob(&mut self, len: usize) -> Parsed<Bytes> {
        check_bulk(len, self.limits)?;
        let end = self.pos.checked_add(len).ok_or(ProtocolError::InvalidLength(len as i64))?;
        if self.buf.len() < end + 2 {
            return Err(Step::Incomplete);
        }
        if &self.buf[end..end + 2] != b"\r\n" {
            return Err(ProtocolError::MissingCrlf.into());
        }
        let data = Bytes::copy_from_slice(&self.buf[self.pos..end]);
        self.pos = end + 2;
        Ok(data)
    }

    fn items(&mut self, len: usize, depth: usize) -> Parsed<Vec<Reply>> {
        check_aggregate(len, self.limits)?;
        let mut items = Vec::with_capacity(len.min(PREALLOC_LIMIT));
        for _ in 0..len {
            items.push(self.reply(depth + 1)?);
        }
        Ok(items)
    }

    fn pairs(&mut self, len: usize, depth: usize) -> Parsed<Vec<(Reply, Reply)>> {
        check_aggregate(len, self.limits)?;
        let mut pairs = Vec::with_capacity(len.min(PREALLOC_LIMIT));
        for _ in 0..len {
            let key = self.reply(depth + 1)?;
            let value = self.reply(depth + 1)?;
            pairs.push((key, value));
        }
        Ok(pairs)
    }
}

/// Finds the CRLF-terminated line starting at `start`.
///
/// Returns the line without its terminator and the position after it, or
/// `None` when the terminator has not arrived yet.
fn find_line<'a>(
    buf: &'a [u8],
    start: usize,
    limits: &DecodeLimits,
) -> Result<Option<(&'a [u8], usize)>, ProtocolError> {
    let rest = buf.get(start..).unwrap_or_default();
    // A line of max_line_len bytes plus CRLF is the longest one accepted.
    let window = &rest[..rest.len().min(limits.max_line_len.saturating_add(2))];
    let newline = match window.iter().position(|&b| b == b'\n') {
        Some(newline) => newline,
        None if rest.len() > limits.max_line_len.saturating_add(1) => {
            return Err(ProtocolError::LineTooLong {
                max: limits.max_line_len,
            })
        }
        None => return Ok(None),
    };
    if newline == 0 || rest[newline - 1] != b'\r' {
        return Err(ProtocolError::MissingCrlf);
    }
    Ok(Some((&rest[..newline - 1], start + newline + 1)))
}

fn parse_length(line: &[u8]) -> Result<Option<usize>, ProtocolError> {
    match parse_i64(line)? {
        -1 => Ok(None),
        v if v < 0 => Err(ProtocolError::InvalidLength(v)),
        v => Ok(Some(v as usize)),
    }
}

fn check_bulk(len: usize, limits: &DecodeLimits) -> Result<(), ProtocolError> {
    if len > limits.max_bulk_len {
        return Err(ProtocolError::BulkTooLong {
            len,
            max: limits.max_bulk_len,
        });
    }
    Ok(())
}

fn check_aggregate(len: usize, limits: &DecodeLimits) -> Result<(), ProtocolError> {
    if len > limits.max_aggregate_len {
        return Err(ProtocolError::AggregateTooLong {
            len,
            max: limits.max_aggregate_len,
        });
    }
    Ok(())
}

fn lossy(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

fn parse_i64(data: &[u8]) -> Result<i64, ProtocolError> {
    let invalid = || ProtocolError::InvalidInteger(lossy(data));
    let (negative, digits) = match data.first() {
        Some(b'-') => (true, &data[1..]),
        Some(b'+') => (false, &data[1..]),
        _ => (false, data),
    };
    if digits.is_empty() {
        return Err(invalid());
    }

    // Accumulate as a negative number so i64::MIN parses without overflow.
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(invalid());
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_sub((b - b'0') as i64))
            .ok_or_else(invalid)?;
    }

    if negative {
        Ok(value)
    } else {
        value.checked_neg().ok_or_else(invalid)
    }
}
