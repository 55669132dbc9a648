//! # Result Coercion
//!
//! Purpose: Convert a decoded [`Reply`] into the typed value a caller declared,
//! or fail with a typed error when the reply does not fit.
//!
//! ## Design Principles
//! 1. **Shape as Contract**: Each shape accepts an explicit set of reply kinds;
//!    everything else is an `UnexpectedReply`, never a default value.
//! 2. **Errors Are Not Data**: An error reply at any depth becomes a server error.
//! 3. **Null Is Not Empty**: Null aggregates coerce to `None`, empty ones to `Some(empty)`.
//! 4. **Composable**: Container shapes wrap element shapes, so one rule per
//!    reply kind serves every command.

use std::collections::HashMap;
use std::marker::PhantomData;

use bytes::Bytes;
use respkit_proto::Reply;

use crate::error::{ClientError, ClientResult};
use crate::number::NumberValue;

/// Declared target type of a command reply.
pub trait ResultShape {
    type Output;

    /// Name used in mismatch errors.
    fn name(&self) -> &'static str;

    /// Converts a non-error reply. Use [`coerce`] as the entry point.
    fn coerce(&self, reply: Reply, command: &str) -> ClientResult<Self::Output>;
}

/// Coerces `reply` through `shape`, turning an error reply into a server error.
pub fn coerce<S: ResultShape + ?Sized>(shape: &S, reply: Reply, command: &str) -> ClientResult<S::Output> {
    match reply {
        Reply::Error { code, message } => Err(ClientError::Server {
            command: command.to_string(),
            code,
            message,
        }),
        reply => shape.coerce(reply, command),
    }
}

fn mismatch(command: &str, expected: &'static str, reply: &Reply) -> ClientError {
    ClientError::UnexpectedReply {
        command: command.to_string(),
        expected,
        actual: reply.kind().to_string(),
    }
}

fn utf8(data: &[u8], command: &str, expected: &'static str) -> ClientResult<String> {
    String::from_utf8(data.to_vec()).map_err(|_| ClientError::UnexpectedReply {
        command: command.to_string(),
        expected,
        actual: "non-utf8 bytes".to_string(),
    })
}

/// Text of a status, bulk, verbatim or big-number reply.
fn text(reply: &Reply, command: &str, expected: &'static str) -> ClientResult<String> {
    match reply.as_bytes() {
        Some(bytes) => utf8(bytes, command, expected),
        None => Err(mismatch(command, expected, reply)),
    }
}

/// The reply itself, untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Raw;

impl ResultShape for Raw {
    type Output = Reply;

    fn name(&self) -> &'static str {
        "reply"
    }

    fn coerce(&self, reply: Reply, _command: &str) -> ClientResult<Reply> {
        Ok(reply)
    }
}

/// Status line (`+OK`, `+PONG`) or short text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Status;

impl ResultShape for Status {
    type Output = String;

    fn name(&self) -> &'static str {
        "status"
    }

    fn coerce(&self, reply: Reply, command: &str) -> ClientResult<String> {
        match &reply {
            Reply::Status(text) => Ok(text.clone()),
            Reply::Bulk(Some(data)) => utf8(data, command, self.name()),
            _ => Err(mismatch(command, self.name(), &reply)),
        }
    }
}

/// Text value; null means absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8;

impl ResultShape for Utf8 {
    type Output = Option<String>;

    fn name(&self) -> &'static str {
        "string"
    }

    fn coerce(&self, reply: Reply, command: &str) -> ClientResult<Option<String>> {
        match &reply {
            Reply::Null | Reply::Bulk(None) => Ok(None),
            Reply::Status(_) | Reply::Bulk(Some(_)) | Reply::Verbatim { .. } => {
                text(&reply, command, self.name()).map(Some)
            }
            _ => Err(mismatch(command, self.name(), &reply)),
        }
    }
}

/// Binary value; null means absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blob;

impl ResultShape for Blob {
    type Output = Option<Bytes>;

    fn name(&self) -> &'static str {
        "bytes"
    }

    fn coerce(&self, reply: Reply, command: &str) -> ClientResult<Option<Bytes>> {
        match reply {
            Reply::Null | Reply::Bulk(None) => Ok(None),
            Reply::Bulk(Some(data)) | Reply::Verbatim { data, .. } => Ok(Some(data)),
            Reply::Status(text) => Ok(Some(Bytes::from(text))),
            other => Err(mismatch(command, self.name(), &other)),
        }
    }
}

/// Signed integer, also accepted as decimal text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Int64;

impl ResultShape for Int64 {
    type Output = i64;

    fn name(&self) -> &'static str {
        "integer"
    }

    fn coerce(&self, reply: Reply, command: &str) -> ClientResult<i64> {
        match &reply {
            Reply::Integer(value) => Ok(*value),
            Reply::Bulk(Some(_)) | Reply::Status(_) | Reply::BigNumber(_) => {
                let text = text(&reply, command, self.name())?;
                let parsed = text.trim().parse::<i64>();
                parsed.map_err(|_| ClientError::InvalidNumber {
                    text,
                    target: "i64",
                })
            }
            _ => Err(mismatch(command, self.name(), &reply)),
        }
    }
}

/// Floating point value from a RESP3 double, an integer or decimal text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Float64;

impl ResultShape for Float64 {
    type Output = f64;

    fn name(&self) -> &'static str {
        "double"
    }

    fn coerce(&self, reply: Reply, command: &str) -> ClientResult<f64> {
        match &reply {
            Reply::Double(value) => Ok(*value),
            Reply::Integer(value) => Ok(*value as f64),
            Reply::Bulk(Some(_)) | Reply::Status(_) | Reply::BigNumber(_) => {
                NumberValue::parse(&text(&reply, command, self.name())?)?.as_f64()
            }
            _ => Err(mismatch(command, self.name(), &reply)),
        }
    }
}

/// Number kept as text, for replies that may be integral or fractional
/// (INCRBYFLOAT, HINCRBYFLOAT, ZSCORE).
#[derive(Debug, Clone, Copy, Default)]
pub struct Number;

impl ResultShape for Number {
    type Output = NumberValue;

    fn name(&self) -> &'static str {
        "number"
    }

    fn coerce(&self, reply: Reply, command: &str) -> ClientResult<NumberValue> {
        match &reply {
            Reply::Integer(value) => Ok(NumberValue::from_integer(*value)),
            Reply::Double(value) => NumberValue::parse(&value.to_string()),
            Reply::Bulk(Some(_)) | Reply::Status(_) | Reply::BigNumber(_) => {
                NumberValue::parse(&text(&reply, command, self.name())?)
            }
            _ => Err(mismatch(command, self.name(), &reply)),
        }
    }
}

/// Integer 0/1 or RESP3 boolean.
#[derive(Debug, Clone, Copy, Default)]
pub struct Boolean;

impl ResultShape for Boolean {
    type Output = bool;

    fn name(&self) -> &'static str {
        "boolean"
    }

    fn coerce(&self, reply: Reply, command: &str) -> ClientResult<bool> {
        match reply {
            Reply::Boolean(value) => Ok(value),
            Reply::Integer(0) => Ok(false),
            Reply::Integer(1) => Ok(true),
            other => Err(mismatch(command, self.name(), &other)),
        }
    }
}

/// True when the reply equals an expected literal.
///
/// A null reply, `0` or `"0"` is the well-formed negative outcome (`SET NX`
/// on an existing key); any other reply is a mismatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallCondition {
    expected: String,
}

impl CallCondition {
    pub fn new(expected: impl Into<String>) -> Self {
        CallCondition {
            expected: expected.into(),
        }
    }

    pub fn ok() -> Self {
        CallCondition::new("OK")
    }
}

impl ResultShape for CallCondition {
    type Output = bool;

    fn name(&self) -> &'static str {
        "condition"
    }

    fn coerce(&self, reply: Reply, command: &str) -> ClientResult<bool> {
        if reply.is_null() {
            return Ok(false);
        }
        let observed = match &reply {
            Reply::Integer(value) => value.to_string(),
            Reply::Boolean(value) => String::from(if *value { "1" } else { "0" }),
            Reply::Status(_) | Reply::Bulk(Some(_)) | Reply::Verbatim { .. } => {
                text(&reply, command, self.name())?
            }
            _ => return Err(mismatch(command, self.name(), &reply)),
        };
        if observed == self.expected {
            Ok(true)
        } else if observed == "0" {
            Ok(false)
        } else {
            Err(ClientError::UnexpectedReply {
                command: command.to_string(),
                expected: self.name(),
                actual: format!("{} {:?}", reply.kind(), observed),
            })
        }
    }
}

/// Lifts any shape to accept null as `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Nullable<S>(pub S);

impl<S: ResultShape> ResultShape for Nullable<S> {
    type Output = Option<S::Output>;

    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn coerce(&self, reply: Reply, command: &str) -> ClientResult<Self::Output> {
        if reply.is_null() {
            return Ok(None);
        }
        self.0.coerce(reply, command).map(Some)
    }
}

/// Rejects null for a shape that would otherwise accept it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Required<S>(pub S);

impl<T, S> ResultShape for Required<S>
where
    S: ResultShape<Output = Option<T>>,
{
    type Output = T;

    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn coerce(&self, reply: Reply, command: &str) -> ClientResult<T> {
        if reply.is_null() {
            return Err(mismatch(command, self.name(), &reply));
        }
        self.0
            .coerce(reply, command)?
            .ok_or_else(|| mismatch(command, self.0.name(), &Reply::Null))
    }
}

/// Children of an array-like reply, or `None` for a null aggregate.
fn elements(reply: Reply, command: &str, expected: &'static str) -> ClientResult<Option<Vec<Reply>>> {
    match reply {
        Reply::Null | Reply::Array(None) => Ok(None),
        Reply::Array(Some(items)) | Reply::Set(items) | Reply::Push(items) => Ok(Some(items)),
        other => Err(mismatch(command, expected, &other)),
    }
}

/// Key/value pairs from a map, a flat `k v k v` array or an array of `[k, v]` pairs.
fn pairs(reply: Reply, command: &str, expected: &'static str) -> ClientResult<Option<Vec<(Reply, Reply)>>> {
    let items = match reply {
        Reply::Map(entries) => return Ok(Some(entries)),
        other => match elements(other, command, expected)? {
            Some(items) => items,
            None => return Ok(None),
        },
    };

    if items
        .iter()
        .all(|item| matches!(item, Reply::Array(Some(pair)) if pair.len() == 2))
        && !items.is_empty()
    {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if let Reply::Array(Some(pair)) = item {
                let mut pair = pair.into_iter();
                if let (Some(key), Some(value)) = (pair.next(), pair.next()) {
                    out.push((key, value));
                }
            }
        }
        return Ok(Some(out));
    }

    if items.len() % 2 != 0 {
        return Err(ClientError::UnexpectedReply {
            command: command.to_string(),
            expected,
            actual: format!("array with odd length {}", items.len()),
        });
    }
    let mut out = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        out.push((key, value));
    }
    Ok(Some(out))
}

fn key_text(key: Reply, command: &str, expected: &'static str) -> ClientResult<String> {
    match key {
        Reply::Error { code, message } => Err(ClientError::Server {
            command: command.to_string(),
            code,
            message,
        }),
        Reply::Integer(value) => Ok(value.to_string()),
        other => text(&other, command, expected),
    }
}

/// Ordered collection of one element shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayOf<S>(pub S);

impl<S: ResultShape> ResultShape for ArrayOf<S> {
    type Output = Option<Vec<S::Output>>;

    fn name(&self) -> &'static str {
        "array"
    }

    fn coerce(&self, reply: Reply, command: &str) -> ClientResult<Self::Output> {
        let Some(items) = elements(reply, command, self.name())? else {
            return Ok(None);
        };
        items
            .into_iter()
            .map(|item| coerce(&self.0, item, command))
            .collect::<ClientResult<Vec<_>>>()
            .map(Some)
    }
}

/// Text-keyed dictionary (HGETALL, CONFIG GET).
#[derive(Debug, Clone, Copy, Default)]
pub struct DictionaryOf<S>(pub S);

impl<S: ResultShape> ResultShape for DictionaryOf<S> {
    type Output = Option<HashMap<String, S::Output>>;

    fn name(&self) -> &'static str {
        "dictionary"
    }

    fn coerce(&self, reply: Reply, command: &str) -> ClientResult<Self::Output> {
        let Some(entries) = pairs(reply, command, self.name())? else {
            return Ok(None);
        };
        let mut out = HashMap::with_capacity(entries.len());
        for (key, value) in entries {
            let key = key_text(key, command, self.name())?;
            out.insert(key, coerce(&self.0, value, command)?);
        }
        Ok(Some(out))
    }
}

/// Ordered key/value pairs (HRANDFIELD WITHVALUES, ZRANGE WITHSCORES).
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyValuePairsOf<S>(pub S);

impl<S: ResultShape> ResultShape for KeyValuePairsOf<S> {
    type Output = Option<Vec<(String, S::Output)>>;

    fn name(&self) -> &'static str {
        "key/value pairs"
    }

    fn coerce(&self, reply: Reply, command: &str) -> ClientResult<Self::Output> {
        let Some(entries) = pairs(reply, command, self.name())? else {
            return Ok(None);
        };
        entries
            .into_iter()
            .map(|(key, value)| {
                let key = key_text(key, command, self.name())?;
                Ok((key, coerce(&self.0, value, command)?))
            })
            .collect::<ClientResult<Vec<_>>>()
            .map(Some)
    }
}

/// Raw token of an enum-valued reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumToken<'a> {
    Integer(i64),
    Text(&'a str),
}

/// A closed set of statuses a reply may carry.
pub trait ReplyEnum: Sized {
    const NAME: &'static str;

    fn from_token(token: EnumToken<'_>) -> Option<Self>;
}

/// Maps a reply through a [`ReplyEnum`] table; unknown values are errors.
pub struct EnumOf<E>(PhantomData<fn() -> E>);

impl<E> EnumOf<E> {
    pub fn new() -> Self {
        EnumOf(PhantomData)
    }
}

impl<E> Default for EnumOf<E> {
    fn default() -> Self {
        EnumOf::new()
    }
}

impl<E> Clone for EnumOf<E> {
    fn clone(&self) -> Self {
        EnumOf::new()
    }
}

impl<E> Copy for EnumOf<E> {}

impl<E> std::fmt::Debug for EnumOf<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EnumOf")
    }
}

impl<E: ReplyEnum> ResultShape for EnumOf<E> {
    type Output = E;

    fn name(&self) -> &'static str {
        E::NAME
    }

    fn coerce(&self, reply: Reply, command: &str) -> ClientResult<E> {
        let (parsed, raw) = match &reply {
            Reply::Integer(value) => (E::from_token(EnumToken::Integer(*value)), value.to_string()),
            Reply::Status(_) | Reply::Bulk(Some(_)) | Reply::Verbatim { .. } => {
                let text = text(&reply, command, E::NAME)?;
                (E::from_token(EnumToken::Text(&text)), text)
            }
            _ => return Err(mismatch(command, E::NAME, &reply)),
        };
        parsed.ok_or_else(|| ClientError::UnknownEnumValue {
            command: command.to_string(),
            enum_name: E::NAME,
            value: raw,
        })
    }
}

/// One page of an incremental scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPage<T> {
    /// Cursor to pass to the next call; 0 means the iteration is complete.
    pub cursor: u64,
    pub items: Vec<T>,
}

impl<T> ScanPage<T> {
    pub fn is_complete(&self) -> bool {
        self.cursor == 0
    }
}

fn scan_parts(reply: Reply, command: &str, expected: &'static str) -> ClientResult<(u64, Reply)> {
    let items = match reply {
        Reply::Array(Some(items)) if items.len() == 2 => items,
        other => return Err(mismatch(command, expected, &other)),
    };
    let mut iter = items.into_iter();
    let (Some(cursor), Some(page)) = (iter.next(), iter.next()) else {
        return Err(mismatch(command, expected, &Reply::Array(None)));
    };
    let cursor = match &cursor {
        Reply::Integer(value) => u64::try_from(*value).ok(),
        other => other
            .as_bytes()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .and_then(|text| text.parse::<u64>().ok()),
    };
    match cursor {
        Some(cursor) => Ok((cursor, page)),
        None => Err(ClientError::UnexpectedReply {
            command: command.to_string(),
            expected,
            actual: "invalid cursor".to_string(),
        }),
    }
}

/// `[cursor, [item, ...]]` scan reply (SCAN, SSCAN).
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanPageOf<S>(pub S);

impl<S: ResultShape> ResultShape for ScanPageOf<S> {
    type Output = ScanPage<S::Output>;

    fn name(&self) -> &'static str {
        "scan page"
    }

    fn coerce(&self, reply: Reply, command: &str) -> ClientResult<Self::Output> {
        let (cursor, page) = scan_parts(reply, command, self.name())?;
        let items = coerce(&ArrayOf(&self.0), page, command)?.unwrap_or_default();
        Ok(ScanPage { cursor, items })
    }
}

/// `[cursor, [key, value, ...]]` scan reply (HSCAN, ZSCAN).
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanPairsOf<S>(pub S);

impl<S: ResultShape> ResultShape for ScanPairsOf<S> {
    type Output = ScanPage<(String, S::Output)>;

    fn name(&self) -> &'static str {
        "scan page"
    }

    fn coerce(&self, reply: Reply, command: &str) -> ClientResult<Self::Output> {
        let (cursor, page) = scan_parts(reply, command, self.name())?;
        let items = coerce(&KeyValuePairsOf(&self.0), page, command)?.unwrap_or_default();
        Ok(ScanPage { cursor, items })
    }
}

impl<S: ResultShape + ?Sized> ResultShape for &S {
    type Output = S::Output;

    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn coerce(&self, reply: Reply, command: &str) -> ClientResult<S::Output> {
        (**self).coerce(reply, command)
    }
}

/// Per-field result of HEXPIRE / HPEXPIRE / HEXPIREAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldExpireOutcome {
    /// The field (or the key) does not exist.
    NoSuchField,
    /// An NX / XX / GT / LT condition was not met.
    ConditionNotMet,
    /// The expiration time was set.
    Set,
    /// The field was deleted because the expiration is in the past.
    Deleted,
}

impl ReplyEnum for FieldExpireOutcome {
    const NAME: &'static str = "field expire outcome";

    fn from_token(token: EnumToken<'_>) -> Option<Self> {
        let code = match token {
            EnumToken::Integer(code) => code,
            EnumToken::Text(text) => text.parse().ok()?,
        };
        match code {
            -2 => Some(FieldExpireOutcome::NoSuchField),
            0 => Some(FieldExpireOutcome::ConditionNotMet),
            1 => Some(FieldExpireOutcome::Set),
            2 => Some(FieldExpireOutcome::Deleted),
            _ => None,
        }
    }
}

/// Per-field result of HPERSIST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPersistOutcome {
    NoSuchField,
    /// The field exists but has no expiration.
    NoExpiration,
    Persisted,
}

impl ReplyEnum for FieldPersistOutcome {
    const NAME: &'static str = "field persist outcome";

    fn from_token(token: EnumToken<'_>) -> Option<Self> {
        let code = match token {
            EnumToken::Integer(code) => code,
            EnumToken::Text(text) => text.parse().ok()?,
        };
        match code {
            -2 => Some(FieldPersistOutcome::NoSuchField),
            -1 => Some(FieldPersistOutcome::NoExpiration),
            1 => Some(FieldPersistOutcome::Persisted),
            _ => None,
        }
    }
}

/// Value type reported by TYPE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    None,
    String,
    List,
    Set,
    SortedSet,
    Hash,
    Stream,
}

impl ReplyEnum for KeyType {
    const NAME: &'static str = "key type";

    fn from_token(token: EnumToken<'_>) -> Option<Self> {
        match token {
            EnumToken::Text("none") => Some(KeyType::None),
            EnumToken::Text("string") => Some(KeyType::String),
            EnumToken::Text("list") => Some(KeyType::List),
            EnumToken::Text("set") => Some(KeyType::Set),
            EnumToken::Text("zset") => Some(KeyType::SortedSet),
            EnumToken::Text("hash") => Some(KeyType::Hash),
            EnumToken::Text("stream") => Some(KeyType::Stream),
            _ => None,
        }
    }
}
