//! # Command Builders
//!
//! Purpose: Pair a built [`Command`] with the shape its reply is coerced to,
//! so every convenience method funnels into the same `execute` path.

use crate::coerce::{
    ArrayOf, Blob, Boolean, CallCondition, DictionaryOf, EnumOf, FieldExpireOutcome, FieldPersistOutcome,
    Int64, KeyType, Number, Required, ResultShape, ScanPairsOf, Status,
};
use crate::command::{Command, ToArg};

/// A command together with its declared reply shape.
#[derive(Debug, Clone)]
pub struct Call<S> {
    pub command: Command,
    pub shape: S,
}

impl<S: ResultShape> Call<S> {
    pub fn new(command: Command, shape: S) -> Self {
        Call { command, shape }
    }
}

/// `PING`
pub fn ping() -> Call<Status> {
    Call::new(Command::new("PING").idempotent(), Status)
}

/// `GET key`
pub fn get(key: impl ToArg) -> Call<Blob> {
    Call::new(Command::new("GET").arg(key).idempotent(), Blob)
}

/// `SET key value`; true when the server answered OK.
pub fn set(key: impl ToArg, value: impl ToArg) -> Call<CallCondition> {
    Call::new(Command::new("SET").arg(key).arg(value).idempotent(), CallCondition::ok())
}

/// `SET key value NX`; false when the key already existed.
pub fn set_nx(key: impl ToArg, value: impl ToArg) -> Call<CallCondition> {
    Call::new(Command::new("SET").arg(key).arg(value).arg("NX"), CallCondition::ok())
}

/// `DEL key [key ...]`; number of keys removed.
pub fn del<I>(keys: I) -> Call<Int64>
where
    I: IntoIterator,
    I::Item: ToArg,
{
    Call::new(Command::new("DEL").args(keys), Int64)
}

/// `EXISTS key`
pub fn exists(key: impl ToArg) -> Call<Boolean> {
    Call::new(Command::new("EXISTS").arg(key).idempotent(), Boolean)
}

/// `INCRBYFLOAT key increment`
pub fn incr_by_float(key: impl ToArg, increment: f64) -> Call<Number> {
    Call::new(Command::new("INCRBYFLOAT").arg(key).arg(increment), Number)
}

/// `HSET key field value [field value ...]`; number of fields added.
pub fn hset<I, F, V>(key: impl ToArg, fields: I) -> Call<Int64>
where
    I: IntoIterator<Item = (F, V)>,
    F: ToArg,
    V: ToArg,
{
    let mut command = Command::new("HSET").arg(key);
    for (field, value) in fields {
        command = command.arg(field).arg(value);
    }
    Call::new(command, Int64)
}

/// `HGETALL key`; `None` when the reply was a null aggregate.
pub fn hgetall(key: impl ToArg) -> Call<DictionaryOf<Required<Blob>>> {
    Call::new(Command::new("HGETALL").arg(key).idempotent(), DictionaryOf(Required(Blob)))
}

/// `HSCAN key cursor [MATCH pattern] [COUNT count]`
pub fn hscan(key: impl ToArg, cursor: u64, pattern: Option<&str>, count: Option<usize>) -> Call<ScanPairsOf<Required<Blob>>> {
    let mut command = Command::new("HSCAN").arg(key).arg(cursor);
    if let Some(pattern) = pattern {
        command = command.arg("MATCH").arg(pattern);
    }
    if let Some(count) = count {
        command = command.arg("COUNT").arg(count);
    }
    Call::new(command.idempotent(), ScanPairsOf(Required(Blob)))
}

/// `HEXPIRE key seconds FIELDS n field ...`; one outcome per field.
pub fn hexpire<I>(key: impl ToArg, seconds: u64, fields: I) -> Call<Required<ArrayOf<EnumOf<FieldExpireOutcome>>>>
where
    I: IntoIterator,
    I::Item: ToArg,
{
    let fields: Vec<Vec<u8>> = fields.into_iter().map(|field| field.to_arg()).collect();
    let command = Command::new("HEXPIRE")
        .arg(key)
        .arg(seconds)
        .arg("FIELDS")
        .arg(fields.len())
        .args(fields)
        .idempotent();
    Call::new(command, Required(ArrayOf(EnumOf::new())))
}

/// `HPERSIST key FIELDS n field ...`; one outcome per field.
pub fn hpersist<I>(key: impl ToArg, fields: I) -> Call<Required<ArrayOf<EnumOf<FieldPersistOutcome>>>>
where
    I: IntoIterator,
    I::Item: ToArg,
{
    let fields: Vec<Vec<u8>> = fields.into_iter().map(|field| field.to_arg()).collect();
    let command = Command::new("HPERSIST")
        .arg(key)
        .arg("FIELDS")
        .arg(fields.len())
        .args(fields)
        .idempotent();
    Call::new(command, Required(ArrayOf(EnumOf::new())))
}

/// `TYPE key`
pub fn key_type(key: impl ToArg) -> Call<EnumOf<KeyType>> {
    Call::new(Command::new("TYPE").arg(key).idempotent(), EnumOf::new())
}
