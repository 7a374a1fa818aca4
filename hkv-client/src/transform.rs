//! # Reply Transformer Registry
//!
//! Purpose: Map a command's identity to the conversion applied to its raw
//! reply, so every execution path (direct call, pipeline, transaction) yields
//! the same domain value for the same command.
//!
//! ## Design Principles
//! 1. **Stateless**: `Transform` is a `Copy` tag; `apply` is a pure function.
//! 2. **Selected Once**: The transform is chosen when the command is built and
//!    travels with it, never re-derived from the reply.
//! 3. **Shape Errors Are Decode Errors**: An unexpected reply shape fails with
//!    `ClientError::Decode`, never with a silent default.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{ClientError, ClientResult};
use crate::resp::RespValue;
use crate::value::Value;

/// Conversion from a raw reply to a domain value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transform {
    /// Structural conversion only.
    #[default]
    Identity,
    /// Integer reply to boolean (`0` is false).
    Boolify,
    /// `OK` to true, null bulk to false (SET with NX/XX).
    BoolifyOk,
    /// Flat `[field, value, ...]` array to a map.
    Hashify,
    /// Bulk numeric string to float; null stays null.
    Floatify,
    /// Flat `[member, score, ...]` array to `[[member, score], ...]`.
    FloatPairs,
    /// INFO text (`field:value` lines) to a map.
    InfoMap,
}

impl Transform {
    /// Applies the transform to a non-error reply.
    pub fn apply(self, raw: RespValue) -> ClientResult<Value> {
        if let RespValue::Error(message) = raw {
            return Err(ClientError::from_server(&message));
        }
        match self {
            Transform::Identity => Ok(Value::from_resp(raw)),
            Transform::Boolify => boolify(raw),
            Transform::BoolifyOk => boolify_ok(raw),
            Transform::Hashify => hashify(raw),
            Transform::Floatify => floatify(raw),
            Transform::FloatPairs => float_pairs(raw),
            Transform::InfoMap => info_map(raw),
        }
    }
}

/// Selects the transform for an encoded command (`args[0]` is the name).
pub fn transform_for<A: AsRef<[u8]>>(args: &[A]) -> Transform {
    let Some(name) = args.first() else {
        return Transform::Identity;
    };
    let name = name.as_ref().to_ascii_uppercase();

    match name.as_slice() {
        b"SET" if has_flag(args, b"GET") => Transform::Identity,
        b"SET" if has_flag(args, b"NX") || has_flag(args, b"XX") => Transform::BoolifyOk,
        b"SADD" | b"SREM" if args.len() == 3 => Transform::Boolify,
        b"EXISTS" if args.len() == 2 => Transform::Boolify,
        b"SISMEMBER" | b"SMOVE" | b"EXPIRE" | b"PEXPIRE" | b"EXPIREAT" | b"PERSIST" | b"HSETNX"
        | b"SETNX" | b"MSETNX" | b"RENAMENX" | b"MOVE" => Transform::Boolify,
        b"HGETALL" => Transform::Hashify,
        b"CONFIG" if args.get(1).is_some_and(|sub| sub.as_ref().eq_ignore_ascii_case(b"GET")) => {
            Transform::Hashify
        }
        b"ZSCORE" | b"ZINCRBY" | b"INCRBYFLOAT" | b"HINCRBYFLOAT" => Transform::Floatify,
        b"ZRANGE" | b"ZREVRANGE" | b"ZRANGEBYSCORE" | b"ZREVRANGEBYSCORE" if has_flag(args, b"WITHSCORES") => {
            Transform::FloatPairs
        }
        b"INFO" => Transform::InfoMap,
        _ => Transform::Identity,
    }
}

fn has_flag<A: AsRef<[u8]>>(args: &[A], flag: &[u8]) -> bool {
    args[1..].iter().any(|arg| arg.as_ref().eq_ignore_ascii_case(flag))
}

fn decode_error(expected: &'static str, raw: &RespValue) -> ClientError {
    ClientError::Decode {
        expected,
        actual: raw.kind_name(),
    }
}

fn boolify(raw: RespValue) -> ClientResult<Value> {
    match raw {
        RespValue::Integer(value) => Ok(Value::Bool(value != 0)),
        RespValue::Bulk(None) => Ok(Value::Nil),
        other => Err(decode_error("integer", &other)),
    }
}

fn boolify_ok(raw: RespValue) -> ClientResult<Value> {
    match raw {
        RespValue::Bulk(None) | RespValue::NullArray => Ok(Value::Bool(false)),
        ref ok if ok.as_bytes() == Some(&b"OK"[..]) => Ok(Value::Bool(true)),
        other => Err(decode_error("OK or null", &other)),
    }
}

fn hashify(raw: RespValue) -> ClientResult<Value> {
    let RespValue::Array(items) = raw else {
        return Err(decode_error("field/value array", &raw));
    };
    if items.len() % 2 != 0 {
        return Err(ClientError::Decode {
            expected: "field/value array",
            actual: "odd-length array",
        });
    }

    let mut map = HashMap::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        let field = match field.as_bytes() {
            Some(data) => String::from_utf8_lossy(data).into_owned(),
            None => return Err(decode_error("string field", &field)),
        };
        map.insert(field, Value::from_resp(value));
    }
    Ok(Value::Map(map))
}

fn parse_float(raw: &RespValue) -> ClientResult<f64> {
    if let RespValue::Integer(value) = raw {
        return Ok(*value as f64);
    }
    let text = raw
        .as_bytes()
        .and_then(|data| std::str::from_utf8(data).ok())
        .ok_or_else(|| decode_error("float", raw))?;
    match text {
        "inf" | "+inf" => Ok(f64::INFINITY),
        "-inf" => Ok(f64::NEG_INFINITY),
        _ => text.parse::<f64>().map_err(|_| decode_error("float", raw)),
    }
}

fn floatify(raw: RespValue) -> ClientResult<Value> {
    match raw {
        RespValue::Bulk(None) => Ok(Value::Nil),
        other => parse_float(&other).map(Value::Float),
    }
}

fn float_pairs(raw: RespValue) -> ClientResult<Value> {
    let RespValue::Array(items) = raw else {
        return Err(decode_error("member/score array", &raw));
    };
    if items.len() % 2 != 0 {
        return Err(ClientError::Decode {
            expected: "member/score array",
            actual: "odd-length array",
        });
    }

    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(member), Some(score)) = (iter.next(), iter.next()) {
        let score = parse_float(&score)?;
        pairs.push(Value::Array(vec![Value::from_resp(member), Value::Float(score)]));
    }
    Ok(Value::Array(pairs))
}

fn info_map(raw: RespValue) -> ClientResult<Value> {
    let text = match &raw {
        RespValue::Bulk(Some(data)) => String::from_utf8_lossy(data),
        other => return Err(decode_error("info text", other)),
    };

    let map = text
        .lines()
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(field, value)| {
            (
                field.to_string(),
                Value::Bytes(Bytes::copy_from_slice(value.trim_end().as_bytes())),
            )
        })
        .collect();
    Ok(Value::Map(map))
}
