//! Converter registry: device string ⇄ application value, one pair per kind.
//!
//! A [`Converter`] holds an optional query function (device reply → [`Value`])
//! and an optional write function ([`Value`] → token placed in the command).
//! Which kinds exist is closed: [`ConverterKind`] is matched exhaustively in
//! [`Converter::from_kind`], so there is no string lookup at build time.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ConversionError, ScpiError, ScpiResult};
use crate::units::{Quantity, Unit};
use crate::value::Value;

/// Device reply → application value.
pub type QueryFn = Arc<dyn Fn(&str) -> Result<Value, ConversionError> + Send + Sync>;

/// Application value → token substituted into the command.
pub type WriteFn = Arc<dyn Fn(&Value) -> Result<String, ConversionError> + Send + Sync>;

/// Target type for numeric converters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericType {
    /// `i64`; float-looking replies are truncated.
    Integer,
    /// `f64`.
    Float,
}

/// Unit declared by a quantity command.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitSpec {
    /// `%` on the wire, plain ratio in the application.
    Percent,
    /// Quantity in a fixed unit.
    Unit(Unit),
}

impl UnitSpec {
    /// Parse `"%"` or a unit symbol.
    pub fn parse(symbol: &str) -> Result<Self, ConversionError> {
        match symbol.trim() {
            "%" => Ok(UnitSpec::Percent),
            other => Ok(UnitSpec::Unit(Unit::parse(other)?)),
        }
    }
}

/// Ordered mapping from application key to device token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChoiceMap(IndexMap<String, String>);

impl ChoiceMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key/token pair, builder style.
    pub fn with(mut self, key: impl Into<String>, token: impl Into<String>) -> Self {
        self.0.insert(key.into(), token.into());
        self
    }

    /// Application keys in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Forward lookup, key → token.
    pub fn token(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Inverse lookup, token → key. Exact match first, then ASCII
    /// case-insensitive since instruments may echo mnemonics in any case.
    pub fn key_for(&self, token: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(_, t)| t.as_str() == token)
            .or_else(|| self.0.iter().find(|(_, t)| t.eq_ignore_ascii_case(token)))
            .map(|(k, _)| k.as_str())
    }

    /// Keep only the listed keys, in the order of `keys`.
    pub fn subset<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> ScpiResult<ChoiceMap> {
        let mut out = ChoiceMap::new();
        for key in keys {
            let token = self
                .token(key)
                .ok_or_else(|| ScpiError::spec(format!("choice '{}' is not in the choice map", key)))?;
            out.0.insert(key.to_string(), token.to_string());
        }
        Ok(out)
    }

    /// Number of choices.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when there are no choices.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn valid_keys(&self) -> String {
        self.keys().collect::<Vec<_>>().join(", ")
    }
}

impl FromIterator<(String, String)> for ChoiceMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        ChoiceMap(iter.into_iter().collect())
    }
}

/// Closed set of converter kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum ConverterKind {
    /// `1`/`0` integers.
    Boolean,
    /// Integer or float.
    Numeric(NumericType),
    /// Quantity in a fixed unit, or a percent ratio.
    Quantity(UnitSpec),
    /// Enumerated keys mapped to device tokens.
    Choice(ChoiceMap),
    /// `<code>,"<message>"` error-queue entries. Query only.
    Error,
}

/// Query/write function pair for one command.
#[derive(Clone)]
pub struct Converter {
    kind: ConverterKind,
    query: Option<QueryFn>,
    write: Option<WriteFn>,
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("kind", &self.kind)
            .field("query", &self.query.is_some())
            .field("write", &self.write.is_some())
            .finish()
    }
}

impl Converter {
    /// Build the converter for a kind.
    pub fn from_kind(kind: &ConverterKind) -> Converter {
        match kind {
            ConverterKind::Boolean => boolean(),
            ConverterKind::Numeric(dtype) => numeric(*dtype),
            ConverterKind::Quantity(unit) => quantity(unit.clone()),
            ConverterKind::Choice(map) => choice(map.clone()),
            ConverterKind::Error => error(),
        }
    }

    /// Drop the directions that were not requested.
    pub fn restrict(mut self, can_query: bool, can_write: bool) -> Converter {
        if !can_query {
            self.query = None;
        }
        if !can_write {
            self.write = None;
        }
        self
    }

    /// The kind this converter was built from.
    pub fn kind(&self) -> &ConverterKind {
        &self.kind
    }

    /// Query direction, if supported.
    pub fn query(&self) -> Option<&QueryFn> {
        self.query.as_ref()
    }

    /// Write direction, if supported.
    pub fn write(&self) -> Option<&WriteFn> {
        self.write.as_ref()
    }

    /// Ordered application keys for choice converters.
    pub fn choices(&self) -> Option<Vec<String>> {
        match &self.kind {
            ConverterKind::Choice(map) => Some(map.keys().map(str::to_string).collect()),
            _ => None,
        }
    }
}

// 2^63; every float in [-2^63, 2^63) fits an i64
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

fn parse_int(input: &str) -> Result<i64, ConversionError> {
    let trimmed = input.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Ok(i);
    }
    trimmed
        .parse::<f64>()
        .ok()
        .map(f64::trunc)
        .filter(|f| (-I64_BOUND..I64_BOUND).contains(f))
        .map(|f| f as i64)
        .ok_or_else(|| ConversionError::parse(input, "an integer"))
}

fn parse_float(input: &str) -> Result<f64, ConversionError> {
    input
        .trim()
        .parse::<f64>()
        .map_err(|_| ConversionError::parse(input, "a number"))
}

fn query_fn(
    f: impl Fn(&str) -> Result<Value, ConversionError> + Send + Sync + 'static,
) -> Option<QueryFn> {
    Some(Arc::new(f))
}

fn write_fn(
    f: impl Fn(&Value) -> Result<String, ConversionError> + Send + Sync + 'static,
) -> Option<WriteFn> {
    Some(Arc::new(f))
}

/// Boolean converter: non-zero integer reply is `true`; writes `1`/`0`.
pub fn boolean() -> Converter {
    Converter {
        kind: ConverterKind::Boolean,
        query: query_fn(|reply| Ok(Value::Bool(parse_int(reply)? != 0))),
        write: write_fn(|value| Ok(if value.is_truthy() { "1" } else { "0" }.to_string())),
    }
}

/// Numeric converter: parse into `dtype`; writes pass the value through.
pub fn numeric(dtype: NumericType) -> Converter {
    let query = match dtype {
        NumericType::Integer => query_fn(|reply| Ok(Value::Int(parse_int(reply)?))),
        NumericType::Float => query_fn(|reply| Ok(Value::Float(parse_float(reply)?))),
    };
    Converter {
        kind: ConverterKind::Numeric(dtype),
        query,
        write: write_fn(|value| Ok(value.to_string())),
    }
}

/// Quantity converter in a fixed unit, or a bare percent ratio.
pub fn quantity(unit: UnitSpec) -> Converter {
    let kind = ConverterKind::Quantity(unit.clone());
    match unit {
        UnitSpec::Percent => Converter {
            kind,
            query: query_fn(|reply| Ok(Value::Float(parse_float(reply)? / 100.0))),
            write: write_fn(|value| {
                let ratio = value
                    .as_f64()
                    .ok_or_else(|| ConversionError::parse(&value.to_string(), "a ratio"))?;
                Ok(Value::Float(ratio * 100.0).to_string())
            }),
        },
        UnitSpec::Unit(unit) => {
            let query_unit = unit.clone();
            Converter {
                kind,
                query: query_fn(move |reply| {
                    Ok(Value::Quantity(Quantity::new(
                        parse_float(reply)?,
                        query_unit.clone(),
                    )))
                }),
                write: write_fn(move |value| match value {
                    Value::Quantity(q) => Ok(Value::Float(q.to(&unit)?.magnitude()).to_string()),
                    _ => Err(ConversionError::UnitMismatch {
                        expected: unit.dimension(),
                        found: None,
                    }),
                }),
            }
        }
    }
}

/// Choice converter: key → token on write, token → key on query.
pub fn choice(map: ChoiceMap) -> Converter {
    let query_map = Arc::new(map);
    let write_map = Arc::clone(&query_map);
    Converter {
        kind: ConverterKind::Choice((*query_map).clone()),
        query: query_fn(move |reply| {
            let token = reply.trim();
            query_map
                .key_for(token)
                .map(|key| Value::Text(key.to_string()))
                .ok_or_else(|| ConversionError::ChoiceLookup {
                    value: token.to_string(),
                    valid: query_map.valid_keys(),
                })
        }),
        write: write_fn(move |value| {
            let key = value.to_string();
            match write_map.token(&key) {
                Some(token) => Ok(token.to_string()),
                None => Err(ConversionError::ChoiceLookup {
                    valid: write_map.valid_keys(),
                    value: key,
                }),
            }
        }),
    }
}

#[allow(clippy::expect_used)]
static ERROR_REPLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([+-]?\d+)\s*,(.*)$").expect("error reply pattern is valid"));

/// Error-queue converter: `+0,"No Error"` → `ErrorReport { 0, "No Error" }`.
pub fn error() -> Converter {
    Converter {
        kind: ConverterKind::Error,
        query: query_fn(|reply| {
            let caps = ERROR_REPLY
                .captures(reply.trim())
                .ok_or_else(|| ConversionError::parse(reply, "an error report"))?;
            let code = caps[1]
                .parse::<i64>()
                .map_err(|_| ConversionError::parse(reply, "an error report"))?;
            let quoted = caps[2].trim();
            let message = quoted.strip_prefix('"').unwrap_or(quoted);
            let message = message.strip_suffix('"').unwrap_or(message);
            Ok(Value::ErrorReport {
                code,
                message: message.to_string(),
            })
        }),
        write: None,
    }
}
