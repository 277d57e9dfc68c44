//! Application-side values exchanged with accessors.

use std::fmt;

use crate::units::Quantity;

/// A value on the application side of a converter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean state (`1`/`0` on the wire).
    Bool(bool),
    /// Integer number.
    Int(i64),
    /// Floating point number or bare ratio.
    Float(f64),
    /// Magnitude with a unit.
    Quantity(Quantity),
    /// Free text, also used for choice keys.
    Text(String),
    /// Entry from the device error queue.
    ErrorReport {
        /// Numeric error code, `0` means no error.
        code: i64,
        /// Message reported alongside the code.
        message: String,
    },
}

impl Value {
    /// Truthiness used by boolean writes.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Quantity(q) => q.magnitude() != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::ErrorReport { code, .. } => *code != 0,
        }
    }

    /// Parse a literal typed by a person (CLI, scripts).
    ///
    /// Tries, in order: `true`/`false`, integer, float, `"<number> <unit>"`,
    /// and falls back to text.
    pub fn parse_literal(text: &str) -> Value {
        let text = text.trim();
        let word = |w: &str| text.eq_ignore_ascii_case(w);
        if word("true") || word("on") {
            return Value::Bool(true);
        }
        if word("false") || word("off") {
            return Value::Bool(false);
        }
        // "inf" and "nan" parse as floats; keep them as text
        let numeric = text
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.'));
        if !numeric {
            return Value::Text(text.to_string());
        }
        if let Ok(i) = text.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(f) = text.parse::<f64>() {
            return Value::Float(f);
        }
        if let Ok(q) = Quantity::parse(text) {
            return Value::Quantity(q);
        }
        Value::Text(text.to_string())
    }

    /// Borrow the quantity, if this is one.
    pub fn as_quantity(&self) -> Option<&Quantity> {
        match self {
            Value::Quantity(q) => Some(q),
            _ => None,
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Borrow the text, if this is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Quantity(q) => write!(f, "{}", q),
            Value::Text(s) => f.write_str(s),
            Value::ErrorReport { code, message } => write!(f, "{},\"{}\"", code, message),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Quantity> for Value {
    fn from(q: Quantity) -> Self {
        Value::Quantity(q)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}
