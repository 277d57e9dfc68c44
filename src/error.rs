//! Error types for the subsystem compiler.
//!
//! `ScpiError` is the single error type surfaced by every accessor and build
//! step. It is built with `thiserror` and groups failures by the stage where
//! they happen:
//!
//! - **`Specification`**: a malformed prototype (duplicate names, bad channel
//!   configuration, unknown converter kind in a definition file). Fatal at
//!   build time.
//! - **`Substitution`**: a command template placeholder has no key at dispatch
//!   time. The command is never sent.
//! - **`Conversion`**: wraps [`ConversionError`], raised by converters while
//!   translating between device strings and application values.
//! - **`NotSupported`**: the accessor does not exist or was not compiled for
//!   the requested direction. Always a programming error.
//! - **`ParentLifetime`**: the instance, or one of its ancestors, has been
//!   torn down.
//! - **`Transport`**: whatever the transport reported, propagated untouched.
//! - **`Io`**: reading a definition file failed.
//!
//! Nothing in the core retries. Retry policy belongs to the transport or to
//! the driver layer on top.

use thiserror::Error;

use crate::units::Dimension;

/// Convenience alias for results using the crate error type.
pub type ScpiResult<T> = std::result::Result<T, ScpiError>;

/// Top-level error for building and driving subsystems.
#[derive(Error, Debug)]
pub enum ScpiError {
    #[error("Specification error: {0}")]
    Specification(String),

    #[error("Cannot fill command '{command}': {detail}")]
    Substitution { command: String, detail: String },

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("'{accessor}' does not support {operation}")]
    NotSupported {
        accessor: String,
        operation: &'static str,
    },

    #[error("Parent lifetime error: {0}")]
    ParentLifetime(String),

    #[error("Channel {channel} not found in '{subsystem}'")]
    ChannelNotFound { subsystem: String, channel: u32 },

    #[error("No subsystem named '{0}'")]
    SubsystemNotFound(String),

    #[error("Transport error: {0:#}")]
    Transport(anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScpiError {
    pub(crate) fn spec(msg: impl Into<String>) -> Self {
        ScpiError::Specification(msg.into())
    }

    pub(crate) fn not_supported(accessor: &str, operation: &'static str) -> Self {
        ScpiError::NotSupported {
            accessor: accessor.to_string(),
            operation,
        }
    }
}

/// Failures while translating between device strings and application values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    /// Quantity write with the wrong dimension, or with no units at all.
    #[error("Unit mismatch: expected {expected}, got {}", describe_found(.found))]
    UnitMismatch {
        expected: Dimension,
        found: Option<Dimension>,
    },

    /// Unknown application key (write) or unknown device token (query).
    #[error("'{value}' is not a valid choice (valid: {valid})")]
    ChoiceLookup { value: String, valid: String },

    /// The input does not match the converter's grammar.
    #[error("Cannot parse '{input}' as {expected}")]
    Parse {
        input: String,
        expected: &'static str,
    },
}

impl ConversionError {
    /// True when a bare number was given where a quantity was required.
    pub fn is_missing_units(&self) -> bool {
        matches!(self, ConversionError::UnitMismatch { found: None, .. })
    }

    pub(crate) fn parse(input: &str, expected: &'static str) -> Self {
        ConversionError::Parse {
            input: input.to_string(),
            expected,
        }
    }
}

fn describe_found(found: &Option<Dimension>) -> String {
    match found {
        Some(dim) => dim.to_string(),
        None => "a value without units".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScpiError::spec("duplicate command 'frequency'");
        assert_eq!(
            err.to_string(),
            "Specification error: duplicate command 'frequency'"
        );
    }

    #[test]
    fn test_missing_units_message() {
        let err = ConversionError::UnitMismatch {
            expected: Dimension::Frequency,
            found: None,
        };
        assert!(err.is_missing_units());
        assert_eq!(
            err.to_string(),
            "Unit mismatch: expected frequency, got a value without units"
        );
    }

    #[test]
    fn test_conversion_is_transparent() {
        let err: ScpiError = ConversionError::parse("abc", "an integer").into();
        assert_eq!(err.to_string(), "Cannot parse 'abc' as an integer");
    }

    #[test]
    fn test_transport_error_keeps_context() {
        let inner = anyhow::anyhow!("port closed").context("query failed");
        let err = ScpiError::Transport(inner);
        assert_eq!(err.to_string(), "Transport error: query failed: port closed");
    }
}
