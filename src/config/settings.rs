//! `scpictl` settings loaded with figment.
//!
//! Sources, lowest precedence first:
//! 1. `config/scpictl.toml` (or the file passed to [`Settings::load_from`])
//! 2. environment variables prefixed with `SCPI_`, nested with `__`
//!
//! ```text
//! SCPI_APPLICATION__LOG_LEVEL=debug
//! SCPI_TRANSPORT__PORT=/dev/ttyUSB1
//! ```
//!
//! Every section has defaults, so a missing file yields a mock-transport
//! setup with no mounts.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::device::{Device, InstanceOptions, Target};
use crate::error::ScpiResult;
use crate::subsystem::{load_definitions, Definitions};

/// Default settings file, relative to the working directory.
pub const DEFAULT_SETTINGS_PATH: &str = "config/scpictl.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationSettings,
    /// How to reach the instrument
    #[serde(default)]
    pub transport: TransportSettings,
    /// Which definition files describe the instrument
    #[serde(default)]
    pub device: DeviceSettings,
    /// Prototypes to attach on the device, in order
    #[serde(default)]
    pub mounts: Vec<MountSettings>,
}

/// Application-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Transport kind and parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    /// `serial` or `mock`
    #[serde(default = "default_transport_kind")]
    pub kind: String,
    /// Serial port (e.g., "/dev/ttyUSB0")
    #[serde(default)]
    pub port: Option<String>,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Reply timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Appended to every command
    #[serde(default = "default_line_terminator")]
    pub line_terminator: String,
    /// Scripted replies for the mock transport, command → reply
    #[serde(default)]
    pub replies: IndexMap<String, String>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            kind: default_transport_kind(),
            port: None,
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            line_terminator: default_line_terminator(),
            replies: IndexMap::new(),
        }
    }
}

/// Definition files for the instrument.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// TOML or JSON prototype files, merged in order
    #[serde(default)]
    pub definitions: Vec<PathBuf>,
}

/// One prototype attached on the device at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountSettings {
    /// Prototype name in the definition files
    pub prototype: String,
    /// Channel count override
    #[serde(default)]
    pub channels: Option<u32>,
    /// Numbering base override
    #[serde(default)]
    pub zero_indexed: Option<bool>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_transport_kind() -> String {
    "mock".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_line_terminator() -> String {
    "\n".to_string()
}

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_TRANSPORTS: [&str; 2] = ["serial", "mock"];

impl Settings {
    /// Load from [`DEFAULT_SETTINGS_PATH`] and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_SETTINGS_PATH)
    }

    /// Load from `path` and the environment, then validate.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SCPI_").split("__"))
            .extract()
            .map_err(ConfigError::LoadError)?;

        settings.validate()?;
        debug!(path = %path.as_ref().display(), mounts = settings.mounts.len(), "settings loaded");
        Ok(settings)
    }

    /// Check field values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        let transport = &self.transport;
        if !VALID_TRANSPORTS.contains(&transport.kind.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid transport kind '{}'. Must be one of: {}",
                transport.kind,
                VALID_TRANSPORTS.join(", ")
            )));
        }
        if transport.kind == "serial" {
            if transport.port.as_deref().map_or(true, |p| p.trim().is_empty()) {
                return Err(ConfigError::ValidationError(
                    "Serial transport: 'port' cannot be empty".to_string(),
                ));
            }
            if transport.baud_rate == 0 {
                return Err(ConfigError::ValidationError(
                    "Serial transport: 'baud_rate' must be > 0".to_string(),
                ));
            }
        }
        if transport.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Transport 'timeout_ms' must be > 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for mount in &self.mounts {
            if !seen.insert(mount.prototype.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate mount: '{}'",
                    mount.prototype
                )));
            }
            if mount.channels == Some(0) {
                return Err(ConfigError::ValidationError(format!(
                    "Mount '{}': 'channels' must be > 0",
                    mount.prototype
                )));
            }
        }

        Ok(())
    }

    /// Load and merge every configured definition file.
    pub fn load_definitions(&self) -> ScpiResult<Definitions> {
        let mut definitions = Definitions::default();
        for path in &self.device.definitions {
            definitions.extend(load_definitions(path)?);
        }
        Ok(definitions)
    }

    /// Build and attach every configured mount on `device`.
    pub fn mount_all(&self, device: &mut Device, definitions: &Definitions) -> ScpiResult<()> {
        for mount in &self.mounts {
            let template = definitions.build(&mount.prototype)?;
            let options = InstanceOptions {
                num_channels: mount.channels,
                zero_indexed: mount.zero_indexed,
            };
            device.attach(Target::Device, &template, options)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    // load_from reads SCPI_* variables; every test calling it runs in a jail.

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_| {
            let settings = Settings::load_from("does/not/exist.toml").unwrap();
            assert_eq!(settings.application.log_level, "info");
            assert_eq!(settings.transport.kind, "mock");
            assert!(settings.mounts.is_empty());
            Ok(())
        });
    }

    #[test]
    fn test_load_from_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "scpictl.toml",
                r#"
                [application]
                log_level = "debug"

                [transport]
                kind = "serial"
                port = "/dev/ttyUSB0"
                baud_rate = 19200

                [[mounts]]
                prototype = "source"
                channels = 2
                "#,
            )?;
            let settings = Settings::load_from("scpictl.toml").unwrap();
            assert_eq!(settings.application.log_level, "debug");
            assert_eq!(settings.transport.port.as_deref(), Some("/dev/ttyUSB0"));
            assert_eq!(settings.transport.baud_rate, 19200);
            assert_eq!(settings.mounts[0].channels, Some(2));
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_nested_fields() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "scpictl.toml",
                r#"
                [application]
                log_level = "warn"

                [transport]
                kind = "serial"
                port = "/dev/ttyUSB0"
                "#,
            )?;
            jail.set_env("SCPI_APPLICATION__LOG_LEVEL", "debug");
            jail.set_env("SCPI_TRANSPORT__PORT", "/dev/ttyS3");

            let settings = Settings::load_from("scpictl.toml").unwrap();
            assert_eq!(settings.application.log_level, "debug");
            assert_eq!(settings.transport.kind, "serial");
            assert_eq!(settings.transport.port.as_deref(), Some("/dev/ttyS3"));
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_are_validated() {
        Jail::expect_with(|jail| {
            jail.create_file("scpictl.toml", "[application]\nlog_level = \"info\"\n")?;
            jail.set_env("SCPI_APPLICATION__LOG_LEVEL", "chatty");
            let err = Settings::load_from("scpictl.toml").unwrap_err();
            assert!(matches!(err, ConfigError::ValidationError(_)));
            assert!(err.to_string().contains("chatty"));

            jail.set_env("SCPI_APPLICATION__LOG_LEVEL", "trace");
            jail.set_env("SCPI_TRANSPORT__KIND", "serial");
            let err = Settings::load_from("scpictl.toml").unwrap_err();
            assert!(err.to_string().contains("'port' cannot be empty"));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".to_string();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_serial_needs_port() {
        let mut settings = Settings::default();
        settings.transport.kind = "serial".to_string();
        assert!(settings.validate().is_err());
        settings.transport.port = Some("COM3".to_string());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_duplicate_mounts_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "scpictl.toml",
                r#"
                [[mounts]]
                prototype = "source"

                [[mounts]]
                prototype = "source"
                "#,
            )?;
            let err = Settings::load_from("scpictl.toml").unwrap_err();
            assert!(err.to_string().contains("Duplicate mount"));
            Ok(())
        });
    }

    #[test]
    fn test_zero_channel_mount_rejected() {
        let mut settings = Settings::default();
        settings.mounts.push(MountSettings {
            prototype: "source".to_string(),
            channels: Some(0),
            zero_indexed: None,
        });
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_unknown_transport_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("scpictl.toml", "[transport]\nkind = \"gpib\"\n")?;
            assert!(Settings::load_from("scpictl.toml").is_err());
            Ok(())
        });
    }
}
