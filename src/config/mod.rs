//! Configuration for the `scpictl` front end.

pub mod settings;

pub use settings::{
    ApplicationSettings, ConfigError, DeviceSettings, MountSettings, Settings,
    TransportSettings, DEFAULT_SETTINGS_PATH,
};
