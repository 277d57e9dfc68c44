//! Declarative SCPI subsystems.
//!
//! Instrument drivers describe their commands as data: a name, a device
//! command template, a value converter and optional read/write permissions
//! and keyword variants. This crate compiles those descriptions into
//! [`SubsystemTemplate`]s with typed accessors, instantiates them on a
//! [`Device`] (optionally repeated across channels and nested with index
//! propagation), and translates between application [`Value`]s and the
//! strings a device expects.
//!
//! ```
//! use scpi_subsystem::command::CommandDefinition;
//! use scpi_subsystem::converter::{ConverterKind, UnitSpec};
//! use scpi_subsystem::transport::MockTransport;
//! use scpi_subsystem::units::Quantity;
//! use scpi_subsystem::{Device, Prototype, SubsystemTemplate};
//!
//! let source = SubsystemTemplate::build(
//!     &Prototype::new("source").indexed(2).command(CommandDefinition::new(
//!         "frequency",
//!         "source{source}:frequency",
//!         ConverterKind::Quantity(UnitSpec::parse("Hz").unwrap()),
//!     )),
//! )
//! .unwrap();
//!
//! let mock = MockTransport::new();
//! let mut device = Device::new(mock.clone());
//! let ch2 = device.mount(&source).unwrap().channel(2).unwrap();
//! device
//!     .write(ch2, "frequency", Quantity::parse("100 mHz").unwrap())
//!     .unwrap();
//! assert_eq!(mock.writes(), vec!["source2:frequency 0.1"]);
//! ```

pub mod command;
pub mod config;
pub mod converter;
pub mod device;
pub mod error;
pub mod subsystem;
pub mod transport;
pub mod units;
pub mod value;

pub use device::{Attachment, ChannelCollection, Device, InstanceOptions, SubsystemId, Target};
pub use error::{ConversionError, ScpiError, ScpiResult};
pub use subsystem::{Prototype, SubsystemTemplate};
pub use transport::Transport;
pub use value::Value;
