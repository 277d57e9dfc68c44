//! Subsystem builder: prototypes, compiled templates, definition files.
//!
//! A [`Prototype`] is plain data. [`SubsystemTemplate::build`] runs the
//! command compiler over every command (recursively for nested prototypes)
//! and produces an immutable, shareable template. Instances are created by
//! [`crate::device::Device::attach`].

pub mod loader;
pub mod prototype;
pub mod template;

pub use loader::{load_definitions, parse_definitions, DefinitionFormat, Definitions};
pub use prototype::Prototype;
pub use template::SubsystemTemplate;
