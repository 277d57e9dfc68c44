//! Transport implementations
//!
//! The core only needs two blocking operations from the link to an
//! instrument: send a line and read one reply line, or send a line without a
//! reply. Connection management, terminators and timeouts live here, not in
//! the subsystem engine.
//!
//! A transport carries at most one command in flight. Nothing here locks;
//! callers sharing one transport across threads must serialise access.

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;

pub use mock::MockTransport;
#[cfg(feature = "instrument_serial")]
pub use serial::SerialTransport;

use anyhow::{bail, Result};

use crate::config::TransportSettings;

/// Line-oriented request/response link to one instrument.
pub trait Transport: Send {
    /// Send `command` and return the reply line, without terminator.
    fn query(&mut self, command: &str) -> Result<String>;

    /// Send `command` without waiting for a reply.
    fn write(&mut self, command: &str) -> Result<()>;

    /// Short name for logs, e.g. `"serial"`.
    fn name(&self) -> &str;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn query(&mut self, command: &str) -> Result<String> {
        (**self).query(command)
    }

    fn write(&mut self, command: &str) -> Result<()> {
        (**self).write(command)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Open the transport described by `settings`.
///
/// The mock transport is pre-loaded with the configured replies. The serial
/// transport is connected before it is returned.
pub fn open(settings: &TransportSettings) -> Result<Box<dyn Transport>> {
    match settings.kind.as_str() {
        "mock" => {
            let mock = MockTransport::new();
            for (command, reply) in &settings.replies {
                mock.set_reply(command.as_str(), reply.as_str());
            }
            Ok(Box::new(mock))
        }
        #[cfg(feature = "instrument_serial")]
        "serial" => {
            use anyhow::Context;

            let port = settings
                .port
                .as_deref()
                .context("serial transport needs a port")?;
            let mut transport = SerialTransport::new(port, settings.baud_rate)
                .with_timeout(std::time::Duration::from_millis(settings.timeout_ms))
                .with_line_terminator(settings.line_terminator.as_str());
            transport.connect()?;
            Ok(Box::new(transport))
        }
        other => bail!("transport '{}' is not available in this build", other),
    }
}
