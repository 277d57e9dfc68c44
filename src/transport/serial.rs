//! RS-232 transport backed by the `serialport` crate.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use serialport::SerialPort;
use tracing::debug;

use super::Transport;

/// Default overall read timeout for one reply line.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Serial transport for RS-232 instruments
///
/// Created closed; call [`SerialTransport::connect`] before use.
pub struct SerialTransport {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    baud_rate: u32,

    /// Overall read timeout for one reply
    timeout: Duration,

    /// Appended to every command (e.g., "\n")
    line_terminator: String,

    /// Reply line ending character
    response_delimiter: char,

    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Create a closed transport with default framing.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: DEFAULT_TIMEOUT,
            line_terminator: "\n".to_string(),
            response_delimiter: '\n',
            port: None,
        }
    }

    /// Set the overall reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the string appended to outgoing commands.
    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    /// Set the character that ends a reply.
    pub fn with_response_delimiter(mut self, delimiter: char) -> Self {
        self.response_delimiter = delimiter;
        self
    }

    /// Port name this transport opens.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Configured baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// True once `connect` has succeeded.
    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    /// Open the port.
    pub fn connect(&mut self) -> Result<()> {
        let port = serialport::new(&self.port_name, self.baud_rate)
            // internal poll interval; the overall limit is `timeout`
            .timeout(Duration::from_millis(100))
            .open()
            .with_context(|| {
                format!(
                    "Failed to open serial port '{}' at {} baud",
                    self.port_name, self.baud_rate
                )
            })?;
        self.port = Some(port);
        debug!(port = %self.port_name, baud = self.baud_rate, "serial port opened");
        Ok(())
    }

    /// Close the port. Idempotent.
    pub fn disconnect(&mut self) {
        if self.port.take().is_some() {
            debug!(port = %self.port_name, "serial port closed");
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        let name = &self.port_name;
        self.port
            .as_mut()
            .ok_or_else(|| anyhow!("serial port '{}' is not connected", name))
    }

    fn send_line(&mut self, command: &str) -> Result<()> {
        let line = format!("{}{}", command, self.line_terminator);
        let port = self.port()?;
        port.write_all(line.as_bytes())
            .context("Failed to write to serial port")?;
        port.flush().context("Failed to flush serial port")?;
        debug!(command, "sent serial command");
        Ok(())
    }

    fn read_line(&mut self) -> Result<String> {
        let timeout = self.timeout;
        let delimiter = self.response_delimiter;
        let port = self.port()?;

        let mut response = Vec::new();
        let mut buffer = [0u8; 1];
        let start = Instant::now();
        loop {
            if start.elapsed() > timeout {
                bail!("Serial read timeout after {:?}", timeout);
            }
            match port.read(&mut buffer) {
                Ok(0) => bail!("Unexpected EOF on serial port"),
                Ok(_) => {
                    if buffer[0] as char == delimiter {
                        break;
                    }
                    response.push(buffer[0]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e).context("Serial read error"),
            }
        }

        let response = String::from_utf8_lossy(&response).trim().to_string();
        debug!(response = %response, "received serial response");
        Ok(response)
    }
}

impl Transport for SerialTransport {
    fn query(&mut self, command: &str) -> Result<String> {
        self.send_line(command)?;
        self.read_line()
            .with_context(|| format!("no reply to '{}'", command))
    }

    fn write(&mut self, command: &str) -> Result<()> {
        self.send_line(command)
    }

    fn name(&self) -> &str {
        "serial"
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}
