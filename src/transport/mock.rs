//! Mock transport for testing
//!
//! Simulates an instrument without hardware:
//! - Scripted replies, per command or queued
//! - Controllable failure injection
//! - Call logging for test verification
//!
//! Clones share state, so a test can keep one handle while the device owns
//! the other.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};

use super::Transport;

#[derive(Default)]
struct Script {
    replies: HashMap<String, String>,
    queued: VecDeque<String>,
    default_reply: Option<String>,
    call_log: Vec<Call>,
}

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `query(command)`.
    Query(String),
    /// `write(command)`.
    Write(String),
}

impl Call {
    /// The command text, whatever the kind of call.
    pub fn command(&self) -> &str {
        match self {
            Call::Query(c) | Call::Write(c) => c,
        }
    }
}

/// Mock transport
///
/// # Example
///
/// ```
/// use scpi_subsystem::transport::{MockTransport, Transport};
///
/// let mock = MockTransport::new().with_reply("*IDN?", "ACME,X1,42,1.0");
/// let mut link = mock.clone();
/// assert_eq!(link.query("*IDN?").unwrap(), "ACME,X1,42,1.0");
/// assert_eq!(mock.queries(), vec!["*IDN?"]);
/// ```
#[derive(Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<Script>>,
    should_fail_next: Arc<AtomicBool>,
}

impl MockTransport {
    /// Create a mock that answers every query with an error until scripted.
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        // a panicking test thread must not hide the log from the others
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reply `reply` whenever `command` is queried.
    pub fn with_reply(self, command: impl Into<String>, reply: impl Into<String>) -> Self {
        self.set_reply(command, reply);
        self
    }

    /// Reply `reply` to queries with no specific script.
    pub fn with_default_reply(self, reply: impl Into<String>) -> Self {
        self.script().default_reply = Some(reply.into());
        self
    }

    /// Script the reply for `command`.
    pub fn set_reply(&self, command: impl Into<String>, reply: impl Into<String>) {
        self.script().replies.insert(command.into(), reply.into());
    }

    /// Queue a one-shot reply, consumed by the next query before any
    /// per-command script.
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.script().queued.push_back(reply.into());
    }

    /// Inject a failure for the next operation
    pub fn inject_next_failure(&self) {
        self.should_fail_next.store(true, Ordering::SeqCst);
    }

    fn check_failure(&self) -> bool {
        self.should_fail_next.swap(false, Ordering::SeqCst)
    }

    /// Get the call log
    pub fn call_log(&self) -> Vec<Call> {
        self.script().call_log.clone()
    }

    /// Commands sent through `write`, in order.
    pub fn writes(&self) -> Vec<String> {
        self.call_log()
            .into_iter()
            .filter_map(|c| match c {
                Call::Write(cmd) => Some(cmd),
                Call::Query(_) => None,
            })
            .collect()
    }

    /// Commands sent through `query`, in order.
    pub fn queries(&self) -> Vec<String> {
        self.call_log()
            .into_iter()
            .filter_map(|c| match c {
                Call::Query(cmd) => Some(cmd),
                Call::Write(_) => None,
            })
            .collect()
    }

    /// Most recent command of either kind.
    pub fn last_command(&self) -> Option<String> {
        self.script().call_log.last().map(|c| c.command().to_string())
    }

    /// Clear the call log
    pub fn clear_log(&self) {
        self.script().call_log.clear();
    }
}

impl Transport for MockTransport {
    fn query(&mut self, command: &str) -> Result<String> {
        let mut script = self.script();
        script.call_log.push(Call::Query(command.to_string()));
        if self.check_failure() {
            return Err(anyhow!("Injected failure"));
        }
        if let Some(reply) = script.queued.pop_front() {
            return Ok(reply);
        }
        script
            .replies
            .get(command)
            .or(script.default_reply.as_ref())
            .cloned()
            .ok_or_else(|| anyhow!("no scripted reply for '{}'", command))
    }

    fn write(&mut self, command: &str) -> Result<()> {
        self.script().call_log.push(Call::Write(command.to_string()));
        if self.check_failure() {
            return Err(anyhow!("Injected failure"));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
