//! Static description of a subsystem, independent of any device.

use indexmap::IndexMap;

use crate::command::CommandDefinition;

/// Declarative subsystem: ordered commands plus nested subsystems.
#[derive(Debug, Clone, PartialEq)]
pub struct Prototype {
    /// Attachment name, e.g. `source`.
    pub name: String,
    /// Free-form description shown by tooling.
    pub description: String,
    /// Instantiated as a channel collection rather than a single instance.
    pub indexed: bool,
    /// Placeholder name carrying the channel id, defaults to `name`.
    pub index_key: Option<String>,
    /// Default channel count when instantiated without options.
    pub channels: u32,
    /// Number channels from 0 instead of 1.
    pub zero_indexed: bool,
    /// Commands in declaration order.
    pub commands: Vec<CommandDefinition>,
    /// Subsystems attached under every instance of this one.
    pub subsystems: IndexMap<String, Prototype>,
}

impl Prototype {
    /// Non-indexed prototype with no commands.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            indexed: false,
            index_key: None,
            channels: 1,
            zero_indexed: false,
            commands: Vec::new(),
            subsystems: IndexMap::new(),
        }
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Make the prototype indexed with a default channel count.
    pub fn indexed(mut self, channels: u32) -> Self {
        self.indexed = true;
        self.channels = channels;
        self
    }

    /// Number channels from 0.
    pub fn zero_indexed(mut self, zero_indexed: bool) -> Self {
        self.zero_indexed = zero_indexed;
        self
    }

    /// Use a placeholder name other than the prototype name.
    pub fn index_key(mut self, key: impl Into<String>) -> Self {
        self.index_key = Some(key.into());
        self
    }

    /// Append a command.
    pub fn command(mut self, command: CommandDefinition) -> Self {
        self.commands.push(command);
        self
    }

    /// Nest another prototype under this one.
    pub fn subsystem(mut self, prototype: Prototype) -> Self {
        self.subsystems.insert(prototype.name.clone(), prototype);
        self
    }

    /// Placeholder name used for this prototype's channel id.
    pub fn key_name(&self) -> &str {
        self.index_key.as_deref().unwrap_or(&self.name)
    }
}
