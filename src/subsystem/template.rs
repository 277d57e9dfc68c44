//! Compiled, immutable subsystem definitions.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::info;

use crate::command::{self, Accessor, AccessorTable};
use crate::error::{ScpiError, ScpiResult};

use super::prototype::Prototype;

/// A prototype compiled into an accessor table.
///
/// Built once and shared (`Arc`) by every instance and every device it is
/// attached to.
#[derive(Debug)]
pub struct SubsystemTemplate {
    name: String,
    description: String,
    indexed: bool,
    index_key: String,
    channels: u32,
    zero_indexed: bool,
    accessors: AccessorTable,
    nested: IndexMap<String, Arc<SubsystemTemplate>>,
}

impl SubsystemTemplate {
    /// Compile `prototype` and all of its nested prototypes.
    ///
    /// # Errors
    ///
    /// `Specification` for empty or duplicate command names, accessor name
    /// clashes, an indexed prototype with zero channels, or a nested
    /// prototype whose index key collides with an ancestor's.
    pub fn build(prototype: &Prototype) -> ScpiResult<Arc<SubsystemTemplate>> {
        let template = Self::build_with_ancestors(prototype, &mut Vec::new())?;
        info!(
            subsystem = %template.name,
            accessors = template.accessors.len(),
            nested = template.nested.len(),
            "built subsystem template"
        );
        Ok(template)
    }

    fn build_with_ancestors(
        prototype: &Prototype,
        ancestor_keys: &mut Vec<String>,
    ) -> ScpiResult<Arc<SubsystemTemplate>> {
        if prototype.name.trim().is_empty() {
            return Err(ScpiError::spec("prototype name must not be empty"));
        }
        if prototype.indexed && prototype.channels == 0 {
            return Err(ScpiError::spec(format!(
                "indexed subsystem '{}' needs at least one channel",
                prototype.name
            )));
        }

        let mut accessors = AccessorTable::new();
        let mut seen = std::collections::HashSet::new();
        for cmd in &prototype.commands {
            if cmd.name.trim().is_empty() {
                return Err(ScpiError::spec(format!(
                    "subsystem '{}' has a command without a name",
                    prototype.name
                )));
            }
            if !seen.insert(cmd.name.as_str()) {
                return Err(ScpiError::spec(format!(
                    "duplicate command '{}' in subsystem '{}'",
                    cmd.name, prototype.name
                )));
            }
            command::compile(cmd, &mut accessors)?;
        }

        let index_key = prototype.key_name().to_string();
        let pushed = prototype.indexed;
        if pushed {
            if ancestor_keys.contains(&index_key) {
                return Err(ScpiError::spec(format!(
                    "index key '{}' of subsystem '{}' is already used by an ancestor",
                    index_key, prototype.name
                )));
            }
            ancestor_keys.push(index_key.clone());
        }

        let nested = prototype
            .subsystems
            .iter()
            .map(|(name, child)| {
                Self::build_with_ancestors(child, ancestor_keys).map(|t| (name.clone(), t))
            })
            .collect::<ScpiResult<IndexMap<_, _>>>();
        if pushed {
            ancestor_keys.pop();
        }
        let nested = nested?;

        Ok(Arc::new(SubsystemTemplate {
            name: prototype.name.clone(),
            description: prototype.description.clone(),
            indexed: prototype.indexed,
            index_key,
            channels: prototype.channels,
            zero_indexed: prototype.zero_indexed,
            accessors,
            nested,
        }))
    }

    /// Attachment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description from the prototype.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// True if instances form a channel collection.
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    /// Placeholder name carrying the channel id.
    pub fn index_key(&self) -> &str {
        &self.index_key
    }

    /// Default channel count.
    pub fn default_channels(&self) -> u32 {
        self.channels
    }

    /// Default numbering base.
    pub fn zero_indexed(&self) -> bool {
        self.zero_indexed
    }

    /// Look up an accessor by name.
    pub fn accessor(&self, name: &str) -> Option<&Accessor> {
        self.accessors.get(name)
    }

    /// All accessors in declaration order.
    pub fn accessors(&self) -> impl Iterator<Item = &Accessor> {
        self.accessors.values()
    }

    /// Accessor names in declaration order.
    pub fn accessor_names(&self) -> Vec<&str> {
        self.accessors.keys().map(String::as_str).collect()
    }

    /// Nested templates, attached automatically under each instance.
    pub fn nested(&self) -> impl Iterator<Item = &Arc<SubsystemTemplate>> {
        self.nested.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandDefinition;
    use crate::converter::{ConverterKind, NumericType};

    fn cmd(name: &str) -> CommandDefinition {
        CommandDefinition::new(name, name, ConverterKind::Numeric(NumericType::Float))
    }

    #[test]
    fn test_build_collects_accessors_in_order() {
        let proto = Prototype::new("output")
            .command(cmd("voltage"))
            .command(cmd("current").can_write(false));
        let template = SubsystemTemplate::build(&proto).unwrap();
        assert_eq!(template.accessor_names(), vec!["voltage", "get_current"]);
        assert_eq!(template.index_key(), "output");
        assert!(!template.is_indexed());
    }

    #[test]
    fn test_duplicate_command_rejected() {
        let proto = Prototype::new("output").command(cmd("voltage")).command(cmd("voltage"));
        let err = SubsystemTemplate::build(&proto).unwrap_err();
        assert!(err.to_string().contains("duplicate command 'voltage'"));
    }

    #[test]
    fn test_zero_channels_rejected() {
        let proto = Prototype::new("source").indexed(0);
        assert!(matches!(
            SubsystemTemplate::build(&proto),
            Err(ScpiError::Specification(_))
        ));
    }

    #[test]
    fn test_nested_index_keys_must_differ() {
        let proto = Prototype::new("source")
            .indexed(2)
            .subsystem(Prototype::new("source").indexed(2));
        assert!(SubsystemTemplate::build(&proto).is_err());

        let proto = Prototype::new("source")
            .indexed(2)
            .subsystem(Prototype::new("source").indexed(2).index_key("sub"));
        let template = SubsystemTemplate::build(&proto).unwrap();
        let nested: Vec<_> = template.nested().map(|t| t.index_key().to_string()).collect();
        assert_eq!(nested, vec!["sub"]);
    }
}
