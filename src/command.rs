//! Command compiler: one command definition → its accessor table entries.
//!
//! | can_query | can_write | exposed accessor            |
//! |-----------|-----------|-----------------------------|
//! | yes       | yes       | property `name`             |
//! | yes       | no        | `get_<name>`                |
//! | no        | yes       | `set_<name>`                |
//! | no        | no        | bare action `name`          |
//!
//! A direction only counts when it is both requested and supported by the
//! converter. Query keywords add `<name>_<kw>` readers, write keywords add
//! `<name>_to_<kw>` presets, and choice converters add `<name>_choices`.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use tracing::trace;

use crate::converter::{Converter, ConverterKind};
use crate::error::{ScpiError, ScpiResult};

/// Ordered, de-duplicated keyword list.
pub type Keywords = IndexSet<String>;

/// Declarative description of one device command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandDefinition {
    /// Accessor base name, unique within a prototype.
    pub name: String,
    /// Device command without `?` or value, e.g. `source{source}:frequency`.
    pub base_command: String,
    /// How values are converted.
    pub converter: ConverterKind,
    /// Expose a query direction.
    pub can_query: bool,
    /// Expose a write direction.
    pub can_write: bool,
    /// Keywords appended to queries (`frequency? min`).
    pub query_keywords: Keywords,
    /// Value-less presets appended to writes (`frequency max`).
    pub write_keywords: Keywords,
    /// Separate on/off commands replacing the valued write (boolean only).
    pub split_write: Option<(String, String)>,
}

impl CommandDefinition {
    /// New definition with both directions requested and no keywords.
    pub fn new(
        name: impl Into<String>,
        base_command: impl Into<String>,
        converter: ConverterKind,
    ) -> Self {
        Self {
            name: name.into(),
            base_command: base_command.into(),
            converter,
            can_query: true,
            can_write: true,
            query_keywords: Keywords::new(),
            write_keywords: Keywords::new(),
            split_write: None,
        }
    }

    /// Request (or drop) the query direction.
    pub fn can_query(mut self, can_query: bool) -> Self {
        self.can_query = can_query;
        self
    }

    /// Request (or drop) the write direction.
    pub fn can_write(mut self, can_write: bool) -> Self {
        self.can_write = can_write;
        self
    }

    /// Add query keywords.
    pub fn query_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query_keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    /// Add write keywords.
    pub fn write_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.write_keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    /// Use separate commands for writing `true` and `false`.
    pub fn split_write(mut self, on: impl Into<String>, off: impl Into<String>) -> Self {
        self.split_write = Some((on.into(), off.into()));
        self
    }
}

/// Query form: `base?` or `base? keyword`.
pub fn query_command(base: &str, keyword: Option<&str>) -> String {
    match keyword {
        Some(kw) => format!("{}? {}", base, kw),
        None => format!("{}?", base),
    }
}

/// Write form: `base keyword` for presets, otherwise `base {value}`.
pub fn write_command(base: &str, keyword: Option<&str>) -> String {
    match keyword {
        Some(kw) => format!("{} {}", base, kw),
        None => format!("{} {{value}}", base),
    }
}

/// What an accessor does when invoked.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Read and write through the same name.
    Property {
        /// Query template.
        query: String,
        /// Write template containing `{value}`.
        write: String,
    },
    /// Read only.
    Query(String),
    /// Write a converted value.
    Write(String),
    /// Write `on` for truthy values and `off` otherwise.
    SplitWrite {
        /// Command sent for truthy values.
        on: String,
        /// Command sent for falsy values.
        off: String,
    },
    /// No-argument command: bare actions and write presets.
    Action(String),
    /// Lists the valid keys of a choice converter.
    Choices,
}

impl Operation {
    /// Template used for reads, if this accessor can be read.
    pub fn query_template(&self) -> Option<&str> {
        match self {
            Operation::Property { query, .. } | Operation::Query(query) => Some(query),
            _ => None,
        }
    }

    /// True for accessors that accept a value.
    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            Operation::Property { .. } | Operation::Write(_) | Operation::SplitWrite { .. }
        )
    }
}

/// A compiled accessor: a name, what it does, and the converter it uses.
#[derive(Debug, Clone)]
pub struct Accessor {
    name: String,
    command: String,
    operation: Operation,
    converter: Arc<Converter>,
}

impl Accessor {
    /// Accessor name as exposed on the subsystem.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the command definition this accessor came from.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// What invoking the accessor does.
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Converter shared by all accessors of one command.
    pub fn converter(&self) -> &Converter {
        &self.converter
    }
}

/// Ordered accessor table of one subsystem.
pub type AccessorTable = IndexMap<String, Accessor>;

/// Compile one command into `table`.
///
/// Fails if an accessor name is already taken, or if `split_write` is used
/// with a non-boolean converter.
pub fn compile(def: &CommandDefinition, table: &mut AccessorTable) -> ScpiResult<()> {
    if def.split_write.is_some() && def.converter != ConverterKind::Boolean {
        return Err(ScpiError::spec(format!(
            "command '{}': split write commands need a boolean converter",
            def.name
        )));
    }

    if let Some(kw) = def
        .query_keywords
        .iter()
        .chain(&def.write_keywords)
        .find(|kw| kw.trim().is_empty())
    {
        return Err(ScpiError::spec(format!(
            "command '{}': empty keyword {:?}",
            def.name, kw
        )));
    }

    // keyword readers are an explicit request, so they only depend on what
    // the converter kind supports, not on can_query
    let full = Arc::new(Converter::from_kind(&def.converter));
    let converter = Arc::new((*full).clone().restrict(def.can_query, def.can_write));
    let base = def.base_command.as_str();
    let name = def.name.as_str();

    let query = converter.query().map(|_| query_command(base, None));
    let write = converter.write().map(|_| match &def.split_write {
        Some((on, off)) => Operation::SplitWrite {
            on: on.clone(),
            off: off.clone(),
        },
        None => Operation::Write(write_command(base, None)),
    });

    let mut entries: Vec<(String, Operation, &Arc<Converter>)> = Vec::new();
    match (query, write) {
        (Some(query), Some(Operation::Write(write))) => {
            entries.push((name.to_string(), Operation::Property { query, write }, &converter));
        }
        (Some(query), Some(split)) => {
            entries.push((format!("get_{}", name), Operation::Query(query), &converter));
            entries.push((format!("set_{}", name), split, &converter));
        }
        (Some(query), None) => {
            entries.push((format!("get_{}", name), Operation::Query(query), &converter));
        }
        (None, Some(write)) => entries.push((format!("set_{}", name), write, &converter)),
        (None, None) => {
            entries.push((name.to_string(), Operation::Action(base.to_string()), &converter));
        }
    }

    if full.query().is_some() {
        for kw in &def.query_keywords {
            let op = Operation::Query(query_command(base, Some(kw)));
            entries.push((format!("{}_{}", name, kw), op, &full));
        }
    }
    for kw in &def.write_keywords {
        let op = Operation::Action(write_command(base, Some(kw)));
        entries.push((format!("{}_to_{}", name, kw), op, &full));
    }
    if full.choices().is_some() {
        entries.push((format!("{}_choices", name), Operation::Choices, &full));
    }

    let mut generated = IndexSet::new();
    for (accessor, _, _) in &entries {
        if table.contains_key(accessor) {
            return Err(ScpiError::spec(format!(
                "accessor '{}' (from command '{}') is already defined",
                accessor, name
            )));
        }
        if !generated.insert(accessor.as_str()) {
            return Err(ScpiError::spec(format!(
                "command '{}' generates accessor '{}' twice",
                name, accessor
            )));
        }
    }
    for (accessor, operation, conv) in entries {
        trace!(accessor = %accessor, ?operation, "compiled accessor");
        table.insert(
            accessor.clone(),
            Accessor {
                name: accessor,
                command: name.to_string(),
                operation,
                converter: Arc::clone(conv),
            },
        );
    }
    Ok(())
}
