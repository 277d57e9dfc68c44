//! Prototype definition files (TOML or JSON).
//!
//! ```toml
//! [choice_maps.shape]
//! sinusoid = "SIN"
//! square = "SQU"
//! triangle = "TRI"
//!
//! [[prototypes]]
//! name = "source"
//! description = "Waveform source"
//! indexed = true
//! channels = 2
//! commands = [
//!   ["frequency", "source{source}:frequency", "qty", "Hz", { query_keywords = "min, max" }],
//!   ["shape", "source{source}:function:shape", "choice", "sinusoid, square"],
//!   { name = "enabled", command = "output{source}", converter = "bool" },
//! ]
//! ```
//!
//! Commands are either tuples `[name, command, kind, arg?, options?]` or
//! tables. A choice argument is an inline table, or a comma-separated subset
//! of the shared `choice_maps` entry named `<prototype>.<command>` or
//! `<command>`. Keyword lists may be arrays or comma-separated strings.

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::debug;

use crate::command::{CommandDefinition, Keywords};
use crate::converter::{ChoiceMap, ConverterKind, NumericType, UnitSpec};
use crate::error::{ScpiError, ScpiResult};

use super::prototype::Prototype;
use super::template::SubsystemTemplate;

/// File format of a definition document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    /// TOML document.
    Toml,
    /// JSON document.
    Json,
}

impl DefinitionFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> ScpiResult<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(DefinitionFormat::Toml),
            Some("json") => Ok(DefinitionFormat::Json),
            _ => Err(ScpiError::spec(format!(
                "unsupported definition file '{}' (expected .toml or .json)",
                path.display()
            ))),
        }
    }
}

/// Prototypes loaded from one definition document, by name.
#[derive(Debug, Clone, Default)]
pub struct Definitions {
    prototypes: IndexMap<String, Prototype>,
}

impl Definitions {
    /// Look up a prototype.
    pub fn get(&self, name: &str) -> Option<&Prototype> {
        self.prototypes.get(name)
    }

    /// Prototype names in file order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.prototypes.keys().map(String::as_str)
    }

    /// Compile the named prototype.
    pub fn build(&self, name: &str) -> ScpiResult<Arc<SubsystemTemplate>> {
        let prototype = self
            .get(name)
            .ok_or_else(|| ScpiError::SubsystemNotFound(name.to_string()))?;
        SubsystemTemplate::build(prototype)
    }

    /// Merge another document; later definitions replace earlier ones.
    pub fn extend(&mut self, other: Definitions) {
        self.prototypes.extend(other.prototypes);
    }
}

/// Read and parse a definition file, format chosen by extension.
pub fn load_definitions(path: impl AsRef<Path>) -> ScpiResult<Definitions> {
    let path = path.as_ref();
    let format = DefinitionFormat::from_path(path)?;
    let text = std::fs::read_to_string(path)?;
    debug!(path = %path.display(), "loading subsystem definitions");
    parse_definitions(&text, format)
}

/// Parse a definition document.
pub fn parse_definitions(text: &str, format: DefinitionFormat) -> ScpiResult<Definitions> {
    let raw: RawDocument = match format {
        DefinitionFormat::Toml => toml::from_str(text)
            .map_err(|e| ScpiError::spec(format!("invalid TOML definitions: {}", e)))?,
        DefinitionFormat::Json => serde_json::from_str(text)
            .map_err(|e| ScpiError::spec(format!("invalid JSON definitions: {}", e)))?,
    };

    let mut prototypes = IndexMap::new();
    for proto in raw.prototypes {
        let prototype = proto.into_prototype(&raw.choice_maps)?;
        if prototypes.contains_key(&prototype.name) {
            return Err(ScpiError::spec(format!(
                "prototype '{}' is defined twice",
                prototype.name
            )));
        }
        prototypes.insert(prototype.name.clone(), prototype);
    }
    Ok(Definitions { prototypes })
}

type ChoiceMaps = IndexMap<String, IndexMap<String, String>>;

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    choice_maps: ChoiceMaps,
    #[serde(default)]
    prototypes: Vec<RawPrototype>,
}

fn default_channels() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPrototype {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    indexed: bool,
    #[serde(default)]
    index_key: Option<String>,
    #[serde(default = "default_channels")]
    channels: u32,
    #[serde(default)]
    zero_indexed: bool,
    #[serde(default)]
    commands: Vec<RawCommand>,
    #[serde(default)]
    subsystems: Vec<RawPrototype>,
}

impl RawPrototype {
    fn into_prototype(self, choice_maps: &ChoiceMaps) -> ScpiResult<Prototype> {
        let mut prototype = Prototype::new(self.name);
        prototype.description = self.description;
        prototype.indexed = self.indexed;
        prototype.index_key = self.index_key;
        prototype.channels = self.channels;
        prototype.zero_indexed = self.zero_indexed;
        for raw in self.commands {
            let command = raw.into_definition(&prototype.name, choice_maps)?;
            prototype.commands.push(command);
        }
        for child in self.subsystems {
            let child = child.into_prototype(choice_maps)?;
            if prototype.subsystems.contains_key(&child.name) {
                return Err(ScpiError::spec(format!(
                    "subsystem '{}' is nested twice in '{}'",
                    child.name, prototype.name
                )));
            }
            prototype.subsystems.insert(child.name.clone(), child);
        }
        Ok(prototype)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawArg {
    Text(String),
    Map(IndexMap<String, String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawKeywords {
    List(Vec<String>),
    Csv(String),
}

impl RawKeywords {
    fn into_keywords(self) -> Keywords {
        match self {
            RawKeywords::List(list) => list
                .iter()
                .map(|k| k.trim())
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect(),
            RawKeywords::Csv(csv) => split_csv(&csv).map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOptions {
    #[serde(default)]
    can_query: Option<bool>,
    #[serde(default)]
    can_write: Option<bool>,
    #[serde(default)]
    query_keywords: Option<RawKeywords>,
    #[serde(default)]
    write_keywords: Option<RawKeywords>,
    #[serde(default)]
    split_write: Option<(String, String)>,
}

// serde cannot combine `flatten` with `deny_unknown_fields`, so the option
// fields are repeated here
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCommandTable {
    name: String,
    command: String,
    converter: String,
    #[serde(default)]
    arg: Option<RawArg>,
    #[serde(default)]
    can_query: Option<bool>,
    #[serde(default)]
    can_write: Option<bool>,
    #[serde(default)]
    query_keywords: Option<RawKeywords>,
    #[serde(default)]
    write_keywords: Option<RawKeywords>,
    #[serde(default)]
    split_write: Option<(String, String)>,
}

impl RawCommandTable {
    fn options(&mut self) -> RawOptions {
        RawOptions {
            can_query: self.can_query.take(),
            can_write: self.can_write.take(),
            query_keywords: self.query_keywords.take(),
            write_keywords: self.write_keywords.take(),
            split_write: self.split_write.take(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCommand {
    Full(String, String, String, Option<RawArg>, RawOptions),
    WithArg(String, String, String, Option<RawArg>),
    Bare(String, String, String),
    Table(RawCommandTable),
}

impl RawCommand {
    fn into_definition(
        self,
        prototype: &str,
        choice_maps: &ChoiceMaps,
    ) -> ScpiResult<CommandDefinition> {
        let (name, command, kind, arg, options) = match self {
            RawCommand::Full(n, c, k, a, o) => (n, c, k, a, o),
            RawCommand::WithArg(n, c, k, a) => (n, c, k, a, RawOptions::default()),
            RawCommand::Bare(n, c, k) => (n, c, k, None, RawOptions::default()),
            RawCommand::Table(mut t) => {
                let options = t.options();
                (t.name, t.command, t.converter, t.arg, options)
            }
        };
        // an empty string stands in for "no argument" where null is unavailable
        let arg = arg.filter(|a| !matches!(a, RawArg::Text(t) if t.trim().is_empty()));
        let converter = converter_kind(prototype, &name, &kind, arg, choice_maps)?;

        let mut def = CommandDefinition::new(name, command, converter);
        def.can_query = options.can_query.unwrap_or(true);
        def.can_write = options.can_write.unwrap_or(true);
        if let Some(kw) = options.query_keywords {
            def.query_keywords = kw.into_keywords();
        }
        if let Some(kw) = options.write_keywords {
            def.write_keywords = kw.into_keywords();
        }
        def.split_write = options.split_write;
        Ok(def)
    }
}

fn split_csv(text: &str) -> impl Iterator<Item = &str> {
    text.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn converter_kind(
    prototype: &str,
    command: &str,
    kind: &str,
    arg: Option<RawArg>,
    choice_maps: &ChoiceMaps,
) -> ScpiResult<ConverterKind> {
    let text_arg = |arg: &Option<RawArg>| match arg {
        Some(RawArg::Text(t)) => Some(t.trim().to_string()),
        _ => None,
    };
    match kind.trim() {
        "bool" | "boolean" => Ok(ConverterKind::Boolean),
        "int" | "integer" => Ok(ConverterKind::Numeric(NumericType::Integer)),
        "float" => Ok(ConverterKind::Numeric(NumericType::Float)),
        "num" | "numeric" => match text_arg(&arg).as_deref() {
            None | Some("float") => Ok(ConverterKind::Numeric(NumericType::Float)),
            Some("int") | Some("integer") => Ok(ConverterKind::Numeric(NumericType::Integer)),
            Some(other) => Err(ScpiError::spec(format!(
                "command '{}': unknown numeric type '{}'",
                command, other
            ))),
        },
        "qty" | "quantity" => {
            let unit = text_arg(&arg).ok_or_else(|| {
                ScpiError::spec(format!("command '{}': quantity needs a unit", command))
            })?;
            let unit = UnitSpec::parse(&unit)
                .map_err(|e| ScpiError::spec(format!("command '{}': {}", command, e)))?;
            Ok(ConverterKind::Quantity(unit))
        }
        "choice" => {
            let map = choice_map(prototype, command, arg, choice_maps)?;
            if map.is_empty() {
                return Err(ScpiError::spec(format!(
                    "command '{}': choice converter has no choices",
                    command
                )));
            }
            Ok(ConverterKind::Choice(map))
        }
        "error" => Ok(ConverterKind::Error),
        other => Err(ScpiError::spec(format!(
            "command '{}': unknown converter kind '{}'",
            command, other
        ))),
    }
}

fn choice_map(
    prototype: &str,
    command: &str,
    arg: Option<RawArg>,
    choice_maps: &ChoiceMaps,
) -> ScpiResult<ChoiceMap> {
    let subset = match arg {
        Some(RawArg::Map(map)) => return Ok(map.into_iter().collect()),
        Some(RawArg::Text(list)) => Some(list),
        None => None,
    };
    let shared = choice_maps
        .get(&format!("{}.{}", prototype, command))
        .or_else(|| choice_maps.get(command))
        .ok_or_else(|| {
            ScpiError::spec(format!("command '{}': no choice map named '{}'", command, command))
        })?;
    let shared: ChoiceMap = shared.clone().into_iter().collect();
    match subset {
        Some(list) => shared.subset(split_csv(&list)),
        None => Ok(shared),
    }
}
