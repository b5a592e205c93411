//! Static pipeline definition: phase contracts, options, gates and result mapping.
//!
//! A [`PipelineDefinition`] is loaded once (see `io::definition`) and shared
//! read-only by every run of that pipeline type.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::predicate::Predicate;

/// JSON type expected for an output field or option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    /// A JSON number with no fractional part.
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    #[default]
    Any,
}

impl FieldType {
    pub fn matches(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => match value {
                Value::Number(n) => {
                    n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
                }
                _ => false,
            },
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Any => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Any => "any",
        }
    }
}

/// Name of the JSON type of `value`, for diagnostics.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Shape every completed output of a phase must satisfy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSchema {
    /// Fields that must be present and non-null.
    pub required: Vec<String>,
    /// Expected types for fields, checked when the field is present.
    pub types: BTreeMap<String, FieldType>,
    /// Optional JSON Schema file, relative to the definition file.
    pub schema: Option<PathBuf>,
    /// Parsed contents of `schema`, filled in by the definition loader.
    #[serde(skip)]
    pub json_schema: Option<Value>,
}

/// Static description of one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseContract {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Input keys that must resolve before dispatch.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Input keys included only when they resolve.
    #[serde(default)]
    pub optional: Vec<String>,
    /// Absent means always enabled.
    #[serde(default)]
    pub enabled_when: Option<Predicate>,
    /// Template rendered with the resolved inputs and handed to the executor.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Opaque domain instructions forwarded to the executor.
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(default)]
    pub output: OutputSchema,
}

impl PhaseContract {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            requires: Vec::new(),
            optional: Vec::new(),
            enabled_when: None,
            prompt: None,
            instructions: Vec::new(),
            output: OutputSchema::default(),
        }
    }

    pub fn requires(mut self, keys: &[&str]) -> Self {
        self.requires = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn optional(mut self, keys: &[&str]) -> Self {
        self.optional = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn enabled_when(mut self, predicate: Predicate) -> Self {
        self.enabled_when = Some(predicate);
        self
    }

    pub fn output_required(mut self, fields: &[&str]) -> Self {
        self.output.required = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn output_type(mut self, field: &str, kind: FieldType) -> Self {
        self.output.types.insert(field.to_string(), kind);
        self
    }

    /// Every key the phase reads: required, optional and predicate keys.
    pub fn referenced_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .requires
            .iter()
            .chain(&self.optional)
            .map(String::as_str)
            .collect();
        if let Some(predicate) = &self.enabled_when {
            keys.extend(predicate.keys());
        }
        keys
    }
}

/// Recognized pipeline option.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptionSpec {
    #[serde(rename = "type")]
    pub kind: FieldType,
    pub default: Option<Value>,
    pub required: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileScope {
    All,
    None,
}

/// Which ledger entries a gate shows the reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileSelection {
    Scope(FileScope),
    Phases(Vec<String>),
}

impl Default for FileSelection {
    fn default() -> Self {
        FileSelection::Scope(FileScope::All)
    }
}

/// Review gate declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateSpec {
    pub name: String,
    /// Phase after which the gate fires. Defaults to the last phase.
    #[serde(default)]
    pub after: Option<String>,
    pub title: String,
    pub question: String,
    /// Summary field name -> lookup key.
    #[serde(default)]
    pub summary: BTreeMap<String, String>,
    #[serde(default)]
    pub files: FileSelection,
}

/// Field-lifting rules for the final result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResultSpec {
    /// Lookup key of a boolean that decides `success` for completed runs.
    pub success_from: Option<String>,
    /// Result field name -> lookup key.
    pub outputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineMeta {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A complete pipeline type: ordered phases plus options, gates and result mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineDefinition {
    pub pipeline: PipelineMeta,
    #[serde(default)]
    pub options: BTreeMap<String, OptionSpec>,
    pub phases: Vec<PhaseContract>,
    #[serde(default)]
    pub gates: Vec<GateSpec>,
    #[serde(default)]
    pub result: ResultSpec,
}

impl PipelineDefinition {
    pub fn new(id: &str, phases: Vec<PhaseContract>) -> Self {
        Self {
            pipeline: PipelineMeta {
                id: id.to_string(),
                description: None,
            },
            options: BTreeMap::new(),
            phases,
            gates: Vec::new(),
            result: ResultSpec::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.pipeline.id
    }

    pub fn phase_index(&self, name: &str) -> Option<usize> {
        self.phases.iter().position(|phase| phase.name == name)
    }

    /// Index of the phase after which `gate` fires, or `None` if `after`
    /// names an unknown phase or the pipeline is empty.
    pub fn gate_position(&self, gate: &GateSpec) -> Option<usize> {
        match &gate.after {
            Some(after) => self.phase_index(after),
            None => self.phases.len().checked_sub(1),
        }
    }

    /// Gates that fire once the phase at `index` reaches a terminal state.
    pub fn gates_after(&self, index: usize) -> impl Iterator<Item = &GateSpec> {
        self.gates
            .iter()
            .filter(move |gate| self.gate_position(gate) == Some(index))
    }
}
