//! Pipeline definition loading (TOML) with schema and invariant checks.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::debug;

use crate::core::contract::PipelineDefinition;
use crate::core::invariants::validate_definition;
use crate::io::template::TemplateRenderer;

/// Load, resolve and check a pipeline definition file.
///
/// Output schema paths are resolved relative to the definition's directory.
pub fn load_definition(path: &Path) -> Result<PipelineDefinition> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read definition {}", path.display()))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_definition(&contents, base_dir)
        .with_context(|| format!("load definition {}", path.display()))
}

/// Parse a definition from TOML text, resolving schema files against `base_dir`.
pub fn parse_definition(contents: &str, base_dir: &Path) -> Result<PipelineDefinition> {
    let mut def: PipelineDefinition = toml::from_str(contents).context("parse definition toml")?;

    let mut errors = validate_definition(&def);
    errors.extend(check_templates(&def));
    if !errors.is_empty() {
        bail!("invalid pipeline definition:\n- {}", errors.join("\n- "));
    }

    for phase in &mut def.phases {
        if let Some(rel) = &phase.output.schema {
            let schema_path = base_dir.join(rel);
            let schema = load_output_schema(&schema_path)
                .with_context(|| format!("phase '{}': output schema", phase.name))?;
            phase.output.json_schema = Some(schema);
        }
    }

    debug!(
        pipeline = %def.id(),
        phases = def.phases.len(),
        gates = def.gates.len(),
        "definition loaded"
    );
    Ok(def)
}

fn load_output_schema(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path).with_context(|| format!("read schema {}", path.display()))?;
    let schema: Value =
        serde_json::from_str(&raw).with_context(|| format!("parse schema {}", path.display()))?;
    validator_for(&schema).map_err(|err| anyhow!("invalid schema {}: {}", path.display(), err))?;
    Ok(schema)
}

fn check_templates(def: &PipelineDefinition) -> Vec<String> {
    let renderer = TemplateRenderer::new();
    let mut errors = Vec::new();
    let mut check = |owner: String, source: &str| {
        if let Err(err) = renderer.check(source) {
            errors.push(format!("{owner}: {err:#}"));
        }
    };
    for phase in &def.phases {
        if let Some(prompt) = &phase.prompt {
            check(format!("phase '{}' prompt", phase.name), prompt);
        }
    }
    for gate in &def.gates {
        check(format!("gate '{}' title", gate.name), &gate.title);
        check(format!("gate '{}' question", gate.name), &gate.question);
    }
    errors
}
