//! Building a run's [`PipelineConfig`] from option defaults, a params file and overrides.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::context::PipelineConfig;
use crate::core::contract::{PipelineDefinition, json_type_name};

/// Read parameters from a `.json` file, or TOML for any other extension.
pub fn load_params_file(path: &Path) -> Result<BTreeMap<String, Value>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read params {}", path.display()))?;
    let params = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&raw).with_context(|| format!("parse params {}", path.display()))?
    } else {
        toml::from_str(&raw).with_context(|| format!("parse params {}", path.display()))?
    };
    Ok(params)
}

/// Parse a `key=value` override. The value is JSON when it parses, else a string.
pub fn parse_override(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("override '{raw}' must be key=value"))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("override '{raw}' has an empty key");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Merge defaults, then `file` params, then `overrides`, and check them
/// against the definition's options.
///
/// Keys the definition does not declare are kept but logged, unless they name
/// a phase (`collect`) or reach into one (`collect.items`): config is looked
/// up before phase outputs, so such a key would hide the phase's output.
pub fn build_config(
    def: &PipelineDefinition,
    file: BTreeMap<String, Value>,
    overrides: Vec<(String, Value)>,
) -> Result<PipelineConfig> {
    let mut params: BTreeMap<String, Value> = def
        .options
        .iter()
        .filter_map(|(name, option)| option.default.clone().map(|d| (name.clone(), d)))
        .collect();
    params.extend(file);
    params.extend(overrides);

    let mut errors = Vec::new();
    for key in params.keys().filter(|k| !def.options.contains_key(*k)) {
        let head = key.split_once('.').map_or(key.as_str(), |(head, _)| head);
        if def.phase_index(head).is_some() {
            errors.push(format!(
                "parameter '{key}' would shadow the output of phase '{head}'"
            ));
        } else {
            warn!(key = %key, pipeline = %def.id(), "parameter is not a declared option");
        }
    }

    for (name, option) in &def.options {
        match params.get(name) {
            None | Some(Value::Null) if option.required => {
                errors.push(format!("missing required option '{name}'"));
            }
            Some(value) if !value.is_null() && !option.kind.matches(value) => {
                errors.push(format!(
                    "option '{name}' expects {}, got {}",
                    option.kind.as_str(),
                    json_type_name(value)
                ));
            }
            _ => {}
        }
    }
    if !errors.is_empty() {
        bail!("invalid parameters:\n- {}", errors.join("\n- "));
    }

    debug!(params = params.len(), "pipeline config built");
    Ok(PipelineConfig::new(params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::contract::{FieldType, OptionSpec, PhaseContract};
    use serde_json::json;

    fn definition() -> PipelineDefinition {
        let mut def = PipelineDefinition::new("demo", vec![PhaseContract::new("one")]);
        def.options.insert(
            "project_name".to_string(),
            OptionSpec {
                kind: FieldType::String,
                required: true,
                ..OptionSpec::default()
            },
        );
        def.options.insert(
            "ram_budget_kb".to_string(),
            OptionSpec {
                kind: FieldType::Integer,
                default: Some(json!(256)),
                ..OptionSpec::default()
            },
        );
        def
    }

    #[test]
    fn overrides_win_over_file_and_defaults() {
        let mut file = BTreeMap::new();
        file.insert("project_name".to_string(), json!("probe"));
        file.insert("ram_budget_kb".to_string(), json!(128));
        let cfg = build_config(
            &definition(),
            file,
            vec![parse_override("ram_budget_kb=512").expect("override")],
        )
        .expect("build");
        assert_eq!(cfg.get("ram_budget_kb"), Some(&json!(512)));
        assert_eq!(cfg.get("project_name"), Some(&json!("probe")));
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = build_config(
            &definition(),
            BTreeMap::new(),
            vec![parse_override("project_name=probe").expect("override")],
        )
        .expect("build");
        assert_eq!(cfg.get("ram_budget_kb"), Some(&json!(256)));
    }

    #[test]
    fn missing_required_and_wrong_types_are_reported_together() {
        let err = build_config(
            &definition(),
            BTreeMap::new(),
            vec![("ram_budget_kb".to_string(), json!("lots"))],
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("missing required option 'project_name'"));
        assert!(msg.contains("option 'ram_budget_kb' expects integer, got string"));
    }

    #[test]
    fn undeclared_keys_are_kept_unless_they_name_a_phase() {
        let cfg = build_config(
            &definition(),
            BTreeMap::new(),
            vec![
                parse_override("project_name=probe").expect("override"),
                parse_override("onefold=2").expect("override"),
            ],
        )
        .expect("build");
        assert_eq!(cfg.get("onefold"), Some(&json!(2)));

        let err = build_config(
            &definition(),
            BTreeMap::new(),
            vec![
                parse_override("project_name=probe").expect("override"),
                parse_override("one=stale").expect("override"),
                parse_override("one.total=7").expect("override"),
            ],
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("invalid parameters:"));
        assert!(msg.contains("parameter 'one' would shadow the output of phase 'one'"));
        assert!(msg.contains("parameter 'one.total' would shadow the output of phase 'one'"));
    }

    #[test]
    fn override_values_parse_as_json_with_string_fallback() {
        assert_eq!(parse_override("flag=true").expect("parse").1, json!(true));
        assert_eq!(parse_override("n=12").expect("parse").1, json!(12));
        assert_eq!(parse_override("mcu=stm32h7").expect("parse").1, json!("stm32h7"));
        assert_eq!(parse_override("list=[1,2]").expect("parse").1, json!([1, 2]));
        assert_eq!(parse_override("empty=").expect("parse").1, json!(""));
        assert!(parse_override("novalue").is_err());
        assert!(parse_override("=x").is_err());
    }

    #[test]
    fn params_file_reads_toml_and_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let toml_path = temp.path().join("params.toml");
        fs::write(&toml_path, "project_name = \"probe\"\nram_budget_kb = 64\n").expect("write");
        let json_path = temp.path().join("params.json");
        fs::write(&json_path, r#"{"project_name": "probe", "include_dma_planning": false}"#)
            .expect("write");

        let from_toml = load_params_file(&toml_path).expect("toml");
        assert_eq!(from_toml["ram_budget_kb"], json!(64));
        let from_json = load_params_file(&json_path).expect("json");
        assert_eq!(from_json["include_dma_planning"], json!(false));
    }
}
