//! Output contract checks applied before a phase output is merged.

use jsonschema::validator_for;
use serde_json::Value;

use crate::core::contract::{OutputSchema, json_type_name};
use crate::core::types::ArtifactRef;

/// Field in a phase output that carries its artifact references.
pub const ARTIFACTS_FIELD: &str = "artifacts";

/// Check `output` against `schema` and extract its artifact list.
///
/// Every violation is collected; the output is accepted only when none are
/// found. Messages are stable and human readable.
pub fn check_output(schema: &OutputSchema, output: &Value) -> Result<Vec<ArtifactRef>, Vec<String>> {
    let Some(fields) = output.as_object() else {
        return Err(vec![format!(
            "output must be a JSON object, got {}",
            json_type_name(output)
        )]);
    };

    let mut violations = Vec::new();

    for field in &schema.required {
        match fields.get(field) {
            None => violations.push(format!("missing required field '{field}'")),
            Some(Value::Null) => violations.push(format!("required field '{field}' is null")),
            Some(_) => {}
        }
    }

    for (field, kind) in &schema.types {
        if let Some(value) = fields.get(field)
            && !value.is_null()
            && !kind.matches(value)
        {
            violations.push(format!(
                "field '{field}' expected {}, got {}",
                kind.as_str(),
                json_type_name(value)
            ));
        }
    }

    if let Some(json_schema) = &schema.json_schema {
        match validator_for(json_schema) {
            Ok(validator) => violations.extend(
                validator
                    .iter_errors(output)
                    .map(|err| format!("schema: {err}")),
            ),
            Err(err) => violations.push(format!("invalid output schema: {err}")),
        }
    }

    let artifacts = match fields.get(ARTIFACTS_FIELD) {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => parse_artifacts(value, &mut violations),
    };

    if violations.is_empty() {
        Ok(artifacts)
    } else {
        Err(violations)
    }
}

fn parse_artifacts(value: &Value, violations: &mut Vec<String>) -> Vec<ArtifactRef> {
    let Some(items) = value.as_array() else {
        violations.push(format!(
            "field '{ARTIFACTS_FIELD}' must be an array, got {}",
            json_type_name(value)
        ));
        return Vec::new();
    };

    let mut artifacts = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match serde_json::from_value::<ArtifactRef>(item.clone()) {
            Ok(artifact) => artifacts.push(artifact),
            Err(err) => violations.push(format!("{ARTIFACTS_FIELD}[{i}]: {err}")),
        }
    }
    artifacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::contract::{FieldType, PhaseContract};
    use serde_json::json;

    fn schema() -> OutputSchema {
        PhaseContract::new("memory_map")
            .output_required(&["regions", "total_ram_kb"])
            .output_type("regions", FieldType::Array)
            .output_type("total_ram_kb", FieldType::Integer)
            .output
    }

    #[test]
    fn valid_output_yields_artifacts_in_order() {
        let output = json!({
            "regions": [],
            "total_ram_kb": 96,
            "artifacts": [
                {"path": "out/map.md", "format": "markdown", "label": "Memory map"},
                {"path": "out/map.json", "format": "json", "label": "Memory map data"}
            ]
        });
        let artifacts = check_output(&schema(), &output).expect("valid");
        assert_eq!(
            artifacts,
            vec![
                ArtifactRef::new("out/map.md", "markdown", "Memory map"),
                ArtifactRef::new("out/map.json", "json", "Memory map data"),
            ]
        );
    }

    #[test]
    fn every_violation_is_reported() {
        let output = json!({"regions": "sram", "total_ram_kb": null});
        let violations = check_output(&schema(), &output).unwrap_err();
        assert_eq!(
            violations,
            vec![
                "required field 'total_ram_kb' is null".to_string(),
                "field 'regions' expected array, got string".to_string(),
            ]
        );
    }

    #[test]
    fn missing_required_field_is_reported() {
        let violations = check_output(&schema(), &json!({"regions": []})).unwrap_err();
        assert_eq!(violations, vec!["missing required field 'total_ram_kb'"]);
    }

    #[test]
    fn non_object_output_is_rejected() {
        let violations = check_output(&OutputSchema::default(), &json!([1, 2])).unwrap_err();
        assert_eq!(violations, vec!["output must be a JSON object, got array"]);
    }

    #[test]
    fn malformed_artifacts_are_violations() {
        let output = json!({"artifacts": [{"path": "a"}]});
        let violations = check_output(&OutputSchema::default(), &output).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].starts_with("artifacts[0]:"));

        let output = json!({"artifacts": "a.md"});
        let violations = check_output(&OutputSchema::default(), &output).unwrap_err();
        assert_eq!(violations, vec!["field 'artifacts' must be an array, got string"]);
    }

    #[test]
    fn json_schema_violations_are_included() {
        let mut schema = OutputSchema::default();
        schema.json_schema = Some(json!({
            "type": "object",
            "properties": {"utilization": {"type": "number", "maximum": 1.0}}
        }));
        assert!(check_output(&schema, &json!({"utilization": 0.5})).is_ok());
        let violations = check_output(&schema, &json!({"utilization": 1.5})).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].starts_with("schema:"));
    }
}
