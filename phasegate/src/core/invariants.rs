//! Semantic checks on a pipeline definition that serde cannot express.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::contract::{FileSelection, PipelineDefinition};

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9_-]*$").expect("name pattern should be valid")
});

/// Check definition invariants:
/// - at least one phase
/// - phase, gate and option names are well-formed and unique
/// - phase names do not shadow option names
/// - references name declared phases that come strictly earlier
/// - gate `after`, `files` and summary references are declared phases
/// - result mappings reference declared phases
/// - option defaults match their declared type
pub fn validate_definition(def: &PipelineDefinition) -> Vec<String> {
    let mut errors = Vec::new();

    if def.phases.is_empty() {
        errors.push("pipeline must declare at least one phase".to_string());
    }

    for (name, option) in &def.options {
        check_name("option", name, &mut errors);
        if let Some(default) = &option.default
            && !option.kind.matches(default)
        {
            errors.push(format!(
                "option '{name}': default does not match type {}",
                option.kind.as_str()
            ));
        }
    }

    let mut seen = HashSet::new();
    for phase in &def.phases {
        check_name("phase", &phase.name, &mut errors);
        if !seen.insert(phase.name.as_str()) {
            errors.push(format!("duplicate phase name '{}'", phase.name));
        }
        if def.options.contains_key(&phase.name) {
            errors.push(format!("phase '{}' shadows option of the same name", phase.name));
        }
    }

    for (index, phase) in def.phases.iter().enumerate() {
        let owner = format!("phase '{}'", phase.name);
        for key in phase.referenced_keys() {
            check_reference(def, &owner, key, index, Some(index), &mut errors);
        }
    }

    let mut gate_names = HashSet::new();
    for gate in &def.gates {
        check_name("gate", &gate.name, &mut errors);
        if !gate_names.insert(gate.name.as_str()) {
            errors.push(format!("duplicate gate name '{}'", gate.name));
        }
        let owner = format!("gate '{}'", gate.name);
        let Some(position) = def.gate_position(gate) else {
            if let Some(after) = &gate.after {
                errors.push(format!("{owner}: after names unknown phase '{after}'"));
            }
            continue;
        };
        // A gate sees everything up to and including its `after` phase.
        let horizon = position + 1;
        for key in gate.summary.values() {
            check_reference(def, &owner, key, horizon, None, &mut errors);
        }
        if let FileSelection::Phases(phases) = &gate.files {
            for phase in phases {
                check_reference(def, &owner, phase, horizon, None, &mut errors);
            }
        }
    }

    let result_horizon = def.phases.len();
    for key in def.result.outputs.values() {
        check_reference(def, "result", key, result_horizon, None, &mut errors);
    }
    if let Some(key) = &def.result.success_from {
        check_reference(def, "result", key, result_horizon, None, &mut errors);
    }

    errors
}

fn check_name(what: &str, name: &str, errors: &mut Vec<String>) {
    if !NAME_RE.is_match(name) {
        errors.push(format!(
            "{what} name '{name}' must match {}",
            NAME_RE.as_str()
        ));
    }
}

/// Validate that `key`, read by `owner`, only reaches phases before `horizon`.
///
/// Dotted keys must start with a declared phase. Bare keys that name a phase
/// obey the same ordering; other bare keys may be config parameters or
/// fields of earlier outputs and cannot be checked statically.
fn check_reference(
    def: &PipelineDefinition,
    owner: &str,
    key: &str,
    horizon: usize,
    own_index: Option<usize>,
    errors: &mut Vec<String>,
) {
    if def.options.contains_key(key) {
        return;
    }
    let (head, dotted) = match key.split_once('.') {
        Some((head, _)) => (head, true),
        None => (key, false),
    };
    match def.phase_index(head) {
        Some(index) if Some(index) == own_index => {
            errors.push(format!("{owner} references itself via '{key}'"));
        }
        Some(index) if index >= horizon => {
            errors.push(format!(
                "{owner} references later phase '{}' via '{key}'",
                def.phases[index].name
            ));
        }
        Some(_) => {}
        None if dotted => {
            errors.push(format!("{owner} references unknown phase '{head}' via '{key}'"));
        }
        None => {}
    }
}
