//! Input resolution for a phase about to be dispatched.

use serde_json::{Map, Value};

use crate::core::context::{Lookup, RunContext};
use crate::core::contract::PhaseContract;
use crate::error::PipelineError;

/// Build the input document for `contract` from the config and prior outputs.
///
/// The document is an object keyed by the keys exactly as declared. Required
/// keys that do not resolve, including keys served by a skipped phase, fail
/// with [`PipelineError::Configuration`]. Optional keys that do not resolve are
/// left out.
pub fn resolve_input(contract: &PhaseContract, ctx: &RunContext) -> Result<Value, PipelineError> {
    let mut input = Map::new();

    for key in &contract.requires {
        match ctx.lookup(key) {
            Lookup::Found(value) => {
                input.insert(key.clone(), value.clone());
            }
            Lookup::Skipped { phase } => {
                return Err(PipelineError::Configuration {
                    phase: contract.name.clone(),
                    key: key.clone(),
                    reason: format!("is produced by skipped phase '{phase}'"),
                });
            }
            Lookup::Missing => {
                return Err(PipelineError::Configuration {
                    phase: contract.name.clone(),
                    key: key.clone(),
                    reason: "is missing from config and prior phase outputs".to_string(),
                });
            }
        }
    }

    for key in &contract.optional {
        if let Lookup::Found(value) = ctx.lookup(key) {
            input.insert(key.clone(), value.clone());
        }
    }

    Ok(Value::Object(input))
}
