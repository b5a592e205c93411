//! Run configuration and the append-only context threaded through a run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Named run parameters. Immutable once a run starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineConfig {
    params: BTreeMap<String, Value>,
}

impl PipelineConfig {
    pub fn new(params: BTreeMap<String, Value>) -> Self {
        Self { params }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl FromIterator<(String, Value)> for PipelineConfig {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            params: iter.into_iter().collect(),
        }
    }
}

/// Slot for a phase that reached a terminal, non-failed state.
///
/// `output` is `None` when the phase was skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSlot {
    pub phase: String,
    pub output: Option<Value>,
}

/// Result of looking up a key in a [`RunContext`].
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<'a> {
    Found(&'a Value),
    /// The key names a phase (or a field of a phase) that was skipped.
    Skipped { phase: String },
    Missing,
}

impl<'a> Lookup<'a> {
    pub fn found(self) -> Option<&'a Value> {
        match self {
            Lookup::Found(value) => Some(value),
            _ => None,
        }
    }
}

/// Accumulated state of one run: the config plus one slot per finished phase.
///
/// Slots are appended in completion order and never removed or overwritten.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    config: PipelineConfig,
    slots: Vec<PhaseSlot>,
}

impl RunContext {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            slots: Vec::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn slots(&self) -> &[PhaseSlot] {
        &self.slots
    }

    pub fn slot(&self, phase: &str) -> Option<&PhaseSlot> {
        self.slots.iter().find(|slot| slot.phase == phase)
    }

    /// Output of a completed phase (`None` for skipped or unknown phases).
    pub fn output(&self, phase: &str) -> Option<&Value> {
        self.slot(phase).and_then(|slot| slot.output.as_ref())
    }

    pub fn record_completed(&mut self, phase: &str, output: Value) -> Result<(), String> {
        self.push(phase, Some(output))
    }

    pub fn record_skipped(&mut self, phase: &str) -> Result<(), String> {
        self.push(phase, None)
    }

    fn push(&mut self, phase: &str, output: Option<Value>) -> Result<(), String> {
        if self.slot(phase).is_some() {
            return Err(format!("phase '{phase}' already recorded in run context"));
        }
        self.slots.push(PhaseSlot {
            phase: phase.to_string(),
            output,
        });
        Ok(())
    }

    /// Resolve a key against the config, then prior phase outputs.
    ///
    /// 1. a top-level config parameter;
    /// 2. `phase.path` into a recorded phase's output;
    /// 3. a bare phase name, yielding the whole output;
    /// 4. a bare field name, taken from the most recent output that has it.
    pub fn lookup(&self, key: &str) -> Lookup<'_> {
        if let Some(value) = self.config.get(key) {
            return Lookup::Found(value);
        }

        if let Some((phase, path)) = key.split_once('.')
            && let Some(slot) = self.slot(phase)
        {
            return match &slot.output {
                None => Lookup::Skipped {
                    phase: slot.phase.clone(),
                },
                Some(output) => value_at_path(output, path).map_or(Lookup::Missing, Lookup::Found),
            };
        }

        if let Some(slot) = self.slot(key) {
            return match &slot.output {
                None => Lookup::Skipped {
                    phase: slot.phase.clone(),
                },
                Some(output) => Lookup::Found(output),
            };
        }

        self.slots
            .iter()
            .rev()
            .filter_map(|slot| slot.output.as_ref())
            .find_map(|output| output.get(key))
            .map_or(Lookup::Missing, Lookup::Found)
    }

    /// Completed outputs keyed by phase name; skipped phases map to `null`.
    pub fn outputs_value(&self) -> Value {
        let mut map = Map::new();
        for slot in &self.slots {
            map.insert(
                slot.phase.clone(),
                slot.output.clone().unwrap_or(Value::Null),
            );
        }
        Value::Object(map)
    }
}

/// Walk a dotted path (`a.b.0.c`) through objects and arrays.
pub fn value_at_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(pairs: &[(&str, Value)]) -> PipelineConfig {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn config_wins_over_phase_outputs() {
        let mut ctx = RunContext::new(config(&[("total", json!(1))]));
        ctx.record_completed("sizing", json!({"total": 2})).expect("record");
        assert_eq!(ctx.lookup("total"), Lookup::Found(&json!(1)));
    }

    #[test]
    fn qualified_lookup_walks_nested_fields() {
        let mut ctx = RunContext::new(PipelineConfig::default());
        ctx.record_completed(
            "memory_map",
            json!({"regions": [{"name": "sram", "size_kb": 128}], "totals": {"ram_kb": 96}}),
        )
        .expect("record");
        assert_eq!(ctx.lookup("memory_map.totals.ram_kb"), Lookup::Found(&json!(96)));
        assert_eq!(
            ctx.lookup("memory_map.regions.0.name"),
            Lookup::Found(&json!("sram"))
        );
        assert_eq!(ctx.lookup("memory_map.totals.flash_kb"), Lookup::Missing);
    }

    #[test]
    fn skipped_phase_is_reported_not_missing() {
        let mut ctx = RunContext::new(PipelineConfig::default());
        ctx.record_skipped("dma").expect("record");
        assert_eq!(
            ctx.lookup("dma.channels"),
            Lookup::Skipped {
                phase: "dma".to_string()
            }
        );
        assert_eq!(
            ctx.lookup("dma"),
            Lookup::Skipped {
                phase: "dma".to_string()
            }
        );
        assert_eq!(ctx.output("dma"), None);
    }

    #[test]
    fn bare_key_prefers_most_recent_output() {
        let mut ctx = RunContext::new(PipelineConfig::default());
        ctx.record_completed("first", json!({"budget": 1})).expect("record");
        ctx.record_completed("second", json!({"budget": 2})).expect("record");
        assert_eq!(ctx.lookup("budget"), Lookup::Found(&json!(2)));
        assert_eq!(ctx.lookup("first"), Lookup::Found(&json!({"budget": 1})));
    }

    #[test]
    fn slots_are_append_only() {
        let mut ctx = RunContext::new(PipelineConfig::default());
        ctx.record_completed("a", json!({})).expect("record");
        let err = ctx.record_completed("a", json!({"x": 1})).unwrap_err();
        assert!(err.contains("already recorded"));
        assert_eq!(ctx.output("a"), Some(&json!({})));
    }

    #[test]
    fn outputs_value_maps_skipped_to_null() {
        let mut ctx = RunContext::new(PipelineConfig::default());
        ctx.record_completed("a", json!({"x": 1})).expect("record");
        ctx.record_skipped("b").expect("record");
        assert_eq!(ctx.outputs_value(), json!({"a": {"x": 1}, "b": null}));
    }
}
