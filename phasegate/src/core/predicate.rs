//! Enable conditions for optional phases.
//!
//! Predicates are plain data in the pipeline definition:
//!
//! ```toml
//! enabled_when = "include_dma_planning"
//! enabled_when = { not = "skip_linker" }
//! enabled_when = { all = ["include_dma_planning", { equals = { key = "target_mcu", value = "stm32h7" } }] }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::context::RunContext;

/// Boolean condition over the config and prior phase outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Predicate {
    /// True when the key resolves to a truthy value.
    Key(String),
    Not { not: Box<Predicate> },
    All { all: Vec<Predicate> },
    Any { any: Vec<Predicate> },
    Equals { equals: EqualsCheck },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqualsCheck {
    pub key: String,
    pub value: Value,
}

impl Predicate {
    /// Evaluate against a run context (config first, then prior outputs).
    pub fn evaluate(&self, ctx: &RunContext) -> bool {
        self.evaluate_with(&|key| ctx.lookup(key).found())
    }

    /// Evaluate with a caller-supplied key lookup. Unresolved keys are falsy.
    pub fn evaluate_with<'a>(&self, lookup: &dyn Fn(&str) -> Option<&'a Value>) -> bool {
        match self {
            Predicate::Key(key) => lookup(key).is_some_and(truthy),
            Predicate::Not { not } => !not.evaluate_with(lookup),
            Predicate::All { all } => all.iter().all(|p| p.evaluate_with(lookup)),
            Predicate::Any { any } => any.iter().any(|p| p.evaluate_with(lookup)),
            Predicate::Equals { equals } => lookup(&equals.key) == Some(&equals.value),
        }
    }

    /// Every key the predicate reads, in declaration order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys<'a>(&'a self, keys: &mut Vec<&'a str>) {
        match self {
            Predicate::Key(key) => keys.push(key),
            Predicate::Not { not } => not.collect_keys(keys),
            Predicate::All { all } => all.iter().for_each(|p| p.collect_keys(keys)),
            Predicate::Any { any } => any.iter().for_each(|p| p.collect_keys(keys)),
            Predicate::Equals { equals } => keys.push(&equals.key),
        }
    }
}

/// Truthiness used by enable predicates.
///
/// `null` is false; booleans are themselves; numbers are true when non-zero;
/// strings, arrays and objects are true when non-empty.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn lookup_in<'a>(map: &'a BTreeMap<String, Value>) -> impl Fn(&str) -> Option<&'a Value> + 'a {
        move |key| map.get(key)
    }

    #[derive(Deserialize)]
    struct Holder {
        enabled_when: Predicate,
    }

    fn parse(toml_src: &str) -> Predicate {
        toml::from_str::<Holder>(toml_src)
            .expect("parse predicate")
            .enabled_when
    }

    #[test]
    fn parses_every_predicate_form_from_toml() {
        assert_eq!(
            parse(r#"enabled_when = "flag_x""#),
            Predicate::Key("flag_x".to_string())
        );
        assert!(matches!(
            parse(r#"enabled_when = { not = "flag_x" }"#),
            Predicate::Not { .. }
        ));
        assert!(matches!(
            parse(r#"enabled_when = { all = ["a", { any = ["b", "c"] }] }"#),
            Predicate::All { .. }
        ));
        assert!(matches!(
            parse(r#"enabled_when = { equals = { key = "target", value = "h7" } }"#),
            Predicate::Equals { .. }
        ));
    }

    #[test]
    fn key_predicate_uses_truthiness() {
        let mut map = BTreeMap::new();
        map.insert("on".to_string(), json!(true));
        map.insert("off".to_string(), json!(false));
        map.insert("zero".to_string(), json!(0));
        map.insert("name".to_string(), json!("x"));
        let lookup = lookup_in(&map);

        assert!(Predicate::Key("on".into()).evaluate_with(&lookup));
        assert!(!Predicate::Key("off".into()).evaluate_with(&lookup));
        assert!(!Predicate::Key("zero".into()).evaluate_with(&lookup));
        assert!(Predicate::Key("name".into()).evaluate_with(&lookup));
        assert!(!Predicate::Key("missing".into()).evaluate_with(&lookup));
    }

    #[test]
    fn combinators_compose() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), json!(true));
        map.insert("target".to_string(), json!("h7"));
        let lookup = lookup_in(&map);

        let pred = parse(
            r#"enabled_when = { all = ["a", { not = "b" }, { equals = { key = "target", value = "h7" } }] }"#,
        );
        assert!(pred.evaluate_with(&lookup));

        let pred = parse(r#"enabled_when = { any = ["b", { equals = { key = "target", value = "f4" } }] }"#);
        assert!(!pred.evaluate_with(&lookup));
    }

    #[test]
    fn keys_are_collected_in_declaration_order() {
        let pred = parse(
            r#"enabled_when = { all = ["a", { not = "b" }, { equals = { key = "c.d", value = 1 } }] }"#,
        );
        assert_eq!(pred.keys(), vec!["a", "b", "c.d"]);
    }

    #[test]
    fn truthiness_of_collections() {
        assert!(!truthy(&json!([])));
        assert!(truthy(&json!([1])));
        assert!(!truthy(&json!({})));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&Value::Null));
        assert!(truthy(&json!(0.5)));
    }
}
