//! JSON manifest wire format: one registry's worth of named rules, each a
//! tree of leaf/and/or/not/ref nodes.
//!
//! `LogicNode` is parsed by hand rather than derived: a leaf's shape
//! depends on `rule_def_name`, a string that names a rule registered at
//! runtime and is never known to `serde`'s derive at compile time. We parse
//! into [`serde_json::Value`] first and walk it ourselves, the way
//! `ast-grep`'s rule-config loader resolves a referent rule by name before
//! it can even validate the rest of the node.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::LinkError;

/// One registry's worth of rule definitions, as received from the outside
/// world.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub registry: String,
    pub rules: BTreeMap<String, Value>,
}

impl Manifest {
    /// Parse `rules` from raw JSON values into [`LogicNode`] trees,
    /// reporting the first malformed rule's id alongside the reason.
    pub(crate) fn parse_nodes(&self) -> Result<BTreeMap<String, LogicNode>, LinkError> {
        let mut out = BTreeMap::new();
        for (rule_id, raw) in &self.rules {
            let node = LogicNode::from_value(raw).map_err(|reason| LinkError::ManifestValidation {
                rule_id: rule_id.clone(),
                reason,
            })?;
            out.insert(rule_id.clone(), node);
        }
        Ok(out)
    }
}

/// A parsed manifest node. Mirrors [`crate::ast::Node`] but is not yet
/// linked: leaves carry a rule name to be resolved against a registry, and
/// `Ref` carries a rule id to be resolved against the same manifest.
#[derive(Debug, Clone)]
pub enum LogicNode {
    Leaf { rule_def_name: String, params: BTreeMap<String, Value> },
    And(Vec<LogicNode>),
    Or(Vec<LogicNode>),
    Not(Box<LogicNode>),
    Ref { ref_id: String },
}

impl LogicNode {
    fn from_value(value: &Value) -> Result<Self, String> {
        let obj = value.as_object().ok_or("rule node must be a JSON object")?;
        let node_type = obj
            .get("node_type")
            .and_then(Value::as_str)
            .ok_or("rule node missing string field 'node_type'")?;

        match node_type {
            "leaf" => {
                let rule = obj
                    .get("rule")
                    .and_then(Value::as_object)
                    .ok_or("leaf node missing object field 'rule'")?;
                let rule_def_name = rule
                    .get("rule_def_name")
                    .and_then(Value::as_str)
                    .ok_or("leaf rule missing string field 'rule_def_name'")?
                    .to_string();
                let mut params = BTreeMap::new();
                for (key, val) in rule {
                    if key == "rule_def_name" {
                        continue;
                    }
                    params.insert(key.clone(), val.clone());
                }
                Ok(LogicNode::Leaf { rule_def_name, params })
            }
            "and" => Ok(LogicNode::And(Self::rules_of(obj, "and")?)),
            "or" => Ok(LogicNode::Or(Self::rules_of(obj, "or")?)),
            "not" => {
                let child = obj.get("rule").ok_or("not node missing field 'rule'")?;
                Ok(LogicNode::Not(Box::new(Self::from_value(child)?)))
            }
            "ref" => {
                let ref_id = obj
                    .get("ref_id")
                    .and_then(Value::as_str)
                    .ok_or("ref node missing string field 'ref_id'")?
                    .to_string();
                Ok(LogicNode::Ref { ref_id })
            }
            other => Err(format!("unknown node_type '{other}'")),
        }
    }

    fn rules_of(
        obj: &serde_json::Map<String, Value>,
        op: &'static str,
    ) -> Result<Vec<LogicNode>, String> {
        let rules = obj
            .get("rules")
            .and_then(Value::as_array)
            .ok_or_else(|| format!("{op} node missing array field 'rules'"))?;
        if rules.len() < 2 {
            return Err(format!("{op} node needs at least two rules, got {}", rules.len()));
        }
        rules.iter().map(Self::from_value).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(json: &str) -> Manifest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_leaf_with_params() {
        let m = manifest(
            r#"{"registry": "people", "rules": {"adult": {"node_type": "leaf", "rule": {"rule_def_name": "is_adult", "min_age": 18}}}}"#,
        );
        let nodes = m.parse_nodes().unwrap();
        match &nodes["adult"] {
            LogicNode::Leaf { rule_def_name, params } => {
                assert_eq!(rule_def_name, "is_adult");
                assert_eq!(params.get("min_age").unwrap(), &Value::from(18));
            }
            _ => panic!("expected leaf"),
        }
    }

    #[test]
    fn parses_nested_and_or_not_ref() {
        let m = manifest(
            r#"{
                "registry": "people",
                "rules": {
                    "combined": {
                        "node_type": "and",
                        "rules": [
                            {"node_type": "not", "rule": {"node_type": "ref", "ref_id": "banned"}},
                            {"node_type": "or", "rules": [
                                {"node_type": "leaf", "rule": {"rule_def_name": "is_adult"}},
                                {"node_type": "leaf", "rule": {"rule_def_name": "has_waiver"}}
                            ]}
                        ]
                    }
                }
            }"#,
        );
        let nodes = m.parse_nodes().unwrap();
        match &nodes["combined"] {
            LogicNode::And(children) => assert_eq!(children.len(), 2),
            _ => panic!("expected and"),
        }
    }

    #[test]
    fn rejects_and_with_one_child() {
        let m = manifest(
            r#"{"registry": "r", "rules": {"bad": {"node_type": "and", "rules": [
                {"node_type": "leaf", "rule": {"rule_def_name": "x"}}
            ]}}}"#,
        );
        let err = m.parse_nodes().unwrap_err();
        assert!(matches!(err, LinkError::ManifestValidation { .. }));
    }

    #[test]
    fn rejects_unknown_node_type() {
        let m = manifest(r#"{"registry": "r", "rules": {"bad": {"node_type": "xor"}}}"#);
        assert!(m.parse_nodes().is_err());
    }
}
