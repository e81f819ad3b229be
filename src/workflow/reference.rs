//! Cross References
//!
//! A reference is a deferred pointer to a workflow config value, a wildcard
//! value set, or another rule's parameter. References are written as
//! dot-separated strings (`$config.<key>`, `$wildcards.<name>`,
//! `$rules.<rule_id>.<component>.<field>`) and resolved to concrete values
//! at the moment a rule is created, never later.

use serde::{Deserialize, Serialize};

use super::error::WorkflowError;
use super::schema::ParamValue;

/// The parsed form of a reference string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    /// `$config.<key>`
    Config(String),
    /// `$wildcards.<name>`
    Wildcard(String),
    /// `$rules.<rule_id>.<component>.<field>` with component in
    /// input, output, or params.
    Rule {
        rule_id: String,
        component: Component,
        field: String,
    },
}

/// The section of a rule a reference points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Input,
    Output,
    Params,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Input => "input",
            Component::Output => "output",
            Component::Params => "params",
        }
    }
}

/// Parses a reference string into its target.
///
/// Fails with `UnresolvedReference` if the string is not one of the three
/// supported forms.
pub fn parse_target(reference: &str) -> Result<RefTarget, WorkflowError> {
    let invalid = |reason: &str| WorkflowError::UnresolvedReference {
        reference: reference.to_string(),
        reason: reason.to_string(),
    };

    let keys: Vec<&str> = reference.split('.').collect();
    match keys.as_slice() {
        ["$config", key] if !key.is_empty() => Ok(RefTarget::Config(key.to_string())),
        ["$config", ..] => Err(invalid("expected $config.<key>")),
        ["$wildcards", name] if !name.is_empty() => Ok(RefTarget::Wildcard(name.to_string())),
        ["$wildcards", ..] => Err(invalid("expected $wildcards.<name>")),
        ["$rules", rule_id, component, field] if !rule_id.is_empty() && !field.is_empty() => {
            let component = match *component {
                "input" => Component::Input,
                "output" => Component::Output,
                "params" => Component::Params,
                _ => {
                    return Err(invalid(
                        "component must be one of input, output, or params",
                    ))
                }
            };
            Ok(RefTarget::Rule {
                rule_id: rule_id.to_string(),
                component,
                field: field.to_string(),
            })
        }
        ["$rules", ..] => Err(invalid("expected $rules.<rule_id>.<component>.<field>")),
        _ => Err(invalid(
            "reference must start with $config, $wildcards, or $rules",
        )),
    }
}

/// A resolved cross reference: the original target string plus the concrete
/// value it pointed at when the rule was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ref {
    pub target: String,
    pub value: ParamValue,
}

impl Ref {
    pub fn new(target: impl Into<String>, value: ParamValue) -> Self {
        Self {
            target: target.into(),
            value,
        }
    }
}
