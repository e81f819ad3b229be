//! Shared Export Lowering
//!
//! Folds a finalized workflow into flat step records that both renderers
//! consume. All expressibility checks happen here so the two formats
//! reject exactly the same graphs:
//!
//! - a rule reducing over more than one wildcard,
//! - a rule that both expands and reduces,
//! - a reduce input field whose template mixes the reduce token with a
//!   repeat token (neither target can scatter and gather across
//!   independent axes in one field).

use crate::workflow::error::WorkflowError;
use crate::workflow::method::PathInput;
use crate::workflow::rule::Rule;
use crate::workflow::schema::ParamValue;
use crate::workflow::wildcards::extract_wildcard_names;
use crate::workflow::workflow::Workflow;

/// One input or output port of a step: the path template with tokens kept,
/// plus the reference it was supplied through, if any.
#[derive(Debug, Clone)]
pub struct FieldBinding {
    pub field: String,
    pub template: String,
    pub reference: Option<String>,
}

/// One parameter of a step.
#[derive(Debug, Clone)]
pub struct ParamBinding {
    pub field: String,
    pub value: ParamValue,
    pub reference: Option<String>,
}

/// The wildcard a step introduces, with its declared values.
#[derive(Debug, Clone)]
pub struct ExpandBinding {
    pub wildcard: String,
    pub values: Vec<String>,
}

/// The wildcard a step aggregates over, with the input fields carrying it.
#[derive(Debug, Clone)]
pub struct ReduceBinding {
    pub wildcard: String,
    pub values: Vec<String>,
    pub fields: Vec<String>,
}

/// A rule flattened for rendering.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub id: String,
    pub method: String,
    pub inputs: Vec<FieldBinding>,
    pub outputs: Vec<FieldBinding>,
    pub params: Vec<ParamBinding>,
    /// Repeat wildcards, registry order.
    pub repeat: Vec<String>,
    pub expand: Option<ExpandBinding>,
    pub reduce: Option<ReduceBinding>,
}

impl StepRecord {
    /// Finds the output binding whose template matches, for dependency
    /// wiring through path templates.
    pub fn output_matching(&self, template: &str) -> Option<&FieldBinding> {
        self.outputs.iter().find(|b| b.template == template)
    }

    /// Concrete output paths of this step, expanded over its repeat and
    /// expand wildcards.
    pub fn concrete_outputs(
        &self,
        workflow: &Workflow,
    ) -> Result<Vec<String>, WorkflowError> {
        workflow
            .rule(&self.id)
            .map(|rule| rule.concrete_outputs(workflow.wildcards()))
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

fn lower_rule(rule: &Rule, workflow: &Workflow, format: &str) -> Result<StepRecord, WorkflowError> {
    let unsupported = |reason: String| WorkflowError::UnsupportedConstruct {
        rule: rule.id().to_string(),
        format: format.to_string(),
        reason,
    };

    if rule.reduce_wildcards().len() > 1 {
        return Err(unsupported(format!(
            "reduces over {} wildcards; only one aggregation axis is expressible",
            rule.reduce_wildcards().len()
        )));
    }
    if rule.expand_wildcard().is_some() && !rule.reduce_wildcards().is_empty() {
        return Err(unsupported(
            "expands and reduces in the same rule".to_string(),
        ));
    }

    let method = rule.method();
    let mut inputs = Vec::new();
    for (field, slot) in method.input() {
        let template = match slot {
            PathInput::Single(t) => t.clone(),
            // base methods only carry templates; aggregates exist on instances
            PathInput::Aggregate(_) => continue,
        };
        inputs.push(FieldBinding {
            field: field.clone(),
            template,
            reference: method.refs().get(field).cloned(),
        });
    }
    let outputs: Vec<FieldBinding> = method
        .output()
        .iter()
        .map(|(field, template)| FieldBinding {
            field: field.clone(),
            template: template.clone(),
            reference: method.refs().get(field).cloned(),
        })
        .collect();
    let params: Vec<ParamBinding> = method
        .params()
        .iter()
        .map(|(field, value)| ParamBinding {
            field: field.clone(),
            value: value.clone(),
            reference: method.refs().get(field).cloned(),
        })
        .collect();

    let expand = match rule.expand_wildcard() {
        Some(name) => Some(ExpandBinding {
            wildcard: name.to_string(),
            values: workflow.wildcards().get(name)?.to_vec(),
        }),
        None => None,
    };

    let reduce = match rule.reduce_wildcards().first() {
        Some(name) => {
            let mut fields = Vec::new();
            for binding in &inputs {
                let names = extract_wildcard_names(&binding.template);
                if !names.iter().any(|n| n == name) {
                    continue;
                }
                if let Some(repeat) = names.iter().find(|n| rule.repeat_wildcards().contains(n)) {
                    return Err(unsupported(format!(
                        "input '{}' mixes reduce wildcard '{}' with repeat wildcard '{}'",
                        binding.field, name, repeat
                    )));
                }
                fields.push(binding.field.clone());
            }
            Some(ReduceBinding {
                wildcard: name.to_string(),
                values: workflow.wildcards().get(name)?.to_vec(),
                fields,
            })
        }
        None => None,
    };

    Ok(StepRecord {
        id: rule.id().to_string(),
        method: method.name().to_string(),
        inputs,
        outputs,
        params,
        repeat: rule.repeat_wildcards().to_vec(),
        expand,
        reduce,
    })
}

/// Lowers every rule of a finalized workflow, in registration order.
pub fn lower(workflow: &Workflow, format: &str) -> Result<Vec<StepRecord>, WorkflowError> {
    workflow
        .rules()
        .iter()
        .map(|rule| lower_rule(rule, workflow, format))
        .collect()
}
