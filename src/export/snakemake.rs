//! Snakemake Renderer
//!
//! Renders the lowered step records as a Snakefile plus companion config.
//! Repeat wildcards stay `{name}` so Snakemake matches them itself; expand
//! and reduce fields become `expand(...)` calls over the value lists the
//! companion file carries. Dependencies are never emitted explicitly:
//! Snakemake infers them from matching paths, exactly as the core does.

use std::fmt::Write as _;

use chrono::Local;
use serde_yaml::{Mapping, Value};

use super::ir::{self, FieldBinding, StepRecord};
use super::ExportArtifact;
use crate::workflow::error::WorkflowError;
use crate::workflow::reference::{parse_target, Component, RefTarget};
use crate::workflow::schema::ParamValue;
use crate::workflow::wildcards::extract_wildcard_names;
use crate::workflow::workflow::Workflow;

/// Python-side variable holding a wildcard's value list.
fn wildcard_var(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Escapes the given tokens to `{{name}}` so Snakemake passes them through.
fn escape_tokens(template: &str, names: &[String]) -> String {
    let mut out = template.to_string();
    for name in names {
        out = out.replace(&format!("{{{name}}}"), &format!("{{{{{name}}}}}"));
    }
    out
}

/// An `expand("tpl", name=NAME, ...)` call over the given wildcards; any
/// other token in the template is escaped and left to Snakemake.
fn expand_call(template: &str, over: &[String]) -> String {
    let passthrough: Vec<String> = extract_wildcard_names(template)
        .into_iter()
        .filter(|n| !over.contains(n))
        .collect();
    let tpl = escape_tokens(template, &passthrough);
    let args: Vec<String> = over
        .iter()
        .map(|n| format!("{}={}", n, wildcard_var(n)))
        .collect();
    format!("expand(\"{}\", {})", tpl, args.join(", "))
}

/// A Python expression for a field binding: references render as config or
/// rule lookups, everything else as a quoted template.
fn field_expr(binding: &FieldBinding) -> Result<String, WorkflowError> {
    if let Some(reference) = &binding.reference {
        match parse_target(reference)? {
            RefTarget::Config(key) => return Ok(format!("config[\"{key}\"]")),
            RefTarget::Rule {
                rule_id,
                component: Component::Output,
                field,
            } => return Ok(format!("rules.{rule_id}.output.{field}")),
            // other targets were resolved to literals at build time
            _ => {}
        }
    }
    Ok(format!("\"{}\"", binding.template))
}

fn param_expr(binding: &ir::ParamBinding) -> Result<String, WorkflowError> {
    if let Some(reference) = &binding.reference {
        match parse_target(reference)? {
            RefTarget::Config(key) => return Ok(format!("config[\"{key}\"]")),
            RefTarget::Wildcard(name) => return Ok(wildcard_var(&name)),
            _ => {}
        }
    }
    Ok(python_literal(&binding.value))
}

fn python_literal(value: &ParamValue) -> String {
    match value {
        ParamValue::Bool(true) => "True".to_string(),
        ParamValue::Bool(false) => "False".to_string(),
        ParamValue::Int(i) => i.to_string(),
        ParamValue::Float(x) => x.to_string(),
        ParamValue::Str(s) => format!("\"{s}\""),
        ParamValue::List(items) => {
            let parts: Vec<String> = items.iter().map(python_literal).collect();
            format!("[{}]", parts.join(", "))
        }
    }
}

/// The generic shell invocation for one step.
fn shell_line(step: &StepRecord) -> String {
    let mut cmd = format!("flowforge {}", step.method);
    for input in &step.inputs {
        let _ = write!(cmd, " -i {}=\"{{input.{}}}\"", input.field, input.field);
    }
    for output in &step.outputs {
        let expanded = step
            .expand
            .as_ref()
            .map(|e| extract_wildcard_names(&output.template).contains(&e.wildcard))
            .unwrap_or(false);
        if expanded {
            // the method enumerates values itself, so it gets the raw template
            let names = extract_wildcard_names(&output.template);
            let _ = write!(
                cmd,
                " -o {}=\"{}\"",
                output.field,
                escape_tokens(&output.template, &names)
            );
        } else {
            let _ = write!(cmd, " -o {}=\"{{output.{}}}\"", output.field, output.field);
        }
    }
    for param in &step.params {
        let _ = write!(cmd, " -p {}=\"{{params.{}}}\"", param.field, param.field);
    }
    cmd
}

fn render_step(out: &mut String, step: &StepRecord) -> Result<(), WorkflowError> {
    writeln!(out, "rule {}:", step.id).ok();

    if !step.inputs.is_empty() {
        writeln!(out, "    input:").ok();
        for input in &step.inputs {
            let reduced = step
                .reduce
                .as_ref()
                .map(|r| r.fields.contains(&input.field))
                .unwrap_or(false);
            let expr = if reduced {
                let wildcard = step.reduce.as_ref().map(|r| r.wildcard.clone());
                expand_call(&input.template, &wildcard.into_iter().collect::<Vec<_>>())
            } else {
                field_expr(input)?
            };
            writeln!(out, "        {}={},", input.field, expr).ok();
        }
    }

    writeln!(out, "    output:").ok();
    for output in &step.outputs {
        let expanded = step
            .expand
            .as_ref()
            .filter(|e| extract_wildcard_names(&output.template).contains(&e.wildcard))
            .map(|e| e.wildcard.clone());
        let expr = match expanded {
            Some(wildcard) => expand_call(&output.template, &[wildcard]),
            None => field_expr(output)?,
        };
        writeln!(out, "        {}={},", output.field, expr).ok();
    }

    if !step.params.is_empty() {
        writeln!(out, "    params:").ok();
        for param in &step.params {
            writeln!(out, "        {}={},", param.field, param_expr(param)?).ok();
        }
    }

    writeln!(out, "    shell:").ok();
    writeln!(out, "        '{}'", shell_line(step)).ok();
    Ok(())
}

/// Renders a finalized workflow as a Snakefile referencing the given
/// companion file name in its `configfile:` directive.
pub fn render(workflow: &Workflow, companion: &str) -> Result<ExportArtifact, WorkflowError> {
    let steps = ir::lower(workflow, "snakemake")?;

    let mut out = String::new();
    writeln!(
        out,
        "# Pipeline generated by {} v{} on {}",
        crate::APP_NAME,
        crate::VERSION,
        Local::now().format("%Y-%m-%d %H:%M:%S")
    )
    .ok();
    writeln!(out, "# Workflow: {}\n", workflow.name()).ok();
    writeln!(out, "configfile: \"{companion}\"\n").ok();

    for (name, _) in workflow.wildcards().iter() {
        writeln!(
            out,
            "{} = config[\"wildcards\"][\"{}\"]",
            wildcard_var(name),
            name
        )
        .ok();
    }
    if !workflow.wildcards().is_empty() {
        writeln!(out).ok();
    }

    // target rule: every step's fully expanded outputs
    writeln!(out, "rule all:").ok();
    writeln!(out, "    input:").ok();
    for step in &steps {
        for output in &step.outputs {
            let names = extract_wildcard_names(&output.template);
            if names.is_empty() {
                writeln!(out, "        \"{}\",", output.template).ok();
            } else {
                writeln!(out, "        {},", expand_call(&output.template, &names)).ok();
            }
        }
    }
    writeln!(out).ok();

    for step in &steps {
        render_step(&mut out, step)?;
        writeln!(out).ok();
    }

    let values = render_values(workflow)?;
    Ok(ExportArtifact {
        pipeline: out,
        values,
    })
}

/// The companion document: wildcard value lists plus the config map.
fn render_values(workflow: &Workflow) -> Result<String, WorkflowError> {
    let mut wildcards = Mapping::new();
    for (name, values) in workflow.wildcards().iter() {
        wildcards.insert(
            Value::String(name.to_string()),
            Value::Sequence(
                values
                    .iter()
                    .map(|v| Value::String(v.clone()))
                    .collect(),
            ),
        );
    }

    let mut doc = Mapping::new();
    doc.insert(Value::String("wildcards".to_string()), Value::Mapping(wildcards));
    for (key, value) in workflow.config() {
        doc.insert(Value::String(key.clone()), serde_yaml::to_value(value)?);
    }
    Ok(serde_yaml::to_string(&Value::Mapping(doc))?)
}
