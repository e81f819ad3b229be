//! CWL Renderer
//!
//! Renders the lowered step records as a single `cwlVersion: v1.2`
//! document whose `$graph` holds the workflow plus one `CommandLineTool`
//! per distinct method. Repeat rules scatter over per-value inputs and
//! output path strings (dotproduct across ports); expanding tools emit
//! `File[]` outputs collected by glob; reducing tools take `File[]` joined
//! with commas on the command line. The companion document supplies every
//! workflow-level input: config literals, wildcard value lists, root input
//! files, and the concrete output path strings.

use chrono::Local;
use serde_yaml::{Mapping, Value};

use super::ir::{self, StepRecord};
use super::ExportArtifact;
use crate::workflow::error::WorkflowError;
use crate::workflow::schema::ParamValue;
use crate::workflow::wildcards::{extract_wildcard_names, substitute_wildcards};
use crate::workflow::workflow::Workflow;

fn s(text: impl Into<String>) -> Value {
    Value::String(text.into())
}

fn map(entries: Vec<(Value, Value)>) -> Value {
    Value::Mapping(entries.into_iter().collect::<Mapping>())
}

fn cwl_scalar_type(value: &ParamValue) -> &'static str {
    match value {
        ParamValue::Bool(_) => "boolean",
        ParamValue::Int(_) => "long",
        ParamValue::Float(_) => "double",
        // lists travel as one comma-joined string, matching the CLI contract
        ParamValue::Str(_) | ParamValue::List(_) => "string",
    }
}

fn param_default(value: &ParamValue) -> Value {
    match value {
        ParamValue::List(_) => s(value.to_string()),
        other => serde_yaml::to_value(other).unwrap_or(Value::Null),
    }
}

/// `File` wrapped in as many array layers as the step semantics demand.
fn file_type(layers: usize) -> Value {
    let mut ty = s("File");
    for _ in 0..layers {
        ty = map(vec![(s("type"), s("array")), (s("items"), ty)]);
    }
    ty
}

fn step_expands_field(step: &StepRecord, template: &str) -> bool {
    step.expand
        .as_ref()
        .map(|e| extract_wildcard_names(template).contains(&e.wildcard))
        .unwrap_or(false)
}

fn step_reduces_field(step: &StepRecord, field: &str) -> bool {
    step.reduce
        .as_ref()
        .map(|r| r.fields.iter().any(|f| f == field))
        .unwrap_or(false)
}

/// The producing step and output field for an input template, if any
/// earlier step declares a matching output.
fn find_producer<'a>(
    earlier: &'a [StepRecord],
    template: &str,
) -> Option<(&'a StepRecord, &'a ir::FieldBinding)> {
    earlier
        .iter()
        .rev()
        .find_map(|step| step.output_matching(template).map(|out| (step, out)))
}

/// Concrete strings for a template over its repeat tokens, expand token
/// kept (the method substitutes it at run time).
fn path_strings(
    workflow: &Workflow,
    template: &str,
    repeat: &[String],
) -> Result<Vec<String>, WorkflowError> {
    let over: Vec<String> = extract_wildcard_names(template)
        .into_iter()
        .filter(|n| repeat.contains(n))
        .collect();
    Ok(workflow
        .wildcards()
        .product(&over)?
        .iter()
        .map(|combo| substitute_wildcards(template, combo))
        .collect())
}

/// One `CommandLineTool` per method, shaped by the first step using it.
fn render_tool(step: &StepRecord) -> Value {
    let mut inputs = Vec::new();
    for input in &step.inputs {
        let reduced = step_reduces_field(step, &input.field);
        let mut binding = vec![
            (s("prefix"), s(format!("-i {}=", input.field))),
            (s("separate"), Value::Bool(false)),
        ];
        if reduced {
            binding.push((s("itemSeparator"), s(",")));
        }
        inputs.push((
            s(input.field.clone()),
            map(vec![
                (s("type"), file_type(usize::from(reduced))),
                (s("inputBinding"), map(binding)),
            ]),
        ));
    }
    for output in &step.outputs {
        inputs.push((
            s(output.field.clone()),
            map(vec![
                (s("type"), s("string")),
                (
                    s("inputBinding"),
                    map(vec![
                        (s("prefix"), s(format!("-o {}=", output.field))),
                        (s("separate"), Value::Bool(false)),
                    ]),
                ),
            ]),
        ));
        if step_expands_field(step, &output.template) {
            // glob pattern input, not part of the command line
            inputs.push((
                s(format!("{}_glob", output.field)),
                map(vec![(s("type"), s("string"))]),
            ));
        }
    }
    for param in &step.params {
        inputs.push((
            s(param.field.clone()),
            map(vec![
                (s("type"), s(cwl_scalar_type(&param.value))),
                (
                    s("inputBinding"),
                    map(vec![
                        (s("prefix"), s(format!("-p {}=", param.field))),
                        (s("separate"), Value::Bool(false)),
                    ]),
                ),
            ]),
        ));
    }

    let mut outputs = Vec::new();
    for output in &step.outputs {
        let expanded = step_expands_field(step, &output.template);
        let glob = if expanded {
            format!("$(inputs.{}_glob)", output.field)
        } else {
            format!("$(inputs.{})", output.field)
        };
        outputs.push((
            s(format!("{}_file", output.field)),
            map(vec![
                (s("type"), file_type(usize::from(expanded))),
                (s("outputBinding"), map(vec![(s("glob"), s(glob))])),
            ]),
        ));
    }

    map(vec![
        (s("class"), s("CommandLineTool")),
        (s("id"), s(step.method.clone())),
        (
            s("baseCommand"),
            Value::Sequence(vec![s("flowforge"), s(step.method.clone())]),
        ),
        (s("inputs"), map(inputs)),
        (s("outputs"), map(outputs)),
    ])
}

struct WorkflowDoc {
    inputs: Vec<(Value, Value)>,
    outputs: Vec<(Value, Value)>,
    steps: Vec<(Value, Value)>,
    values: Mapping,
}

fn render_workflow(
    workflow: &Workflow,
    steps: &[StepRecord],
) -> Result<WorkflowDoc, WorkflowError> {
    let mut doc = WorkflowDoc {
        inputs: Vec::new(),
        outputs: Vec::new(),
        steps: Vec::new(),
        values: Mapping::new(),
    };

    for (key, value) in workflow.config() {
        doc.inputs.push((
            s(key.clone()),
            map(vec![(s("type"), s(cwl_scalar_type(value)))]),
        ));
        doc.values
            .insert(s(key.clone()), param_default(value));
    }
    for (name, values) in workflow.wildcards().iter() {
        let id = format!("{name}_values");
        doc.inputs
            .push((s(id.clone()), map(vec![(s("type"), s("string[]"))])));
        doc.values.insert(
            s(id),
            Value::Sequence(values.iter().map(|v| s(v.clone())).collect()),
        );
    }

    for (index, step) in steps.iter().enumerate() {
        let scattered = !step.repeat.is_empty();
        let mut in_ports = Vec::new();
        let mut scatter_ports = Vec::new();

        for input in &step.inputs {
            let reduced = step_reduces_field(step, &input.field);
            let carries_repeat = extract_wildcard_names(&input.template)
                .iter()
                .any(|n| step.repeat.contains(n));

            if let Some((producer, out)) = find_producer(&steps[..index], &input.template) {
                in_ports.push((
                    s(input.field.clone()),
                    s(format!("{}/{}_file", producer.id, out.field)),
                ));
            } else {
                // root input supplied through the companion document
                let id = format!("{}_{}", step.id, input.field);
                let layers = usize::from(reduced || carries_repeat);
                doc.inputs
                    .push((s(id.clone()), map(vec![(s("type"), file_type(layers))])));

                let over = if reduced {
                    step.reduce
                        .as_ref()
                        .map(|r| vec![r.wildcard.clone()])
                        .unwrap_or_default()
                } else {
                    step.repeat.clone()
                };
                let paths = {
                    let over: Vec<String> = extract_wildcard_names(&input.template)
                        .into_iter()
                        .filter(|n| over.contains(n))
                        .collect();
                    workflow
                        .wildcards()
                        .product(&over)?
                        .iter()
                        .map(|combo| substitute_wildcards(&input.template, combo))
                        .collect::<Vec<_>>()
                };
                let file_obj = |p: &String| {
                    map(vec![(s("class"), s("File")), (s("path"), s(p.clone()))])
                };
                let value = if layers > 0 {
                    Value::Sequence(paths.iter().map(file_obj).collect())
                } else {
                    paths.first().map(file_obj).unwrap_or(Value::Null)
                };
                doc.values.insert(s(id.clone()), value);
                in_ports.push((s(input.field.clone()), s(id)));
            }
            if carries_repeat && !reduced {
                scatter_ports.push(input.field.clone());
            }
        }

        for output in &step.outputs {
            let id = format!("{}_{}_path", step.id, output.field);
            let paths = path_strings(workflow, &output.template, &step.repeat)?;
            let ty = if scattered { "string[]" } else { "string" };
            doc.inputs
                .push((s(id.clone()), map(vec![(s("type"), s(ty))])));
            doc.values.insert(
                s(id.clone()),
                if scattered {
                    Value::Sequence(paths.iter().map(|p| s(p.clone())).collect())
                } else {
                    paths.first().map(|p| s(p.clone())).unwrap_or(Value::Null)
                },
            );
            in_ports.push((s(output.field.clone()), s(id)));
            if scattered {
                scatter_ports.push(output.field.clone());
            }

            if step_expands_field(step, &output.template) {
                let glob_id = format!("{}_{}_glob", step.id, output.field);
                let wildcard = step.expand.as_ref().map(|e| e.wildcard.clone());
                let globs: Vec<String> = paths
                    .iter()
                    .map(|p| match &wildcard {
                        Some(w) => p.replace(&format!("{{{w}}}"), "*"),
                        None => p.clone(),
                    })
                    .collect();
                doc.inputs
                    .push((s(glob_id.clone()), map(vec![(s("type"), s(ty))])));
                doc.values.insert(
                    s(glob_id.clone()),
                    if scattered {
                        Value::Sequence(globs.iter().map(|g| s(g.clone())).collect())
                    } else {
                        globs.first().map(|g| s(g.clone())).unwrap_or(Value::Null)
                    },
                );
                in_ports.push((s(format!("{}_glob", output.field)), s(glob_id)));
                if scattered {
                    scatter_ports.push(format!("{}_glob", output.field));
                }
            }
        }

        for param in &step.params {
            in_ports.push((
                s(param.field.clone()),
                map(vec![(s("default"), param_default(&param.value))]),
            ));
        }

        let mut body = vec![
            (s("run"), s(format!("#{}", step.method))),
            (s("in"), map(in_ports)),
            (
                s("out"),
                Value::Sequence(
                    step.outputs
                        .iter()
                        .map(|o| s(format!("{}_file", o.field)))
                        .collect(),
                ),
            ),
        ];
        if !scatter_ports.is_empty() {
            body.insert(
                1,
                (
                    s("scatter"),
                    Value::Sequence(scatter_ports.iter().map(|p| s(p.clone())).collect()),
                ),
            );
            if scatter_ports.len() > 1 {
                body.insert(2, (s("scatterMethod"), s("dotproduct")));
            }
        }
        doc.steps.push((s(step.id.clone()), map(body)));

        for output in &step.outputs {
            let expanded = step_expands_field(step, &output.template);
            let layers = usize::from(expanded) + usize::from(scattered);
            doc.outputs.push((
                s(format!("{}_{}", step.id, output.field)),
                map(vec![
                    (s("type"), file_type(layers)),
                    (
                        s("outputSource"),
                        s(format!("{}/{}_file", step.id, output.field)),
                    ),
                ]),
            ));
        }
    }

    Ok(doc)
}

/// Renders a finalized workflow as a CWL v1.2 `$graph` document.
pub fn render(workflow: &Workflow) -> Result<ExportArtifact, WorkflowError> {
    let steps = ir::lower(workflow, "cwl")?;
    let doc = render_workflow(workflow, &steps)?;

    let mut requirements = vec![(s("MultipleInputFeatureRequirement"), map(vec![]))];
    if steps.iter().any(|step| !step.repeat.is_empty()) {
        requirements.insert(0, (s("ScatterFeatureRequirement"), map(vec![])));
    }

    let main = map(vec![
        (s("class"), s("Workflow")),
        (s("id"), s("main")),
        (s("requirements"), map(requirements)),
        (s("inputs"), map(doc.inputs)),
        (s("outputs"), map(doc.outputs)),
        (s("steps"), map(doc.steps)),
    ]);

    // one tool per distinct method
    let mut tools: Vec<Value> = Vec::new();
    let mut seen: Vec<&str> = Vec::new();
    for step in &steps {
        if seen.contains(&step.method.as_str()) {
            continue;
        }
        seen.push(&step.method);
        tools.push(render_tool(step));
    }

    let mut graph = vec![main];
    graph.extend(tools);
    let document = map(vec![
        (s("cwlVersion"), s("v1.2")),
        (s("$graph"), Value::Sequence(graph)),
    ]);

    let pipeline = format!(
        "#!/usr/bin/env cwl-runner\n# Pipeline generated by {} v{} on {}\n# Workflow: {}\n{}",
        crate::APP_NAME,
        crate::VERSION,
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        workflow.name(),
        serde_yaml::to_string(&document)?
    );
    let values = serde_yaml::to_string(&Value::Mapping(doc.values))?;

    Ok(ExportArtifact { pipeline, values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::method::testing::*;
    use crate::workflow::schema::{Kwarg, Kwargs};

    fn kwargs(pairs: &[(&str, &str)]) -> Kwargs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Kwarg::from(*v)))
            .collect()
    }

    fn pipeline_workflow() -> Workflow {
        let mut wf = Workflow::new("flood_risk", ".");
        wf.set_wildcard("region", &["r1".to_string(), "r2".to_string()])
            .unwrap();
        wf.create_rule(
            CopyMethod::arc("clip"),
            &kwargs(&[("src", "data/{region}.geojson"), ("dst", "model/{region}/x.inp")]),
            None,
        )
        .unwrap();
        wf.create_rule(
            EnumerateMethod::arc("event", &["0002", "0005"]),
            &kwargs(&[("source", "in.csv"), ("event_csv", "event/{event}.csv")]),
            None,
        )
        .unwrap();
        wf.create_rule(
            ConcatMethod::arc(),
            &kwargs(&[("events", "event/{event}.csv"), ("combined", "all.csv")]),
            None,
        )
        .unwrap();
        wf
    }

    fn parse(artifact: &ExportArtifact) -> (serde_yaml::Value, serde_yaml::Value) {
        // strip the leading comment lines before parsing
        let body: String = artifact
            .pipeline
            .lines()
            .filter(|l| !l.starts_with('#'))
            .collect::<Vec<_>>()
            .join("\n");
        (
            serde_yaml::from_str(&body).unwrap(),
            serde_yaml::from_str(&artifact.values).unwrap(),
        )
    }

    #[test]
    fn test_graph_holds_workflow_and_tools() {
        let artifact = render(&pipeline_workflow()).unwrap();
        let (doc, _) = parse(&artifact);
        assert_eq!(doc["cwlVersion"], "v1.2");
        let graph = doc["$graph"].as_sequence().unwrap();
        assert_eq!(graph.len(), 4); // main + three tools
        assert_eq!(graph[0]["class"], "Workflow");
        assert_eq!(graph[1]["id"], "clip");
    }

    #[test]
    fn test_repeat_step_scatters() {
        let artifact = render(&pipeline_workflow()).unwrap();
        let (doc, values) = parse(&artifact);
        let step = &doc["$graph"][0]["steps"]["clip"];
        let scatter = step["scatter"].as_sequence().unwrap();
        assert!(scatter.contains(&serde_yaml::Value::String("src".to_string())));
        assert!(scatter.contains(&serde_yaml::Value::String("dst".to_string())));
        assert_eq!(step["scatterMethod"], "dotproduct");
        // per-region concrete paths in the companion document
        assert_eq!(values["clip_dst_path"][0], "model/r1/x.inp");
        assert_eq!(values["clip_src"][1]["path"], "data/r2.geojson");
    }

    #[test]
    fn test_expand_tool_emits_file_array() {
        let artifact = render(&pipeline_workflow()).unwrap();
        let (doc, values) = parse(&artifact);
        let tool = &doc["$graph"][2];
        assert_eq!(tool["id"], "enumerate_events");
        assert_eq!(
            tool["outputs"]["event_csv_file"]["type"]["items"],
            "File"
        );
        assert_eq!(values["enumerate_events_event_csv_glob"], "event/*.csv");
        assert_eq!(
            values["enumerate_events_event_csv_path"],
            "event/{event}.csv"
        );
    }

    #[test]
    fn test_reduce_step_gathers_from_producer() {
        let artifact = render(&pipeline_workflow()).unwrap();
        let (doc, _) = parse(&artifact);
        let step = &doc["$graph"][0]["steps"]["concat_events"];
        assert_eq!(step["in"]["events"], "enumerate_events/event_csv_file");
        let tool = &doc["$graph"][3];
        assert_eq!(tool["inputs"]["events"]["inputBinding"]["itemSeparator"], ",");
    }

    #[test]
    fn test_wildcard_values_in_companion() {
        let artifact = render(&pipeline_workflow()).unwrap();
        let (doc, values) = parse(&artifact);
        assert_eq!(
            doc["$graph"][0]["inputs"]["region_values"]["type"],
            "string[]"
        );
        assert_eq!(values["region_values"][0], "r1");
        assert_eq!(values["event_values"][1], "0005");
    }
}
