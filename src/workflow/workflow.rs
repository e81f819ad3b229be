//! Workflow Graph
//!
//! The workflow owns the config table, the wildcard registry, and the
//! ordered list of rules. Rules are appended through `create_rule`, which
//! validates the method, classifies its wildcards, checks output
//! uniqueness, and resolves dependencies in one step. Because every input
//! must already have a producer (or exist outside the graph), the rule
//! list is a topological order by construction and execution simply walks
//! it front to back.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::error::WorkflowError;
use super::method::{Method, MethodImpl, PathInput};
use super::reference::{parse_target, Component, Ref, RefTarget};
use super::rule::Rule;
use super::schema::{Kwarg, Kwargs, ParamValue};
use super::wildcards::Wildcards;
use crate::methods::MethodRegistry;

/// A composed rule graph with its config table and wildcard registry.
#[derive(Debug)]
pub struct Workflow {
    name: String,
    root: PathBuf,
    config: BTreeMap<String, ParamValue>,
    wildcards: Wildcards,
    rules: Vec<Rule>,
    /// Concrete output path -> producing rule id.
    outputs: BTreeMap<String, String>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        let name = name.into();
        info!("Created workflow '{}'", name);
        Self {
            name,
            root: root.into(),
            config: BTreeMap::new(),
            wildcards: Wildcards::new(),
            rules: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &BTreeMap<String, ParamValue> {
        &self.config
    }

    pub fn wildcards(&self) -> &Wildcards {
        &self.wildcards
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id() == id)
    }

    /// Sets a config value. Keys are write-once.
    pub fn set_config(
        &mut self,
        key: impl Into<String>,
        value: impl Into<ParamValue>,
    ) -> Result<(), WorkflowError> {
        let key = key.into();
        if self.config.contains_key(&key) {
            return Err(WorkflowError::DuplicateConfig(key));
        }
        debug!("Config '{}' set", key);
        self.config.insert(key, value.into());
        Ok(())
    }

    /// Registers a wildcard with explicit values.
    pub fn set_wildcard(&mut self, name: &str, values: &[String]) -> Result<(), WorkflowError> {
        self.wildcards.set(name, values)
    }

    /// Validates the method against its schema, classifies its wildcards,
    /// and appends the rule. The id defaults to the method name.
    ///
    /// Fails without modifying the workflow if the id or any concrete
    /// output is already taken, or if classification fails.
    pub fn create_rule(
        &mut self,
        imp: Arc<dyn MethodImpl>,
        kwargs: &Kwargs,
        id: Option<&str>,
    ) -> Result<&Rule, WorkflowError> {
        let id = id.unwrap_or_else(|| imp.name()).to_string();
        if self.rules.iter().any(|r| r.id() == id) {
            return Err(WorkflowError::DuplicateRule(id));
        }

        let method = Method::validate(imp, kwargs)?;

        // classify against a scratch registry so a failed rule leaves the
        // workflow untouched
        let mut wildcards = self.wildcards.clone();
        let mut rule = Rule::new(&id, method, &mut wildcards)?;

        let concrete_outputs = rule.concrete_outputs(&wildcards)?;
        for path in &concrete_outputs {
            if let Some(producer) = self.outputs.get(path) {
                return Err(WorkflowError::DuplicateOutput {
                    path: path.clone(),
                    rule: id,
                    producer: producer.clone(),
                });
            }
        }

        let mut dependencies = Vec::new();
        for path in rule.concrete_inputs(&wildcards)? {
            if let Some(owner) = self.outputs.get(&path) {
                if !dependencies.contains(owner) {
                    dependencies.push(owner.clone());
                }
            }
        }
        rule.dependencies = dependencies;

        self.wildcards = wildcards;
        for path in concrete_outputs {
            self.outputs.insert(path, id.clone());
        }
        info!(
            "Added rule '{}' (method '{}', depends on [{}])",
            id,
            rule.method().name(),
            rule.dependencies().join(", ")
        );
        self.rules.push(rule);
        Ok(self.rules.last().unwrap())
    }

    /// Like [`create_rule`](Self::create_rule), but takes raw values and
    /// resolves `$`-prefixed strings as cross references first.
    pub fn create_rule_from_kwargs(
        &mut self,
        imp: Arc<dyn MethodImpl>,
        raw: &BTreeMap<String, ParamValue>,
        id: Option<&str>,
    ) -> Result<&Rule, WorkflowError> {
        let mut kwargs = Kwargs::new();
        for (key, value) in raw {
            let kwarg = match value.as_str() {
                Some(s) if s.starts_with('$') => Kwarg::Ref(self.get_ref(s)?),
                _ => Kwarg::Value(value.clone()),
            };
            kwargs.insert(key.clone(), kwarg);
        }
        self.create_rule(imp, &kwargs, id)
    }

    /// Resolves a reference string against the current workflow state.
    pub fn get_ref(&self, reference: &str) -> Result<Ref, WorkflowError> {
        let unresolved = |reason: String| WorkflowError::UnresolvedReference {
            reference: reference.to_string(),
            reason,
        };

        let value = match parse_target(reference)? {
            RefTarget::Config(key) => self
                .config
                .get(&key)
                .cloned()
                .ok_or_else(|| unresolved(format!("config has no key '{}'", key)))?,
            RefTarget::Wildcard(name) => {
                let values = self.wildcards.get(&name)?;
                ParamValue::List(values.iter().map(|v| ParamValue::Str(v.clone())).collect())
            }
            RefTarget::Rule {
                rule_id,
                component,
                field,
            } => {
                let rule = self
                    .rule(&rule_id)
                    .ok_or_else(|| unresolved(format!("no rule '{}'", rule_id)))?;
                let method = rule.method();
                match component {
                    Component::Input => method
                        .input()
                        .get(&field)
                        .and_then(PathInput::as_single)
                        .map(ParamValue::from)
                        .ok_or_else(|| {
                            unresolved(format!("rule '{}' has no input '{}'", rule_id, field))
                        })?,
                    Component::Output => method
                        .output()
                        .get(&field)
                        .map(|p| ParamValue::Str(p.clone()))
                        .ok_or_else(|| {
                            unresolved(format!("rule '{}' has no output '{}'", rule_id, field))
                        })?,
                    Component::Params => method.params().get(&field).cloned().ok_or_else(|| {
                        unresolved(format!("rule '{}' has no param '{}'", rule_id, field))
                    })?,
                }
            }
        };
        Ok(Ref::new(reference, value))
    }

    /// Checks the graph without running anything: every concrete input not
    /// produced by another rule must already exist on disk. Returns the
    /// missing root inputs as warnings instead of raising.
    pub fn dryrun(&self) -> Vec<String> {
        let mut missing = Vec::new();
        for rule in &self.rules {
            // rules passed classification, so instantiation cannot fail
            let inputs = match rule.concrete_inputs(&self.wildcards) {
                Ok(inputs) => inputs,
                Err(_) => continue,
            };
            for path in inputs {
                if self.outputs.contains_key(&path) {
                    continue;
                }
                let file = Path::new(&path);
                let resolved = if file.is_absolute() {
                    file.to_path_buf()
                } else {
                    self.root.join(file)
                };
                if !resolved.is_file() && !missing.contains(&path) {
                    warn!("[dryrun] rule '{}': missing root input {}", rule.id(), path);
                    missing.push(path);
                }
            }
        }
        missing
    }

    /// Concrete output paths every rule would produce, in execution order.
    pub fn planned_outputs(&self) -> Result<Vec<String>, WorkflowError> {
        let mut planned = Vec::new();
        for rule in &self.rules {
            planned.extend(rule.concrete_outputs(&self.wildcards)?);
        }
        Ok(planned)
    }

    /// Runs every rule in registration order, bounding each rule's
    /// instances to `max_workers` parallel workers. Stops at the first
    /// failure.
    pub fn run(&self, max_workers: usize) -> Result<(), WorkflowError> {
        info!(
            "Running workflow '{}' ({} rules, up to {} workers)",
            self.name,
            self.rules.len(),
            max_workers
        );
        for rule in &self.rules {
            rule.run(&self.wildcards, &self.root, max_workers)?;
        }
        info!("Workflow '{}' finished", self.name);
        Ok(())
    }

    /// Serializes the workflow to its YAML document form.
    pub fn to_yaml(&self, path: &Path) -> Result<(), WorkflowError> {
        let doc = WorkflowDoc {
            name: self.name.clone(),
            config: self.config.clone(),
            wildcards: self.wildcards.clone(),
            rules: self
                .rules
                .iter()
                .map(|rule| RuleDoc {
                    id: Some(rule.id().to_string()),
                    method: rule.method().name().to_string(),
                    kwargs: rule.method().to_kwargs(),
                })
                .collect(),
        };
        std::fs::write(path, serde_yaml::to_string(&doc)?)?;
        Ok(())
    }

    /// Rebuilds a workflow from its YAML document, resolving methods
    /// through the given registry. Rules are recreated in document order,
    /// re-running the full validation pipeline.
    pub fn from_yaml(
        path: &Path,
        root: impl Into<PathBuf>,
        registry: &MethodRegistry,
    ) -> Result<Self, WorkflowError> {
        let doc: WorkflowDoc = serde_yaml::from_str(&std::fs::read_to_string(path)?)?;

        let mut workflow = Workflow::new(doc.name, root);
        for (key, value) in doc.config {
            workflow.set_config(key, value)?;
        }
        for (name, values) in doc.wildcards.iter() {
            let values = values.to_vec();
            workflow.set_wildcard(name, &values)?;
        }
        for rule in doc.rules {
            let imp = registry.get(&rule.method)?;
            workflow.create_rule_from_kwargs(imp, &rule.kwargs, rule.id.as_deref())?;
        }
        Ok(workflow)
    }

    /// Writes the workflow as a Snakemake pipeline plus companion config.
    pub fn to_snakemake(&self, path: &Path) -> Result<(), WorkflowError> {
        let companion = crate::export::ExportArtifact::companion_path(path);
        let companion = companion
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("config.yml")
            .to_string();
        crate::export::snakemake::render(self, &companion)?.write(path)
    }

    /// Writes the workflow as a CWL pipeline plus companion config.
    pub fn to_cwl(&self, path: &Path) -> Result<(), WorkflowError> {
        crate::export::cwl::render(self)?.write(path)
    }
}

#[derive(Serialize, Deserialize)]
struct WorkflowDoc {
    name: String,
    #[serde(default)]
    config: BTreeMap<String, ParamValue>,
    #[serde(default)]
    wildcards: Wildcards,
    #[serde(default)]
    rules: Vec<RuleDoc>,
}

#[derive(Serialize, Deserialize)]
struct RuleDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    method: String,
    kwargs: BTreeMap<String, ParamValue>,
}
