//! Rules and Wildcard Classification
//!
//! A rule binds a validated method into the graph under a unique id. At
//! creation time every wildcard token in the method's path templates is
//! classified against the registry and the method kind:
//!
//! - a token in both input and output templates repeats the rule per value,
//! - a token only in outputs must be the wildcard an expanding method
//!   declares, and registers its values,
//! - a token only in inputs aggregates all values into a reducing method's
//!   input list.
//!
//! Any other combination fails with `WildcardMismatch`, so an invalid rule
//! never enters a workflow.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use log::{debug, info};

use super::error::WorkflowError;
use super::method::{Method, MethodKind, PathInput};
use super::wildcards::{extract_wildcard_names, substitute_wildcards, Wildcards};

/// A method bound into the graph with classified wildcards and resolved
/// dependencies.
#[derive(Debug, Clone)]
pub struct Rule {
    id: String,
    method: Method,
    /// Wildcards repeating this rule, in registry order.
    repeat: Vec<String>,
    /// The wildcard this rule introduces, if its method expands.
    expand: Option<String>,
    /// Wildcards this rule aggregates over, in registry order.
    reduce: Vec<String>,
    /// Ids of rules producing this rule's inputs. Filled by the workflow.
    pub(crate) dependencies: Vec<String>,
}

impl Rule {
    /// Classifies the method's wildcards against the registry and builds
    /// the rule. An expanding method registers its wildcard here.
    pub fn new(
        id: impl Into<String>,
        method: Method,
        wildcards: &mut Wildcards,
    ) -> Result<Self, WorkflowError> {
        let id = id.into();

        let mut input_names: Vec<String> = Vec::new();
        for path in method.input_paths() {
            for name in extract_wildcard_names(path) {
                if !input_names.contains(&name) {
                    input_names.push(name);
                }
            }
        }
        let mut output_names: Vec<String> = Vec::new();
        for path in method.output_paths() {
            for name in extract_wildcard_names(path) {
                if !output_names.contains(&name) {
                    output_names.push(name);
                }
            }
        }

        let mismatch = |wildcard: &str, reason: &str| WorkflowError::WildcardMismatch {
            rule: id.clone(),
            wildcard: wildcard.to_string(),
            reason: reason.to_string(),
        };

        let declared = method.expand().map(|spec| spec.wildcard.clone());

        let mut repeat = Vec::new();
        let mut reduce = Vec::new();
        let mut expand = None;

        for name in &input_names {
            if output_names.contains(name) {
                // repeats: must already be registered
                if Some(name) == declared.as_ref() {
                    return Err(mismatch(name, "expanded wildcard cannot appear in inputs"));
                }
                if !wildcards.contains(name) {
                    return Err(mismatch(name, "wildcard is not registered"));
                }
                repeat.push(name.clone());
            } else {
                // input-only: aggregate, reducing methods only
                if method.kind() != MethodKind::Reducing {
                    return Err(mismatch(
                        name,
                        "input-only wildcard requires a reducing method",
                    ));
                }
                if !wildcards.contains(name) {
                    return Err(mismatch(name, "wildcard is not registered"));
                }
                reduce.push(name.clone());
            }
        }

        for name in &output_names {
            if input_names.contains(name) {
                continue;
            }
            // output-only: must be the declared expand wildcard
            match &declared {
                Some(w) if w == name => expand = Some(name.clone()),
                _ => {
                    return Err(mismatch(
                        name,
                        "output-only wildcard requires an expanding method declaring it",
                    ))
                }
            }
        }

        if let Some(spec) = method.expand() {
            if expand.is_none() {
                return Err(mismatch(
                    &spec.wildcard,
                    "declared wildcard does not appear in any output",
                ));
            }
            wildcards.set(&spec.wildcard, &spec.values)?;
        }
        if method.kind() == MethodKind::Reducing && reduce.is_empty() {
            return Err(mismatch(
                method.name(),
                "reducing method has no input-only wildcard",
            ));
        }

        // registry order drives instance and aggregation order
        let order = wildcards.names();
        repeat.sort_by_key(|n| order.iter().position(|o| o == n));
        reduce.sort_by_key(|n| order.iter().position(|o| o == n));

        debug!(
            "Rule '{}': repeat={:?} expand={:?} reduce={:?}",
            id, repeat, expand, reduce
        );

        Ok(Self {
            id,
            method,
            repeat,
            expand,
            reduce,
            dependencies: Vec::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn repeat_wildcards(&self) -> &[String] {
        &self.repeat
    }

    pub fn expand_wildcard(&self) -> Option<&str> {
        self.expand.as_deref()
    }

    pub fn reduce_wildcards(&self) -> &[String] {
        &self.reduce
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Number of concrete instances this rule executes as.
    pub fn instance_count(&self, wildcards: &Wildcards) -> Result<usize, WorkflowError> {
        Ok(self.instances(wildcards)?.len())
    }

    /// Builds the concrete method instances: one per combination of repeat
    /// wildcard values, with reduce inputs materialized as aggregate lists.
    pub fn instances(&self, wildcards: &Wildcards) -> Result<Vec<Method>, WorkflowError> {
        let combos = wildcards.product(&self.repeat)?;
        let mut instances = Vec::with_capacity(combos.len());
        for combo in combos {
            let mut instance = self.method.substitute(&combo);
            if !self.reduce.is_empty() {
                self.aggregate_inputs(&mut instance, wildcards)?;
            }
            instances.push(instance);
        }
        Ok(instances)
    }

    /// Expands reduce tokens left in an instance's inputs into per-value
    /// path lists, in registry order.
    fn aggregate_inputs(
        &self,
        instance: &mut Method,
        wildcards: &Wildcards,
    ) -> Result<(), WorkflowError> {
        let mut aggregated: Vec<(String, Vec<String>)> = Vec::new();
        for (field, slot) in instance.input() {
            let template = match slot {
                PathInput::Single(t) => t,
                PathInput::Aggregate(_) => continue,
            };
            let present: Vec<String> = self
                .reduce
                .iter()
                .filter(|n| extract_wildcard_names(template).contains(n))
                .cloned()
                .collect();
            if present.is_empty() {
                continue;
            }
            let paths: Vec<String> = wildcards
                .product(&present)?
                .iter()
                .map(|combo| substitute_wildcards(template, combo))
                .collect();
            aggregated.push((field.clone(), paths));
        }
        for (field, paths) in aggregated {
            instance.set_aggregate_input(&field, paths);
        }
        Ok(())
    }

    /// All concrete input paths across instances, deduplicated.
    pub fn concrete_inputs(&self, wildcards: &Wildcards) -> Result<Vec<String>, WorkflowError> {
        let mut paths: Vec<String> = Vec::new();
        for instance in self.instances(wildcards)? {
            for path in instance.input_paths() {
                if !paths.iter().any(|p| p.as_str() == path) {
                    paths.push(path.to_string());
                }
            }
        }
        Ok(paths)
    }

    /// All concrete output paths this rule produces, in instance order.
    ///
    /// For an expanding rule the output templates keep the new token; the
    /// concrete outputs expand over its declared values.
    pub fn concrete_outputs(&self, wildcards: &Wildcards) -> Result<Vec<String>, WorkflowError> {
        let mut over = self.repeat.clone();
        if let Some(name) = &self.expand {
            over.push(name.clone());
        }
        let mut paths = Vec::new();
        for combo in wildcards.product(&over)? {
            for template in self.method.output_paths() {
                let path = substitute_wildcards(template, &combo);
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
        Ok(paths)
    }

    /// Runs all instances with a bounded worker pool, failing fast on the
    /// first instance error.
    pub fn run(
        &self,
        wildcards: &Wildcards,
        root: &Path,
        max_workers: usize,
    ) -> Result<(), WorkflowError> {
        let instances = self.instances(wildcards)?;
        let total = instances.len();
        info!(
            "Running rule '{}' ({} instance{})",
            self.id,
            total,
            if total == 1 { "" } else { "s" }
        );

        let workers = max_workers.max(1).min(total.max(1));
        if workers <= 1 {
            for instance in &instances {
                instance.run_with_checks(root)?;
            }
            return Ok(());
        }

        let (job_tx, job_rx) = mpsc::channel::<Method>();
        let (result_tx, result_rx) = mpsc::channel::<Result<(), WorkflowError>>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let abort = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            let abort = Arc::clone(&abort);
            let root = root.to_path_buf();
            handles.push(thread::spawn(move || loop {
                let job = match job_rx.lock() {
                    Ok(rx) => rx.recv(),
                    Err(_) => break,
                };
                match job {
                    Ok(instance) => {
                        // once an instance fails, queued jobs are drained
                        // without running
                        if abort.load(Ordering::SeqCst) {
                            continue;
                        }
                        let outcome = instance.run_with_checks(&root);
                        if outcome.is_err() {
                            abort.store(true, Ordering::SeqCst);
                        }
                        if result_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }));
        }
        drop(result_tx);

        for instance in instances {
            // send only fails once all workers have exited
            if job_tx.send(instance).is_err() {
                break;
            }
        }
        drop(job_tx);

        let mut first_error = None;
        for outcome in result_rx {
            if let Err(err) = outcome {
                first_error = Some(err);
                break;
            }
        }
        for handle in handles {
            let _ = handle.join();
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
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

    fn registry() -> Wildcards {
        let mut wc = Wildcards::new();
        wc.set("region", &["r1".to_string(), "r2".to_string()])
            .unwrap();
        wc
    }

    #[test]
    fn test_repeat_classification() {
        let mut wc = registry();
        let method = Method::validate(
            CopyMethod::arc("clip"),
            &kwargs(&[("src", "data/{region}.geojson"), ("dst", "model/{region}.inp")]),
        )
        .unwrap();
        let rule = Rule::new("clip", method, &mut wc).unwrap();
        assert_eq!(rule.repeat_wildcards(), &["region"]);
        assert!(rule.expand_wildcard().is_none());
        assert!(rule.reduce_wildcards().is_empty());
        assert_eq!(rule.instance_count(&wc).unwrap(), 2);
    }

    #[test]
    fn test_unregistered_repeat_rejected() {
        let mut wc = Wildcards::new();
        let method = Method::validate(
            CopyMethod::arc("clip"),
            &kwargs(&[("src", "data/{region}.geojson"), ("dst", "model/{region}.inp")]),
        )
        .unwrap();
        let err = Rule::new("clip", method, &mut wc).unwrap_err();
        assert!(matches!(err, WorkflowError::WildcardMismatch { .. }));
        assert!(err.to_string().contains("region"));
    }

    #[test]
    fn test_expand_registers_wildcard() {
        let mut wc = Wildcards::new();
        let method = Method::validate(
            EnumerateMethod::arc("event", &["0002", "0005"]),
            &kwargs(&[("source", "in.csv"), ("event_csv", "event/{event}.csv")]),
        )
        .unwrap();
        let rule = Rule::new("events", method, &mut wc).unwrap();
        assert_eq!(rule.expand_wildcard(), Some("event"));
        assert_eq!(wc.get("event").unwrap(), &["0002", "0005"]);
        // concrete outputs expand over declared values
        assert_eq!(
            rule.concrete_outputs(&wc).unwrap(),
            vec!["event/0002.csv", "event/0005.csv"]
        );
        // but the rule itself is a single instance with the token kept
        assert_eq!(rule.instance_count(&wc).unwrap(), 1);
    }

    #[test]
    fn test_output_only_wildcard_on_atomic_rejected() {
        let mut wc = registry();
        let method = Method::validate(
            CopyMethod::arc("bad"),
            &kwargs(&[("src", "in.csv"), ("dst", "out/{event}.csv")]),
        )
        .unwrap();
        let err = Rule::new("bad", method, &mut wc).unwrap_err();
        assert!(err.to_string().contains("expanding"));
    }

    #[test]
    fn test_reduce_classification_and_aggregation() {
        let mut wc = Wildcards::new();
        wc.set(
            "event",
            &["0010".to_string(), "0002".to_string(), "0005".to_string()],
        )
        .unwrap();
        let method = Method::validate(
            ConcatMethod::arc(),
            &kwargs(&[("events", "event/{event}.csv"), ("combined", "all.csv")]),
        )
        .unwrap();
        let rule = Rule::new("combine", method, &mut wc).unwrap();
        assert_eq!(rule.reduce_wildcards(), &["event"]);

        let instances = rule.instances(&wc).unwrap();
        assert_eq!(instances.len(), 1);
        // registry order, not sorted
        assert_eq!(
            instances[0].input()["events"].paths(),
            vec!["event/0010.csv", "event/0002.csv", "event/0005.csv"]
        );
    }

    #[test]
    fn test_reduce_over_unregistered_wildcard_rejected() {
        let mut wc = Wildcards::new();
        let method = Method::validate(
            ConcatMethod::arc(),
            &kwargs(&[("events", "event/{event}.csv"), ("combined", "all.csv")]),
        )
        .unwrap();
        let err = Rule::new("combine", method, &mut wc).unwrap_err();
        assert!(matches!(err, WorkflowError::WildcardMismatch { .. }));
        assert!(err.to_string().contains("not registered"));
    }

    #[test]
    fn test_input_only_wildcard_on_atomic_rejected() {
        let mut wc = registry();
        let method = Method::validate(
            CopyMethod::arc("bad"),
            &kwargs(&[("src", "data/{region}.csv"), ("dst", "out.csv")]),
        )
        .unwrap();
        let err = Rule::new("bad", method, &mut wc).unwrap_err();
        assert!(err.to_string().contains("reducing"));
    }

    #[test]
    fn test_repeat_and_reduce_combined() {
        let mut wc = Wildcards::new();
        wc.set("region", &["r1".to_string(), "r2".to_string()])
            .unwrap();
        wc.set("event", &["e1".to_string(), "e2".to_string()])
            .unwrap();
        let method = Method::validate(
            ConcatMethod::arc(),
            &kwargs(&[
                ("events", "{region}/{event}.csv"),
                ("combined", "{region}/all.csv"),
            ]),
        )
        .unwrap();
        let rule = Rule::new("combine", method, &mut wc).unwrap();
        assert_eq!(rule.repeat_wildcards(), &["region"]);
        assert_eq!(rule.reduce_wildcards(), &["event"]);

        let instances = rule.instances(&wc).unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(
            instances[0].input()["events"].paths(),
            vec!["r1/e1.csv", "r1/e2.csv"]
        );
        assert_eq!(instances[0].output()["combined"], "r1/all.csv");
    }

    #[test]
    fn test_run_executes_all_instances() {
        let dir = tempfile::tempdir().unwrap();
        let mut wc = registry();
        for region in ["r1", "r2"] {
            std::fs::write(dir.path().join(format!("{region}.txt")), region).unwrap();
        }
        let method = Method::validate(
            CopyMethod::arc("copy"),
            &kwargs(&[
                (
                    "src",
                    &format!("{}/{{region}}.txt", dir.path().display()),
                ),
                (
                    "dst",
                    &format!("{}/out_{{region}}.txt", dir.path().display()),
                ),
            ]),
        )
        .unwrap();
        let rule = Rule::new("copy", method, &mut wc).unwrap();
        rule.run(&wc, dir.path(), 2).unwrap();
        assert!(dir.path().join("out_r1.txt").is_file());
        assert!(dir.path().join("out_r2.txt").is_file());
    }

    #[test]
    fn test_run_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let mut wc = registry();
        let method = Method::validate(
            FailingMethod::arc(),
            &kwargs(&[
                (
                    "src",
                    &format!("{}/{{region}}.txt", dir.path().display()),
                ),
                (
                    "dst",
                    &format!("{}/out_{{region}}.txt", dir.path().display()),
                ),
            ]),
        )
        .unwrap();
        for region in ["r1", "r2"] {
            std::fs::write(dir.path().join(format!("{region}.txt")), region).unwrap();
        }
        let rule = Rule::new("fail", method, &mut wc).unwrap();
        let err = rule.run(&wc, dir.path(), 2).unwrap_err();
        assert!(matches!(err, WorkflowError::MethodRuntime { .. }));
    }

    #[test]
    fn test_run_aborts_queued_instances_after_failure() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let dir = tempfile::tempdir().unwrap();
        let mut wc = Wildcards::new();
        let values: Vec<String> = (0..8).map(|i| format!("v{i}")).collect();
        wc.set("item", &values).unwrap();
        for value in &values {
            std::fs::write(dir.path().join(format!("{value}.txt")), value).unwrap();
        }

        let runs = Arc::new(AtomicUsize::new(0));
        let method = Method::validate(
            CountingFailMethod::arc(Arc::clone(&runs)),
            &kwargs(&[("src", "{item}.txt"), ("dst", "out_{item}.txt")]),
        )
        .unwrap();
        let rule = Rule::new("fail", method, &mut wc).unwrap();
        let err = rule.run(&wc, dir.path(), 2).unwrap_err();
        assert!(matches!(err, WorkflowError::MethodRuntime { .. }));
        // only instances already picked up may run; the rest are skipped
        assert!(runs.load(Ordering::SeqCst) <= 2);
    }
}
