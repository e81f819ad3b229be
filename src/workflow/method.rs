//! Method Contracts
//!
//! A method is a typed unit of work: declared input, output, and parameter
//! fields plus a run capability. The engine never looks inside `run`; it
//! only relies on the declared contract and the method's structural kind.
//!
//! Methods are immutable once constructed. Construction validates every
//! field against the declared [`Schema`](super::schema::Schema) and computes
//! any output templates not supplied by the caller. No filesystem access
//! happens at construction time.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use super::error::WorkflowError;
use super::schema::{Kwargs, ParamValue, Schema};

/// Structural kind of a method, consumed exhaustively by wildcard
/// classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// One output instance per input instance.
    Atomic,
    /// Introduces a new wildcard, producing one output instance per value.
    Expanding,
    /// Aggregates all values of an existing wildcard into one output.
    Reducing,
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodKind::Atomic => write!(f, "atomic"),
            MethodKind::Expanding => write!(f, "expanding"),
            MethodKind::Reducing => write!(f, "reducing"),
        }
    }
}

/// The wildcard an expanding method introduces, with its ordered values.
///
/// Value formatting (zero padding and the like) is owned by the method;
/// the engine treats values as opaque strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandSpec {
    pub wildcard: String,
    pub values: Vec<String>,
}

/// The two-operation capability every external method provides.
///
/// `outputs` computes output path templates from validated inputs and
/// params; fields already supplied through kwargs take precedence. `run`
/// performs the actual work for one concrete instance.
pub trait MethodImpl: Send + Sync {
    /// Unique method name used for registry lookup and export.
    fn name(&self) -> &str;

    fn kind(&self) -> MethodKind {
        MethodKind::Atomic
    }

    /// The declared field contract.
    fn schema(&self) -> Schema;

    /// Computes output templates not supplied by the caller.
    fn outputs(
        &self,
        input: &BTreeMap<String, String>,
        params: &BTreeMap<String, ParamValue>,
    ) -> BTreeMap<String, String> {
        let _ = (input, params);
        BTreeMap::new()
    }

    /// The wildcard an expanding method introduces. Must be `Some` for
    /// `MethodKind::Expanding` and `None` otherwise.
    fn expands(
        &self,
        input: &BTreeMap<String, String>,
        params: &BTreeMap<String, ParamValue>,
    ) -> Option<ExpandSpec> {
        let _ = (input, params);
        None
    }

    /// Executes one concrete instance, writing its declared outputs.
    fn run(&self, method: &Method) -> Result<(), WorkflowError>;
}

/// An input slot: a single path template, or the aggregate list a reducing
/// instance receives at run time (one entry per registered wildcard value,
/// in registry order).
#[derive(Debug, Clone, PartialEq)]
pub enum PathInput {
    Single(String),
    Aggregate(Vec<String>),
}

impl PathInput {
    /// All concrete or templated paths in this slot.
    pub fn paths(&self) -> Vec<&str> {
        match self {
            PathInput::Single(p) => vec![p.as_str()],
            PathInput::Aggregate(ps) => ps.iter().map(|p| p.as_str()).collect(),
        }
    }

    /// The template of a single-path slot.
    pub fn as_single(&self) -> Option<&str> {
        match self {
            PathInput::Single(p) => Some(p),
            PathInput::Aggregate(_) => None,
        }
    }
}

/// A validated, immutable method instance.
#[derive(Clone)]
pub struct Method {
    imp: Arc<dyn MethodImpl>,
    input: BTreeMap<String, PathInput>,
    output: BTreeMap<String, String>,
    params: BTreeMap<String, ParamValue>,
    /// Field name -> reference target, for fields supplied via cross
    /// references. Kept so exporters can re-render the reference.
    refs: BTreeMap<String, String>,
    expand: Option<ExpandSpec>,
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("input", &self.input)
            .field("output", &self.output)
            .field("params", &self.params)
            .finish()
    }
}

impl Method {
    /// Validates kwargs against the implementation's schema and constructs
    /// a method instance.
    ///
    /// Input and output fields must receive path strings; params must match
    /// their declared kinds. Output fields not supplied are computed by the
    /// implementation from inputs and params. An expanding implementation
    /// must declare the wildcard it introduces.
    pub fn validate(imp: Arc<dyn MethodImpl>, kwargs: &Kwargs) -> Result<Self, WorkflowError> {
        let schema = imp.schema();
        schema.validate(imp.name(), kwargs)?;

        let mut refs = BTreeMap::new();
        for (key, kwarg) in kwargs {
            if let Some(target) = kwarg.reference() {
                refs.insert(key.clone(), target.to_string());
            }
        }

        let mut input = BTreeMap::new();
        for field in &schema.input {
            if let Some(kwarg) = kwargs.get(&field.name) {
                let path = path_string(imp.name(), &field.name, kwarg.value())?;
                input.insert(field.name.clone(), path);
            }
        }

        let mut params = BTreeMap::new();
        for field in &schema.params {
            if let Some(kwarg) = kwargs.get(&field.name) {
                params.insert(field.name.clone(), kwarg.value().clone());
            }
        }

        // outputs given in kwargs win over computed ones
        let mut output = imp.outputs(&input, &params);
        for field in &schema.output {
            if let Some(kwarg) = kwargs.get(&field.name) {
                let path = path_string(imp.name(), &field.name, kwarg.value())?;
                output.insert(field.name.clone(), path);
            }
            if field.required && !output.contains_key(&field.name) {
                return Err(WorkflowError::SchemaValidation {
                    method: imp.name().to_string(),
                    field: field.name.clone(),
                    reason: "output neither supplied nor computed".to_string(),
                });
            }
        }

        let expand = imp.expands(&input, &params);
        match (imp.kind(), &expand) {
            (MethodKind::Expanding, None) => {
                return Err(WorkflowError::SchemaValidation {
                    method: imp.name().to_string(),
                    field: "expand".to_string(),
                    reason: "expanding method declares no wildcard".to_string(),
                });
            }
            (MethodKind::Atomic | MethodKind::Reducing, Some(spec)) => {
                return Err(WorkflowError::SchemaValidation {
                    method: imp.name().to_string(),
                    field: spec.wildcard.clone(),
                    reason: format!("{} method cannot introduce a wildcard", imp.kind()),
                });
            }
            _ => {}
        }

        Ok(Self {
            imp,
            input: input
                .into_iter()
                .map(|(k, v)| (k, PathInput::Single(v)))
                .collect(),
            output,
            params,
            refs,
            expand,
        })
    }

    pub fn name(&self) -> &str {
        self.imp.name()
    }

    pub fn kind(&self) -> MethodKind {
        self.imp.kind()
    }

    pub fn input(&self) -> &BTreeMap<String, PathInput> {
        &self.input
    }

    pub fn output(&self) -> &BTreeMap<String, String> {
        &self.output
    }

    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    pub fn refs(&self) -> &BTreeMap<String, String> {
        &self.refs
    }

    pub fn expand(&self) -> Option<&ExpandSpec> {
        self.expand.as_ref()
    }

    /// All input path templates/paths, flattened across slots.
    pub fn input_paths(&self) -> Vec<&str> {
        self.input.values().flat_map(|slot| slot.paths()).collect()
    }

    /// Output templates in field order.
    pub fn output_paths(&self) -> Vec<&str> {
        self.output.values().map(|p| p.as_str()).collect()
    }

    /// Returns a copy with the given wildcard values substituted into every
    /// input and output template. Used to build concrete instances.
    pub fn substitute(&self, values: &BTreeMap<String, String>) -> Self {
        use super::wildcards::substitute_wildcards;

        let mut clone = self.clone();
        clone.input = self
            .input
            .iter()
            .map(|(k, slot)| {
                let slot = match slot {
                    PathInput::Single(p) => PathInput::Single(substitute_wildcards(p, values)),
                    PathInput::Aggregate(ps) => PathInput::Aggregate(
                        ps.iter().map(|p| substitute_wildcards(p, values)).collect(),
                    ),
                };
                (k.clone(), slot)
            })
            .collect();
        clone.output = self
            .output
            .iter()
            .map(|(k, p)| (k.clone(), substitute_wildcards(p, values)))
            .collect();
        clone
    }

    /// Replaces an input slot with an aggregate list. Used by reducing
    /// rules and by the CLI runner to materialize per-value input paths.
    pub fn set_aggregate_input(&mut self, field: &str, paths: Vec<String>) {
        self.input
            .insert(field.to_string(), PathInput::Aggregate(paths));
    }

    /// Runs this instance through its implementation.
    pub fn run(&self) -> Result<(), WorkflowError> {
        self.imp.run(self)
    }

    /// Returns a copy with every relative input and output path resolved
    /// against `root`. Absolute paths pass through unchanged.
    pub fn resolve_against(&self, root: &Path) -> Self {
        let resolve = |p: &str| -> String {
            if Path::new(p).is_absolute() {
                p.to_string()
            } else {
                root.join(p).to_string_lossy().into_owned()
            }
        };
        let mut clone = self.clone();
        clone.input = self
            .input
            .iter()
            .map(|(k, slot)| {
                let slot = match slot {
                    PathInput::Single(p) => PathInput::Single(resolve(p)),
                    PathInput::Aggregate(ps) => {
                        PathInput::Aggregate(ps.iter().map(|p| resolve(p)).collect())
                    }
                };
                (k.clone(), slot)
            })
            .collect();
        clone.output = self
            .output
            .iter()
            .map(|(k, p)| (k.clone(), resolve(p)))
            .collect();
        clone
    }

    /// Runs with input/output checks: relative paths are resolved against
    /// `root` before the implementation sees them, inputs must exist,
    /// output parent directories are created beforehand, and outputs are
    /// verified after.
    pub fn run_with_checks(&self, root: &Path) -> Result<(), WorkflowError> {
        use std::fs;

        let resolved = self.resolve_against(root);

        for (field, slot) in &resolved.input {
            for path in slot.paths() {
                if !Path::new(path).is_file() {
                    return Err(WorkflowError::runtime(
                        self.name(),
                        format!("input file {}.{} not found: {}", self.name(), field, path),
                    ));
                }
            }
        }
        for path in resolved.output.values() {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() && !parent.is_dir() {
                    fs::create_dir_all(parent)?;
                }
            }
        }

        resolved.run()?;

        for (field, path) in &resolved.output {
            // an expanding instance keeps its token; verify per declared value
            let concrete: Vec<String> = match &resolved.expand {
                Some(spec) if path.contains(&format!("{{{}}}", spec.wildcard)) => spec
                    .values
                    .iter()
                    .map(|v| super::wildcards::substitute_wildcard(path, &spec.wildcard, v))
                    .collect(),
                _ => vec![path.clone()],
            };
            for path in concrete {
                if !Path::new(&path).is_file() {
                    return Err(WorkflowError::runtime(
                        self.name(),
                        format!("output file {}.{} not created: {}", self.name(), field, path),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Flattened kwargs that would reconstruct this method, with reference
    /// targets substituted back where fields came from references.
    pub fn to_kwargs(&self) -> BTreeMap<String, ParamValue> {
        let mut kwargs = BTreeMap::new();
        for (key, slot) in &self.input {
            if let Some(path) = slot.as_single() {
                kwargs.insert(key.clone(), ParamValue::Str(path.to_string()));
            }
        }
        for (key, path) in &self.output {
            kwargs.insert(key.clone(), ParamValue::Str(path.clone()));
        }
        for (key, value) in &self.params {
            kwargs.insert(key.clone(), value.clone());
        }
        for (key, target) in &self.refs {
            kwargs.insert(key.clone(), ParamValue::Str(target.clone()));
        }
        kwargs
    }
}

fn path_string(method: &str, field: &str, value: &ParamValue) -> Result<String, WorkflowError> {
    value
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| WorkflowError::SchemaValidation {
            method: method.to_string(),
            field: field.to_string(),
            reason: "expected a path string".to_string(),
        })
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::workflow::schema::Kwarg;

    fn kwargs(pairs: &[(&str, &str)]) -> Kwargs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Kwarg::from(*v)))
            .collect()
    }

    #[test]
    fn test_validate_builds_method() {
        let m = Method::validate(
            CopyMethod::arc("copy"),
            &kwargs(&[("src", "a.txt"), ("dst", "b.txt")]),
        )
        .unwrap();
        assert_eq!(m.name(), "copy");
        assert_eq!(m.kind(), MethodKind::Atomic);
        assert_eq!(m.input()["src"].as_single(), Some("a.txt"));
        assert_eq!(m.output()["dst"], "b.txt");
    }

    #[test]
    fn test_validate_missing_output() {
        let err =
            Method::validate(CopyMethod::arc("copy"), &kwargs(&[("src", "a.txt")])).unwrap_err();
        assert!(err.to_string().contains("dst"));
    }

    #[test]
    fn test_expanding_method_declares_wildcard() {
        let m = Method::validate(
            EnumerateMethod::arc("event", &["0002", "0005", "0010"]),
            &kwargs(&[("source", "in.csv"), ("event_csv", "event/{event}.csv")]),
        )
        .unwrap();
        let spec = m.expand().unwrap();
        assert_eq!(spec.wildcard, "event");
        assert_eq!(spec.values, vec!["0002", "0005", "0010"]);
    }

    #[test]
    fn test_substitute_builds_instance() {
        let m = Method::validate(
            CopyMethod::arc("copy"),
            &kwargs(&[("src", "data/{region}.geojson"), ("dst", "model/{region}/x.inp")]),
        )
        .unwrap();
        let mut values = BTreeMap::new();
        values.insert("region".to_string(), "r1".to_string());
        let inst = m.substitute(&values);
        assert_eq!(inst.input()["src"].as_single(), Some("data/r1.geojson"));
        assert_eq!(inst.output()["dst"], "model/r1/x.inp");
        // base method untouched
        assert_eq!(m.output()["dst"], "model/{region}/x.inp");
    }

    #[test]
    fn test_to_kwargs_roundtrip_shape() {
        let m = Method::validate(
            CopyMethod::arc("copy"),
            &kwargs(&[("src", "a.txt"), ("dst", "b.txt")]),
        )
        .unwrap();
        let kw = m.to_kwargs();
        assert_eq!(kw["src"], ParamValue::Str("a.txt".to_string()));
        assert_eq!(kw["dst"], ParamValue::Str("b.txt".to_string()));
    }

    #[test]
    fn test_run_with_checks_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let m = Method::validate(
            CopyMethod::arc("copy"),
            &kwargs(&[("src", "missing.txt"), ("dst", "out.txt")]),
        )
        .unwrap();
        let err = m.run_with_checks(dir.path()).unwrap_err();
        assert!(matches!(err, WorkflowError::MethodRuntime { .. }));
        assert!(err.to_string().contains("missing.txt"));
    }

    #[test]
    fn test_run_with_checks_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in.txt"), "payload").unwrap();

        // templates stay relative; the implementation must still read and
        // write under the root, not the process cwd
        let m = Method::validate(
            CopyMethod::arc("copy"),
            &kwargs(&[("src", "in.txt"), ("dst", "sub/out.txt")]),
        )
        .unwrap();
        m.run_with_checks(dir.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("sub/out.txt")).unwrap(),
            "payload"
        );
    }

    #[test]
    fn test_run_with_checks_copies_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("sub/b.txt");
        std::fs::write(&src, "payload").unwrap();

        let m = Method::validate(
            CopyMethod::arc("copy"),
            &kwargs(&[
                ("src", src.to_str().unwrap()),
                ("dst", dst.to_str().unwrap()),
            ]),
        )
        .unwrap();
        m.run_with_checks(dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(dst).unwrap(), "payload");
    }
}
