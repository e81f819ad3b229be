//! Method Schema Validation
//!
//! Declares the typed contract of a method: which input, output, and
//! parameter fields it takes and what kind of value each field accepts.
//! Validation happens once, at method construction time, and never touches
//! the filesystem.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::WorkflowError;
use super::reference::Ref;

/// A scalar or list value carried by a method parameter.
///
/// Paths are plain strings at this layer; whether a string is a path is
/// decided by the field's declared [`FieldKind`], not by the value itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Returns the string content if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the list content if this is a list value.
    pub fn as_list(&self) -> Option<&[ParamValue]> {
        match self {
            ParamValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    /// Renders the value the way it appears in a shell invocation:
    /// scalars verbatim, lists comma-separated.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Str(s) => write!(f, "{}", s),
            ParamValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<f64> for ParamValue {
    fn from(x: f64) -> Self {
        ParamValue::Float(x)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

/// A keyword argument supplied to a method constructor: either a literal
/// value or a resolved cross-reference.
#[derive(Debug, Clone)]
pub enum Kwarg {
    Value(ParamValue),
    Ref(Ref),
}

impl Kwarg {
    /// The effective value, looking through references.
    pub fn value(&self) -> &ParamValue {
        match self {
            Kwarg::Value(v) => v,
            Kwarg::Ref(r) => &r.value,
        }
    }

    /// The reference target if this kwarg came from a cross-reference.
    pub fn reference(&self) -> Option<&str> {
        match self {
            Kwarg::Value(_) => None,
            Kwarg::Ref(r) => Some(&r.target),
        }
    }
}

impl<T: Into<ParamValue>> From<T> for Kwarg {
    fn from(v: T) -> Self {
        Kwarg::Value(v.into())
    }
}

impl From<Ref> for Kwarg {
    fn from(r: Ref) -> Self {
        Kwarg::Ref(r)
    }
}

/// Keyword arguments for method construction, keyed by field name.
pub type Kwargs = BTreeMap<String, Kwarg>;

/// The kind of value a declared field accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// A single file or directory path template.
    Path,
    Str,
    Int,
    Float,
    Bool,
    /// A list of scalar strings.
    StrList,
    /// A list of path templates.
    PathList,
}

impl FieldKind {
    fn matches(&self, value: &ParamValue) -> bool {
        match (self, value) {
            (FieldKind::Path, ParamValue::Str(s)) => !s.trim().is_empty(),
            (FieldKind::Str, ParamValue::Str(_)) => true,
            (FieldKind::Int, ParamValue::Int(_)) => true,
            // an integer is acceptable wherever a float is expected
            (FieldKind::Float, ParamValue::Float(_) | ParamValue::Int(_)) => true,
            (FieldKind::Bool, ParamValue::Bool(_)) => true,
            (FieldKind::StrList, ParamValue::List(items)) => {
                items.iter().all(|v| matches!(v, ParamValue::Str(_)))
            }
            (FieldKind::PathList, ParamValue::List(items)) => items
                .iter()
                .all(|v| matches!(v, ParamValue::Str(s) if !s.trim().is_empty())),
            _ => false,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            FieldKind::Path => "a non-empty path",
            FieldKind::Str => "a string",
            FieldKind::Int => "an integer",
            FieldKind::Float => "a number",
            FieldKind::Bool => "a boolean",
            FieldKind::StrList => "a list of strings",
            FieldKind::PathList => "a list of paths",
        }
    }
}

/// Declaration of a single input, output, or parameter field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    /// Optional fields may be omitted from the kwargs.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// The full declared contract of a method: its input, output, and parameter
/// fields. Input and output fields must be path-like.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    pub input: Vec<FieldSpec>,
    pub output: Vec<FieldSpec>,
    pub params: Vec<FieldSpec>,
}

impl Schema {
    /// Builder-style constructors mirroring how methods declare themselves.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.input.push(FieldSpec::new(name, kind));
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.output.push(FieldSpec::new(name, kind));
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.params.push(FieldSpec::new(name, kind));
        self
    }

    pub fn with_optional_param(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.params.push(FieldSpec::new(name, kind).optional());
        self
    }

    fn sections(&self) -> [(&'static str, &[FieldSpec]); 3] {
        [
            ("input", &self.input),
            ("output", &self.output),
            ("params", &self.params),
        ]
    }

    /// Validates that field names are unique across input, output, and params.
    ///
    /// Duplicate names would make the flat kwargs form ambiguous.
    pub fn check_unique_fields(&self, method: &str) -> Result<(), WorkflowError> {
        let mut seen = std::collections::HashSet::new();
        for (_, fields) in self.sections() {
            for field in fields {
                if !seen.insert(field.name.as_str()) {
                    return Err(WorkflowError::SchemaValidation {
                        method: method.to_string(),
                        field: field.name.clone(),
                        reason: "field name declared more than once".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Validates kwargs against this schema.
    ///
    /// Every required field must be present with a value of the declared
    /// kind; unknown keys are rejected. Returns the offending field in the
    /// error so the caller can point at it.
    pub fn validate(&self, method: &str, kwargs: &Kwargs) -> Result<(), WorkflowError> {
        self.check_unique_fields(method)?;

        let mut known = std::collections::HashSet::new();
        for (section, fields) in self.sections() {
            for field in fields {
                known.insert(field.name.as_str());
                match kwargs.get(&field.name) {
                    Some(kwarg) => {
                        let value = kwarg.value();
                        if !field.kind.matches(value) {
                            return Err(WorkflowError::SchemaValidation {
                                method: method.to_string(),
                                field: field.name.clone(),
                                reason: format!(
                                    "{} field expects {}, got {:?}",
                                    section,
                                    field.kind.describe(),
                                    value
                                ),
                            });
                        }
                    }
                    None if field.required => {
                        return Err(WorkflowError::SchemaValidation {
                            method: method.to_string(),
                            field: field.name.clone(),
                            reason: format!("required {} field missing", section),
                        });
                    }
                    None => {}
                }
            }
        }

        if let Some(unknown) = kwargs.keys().find(|k| !known.contains(k.as_str())) {
            return Err(WorkflowError::SchemaValidation {
                method: method.to_string(),
                field: unknown.clone(),
                reason: "unknown field".to_string(),
            });
        }

        Ok(())
    }
}
