//! Workflow Error Types
//!
//! One taxonomy for everything that can go wrong while building, running,
//! or exporting a rule graph. All validation and classification errors are
//! raised at `create_rule` time, so a workflow never holds an invalid rule.

use thiserror::Error;

/// Errors raised while composing, executing, or exporting a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A method field failed schema validation at construction time.
    #[error("method '{method}': invalid field '{field}': {reason}")]
    SchemaValidation {
        method: String,
        field: String,
        reason: String,
    },

    /// A wildcard token appears in a pattern inconsistent with the method kind.
    #[error("rule '{rule}': wildcard '{wildcard}' misused: {reason}")]
    WildcardMismatch {
        rule: String,
        wildcard: String,
        reason: String,
    },

    /// A wildcard was re-registered with different values.
    #[error("wildcard '{0}' already exists with different values")]
    DuplicateWildcard(String),

    /// Two rules claim the same concrete output path.
    #[error("output '{path}' of rule '{rule}' already produced by rule '{producer}'")]
    DuplicateOutput {
        path: String,
        rule: String,
        producer: String,
    },

    /// A reference to a config value, wildcard, or rule output could not be resolved.
    #[error("unresolved reference '{reference}': {reason}")]
    UnresolvedReference { reference: String, reason: String },

    /// A config key was set twice; config values are write-once.
    #[error("config key '{0}' already set")]
    DuplicateConfig(String),

    /// A rule id was used twice.
    #[error("rule '{0}' already exists")]
    DuplicateRule(String),

    /// The rule cannot be expressed in the requested export format.
    #[error("rule '{rule}' cannot be exported to {format}: {reason}")]
    UnsupportedConstruct {
        rule: String,
        format: String,
        reason: String,
    },

    /// A method's run implementation failed.
    #[error("method '{method}' failed: {reason}")]
    MethodRuntime { method: String, reason: String },

    /// A file could not be read or written.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A workflow or companion file could not be (de)serialized.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl WorkflowError {
    /// Shorthand for a method runtime failure.
    pub fn runtime(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MethodRuntime {
            method: method.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_field() {
        let err = WorkflowError::SchemaValidation {
            method: "clip_region".to_string(),
            field: "region_file".to_string(),
            reason: "expected a path".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("clip_region"));
        assert!(msg.contains("region_file"));
    }

    #[test]
    fn test_error_display_duplicate_output() {
        let err = WorkflowError::DuplicateOutput {
            path: "results/out.nc".to_string(),
            rule: "second".to_string(),
            producer: "first".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("results/out.nc"));
        assert!(msg.contains("first"));
        assert!(msg.contains("second"));
    }

    #[test]
    fn test_runtime_shorthand() {
        let err = WorkflowError::runtime("build_model", "exit code 1");
        assert!(matches!(err, WorkflowError::MethodRuntime { .. }));
        assert!(err.to_string().contains("build_model"));
    }
}
