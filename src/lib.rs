//! FlowForge - Workflow Composition and Translation Engine
//!
//! Composes typed methods into a validated rule graph and either runs it
//! natively or translates it to an external pipeline engine. Designed for
//! simulation chains where the same graph must run locally during
//! development and on a cluster scheduler in production.
//!
//! # Architecture
//!
//! The library is organized into three main modules:
//!
//! - [`workflow`]: method contracts, wildcard classification, the rule graph
//! - [`methods`]: the name -> implementation registry behind YAML loading
//! - [`export`]: pure translators to Snakemake and CWL
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use flowforge::{Workflow, methods};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Rebuild a workflow from its YAML document
//!     let registry = methods::snapshot();
//!     let workflow = Workflow::from_yaml(Path::new("workflow.yml"), ".", &registry)?;
//!
//!     // Warn about missing root inputs, then run with four workers
//!     for path in workflow.dryrun() {
//!         eprintln!("missing input: {}", path);
//!     }
//!     workflow.run(4)?;
//!
//!     // Or hand it to an external engine
//!     workflow.to_snakemake(Path::new("Snakefile"))?;
//!     Ok(())
//! }
//! ```

pub mod export;
pub mod methods;
pub mod workflow;

// Re-export commonly used types
pub use export::ExportArtifact;
pub use workflow::{
    ExpandSpec, FieldKind, FieldSpec, Kwarg, Kwargs, Method, MethodImpl, MethodKind, ParamValue,
    Ref, Rule, Schema, Wildcards, Workflow, WorkflowError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "flowforge";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "flowforge");
    }

    #[test]
    fn test_module_exports_workflow() {
        let workflow = Workflow::new("smoke", ".");
        assert_eq!(workflow.name(), "smoke");
        assert!(workflow.rules().is_empty());
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
