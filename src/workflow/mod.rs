//! Workflow Composition Core
//!
//! Typed method contracts, wildcard classification, and the rule graph.
//! Rules are validated completely at creation time; execution and export
//! both read the same composed graph.

pub mod error;
pub mod method;
pub mod reference;
pub mod rule;
pub mod schema;
pub mod wildcards;
#[allow(clippy::module_inception)]
pub mod workflow;

pub use error::WorkflowError;
pub use method::{ExpandSpec, Method, MethodImpl, MethodKind, PathInput};
pub use reference::{Component, Ref, RefTarget};
pub use rule::Rule;
pub use schema::{FieldKind, FieldSpec, Kwarg, Kwargs, ParamValue, Schema};
pub use wildcards::Wildcards;
pub use workflow::Workflow;
