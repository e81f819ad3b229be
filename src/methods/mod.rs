//! Method Registry
//!
//! Maps method names to their implementations so workflows loaded from
//! YAML and exported pipelines can find the code behind a rule. The
//! process-wide registry is filled by embedding applications at startup;
//! library users can also carry their own [`MethodRegistry`].

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use log::debug;
use once_cell::sync::Lazy;

use crate::workflow::error::WorkflowError;
use crate::workflow::method::MethodImpl;

/// A name -> implementation table.
#[derive(Default, Clone)]
pub struct MethodRegistry {
    methods: BTreeMap<String, Arc<dyn MethodImpl>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an implementation under its own name. Re-registering a
    /// name replaces the previous implementation.
    pub fn register(&mut self, imp: Arc<dyn MethodImpl>) {
        debug!("Registered method '{}'", imp.name());
        self.methods.insert(imp.name().to_string(), imp);
    }

    /// Looks up a method by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn MethodImpl>, WorkflowError> {
        self.methods.get(name).cloned().ok_or_else(|| {
            WorkflowError::UnresolvedReference {
                reference: name.to_string(),
                reason: format!("method not registered (known: {})", self.names().join(", ")),
            }
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }
}

/// The process-wide registry used by the CLI.
static GLOBAL: Lazy<RwLock<MethodRegistry>> = Lazy::new(|| RwLock::new(MethodRegistry::new()));

/// Registers a method in the process-wide registry.
pub fn register(imp: Arc<dyn MethodImpl>) {
    if let Ok(mut registry) = GLOBAL.write() {
        registry.register(imp);
    }
}

/// Looks up a method in the process-wide registry.
pub fn get(name: &str) -> Result<Arc<dyn MethodImpl>, WorkflowError> {
    match GLOBAL.read() {
        Ok(registry) => registry.get(name),
        Err(_) => Err(WorkflowError::UnresolvedReference {
            reference: name.to_string(),
            reason: "method registry poisoned".to_string(),
        }),
    }
}

/// A point-in-time copy of the process-wide registry, for APIs taking a
/// registry by reference.
pub fn snapshot() -> MethodRegistry {
    GLOBAL
        .read()
        .map(|registry| registry.clone())
        .unwrap_or_default()
}

/// Names registered in the process-wide registry.
pub fn names() -> Vec<String> {
    GLOBAL
        .read()
        .map(|registry| registry.names())
        .unwrap_or_default()
}
