//! Wildcard Registry and Pattern Helpers
//!
//! Wildcards are named, ordered sets of string values used to multiply or
//! aggregate method instances. Path templates reference them with `{name}`
//! tokens. The registry is workflow-scoped: it is filled explicitly by the
//! graph owner or implicitly by an expanding rule, and read by every rule
//! created afterwards.

use std::collections::BTreeMap;

use log::info;
use serde::{Deserialize, Serialize};

use super::error::WorkflowError;

/// Checks if a template contains wildcard syntax.
pub fn has_wildcards(text: &str) -> bool {
    text.contains('{') && text.contains('}')
}

/// Extracts wildcard names from a path template.
///
/// # Example
/// ```
/// use flowforge::workflow::wildcards::extract_wildcard_names;
///
/// let names = extract_wildcard_names("data/{region}/{event}.csv");
/// assert_eq!(names, vec!["region", "event"]);
/// ```
pub fn extract_wildcard_names(pattern: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut in_wildcard = false;
    let mut current_name = String::new();

    for ch in pattern.chars() {
        match ch {
            '{' => {
                in_wildcard = true;
                current_name.clear();
            }
            '}' => {
                if in_wildcard && !current_name.is_empty() && !names.contains(&current_name) {
                    names.push(current_name.clone());
                }
                in_wildcard = false;
            }
            _ => {
                if in_wildcard {
                    current_name.push(ch);
                }
            }
        }
    }

    names
}

/// Substitutes one wildcard token with a concrete value.
pub fn substitute_wildcard(text: &str, name: &str, value: &str) -> String {
    text.replace(&format!("{{{}}}", name), value)
}

/// Substitutes several wildcard tokens at once.
pub fn substitute_wildcards(text: &str, values: &BTreeMap<String, String>) -> String {
    let mut out = text.to_string();
    for (name, value) in values {
        out = substitute_wildcard(&out, name, value);
    }
    out
}

/// Workflow-scoped registry of wildcard names and their ordered value sets.
///
/// Insertion order is preserved: positional formatting in exporters and the
/// aggregation order of reduce inputs both follow registration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Wildcards {
    entries: Vec<WildcardEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WildcardEntry {
    name: String,
    values: Vec<String>,
}

impl Wildcards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a wildcard with an ordered, deduplicated value set.
    ///
    /// Re-registering with identical values is a no-op; different values
    /// fail with `DuplicateWildcard`.
    pub fn set(&mut self, name: &str, values: &[String]) -> Result<(), WorkflowError> {
        let mut deduped: Vec<String> = Vec::with_capacity(values.len());
        for v in values {
            if !deduped.contains(v) {
                deduped.push(v.clone());
            }
        }

        if let Some(existing) = self.entries.iter().find(|e| e.name == name) {
            if existing.values != deduped {
                return Err(WorkflowError::DuplicateWildcard(name.to_string()));
            }
            return Ok(());
        }

        info!(
            "Registered wildcard '{{{}}}' with {} values",
            name,
            deduped.len()
        );
        self.entries.push(WildcardEntry {
            name: name.to_string(),
            values: deduped,
        });
        Ok(())
    }

    /// Returns the values of a registered wildcard.
    pub fn get(&self, name: &str) -> Result<&[String], WorkflowError> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.values.as_slice())
            .ok_or_else(|| WorkflowError::UnresolvedReference {
                reference: format!("$wildcards.{}", name),
                reason: format!("available wildcards: {}", self.names().join(", ")),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Wildcard names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over (name, values) pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), e.values.as_slice()))
    }

    /// Cross product of the values of the given wildcards, in registry order.
    ///
    /// Returns one name->value map per combination; a single empty map if no
    /// names are given, so callers always get at least one instance.
    pub fn product(
        &self,
        names: &[String],
    ) -> Result<Vec<BTreeMap<String, String>>, WorkflowError> {
        let mut combos: Vec<BTreeMap<String, String>> = vec![BTreeMap::new()];
        for name in names {
            let values = self.get(name)?;
            let mut next = Vec::with_capacity(combos.len() * values.len());
            for combo in &combos {
                for value in values {
                    let mut c = combo.clone();
                    c.insert(name.clone(), value.clone());
                    next.push(c);
                }
            }
            combos = next;
        }
        Ok(combos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_wildcards() {
        assert!(has_wildcards("{region}.geojson"));
        assert!(has_wildcards("model/{region}/x.inp"));
        assert!(!has_wildcards("regular_file.txt"));
    }

    #[test]
    fn test_extract_wildcard_names() {
        let names = extract_wildcard_names("data/{region}.geojson");
        assert_eq!(names, vec!["region"]);

        let names = extract_wildcard_names("{region}_{event}.csv");
        assert_eq!(names, vec!["region", "event"]);
    }

    #[test]
    fn test_extract_wildcard_names_deduplicates() {
        let names = extract_wildcard_names("{region}/{region}.txt");
        assert_eq!(names, vec!["region"]);
    }

    #[test]
    fn test_substitute_wildcard() {
        let result = substitute_wildcard("data/{region}.geojson", "region", "r1");
        assert_eq!(result, "data/r1.geojson");
    }

    #[test]
    fn test_substitute_wildcards_multiple() {
        let mut values = BTreeMap::new();
        values.insert("region".to_string(), "r1".to_string());
        values.insert("event".to_string(), "e1".to_string());
        let result = substitute_wildcards("{region}/{event}.csv", &values);
        assert_eq!(result, "r1/e1.csv");
    }

    #[test]
    fn test_registry_set_get() {
        let mut wc = Wildcards::new();
        wc.set("region", &["r1".to_string(), "r2".to_string()])
            .unwrap();
        assert_eq!(wc.get("region").unwrap(), &["r1", "r2"]);
        assert!(wc.contains("region"));
    }

    #[test]
    fn test_registry_preserves_order_and_dedups() {
        let mut wc = Wildcards::new();
        wc.set("rp", &["10".to_string(), "2".to_string(), "10".to_string()])
            .unwrap();
        assert_eq!(wc.get("rp").unwrap(), &["10", "2"]);
    }

    #[test]
    fn test_registry_idempotent_set() {
        let mut wc = Wildcards::new();
        let values = vec!["a".to_string(), "b".to_string()];
        wc.set("x", &values).unwrap();
        assert!(wc.set("x", &values).is_ok());
    }

    #[test]
    fn test_registry_duplicate_with_different_values() {
        let mut wc = Wildcards::new();
        wc.set("x", &["a".to_string()]).unwrap();
        let err = wc.set("x", &["b".to_string()]).unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateWildcard(_)));
    }

    #[test]
    fn test_registry_get_unknown() {
        let wc = Wildcards::new();
        let err = wc.get("ghost").unwrap_err();
        assert!(matches!(err, WorkflowError::UnresolvedReference { .. }));
    }

    #[test]
    fn test_product_single() {
        let mut wc = Wildcards::new();
        wc.set("region", &["r1".to_string(), "r2".to_string()])
            .unwrap();
        let combos = wc.product(&["region".to_string()]).unwrap();
        assert_eq!(combos.len(), 2);
        assert_eq!(combos[0]["region"], "r1");
        assert_eq!(combos[1]["region"], "r2");
    }

    #[test]
    fn test_product_cross() {
        let mut wc = Wildcards::new();
        wc.set("a", &["1".to_string(), "2".to_string()]).unwrap();
        wc.set("b", &["x".to_string(), "y".to_string(), "z".to_string()])
            .unwrap();
        let combos = wc.product(&["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(combos.len(), 6);
    }

    #[test]
    fn test_product_empty_names() {
        let wc = Wildcards::new();
        let combos = wc.product(&[]).unwrap();
        assert_eq!(combos.len(), 1);
        assert!(combos[0].is_empty());
    }
}
