//! Concurrent registry of loaded units.
//!
//! Guard resolution looks up sibling units by name, so every unit in a
//! run is loaded here before any rewriting starts.

use dashmap::DashMap;
use std::sync::Arc;
use warden_bytecode::CompiledUnit;

/// Name-keyed map of every unit visible to a rewrite run.
#[derive(Default)]
pub struct UnitRepository {
    units: DashMap<Arc<str>, Arc<CompiledUnit>>,
}

impl UnitRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        UnitRepository::default()
    }

    /// Register a unit under its own name, replacing any previous entry.
    pub fn insert(&self, unit: Arc<CompiledUnit>) {
        self.units.insert(unit.name.clone(), unit);
    }

    /// Look up a unit by fully qualified name.
    pub fn get(&self, name: &str) -> Option<Arc<CompiledUnit>> {
        self.units.get(name).map(|e| e.value().clone())
    }

    /// Number of registered units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// True when no units are registered.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Names of all registered units, unordered.
    pub fn names(&self) -> Vec<Arc<str>> {
        self.units.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let repo = UnitRepository::new();
        assert!(repo.is_empty());
        repo.insert(Arc::new(CompiledUnit::new("demo.Account")));
        assert_eq!(repo.len(), 1);
        assert!(repo.get("demo.Account").is_some());
        assert!(repo.get("demo.Missing").is_none());
    }

    #[test]
    fn test_reinsert_replaces() {
        let repo = UnitRepository::new();
        repo.insert(Arc::new(CompiledUnit::new("demo.Account")));
        let mut replacement = CompiledUnit::new("demo.Account");
        replacement.superclass = Some("demo.Base".into());
        repo.insert(Arc::new(replacement));
        assert_eq!(repo.len(), 1);
        assert!(repo.get("demo.Account").unwrap().superclass.is_some());
    }
}
