//! Namespaced string interning with deterministic id allocation.
//!
//! Client ids, entity type names, and component names all travel the wire as
//! small integers. The [`StringRegistry`] assigns those integers: within a
//! namespace, the first string interned gets id 0, the next id 1, and so on.
//! Because every peer interns strings in the order dictated by the shared
//! input stream, the mapping is identical everywhere -- and because the
//! registry state is captured into snapshots, a late joiner continues
//! allocation exactly where the snapshotted peer left off.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Namespace for client ids.
pub const NS_CLIENT: &str = "client";
/// Namespace for entity type names.
pub const NS_ENTITY_TYPE: &str = "entity-type";
/// Namespace for component names.
pub const NS_COMPONENT: &str = "component";

// ---------------------------------------------------------------------------
// StringRegistry
// ---------------------------------------------------------------------------

/// One namespace: dense id -> name plus the reverse lookup.
#[derive(Debug, Default, Clone)]
struct Namespace {
    names: Vec<String>,
    by_name: HashMap<String, u32>,
}

/// Namespaced string <-> u32 tables with deterministic allocation order.
#[derive(Debug, Default, Clone)]
pub struct StringRegistry {
    namespaces: HashMap<String, Namespace>,
}

/// Serializable registry state: names per namespace in id order. The next id
/// for a namespace is implied by the name count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringRegistryState {
    /// Namespace -> names, indexed by interned id. `BTreeMap` keeps the
    /// serialized form canonical.
    pub namespaces: BTreeMap<String, Vec<String>>,
}

impl StringRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `name` in `namespace`, returning its id.
    ///
    /// Re-interning an existing string returns the id assigned at first
    /// interning; a new string gets the next id in that namespace.
    pub fn intern(&mut self, namespace: &str, name: &str) -> u32 {
        let ns = self.namespaces.entry(namespace.to_owned()).or_default();
        if let Some(&id) = ns.by_name.get(name) {
            return id;
        }
        let id = ns.names.len() as u32;
        ns.names.push(name.to_owned());
        ns.by_name.insert(name.to_owned(), id);
        id
    }

    /// Look up an already-interned string without allocating an id.
    pub fn lookup(&self, namespace: &str, name: &str) -> Option<u32> {
        self.namespaces
            .get(namespace)
            .and_then(|ns| ns.by_name.get(name).copied())
    }

    /// Resolve an id back to its string.
    pub fn resolve(&self, namespace: &str, id: u32) -> Option<&str> {
        self.namespaces
            .get(namespace)
            .and_then(|ns| ns.names.get(id as usize))
            .map(String::as_str)
    }

    /// Number of interned strings in a namespace (also the next id).
    pub fn len(&self, namespace: &str) -> usize {
        self.namespaces.get(namespace).map_or(0, |ns| ns.names.len())
    }

    /// Whether the namespace has no interned strings.
    pub fn is_empty(&self, namespace: &str) -> bool {
        self.len(namespace) == 0
    }

    /// Capture the registry state for snapshots.
    pub fn state(&self) -> StringRegistryState {
        StringRegistryState {
            namespaces: self
                .namespaces
                .iter()
                .map(|(ns, data)| (ns.clone(), data.names.clone()))
                .collect(),
        }
    }

    /// Restore a previously captured state, replacing all current tables.
    pub fn restore(&mut self, state: &StringRegistryState) {
        self.namespaces.clear();
        for (ns, names) in &state.namespaces {
            let mut data = Namespace::default();
            for (id, name) in names.iter().enumerate() {
                data.by_name.insert(name.clone(), id as u32);
                data.names.push(name.clone());
            }
            self.namespaces.insert(ns.clone(), data);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_dense_and_ordered() {
        let mut reg = StringRegistry::new();
        assert_eq!(reg.intern(NS_CLIENT, "alice"), 0);
        assert_eq!(reg.intern(NS_CLIENT, "bob"), 1);
        assert_eq!(reg.intern(NS_CLIENT, "carol"), 2);
        // Re-interning returns the original id.
        assert_eq!(reg.intern(NS_CLIENT, "alice"), 0);
        assert_eq!(reg.len(NS_CLIENT), 3);
    }

    #[test]
    fn namespaces_are_independent() {
        let mut reg = StringRegistry::new();
        assert_eq!(reg.intern(NS_CLIENT, "alice"), 0);
        assert_eq!(reg.intern(NS_ENTITY_TYPE, "alice"), 0);
        assert_eq!(reg.intern(NS_ENTITY_TYPE, "food"), 1);
        assert_eq!(reg.lookup(NS_CLIENT, "food"), None);
    }

    #[test]
    fn resolve_roundtrip() {
        let mut reg = StringRegistry::new();
        let id = reg.intern(NS_COMPONENT, "position");
        assert_eq!(reg.resolve(NS_COMPONENT, id), Some("position"));
        assert_eq!(reg.resolve(NS_COMPONENT, 99), None);
    }

    #[test]
    fn state_restore_preserves_allocation_order() {
        let mut reg = StringRegistry::new();
        reg.intern(NS_CLIENT, "alice");
        reg.intern(NS_CLIENT, "bob");
        let state = reg.state();

        let mut restored = StringRegistry::new();
        restored.restore(&state);

        // Existing ids survive, and the NEXT allocation continues identically
        // on both registries.
        assert_eq!(restored.lookup(NS_CLIENT, "bob"), Some(1));
        assert_eq!(restored.intern(NS_CLIENT, "carol"), 2);
        assert_eq!(reg.intern(NS_CLIENT, "carol"), 2);
    }

    #[test]
    fn restore_replaces_previous_contents() {
        let mut a = StringRegistry::new();
        a.intern(NS_CLIENT, "old");
        let mut b = StringRegistry::new();
        b.intern(NS_CLIENT, "alice");
        a.restore(&b.state());
        assert_eq!(a.lookup(NS_CLIENT, "old"), None);
        assert_eq!(a.lookup(NS_CLIENT, "alice"), Some(0));
    }
}
