//! Namespace configs: the userset-rewrite vocabulary
//!
//! Per object type, a namespace declares which relations may appear in
//! direct tuples and how permissions rewrite into Boolean trees over
//! those relations. Evaluation of the trees lives in the engine; this
//! module is pure data plus small helpers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// One node of a userset-rewrite tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rewrite {
    /// Direct tuple carrying the name under evaluation as its relation
    This,
    /// Evaluate another relation or permission on the same object
    ComputedUserset(String),
    /// Enumerate parent tuples with `tupleset`, then evaluate `computed`
    /// on each parent object
    TupleToUserset {
        /// Relation whose tuples point at parent objects
        tupleset: String,
        /// Relation/permission evaluated on each parent
        computed: String,
    },
    /// True if any child is true (short-circuits)
    Union(Vec<Rewrite>),
    /// True if all children are true (short-circuits)
    Intersection(Vec<Rewrite>),
    /// `base AND NOT subtract`
    Exclusion(Box<Rewrite>, Box<Rewrite>),
}

impl Rewrite {
    /// Collect the relation names a tree reaches through direct leaves
    ///
    /// Used by the mount resolver to know which relations imply a
    /// permission without running the full evaluation.
    pub fn direct_relations(&self, own_name: &str, config: &NamespaceConfig) -> HashSet<String> {
        let mut out = HashSet::new();
        let mut seen = HashSet::new();
        self.collect_direct(own_name, config, &mut out, &mut seen);
        out
    }

    fn collect_direct(
        &self,
        own_name: &str,
        config: &NamespaceConfig,
        out: &mut HashSet<String>,
        seen: &mut HashSet<String>,
    ) {
        match self {
            Rewrite::This => {
                out.insert(own_name.to_string());
            }
            Rewrite::ComputedUserset(name) => {
                if !seen.insert(name.clone()) {
                    return;
                }
                if let Some(tree) = config.permissions.get(name) {
                    tree.collect_direct(name, config, out, seen);
                } else if config.relations.contains(name) {
                    out.insert(name.clone());
                }
            }
            Rewrite::TupleToUserset { .. } => {}
            Rewrite::Union(children) | Rewrite::Intersection(children) => {
                for child in children {
                    child.collect_direct(own_name, config, out, seen);
                }
            }
            Rewrite::Exclusion(base, _) => {
                base.collect_direct(own_name, config, out, seen);
            }
        }
    }
}

/// Namespace config for one object type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Object type this config governs
    pub object_type: String,
    /// Relations direct tuples may carry
    pub relations: HashSet<String>,
    /// Permission name -> rewrite tree
    pub permissions: BTreeMap<String, Rewrite>,
}

impl NamespaceConfig {
    /// Resolve a name to its rewrite tree
    ///
    /// Permissions use their declared tree; bare relations evaluate as a
    /// direct-tuple check. Unknown names resolve to None (deny).
    pub fn resolve(&self, name: &str) -> Option<Rewrite> {
        if let Some(tree) = self.permissions.get(name) {
            return Some(tree.clone());
        }
        if self.relations.contains(name) {
            return Some(Rewrite::This);
        }
        None
    }

    /// Relations whose direct grant implies the given permission
    pub fn relations_implying(&self, permission: &str) -> HashSet<String> {
        match self.resolve(permission) {
            Some(tree) => tree.direct_relations(permission, self),
            None => HashSet::new(),
        }
    }

    /// The built-in config for `file` objects
    ///
    /// owner > writer > reader for reads; writes need writer or owner;
    /// both inherit from the parent folder through `parent` tuples;
    /// traverse is implied by read or write.
    pub fn file() -> Self {
        let mut permissions = BTreeMap::new();
        permissions.insert(
            "read".to_string(),
            Rewrite::Union(vec![
                Rewrite::ComputedUserset("reader".to_string()),
                Rewrite::ComputedUserset("writer".to_string()),
                Rewrite::ComputedUserset("owner".to_string()),
                Rewrite::TupleToUserset {
                    tupleset: "parent".to_string(),
                    computed: "read".to_string(),
                },
            ]),
        );
        permissions.insert(
            "write".to_string(),
            Rewrite::Union(vec![
                Rewrite::ComputedUserset("writer".to_string()),
                Rewrite::ComputedUserset("owner".to_string()),
                Rewrite::TupleToUserset {
                    tupleset: "parent".to_string(),
                    computed: "write".to_string(),
                },
            ]),
        );
        permissions.insert(
            "execute".to_string(),
            Rewrite::Union(vec![
                Rewrite::ComputedUserset("writer".to_string()),
                Rewrite::ComputedUserset("owner".to_string()),
            ]),
        );
        permissions.insert(
            "share".to_string(),
            Rewrite::ComputedUserset("owner".to_string()),
        );
        permissions.insert(
            "traverse".to_string(),
            Rewrite::Union(vec![
                Rewrite::ComputedUserset("read".to_string()),
                Rewrite::ComputedUserset("write".to_string()),
            ]),
        );
        NamespaceConfig {
            object_type: "file".to_string(),
            relations: ["owner", "writer", "reader", "parent"]
                .into_iter()
                .map(String::from)
                .collect(),
            permissions,
        }
    }

    /// The built-in config for `memory` objects
    ///
    /// Memories are simpler: no parent inheritance, owner and reader only.
    pub fn memory() -> Self {
        let mut permissions = BTreeMap::new();
        permissions.insert(
            "read".to_string(),
            Rewrite::Union(vec![
                Rewrite::ComputedUserset("reader".to_string()),
                Rewrite::ComputedUserset("owner".to_string()),
            ]),
        );
        permissions.insert(
            "write".to_string(),
            Rewrite::ComputedUserset("owner".to_string()),
        );
        permissions.insert(
            "share".to_string(),
            Rewrite::ComputedUserset("owner".to_string()),
        );
        NamespaceConfig {
            object_type: "memory".to_string(),
            relations: ["owner", "reader"].into_iter().map(String::from).collect(),
            permissions,
        }
    }
}

/// Registry of namespace configs, one per object type
///
/// Loaded once and shared; configs are immutable after registration.
#[derive(Debug, Clone, Default)]
pub struct NamespaceRegistry {
    configs: BTreeMap<String, NamespaceConfig>,
}

impl NamespaceRegistry {
    /// Registry with the built-in `file` and `memory` configs
    pub fn builtin() -> Self {
        let mut registry = NamespaceRegistry::default();
        registry.register(NamespaceConfig::file());
        registry.register(NamespaceConfig::memory());
        registry
    }

    /// Register or replace a config
    pub fn register(&mut self, config: NamespaceConfig) {
        self.configs.insert(config.object_type.clone(), config);
    }

    /// Config for an object type
    pub fn get(&self, object_type: &str) -> Option<&NamespaceConfig> {
        self.configs.get(object_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_namespace_resolves_permissions() {
        let config = NamespaceConfig::file();
        assert!(config.resolve("read").is_some());
        assert!(config.resolve("write").is_some());
        assert!(config.resolve("traverse").is_some());
        // Bare relation resolves to a direct check
        assert_eq!(config.resolve("reader"), Some(Rewrite::This));
        assert!(config.resolve("launch_missiles").is_none());
    }

    #[test]
    fn test_relations_implying_read() {
        let config = NamespaceConfig::file();
        let implying = config.relations_implying("read");
        assert!(implying.contains("reader"));
        assert!(implying.contains("writer"));
        assert!(implying.contains("owner"));
        assert!(!implying.contains("parent"));
    }

    #[test]
    fn test_relations_implying_write_excludes_reader() {
        let config = NamespaceConfig::file();
        let implying = config.relations_implying("write");
        assert!(implying.contains("writer"));
        assert!(implying.contains("owner"));
        assert!(!implying.contains("reader"));
    }

    #[test]
    fn test_traverse_implied_by_read_and_write_relations() {
        let config = NamespaceConfig::file();
        let implying = config.relations_implying("traverse");
        assert!(implying.contains("reader"));
        assert!(implying.contains("writer"));
        assert!(implying.contains("owner"));
    }

    #[test]
    fn test_direct_relations_handles_cycles() {
        // a -> b -> a must terminate
        let mut permissions = BTreeMap::new();
        permissions.insert(
            "a".to_string(),
            Rewrite::ComputedUserset("b".to_string()),
        );
        permissions.insert(
            "b".to_string(),
            Rewrite::ComputedUserset("a".to_string()),
        );
        let config = NamespaceConfig {
            object_type: "cyclic".to_string(),
            relations: HashSet::new(),
            permissions,
        };
        // Terminates with an empty set
        assert!(config.relations_implying("a").is_empty());
    }

    #[test]
    fn test_registry_builtin() {
        let registry = NamespaceRegistry::builtin();
        assert!(registry.get("file").is_some());
        assert!(registry.get("memory").is_some());
        assert!(registry.get("widget").is_none());
    }
}
