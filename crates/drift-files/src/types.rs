//! Item type classification.
//!
//! Item types are free-form identifiers (`"public.png"`, `"image/png"`, ...).
//! A [`TypeTree`] records which types conform to which supertypes. Every type
//! conforms to itself and to [`GENERIC_DATA_TYPE`]; a type that was never
//! declared conforms to nothing else.

use std::collections::{HashMap, HashSet, VecDeque};

/// Supertype every item type conforms to
pub const GENERIC_DATA_TYPE: &str = "public.data";

/// Classifies item types against supertypes
pub trait TypeClassifier: Send + Sync {
    /// Returns true if `item_type` is `supertype` or one of its descendants
    fn conforms_to(&self, item_type: &str, supertype: &str) -> bool;
}

/// Declared type hierarchy
#[derive(Debug, Clone, Default)]
pub struct TypeTree {
    parents: HashMap<String, Vec<String>>,
}

impl TypeTree {
    /// Create an empty hierarchy (only the generic data rule applies)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a hierarchy with common text and image types declared
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut tree = Self::new();
        tree.declare("public.content", &[GENERIC_DATA_TYPE]);
        tree.declare("public.text", &["public.content"]);
        tree.declare("public.plain-text", &["public.text"]);
        tree.declare("public.utf8-plain-text", &["public.plain-text"]);
        tree.declare("text/plain", &["public.plain-text"]);
        tree.declare("public.url", &[GENERIC_DATA_TYPE]);
        tree.declare("public.image", &["public.content"]);
        tree.declare("public.png", &["public.image"]);
        tree.declare("public.jpeg", &["public.image"]);
        tree.declare("image/png", &["public.png"]);
        tree.declare("image/jpeg", &["public.jpeg"]);
        tree
    }

    /// Declare `item_type` as conforming to each of `parents`
    pub fn declare(&mut self, item_type: &str, parents: &[&str]) {
        let entry = self.parents.entry(item_type.to_string()).or_default();
        for parent in parents {
            if !entry.iter().any(|p| p == parent) {
                entry.push((*parent).to_string());
            }
        }
    }

    /// Returns true if `item_type` has been declared
    #[must_use]
    pub fn is_declared(&self, item_type: &str) -> bool {
        self.parents.contains_key(item_type)
    }
}

impl TypeClassifier for TypeTree {
    fn conforms_to(&self, item_type: &str, supertype: &str) -> bool {
        if item_type == supertype || supertype == GENERIC_DATA_TYPE {
            return true;
        }

        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([item_type]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            for parent in self.parents.get(current).into_iter().flatten() {
                if parent == supertype {
                    return true;
                }
                queue.push_back(parent);
            }
        }
        false
    }
}
