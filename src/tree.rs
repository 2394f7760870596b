//! Children-index construction shared by both export pipelines.
//!
//! The tree is never stored as a self-referential graph: nodes keep only an
//! optional parent key, and serialization walks this key-to-children index
//! downward from the roots.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ChildrenIndex {
    pub roots: Vec<String>,
    pub children: HashMap<String, Vec<String>>,
}

/// Builds the index over `keys` in their stored order. A key whose parent is
/// non-empty and present among the keys becomes that parent's child; every
/// other key is a root. Callers resolve or reject dangling parents before
/// this point, so the result is total and acyclic.
pub fn build_children_index<'a, F>(keys: &[String], parent_of: F) -> ChildrenIndex
where
    F: Fn(&str) -> &'a str,
{
    let mut index = ChildrenIndex {
        roots: Vec::new(),
        children: keys
            .iter()
            .map(|key| (key.clone(), Vec::new()))
            .collect(),
    };

    for key in keys {
        let parent = parent_of(key);
        if !parent.is_empty() && index.children.contains_key(parent) {
            if let Some(siblings) = index.children.get_mut(parent) {
                siblings.push(key.clone());
            }
        } else {
            index.roots.push(key.clone());
        }
    }

    index
}
