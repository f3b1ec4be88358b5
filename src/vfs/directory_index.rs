//! Directory → children index.

use std::collections::{BTreeSet, HashMap};

use super::PathHashDigest;

/// Tracks which child digests each directory digest currently contains.
#[derive(Debug, Default)]
pub struct DirectoryIndex {
    children: HashMap<PathHashDigest, BTreeSet<PathHashDigest>>,
}

impl DirectoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, parent: &PathHashDigest, child: &PathHashDigest) {
        self.children
            .entry(parent.clone())
            .or_default()
            .insert(child.clone());
    }

    pub fn delete(&mut self, parent: &PathHashDigest, child: &PathHashDigest) {
        if let Some(children) = self.children.get_mut(parent) {
            children.remove(child);
        }
    }

    pub fn children(&self, parent: &PathHashDigest) -> impl Iterator<Item = &PathHashDigest> {
        self.children.get(parent).into_iter().flatten()
    }

    pub fn contains(&self, parent: &PathHashDigest, child: &PathHashDigest) -> bool {
        self.children
            .get(parent)
            .is_some_and(|children| children.contains(child))
    }
}
