//! Measurement cache, retained across reconciliation passes.
//!
//! Entries are keyed by (view tag, incoming constraints). A clean node laid
//! out again under the same constraints reuses its previous size and the
//! positions already stored in its subtree. Dirtying a node drops its entries.

use std::collections::HashMap;

use weft_api::{Size, ViewTag};

use crate::LayoutConstraints;

/// One entry per node: the constraints it was last laid out under.
#[derive(Debug, Default)]
pub struct LayoutCache {
    entries: HashMap<ViewTag, ([u32; 4], Size)>,
    hits: u64,
    misses: u64,
}

impl LayoutCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, tag: ViewTag, constraints: &LayoutConstraints) -> Option<Size> {
        match self.entries.get(&tag) {
            Some((key, size)) if *key == constraints.key() => {
                self.hits += 1;
                Some(*size)
            }
            _ => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, tag: ViewTag, constraints: &LayoutConstraints, size: Size) {
        self.entries.insert(tag, (constraints.key(), size));
    }

    pub fn invalidate(&mut self, tag: ViewTag) {
        self.entries.remove(&tag);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (hits, misses) since construction.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
