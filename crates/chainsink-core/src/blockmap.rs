//! In-memory valid-blocks cache.
//!
//! Maps `height → canonical hash` for the unfinalized window. Queries over
//! hot tables filter orphaned rows against this map instead of deleting
//! them; persistence of the map is layered on top in `chainsink-engine`.

use std::collections::BTreeMap;

use crate::types::BlockRef;

/// The set of block hashes currently considered canonical, one per height.
#[derive(Debug, Clone, Default)]
pub struct ValidBlocks {
    by_height: BTreeMap<u64, String>,
}

impl ValidBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the canonical hash at `height` (latest wins).
    pub fn insert(&mut self, height: u64, hash: impl Into<String>) {
        self.by_height.insert(height, hash.into());
    }

    /// Constant-time membership test.
    pub fn is_valid(&self, height: u64, hash: &str) -> bool {
        self.by_height.get(&height).is_some_and(|h| h == hash)
    }

    pub fn highest(&self) -> Option<BlockRef> {
        self.by_height
            .last_key_value()
            .map(|(h, hash)| BlockRef::new(*h, hash.clone()))
    }

    pub fn lowest(&self) -> Option<BlockRef> {
        self.by_height
            .first_key_value()
            .map(|(h, hash)| BlockRef::new(*h, hash.clone()))
    }

    pub fn count(&self) -> usize {
        self.by_height.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_height.is_empty()
    }

    /// Hash recorded at `height`, if any.
    pub fn hash_at(&self, height: u64) -> Option<&str> {
        self.by_height.get(&height).map(String::as_str)
    }

    /// Remove every entry with `height >= from` and return the removed
    /// heights (reorg rollback).
    pub fn remove_from(&mut self, from: u64) -> Vec<u64> {
        let removed: Vec<u64> = self.by_height.range(from..).map(|(h, _)| *h).collect();
        for h in &removed {
            self.by_height.remove(h);
        }
        removed
    }

    /// Remove every entry below `threshold` and return the removed heights
    /// (finality pruning).
    pub fn prune_below(&mut self, threshold: u64) -> Vec<u64> {
        let removed: Vec<u64> = self.by_height.range(..threshold).map(|(h, _)| *h).collect();
        for h in &removed {
            self.by_height.remove(h);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.by_height.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = BlockRef> + '_ {
        self.by_height
            .iter()
            .map(|(h, hash)| BlockRef::new(*h, hash.clone()))
    }

    /// Emit a predicate hiding orphaned rows from queries:
    /// rows at or below the finality floor pass unconditionally, rows in the
    /// hot window pass only when their `(height, hash)` pair is canonical.
    ///
    /// A row whose height sits in the hot window but whose hash is absent
    /// from the map is filtered out.
    pub fn filter_sql(
        &self,
        height_col: &str,
        hash_col: &str,
        current_height: u64,
        finality_depth: u64,
    ) -> String {
        let floor = current_height.saturating_sub(finality_depth);
        if self.by_height.is_empty() {
            return format!("({height_col} <= {floor})");
        }
        let pairs: Vec<String> = self
            .by_height
            .iter()
            .map(|(h, hash)| format!("({h}, '{}')", hash.replace('\'', "\\'")))
            .collect();
        format!(
            "(({height_col} <= {floor}) OR (({height_col}, {hash_col}) IN ({})))",
            pairs.join(", ")
        )
    }
}
