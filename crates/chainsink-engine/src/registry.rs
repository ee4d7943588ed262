//! Valid-blocks registry — the cheap substitute for `DELETE`.
//!
//! Every hot-block insert records `{processor_id, height, hash}` here.
//! Queries over the unfinalized window filter orphaned rows against the
//! registry; a reorg rewrites registry entries and never touches data
//! tables. Prune and reorg use explicit deletes against this table only.

use std::sync::Arc;

use chainsink_core::blockmap::ValidBlocks;
use chainsink_core::types::BlockRef;
use chainsink_core::SinkError;
use chainsink_storage::database::{Database, DdlEngine, TableDdl};

/// Physical name of the registry table.
pub const REGISTRY_TABLE: &str = "valid_blocks";

/// Memory-cached, persisted registry for one processor.
pub struct ValidBlocksRegistry {
    db: Arc<dyn Database>,
    processor_id: String,
    finality_depth: u64,
    cache: ValidBlocks,
    initialized: bool,
}

impl ValidBlocksRegistry {
    pub fn new(db: Arc<dyn Database>, processor_id: impl Into<String>, finality_depth: u64) -> Self {
        Self {
            db,
            processor_id: processor_id.into(),
            finality_depth,
            cache: ValidBlocks::new(),
            initialized: false,
        }
    }

    fn ddl() -> TableDdl {
        TableDdl {
            name: REGISTRY_TABLE.into(),
            columns: vec![
                ("height".into(), "UInt64".into()),
                ("hash".into(), "String".into()),
                ("timestamp".into(), "DateTime64(3)".into()),
                ("processor_id".into(), "String".into()),
            ],
            engine: DdlEngine::ReplacingMergeTree {
                version_column: Some("timestamp".into()),
            },
            order_by: "processor_id, height".into(),
        }
    }

    /// Ensure the backing table exists and load this processor's entries.
    /// Idempotent.
    pub async fn initialize(&mut self) -> Result<(), SinkError> {
        if self.initialized {
            return Ok(());
        }
        self.db.ensure_table(&Self::ddl()).await?;
        let blocks = self
            .db
            .load_valid_blocks(REGISTRY_TABLE, &self.processor_id)
            .await?;
        self.cache.clear();
        for b in &blocks {
            self.cache.insert(b.height, b.hash.clone());
        }
        self.initialized = true;
        tracing::debug!(
            processor_id = %self.processor_id,
            entries = self.cache.count(),
            "valid-blocks registry loaded"
        );
        Ok(())
    }

    /// Record one canonical block and prune entries below the finality
    /// window.
    pub async fn add_block(&mut self, block: &BlockRef) -> Result<(), SinkError> {
        self.add_blocks(std::slice::from_ref(block)).await
    }

    /// Batch form; the prune threshold uses the max height of the batch.
    pub async fn add_blocks(&mut self, blocks: &[BlockRef]) -> Result<(), SinkError> {
        if blocks.is_empty() {
            return Ok(());
        }
        for b in blocks {
            self.cache.insert(b.height, b.hash.clone());
        }
        self.db
            .insert_valid_blocks(REGISTRY_TABLE, &self.processor_id, blocks)
            .await?;

        let max = blocks.iter().map(|b| b.height).max().unwrap_or(0);
        let threshold = max.saturating_sub(self.finality_depth);
        if !self.cache.prune_below(threshold).is_empty() {
            self.db
                .delete_valid_blocks_below(REGISTRY_TABLE, &self.processor_id, threshold)
                .await?;
        }
        Ok(())
    }

    /// Drop every entry at or above `from_height`, then record the blocks of
    /// the replacing chain segment.
    ///
    /// If the reinsert fails after the removal persisted, the next startup
    /// converges anyway: recovery rolls back to the cold cursor and rebuilds.
    pub async fn handle_reorg(
        &mut self,
        from_height: u64,
        new_blocks: &[BlockRef],
    ) -> Result<(), SinkError> {
        let removed = self.cache.remove_from(from_height);
        self.db
            .delete_valid_blocks_from(REGISTRY_TABLE, &self.processor_id, from_height)
            .await?;
        tracing::info!(
            processor_id = %self.processor_id,
            from_height,
            removed = removed.len(),
            inserted = new_blocks.len(),
            "registry reorg"
        );
        self.add_blocks(new_blocks).await
    }

    pub fn is_valid(&self, height: u64, hash: &str) -> bool {
        self.cache.is_valid(height, hash)
    }

    pub fn highest_block(&self) -> Option<BlockRef> {
        self.cache.highest()
    }

    pub fn lowest_block(&self) -> Option<BlockRef> {
        self.cache.lowest()
    }

    pub fn count(&self) -> usize {
        self.cache.count()
    }

    pub fn hash_at(&self, height: u64) -> Option<String> {
        self.cache.hash_at(height).map(str::to_string)
    }

    /// Predicate hiding orphaned rows from queries over a hot table.
    pub fn build_filter(&self, height_col: &str, hash_col: &str, current_height: u64) -> String {
        self.cache
            .filter_sql(height_col, hash_col, current_height, self.finality_depth)
    }

    /// Remove all entries for this processor. Used only by the reconciler.
    pub async fn clear(&mut self) -> Result<(), SinkError> {
        self.cache.clear();
        self.db
            .clear_valid_blocks(REGISTRY_TABLE, &self.processor_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainsink_storage::memory::MemoryDatabase;

    async fn registry(depth: u64) -> (Arc<MemoryDatabase>, ValidBlocksRegistry) {
        let db = Arc::new(MemoryDatabase::new());
        let mut reg = ValidBlocksRegistry::new(db.clone(), "test", depth);
        reg.initialize().await.unwrap();
        (db, reg)
    }

    fn b(h: u64, hash: &str) -> BlockRef {
        BlockRef::new(h, hash)
    }

    #[tokio::test]
    async fn add_block_persists_and_prunes() {
        let (db, mut reg) = registry(3).await;
        for h in 0..10 {
            reg.add_block(&b(h, &format!("0x{h}"))).await.unwrap();
        }
        // Window is [max - depth, max] = [6, 9]
        assert_eq!(reg.lowest_block().unwrap().height, 6);
        assert_eq!(reg.highest_block().unwrap().height, 9);
        assert_eq!(reg.count(), 4);

        // Persistence pruned too
        let stored = db.load_valid_blocks(REGISTRY_TABLE, "test").await.unwrap();
        assert_eq!(stored.len(), 4);
        assert_eq!(stored[0].height, 6);
    }

    #[tokio::test]
    async fn initialize_is_idempotent_and_reloads() {
        let (db, mut reg) = registry(10).await;
        reg.add_blocks(&[b(1, "a"), b(2, "b")]).await.unwrap();
        reg.initialize().await.unwrap(); // no-op
        assert_eq!(reg.count(), 2);

        // A fresh registry over the same database sees the same entries
        let mut reg2 = ValidBlocksRegistry::new(db, "test", 10);
        reg2.initialize().await.unwrap();
        assert!(reg2.is_valid(2, "b"));
    }

    #[tokio::test]
    async fn handle_reorg_rewrites_suffix() {
        let (db, mut reg) = registry(10).await;
        reg.add_blocks(&[b(100, "A"), b(101, "B"), b(102, "C")])
            .await
            .unwrap();

        reg.handle_reorg(102, &[b(102, "C2"), b(103, "D2")]).await.unwrap();

        assert!(!reg.is_valid(102, "C"));
        assert!(reg.is_valid(102, "C2"));
        assert!(reg.is_valid(103, "D2"));
        assert!(reg.is_valid(101, "B"));

        let stored = db.load_valid_blocks(REGISTRY_TABLE, "test").await.unwrap();
        assert_eq!(
            stored,
            vec![b(100, "A"), b(101, "B"), b(102, "C2"), b(103, "D2")]
        );
    }

    #[tokio::test]
    async fn handle_reorg_is_idempotent() {
        let (_db, mut reg) = registry(10).await;
        reg.add_blocks(&[b(10, "a"), b(11, "b")]).await.unwrap();
        reg.handle_reorg(11, &[b(11, "b2")]).await.unwrap();
        reg.handle_reorg(11, &[b(11, "b2")]).await.unwrap();
        assert_eq!(reg.count(), 2);
        assert!(reg.is_valid(11, "b2"));
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let (db, mut reg) = registry(10).await;
        reg.add_blocks(&[b(1, "a"), b(2, "b")]).await.unwrap();
        reg.clear().await.unwrap();
        assert_eq!(reg.count(), 0);
        assert!(db.load_valid_blocks(REGISTRY_TABLE, "test").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn filter_spans_cold_arm_and_pairs() {
        let (_db, mut reg) = registry(10).await;
        reg.add_blocks(&[b(100, "a")]).await.unwrap();
        let sql = reg.build_filter("height", "hash", 100);
        assert!(sql.contains("height <= 90"));
        assert!(sql.contains("(100, 'a')"));
    }
}
