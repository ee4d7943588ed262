//! Hot → cold migration.
//!
//! Once the producer is at the chain tip, rows keep accumulating in the hot
//! zone. Periodically the engine promotes everything at or below
//! `max_height - hot_blocks_depth` into the cold zone, then advances the
//! cold cursor. The copy is server-side unless a row transform is
//! installed; the cold tables' merge semantics absorb replays.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use chainsink_core::hotchain::HotChain;
use chainsink_core::SinkError;
use chainsink_storage::database::Database;
use chainsink_storage::RowSet;

use crate::checkpoint::CheckpointStore;
use crate::registry::ValidBlocksRegistry;
use crate::tables::TableSet;

/// When the coordinator should invoke the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationTrigger {
    /// Every N new blocks processed at the tip.
    BlockCount(u64),
    /// Every time the finalized height advances.
    FinalityAdvance,
}

/// Rows promoted out of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMigration {
    pub name: String,
    pub rows: u64,
}

/// Result handed to `after_migration`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrated: u64,
    pub cutoff_height: i64,
    pub duration_ms: u64,
    pub tables: Vec<TableMigration>,
}

impl MigrationReport {
    fn noop(cutoff_height: i64) -> Self {
        Self {
            migrated: 0,
            cutoff_height,
            duration_ms: 0,
            tables: vec![],
        }
    }
}

/// Lifecycle hooks around a migration pass.
#[async_trait]
pub trait MigrationObserver: Send + Sync {
    /// Return `false` to veto the pass. The block counter is NOT reset on a
    /// veto, so the hook is consulted again on the very next trigger check.
    async fn before_migration(&self, _cutoff: u64) -> bool {
        true
    }

    async fn after_migration(&self, _report: &MigrationReport) {}

    /// Replace the per-table copy loop entirely. Return `Ok(Some(..))` with
    /// per-table results to skip the built-in loop; cutoff-hash resolution
    /// and the cold-checkpoint advance still run.
    async fn custom_migration(
        &self,
        _db: &dyn Database,
        _cutoff: u64,
    ) -> Result<Option<Vec<TableMigration>>, SinkError> {
        Ok(None)
    }
}

/// Client-round-trip transform for migrated rows. May filter (return fewer
/// rows than it received).
#[async_trait]
pub trait RowTransform: Send + Sync {
    async fn transform(&self, table: &str, rows: RowSet) -> Result<RowSet, SinkError>;
}

/// The migration engine for one processor.
pub struct MigrationEngine {
    db: Arc<dyn Database>,
    tables: Arc<TableSet>,
    processor_id: String,
    height_column: String,
    hot_blocks_depth: u64,
    trigger: MigrationTrigger,
    observer: Option<Arc<dyn MigrationObserver>>,
    transform: Option<Arc<dyn RowTransform>>,
    last_migration_height: i64,
    blocks_since_last_migration: u64,
    finality_advanced: bool,
}

impl MigrationEngine {
    pub fn new(
        db: Arc<dyn Database>,
        tables: Arc<TableSet>,
        processor_id: impl Into<String>,
        height_column: impl Into<String>,
        hot_blocks_depth: u64,
        trigger: MigrationTrigger,
    ) -> Self {
        Self {
            db,
            tables,
            processor_id: processor_id.into(),
            height_column: height_column.into(),
            hot_blocks_depth,
            trigger,
            observer: None,
            transform: None,
            last_migration_height: -1,
            blocks_since_last_migration: 0,
            finality_advanced: false,
        }
    }

    pub fn set_observer(&mut self, observer: Arc<dyn MigrationObserver>) {
        self.observer = Some(observer);
    }

    pub fn set_transform(&mut self, transform: Arc<dyn RowTransform>) {
        self.transform = Some(transform);
    }

    /// Seed the low-water mark from the cold cursor at connect, so replayed
    /// processors skip already-promoted cutoffs.
    pub fn bootstrap(&mut self, cold_height: i64) {
        self.last_migration_height = cold_height;
        self.blocks_since_last_migration = 0;
        self.finality_advanced = false;
    }

    pub fn note_block(&mut self) {
        self.note_blocks(1);
    }

    pub fn note_blocks(&mut self, n: u64) {
        self.blocks_since_last_migration += n;
    }

    pub fn note_finality_advance(&mut self) {
        self.finality_advanced = true;
    }

    pub fn blocks_since_last_migration(&self) -> u64 {
        self.blocks_since_last_migration
    }

    pub fn last_migration_height(&self) -> i64 {
        self.last_migration_height
    }

    /// Whether the trigger policy calls for a pass now.
    pub fn due(&self) -> bool {
        match self.trigger {
            MigrationTrigger::BlockCount(interval) => {
                self.blocks_since_last_migration >= interval
            }
            MigrationTrigger::FinalityAdvance => self.finality_advanced,
        }
    }

    /// Run one migration pass.
    pub async fn run(
        &mut self,
        checkpoints: &CheckpointStore,
        hot_chain: &HotChain,
        registry: &ValidBlocksRegistry,
    ) -> Result<MigrationReport, SinkError> {
        let started = Instant::now();
        let network = self.tables.network().to_string();

        let Some(representative) = self.tables.representative() else {
            return Ok(MigrationReport::noop(-1));
        };
        let representative_hot = representative.hot_name(&network);
        let representative_cold = representative.cold_name(&network);
        let representative_has_hash = representative.has_column("hash");

        // 1. Cutoff from the representative hot table.
        let max_height = match self.db.max_u64(&representative_hot, &self.height_column).await {
            Ok(Some(h)) => h,
            Ok(None) => return Ok(MigrationReport::noop(-1)),
            Err(e) if e.is_unknown_table() => {
                tracing::debug!(table = %representative_hot, "representative table absent; skipping migration");
                return Ok(MigrationReport::noop(-1));
            }
            Err(e) => return Err(e),
        };
        let cutoff = max_height as i64 - self.hot_blocks_depth as i64;
        if cutoff <= self.last_migration_height {
            return Ok(MigrationReport::noop(cutoff));
        }

        if let Some(observer) = &self.observer {
            if !observer.before_migration(cutoff as u64).await {
                tracing::info!(
                    processor_id = %self.processor_id,
                    cutoff,
                    "migration vetoed by before_migration"
                );
                return Ok(MigrationReport::noop(cutoff));
            }
        }

        // 2. Promote each hot-supported table.
        let custom = match &self.observer {
            Some(observer) => observer.custom_migration(self.db.as_ref(), cutoff as u64).await?,
            None => None,
        };
        let table_results = match custom {
            Some(results) => results,
            None => self.migrate_tables(&network, cutoff as u64).await,
        };
        let migrated: u64 = table_results.iter().map(|t| t.rows).sum();

        // 3. Resolve the cutoff hash and advance the cold cursor.
        let cutoff_hash = self
            .resolve_cutoff_hash(
                hot_chain,
                registry,
                &representative_cold,
                &representative_hot,
                representative_has_hash,
                cutoff as u64,
            )
            .await;
        match &cutoff_hash {
            Some(hash) => checkpoints.save_cold(cutoff as u64, hash).await?,
            None => tracing::warn!(
                processor_id = %self.processor_id,
                cutoff,
                "cutoff hash unresolved; cold checkpoint not advanced"
            ),
        }

        self.last_migration_height = cutoff;
        self.blocks_since_last_migration = 0;
        self.finality_advanced = false;

        let report = MigrationReport {
            migrated,
            cutoff_height: cutoff,
            duration_ms: started.elapsed().as_millis() as u64,
            tables: table_results,
        };
        tracing::info!(
            processor_id = %self.processor_id,
            cutoff,
            migrated,
            tables = report.tables.len(),
            duration_ms = report.duration_ms,
            "migration complete"
        );
        if let Some(observer) = &self.observer {
            observer.after_migration(&report).await;
        }
        Ok(report)
    }

    async fn migrate_tables(&self, network: &str, cutoff: u64) -> Vec<TableMigration> {
        let mut results = Vec::new();
        for table in self.tables.hot_supported() {
            let hot = table.hot_name(network);
            let cold = table.cold_name(network);
            match self.migrate_one(table.base.as_str(), &hot, &cold, cutoff).await {
                Ok(0) => {}
                Ok(rows) => {
                    tracing::info!(table = %table.base, rows, cutoff, "table migrated");
                    results.push(TableMigration {
                        name: table.base.clone(),
                        rows,
                    });
                }
                Err(e) if e.is_unknown_table() => {
                    tracing::debug!(table = %table.base, "table absent; skipped");
                }
                Err(e) => {
                    tracing::warn!(table = %table.base, error = %e, "table migration failed; skipped");
                }
            }
        }
        results
    }

    async fn migrate_one(
        &self,
        base: &str,
        hot: &str,
        cold: &str,
        cutoff: u64,
    ) -> Result<u64, SinkError> {
        let count = self.db.count_up_to(hot, &self.height_column, cutoff).await?;
        if count == 0 {
            return Ok(0);
        }
        let rows = match &self.transform {
            None => {
                self.db
                    .copy_up_to(hot, cold, &self.height_column, cutoff)
                    .await?;
                count
            }
            Some(transform) => {
                let rows = self
                    .db
                    .select_up_to(hot, &self.height_column, cutoff)
                    .await?;
                let transformed = transform.transform(base, rows).await?;
                let written = transformed.len() as u64;
                if !transformed.is_empty() {
                    self.db
                        .insert(cold, &transformed.columns, transformed.rows)
                        .await?;
                }
                written
            }
        };
        self.db
            .delete_up_to(hot, &self.height_column, cutoff)
            .await?;
        Ok(rows)
    }

    async fn resolve_cutoff_hash(
        &self,
        hot_chain: &HotChain,
        registry: &ValidBlocksRegistry,
        representative_cold: &str,
        representative_hot: &str,
        representative_has_hash: bool,
        cutoff: u64,
    ) -> Option<String> {
        if let Some(block) = hot_chain.get(cutoff) {
            return Some(block.hash.clone());
        }
        if let Some(hash) = registry.hash_at(cutoff) {
            return Some(hash);
        }
        if representative_has_hash {
            for table in [representative_cold, representative_hot] {
                if let Ok(Some(hash)) = self
                    .db
                    .hash_at(table, &self.height_column, "hash", cutoff)
                    .await
                {
                    return Some(hash);
                }
            }
        }
        None
    }
}
