//! Ingest coordinator — drives the sink lifecycle.
//!
//! One coordinator per processor. All state transitions on the hot chain,
//! registry cache, and checkpoints run on this single serialized path; only
//! the insert step fans out across tables. Any fatal error moves the sink to
//! `Failed`; the supervisor reconnects, and the reconciler guarantees
//! convergence to a consistent resume point.

use std::sync::Arc;

use chainsink_core::config::SinkConfig;
use chainsink_core::hotchain::HotChain;
use chainsink_core::reorg;
use chainsink_core::types::{BlockRef, FinalBatchInfo, HeadState, HotBatchInfo};
use chainsink_core::SinkError;
use chainsink_observability::{init_tracing, LogConfig, SinkMetrics};
use chainsink_storage::database::Database;

use crate::buffer::Store;
use crate::checkpoint::CheckpointStore;
use crate::migration::{MigrationEngine, MigrationObserver, MigrationTrigger, RowTransform};
use crate::reconcile::reconcile;
use crate::registry::ValidBlocksRegistry;
use crate::router::ZoneRouter;
use crate::tables::TableSet;

/// Coordinator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Disconnected,
    Ready,
    Failed,
}

/// The entry point producers talk to.
pub struct IngestCoordinator {
    db: Arc<dyn Database>,
    config: SinkConfig,
    tables: Arc<TableSet>,
    router: Arc<ZoneRouter>,
    registry: ValidBlocksRegistry,
    checkpoints: CheckpointStore,
    migration: MigrationEngine,
    hot_chain: HotChain,
    height: i64,
    hash: String,
    finalized_height: i64,
    state: SinkState,
    metrics: Option<SinkMetrics>,
}

impl IngestCoordinator {
    pub fn new(db: Arc<dyn Database>, config: SinkConfig) -> Self {
        let tables = Arc::new(TableSet::from_specs(&config.network, &config.tables));
        let router = Arc::new(ZoneRouter::new(&config.network));
        let registry = ValidBlocksRegistry::new(
            db.clone(),
            &config.processor_id,
            config.hot_blocks_depth,
        );
        let checkpoints =
            CheckpointStore::new(db.clone(), &config.processor_id, &config.state_table);
        let trigger = if config.migration_on_finality {
            MigrationTrigger::FinalityAdvance
        } else {
            MigrationTrigger::BlockCount(config.migration_interval)
        };
        let migration = MigrationEngine::new(
            db.clone(),
            tables.clone(),
            &config.processor_id,
            &config.height_column,
            config.hot_blocks_depth,
            trigger,
        );
        Self {
            db,
            tables,
            router,
            registry,
            checkpoints,
            migration,
            hot_chain: HotChain::new(),
            height: -1,
            hash: String::new(),
            finalized_height: -1,
            state: SinkState::Disconnected,
            metrics: None,
            config,
        }
    }

    pub fn with_metrics(mut self, metrics: SinkMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Install the global log subscriber with the given levels. Embedders
    /// that already installed one keep it; the sink's events flow there.
    pub fn with_logging(self, log: &LogConfig) -> Self {
        if !init_tracing(log) {
            tracing::debug!(
                processor_id = %self.config.processor_id,
                "tracing subscriber already installed; keeping it"
            );
        }
        self
    }

    pub fn set_migration_observer(&mut self, observer: Arc<dyn MigrationObserver>) {
        self.migration.set_observer(observer);
    }

    pub fn set_row_transform(&mut self, transform: Arc<dyn RowTransform>) {
        self.migration.set_transform(transform);
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn registry(&self) -> &ValidBlocksRegistry {
        &self.registry
    }

    pub fn migration(&self) -> &MigrationEngine {
        &self.migration
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn hot_chain(&self) -> &HotChain {
        &self.hot_chain
    }

    /// The producer signals whether it is following live data.
    pub fn set_at_chain_tip(&self, flag: bool) {
        self.router.set_at_chain_tip(flag);
    }

    /// Connect, provision tables, recover, and return the resume state.
    pub async fn connect(&mut self) -> Result<HeadState, SinkError> {
        self.state = SinkState::Disconnected;
        self.db.ping().await?;
        self.tables.validate(&self.config.height_column)?;
        for ddl in self.tables.ddl() {
            self.db.ensure_table(&ddl).await?;
        }
        self.checkpoints.ensure_tables().await?;

        let state = if self.config.support_hot_blocks {
            self.registry.initialize().await?;
            reconcile(
                self.db.as_ref(),
                &self.checkpoints,
                &mut self.registry,
                &self.tables,
            )
            .await?
        } else {
            self.checkpoints.load_live().await?
        };

        self.hot_chain = HotChain::from_blocks(state.hot_blocks.clone());
        self.height = state.height;
        self.hash = state.hash.clone();
        self.finalized_height = state.finalized_height;

        let cold_height = self
            .checkpoints
            .load_cold()
            .await?
            .map(|c| c.height)
            .unwrap_or(-1);
        self.migration.bootstrap(cold_height);

        self.state = SinkState::Ready;
        tracing::info!(
            processor_id = %self.config.processor_id,
            height = state.height,
            finalized = state.finalized_height,
            phase = "connected",
            "sink ready"
        );
        Ok(state)
    }

    pub async fn disconnect(&mut self) {
        self.state = SinkState::Disconnected;
        tracing::info!(
            processor_id = %self.config.processor_id,
            height = self.height,
            phase = "disconnected",
            "sink disconnected"
        );
    }

    /// Commit one finalized batch: callback, flush, checkpoint, in that
    /// order. All side effects land before this returns.
    pub async fn transact_final<F>(
        &mut self,
        info: &FinalBatchInfo,
        cb: F,
    ) -> Result<(), SinkError>
    where
        F: FnOnce(&mut Store) -> Result<(), SinkError>,
    {
        self.ensure_ready()?;
        let result = self.transact_final_inner(info, cb).await;
        self.absorb(result)
    }

    async fn transact_final_inner<F>(
        &mut self,
        info: &FinalBatchInfo,
        cb: F,
    ) -> Result<(), SinkError>
    where
        F: FnOnce(&mut Store) -> Result<(), SinkError>,
    {
        let mut store = Store::new(self.tables.clone(), self.router.clone());
        cb(&mut store)?;
        let rows = store.flush(self.db.as_ref()).await?;

        self.finalized_height = info.next_head.height as i64;
        self.height = info.next_head.height as i64;
        self.hash = info.next_head.hash.clone();
        self.save_live().await?;

        let blocks = info.next_head.height.saturating_sub(info.prev_head.height);
        if let Some(metrics) = &self.metrics {
            metrics.record_ingest(&self.config.processor_id, blocks, rows);
        }
        tracing::debug!(
            processor_id = %self.config.processor_id,
            height = self.height,
            rows,
            phase = "final",
            "finalized batch committed"
        );
        Ok(())
    }

    /// Commit one hot batch: finality advance, reorg handling, then one
    /// callback + flush + registry insert per block, then the live
    /// checkpoint, then (at the tip) possibly a migration pass.
    pub async fn transact_hot<F>(&mut self, info: &HotBatchInfo, cb: F) -> Result<(), SinkError>
    where
        F: FnMut(&mut Store, &BlockRef) -> Result<(), SinkError>,
    {
        self.ensure_ready()?;
        if !self.config.support_hot_blocks {
            return Err(SinkError::Schema(
                "hot blocks are disabled for this sink".into(),
            ));
        }
        let result = self.transact_hot_inner(info, cb).await;
        self.absorb(result)
    }

    async fn transact_hot_inner<F>(
        &mut self,
        info: &HotBatchInfo,
        mut cb: F,
    ) -> Result<(), SinkError>
    where
        F: FnMut(&mut Store, &BlockRef) -> Result<(), SinkError>,
    {
        if (info.finalized_head.height as i64) > self.finalized_height {
            self.finalized_height = info.finalized_head.height as i64;
            self.hot_chain.drop_finalized(self.finalized_height);
            self.migration.note_finality_advance();
        }

        let mut reorged = false;
        // Blocks at or below this height are already committed; a reorg that
        // re-delivers its ancestor must not process it twice.
        let mut skip_floor = i64::MIN;
        if reorg::is_reorg(&self.hot_chain, &info.new_blocks) {
            let resolution =
                reorg::resolve(&self.hot_chain, &info.new_blocks, self.finalized_height)?;
            self.registry
                .handle_reorg((resolution.ancestor + 1) as u64, &info.new_blocks)
                .await?;
            self.hot_chain.truncate_above(resolution.ancestor);
            if let Some(metrics) = &self.metrics {
                metrics.record_reorg(
                    &self.config.processor_id,
                    resolution.ancestor,
                    resolution.dropped as u64,
                );
            }
            tracing::info!(
                processor_id = %self.config.processor_id,
                ancestor = resolution.ancestor,
                affected = resolution.dropped,
                phase = "reorg",
                "reorg applied"
            );
            skip_floor = resolution.ancestor;
            reorged = true;
        }

        let mut rows = 0u64;
        for block in info.new_blocks.iter().filter(|b| (b.height as i64) > skip_floor) {
            let mut store = Store::new(self.tables.clone(), self.router.clone());
            cb(&mut store, block)?;
            rows += store.flush(self.db.as_ref()).await?;
            if !reorged {
                self.registry.add_block(block).await?;
            }
            if !self.hot_chain.push(block.clone()) {
                return Err(SinkError::ReorgConsistency {
                    height: block.height,
                    reason: "block does not extend the hot chain".into(),
                });
            }
        }
        self.hot_chain
            .enforce_depth(self.config.hot_blocks_depth as usize);

        if let Some(last) = info.new_blocks.last() {
            self.height = last.height as i64;
            self.hash = last.hash.clone();
        }
        self.save_live().await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_ingest(
                &self.config.processor_id,
                info.new_blocks.len() as u64,
                rows,
            );
        }
        tracing::debug!(
            processor_id = %self.config.processor_id,
            height = self.height,
            blocks = info.new_blocks.len(),
            rows,
            phase = "hot",
            "hot batch committed"
        );

        if self.router.is_at_chain_tip() && self.config.auto_migrate {
            self.migration.note_blocks(info.new_blocks.len() as u64);
            if self.migration.due() {
                let report = self
                    .migration
                    .run(&self.checkpoints, &self.hot_chain, &self.registry)
                    .await?;
                if let Some(metrics) = &self.metrics {
                    metrics.record_migration(
                        &self.config.processor_id,
                        report.migrated,
                        report.duration_ms as f64,
                    );
                }
            }
        }
        Ok(())
    }

    async fn save_live(&self) -> Result<(), SinkError> {
        let state = HeadState {
            height: self.height,
            hash: self.hash.clone(),
            hot_blocks: self.hot_chain.to_vec(),
            finalized_height: self.finalized_height,
        };
        self.checkpoints.save_live(&state).await
    }

    fn ensure_ready(&self) -> Result<(), SinkError> {
        match self.state {
            SinkState::Ready => Ok(()),
            SinkState::Disconnected => {
                Err(SinkError::Connect("sink is not connected".into()))
            }
            SinkState::Failed => Err(SinkError::Connect(
                "sink is in a failed state; reconnect required".into(),
            )),
        }
    }

    fn absorb<T>(&mut self, result: Result<T, SinkError>) -> Result<T, SinkError> {
        if let Err(e) = &result {
            self.state = SinkState::Failed;
            tracing::error!(
                processor_id = %self.config.processor_id,
                height = self.height,
                error = %e,
                phase = "failed",
                "batch aborted"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainsink_core::config::{ColumnSpec, TableSpec};
    use chainsink_core::value::{Record, Value};
    use chainsink_storage::memory::MemoryDatabase;

    fn config() -> SinkConfig {
        SinkConfig::builder()
            .processor_id("test")
            .network("eth")
            .hot_blocks_depth(10)
            .table(TableSpec {
                kind: "Swap".into(),
                columns: vec![
                    ColumnSpec::new("height", "UInt64"),
                    ColumnSpec::new("hash", "String"),
                ],
                order_by: "height, hash".into(),
                hot_supported: true,
                hex_columns: vec![],
            })
            .build()
    }

    fn swap(b: &BlockRef) -> Record {
        Record::new("Swap")
            .set("height", Value::UInt64(b.height))
            .set("hash", Value::Text(b.hash.clone()))
    }

    async fn connected() -> (Arc<MemoryDatabase>, IngestCoordinator) {
        let db = Arc::new(MemoryDatabase::new());
        let mut sink = IngestCoordinator::new(db.clone(), config());
        let state = sink.connect().await.unwrap();
        assert_eq!(state, HeadState::fresh());
        (db, sink)
    }

    fn final_info(prev: i64, next: u64) -> FinalBatchInfo {
        FinalBatchInfo {
            prev_head: BlockRef::new(prev.max(0) as u64, format!("0x{prev}")),
            next_head: BlockRef::new(next, format!("0x{next}")),
            is_on_top: false,
        }
    }

    fn hot_info(finalized: u64, base: u64, blocks: Vec<BlockRef>) -> HotBatchInfo {
        HotBatchInfo {
            finalized_head: BlockRef::new(finalized, format!("0x{finalized}")),
            base_head: BlockRef::new(base, format!("0x{base}")),
            new_blocks: blocks,
        }
    }

    #[tokio::test]
    async fn transact_before_connect_is_rejected() {
        let db = Arc::new(MemoryDatabase::new());
        let mut sink = IngestCoordinator::new(db, config());
        let err = sink
            .transact_final(&final_info(-1, 10), |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Connect(_)));
    }

    #[tokio::test]
    async fn schema_validation_fails_at_connect() {
        let db = Arc::new(MemoryDatabase::new());
        let bad = SinkConfig::builder()
            .table(TableSpec {
                kind: "Swap".into(),
                columns: vec![ColumnSpec::new("block", "UInt64")],
                order_by: "block".into(),
                hot_supported: true,
                hex_columns: vec![],
            })
            .build();
        let mut sink = IngestCoordinator::new(db, bad);
        let err = sink.connect().await.unwrap_err();
        assert!(matches!(err, SinkError::Schema(_)));
    }

    #[tokio::test]
    async fn finalized_batch_routes_to_cold_and_checkpoints() {
        let (db, mut sink) = connected().await;
        sink.transact_final(&final_info(-1, 99), |store| {
            store.insert(swap(&BlockRef::new(99, "0x99")))
        })
        .await
        .unwrap();

        assert_eq!(db.row_count("eth_cold_swaps"), 1);
        assert_eq!(db.row_count("eth_hot_swaps"), 0);
        let live = sink.checkpoints.load_live().await.unwrap();
        assert_eq!(live.height, 99);
        assert_eq!(live.finalized_height, 99);
        assert!(live.hot_blocks.is_empty());
    }

    #[tokio::test]
    async fn hot_batch_records_registry_and_hot_chain() {
        let (db, mut sink) = connected().await;
        sink.set_at_chain_tip(true);
        let blocks = vec![BlockRef::new(100, "0xa"), BlockRef::new(101, "0xb")];
        sink.transact_hot(&hot_info(90, 99, blocks), |store, b| store.insert(swap(b)))
            .await
            .unwrap();

        assert_eq!(db.row_count("eth_hot_swaps"), 2);
        assert!(sink.registry.is_valid(100, "0xa"));
        assert!(sink.registry.is_valid(101, "0xb"));
        let live = sink.checkpoints.load_live().await.unwrap();
        assert_eq!(live.height, 101);
        assert_eq!(live.hot_blocks.len(), 2);
    }

    #[tokio::test]
    async fn reorg_rewrites_registry_without_touching_data() {
        let (db, mut sink) = connected().await;
        sink.set_at_chain_tip(true);
        // [100 A, 101 B, 102 C], then a fork replaces 102 and extends to 103
        sink.transact_hot(
            &hot_info(90, 99, vec![
                BlockRef::new(100, "A"),
                BlockRef::new(101, "B"),
                BlockRef::new(102, "C"),
            ]),
            |store, b| store.insert(swap(b)),
        )
        .await
        .unwrap();

        sink.transact_hot(
            &hot_info(90, 101, vec![BlockRef::new(102, "C2"), BlockRef::new(103, "D2")]),
            |store, b| store.insert(swap(b)),
        )
        .await
        .unwrap();

        // Registry reflects the new fork
        assert!(!sink.registry.is_valid(102, "C"));
        assert!(sink.registry.is_valid(102, "C2"));
        assert!(sink.registry.is_valid(103, "D2"));
        assert!(sink.registry.is_valid(101, "B"));
        // Hot chain follows
        let live = sink.checkpoints.load_live().await.unwrap();
        assert_eq!(
            live.hot_blocks,
            vec![
                BlockRef::new(100, "A"),
                BlockRef::new(101, "B"),
                BlockRef::new(102, "C2"),
                BlockRef::new(103, "D2"),
            ]
        );
        // No data-table deletes: the orphaned row at (102, C) is still there
        assert_eq!(db.row_count("eth_hot_swaps"), 5);
    }

    #[tokio::test]
    async fn finality_advance_prunes_hot_chain() {
        let (_db, mut sink) = connected().await;
        sink.set_at_chain_tip(true);
        sink.transact_hot(
            &hot_info(90, 99, (100..=105).map(|h| BlockRef::new(h, format!("0x{h}"))).collect()),
            |store, b| store.insert(swap(b)),
        )
        .await
        .unwrap();

        sink.transact_hot(
            &hot_info(103, 105, vec![BlockRef::new(106, "0x106")]),
            |store, b| store.insert(swap(b)),
        )
        .await
        .unwrap();

        let live = sink.checkpoints.load_live().await.unwrap();
        assert_eq!(live.finalized_height, 103);
        assert_eq!(
            live.hot_blocks.first().unwrap().height,
            104,
            "entries at or below the finalized height are dropped"
        );
    }

    #[tokio::test]
    async fn callback_error_moves_sink_to_failed() {
        let (_db, mut sink) = connected().await;
        let err = sink
            .transact_final(&final_info(-1, 10), |_| {
                Err(SinkError::Database("handler exploded".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Database(_)));
        assert_eq!(sink.state(), SinkState::Failed);

        // Further batches are rejected until reconnect
        let err = sink.transact_final(&final_info(10, 11), |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, SinkError::Connect(_)));

        // Reconnect recovers
        sink.connect().await.unwrap();
        assert_eq!(sink.state(), SinkState::Ready);
    }

    #[tokio::test]
    async fn hot_batches_rejected_when_hot_support_disabled() {
        let db = Arc::new(MemoryDatabase::new());
        let mut cfg = config();
        cfg.support_hot_blocks = false;
        let mut sink = IngestCoordinator::new(db, cfg);
        sink.connect().await.unwrap();
        let err = sink
            .transact_hot(&hot_info(90, 99, vec![BlockRef::new(100, "0xa")]), |_, _| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Schema(_)));
    }
}
