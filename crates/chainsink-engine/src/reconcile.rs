//! Stale-restart reconciliation.
//!
//! After downtime, any unfinalized block the processor believed in may have
//! been reorged away, and the producer will re-validate hashes against its
//! own source before calling back in. The cold cursor is the deepest point
//! guaranteed still to be on-chain, so when lingering hot state (or a gap
//! between the live and cold cursors) is detected, everything hot is thrown
//! away and the processor resumes from the cold cursor.

use chainsink_core::types::HeadState;
use chainsink_core::SinkError;
use chainsink_storage::database::Database;

use crate::checkpoint::{CheckpointStore, ColdStatus};
use crate::registry::ValidBlocksRegistry;
use crate::tables::TableSet;

/// Run on every connect, after the backing tables are ensured.
///
/// Returns the state the producer should resume from.
pub async fn reconcile(
    db: &dyn Database,
    checkpoints: &CheckpointStore,
    registry: &mut ValidBlocksRegistry,
    tables: &TableSet,
) -> Result<HeadState, SinkError> {
    let live = checkpoints.load_live().await?;
    let cold = match checkpoints.load_cold().await? {
        Some(cold) => cold,
        None => fallback_cold(db, tables).await,
    };

    if live.hot_blocks.is_empty() && live.height <= cold.height {
        tracing::info!(
            height = live.height,
            cold_height = cold.height,
            "clean restart; resuming from live checkpoint"
        );
        return Ok(live);
    }

    tracing::warn!(
        height = live.height,
        cold_height = cold.height,
        hot_blocks = live.hot_blocks.len(),
        "stale hot state detected; rolling back to cold cursor"
    );

    registry.clear().await?;
    let network = tables.network();
    for table in tables.hot_supported() {
        db.truncate(&table.hot_name(network)).await?;
    }

    let state = HeadState {
        height: cold.height,
        hash: cold.hash.clone(),
        hot_blocks: vec![],
        finalized_height: cold.height,
    };
    checkpoints.save_live(&state).await?;
    Ok(state)
}

/// Without a cold checkpoint, the deepest safe point is whatever the cold
/// zone already holds: the max height of the representative cold table, with
/// an empty hash.
async fn fallback_cold(db: &dyn Database, tables: &TableSet) -> ColdStatus {
    let Some(representative) = tables.representative() else {
        return ColdStatus::fresh();
    };
    let cold_name = representative.cold_name(tables.network());
    match db.max_u64(&cold_name, "height").await {
        Ok(Some(height)) => ColdStatus {
            height: height as i64,
            hash: String::new(),
        },
        _ => ColdStatus::fresh(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainsink_core::config::{ColumnSpec, TableSpec};
    use chainsink_core::types::BlockRef;
    use chainsink_core::value::Value;
    use chainsink_storage::memory::MemoryDatabase;
    use std::sync::Arc;

    struct Fixture {
        db: Arc<MemoryDatabase>,
        checkpoints: CheckpointStore,
        registry: ValidBlocksRegistry,
        tables: TableSet,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(MemoryDatabase::new());
        let tables = TableSet::from_specs(
            "eth",
            &[TableSpec {
                kind: "Swap".into(),
                columns: vec![
                    ColumnSpec::new("height", "UInt64"),
                    ColumnSpec::new("hash", "String"),
                ],
                order_by: "height".into(),
                hot_supported: true,
                hex_columns: vec![],
            }],
        );
        for ddl in tables.ddl() {
            db.ensure_table(&ddl).await.unwrap();
        }
        let checkpoints = CheckpointStore::new(db.clone(), "p", "squid_processor_status");
        checkpoints.ensure_tables().await.unwrap();
        let mut registry = ValidBlocksRegistry::new(db.clone(), "p", 10);
        registry.initialize().await.unwrap();
        Fixture {
            db,
            checkpoints,
            registry,
            tables,
        }
    }

    #[tokio::test]
    async fn fresh_database_needs_no_reconciliation() {
        let mut f = fixture().await;
        let state = reconcile(f.db.as_ref(), &f.checkpoints, &mut f.registry, &f.tables)
            .await
            .unwrap();
        assert_eq!(state, HeadState::fresh());
    }

    #[tokio::test]
    async fn stale_hot_state_rolls_back_to_cold_cursor() {
        let mut f = fixture().await;
        f.checkpoints
            .save_live(&HeadState {
                height: 10_050,
                hash: "0xlive".into(),
                hot_blocks: (10_046..=10_050)
                    .map(|h| BlockRef::new(h, format!("0x{h}")))
                    .collect(),
                finalized_height: 10_040,
            })
            .await
            .unwrap();
        f.checkpoints.save_cold(10_000, "0xcold").await.unwrap();
        f.registry
            .add_blocks(
                &(10_046..=10_050)
                    .map(|h| BlockRef::new(h, format!("0x{h}")))
                    .collect::<Vec<_>>(),
            )
            .await
            .unwrap();
        let cols = vec!["height".to_string(), "hash".to_string()];
        f.db.insert(
            "eth_hot_swaps",
            &cols,
            vec![vec![Value::UInt64(10_047), Value::Text("0xrow".into())]],
        )
        .await
        .unwrap();

        let state = reconcile(f.db.as_ref(), &f.checkpoints, &mut f.registry, &f.tables)
            .await
            .unwrap();

        assert_eq!(state.height, 10_000);
        assert_eq!(state.hash, "0xcold");
        assert!(state.hot_blocks.is_empty());
        assert_eq!(state.finalized_height, 10_000);

        assert_eq!(f.registry.count(), 0);
        assert_eq!(f.db.row_count("eth_hot_swaps"), 0);
        assert_eq!(f.checkpoints.load_live().await.unwrap(), state);
    }

    #[tokio::test]
    async fn catchup_progress_survives_via_cold_table_fallback() {
        let mut f = fixture().await;
        // Catchup wrote straight to cold; no migration ever ran, so there is
        // no cold checkpoint. The cold table itself proves the progress.
        let cols = vec!["height".to_string(), "hash".to_string()];
        f.db.insert(
            "eth_cold_swaps",
            &cols,
            (0..10_000u64)
                .step_by(1_111)
                .chain([9_999])
                .map(|h| vec![Value::UInt64(h), Value::Text(format!("0x{h}"))])
                .collect(),
        )
        .await
        .unwrap();
        let live = HeadState {
            height: 9_999,
            hash: "0xlast".into(),
            hot_blocks: vec![],
            finalized_height: 9_999,
        };
        f.checkpoints.save_live(&live).await.unwrap();

        let state = reconcile(f.db.as_ref(), &f.checkpoints, &mut f.registry, &f.tables)
            .await
            .unwrap();
        // live.height == max(cold table) and no hot state: clean resume
        assert_eq!(state, live);
    }

    #[tokio::test]
    async fn live_ahead_of_cold_fallback_rolls_back() {
        let mut f = fixture().await;
        let cols = vec!["height".to_string(), "hash".to_string()];
        f.db.insert(
            "eth_cold_swaps",
            &cols,
            vec![vec![Value::UInt64(9_000), Value::Text("0xtop".into())]],
        )
        .await
        .unwrap();
        f.checkpoints
            .save_live(&HeadState {
                height: 9_999,
                hash: "0xahead".into(),
                hot_blocks: vec![],
                finalized_height: 9_999,
            })
            .await
            .unwrap();

        let state = reconcile(f.db.as_ref(), &f.checkpoints, &mut f.registry, &f.tables)
            .await
            .unwrap();
        assert_eq!(state.height, 9_000);
        assert!(state.hash.is_empty()); // fallback carries no hash
        assert!(state.hot_blocks.is_empty());
    }
}
