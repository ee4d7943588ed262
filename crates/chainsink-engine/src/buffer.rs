//! Ingest buffer — per-batch staging and batched physical insert.
//!
//! The producer callback sees a `Store`; inserts stage in memory, grouped by
//! destination table in arrival order. `flush` writes the groups out:
//! tables in parallel, rows within a table in producer order, oversized
//! groups split into sequential chunks, transient transport failures
//! retried.

use std::sync::Arc;

use chainsink_core::value::{Record, Value};
use chainsink_core::SinkError;
use chainsink_storage::database::Database;
use chainsink_storage::retry::RetryPolicy;

use crate::router::ZoneRouter;
use crate::tables::TableSet;

/// Maximum rows per physical insert; larger groups are chunked.
pub const BATCH_SIZE: usize = 200_000;

struct TableGroup {
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// The store surface exposed to producer callbacks.
pub struct Store {
    tables: Arc<TableSet>,
    router: Arc<ZoneRouter>,
    groups: Vec<TableGroup>,
    removals: Vec<(String, String)>,
}

impl Store {
    pub fn new(tables: Arc<TableSet>, router: Arc<ZoneRouter>) -> Self {
        Self {
            tables,
            router,
            groups: vec![],
            removals: vec![],
        }
    }

    /// Buffer one entity for flush.
    pub fn insert(&mut self, record: Record) -> Result<(), SinkError> {
        let table = self.tables.get(record.kind()).ok_or_else(|| {
            SinkError::Schema(format!("no managed table for entity kind '{}'", record.kind()))
        })?;
        let destination = self.router.route(table);

        let mut record = record;
        record.apply_hex_columns(&table.hex_columns);
        let columns = record.columns();

        match self.groups.iter_mut().find(|g| g.table == destination) {
            Some(group) => {
                if group.columns != columns {
                    return Err(SinkError::Schema(format!(
                        "inconsistent columns for '{destination}' within one batch: \
                         [{}] vs [{}]",
                        group.columns.join(", "),
                        columns.join(", ")
                    )));
                }
                group.rows.push(record.into_values());
            }
            None => self.groups.push(TableGroup {
                table: destination,
                columns,
                rows: vec![record.into_values()],
            }),
        }
        Ok(())
    }

    /// Buffer several entities in order.
    pub fn insert_many(&mut self, records: Vec<Record>) -> Result<(), SinkError> {
        for r in records {
            self.insert(r)?;
        }
        Ok(())
    }

    /// Alias of [`insert`](Self::insert); upsert semantics are delegated to
    /// the column engine's merge behavior.
    pub fn save(&mut self, record: Record) -> Result<(), SinkError> {
        self.insert(record)
    }

    /// Record an id for removal. Column engines differ on how (and whether)
    /// rows disappear; flush logs the request and defers to merge policy.
    pub fn remove(&mut self, kind: impl Into<String>, id: impl Into<String>) {
        self.removals.push((kind.into(), id.into()));
    }

    /// Rows currently staged across all tables.
    pub fn staged_rows(&self) -> usize {
        self.groups.iter().map(|g| g.rows.len()).sum()
    }

    /// Write everything out. Returns the number of rows inserted.
    pub async fn flush(mut self, db: &dyn Database) -> Result<u64, SinkError> {
        for (kind, id) in self.removals.drain(..) {
            tracing::debug!(kind, id, "remove requested; deferred to merge policy");
        }
        let retry = RetryPolicy::default();
        let groups = std::mem::take(&mut self.groups);
        let flushes = groups
            .into_iter()
            .map(|group| flush_group(db, &retry, group));
        let counts = futures::future::try_join_all(flushes).await?;
        Ok(counts.into_iter().sum())
    }
}

async fn flush_group(
    db: &dyn Database,
    retry: &RetryPolicy,
    group: TableGroup,
) -> Result<u64, SinkError> {
    let total = group.rows.len() as u64;
    let mut rows = group.rows;
    while !rows.is_empty() {
        let take = rows.len().min(BATCH_SIZE);
        let rest = rows.split_off(take);
        let chunk = rows;
        retry
            .run(|| db.insert(&group.table, &group.columns, chunk.clone()))
            .await?;
        rows = rest;
    }
    tracing::debug!(table = %group.table, rows = total, "flushed");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainsink_core::config::{ColumnSpec, TableSpec};
    use chainsink_storage::memory::MemoryDatabase;

    fn fixture() -> (Arc<MemoryDatabase>, Arc<TableSet>, Arc<ZoneRouter>) {
        let tables = Arc::new(TableSet::from_specs(
            "ethereum",
            &[TableSpec {
                kind: "TokenTransfer".into(),
                columns: vec![
                    ColumnSpec::new("height", "UInt64"),
                    ColumnSpec::new("tx_hash", "String"),
                    ColumnSpec::new("value", "UInt256"),
                ],
                order_by: "height".into(),
                hot_supported: true,
                hex_columns: vec!["tx_hash".into()],
            }],
        ));
        let router = Arc::new(ZoneRouter::new("ethereum"));
        let db = Arc::new(MemoryDatabase::new());
        (db, tables, router)
    }

    async fn ensure(db: &MemoryDatabase, tables: &TableSet) {
        for ddl in tables.ddl() {
            db.ensure_table(&ddl).await.unwrap();
        }
    }

    fn transfer(h: u64, tx: &str) -> Record {
        Record::new("TokenTransfer")
            .set("height", Value::UInt64(h))
            .set("tx_hash", Value::Text(tx.into()))
            .set("value", Value::BigUint(1_000_000))
    }

    #[tokio::test]
    async fn flush_writes_in_producer_order() {
        let (db, tables, router) = fixture();
        ensure(&db, &tables).await;
        let mut store = Store::new(tables, router);
        for h in [5u64, 3, 9, 1] {
            store.insert(transfer(h, "0xaa")).unwrap();
        }
        let rows = store.flush(db.as_ref()).await.unwrap();
        assert_eq!(rows, 4);

        let heights = db.column_values("ethereum_cold_token_transfers", "height");
        assert_eq!(
            heights,
            vec![
                Value::UInt64(5),
                Value::UInt64(3),
                Value::UInt64(9),
                Value::UInt64(1)
            ]
        );
    }

    #[tokio::test]
    async fn hex_columns_normalized_on_insert() {
        let (db, tables, router) = fixture();
        ensure(&db, &tables).await;
        let mut store = Store::new(tables, router);
        store.insert(transfer(1, "0xdeadbeef")).unwrap();
        store.flush(db.as_ref()).await.unwrap();
        assert_eq!(
            db.column_values("ethereum_cold_token_transfers", "tx_hash"),
            vec![Value::Hex("0xdeadbeef".into())]
        );
        // JSON encoding strips the prefix
        assert_eq!(
            db.column_values("ethereum_cold_token_transfers", "tx_hash")[0].to_json(),
            serde_json::json!("deadbeef")
        );
    }

    #[tokio::test]
    async fn routing_follows_chain_tip_flag() {
        let (db, tables, router) = fixture();
        ensure(&db, &tables).await;
        router.set_at_chain_tip(true);
        let mut store = Store::new(tables, router);
        store.insert(transfer(1, "0xaa")).unwrap();
        store.flush(db.as_ref()).await.unwrap();
        assert_eq!(db.row_count("ethereum_hot_token_transfers"), 1);
        assert_eq!(db.row_count("ethereum_cold_token_transfers"), 0);
    }

    #[tokio::test]
    async fn unknown_kind_is_a_schema_error() {
        let (_db, tables, router) = fixture();
        let mut store = Store::new(tables, router);
        let err = store.insert(Record::new("Mystery")).unwrap_err();
        assert!(matches!(err, SinkError::Schema(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let (db, tables, router) = fixture();
        ensure(&db, &tables).await;
        db.fail_next_inserts(2);
        let mut store = Store::new(tables, router);
        store.insert(transfer(1, "0xaa")).unwrap();
        store.flush(db.as_ref()).await.unwrap();
        assert_eq!(db.row_count("ethereum_cold_token_transfers"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_the_error() {
        let (db, tables, router) = fixture();
        ensure(&db, &tables).await;
        db.fail_next_inserts(3);
        let mut store = Store::new(tables, router);
        store.insert(transfer(1, "0xaa")).unwrap();
        let err = store.flush(db.as_ref()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(db.row_count("ethereum_cold_token_transfers"), 0);
    }

    #[tokio::test]
    async fn removals_are_logged_and_discarded() {
        let (db, tables, router) = fixture();
        ensure(&db, &tables).await;
        let mut store = Store::new(tables, router);
        store.remove("TokenTransfer", "0xaa-3");
        let rows = store.flush(db.as_ref()).await.unwrap();
        assert_eq!(rows, 0);
    }
}
