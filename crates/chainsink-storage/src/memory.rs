//! In-memory database backend.
//!
//! Honors the same contract as the ClickHouse backend, including
//! ReplacingMergeTree collapse on the ORDER BY key, so engine behavior and
//! the idempotence laws can be tested without a server. All data is lost
//! when the instance drops.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chainsink_core::types::BlockRef;
use chainsink_core::value::Value;
use chainsink_core::SinkError;

use crate::database::{CheckpointRow, Database, DdlEngine, RowSet, TableDdl};

type Row = BTreeMap<String, Value>;

#[derive(Debug, Clone)]
struct MemTable {
    columns: Vec<String>,
    engine: DdlEngine,
    key_columns: Vec<String>,
    rows: Vec<Row>,
    /// ORDER BY key → row position, for replacing collapse.
    index: HashMap<String, usize>,
}

impl MemTable {
    fn is_replacing(&self) -> bool {
        matches!(self.engine, DdlEngine::ReplacingMergeTree { .. })
    }

    fn key_string(&self, row: &Row) -> String {
        let key: Vec<serde_json::Value> = self
            .key_columns
            .iter()
            .map(|c| row.get(c).map(Value::to_json).unwrap_or(serde_json::Value::Null))
            .collect();
        serde_json::Value::Array(key).to_string()
    }

    fn push(&mut self, row: Row) {
        if self.is_replacing() {
            let key = self.key_string(&row);
            if let Some(&i) = self.index.get(&key) {
                self.rows[i] = row;
                return;
            }
            self.index.insert(key, self.rows.len());
        }
        self.rows.push(row);
    }

    fn rebuild_index(&mut self) {
        if self.is_replacing() {
            self.index = self
                .rows
                .iter()
                .enumerate()
                .map(|(i, r)| (self.key_string(r), i))
                .collect();
        }
    }
}

#[derive(Default)]
struct Inner {
    tables: HashMap<String, MemTable>,
    /// processor → height → hash (latest write wins per height).
    valid_blocks: HashMap<String, BTreeMap<u64, String>>,
    /// (table, processor) → latest checkpoint revision.
    checkpoints: HashMap<(String, String), CheckpointRow>,
    /// Countdown of injected transient insert failures.
    failing_inserts: u32,
}

/// In-memory backend for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryDatabase {
    inner: Mutex<Inner>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` data inserts fail with a transient transport error.
    pub fn fail_next_inserts(&self, n: u32) {
        self.inner.lock().unwrap().failing_inserts = n;
    }

    /// Rows currently in `table` (empty if the table does not exist).
    pub fn row_count(&self, table: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    /// Values of `column` across all rows of `table`, insertion order.
    pub fn column_values(&self, table: &str, column: &str) -> Vec<Value> {
        self.inner
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map(|t| t.rows.iter().filter_map(|r| r.get(column).cloned()).collect())
            .unwrap_or_default()
    }

    fn with_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut MemTable) -> T,
    ) -> Result<T, SinkError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.tables.get_mut(table) {
            Some(t) => Ok(f(t)),
            None => Err(SinkError::UnknownTable {
                table: table.to_string(),
                reason: "not created".into(),
            }),
        }
    }
}

fn height_of(row: &Row, column: &str) -> Option<u64> {
    row.get(column).and_then(Value::as_u64)
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn ping(&self) -> Result<(), SinkError> {
        Ok(())
    }

    async fn ensure_table(&self, ddl: &TableDdl) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().unwrap();
        inner.tables.entry(ddl.name.clone()).or_insert_with(|| MemTable {
            columns: ddl.columns.iter().map(|(n, _)| n.clone()).collect(),
            engine: ddl.engine.clone(),
            key_columns: ddl
                .order_by
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            rows: vec![],
            index: HashMap::new(),
        });
        Ok(())
    }

    async fn table_exists(&self, name: &str) -> Result<bool, SinkError> {
        Ok(self.inner.lock().unwrap().tables.contains_key(name))
    }

    async fn insert(
        &self,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<Value>>,
    ) -> Result<(), SinkError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.failing_inserts > 0 {
                inner.failing_inserts -= 1;
                return Err(SinkError::TransientIo("connection reset (injected)".into()));
            }
        }
        self.with_table(table, |t| {
            for values in rows {
                let row: Row = columns.iter().cloned().zip(values).collect();
                t.push(row);
            }
        })
    }

    async fn max_u64(&self, table: &str, column: &str) -> Result<Option<u64>, SinkError> {
        self.with_table(table, |t| {
            t.rows.iter().filter_map(|r| height_of(r, column)).max()
        })
    }

    async fn count_up_to(
        &self,
        table: &str,
        column: &str,
        cutoff: u64,
    ) -> Result<u64, SinkError> {
        self.with_table(table, |t| {
            t.rows
                .iter()
                .filter(|r| height_of(r, column).is_some_and(|h| h <= cutoff))
                .count() as u64
        })
    }

    async fn copy_up_to(
        &self,
        src: &str,
        dst: &str,
        column: &str,
        cutoff: u64,
    ) -> Result<(), SinkError> {
        let moved: Vec<Row> = self.with_table(src, |t| {
            t.rows
                .iter()
                .filter(|r| height_of(r, column).is_some_and(|h| h <= cutoff))
                .cloned()
                .collect()
        })?;
        self.with_table(dst, |t| {
            for row in moved {
                t.push(row);
            }
        })
    }

    async fn select_up_to(
        &self,
        table: &str,
        column: &str,
        cutoff: u64,
    ) -> Result<RowSet, SinkError> {
        self.with_table(table, |t| {
            let rows = t
                .rows
                .iter()
                .filter(|r| height_of(r, column).is_some_and(|h| h <= cutoff))
                .map(|r| {
                    t.columns
                        .iter()
                        .map(|c| r.get(c).cloned().unwrap_or(Value::Null))
                        .collect()
                })
                .collect();
            RowSet {
                columns: t.columns.clone(),
                rows,
            }
        })
    }

    async fn delete_up_to(
        &self,
        table: &str,
        column: &str,
        cutoff: u64,
    ) -> Result<(), SinkError> {
        self.with_table(table, |t| {
            t.rows
                .retain(|r| !height_of(r, column).is_some_and(|h| h <= cutoff));
            t.rebuild_index();
        })
    }

    async fn truncate(&self, table: &str) -> Result<(), SinkError> {
        self.with_table(table, |t| {
            t.rows.clear();
            t.index.clear();
        })
    }

    async fn hash_at(
        &self,
        table: &str,
        height_column: &str,
        hash_column: &str,
        height: u64,
    ) -> Result<Option<String>, SinkError> {
        self.with_table(table, |t| {
            t.rows
                .iter()
                .find(|r| height_of(r, height_column) == Some(height))
                .and_then(|r| match r.get(hash_column) {
                    Some(Value::Text(s)) | Some(Value::Hex(s)) => Some(s.clone()),
                    _ => None,
                })
        })
    }

    // ── valid-blocks registry ────────────────────────────────────────────────

    async fn load_valid_blocks(
        &self,
        _table: &str,
        processor_id: &str,
    ) -> Result<Vec<BlockRef>, SinkError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .valid_blocks
            .get(processor_id)
            .map(|m| {
                m.iter()
                    .map(|(h, hash)| BlockRef::new(*h, hash.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert_valid_blocks(
        &self,
        _table: &str,
        processor_id: &str,
        blocks: &[BlockRef],
    ) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().unwrap();
        let map = inner.valid_blocks.entry(processor_id.to_string()).or_default();
        for b in blocks {
            map.insert(b.height, b.hash.clone());
        }
        Ok(())
    }

    async fn delete_valid_blocks_from(
        &self,
        _table: &str,
        processor_id: &str,
        from_height: u64,
    ) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(map) = inner.valid_blocks.get_mut(processor_id) {
            map.retain(|h, _| *h < from_height);
        }
        Ok(())
    }

    async fn delete_valid_blocks_below(
        &self,
        _table: &str,
        processor_id: &str,
        below_height: u64,
    ) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(map) = inner.valid_blocks.get_mut(processor_id) {
            map.retain(|h, _| *h >= below_height);
        }
        Ok(())
    }

    async fn clear_valid_blocks(
        &self,
        _table: &str,
        processor_id: &str,
    ) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().unwrap();
        inner.valid_blocks.remove(processor_id);
        Ok(())
    }

    // ── checkpoints ──────────────────────────────────────────────────────────

    async fn load_checkpoint(
        &self,
        table: &str,
        processor_id: &str,
    ) -> Result<Option<CheckpointRow>, SinkError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .checkpoints
            .get(&(table.to_string(), processor_id.to_string()))
            .cloned())
    }

    async fn save_checkpoint(&self, table: &str, row: &CheckpointRow) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .checkpoints
            .insert((table.to_string(), row.processor_id.clone()), row.clone());
        Ok(())
    }
}
