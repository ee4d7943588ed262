//! The database abstraction the engine runs against.
//!
//! Methods are semantic rather than raw SQL so that the in-memory backend
//! can honor the same contract the ClickHouse backend does. All SQL lives in
//! the ClickHouse implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use chainsink_core::types::BlockRef;
use chainsink_core::value::Value;
use chainsink_core::SinkError;

/// Table engine selection for generated DDL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlEngine {
    /// Plain MergeTree; duplicates are kept.
    MergeTree,
    /// ReplacingMergeTree; rows sharing the ORDER BY key collapse to the one
    /// with the greatest version column (or the last written row when no
    /// version column is given).
    ReplacingMergeTree { version_column: Option<String> },
}

/// A table the engine needs to exist.
#[derive(Debug, Clone)]
pub struct TableDdl {
    pub name: String,
    /// `(name, ClickHouse type)` pairs, in declaration order.
    pub columns: Vec<(String, String)>,
    pub engine: DdlEngine,
    /// ORDER BY clause body, e.g. `"processor_id, height"`.
    pub order_by: String,
}

/// A set of rows read back from a table (client-round-trip migration path).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One revision of a processor checkpoint. The live table fills every field;
/// the cold table leaves `hot_blocks` and `finalized_height` unset.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointRow {
    pub processor_id: String,
    pub height: i64,
    pub hash: String,
    /// JSON-serialized `[{height, hash}, …]`.
    pub hot_blocks: Option<String>,
    pub finalized_height: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

/// Backend contract. Implementations must be safe for concurrent use; the
/// engine serializes its own state transitions but may flush several tables
/// in parallel.
#[async_trait]
pub trait Database: Send + Sync {
    /// Cheap liveness probe, used at connect.
    async fn ping(&self) -> Result<(), SinkError>;

    /// Create the table if it does not exist. Idempotent.
    async fn ensure_table(&self, ddl: &TableDdl) -> Result<(), SinkError>;

    async fn table_exists(&self, name: &str) -> Result<bool, SinkError>;

    /// Append rows in the given order. Columns must match the table schema.
    async fn insert(
        &self,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<Value>>,
    ) -> Result<(), SinkError>;

    /// `max(column)`, or `None` when the table has no rows.
    async fn max_u64(&self, table: &str, column: &str) -> Result<Option<u64>, SinkError>;

    /// Number of rows with `column <= cutoff`.
    async fn count_up_to(&self, table: &str, column: &str, cutoff: u64)
        -> Result<u64, SinkError>;

    /// Server-side `INSERT INTO dst SELECT * FROM src WHERE column <= cutoff`.
    async fn copy_up_to(
        &self,
        src: &str,
        dst: &str,
        column: &str,
        cutoff: u64,
    ) -> Result<(), SinkError>;

    /// Read rows with `column <= cutoff` back to the client.
    async fn select_up_to(
        &self,
        table: &str,
        column: &str,
        cutoff: u64,
    ) -> Result<RowSet, SinkError>;

    /// Delete rows with `column <= cutoff`.
    async fn delete_up_to(&self, table: &str, column: &str, cutoff: u64)
        -> Result<(), SinkError>;

    async fn truncate(&self, table: &str) -> Result<(), SinkError>;

    /// Hash stored at exactly `height`, if the table has such a row.
    async fn hash_at(
        &self,
        table: &str,
        height_column: &str,
        hash_column: &str,
        height: u64,
    ) -> Result<Option<String>, SinkError>;

    // ── valid-blocks registry ────────────────────────────────────────────────

    /// All registry entries for the processor, ascending by height, latest
    /// write winning per height.
    async fn load_valid_blocks(
        &self,
        table: &str,
        processor_id: &str,
    ) -> Result<Vec<BlockRef>, SinkError>;

    async fn insert_valid_blocks(
        &self,
        table: &str,
        processor_id: &str,
        blocks: &[BlockRef],
    ) -> Result<(), SinkError>;

    async fn delete_valid_blocks_from(
        &self,
        table: &str,
        processor_id: &str,
        from_height: u64,
    ) -> Result<(), SinkError>;

    async fn delete_valid_blocks_below(
        &self,
        table: &str,
        processor_id: &str,
        below_height: u64,
    ) -> Result<(), SinkError>;

    async fn clear_valid_blocks(&self, table: &str, processor_id: &str)
        -> Result<(), SinkError>;

    // ── checkpoints ──────────────────────────────────────────────────────────

    /// Latest checkpoint revision for the processor, if any.
    async fn load_checkpoint(
        &self,
        table: &str,
        processor_id: &str,
    ) -> Result<Option<CheckpointRow>, SinkError>;

    /// Write a new checkpoint revision (latest wins).
    async fn save_checkpoint(&self, table: &str, row: &CheckpointRow) -> Result<(), SinkError>;
}
