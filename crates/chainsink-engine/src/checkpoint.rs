//! Durable checkpoint pair: live cursor and cold cursor.
//!
//! The live row records the last acknowledged block, the serialized hot
//! chain, and the finalized height; it is overwritten on every batch
//! boundary. The cold row only advances when migration has promoted every
//! row at or below its height, making it the safe resume point after any
//! failure.

use std::sync::Arc;

use chainsink_core::types::{BlockRef, HeadState};
use chainsink_core::SinkError;
use chainsink_storage::database::{CheckpointRow, Database, DdlEngine, TableDdl};

/// The cold cursor: data at or below `height` is durably in the cold zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColdStatus {
    pub height: i64,
    pub hash: String,
}

impl ColdStatus {
    pub fn fresh() -> Self {
        Self {
            height: -1,
            hash: String::new(),
        }
    }
}

/// Reader/writer for the two keyed checkpoint singletons of one processor.
pub struct CheckpointStore {
    db: Arc<dyn Database>,
    processor_id: String,
    live_table: String,
    cold_table: String,
}

impl CheckpointStore {
    pub fn new(
        db: Arc<dyn Database>,
        processor_id: impl Into<String>,
        state_table: impl Into<String>,
    ) -> Self {
        let live_table = state_table.into();
        Self {
            db,
            processor_id: processor_id.into(),
            cold_table: format!("{live_table}_cold"),
            live_table,
        }
    }

    pub fn live_table(&self) -> &str {
        &self.live_table
    }

    pub fn cold_table(&self) -> &str {
        &self.cold_table
    }

    fn live_ddl(&self) -> TableDdl {
        TableDdl {
            name: self.live_table.clone(),
            columns: vec![
                ("processor_id".into(), "String".into()),
                ("height".into(), "Int64".into()),
                ("hash".into(), "String".into()),
                ("hot_blocks".into(), "String".into()),
                ("finalized_height".into(), "Int64".into()),
                ("timestamp".into(), "DateTime64(3)".into()),
            ],
            engine: DdlEngine::ReplacingMergeTree {
                version_column: Some("timestamp".into()),
            },
            order_by: "processor_id".into(),
        }
    }

    fn cold_ddl(&self) -> TableDdl {
        TableDdl {
            name: self.cold_table.clone(),
            columns: vec![
                ("processor_id".into(), "String".into()),
                ("height".into(), "Int64".into()),
                ("hash".into(), "String".into()),
                ("timestamp".into(), "DateTime64(3)".into()),
            ],
            engine: DdlEngine::ReplacingMergeTree {
                version_column: Some("timestamp".into()),
            },
            order_by: "processor_id".into(),
        }
    }

    pub async fn ensure_tables(&self) -> Result<(), SinkError> {
        self.db.ensure_table(&self.live_ddl()).await?;
        self.db.ensure_table(&self.cold_ddl()).await?;
        Ok(())
    }

    /// Latest live cursor, or the fresh sentinel when none exists.
    pub async fn load_live(&self) -> Result<HeadState, SinkError> {
        let Some(row) = self
            .db
            .load_checkpoint(&self.live_table, &self.processor_id)
            .await?
        else {
            return Ok(HeadState::fresh());
        };
        let hot_blocks: Vec<BlockRef> = match &row.hot_blocks {
            Some(json) if !json.is_empty() => serde_json::from_str(json)
                .map_err(|e| SinkError::Serialization(format!("bad hot_blocks: {e}")))?,
            _ => vec![],
        };
        Ok(HeadState {
            height: row.height,
            hash: row.hash,
            hot_blocks,
            finalized_height: row.finalized_height.unwrap_or(-1),
        })
    }

    /// Write a new live revision.
    ///
    /// `hot_blocks` serializes as bare `{height, hash}` pairs; `BlockRef`
    /// carries nothing else, so producer-side extras never reach the text
    /// format.
    pub async fn save_live(&self, state: &HeadState) -> Result<(), SinkError> {
        let hot_blocks = serde_json::to_string(&state.hot_blocks)
            .map_err(|e| SinkError::Serialization(e.to_string()))?;
        let row = CheckpointRow {
            processor_id: self.processor_id.clone(),
            height: state.height,
            hash: state.hash.clone(),
            hot_blocks: Some(hot_blocks),
            finalized_height: Some(state.finalized_height),
            timestamp: chrono::Utc::now(),
        };
        self.db
            .save_checkpoint(&self.live_table, &row)
            .await
            .map_err(as_checkpoint_error)?;
        tracing::debug!(
            processor_id = %self.processor_id,
            height = state.height,
            finalized = state.finalized_height,
            hot = state.hot_blocks.len(),
            "live checkpoint saved"
        );
        Ok(())
    }

    /// Latest cold cursor, if the processor has ever migrated.
    pub async fn load_cold(&self) -> Result<Option<ColdStatus>, SinkError> {
        Ok(self
            .db
            .load_checkpoint(&self.cold_table, &self.processor_id)
            .await?
            .map(|row| ColdStatus {
                height: row.height,
                hash: row.hash,
            }))
    }

    /// Advance the cold cursor. Only called after migration has promoted
    /// every row with `height <= height`.
    pub async fn save_cold(&self, height: u64, hash: &str) -> Result<(), SinkError> {
        let row = CheckpointRow {
            processor_id: self.processor_id.clone(),
            height: height as i64,
            hash: hash.to_string(),
            hot_blocks: None,
            finalized_height: None,
            timestamp: chrono::Utc::now(),
        };
        self.db
            .save_checkpoint(&self.cold_table, &row)
            .await
            .map_err(as_checkpoint_error)?;
        tracing::info!(
            processor_id = %self.processor_id,
            height,
            "cold checkpoint advanced"
        );
        Ok(())
    }
}

fn as_checkpoint_error(e: SinkError) -> SinkError {
    match e {
        SinkError::CheckpointWrite(_) => e,
        other => SinkError::CheckpointWrite(other.to_string()),
    }
}
