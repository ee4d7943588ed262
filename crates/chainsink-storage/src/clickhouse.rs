//! ClickHouse backend over the native HTTP interface.
//!
//! Every call is one HTTP round trip: the statement goes in the `query`
//! parameter or request body, rows travel as `JSONEachRow`, reads come back
//! as `JSONCompactEachRowWithNames`. Checkpoint and registry reads use
//! `FINAL` so ReplacingMergeTree revisions collapse to the latest write.

use async_trait::async_trait;
use std::time::Duration;

use chainsink_core::types::BlockRef;
use chainsink_core::value::Value;
use chainsink_core::SinkError;

use crate::database::{CheckpointRow, Database, DdlEngine, RowSet, TableDdl};
use crate::retry::is_transient_message;

/// Configuration for `ClickHouseDatabase`.
#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    /// HTTP endpoint, e.g. `"http://localhost:8123"`.
    pub url: String,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Per-call timeout; a timeout surfaces as a transient error.
    pub request_timeout: Duration,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".into(),
            database: "default".into(),
            user: None,
            password: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// ClickHouse-backed [`Database`].
pub struct ClickHouseDatabase {
    http: reqwest::Client,
    config: ClickHouseConfig,
}

impl ClickHouseDatabase {
    pub fn new(config: ClickHouseConfig) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SinkError::Connect(e.to_string()))?;
        Ok(Self { http, config })
    }

    /// Run a statement, optionally with a row payload, and return the raw
    /// response body.
    async fn run(&self, statement: &str, body: Option<String>) -> Result<String, SinkError> {
        let mut req = self
            .http
            .post(&self.config.url)
            .query(&[("database", self.config.database.as_str())]);
        if let Some(user) = &self.config.user {
            req = req.header("X-ClickHouse-User", user);
        }
        if let Some(password) = &self.config.password {
            req = req.header("X-ClickHouse-Key", password);
        }
        req = match body {
            Some(rows) => req.query(&[("query", statement)]).body(rows),
            None => req.body(statement.to_string()),
        };

        let resp = req.send().await.map_err(map_transport_error)?;
        let status = resp.status();
        let text = resp.text().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_server_error(status.as_u16(), &text));
        }
        Ok(text)
    }

    async fn fetch_compact_rows(&self, statement: &str) -> Result<RowSet, SinkError> {
        let body = self.run(statement, None).await?;
        parse_compact_rows(&body)
    }
}

fn map_transport_error(e: reqwest::Error) -> SinkError {
    let message = e.to_string();
    if e.is_timeout() || e.is_connect() || is_transient_message(&message) {
        SinkError::TransientIo(message)
    } else {
        SinkError::Database(message)
    }
}

fn map_server_error(status: u16, body: &str) -> SinkError {
    if body.contains("Code: 60") || body.contains("UNKNOWN_TABLE") {
        let table = body
            .split('\'')
            .nth(1)
            .unwrap_or("<unknown>")
            .to_string();
        return SinkError::UnknownTable {
            table,
            reason: first_line(body),
        };
    }
    SinkError::Database(format!("HTTP {status}: {}", first_line(body)))
}

fn first_line(s: &str) -> String {
    s.lines().next().unwrap_or("").to_string()
}

// ─── SQL rendering ───────────────────────────────────────────────────────────

fn quote_str(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn create_table_sql(ddl: &TableDdl) -> String {
    let columns: Vec<String> = ddl
        .columns
        .iter()
        .map(|(name, ty)| format!("`{name}` {ty}"))
        .collect();
    let engine = match &ddl.engine {
        DdlEngine::MergeTree => "MergeTree()".to_string(),
        DdlEngine::ReplacingMergeTree { version_column } => match version_column {
            Some(v) => format!("ReplacingMergeTree(`{v}`)"),
            None => "ReplacingMergeTree()".to_string(),
        },
    };
    format!(
        "CREATE TABLE IF NOT EXISTS `{}` ({}) ENGINE = {} ORDER BY ({})",
        ddl.name,
        columns.join(", "),
        engine,
        ddl.order_by
    )
}

fn insert_statement(table: &str, columns: &[String]) -> String {
    let cols: Vec<String> = columns.iter().map(|c| format!("`{c}`")).collect();
    format!(
        "INSERT INTO `{table}` ({}) FORMAT JSONEachRow",
        cols.join(", ")
    )
}

fn json_each_row(columns: &[String], rows: &[Vec<Value>]) -> String {
    let mut body = String::new();
    for row in rows {
        let object: serde_json::Map<String, serde_json::Value> = columns
            .iter()
            .cloned()
            .zip(row.iter().map(Value::to_json))
            .collect();
        body.push_str(&serde_json::Value::Object(object).to_string());
        body.push('\n');
    }
    body
}

fn parse_compact_rows(body: &str) -> Result<RowSet, SinkError> {
    let mut lines = body.lines().filter(|l| !l.trim().is_empty());
    let columns: Vec<String> = match lines.next() {
        Some(header) => serde_json::from_str(header)
            .map_err(|e| SinkError::Serialization(e.to_string()))?,
        None => return Ok(RowSet::default()),
    };
    let mut rows = Vec::new();
    for line in lines {
        let raw: Vec<serde_json::Value> =
            serde_json::from_str(line).map_err(|e| SinkError::Serialization(e.to_string()))?;
        rows.push(raw.iter().map(Value::from_json).collect());
    }
    Ok(RowSet { columns, rows })
}

fn now_literal() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

// ─── Database impl ───────────────────────────────────────────────────────────

#[async_trait]
impl Database for ClickHouseDatabase {
    async fn ping(&self) -> Result<(), SinkError> {
        self.run("SELECT 1", None)
            .await
            .map_err(|e| SinkError::Connect(e.to_string()))?;
        Ok(())
    }

    async fn ensure_table(&self, ddl: &TableDdl) -> Result<(), SinkError> {
        self.run(&create_table_sql(ddl), None).await?;
        Ok(())
    }

    async fn table_exists(&self, name: &str) -> Result<bool, SinkError> {
        let sql = format!(
            "SELECT count() FROM system.tables WHERE database = currentDatabase() AND name = {}",
            quote_str(name)
        );
        let body = self.run(&sql, None).await?;
        Ok(body.trim() != "0" && !body.trim().is_empty())
    }

    async fn insert(
        &self,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<Value>>,
    ) -> Result<(), SinkError> {
        if rows.is_empty() {
            return Ok(());
        }
        let statement = insert_statement(table, columns);
        let body = json_each_row(columns, &rows);
        self.run(&statement, Some(body)).await?;
        Ok(())
    }

    async fn max_u64(&self, table: &str, column: &str) -> Result<Option<u64>, SinkError> {
        let sql = format!("SELECT count(), max(`{column}`) FROM `{table}`");
        let body = self.run(&sql, None).await?;
        let mut fields = body.trim().split('\t');
        let count: u64 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        if count == 0 {
            return Ok(None);
        }
        let max = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| SinkError::Serialization(format!("bad max() response: {body}")))?;
        Ok(Some(max))
    }

    async fn count_up_to(
        &self,
        table: &str,
        column: &str,
        cutoff: u64,
    ) -> Result<u64, SinkError> {
        let sql = format!("SELECT count() FROM `{table}` WHERE `{column}` <= {cutoff}");
        let body = self.run(&sql, None).await?;
        body.trim()
            .parse()
            .map_err(|_| SinkError::Serialization(format!("bad count() response: {body}")))
    }

    async fn copy_up_to(
        &self,
        src: &str,
        dst: &str,
        column: &str,
        cutoff: u64,
    ) -> Result<(), SinkError> {
        let sql = format!(
            "INSERT INTO `{dst}` SELECT * FROM `{src}` WHERE `{column}` <= {cutoff}"
        );
        self.run(&sql, None).await?;
        Ok(())
    }

    async fn select_up_to(
        &self,
        table: &str,
        column: &str,
        cutoff: u64,
    ) -> Result<RowSet, SinkError> {
        let sql = format!(
            "SELECT * FROM `{table}` WHERE `{column}` <= {cutoff} FORMAT JSONCompactEachRowWithNames"
        );
        self.fetch_compact_rows(&sql).await
    }

    async fn delete_up_to(
        &self,
        table: &str,
        column: &str,
        cutoff: u64,
    ) -> Result<(), SinkError> {
        let sql = format!("DELETE FROM `{table}` WHERE `{column}` <= {cutoff}");
        self.run(&sql, None).await?;
        Ok(())
    }

    async fn truncate(&self, table: &str) -> Result<(), SinkError> {
        self.run(&format!("TRUNCATE TABLE IF EXISTS `{table}`"), None)
            .await?;
        Ok(())
    }

    async fn hash_at(
        &self,
        table: &str,
        height_column: &str,
        hash_column: &str,
        height: u64,
    ) -> Result<Option<String>, SinkError> {
        let sql = format!(
            "SELECT `{hash_column}` FROM `{table}` WHERE `{height_column}` = {height} LIMIT 1"
        );
        let body = self.run(&sql, None).await?;
        let hash = body.trim();
        Ok(if hash.is_empty() {
            None
        } else {
            Some(hash.to_string())
        })
    }

    // ── valid-blocks registry ────────────────────────────────────────────────

    async fn load_valid_blocks(
        &self,
        table: &str,
        processor_id: &str,
    ) -> Result<Vec<BlockRef>, SinkError> {
        let sql = format!(
            "SELECT height, hash FROM `{table}` FINAL WHERE processor_id = {} \
             ORDER BY height FORMAT JSONCompactEachRowWithNames",
            quote_str(processor_id)
        );
        let set = self.fetch_compact_rows(&sql).await?;
        let mut blocks = Vec::with_capacity(set.rows.len());
        for row in &set.rows {
            let height = row.first().and_then(Value::as_u64).ok_or_else(|| {
                SinkError::Serialization("valid_blocks row missing height".into())
            })?;
            let hash = match row.get(1) {
                Some(Value::Text(s)) => s.clone(),
                _ => {
                    return Err(SinkError::Serialization(
                        "valid_blocks row missing hash".into(),
                    ))
                }
            };
            blocks.push(BlockRef::new(height, hash));
        }
        Ok(blocks)
    }

    async fn insert_valid_blocks(
        &self,
        table: &str,
        processor_id: &str,
        blocks: &[BlockRef],
    ) -> Result<(), SinkError> {
        if blocks.is_empty() {
            return Ok(());
        }
        let columns: Vec<String> = ["height", "hash", "timestamp", "processor_id"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let now = now_literal();
        let rows: Vec<Vec<Value>> = blocks
            .iter()
            .map(|b| {
                vec![
                    Value::UInt64(b.height),
                    Value::Text(b.hash.clone()),
                    Value::Text(now.clone()),
                    Value::Text(processor_id.to_string()),
                ]
            })
            .collect();
        let statement = insert_statement(table, &columns);
        self.run(&statement, Some(json_each_row(&columns, &rows)))
            .await?;
        Ok(())
    }

    async fn delete_valid_blocks_from(
        &self,
        table: &str,
        processor_id: &str,
        from_height: u64,
    ) -> Result<(), SinkError> {
        let sql = format!(
            "DELETE FROM `{table}` WHERE processor_id = {} AND height >= {from_height}",
            quote_str(processor_id)
        );
        self.run(&sql, None).await?;
        Ok(())
    }

    async fn delete_valid_blocks_below(
        &self,
        table: &str,
        processor_id: &str,
        below_height: u64,
    ) -> Result<(), SinkError> {
        let sql = format!(
            "DELETE FROM `{table}` WHERE processor_id = {} AND height < {below_height}",
            quote_str(processor_id)
        );
        self.run(&sql, None).await?;
        Ok(())
    }

    async fn clear_valid_blocks(
        &self,
        table: &str,
        processor_id: &str,
    ) -> Result<(), SinkError> {
        let sql = format!(
            "DELETE FROM `{table}` WHERE processor_id = {}",
            quote_str(processor_id)
        );
        self.run(&sql, None).await?;
        Ok(())
    }

    // ── checkpoints ──────────────────────────────────────────────────────────

    async fn load_checkpoint(
        &self,
        table: &str,
        processor_id: &str,
    ) -> Result<Option<CheckpointRow>, SinkError> {
        let sql = format!(
            "SELECT * FROM `{table}` FINAL WHERE processor_id = {} \
             LIMIT 1 FORMAT JSONCompactEachRowWithNames",
            quote_str(processor_id)
        );
        let set = self.fetch_compact_rows(&sql).await?;
        let Some(row) = set.rows.first() else {
            return Ok(None);
        };
        let field = |name: &str| -> Option<&Value> {
            set.columns
                .iter()
                .position(|c| c == name)
                .and_then(|i| row.get(i))
        };
        let as_i64 = |v: Option<&Value>| -> Option<i64> {
            match v {
                Some(Value::Int64(i)) => Some(*i),
                Some(Value::UInt64(u)) => Some(*u as i64),
                _ => None,
            }
        };
        let as_text = |v: Option<&Value>| -> Option<String> {
            match v {
                Some(Value::Text(s)) => Some(s.clone()),
                _ => None,
            }
        };
        Ok(Some(CheckpointRow {
            processor_id: processor_id.to_string(),
            height: as_i64(field("height")).unwrap_or(-1),
            hash: as_text(field("hash")).unwrap_or_default(),
            hot_blocks: as_text(field("hot_blocks")),
            finalized_height: as_i64(field("finalized_height")),
            timestamp: chrono::Utc::now(),
        }))
    }

    async fn save_checkpoint(&self, table: &str, row: &CheckpointRow) -> Result<(), SinkError> {
        let mut columns = vec![
            "processor_id".to_string(),
            "height".to_string(),
            "hash".to_string(),
            "timestamp".to_string(),
        ];
        let mut values = vec![
            Value::Text(row.processor_id.clone()),
            Value::Int64(row.height),
            Value::Text(row.hash.clone()),
            Value::Timestamp(row.timestamp),
        ];
        if let Some(hot_blocks) = &row.hot_blocks {
            columns.push("hot_blocks".to_string());
            values.push(Value::Text(hot_blocks.clone()));
        }
        if let Some(finalized) = row.finalized_height {
            columns.push("finalized_height".to_string());
            values.push(Value::Int64(finalized));
        }
        let statement = insert_statement(table, &columns);
        self.run(&statement, Some(json_each_row(&columns, &[values])))
            .await
            .map_err(|e| SinkError::CheckpointWrite(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_table_merge_tree() {
        let ddl = TableDdl {
            name: "ethereum_hot_token_transfers".into(),
            columns: vec![
                ("height".into(), "UInt64".into()),
                ("tx_hash".into(), "FixedString(32)".into()),
            ],
            engine: DdlEngine::MergeTree,
            order_by: "height".into(),
        };
        assert_eq!(
            create_table_sql(&ddl),
            "CREATE TABLE IF NOT EXISTS `ethereum_hot_token_transfers` \
             (`height` UInt64, `tx_hash` FixedString(32)) \
             ENGINE = MergeTree() ORDER BY (height)"
        );
    }

    #[test]
    fn create_table_replacing() {
        let ddl = TableDdl {
            name: "valid_blocks".into(),
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
        };
        assert_eq!(
            create_table_sql(&ddl),
            "CREATE TABLE IF NOT EXISTS `valid_blocks` \
             (`height` UInt64, `hash` String, `timestamp` DateTime64(3), `processor_id` String) \
             ENGINE = ReplacingMergeTree(`timestamp`) ORDER BY (processor_id, height)"
        );
    }

    #[test]
    fn insert_statement_lists_columns() {
        let cols = vec!["height".to_string(), "hash".to_string()];
        assert_eq!(
            insert_statement("t", &cols),
            "INSERT INTO `t` (`height`, `hash`) FORMAT JSONEachRow"
        );
    }

    #[test]
    fn json_each_row_one_object_per_line() {
        let cols = vec!["height".to_string(), "value".to_string()];
        let rows = vec![
            vec![Value::UInt64(1), Value::BigUint(10u128.pow(30))],
            vec![Value::UInt64(2), Value::Null],
        ];
        let body = json_each_row(&cols, &rows);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#"{"height":1,"value":"1000000000000000000000000000000"}"#
        );
        assert_eq!(lines[1], r#"{"height":2,"value":null}"#);
    }

    #[test]
    fn parse_compact_rows_with_names() {
        let body = "[\"height\",\"hash\"]\n[100,\"0xa\"]\n[101,\"0xb\"]\n";
        let set = parse_compact_rows(body).unwrap();
        assert_eq!(set.columns, vec!["height", "hash"]);
        assert_eq!(set.rows.len(), 2);
        assert_eq!(set.rows[0][0].as_u64(), Some(100));
        assert_eq!(set.rows[1][1], Value::Text("0xb".into()));
    }

    #[test]
    fn parse_compact_rows_empty_body() {
        let set = parse_compact_rows("").unwrap();
        assert!(set.columns.is_empty());
        assert!(set.rows.is_empty());
    }

    #[test]
    fn string_quoting_escapes() {
        assert_eq!(quote_str("plain"), "'plain'");
        assert_eq!(quote_str("it's"), r"'it\'s'");
        assert_eq!(quote_str(r"a\b"), r"'a\\b'");
    }

    #[test]
    fn server_error_mapping() {
        let e = map_server_error(404, "Code: 60. DB::Exception: Table 'eth_hot_swaps' does not exist");
        assert!(e.is_unknown_table());
        let e = map_server_error(400, "Code: 62. DB::Exception: Syntax error");
        assert!(matches!(e, SinkError::Database(_)));
    }
}
