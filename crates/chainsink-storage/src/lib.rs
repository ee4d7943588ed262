//! chainsink-storage — pluggable database backends for ChainSink.
//!
//! Backends:
//! - [`memory`] — in-memory (tests, no persistence)
//! - [`clickhouse`] — ClickHouse over its native HTTP interface

pub mod clickhouse;
pub mod database;
pub mod memory;
pub mod retry;

pub use clickhouse::{ClickHouseConfig, ClickHouseDatabase};
pub use database::{CheckpointRow, Database, DdlEngine, RowSet, TableDdl};
pub use memory::MemoryDatabase;
pub use retry::RetryPolicy;
