//! chainsink-core — foundation for the dual-zone, reorg-safe persistence
//! adapter.
//!
//! # Architecture
//!
//! ```text
//! IngestCoordinator (chainsink-engine)
//!       ├── HotChain       (unfinalized chain suffix)
//!       ├── reorg          (detection, common ancestor)
//!       ├── ValidBlocks    (canonical-hash cache + query filter)
//!       ├── Value / Record (row field model, insert normalization)
//!       ├── naming         (entity kind → physical table names)
//!       └── SinkConfig     (recognized options + builder)
//! ```

pub mod blockmap;
pub mod config;
pub mod error;
pub mod hotchain;
pub mod naming;
pub mod reorg;
pub mod types;
pub mod value;

pub use blockmap::ValidBlocks;
pub use config::{ColumnSpec, SinkConfig, SinkConfigBuilder, TableSpec};
pub use error::SinkError;
pub use hotchain::HotChain;
pub use types::{BlockRef, FinalBatchInfo, HeadState, HotBatchInfo};
pub use value::{Record, Value};
