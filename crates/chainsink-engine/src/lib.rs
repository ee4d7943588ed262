//! chainsink-engine — the dual-zone ingest pipeline.
//!
//! # Architecture
//!
//! ```text
//! IngestCoordinator
//!     ├── TableSet             (managed tables, DDL, schema validation)
//!     ├── ZoneRouter           (hot / cold / plain physical names)
//!     ├── Store / IngestBuffer (per-batch staging + batched flush)
//!     ├── ValidBlocksRegistry  (canonical hashes for the hot window)
//!     ├── CheckpointStore      (live + cold cursors)
//!     ├── MigrationEngine      (hot → cold promotion)
//!     └── reconcile            (stale-restart rollback to the cold cursor)
//! ```
//!
//! The coordinator serializes every state transition; only the insert step
//! fans out across tables.

pub mod buffer;
pub mod checkpoint;
pub mod coordinator;
pub mod migration;
pub mod reconcile;
pub mod registry;
pub mod router;
pub mod tables;

pub use buffer::{Store, BATCH_SIZE};
pub use checkpoint::{CheckpointStore, ColdStatus};
pub use coordinator::{IngestCoordinator, SinkState};
pub use migration::{
    MigrationEngine, MigrationObserver, MigrationReport, MigrationTrigger, RowTransform,
    TableMigration,
};
pub use registry::{ValidBlocksRegistry, REGISTRY_TABLE};
pub use router::ZoneRouter;
pub use tables::{ManagedTable, TableSet};
