//! Sink configuration.

use serde::{Deserialize, Serialize};

/// One column of a managed table, declared in ClickHouse type syntax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name, e.g. `"height"`.
    pub name: String,
    /// Column type, e.g. `"UInt64"`, `"FixedString(32)"`, `"UInt256"`.
    pub ty: String,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
        }
    }
}

/// A managed table, parsed out of a schema directory by the external loader.
///
/// `hot_supported` tables materialize as a hot/cold pair and participate in
/// migration; they must declare the configured height column. Regular tables
/// get a single physical table and are never routed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSpec {
    /// Entity kind, PascalCase (e.g. `"TokenTransfer"`).
    pub kind: String,
    pub columns: Vec<ColumnSpec>,
    /// ORDER BY clause body for the physical tables.
    pub order_by: String,
    #[serde(default)]
    pub hot_supported: bool,
    /// Columns holding hex bytes; `0x` prefixes are stripped on insert.
    #[serde(default)]
    pub hex_columns: Vec<String>,
}

impl TableSpec {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Recognized sink options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Row key in checkpoints and registry; isolates multiple processors
    /// sharing one database.
    #[serde(default = "default_processor_id")]
    pub processor_id: String,
    /// Base name of the live-checkpoint table; the cold variant appends
    /// `_cold`.
    #[serde(default = "default_state_table")]
    pub state_table: String,
    /// Prefix for all physical tables.
    #[serde(default = "default_network")]
    pub network: String,
    /// If false, skip the registry, migration, and reconciliation.
    #[serde(default = "bool_true")]
    pub support_hot_blocks: bool,
    /// Hot-chain length cap; also the migration cutoff delta.
    #[serde(default = "default_hot_blocks_depth")]
    pub hot_blocks_depth: u64,
    /// Column used for cutoff queries and schema validation.
    #[serde(default = "default_height_column")]
    pub height_column: String,
    /// Schema directory for regular tables, consumed by the external loader.
    #[serde(default = "default_tables_path")]
    pub tables_path: String,
    /// Schema directory for hot-supported tables, consumed by the external
    /// loader.
    #[serde(default = "default_hot_tables_path")]
    pub hot_supported_tables_path: String,
    /// Enables the migration-engine call from the coordinator.
    #[serde(default = "bool_true")]
    pub auto_migrate: bool,
    /// Block count between migrations when triggered by count.
    #[serde(default = "default_migration_interval")]
    pub migration_interval: u64,
    /// Trigger migration whenever the finalized height advances instead.
    #[serde(default)]
    pub migration_on_finality: bool,
    /// Reserved for a future quick-restart trust mode.
    #[serde(default = "default_stale_threshold_ms")]
    pub stale_hot_blocks_threshold_ms: u64,
    /// Reserved; the reconciler currently always rolls back lingering hot
    /// state.
    #[serde(default = "bool_true")]
    pub trust_hot_blocks_on_quick_restart: bool,
    /// Managed tables, already parsed by the external schema loader.
    #[serde(default)]
    pub tables: Vec<TableSpec>,
}

fn default_processor_id() -> String {
    "default".into()
}
fn default_state_table() -> String {
    "squid_processor_status".into()
}
fn default_network() -> String {
    "ethereum".into()
}
fn default_hot_blocks_depth() -> u64 {
    10
}
fn default_height_column() -> String {
    "height".into()
}
fn default_tables_path() -> String {
    "db/tables".into()
}
fn default_hot_tables_path() -> String {
    "db/hot_tables".into()
}
fn default_migration_interval() -> u64 {
    30
}
fn default_stale_threshold_ms() -> u64 {
    600_000
}
fn bool_true() -> bool {
    true
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            processor_id: default_processor_id(),
            state_table: default_state_table(),
            network: default_network(),
            support_hot_blocks: true,
            hot_blocks_depth: default_hot_blocks_depth(),
            height_column: default_height_column(),
            tables_path: default_tables_path(),
            hot_supported_tables_path: default_hot_tables_path(),
            auto_migrate: true,
            migration_interval: default_migration_interval(),
            migration_on_finality: false,
            stale_hot_blocks_threshold_ms: default_stale_threshold_ms(),
            trust_hot_blocks_on_quick_restart: true,
            tables: vec![],
        }
    }
}

impl SinkConfig {
    pub fn builder() -> SinkConfigBuilder {
        SinkConfigBuilder::default()
    }

    /// Name of the cold-checkpoint table.
    pub fn cold_state_table(&self) -> String {
        format!("{}_cold", self.state_table)
    }
}

/// Fluent builder for `SinkConfig`.
#[derive(Default)]
pub struct SinkConfigBuilder {
    config: SinkConfig,
}

impl SinkConfigBuilder {
    pub fn processor_id(mut self, id: impl Into<String>) -> Self {
        self.config.processor_id = id.into();
        self
    }

    pub fn state_table(mut self, name: impl Into<String>) -> Self {
        self.config.state_table = name.into();
        self
    }

    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.config.network = network.into();
        self
    }

    pub fn support_hot_blocks(mut self, on: bool) -> Self {
        self.config.support_hot_blocks = on;
        self
    }

    pub fn hot_blocks_depth(mut self, depth: u64) -> Self {
        self.config.hot_blocks_depth = depth;
        self
    }

    pub fn height_column(mut self, name: impl Into<String>) -> Self {
        self.config.height_column = name.into();
        self
    }

    pub fn tables_path(mut self, path: impl Into<String>) -> Self {
        self.config.tables_path = path.into();
        self
    }

    pub fn hot_supported_tables_path(mut self, path: impl Into<String>) -> Self {
        self.config.hot_supported_tables_path = path.into();
        self
    }

    pub fn auto_migrate(mut self, on: bool) -> Self {
        self.config.auto_migrate = on;
        self
    }

    pub fn migration_interval(mut self, blocks: u64) -> Self {
        self.config.migration_interval = blocks;
        self
    }

    pub fn migration_on_finality(mut self, on: bool) -> Self {
        self.config.migration_on_finality = on;
        self
    }

    pub fn table(mut self, spec: TableSpec) -> Self {
        self.config.tables.push(spec);
        self
    }

    pub fn build(self) -> SinkConfig {
        self.config
    }
}
