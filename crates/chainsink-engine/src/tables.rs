//! Managed tables: the bridge from entity kinds to physical tables.
//!
//! Hot-supported tables materialize as a `{network}_hot_{name}` /
//! `{network}_cold_{name}` pair with identical schemas; regular tables get a
//! single `{network}_{name}`. The external schema loader hands us parsed
//! `TableSpec`s; all we do here is derive names, generate DDL, and validate.

use std::collections::{HashMap, HashSet};

use chainsink_core::config::TableSpec;
use chainsink_core::naming;
use chainsink_core::SinkError;
use chainsink_storage::database::{DdlEngine, TableDdl};

/// One managed table with its derived physical names.
#[derive(Debug, Clone)]
pub struct ManagedTable {
    /// Entity kind (PascalCase), as the producer names it.
    pub kind: String,
    /// snake_case plural base name.
    pub base: String,
    pub hot_supported: bool,
    pub columns: Vec<(String, String)>,
    pub order_by: String,
    pub hex_columns: HashSet<String>,
}

impl ManagedTable {
    pub fn hot_name(&self, network: &str) -> String {
        naming::hot_table(network, &self.base)
    }

    pub fn cold_name(&self, network: &str) -> String {
        naming::cold_table(network, &self.base)
    }

    pub fn plain_name(&self, network: &str) -> String {
        naming::plain_table(network, &self.base)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }
}

/// All managed tables, in discovery order.
#[derive(Debug, Clone)]
pub struct TableSet {
    network: String,
    tables: Vec<ManagedTable>,
    by_kind: HashMap<String, usize>,
}

impl TableSet {
    pub fn from_specs(network: impl Into<String>, specs: &[TableSpec]) -> Self {
        let tables: Vec<ManagedTable> = specs
            .iter()
            .map(|s| ManagedTable {
                kind: s.kind.clone(),
                base: naming::table_base(&s.kind),
                hot_supported: s.hot_supported,
                columns: s.columns.iter().map(|c| (c.name.clone(), c.ty.clone())).collect(),
                order_by: s.order_by.clone(),
                hex_columns: s.hex_columns.iter().cloned().collect(),
            })
            .collect();
        let by_kind = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.kind.clone(), i))
            .collect();
        Self {
            network: network.into(),
            tables,
            by_kind,
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn get(&self, kind: &str) -> Option<&ManagedTable> {
        self.by_kind.get(kind).map(|i| &self.tables[*i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManagedTable> {
        self.tables.iter()
    }

    pub fn hot_supported(&self) -> impl Iterator<Item = &ManagedTable> {
        self.tables.iter().filter(|t| t.hot_supported)
    }

    pub fn has_hot_supported(&self) -> bool {
        self.tables.iter().any(|t| t.hot_supported)
    }

    /// The representative table for migration cutoff queries: the first
    /// hot-supported table by discovery order.
    pub fn representative(&self) -> Option<&ManagedTable> {
        self.hot_supported().next()
    }

    /// Every hot-supported table must carry the height column; the error
    /// names each offender together with the columns it does declare so the
    /// operator can move the schema to the regular directory or fix it.
    pub fn validate(&self, height_column: &str) -> Result<(), SinkError> {
        let offenders: Vec<String> = self
            .hot_supported()
            .filter(|t| !t.has_column(height_column))
            .map(|t| format!("{} (columns: {})", t.base, t.column_names().join(", ")))
            .collect();
        if offenders.is_empty() {
            Ok(())
        } else {
            Err(SinkError::Schema(format!(
                "hot-supported tables missing the '{height_column}' column: {}",
                offenders.join("; ")
            )))
        }
    }

    /// DDL for every physical data table.
    pub fn ddl(&self) -> Vec<TableDdl> {
        let mut out = Vec::new();
        for t in &self.tables {
            if t.hot_supported {
                out.push(TableDdl {
                    name: t.hot_name(&self.network),
                    columns: t.columns.clone(),
                    engine: DdlEngine::MergeTree,
                    order_by: t.order_by.clone(),
                });
                out.push(TableDdl {
                    name: t.cold_name(&self.network),
                    columns: t.columns.clone(),
                    engine: DdlEngine::ReplacingMergeTree {
                        version_column: None,
                    },
                    order_by: t.order_by.clone(),
                });
            } else {
                out.push(TableDdl {
                    name: t.plain_name(&self.network),
                    columns: t.columns.clone(),
                    engine: DdlEngine::ReplacingMergeTree {
                        version_column: None,
                    },
                    order_by: t.order_by.clone(),
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainsink_core::config::ColumnSpec;

    fn spec(kind: &str, hot: bool, columns: &[(&str, &str)]) -> TableSpec {
        TableSpec {
            kind: kind.into(),
            columns: columns
                .iter()
                .map(|(n, t)| ColumnSpec::new(*n, *t))
                .collect(),
            order_by: columns[0].0.into(),
            hot_supported: hot,
            hex_columns: vec![],
        }
    }

    #[test]
    fn physical_names_follow_convention() {
        let set = TableSet::from_specs(
            "ethereum",
            &[
                spec("TokenTransfer", true, &[("height", "UInt64")]),
                spec("TokenMeta", false, &[("address", "String")]),
            ],
        );
        let transfers = set.get("TokenTransfer").unwrap();
        assert_eq!(transfers.hot_name("ethereum"), "ethereum_hot_token_transfers");
        assert_eq!(transfers.cold_name("ethereum"), "ethereum_cold_token_transfers");
        let metas = set.get("TokenMeta").unwrap();
        assert_eq!(metas.plain_name("ethereum"), "ethereum_token_metas");
    }

    #[test]
    fn representative_is_first_hot_supported() {
        let set = TableSet::from_specs(
            "ethereum",
            &[
                spec("TokenMeta", false, &[("address", "String")]),
                spec("TokenTransfer", true, &[("height", "UInt64")]),
                spec("Swap", true, &[("height", "UInt64")]),
            ],
        );
        assert_eq!(set.representative().unwrap().kind, "TokenTransfer");
    }

    #[test]
    fn validate_enumerates_offenders_and_their_columns() {
        let set = TableSet::from_specs(
            "ethereum",
            &[
                spec("TokenTransfer", true, &[("height", "UInt64")]),
                spec("Swap", true, &[("block", "UInt64"), ("pool", "String")]),
            ],
        );
        let err = set.validate("height").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("swaps"));
        assert!(message.contains("block, pool"));
        assert!(!message.contains("token_transfers"));
    }

    #[test]
    fn ddl_emits_pair_for_hot_supported() {
        let set = TableSet::from_specs(
            "base",
            &[
                spec("Swap", true, &[("height", "UInt64")]),
                spec("Pool", false, &[("address", "String")]),
            ],
        );
        let ddl = set.ddl();
        let names: Vec<&str> = ddl.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["base_hot_swaps", "base_cold_swaps", "base_pools"]);
        assert_eq!(ddl[0].engine, DdlEngine::MergeTree);
        assert!(matches!(ddl[1].engine, DdlEngine::ReplacingMergeTree { .. }));
    }
}
