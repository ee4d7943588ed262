//! Zone router — picks the physical table for an insert.
//!
//! While catching up, every block is already past the finality depth, so
//! hot-supported entities write straight to the cold zone; routing them
//! through the hot zone would be pure migration overhead. At the chain tip
//! they go to the hot zone instead. Regular tables are never routed.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::tables::ManagedTable;

/// Routes entity inserts to the hot, cold, or plain physical table.
pub struct ZoneRouter {
    network: String,
    at_chain_tip: AtomicBool,
}

impl ZoneRouter {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            at_chain_tip: AtomicBool::new(false),
        }
    }

    pub fn is_at_chain_tip(&self) -> bool {
        self.at_chain_tip.load(Ordering::Acquire)
    }

    /// Set by the producer when it starts (or stops) following live data.
    pub fn set_at_chain_tip(&self, flag: bool) {
        let previous = self.at_chain_tip.swap(flag, Ordering::AcqRel);
        if previous != flag {
            tracing::info!(at_chain_tip = flag, "zone routing switched");
        }
    }

    /// Physical destination for an entity of this table.
    pub fn route(&self, table: &ManagedTable) -> String {
        if !table.hot_supported {
            table.plain_name(&self.network)
        } else if self.is_at_chain_tip() {
            table.hot_name(&self.network)
        } else {
            table.cold_name(&self.network)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::TableSet;
    use chainsink_core::config::{ColumnSpec, TableSpec};

    fn tables() -> TableSet {
        TableSet::from_specs(
            "ethereum",
            &[
                TableSpec {
                    kind: "TokenTransfer".into(),
                    columns: vec![ColumnSpec::new("height", "UInt64")],
                    order_by: "height".into(),
                    hot_supported: true,
                    hex_columns: vec![],
                },
                TableSpec {
                    kind: "TokenMeta".into(),
                    columns: vec![ColumnSpec::new("address", "String")],
                    order_by: "address".into(),
                    hot_supported: false,
                    hex_columns: vec![],
                },
            ],
        )
    }

    #[test]
    fn catchup_routes_to_cold() {
        let set = tables();
        let router = ZoneRouter::new("ethereum");
        assert_eq!(
            router.route(set.get("TokenTransfer").unwrap()),
            "ethereum_cold_token_transfers"
        );
    }

    #[test]
    fn tip_routes_to_hot() {
        let set = tables();
        let router = ZoneRouter::new("ethereum");
        router.set_at_chain_tip(true);
        assert_eq!(
            router.route(set.get("TokenTransfer").unwrap()),
            "ethereum_hot_token_transfers"
        );
    }

    #[test]
    fn regular_tables_are_never_routed() {
        let set = tables();
        let router = ZoneRouter::new("ethereum");
        router.set_at_chain_tip(true);
        assert_eq!(
            router.route(set.get("TokenMeta").unwrap()),
            "ethereum_token_metas"
        );
    }
}
