//! ChainSink metrics definitions.
//!
//! All metrics use OpenTelemetry conventions.
//! They can be exported via OTLP to Prometheus, Grafana, Datadog, etc.

use opentelemetry::{
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};

/// Central metrics handle for the sink.
#[derive(Clone)]
pub struct SinkMetrics {
    pub blocks_ingested: Counter<u64>,
    pub rows_inserted: Counter<u64>,
    pub reorgs_detected: Counter<u64>,
    pub reorgs_executed: Counter<u64>,
    pub reorg_depth: Histogram<u64>,
    pub rows_migrated: Counter<u64>,
    pub migration_duration_ms: Histogram<f64>,
}

impl SinkMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            blocks_ingested: meter
                .u64_counter("chainsink.blocks_ingested")
                .with_description("Blocks acknowledged across finalized and hot batches")
                .build(),
            rows_inserted: meter
                .u64_counter("chainsink.rows_inserted")
                .with_description("Rows flushed to data tables")
                .build(),
            reorgs_detected: meter
                .u64_counter("chainsink.reorgs_detected")
                .with_description("Hot batches that reorganized the tracked chain")
                .build(),
            reorgs_executed: meter
                .u64_counter("chainsink.reorgs_executed")
                .with_description("Reorgs applied to the valid-blocks registry")
                .build(),
            reorg_depth: meter
                .u64_histogram("chainsink.reorg_depth")
                .with_description("Hot-chain blocks rolled back per reorg")
                .build(),
            rows_migrated: meter
                .u64_counter("chainsink.rows_migrated")
                .with_description("Rows promoted from the hot zone to the cold zone")
                .build(),
            migration_duration_ms: meter
                .f64_histogram("chainsink.migration_duration_ms")
                .with_description("Wall-clock time of a migration pass in milliseconds")
                .build(),
        }
    }

    pub fn record_ingest(&self, processor_id: &str, blocks: u64, rows: u64) {
        let attrs = [KeyValue::new("processor_id", processor_id.to_string())];
        self.blocks_ingested.add(blocks, &attrs);
        self.rows_inserted.add(rows, &attrs);
    }

    pub fn record_reorg(&self, processor_id: &str, rollback_height: i64, dropped: u64) {
        let attrs = [
            KeyValue::new("processor_id", processor_id.to_string()),
            KeyValue::new("rollback_height", rollback_height),
        ];
        self.reorgs_detected.add(1, &attrs);
        self.reorgs_executed.add(1, &attrs);
        self.reorg_depth.record(dropped, &attrs);
    }

    pub fn record_migration(&self, processor_id: &str, rows: u64, duration_ms: f64) {
        let attrs = [KeyValue::new("processor_id", processor_id.to_string())];
        self.rows_migrated.add(rows, &attrs);
        self.migration_duration_ms.record(duration_ms, &attrs);
    }
}
