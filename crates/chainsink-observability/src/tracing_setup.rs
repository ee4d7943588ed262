//! Tracing / logging initialisation for sink embedders.
//!
//! The sink logs on two axes with very different volumes: the ingest path
//! (one line per batch, reorg, and migration) and the database round trips
//! behind it (one line per insert chunk and retry). `LogConfig` tunes them
//! independently so a catchup run can keep batch logs without drowning in
//! flush noise.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log levels for the sink's components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default level for everything outside the sink:
    /// "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Level for the ingest path (coordinator, registry, migration).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingest: Option<String>,
    /// Level for database round trips (inserts, retries, DDL).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            ingest: None,
            storage: None,
            json: false,
        }
    }
}

impl LogConfig {
    /// Ingest path at debug, database round trips at warn. The usual
    /// setting for watching a processor catch up.
    pub fn verbose_ingest() -> Self {
        Self {
            ingest: Some("debug".into()),
            storage: Some("warn".into()),
            ..Self::default()
        }
    }

    /// The `EnvFilter` directive string this config resolves to.
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        if let Some(level) = &self.ingest {
            directives.push_str(&format!(",chainsink_engine={level},chainsink_core={level}"));
        }
        if let Some(level) = &self.storage {
            directives.push_str(&format!(",chainsink_storage={level}"));
        }
        directives
    }
}

/// Install the global subscriber for this process.
///
/// Returns `false` when a subscriber is already installed (embedders that
/// bring their own keep it; the sink's spans flow into theirs).
pub fn init_tracing(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_new(config.directives()).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
            .is_ok()
    }
}
