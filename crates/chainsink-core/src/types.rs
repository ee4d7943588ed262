//! Shared types for the ingest pipeline.

use serde::{Deserialize, Serialize};

// ─── BlockRef ────────────────────────────────────────────────────────────────

/// A block reference — the minimum the adapter needs to track chain position.
///
/// Equality is by both fields; height-only comparison is used only where a
/// caller explicitly asks for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    /// Block height.
    pub height: u64,
    /// Block hash (`0x…` or bare hex).
    pub hash: String,
}

impl BlockRef {
    pub fn new(height: u64, hash: impl Into<String>) -> Self {
        Self {
            height,
            hash: hash.into(),
        }
    }
}

// ─── Producer batch descriptors ──────────────────────────────────────────────

/// Describes a finalized batch handed to `transact_final`.
#[derive(Debug, Clone)]
pub struct FinalBatchInfo {
    /// Head the producer had acknowledged before this batch.
    pub prev_head: BlockRef,
    /// Head after this batch commits.
    pub next_head: BlockRef,
    /// Whether the producer considers itself caught up after this batch.
    pub is_on_top: bool,
}

/// Describes an unfinalized batch handed to `transact_hot`.
#[derive(Debug, Clone)]
pub struct HotBatchInfo {
    /// Deepest block the chain has finalized.
    pub finalized_head: BlockRef,
    /// Block the new chain segment builds on.
    pub base_head: BlockRef,
    /// The new blocks, contiguous and in ascending height order.
    pub new_blocks: Vec<BlockRef>,
}

// ─── Resume state ────────────────────────────────────────────────────────────

/// Position returned to the producer from `connect()`.
///
/// A fresh database yields the sentinel `{height: -1, hash: "", hot_blocks:
/// [], finalized_height: -1}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadState {
    pub height: i64,
    pub hash: String,
    pub hot_blocks: Vec<BlockRef>,
    pub finalized_height: i64,
}

impl HeadState {
    /// The state of a processor that has never written anything.
    pub fn fresh() -> Self {
        Self {
            height: -1,
            hash: String::new(),
            hot_blocks: vec![],
            finalized_height: -1,
        }
    }
}
