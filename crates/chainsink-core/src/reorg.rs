//! Reorg detection and common-ancestor resolution.
//!
//! A reorg is declared when the first block of a new hot batch sits at or
//! below the current tip of the hot chain. The producer guarantees contiguous
//! heights within a batch, so checking the first block suffices; a hash
//! mismatch at the tip height is a subset of this rule.

use crate::error::SinkError;
use crate::hotchain::HotChain;
use crate::types::BlockRef;

/// Outcome of resolving a detected reorg against the hot chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgResolution {
    /// Highest block still shared with the incoming chain. Heights at or
    /// below this are kept; `-1` means nothing survives.
    pub ancestor: i64,
    /// Number of hot-chain blocks rolled back.
    pub dropped: usize,
}

/// Returns `true` if `incoming` reorganizes the chain tracked by `hot`.
pub fn is_reorg(hot: &HotChain, incoming: &[BlockRef]) -> bool {
    match (hot.tip(), incoming.first()) {
        (Some(tip), Some(first)) => first.height <= tip.height,
        _ => false,
    }
}

/// Find the common ancestor between the hot chain and an incoming block list.
///
/// Walking the hot chain from the tip, a block survives the reorg if the
/// incoming list carries the identical hash at its height, or if it sits
/// below the incoming range entirely (the batch does not contest it). The
/// highest surviving block at or above `finalized_height` is the ancestor.
/// When nothing survives, the ancestor is `finalized_height` itself
/// (finalized hashes are trusted unconditionally), but only if the incoming
/// batch actually connects there; otherwise the batch cannot be applied and
/// a consistency error is raised.
pub fn resolve(
    hot: &HotChain,
    incoming: &[BlockRef],
    finalized_height: i64,
) -> Result<ReorgResolution, SinkError> {
    let first_height = match incoming.first() {
        Some(b) => b.height,
        None => {
            return Ok(ReorgResolution {
                ancestor: hot.tip().map(|b| b.height as i64).unwrap_or(finalized_height),
                dropped: 0,
            })
        }
    };

    let mut ancestor = finalized_height;
    for block in hot.iter().rev() {
        if (block.height as i64) < finalized_height {
            break;
        }
        if block.height < first_height {
            // Below the contested range; untouched by this batch.
            ancestor = block.height as i64;
            break;
        }
        let matched = incoming
            .iter()
            .any(|b| b.height == block.height && b.hash == block.hash);
        if matched {
            ancestor = block.height as i64;
            break;
        }
    }

    if let Some(first) = incoming.first() {
        if (first.height as i64) > ancestor + 1 {
            return Err(SinkError::ReorgConsistency {
                height: first.height,
                reason: format!(
                    "incoming batch starts at {} but common ancestor is {ancestor}",
                    first.height
                ),
            });
        }
    }

    let dropped = hot
        .iter()
        .filter(|b| (b.height as i64) > ancestor)
        .count();

    tracing::warn!(ancestor, dropped, "reorg resolved");
    Ok(ReorgResolution { ancestor, dropped })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(blocks: &[(u64, &str)]) -> HotChain {
        let mut c = HotChain::new();
        for (h, hash) in blocks {
            assert!(c.push(BlockRef::new(*h, *hash)));
        }
        c
    }

    #[test]
    fn no_reorg_when_batch_extends_tip() {
        let hot = chain(&[(100, "A"), (101, "B")]);
        let incoming = vec![BlockRef::new(102, "C")];
        assert!(!is_reorg(&hot, &incoming));
    }

    #[test]
    fn reorg_on_equal_height() {
        let hot = chain(&[(100, "A"), (101, "B"), (102, "C")]);
        let incoming = vec![BlockRef::new(102, "C2"), BlockRef::new(103, "D2")];
        assert!(is_reorg(&hot, &incoming));
    }

    #[test]
    fn ancestor_is_highest_shared_hash() {
        let hot = chain(&[(100, "A"), (101, "B"), (102, "C")]);
        let incoming = vec![BlockRef::new(102, "C2"), BlockRef::new(103, "D2")];
        let r = resolve(&hot, &incoming, 50).unwrap();
        assert_eq!(r.ancestor, 101);
        assert_eq!(r.dropped, 1);
    }

    #[test]
    fn ancestor_falls_back_to_finalized_height() {
        let hot = chain(&[(100, "A"), (101, "B")]);
        // Nothing shared, but the batch connects at finalized + 1
        let incoming = vec![BlockRef::new(100, "A2"), BlockRef::new(101, "B2")];
        let r = resolve(&hot, &incoming, 99).unwrap();
        assert_eq!(r.ancestor, 99);
        assert_eq!(r.dropped, 2);
    }

    #[test]
    fn redelivered_ancestor_matches_in_overlap() {
        let hot = chain(&[(100, "A"), (101, "B"), (102, "C")]);
        // The batch re-delivers 101/B unchanged and replaces 102
        let incoming = vec![BlockRef::new(101, "B"), BlockRef::new(102, "C2")];
        let r = resolve(&hot, &incoming, 50).unwrap();
        assert_eq!(r.ancestor, 101);
        assert_eq!(r.dropped, 1);
    }

    #[test]
    fn reorg_deeper_than_window_is_a_consistency_error() {
        let hot = chain(&[(100, "A"), (101, "B")]);
        // The whole window is contested and the batch does not connect to
        // finalized + 1 either
        let incoming = vec![BlockRef::new(100, "A2"), BlockRef::new(101, "B2")];
        let err = resolve(&hot, &incoming, 90).unwrap_err();
        assert!(matches!(err, SinkError::ReorgConsistency { height: 100, .. }));
    }

    #[test]
    fn shared_hash_below_finalized_is_ignored() {
        let hot = chain(&[(100, "A"), (101, "B"), (102, "C")]);
        // 100/A matches but sits below the finalized floor of 101
        let incoming = vec![
            BlockRef::new(100, "A"),
            BlockRef::new(101, "B2"),
            BlockRef::new(102, "C2"),
        ];
        let r = resolve(&hot, &incoming, 101).unwrap();
        assert_eq!(r.ancestor, 101); // fallback, not the stale match at 100
    }
}
