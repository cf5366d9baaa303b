use super::SelectionStrategy;
use crate::registry::Candidate;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Plain rotation in registry order. Ignores weight.
pub struct RoundRobin;

impl SelectionStrategy for RoundRobin {
    fn pick<'a>(&self, candidates: &'a [Candidate], cursor: &AtomicUsize) -> &'a Candidate {
        let index = cursor.fetch_add(1, Ordering::SeqCst) % candidates.len();
        &candidates[index]
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

/// Rotation over the sequence in which each backend occupies `weight`
/// consecutive slots in registry order, so a weight-3 backend takes 3 of
/// every sum-of-weights picks, clustered. The slot index is computed
/// directly over cumulative weights instead of materializing the expanded
/// sequence; the distribution is identical.
pub struct WeightedRoundRobin;

impl SelectionStrategy for WeightedRoundRobin {
    fn pick<'a>(&self, candidates: &'a [Candidate], cursor: &AtomicUsize) -> &'a Candidate {
        let total: usize = candidates.iter().map(|c| c.backend.weight as usize).sum();
        let mut slot = cursor.fetch_add(1, Ordering::SeqCst) % total;

        for candidate in candidates {
            let weight = candidate.backend.weight as usize;
            if slot < weight {
                return candidate;
            }
            slot -= weight;
        }

        // total == sum of weights, so the walk always lands above.
        unreachable!("slot index exceeded total weight")
    }

    fn name(&self) -> &'static str {
        "weighted_round_robin"
    }
}
