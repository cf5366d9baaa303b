use super::SelectionStrategy;
use crate::registry::Candidate;
use std::sync::atomic::AtomicUsize;

/// Picks the backend with the fewest active connections. Ties go to the
/// earliest backend in registry order (stable minimum).
pub struct LeastConnections;

impl SelectionStrategy for LeastConnections {
    fn pick<'a>(&self, candidates: &'a [Candidate], _cursor: &AtomicUsize) -> &'a Candidate {
        let mut best = &candidates[0];
        for candidate in &candidates[1..] {
            if candidate.active_connections < best.active_connections {
                best = candidate;
            }
        }
        best
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}
