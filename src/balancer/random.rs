use super::SelectionStrategy;
use crate::registry::Candidate;
use rand::Rng;
use std::sync::atomic::AtomicUsize;

/// Uniform pick. Leaves the shared rotation cursor untouched.
pub struct Random;

impl SelectionStrategy for Random {
    fn pick<'a>(&self, candidates: &'a [Candidate], _cursor: &AtomicUsize) -> &'a Candidate {
        let index = rand::thread_rng().gen_range(0..candidates.len());
        &candidates[index]
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
