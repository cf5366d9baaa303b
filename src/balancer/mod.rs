mod algorithm;
mod least_connections;
mod random;
mod round_robin;

pub use algorithm::Algorithm;
pub use least_connections::LeastConnections;
pub use random::Random;
pub use round_robin::{RoundRobin, WeightedRoundRobin};

use crate::registry::{Backend, Candidate};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One selection policy: pick a backend out of a non-empty snapshot of
/// eligible candidates. Strategies never touch the registry themselves; the
/// snapshot already carries the load readings they need.
pub trait SelectionStrategy: Send + Sync {
    fn pick<'a>(&self, candidates: &'a [Candidate], cursor: &AtomicUsize) -> &'a Candidate;

    fn name(&self) -> &'static str;
}

pub fn create_strategy(algorithm: Algorithm) -> Box<dyn SelectionStrategy> {
    match algorithm {
        Algorithm::RoundRobin => Box::new(RoundRobin),
        Algorithm::WeightedRoundRobin => Box::new(WeightedRoundRobin),
        Algorithm::LeastConnections => Box::new(LeastConnections),
        Algorithm::Random => Box::new(Random),
    }
}

/// Runtime-switchable selection engine. The rotation cursor is shared by the
/// round-robin-family strategies and reset whenever the algorithm changes;
/// fetch_add keeps concurrent selections from observing a duplicate index.
pub struct Balancer {
    strategy: RwLock<(Algorithm, Box<dyn SelectionStrategy>)>,
    cursor: AtomicUsize,
}

impl Balancer {
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            strategy: RwLock::new((algorithm, create_strategy(algorithm))),
            cursor: AtomicUsize::new(0),
        }
    }

    pub async fn algorithm(&self) -> Algorithm {
        self.strategy.read().await.0
    }

    pub async fn set_algorithm(&self, algorithm: Algorithm) {
        let mut guard = self.strategy.write().await;
        *guard = (algorithm, create_strategy(algorithm));
        self.cursor.store(0, Ordering::SeqCst);
    }

    pub async fn select(&self, candidates: &[Candidate]) -> Option<Arc<Backend>> {
        if candidates.is_empty() {
            return None;
        }
        // A lone survivor needs no algorithm, and skipping the pick avoids
        // advancing the cursor for nothing.
        if candidates.len() == 1 {
            return Some(candidates[0].backend.clone());
        }

        let guard = self.strategy.read().await;
        Some(guard.1.pick(candidates, &self.cursor).backend.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn candidate(name: &str, port: u16, weight: u32, active: usize) -> Candidate {
        let backend = Backend::from_config(&ServerConfig {
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
            port,
            weight,
            health_check_path: "/health".to_string(),
            enabled: true,
        })
        .unwrap();
        Candidate {
            backend: Arc::new(backend),
            active_connections: active,
        }
    }

    async fn picks(balancer: &Balancer, candidates: &[Candidate], n: usize) -> Vec<String> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(balancer.select(candidates).await.unwrap().name.clone());
        }
        out
    }

    #[tokio::test]
    async fn empty_set_selects_nothing() {
        let balancer = Balancer::new(Algorithm::RoundRobin);
        assert!(balancer.select(&[]).await.is_none());
    }

    #[tokio::test]
    async fn single_candidate_returned_for_every_algorithm() {
        let candidates = vec![candidate("only", 8001, 1, 0)];
        for algorithm in [
            Algorithm::RoundRobin,
            Algorithm::WeightedRoundRobin,
            Algorithm::LeastConnections,
            Algorithm::Random,
        ] {
            let balancer = Balancer::new(algorithm);
            let picked = balancer.select(&candidates).await.unwrap();
            assert_eq!(picked.name, "only");
        }
    }

    #[tokio::test]
    async fn round_robin_visits_each_once_in_order() {
        let candidates = vec![
            candidate("a", 8001, 1, 0),
            candidate("b", 8002, 1, 0),
            candidate("c", 8003, 1, 0),
        ];
        let balancer = Balancer::new(Algorithm::RoundRobin);
        assert_eq!(
            picks(&balancer, &candidates, 6).await,
            ["a", "b", "c", "a", "b", "c"]
        );
    }

    #[tokio::test]
    async fn weighted_round_robin_clusters_by_weight() {
        let candidates = vec![candidate("a", 8001, 3, 0), candidate("b", 8002, 1, 0)];
        let balancer = Balancer::new(Algorithm::WeightedRoundRobin);
        assert_eq!(
            picks(&balancer, &candidates, 8).await,
            ["a", "a", "a", "b", "a", "a", "a", "b"]
        );
    }

    #[tokio::test]
    async fn least_connections_picks_minimum() {
        let candidates = vec![
            candidate("a", 8001, 1, 4),
            candidate("b", 8002, 1, 1),
            candidate("c", 8003, 1, 2),
        ];
        let balancer = Balancer::new(Algorithm::LeastConnections);
        assert_eq!(balancer.select(&candidates).await.unwrap().name, "b");
    }

    #[tokio::test]
    async fn least_connections_tie_goes_to_earliest() {
        let candidates = vec![
            candidate("a", 8001, 1, 3),
            candidate("b", 8002, 1, 3),
            candidate("c", 8003, 1, 1),
            candidate("d", 8004, 1, 5),
            candidate("e", 8005, 1, 2),
            candidate("f", 8006, 1, 1),
        ];
        let balancer = Balancer::new(Algorithm::LeastConnections);
        // c (index 2) and f (index 5) tie; the earlier one wins.
        assert_eq!(balancer.select(&candidates).await.unwrap().name, "c");
    }

    #[tokio::test]
    async fn random_returns_a_member_without_moving_cursor() {
        let candidates = vec![
            candidate("a", 8001, 1, 0),
            candidate("b", 8002, 1, 0),
            candidate("c", 8003, 1, 0),
        ];
        let balancer = Balancer::new(Algorithm::Random);
        for _ in 0..20 {
            let picked = balancer.select(&candidates).await.unwrap();
            assert!(["a", "b", "c"].contains(&picked.name.as_str()));
        }
        assert_eq!(balancer.cursor.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn switching_algorithm_resets_cursor() {
        let candidates = vec![
            candidate("a", 8001, 1, 0),
            candidate("b", 8002, 1, 0),
            candidate("c", 8003, 1, 0),
        ];
        let balancer = Balancer::new(Algorithm::RoundRobin);

        // Advance partway through the rotation.
        assert_eq!(picks(&balancer, &candidates, 2).await, ["a", "b"]);

        balancer.set_algorithm(Algorithm::Random).await;
        balancer.set_algorithm(Algorithm::RoundRobin).await;

        // No memory of the pre-switch position.
        assert_eq!(picks(&balancer, &candidates, 3).await, ["a", "b", "c"]);
    }
}
