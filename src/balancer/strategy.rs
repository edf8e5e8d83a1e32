use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::metrics::InstanceMetrics;
use crate::discovery::ServiceInstance;

/// Instance selection policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    RoundRobin,
    LeastConnections,
    WeightedRoundRobin,
    Random,
    /// Highest score over latency, error rate and load
    #[default]
    HealthBased,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::RoundRobin => write!(f, "round_robin"),
            Strategy::LeastConnections => write!(f, "least_connections"),
            Strategy::WeightedRoundRobin => write!(f, "weighted_round_robin"),
            Strategy::Random => write!(f, "random"),
            Strategy::HealthBased => write!(f, "health_based"),
        }
    }
}

// Each selector returns an index into a non-empty candidate slice.

pub(super) fn round_robin(counter: &AtomicUsize, candidates: &[ServiceInstance]) -> usize {
    counter.fetch_add(1, Ordering::Relaxed) % candidates.len()
}

pub(super) fn least_connections<M>(candidates: &[ServiceInstance], metrics: M) -> usize
where
    M: Fn(&str) -> Option<InstanceMetrics>,
{
    let mut best = 0;
    let mut fewest = u64::MAX;
    for (index, candidate) in candidates.iter().enumerate() {
        let active = metrics(&candidate.id).map(|m| m.active_connections).unwrap_or(0);
        // Strict comparison keeps the first-seen candidate on ties.
        if active < fewest {
            fewest = active;
            best = index;
        }
    }
    best
}

pub(super) fn weighted_round_robin(counter: &AtomicUsize, candidates: &[ServiceInstance]) -> usize {
    let total: u64 = candidates.iter().map(|c| u64::from(c.weight())).sum();
    if total == 0 {
        return 0;
    }

    let mut slot = counter.fetch_add(1, Ordering::Relaxed) as u64 % total;
    for (index, candidate) in candidates.iter().enumerate() {
        let weight = u64::from(candidate.weight());
        if slot < weight {
            return index;
        }
        slot -= weight;
    }
    0
}

pub(super) fn random(candidates: &[ServiceInstance]) -> usize {
    rand::thread_rng().gen_range(0..candidates.len())
}

pub(super) fn health_based<M>(candidates: &[ServiceInstance], metrics: M) -> usize
where
    M: Fn(&str) -> Option<InstanceMetrics>,
{
    let mut best = 0;
    let mut best_score = f64::MIN;
    for (index, candidate) in candidates.iter().enumerate() {
        let score = metrics(&candidate.id)
            .map(|m| m.score())
            .unwrap_or(InstanceMetrics::UNMEASURED_SCORE);
        if score > best_score {
            best_score = score;
            best = index;
        }
    }
    best
}
