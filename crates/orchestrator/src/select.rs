//! Cluster and DR-policy choice per workload group.

use drdeploy_core::{ClusterConfig, ClusterSlot, ClusterStrategy, PolicyOrder};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

pub(crate) fn rng_for(seed: Option<u64>, stream: u64) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s.wrapping_add(stream)),
        None => StdRng::from_os_rng(),
    }
}

/// Picks the hosting cluster for each workload group.
#[derive(Debug)]
pub struct ClusterSelector {
    strategy: ClusterStrategy,
    override_slot: Option<ClusterSlot>,
    next: ClusterSlot,
    rng: StdRng,
}

impl ClusterSelector {
    pub fn new(strategy: ClusterStrategy, override_slot: Option<ClusterSlot>, seed: Option<u64>) -> Self {
        Self { strategy, override_slot, next: ClusterSlot::First, rng: rng_for(seed, 0) }
    }

    pub fn select(&mut self, clusters: &[ClusterConfig; 2]) -> ClusterSlot {
        let slot = match (self.override_slot, self.strategy) {
            (Some(slot), _) => slot,
            (None, ClusterStrategy::RoundRobin) => {
                let slot = self.next;
                self.next = slot.other();
                slot
            }
            (None, ClusterStrategy::Random) => {
                if self.rng.random_bool(0.5) { ClusterSlot::First } else { ClusterSlot::Second }
            }
            (None, ClusterStrategy::LeastLoaded) => {
                if clusters[1].deployed_count < clusters[0].deployed_count { ClusterSlot::Second } else { ClusterSlot::First }
            }
        };
        debug!(strategy = ?self.strategy, cluster = %clusters[slot.index()].name, "cluster selected");
        slot
    }
}

/// Hands out a DR policy per iteration.
#[derive(Debug)]
pub struct PolicyPicker {
    names: Vec<String>,
    order: PolicyOrder,
    cursor: usize,
    rng: StdRng,
}

impl PolicyPicker {
    /// `names` must be non-empty; discovery guarantees it.
    pub fn new(names: Vec<String>, order: PolicyOrder, seed: Option<u64>) -> Self {
        Self { names, order, cursor: 0, rng: rng_for(seed, 1) }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn pick(&mut self) -> &str {
        let idx = match self.order {
            PolicyOrder::Random => self.rng.random_range(0..self.names.len()),
            PolicyOrder::Cycle => {
                let idx = self.cursor % self.names.len();
                self.cursor += 1;
                idx
            }
        };
        &self.names[idx]
    }
}
