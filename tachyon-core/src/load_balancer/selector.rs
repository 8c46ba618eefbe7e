//! Load Balancing Selector logic
//!
//! Every strategy is a pure function of a [`Snapshot`], a little shared
//! counter state and a caller-supplied random source. None of them allocate
//! or block, and all are O(N) or better.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::load_balancer::snapshot::Snapshot;

/// Upper bound on power-of-two-choices candidates.
pub const MAX_CHOICES: usize = 8;

/// Host selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Random draw proportional to the snapshot weights.
    #[default]
    WeightedRandom,
    /// Rotate through hosts, ignoring weights.
    RoundRobin,
    /// Sample a few hosts and keep the cheapest.
    PowerOfTwoChoices,
    /// The host with the fewest requests in flight.
    LeastConnections,
    /// Session affinity through a consistent hash ring.
    ConsistentHashKey,
}

impl Strategy {
    /// Every strategy, in declaration order.
    pub const ALL: [Strategy; 5] = [
        Strategy::WeightedRandom,
        Strategy::RoundRobin,
        Strategy::PowerOfTwoChoices,
        Strategy::LeastConnections,
        Strategy::ConsistentHashKey,
    ];

    pub(crate) fn to_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        Self::ALL.get(usize::from(value)).copied().unwrap_or_default()
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::WeightedRandom => "weighted_random",
            Strategy::RoundRobin => "round_robin",
            Strategy::PowerOfTwoChoices => "power_of_two_choices",
            Strategy::LeastConnections => "least_connections",
            Strategy::ConsistentHashKey => "consistent_hash_key",
        };
        f.write_str(name)
    }
}

/// Counters shared by all callers of a strategy.
#[derive(Debug, Default)]
pub struct SelectorState {
    next: AtomicUsize,
}

/// Pick the index of a host in `snapshot`, or `None` for an empty snapshot.
///
/// `key` only matters to [`Strategy::ConsistentHashKey`], which falls back to
/// a weighted draw without one. `choices` is the candidate count for
/// [`Strategy::PowerOfTwoChoices`].
pub fn select<R: Rng + ?Sized>(
    strategy: Strategy,
    snapshot: &Snapshot,
    state: &SelectorState,
    key: Option<&str>,
    choices: usize,
    rng: &mut R,
) -> Option<usize> {
    if snapshot.is_empty() {
        return None;
    }

    match strategy {
        Strategy::WeightedRandom => weighted_random(snapshot, rng),
        Strategy::RoundRobin => round_robin(snapshot, state),
        Strategy::PowerOfTwoChoices => power_of_choices(snapshot, choices, rng),
        Strategy::LeastConnections => least_connections(snapshot),
        Strategy::ConsistentHashKey => match key {
            Some(key) => snapshot.ring().lookup(key),
            None => weighted_random(snapshot, rng),
        },
    }
}

/// Binary search of a uniform draw over the cumulative weights.
pub fn weighted_random<R: Rng + ?Sized>(snapshot: &Snapshot, rng: &mut R) -> Option<usize> {
    let len = snapshot.len();
    if len == 0 {
        return None;
    }

    let total = snapshot.total_weight();
    if !(total.is_finite() && total > 0.0) {
        return Some(rng.gen_range(0..len));
    }

    let target = rng.gen::<f64>() * total;
    // first entry >= target
    let index = snapshot.cumulative_weights().partition_point(|cumulative| *cumulative < target);
    Some(index.min(len - 1))
}

/// Shared counter modulo host count.
pub fn round_robin(snapshot: &Snapshot, state: &SelectorState) -> Option<usize> {
    match snapshot.len() {
        0 => None,
        len => Some(state.next.fetch_add(1, Ordering::Relaxed) % len),
    }
}

/// Draw `choices` distinct hosts uniformly and keep the one with the lowest
/// cost. Healthy hosts always beat unhealthy ones.
pub fn power_of_choices<R: Rng + ?Sized>(snapshot: &Snapshot, choices: usize, rng: &mut R) -> Option<usize> {
    let len = snapshot.len();
    match len {
        0 => return None,
        1 => return Some(0),
        _ => {}
    }

    let wanted = choices.clamp(2, MAX_CHOICES).min(len);
    let mut candidates = [0_usize; MAX_CHOICES];
    let mut drawn = 0;
    while drawn < wanted {
        let candidate = rng.gen_range(0..len);
        if !candidates[..drawn].contains(&candidate) {
            candidates[drawn] = candidate;
            drawn += 1;
        }
    }

    let hosts = snapshot.hosts();
    let cost = |index: usize| {
        let host = &hosts[index];
        (!host.is_healthy(), host.score(snapshot.effective_latency(index)))
    };

    candidates[..drawn]
        .iter()
        .copied()
        .map(|index| (index, cost(index)))
        .reduce(|best, candidate| if candidate.1 < best.1 { candidate } else { best })
        .map(|(index, _)| index)
}

/// Linear scan for the fewest active connections, first seen wins ties.
/// Healthy hosts always beat unhealthy ones.
pub fn least_connections(snapshot: &Snapshot) -> Option<usize> {
    snapshot
        .hosts()
        .iter()
        .enumerate()
        .map(|(index, host)| (index, (!host.is_healthy(), host.active_connections())))
        // `min_by_key` keeps the first minimum
        .min_by_key(|(_, load)| *load)
        .map(|(index, _)| index)
}
