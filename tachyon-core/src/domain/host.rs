//! Host models.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::clock::Nanos;
use crate::load_balancer::tracker::{LatencyTracker, WindowStats};

/// The opaque identity of a host, typically its `host:port` address.
pub type HostId = Arc<str>;

/// A single upstream host the engine can route to.
#[derive(Debug)]
pub struct Host {
    id: HostId,
    /// Latency window, swapped wholesale when the window shape is reconfigured.
    tracker: ArcSwap<LatencyTracker>,
    /// Requests selected but not yet reported.
    active: AtomicU64,
    /// Whether the host is currently considered healthy
    healthy: AtomicBool,
}

impl Host {
    /// Create a host with an empty tracker.
    pub fn new(id: HostId, tracker: LatencyTracker) -> Self {
        Self {
            id,
            tracker: ArcSwap::from_pointee(tracker),
            active: AtomicU64::new(0),
            healthy: AtomicBool::new(true), // assume healthy initially
        }
    }

    /// The host's identity.
    pub fn id(&self) -> &HostId {
        &self.id
    }

    /// Record a completed request.
    pub fn record(&self, now: Nanos, latency: Duration, success: bool) {
        self.tracker.load().record(now, latency, success);
    }

    /// Windowed statistics as of `now`.
    pub fn stats(&self, now: Nanos) -> WindowStats {
        self.tracker.load().stats(now)
    }

    /// Drop samples older than the window.
    pub fn evict_expired(&self, now: Nanos) -> u64 {
        self.tracker.load().evict_expired(now)
    }

    pub(crate) fn replace_tracker(&self, tracker: LatencyTracker) {
        self.tracker.store(Arc::new(tracker));
    }

    /// Count a request routed to this host.
    pub fn acquire(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a request as finished. Never drops below zero, so a report
    /// without a matching selection is harmless.
    pub fn release(&self) {
        let _ = self.active.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |active| active.checked_sub(1));
    }

    /// Requests currently in flight.
    pub fn active_connections(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    /// Check if the host is marked healthy
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Update the health status, returning whether it changed.
    pub fn set_healthy(&self, is_healthy: bool) -> bool {
        self.healthy.swap(is_healthy, Ordering::AcqRel) != is_healthy
    }

    /// The cost of routing one more request here, lower is better.
    ///
    /// Score = (Latency ms + 1) * (Active Requests + 1)
    pub fn score(&self, latency: Duration) -> f64 {
        let active = self.active_connections() as f64;

        // Add 1 to prevent multiplying by zero
        (latency.as_nanos() as f64 / 1_000_000.0 + 1.0) * (active + 1.0)
    }
}

/// A thread-safe reference to a Host.
pub type SharedHost = Arc<Host>;
