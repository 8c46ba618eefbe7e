//! Background maintenance tasks.
//!
//! Both tasks hold only a weak reference to the engine and stop on their own
//! once the last strong reference is dropped. Their cadence is re-read from
//! the configuration on every tick, so `update_config` takes effect without
//! restarting them.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::BalancerConfig;
use crate::engine::LoadBalancer;

/// Periodically evict expired samples from every host.
pub fn spawn_cleaner(engine: &Arc<LoadBalancer>) -> JoinHandle<()> {
    spawn_periodic(Arc::downgrade(engine), "cleaner", BalancerConfig::cleanup_interval, |engine| {
        engine.evict_expired();
    })
}

/// Periodically republish the snapshot so weights track fresh samples even
/// when the sample-count trigger is not reached.
pub fn spawn_rebuilder(engine: &Arc<LoadBalancer>) -> JoinHandle<()> {
    spawn_periodic(Arc::downgrade(engine), "rebuilder", BalancerConfig::rebuild_interval, |engine| {
        engine.refresh();
    })
}

fn spawn_periodic(
    engine: Weak<LoadBalancer>,
    name: &'static str,
    interval: fn(&BalancerConfig) -> Duration,
    tick: fn(&LoadBalancer),
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!(task = name, "background task started");
        loop {
            let Some(period) = engine.upgrade().map(|engine| interval(&engine.config())) else {
                break;
            };
            tokio::time::sleep(period).await;

            let Some(engine) = engine.upgrade() else {
                break;
            };
            tick(&engine);
        }
        tracing::debug!(task = name, "engine dropped, background task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn engine(clock: &Arc<ManualClock>) -> Arc<LoadBalancer> {
        let config = BalancerConfig { window_ms: 1_000, rebuild_every_samples: 0, ..Default::default() };
        Arc::new(LoadBalancer::with_clock(config, clock.clone()).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn cleaner_evicts_in_the_background() {
        let clock = Arc::new(ManualClock::new());
        let engine = engine(&clock);
        engine.register_host("a:1").unwrap();
        engine.report_outcome("a:1", Duration::from_millis(5), true);

        let handle = spawn_cleaner(&engine);
        clock.advance(Duration::from_secs(5));
        tokio::time::sleep(engine.config().cleanup_interval() * 2).await;

        // nothing left for a manual pass
        assert_eq!(engine.evict_expired().evicted, 0);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn rebuilder_publishes_fresh_weights() {
        let clock = Arc::new(ManualClock::new());
        let engine = engine(&clock);
        engine.register_host("a:1").unwrap();
        engine.register_host("b:1").unwrap();
        let generation = engine.snapshot().generation();

        let handle = spawn_rebuilder(&engine);
        engine.report_outcome("a:1", Duration::from_millis(10), true);
        engine.report_outcome("b:1", Duration::from_millis(100), true);
        clock.advance(engine.config().rebuild_interval());
        tokio::time::sleep(engine.config().rebuild_interval() * 2).await;

        let snapshot = engine.snapshot();
        assert!(snapshot.generation() > generation);
        assert!(snapshot.weight(0).unwrap() > snapshot.weight(1).unwrap());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn tasks_stop_with_the_engine() {
        let clock = Arc::new(ManualClock::new());
        let engine = engine(&clock);
        let cleaner = spawn_cleaner(&engine);
        let rebuilder = spawn_rebuilder(&engine);
        let period = engine.config().cleanup_interval();

        drop(engine);
        tokio::time::sleep(period * 2).await;
        assert!(cleaner.is_finished());
        assert!(rebuilder.is_finished());
    }
}
