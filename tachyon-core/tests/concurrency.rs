//! Stress tests mixing selections, reports and topology changes across
//! threads.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tachyon_core::{BalancerConfig, LoadBalancer, Strategy, TrackerKind};

const THREADS: u64 = 8;
const OPS_PER_THREAD: u64 = 125_000;
const STABLE_HOSTS: [&str; 3] = ["a:1", "b:1", "c:1"];
const CHURN_HOST: &str = "d:1";

fn stress(tracker: TrackerKind) {
    let config = BalancerConfig { tracker, rebuild_every_samples: 500, ..Default::default() };
    let engine = LoadBalancer::new(config).unwrap();
    for host in STABLE_HOSTS {
        engine.register_host(host).unwrap();
    }
    let known: BTreeSet<&str> = STABLE_HOSTS.iter().copied().chain([CHURN_HOST]).collect();
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        // topology and strategy churn while requests flow
        scope.spawn(|| {
            let mut round = 0_usize;
            while !done.load(Ordering::Relaxed) {
                engine.register_host(CHURN_HOST).unwrap();
                engine.set_strategy(Strategy::ALL[round % Strategy::ALL.len()]);
                engine.unregister_host(CHURN_HOST);
                engine.evict_expired();
                round += 1;
            }
        });

        let workers: Vec<_> = (0..THREADS)
            .map(|worker| {
                let engine = &engine;
                let known = &known;
                scope.spawn(move || {
                    let mut rng = SmallRng::seed_from_u64(worker);
                    let key = format!("session-{worker}");
                    for op in 0..OPS_PER_THREAD / 2 {
                        let snapshot = engine.snapshot();
                        let cumulative = snapshot.cumulative_weights();
                        assert_eq!(cumulative.len(), snapshot.hosts().len());
                        assert!(cumulative.windows(2).all(|pair| pair[0] <= pair[1]));
                        assert_eq!(cumulative.last().copied().unwrap_or(0.0), snapshot.total_weight());

                        let host = engine.select_host_with(Some(key.as_str()), &mut rng).expect("stable hosts never leave");
                        assert!(known.contains(&*host), "selected unknown host {host}");

                        let latency = Duration::from_micros(rng.gen_range(500..20_000));
                        engine.report_outcome(&host, latency, op % 17 != 0);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        done.store(true, Ordering::Relaxed);
    });

    let mut reported = 0;
    for host in STABLE_HOSTS {
        let stats = engine.get_stats(host).unwrap();
        reported += stats.sample_count;
        assert!(stats.failures <= stats.sample_count);
        if let Some(average) = stats.avg_latency {
            assert!(average >= Duration::from_micros(500) && average < Duration::from_millis(20), "{host}: {average:?}");
        }
        // every selection of a stable host was reported back
        assert_eq!(stats.active_connections, 0, "{host}");
    }
    assert!(reported <= THREADS * OPS_PER_THREAD / 2);
}

#[test]
fn million_operations_with_bucket_windows() {
    stress(TrackerKind::Buckets);
}

#[test]
fn million_operations_with_ring_windows() {
    stress(TrackerKind::Ring);
}

#[test]
fn million_operations_with_ewma() {
    stress(TrackerKind::Ewma);
}
