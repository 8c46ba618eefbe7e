//! Turning per-host latency statistics into selection weights.
//!
//! For hosts with data, `weight = clamp((avg / fastest)^-sensitivity, min, max)`
//! scaled by the success ratio. Hosts without data get the mean of the
//! weighted hosts under [`NoDataPolicy::FleetAverage`], or are weighed as if
//! their average were the fixed latency under [`NoDataPolicy::FixedMs`].
//! Unhealthy hosts get the floor, and any input that would produce a
//! non-finite weight collapses to a uniform distribution. The result is
//! normalised to sum to 1.
//!
//! The calculation is deterministic and allocation-light; it runs once per
//! snapshot rebuild, never per request.

use std::time::Duration;

use crate::config::{BalancerConfig, NoDataPolicy};

/// What the calculator knows about one host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostMetrics {
    /// Windowed mean latency, `None` without data.
    pub average: Option<Duration>,
    /// Samples behind the mean.
    pub samples: u64,
    /// Failed fraction of those samples.
    pub failure_ratio: f64,
    /// External health verdict.
    pub healthy: bool,
}

/// The weighting knobs, extracted from [`BalancerConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightParams {
    /// Exponent applied to the latency ratio.
    pub sensitivity: f64,
    /// Weight floor.
    pub min_weight: f64,
    /// Weight ceiling.
    pub max_weight: f64,
    /// Exponent applied to the success ratio.
    pub failure_penalty: f64,
    /// How hosts without data are weighed.
    pub no_data: NoDataPolicy,
}

impl From<&BalancerConfig> for WeightParams {
    fn from(config: &BalancerConfig) -> Self {
        Self {
            sensitivity: config.sensitivity,
            min_weight: config.min_weight,
            max_weight: config.max_weight,
            failure_penalty: config.failure_penalty,
            no_data: config.no_data,
        }
    }
}

impl WeightParams {
    fn clamp(&self, weight: f64) -> f64 {
        weight.clamp(self.min_weight, self.max_weight)
    }
}

fn has_data(metrics: &HostMetrics) -> bool {
    metrics.healthy && metrics.samples > 0 && metrics.average.is_some()
}

/// Compute normalised weights, index-parallel to `metrics`.
pub fn compute_weights(metrics: &[HostMetrics], params: &WeightParams) -> Vec<f64> {
    let raw = match params.no_data {
        NoDataPolicy::FleetAverage => latency_weights(metrics, params),
        NoDataPolicy::FixedMs(millis) => {
            let assumed = Duration::from_millis(millis);
            let filled: Vec<HostMetrics> = metrics
                .iter()
                .map(|host| match host.average {
                    Some(_) if host.samples > 0 => *host,
                    _ => HostMetrics { average: Some(assumed), samples: 1, failure_ratio: 0.0, ..*host },
                })
                .collect();
            latency_weights(&filled, params)
        }
    }
    .unwrap_or_else(|| uniform(metrics, params));

    let total: f64 = raw.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        // unreachable with a validated config, but never hand NaN downstream
        return vec![1.0 / metrics.len() as f64; metrics.len()];
    }
    raw.into_iter().map(|weight| weight / total).collect()
}

fn uniform(metrics: &[HostMetrics], params: &WeightParams) -> Vec<f64> {
    let baseline = params.clamp(1.0);
    metrics.iter().map(|host| if host.healthy { baseline } else { params.min_weight }).collect()
}

/// Latency-derived weights, or `None` when the inputs are degenerate and the
/// uniform fallback applies.
fn latency_weights(metrics: &[HostMetrics], params: &WeightParams) -> Option<Vec<f64>> {
    let fastest = metrics
        .iter()
        .filter(|host| has_data(host))
        .filter_map(|host| host.average)
        .map(|average| average.as_nanos() as f64)
        .reduce(f64::min)?;

    if !(fastest.is_finite() && fastest > 0.0) {
        tracing::warn!(fastest, "degenerate latency inputs, falling back to uniform weights");
        return None;
    }

    let mut weights = vec![f64::NAN; metrics.len()];
    let (mut weighted_sum, mut weighted) = (0.0, 0_usize);
    for (weight, host) in weights.iter_mut().zip(metrics) {
        if !has_data(host) {
            continue;
        }
        let average = host.average?.as_nanos() as f64;
        let success = (1.0 - host.failure_ratio.clamp(0.0, 1.0)).powf(params.failure_penalty);
        let value = (average / fastest).powf(-params.sensitivity) * success;
        if !value.is_finite() {
            tracing::warn!(average, fastest, "non-finite weight, falling back to uniform weights");
            return None;
        }
        *weight = params.clamp(value);
        weighted_sum += *weight;
        weighted += 1;
    }

    let neutral = weighted_sum / weighted as f64;
    for (weight, host) in weights.iter_mut().zip(metrics) {
        if !host.healthy {
            *weight = params.min_weight;
        } else if !has_data(host) {
            *weight = neutral;
        }
    }
    Some(weights)
}

/// Latency assumed for hosts without data.
///
/// Under [`NoDataPolicy::FleetAverage`] this is the mean of the healthy hosts
/// that have data, and `None` when none do. The same hosts define the weight
/// given to hosts without data.
pub fn neutral_latency(metrics: &[HostMetrics], policy: NoDataPolicy) -> Option<Duration> {
    match policy {
        NoDataPolicy::FixedMs(millis) => Some(Duration::from_millis(millis)),
        NoDataPolicy::FleetAverage => {
            let (sum, count) = metrics
                .iter()
                .filter(|host| has_data(host))
                .filter_map(|host| host.average)
                .fold((0_u128, 0_u128), |(sum, count), average| (sum + average.as_nanos(), count + 1));
            (count > 0).then(|| Duration::from_nanos((sum / count) as u64))
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn params(sensitivity: f64) -> WeightParams {
        WeightParams {
            sensitivity,
            min_weight: 0.1,
            max_weight: 1.0,
            failure_penalty: 1.0,
            no_data: NoDataPolicy::FleetAverage,
        }
    }

    fn host(millis: Option<u64>) -> HostMetrics {
        HostMetrics {
            average: millis.map(Duration::from_millis),
            samples: u64::from(millis.is_some()) * 10,
            failure_ratio: 0.0,
            healthy: true,
        }
    }

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn empty_input_gives_empty_output() {
        assert!(compute_weights(&[], &params(2.0)).is_empty());
    }

    #[test]
    fn no_data_means_uniform() {
        let weights = compute_weights(&[host(None), host(None), host(None)], &params(2.0));
        assert_close(&weights, &[1.0 / 3.0; 3]);
    }

    #[test]
    fn equal_latencies_mean_uniform() {
        let weights = compute_weights(&[host(Some(40)), host(Some(40))], &params(4.0));
        assert_close(&weights, &[0.5, 0.5]);
    }

    #[test]
    fn zero_latency_falls_back_to_uniform() {
        let weights = compute_weights(&[host(Some(0)), host(Some(100))], &params(2.0));
        assert_close(&weights, &[0.5, 0.5]);
    }

    #[test]
    fn weights_follow_inverse_latency_ratio() {
        // 50/150/300 ms with sensitivity 1: 1, 1/3, 1/6
        let weights = compute_weights(&[host(Some(50)), host(Some(150)), host(Some(300))], &params(1.0));
        assert_close(&weights, &[1.0 / 1.5, (1.0 / 3.0) / 1.5, (1.0 / 6.0) / 1.5]);
    }

    #[test]
    fn sensitivity_sharpens_the_bias_down_to_the_floor() {
        // 50/150/300 ms with sensitivity 2: 1, 1/9, 1/36 -> clamped to 0.1
        let weights = compute_weights(&[host(Some(50)), host(Some(150)), host(Some(300))], &params(2.0));
        let total = 1.0 + 1.0 / 9.0 + 0.1;
        assert_close(&weights, &[1.0 / total, (1.0 / 9.0) / total, 0.1 / total]);
    }

    #[test]
    fn hosts_without_data_get_the_average_weight() {
        let weights = compute_weights(&[host(Some(10)), host(Some(20)), host(None)], &params(1.0));
        // raw: 1.0, 0.5, neutral 0.75
        assert_close(&weights, &[1.0 / 2.25, 0.5 / 2.25, 0.75 / 2.25]);
    }

    #[test]
    fn unhealthy_hosts_get_the_floor() {
        let mut sick = host(Some(5));
        sick.healthy = false;
        let weights = compute_weights(&[sick, host(Some(10)), host(None)], &params(1.0));
        // the sick host does not define the fastest latency
        assert_close(&weights, &[0.1 / 2.1, 1.0 / 2.1, 1.0 / 2.1]);

        let mut idle_sick = host(None);
        idle_sick.healthy = false;
        let weights = compute_weights(&[idle_sick, host(None)], &params(1.0));
        assert_close(&weights, &[0.1 / 1.1, 1.0 / 1.1]);
    }

    #[test]
    fn failures_scale_weights_down() {
        let mut flaky = host(Some(10));
        flaky.failure_ratio = 0.5;
        let weights = compute_weights(&[flaky, host(Some(10))], &params(1.0));
        assert_close(&weights, &[0.5 / 1.5, 1.0 / 1.5]);

        flaky.failure_ratio = 1.0;
        let weights = compute_weights(&[flaky, host(Some(10))], &params(1.0));
        assert_close(&weights, &[0.1 / 1.1, 1.0 / 1.1]);
    }

    #[test]
    fn fleet_average_gives_untested_hosts_the_mean_weight() {
        let weights = compute_weights(&[host(Some(10)), host(None)], &params(2.0));
        assert_close(&weights, &[0.5, 0.5]);
    }

    #[test]
    fn fixed_policy_weighs_untested_hosts_at_the_fixed_latency() {
        let fixed = |millis| WeightParams { no_data: NoDataPolicy::FixedMs(millis), ..params(1.0) };

        // assumed much slower than the measured host: floored
        let weights = compute_weights(&[host(Some(10)), host(None)], &fixed(5_000));
        assert_close(&weights, &[1.0 / 1.1, 0.1 / 1.1]);

        // assumed faster: the untested host becomes the reference
        let weights = compute_weights(&[host(Some(10)), host(None)], &fixed(1));
        assert_close(&weights, &[0.1 / 1.1, 1.0 / 1.1]);

        // assumed twice as slow
        let weights = compute_weights(&[host(Some(10)), host(None)], &fixed(20));
        assert_close(&weights, &[1.0 / 1.5, 0.5 / 1.5]);

        // unhealthy stays at the floor whatever is assumed
        let mut sick = host(None);
        sick.healthy = false;
        let weights = compute_weights(&[host(Some(10)), sick], &fixed(1));
        assert_close(&weights, &[1.0 / 1.1, 0.1 / 1.1]);

        // nobody has data: every host is assumed equal
        let weights = compute_weights(&[host(None), host(None)], &fixed(50));
        assert_close(&weights, &[0.5, 0.5]);
    }

    #[test]
    fn neutral_latency_policies() {
        let metrics = [host(Some(10)), host(Some(30)), host(None)];
        assert_eq!(neutral_latency(&metrics, NoDataPolicy::FleetAverage), Some(Duration::from_millis(20)));
        assert_eq!(neutral_latency(&metrics, NoDataPolicy::FixedMs(100)), Some(Duration::from_millis(100)));
        assert_eq!(neutral_latency(&[host(None)], NoDataPolicy::FleetAverage), None);
    }

    #[test]
    fn neutral_latency_ignores_unhealthy_hosts() {
        let mut sick = host(Some(1_000));
        sick.healthy = false;
        let metrics = [host(Some(10)), host(Some(30)), sick, host(None)];
        assert_eq!(neutral_latency(&metrics, NoDataPolicy::FleetAverage), Some(Duration::from_millis(20)));
        assert_eq!(neutral_latency(&[sick], NoDataPolicy::FleetAverage), None);
    }

    fn arb_host() -> impl Strategy<Value = HostMetrics> {
        (proptest::option::of(0_u64..5_000_000_000), 0.0_f64..=1.0, any::<bool>()).prop_map(
            |(nanos, failure_ratio, healthy)| HostMetrics {
                average: nanos.map(Duration::from_nanos),
                samples: u64::from(nanos.is_some()),
                failure_ratio,
                healthy,
            },
        )
    }

    proptest! {
        #[test]
        fn weights_are_finite_positive_and_normalised(
            metrics in proptest::collection::vec(arb_host(), 1..32),
            sensitivity in 1.0_f64..8.0,
        ) {
            let weights = compute_weights(&metrics, &params(sensitivity));
            prop_assert_eq!(weights.len(), metrics.len());
            prop_assert!(weights.iter().all(|weight| weight.is_finite() && *weight > 0.0));
            let total: f64 = weights.iter().sum();
            prop_assert!((total - 1.0).abs() < 1e-9);
        }

        #[test]
        fn faster_hosts_never_weigh_less(
            fast in 1_u64..1_000_000_000,
            extra in 0_u64..1_000_000_000,
            sensitivity in 1.0_f64..8.0,
        ) {
            let metrics = [
                HostMetrics { average: Some(Duration::from_nanos(fast)), samples: 1, failure_ratio: 0.0, healthy: true },
                HostMetrics { average: Some(Duration::from_nanos(fast + extra)), samples: 1, failure_ratio: 0.0, healthy: true },
            ];
            let weights = compute_weights(&metrics, &params(sensitivity));
            prop_assert!(weights[0] >= weights[1]);
        }
    }
}
