use std::collections::BTreeMap;

use itertools::Itertools;
use simcity_telemetry::{EventType, TelemetryEvent};

/// Named metric values, ordered by name.
pub type Metrics = BTreeMap<String, f64>;

/// Reduce an event stream to its metrics.
///
/// Pure and deterministic: the same events always produce the same map, with every metric present
/// even when it is zero.
pub fn compute_metrics_from_events(events: &[TelemetryEvent]) -> Metrics {
    let mut spawned = 0u64;
    let mut retired = 0u64;
    let mut bookings = 0u64;
    let mut reschedules = 0u64;
    let mut cancels = 0u64;
    let mut failed = 0u64;
    let mut actions = 0u64;
    let mut violations = 0u64;
    let mut revenue = 0.0;
    let mut latencies = Vec::new();

    for event in events {
        if event.event_type.is_action() {
            actions += 1;
        }
        if let Some(latency) = event.data_f64("latencyMs") {
            latencies.push(latency);
        }

        match event.event_type {
            EventType::AgentSpawn => spawned += 1,
            EventType::AgentRetire => retired += 1,
            EventType::BookingCreated => {
                bookings += 1;
                revenue += event.data_f64("fee").unwrap_or_default();
            }
            EventType::Reschedule => reschedules += 1,
            EventType::Cancel => cancels += 1,
            EventType::ActionFailed => failed += 1,
            EventType::InvariantViolation => violations += 1,
            _ => {}
        }
    }

    let mut metrics = Metrics::new();
    let mut set = |name: &str, value: f64| {
        metrics.insert(name.to_string(), value);
    };

    set("bookingsCreated", bookings as f64);
    set("reschedules", reschedules as f64);
    set("cancels", cancels as f64);
    set("totalAgentsSpawned", spawned as f64);
    set("activeAgents", spawned.saturating_sub(retired) as f64);
    set("errorCount", failed as f64);
    set("errorRate", ratio(failed, actions));
    set("cancelRate", ratio(cancels, bookings));
    set("rescheduleRate", ratio(reschedules, bookings));
    set("latencyP95Ms", percentile(&latencies, 0.95));
    set("invariantViolations", violations as f64);
    set("revenue", revenue);

    metrics
}

/// Signed per-metric difference, `variant - base`, over the union of both key sets.
///
/// A metric missing from one side counts as zero on that side.
pub fn compute_metric_deltas(base: &Metrics, variant: &Metrics) -> Metrics {
    base.keys()
        .chain(variant.keys())
        .unique()
        .map(|name| {
            let delta = variant.get(name).copied().unwrap_or_default()
                - base.get(name).copied().unwrap_or_default();
            (name.clone(), delta)
        })
        .collect()
}

/// Nearest-rank percentile, `q` in `[0, 1]`. Zero for an empty sample.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let sorted = values
        .iter()
        .copied()
        .sorted_by(|a, b| a.total_cmp(b))
        .collect::<Vec<_>>();
    let rank = (q.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
