use std::collections::BTreeMap;

use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::{EventType, MetricsSnapshot, TelemetryEvent};

#[derive(Tabled)]
struct EventCountRow {
    event: String,
    count: usize,
}

#[derive(Tabled)]
struct MetricRow {
    metric: &'static str,
    value: String,
}

pub fn event_counts(events: &[TelemetryEvent]) -> BTreeMap<EventType, usize> {
    events.iter().fold(BTreeMap::new(), |mut acc, event| {
        *acc.entry(event.event_type).or_insert(0) += 1;
        acc
    })
}

/// Human readable summary of a run: event counts followed by the final snapshot.
pub fn summary_table(events: &[TelemetryEvent], snapshot: &MetricsSnapshot) -> String {
    let rows = event_counts(events)
        .into_iter()
        .map(|(event_type, count)| EventCountRow {
            event: event_type.to_string(),
            count,
        })
        .collect::<Vec<_>>();

    let mut counts = Table::new(rows);
    counts.with(Style::modern());

    let metrics = vec![
        MetricRow {
            metric: "bookingsCreated",
            value: snapshot.bookings_created.to_string(),
        },
        MetricRow {
            metric: "reschedules",
            value: snapshot.reschedules.to_string(),
        },
        MetricRow {
            metric: "cancels",
            value: snapshot.cancels.to_string(),
        },
        MetricRow {
            metric: "totalAgentsSpawned",
            value: snapshot.total_agents_spawned.to_string(),
        },
        MetricRow {
            metric: "activeAgents",
            value: snapshot.active_agents.to_string(),
        },
        MetricRow {
            metric: "revenue",
            value: format!("{:.2}", snapshot.revenue),
        },
        MetricRow {
            metric: "uptime",
            value: format!("{}ms", snapshot.uptime),
        },
    ];
    let mut metrics = Table::new(metrics);
    metrics.with(Style::modern());

    format!("{counts}\n{metrics}")
}
