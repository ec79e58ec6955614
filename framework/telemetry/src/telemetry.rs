use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::{format_timestamp, EventType, MetricsSnapshot, TelemetryEvent};

#[derive(Default)]
struct TelemetryInner {
    events: Vec<TelemetryEvent>,
    agent_events: usize,
    snapshot: MetricsSnapshot,
}

#[derive(Default, Clone, Copy)]
struct Clock {
    started: Option<Instant>,
    stopped: Option<Instant>,
}

/// The event log of one run.
///
/// Appending is the only mutation. Each append updates the running [MetricsSnapshot] in constant
/// time so snapshots never rescan the log.
#[derive(Default)]
pub struct Telemetry {
    inner: Mutex<TelemetryInner>,
    clock: Mutex<Clock>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start instant used by [Telemetry::uptime_ms]. Calling again restarts the clock.
    pub fn start(&self) {
        *self.clock.lock() = Clock {
            started: Some(Instant::now()),
            stopped: None,
        };
    }

    /// Freeze uptime at the current instant.
    pub fn stop(&self) {
        let mut clock = self.clock.lock();
        if clock.started.is_some() && clock.stopped.is_none() {
            clock.stopped = Some(Instant::now());
        }
    }

    /// Milliseconds between [Telemetry::start] and now (or [Telemetry::stop]).
    pub fn uptime_ms(&self) -> u64 {
        let clock = *self.clock.lock();
        match clock.started {
            Some(started) => {
                let end = clock.stopped.unwrap_or_else(Instant::now);
                end.saturating_duration_since(started).as_millis() as u64
            }
            None => 0,
        }
    }

    /// Append an event and return it.
    pub fn log(
        &self,
        event_type: EventType,
        at: DateTime<Utc>,
        data: serde_json::Value,
    ) -> TelemetryEvent {
        let mut inner = self.inner.lock();
        let event = TelemetryEvent {
            index: inner.events.len() as u64,
            event_type,
            timestamp: format_timestamp(at),
            data,
        };
        inner.snapshot.apply(&event);
        if event.event_type.is_agent_event() {
            inner.agent_events += 1;
        }
        inner.events.push(event.clone());

        log::trace!("telemetry #{} {}", event.index, event.event_type);
        event
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = self.inner.lock().snapshot.clone();
        snapshot.uptime = self.uptime_ms();
        snapshot
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of events produced by agents, see [EventType::is_agent_event].
    pub fn agent_event_count(&self) -> usize {
        self.inner.lock().agent_events
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.inner.lock().events.clone()
    }

    /// Events with `index >= from`, for incremental observers.
    pub fn events_since(&self, from: u64) -> Vec<TelemetryEvent> {
        let inner = self.inner.lock();
        let start = (from as usize).min(inner.events.len());
        inner.events[start..].to_vec()
    }
}
