use serde::{Deserialize, Serialize};

use crate::metrics::Metrics;

pub const DEFAULT_DIALS_VERSION: &str = "dials-v1";

/// How a dial compares a metric with its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DialKind {
    /// The variant's metric must not exceed the threshold.
    AtMost,
    /// The variant's metric must reach at least the threshold.
    AtLeast,
    /// `variant - base` for the metric must not exceed the threshold.
    DeltaAtMost,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dial {
    pub id: String,
    pub metric: String,
    pub kind: DialKind,
    pub threshold: f64,
}

impl Dial {
    pub fn new(id: &str, metric: &str, kind: DialKind, threshold: f64) -> Self {
        Self {
            id: id.to_string(),
            metric: metric.to_string(),
            kind,
            threshold,
        }
    }

    /// Score the dial against a variant.
    ///
    /// `deltas` is `None` when the baseline is evaluated against itself, in which case delta dials
    /// see a zero difference and pass.
    pub fn evaluate(&self, metrics: &Metrics, deltas: Option<&Metrics>) -> DialStatus {
        let value = match self.kind {
            DialKind::AtMost | DialKind::AtLeast => metrics.get(&self.metric).copied(),
            DialKind::DeltaAtMost => match deltas {
                Some(deltas) => deltas.get(&self.metric).copied(),
                None => Some(0.0),
            },
        };

        let passed = match (self.kind, value) {
            (_, None) => false,
            (DialKind::AtLeast, Some(value)) => value >= self.threshold,
            (DialKind::AtMost | DialKind::DeltaAtMost, Some(value)) => value <= self.threshold,
        };

        DialStatus {
            id: self.id.clone(),
            metric: self.metric.clone(),
            kind: self.kind,
            threshold: self.threshold,
            value,
            passed,
        }
    }
}

/// Outcome of one dial for one variant. A missing metric fails the dial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialStatus {
    pub id: String,
    pub metric: String,
    pub kind: DialKind,
    pub threshold: f64,
    pub value: Option<f64>,
    pub passed: bool,
}

/// A fixed, versioned set of dials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialSet {
    pub version: String,
    pub dials: Vec<Dial>,
}

impl DialSet {
    pub fn evaluate(&self, metrics: &Metrics, deltas: Option<&Metrics>) -> Vec<DialStatus> {
        self.dials
            .iter()
            .map(|dial| dial.evaluate(metrics, deltas))
            .collect()
    }
}

pub fn default_dials() -> DialSet {
    DialSet {
        version: DEFAULT_DIALS_VERSION.to_string(),
        dials: vec![
            Dial::new("max-error-rate", "errorRate", DialKind::AtMost, 0.05),
            Dial::new(
                "max-invariant-violations",
                "invariantViolations",
                DialKind::AtMost,
                0.0,
            ),
            Dial::new(
                "max-latency-p95-delta-ms",
                "latencyP95Ms",
                DialKind::DeltaAtMost,
                250.0,
            ),
            Dial::new("max-cancel-rate", "cancelRate", DialKind::AtMost, 0.5),
            Dial::new(
                "min-bookings-created",
                "bookingsCreated",
                DialKind::AtLeast,
                1.0,
            ),
        ],
    }
}
