use serde::{Deserialize, Serialize};
use simcity_replay_model::BASE_VARIANT;
use simcity_telemetry::TelemetryEvent;

use crate::dials::{DialSet, DialStatus};
use crate::metrics::{compute_metric_deltas, compute_metrics_from_events, Metrics};

/// Everything needed to score one variant of a recorded run.
#[derive(Debug, Clone, Copy)]
pub struct ReplayVariantInput<'a> {
    pub report_hash: &'a str,
    pub base_events: &'a [TelemetryEvent],
    /// Ignored when `variant_id` is [BASE_VARIANT].
    pub variant_events: &'a [TelemetryEvent],
    pub dials: &'a DialSet,
    pub variant_id: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayEvaluation {
    pub report_hash: String,
    pub variant: String,
    pub metrics: Metrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deltas: Option<Metrics>,
    pub dial_statuses: Vec<DialStatus>,
    pub evaluation: Verdict,
}

/// Overall verdict, passing only when every dial passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub passed: bool,
    pub dials_version: String,
    pub failed_dials: Vec<String>,
}

pub fn evaluate_replay_variant(input: ReplayVariantInput<'_>) -> ReplayEvaluation {
    let base_metrics = compute_metrics_from_events(input.base_events);

    let (metrics, deltas) = if input.variant_id == BASE_VARIANT {
        (base_metrics, None)
    } else {
        let metrics = compute_metrics_from_events(input.variant_events);
        let deltas = compute_metric_deltas(&base_metrics, &metrics);
        (metrics, Some(deltas))
    };

    let dial_statuses = input.dials.evaluate(&metrics, deltas.as_ref());
    let failed_dials = dial_statuses
        .iter()
        .filter(|status| !status.passed)
        .map(|status| status.id.clone())
        .collect::<Vec<_>>();

    ReplayEvaluation {
        report_hash: input.report_hash.to_string(),
        variant: input.variant_id.to_string(),
        metrics,
        deltas,
        dial_statuses,
        evaluation: Verdict {
            passed: failed_dials.is_empty(),
            dials_version: input.dials.version.clone(),
            failed_dials,
        },
    }
}
