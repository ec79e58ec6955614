use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha3::Digest;
use simcity_telemetry::TelemetryEvent;

/// Reserved variant name meaning the baseline evaluated against itself.
pub const BASE_VARIANT: &str = "base";

/// The recorded result of one run, kept for later evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplayEntry {
    pub run_id: String,
    /// The harness outcome as recorded by the scheduler.
    pub report: serde_json::Value,
    /// Content hash of the recorded report and baseline stream, see [ReplayEntry::fingerprint].
    pub report_hash: String,
    pub base_events: Vec<TelemetryEvent>,
    /// Named alternate event streams.
    #[serde(default)]
    pub variants: BTreeMap<String, Vec<TelemetryEvent>>,
    /// Unix timestamp, seconds.
    pub recorded_at: i64,
}

impl ReplayEntry {
    pub fn new(
        run_id: String,
        report: serde_json::Value,
        base_events: Vec<TelemetryEvent>,
    ) -> Self {
        let mut entry = Self {
            run_id,
            report,
            report_hash: String::new(),
            base_events,
            variants: BTreeMap::new(),
            recorded_at: chrono::Utc::now().timestamp(),
        };
        entry.report_hash = entry.fingerprint();
        entry
    }

    /// Hash identifying what was recorded.
    ///
    /// Covers the run id, the report and the baseline event stream, encoded as canonical JSON
    /// (object keys sorted) and hashed with [sha3::Sha3_256]. Variants are not covered: they are
    /// evaluated against the report, keyed by their own name.
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.run_id.as_bytes());
        Digest::update(&mut hasher, stable_hash(&self.report).as_bytes());
        for event in &self.base_events {
            let encoded = serde_json::to_value(event).map(|v| stable_hash(&v));
            Digest::update(&mut hasher, encoded.unwrap_or_default().as_bytes());
        }

        format!("{:x}", hasher.finalize())
    }

    /// Events for a variant, where [BASE_VARIANT] is the baseline.
    pub fn events_for(&self, variant: &str) -> Option<&[TelemetryEvent]> {
        if variant == BASE_VARIANT {
            return Some(&self.base_events);
        }
        self.variants.get(variant).map(Vec::as_slice)
    }

    pub fn variant_names(&self) -> Vec<&str> {
        std::iter::once(BASE_VARIANT)
            .chain(self.variants.keys().map(String::as_str))
            .collect()
    }
}

/// SHA3-256 over the canonical JSON encoding of a value.
///
/// `serde_json` maps are ordered by key, so equal values always encode, and hash, identically.
pub fn stable_hash(value: &serde_json::Value) -> String {
    let encoded = serde_json::to_vec(value).unwrap_or_default();
    format!("{:x}", sha3::Sha3_256::digest(&encoded))
}
