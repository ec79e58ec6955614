use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use simcity_replay_model::{
    stable_hash, validate_run_id, FileReplayStore, ReplayEntry, BASE_VARIANT,
};
use simcity_store::{RunRequest, RunStatus, SqliteStore};

use crate::dials::{default_dials, DialSet};
use crate::evaluate::{evaluate_replay_variant, ReplayEvaluation, ReplayVariantInput};

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Unknown run: {0}")]
    UnknownRun(String),
    #[error("Run {run_id} has not completed, status is {status}")]
    RunNotCompleted { run_id: String, status: String },
    #[error("Run {run_id} failed before the harness reported: {error}")]
    InfrastructureFailure { run_id: String, error: String },
    #[error("Run {run_id} has no variant named \"{variant}\"")]
    UnknownVariant { run_id: String, variant: String },
    #[error("Invalid run id: {0}")]
    InvalidRunId(String),
    #[error("Failed to read replay data: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl EvaluationError {
    /// HTTP status this error is reported with.
    pub fn status_code(&self) -> u16 {
        match self {
            EvaluationError::UnknownRun(_) => 404,
            EvaluationError::RunNotCompleted { .. }
            | EvaluationError::InfrastructureFailure { .. }
            | EvaluationError::UnknownVariant { .. }
            | EvaluationError::InvalidRunId(_) => 400,
            EvaluationError::Storage(_) => 500,
        }
    }
}

/// Where the request behind a run can be looked up, for runs that have no replay entry.
pub trait RunLookup: Send + Sync {
    fn find_run(&self, run_id: &str) -> anyhow::Result<Option<RunRequest>>;
}

impl RunLookup for SqliteStore {
    fn find_run(&self, run_id: &str) -> anyhow::Result<Option<RunRequest>> {
        Ok(self.find_by_run_id(run_id)?)
    }
}

/// `(reportHash, variantId, hash of the variant's events)`
type CacheKey = (String, String, String);

/// Scores recorded runs, caching each result.
pub struct Evaluator {
    replays: FileReplayStore,
    runs: Option<Arc<dyn RunLookup>>,
    dials: DialSet,
    cache: Mutex<HashMap<CacheKey, ReplayEvaluation>>,
}

impl Evaluator {
    pub fn new(replays: FileReplayStore) -> Self {
        Self {
            replays,
            runs: None,
            dials: default_dials(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_runs(mut self, runs: Arc<dyn RunLookup>) -> Self {
        self.runs = Some(runs);
        self
    }

    pub fn with_dials(mut self, dials: DialSet) -> Self {
        self.dials = dials;
        self
    }

    pub fn replays(&self) -> &FileReplayStore {
        &self.replays
    }

    /// Evaluate `variant` of a recorded run, [BASE_VARIANT] when not given.
    pub fn evaluate(
        &self,
        run_id: &str,
        variant: Option<&str>,
    ) -> Result<ReplayEvaluation, EvaluationError> {
        let variant = variant.unwrap_or(BASE_VARIANT);
        validate_run_id(run_id).map_err(|_| EvaluationError::InvalidRunId(run_id.to_string()))?;

        let Some(entry) = self.replays.load(run_id)? else {
            return Err(self.missing_entry(run_id));
        };
        ensure_evaluable(&entry)?;

        let events = entry
            .events_for(variant)
            .ok_or_else(|| EvaluationError::UnknownVariant {
                run_id: run_id.to_string(),
                variant: variant.to_string(),
            })?;

        let key = (
            entry.report_hash.clone(),
            variant.to_string(),
            stable_hash(&serde_json::to_value(events).map_err(anyhow::Error::from)?),
        );
        if let Some(cached) = self.cache.lock().get(&key) {
            log::debug!("Using cached evaluation for {run_id}/{variant}");
            return Ok(cached.clone());
        }

        let evaluation = evaluate_replay_variant(ReplayVariantInput {
            report_hash: &entry.report_hash,
            base_events: &entry.base_events,
            variant_events: events,
            dials: &self.dials,
            variant_id: variant,
        });
        log::info!(
            "Evaluated {run_id}/{variant}: passed={} failed={:?}",
            evaluation.evaluation.passed,
            evaluation.evaluation.failed_dials
        );

        self.cache.lock().insert(key, evaluation.clone());
        Ok(evaluation)
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    fn missing_entry(&self, run_id: &str) -> EvaluationError {
        let Some(runs) = &self.runs else {
            return EvaluationError::UnknownRun(run_id.to_string());
        };

        match runs.find_run(run_id) {
            Ok(None) => EvaluationError::UnknownRun(run_id.to_string()),
            Ok(Some(request)) if request.is_infrastructure_failure() => {
                EvaluationError::InfrastructureFailure {
                    run_id: run_id.to_string(),
                    error: request.error.unwrap_or_default(),
                }
            }
            Ok(Some(request)) if !request.status.is_evaluable() => {
                EvaluationError::RunNotCompleted {
                    run_id: run_id.to_string(),
                    status: request.status.to_string(),
                }
            }
            Ok(Some(request)) => EvaluationError::Storage(anyhow::anyhow!(
                "Run {run_id} is {} but has no replay entry",
                request.status
            )),
            Err(e) => EvaluationError::Storage(e),
        }
    }
}

/// Entries carry the status the scheduler recorded them with. Entries without one were imported
/// by hand and are taken as complete.
fn ensure_evaluable(entry: &ReplayEntry) -> Result<(), EvaluationError> {
    if let Some(error) = entry.report.get("error").and_then(|e| e.as_str()) {
        return Err(EvaluationError::InfrastructureFailure {
            run_id: entry.run_id.clone(),
            error: error.to_string(),
        });
    }

    let Some(status) = entry.report.get("status").and_then(|s| s.as_str()) else {
        return Ok(());
    };

    match RunStatus::from_str(status) {
        Ok(parsed) if parsed.is_evaluable() => Ok(()),
        _ => Err(EvaluationError::RunNotCompleted {
            run_id: entry.run_id.clone(),
            status: status.to_string(),
        }),
    }
}
