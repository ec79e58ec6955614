use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use simcity_core::prelude::{Seed, Tier};

/// Lifecycle of a run request.
///
/// `PENDING -> RUNNING -> COMPLETED | FAILED | STOPPED`, where STOPPED may also be set on a request
/// that never started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Stopped => "STOPPED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Stopped
        )
    }

    /// Runs that produced a harness outcome worth evaluating.
    pub fn is_evaluable(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RunStatus::Pending),
            "RUNNING" => Ok(RunStatus::Running),
            "COMPLETED" => Ok(RunStatus::Completed),
            "FAILED" => Ok(RunStatus::Failed),
            "STOPPED" => Ok(RunStatus::Stopped),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// What a submitter provides. Budgets left unset fall back to the tier defaults in the harness.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRunRequest {
    pub seed: Seed,
    pub tier: Tier,
    pub concurrency: Option<u32>,
    pub max_events: Option<u64>,
    pub duration_seconds: Option<u64>,
}

impl NewRunRequest {
    pub fn new(seed: Seed, tier: Tier) -> Self {
        Self {
            seed,
            tier,
            concurrency: None,
            max_events: None,
            duration_seconds: None,
        }
    }
}

/// A persisted run request. Times are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub id: i64,
    pub seed: Seed,
    pub tier: Tier,
    pub concurrency: Option<u32>,
    pub max_events: Option<u64>,
    pub duration_seconds: Option<u64>,
    pub status: RunStatus,
    pub run_id: String,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    /// JSON encoding of the parsed harness outcome.
    pub outcome: Option<String>,
    pub error: Option<String>,
}

impl RunRequest {
    /// The harness never reported on the system under test, because the sandbox crashed, could not
    /// be launched or exited with an unexpected code.
    pub fn is_infrastructure_failure(&self) -> bool {
        self.status == RunStatus::Failed && self.error.is_some()
    }
}
