use std::path::{Path, PathBuf};

use anyhow::Context;
use itertools::Itertools;
use simcity_telemetry::TelemetryEvent;

use crate::entry::{ReplayEntry, BASE_VARIANT};

/// Environment variable naming the directory that holds per-run event logs and replay entries.
pub const SIMCITY_RUNS_DIR_ENV: &str = "SIMCITY_RUNS_DIR";

pub const DEFAULT_RUNS_DIR: &str = "simcity-runs";

/// File name of the replay entry inside a run directory.
pub const REPLAY_ENTRY_FILE: &str = "replay.json";

/// File name of the harness event log inside a run directory.
pub const EVENT_LOG_FILE: &str = "events.jsonl";

/// Run ids become directory names, so only a conservative character set is accepted.
pub fn validate_run_id(run_id: &str) -> anyhow::Result<()> {
    let valid = !run_id.is_empty()
        && run_id.len() <= 128
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        anyhow::bail!("Invalid run id: {run_id:?}");
    }
    Ok(())
}

/// Replay entries stored as one directory per run under a common root.
///
/// ```text
/// <root>/<run id>/events.jsonl
/// <root>/<run id>/replay.json
/// ```
#[derive(Debug, Clone)]
pub struct FileReplayStore {
    root: PathBuf,
}

impl FileReplayStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// A store rooted at [SIMCITY_RUNS_DIR_ENV], or [DEFAULT_RUNS_DIR].
    pub fn from_env() -> Self {
        Self::new(
            std::env::var(SIMCITY_RUNS_DIR_ENV).unwrap_or_else(|_| DEFAULT_RUNS_DIR.to_string()),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &str) -> anyhow::Result<PathBuf> {
        validate_run_id(run_id)?;
        Ok(self.root.join(run_id))
    }

    /// Create, if needed, and return the run directory.
    pub fn ensure_run_dir(&self, run_id: &str) -> anyhow::Result<PathBuf> {
        let dir = self.run_dir(run_id)?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create run directory {}", dir.display()))?;
        Ok(dir)
    }

    pub fn event_log_path(&self, run_id: &str) -> anyhow::Result<PathBuf> {
        Ok(self.run_dir(run_id)?.join(EVENT_LOG_FILE))
    }

    pub fn save(&self, entry: &ReplayEntry) -> anyhow::Result<()> {
        let dir = self.ensure_run_dir(&entry.run_id)?;
        let path = dir.join(REPLAY_ENTRY_FILE);
        let tmp = dir.join(format!("{REPLAY_ENTRY_FILE}.tmp"));

        let encoded = serde_json::to_vec_pretty(entry)?;
        std::fs::write(&tmp, encoded)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        log::debug!("Saved replay entry for run {} to {}", entry.run_id, path.display());
        Ok(())
    }

    pub fn load(&self, run_id: &str) -> anyhow::Result<Option<ReplayEntry>> {
        let path = self.run_dir(run_id)?.join(REPLAY_ENTRY_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let entry = serde_json::from_slice(&content)
            .with_context(|| format!("Invalid replay entry {}", path.display()))?;
        Ok(Some(entry))
    }

    /// Attach a named alternate event stream to an existing entry, replacing any stream already
    /// stored under that name.
    pub fn add_variant(
        &self,
        run_id: &str,
        variant: &str,
        events: Vec<TelemetryEvent>,
    ) -> anyhow::Result<ReplayEntry> {
        let variant = variant.trim();
        if variant.is_empty() {
            anyhow::bail!("Variant name must not be empty");
        }
        if variant == BASE_VARIANT {
            anyhow::bail!("Variant name '{BASE_VARIANT}' is reserved for the baseline");
        }

        let mut entry = self
            .load(run_id)?
            .with_context(|| format!("No replay entry for run {run_id}"))?;
        entry.variants.insert(variant.to_string(), events);
        self.save(&entry)?;

        Ok(entry)
    }

    /// Run ids with a stored replay entry, sorted.
    pub fn list(&self) -> anyhow::Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut run_ids = Vec::new();
        for dir_entry in std::fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            if dir_entry.path().join(REPLAY_ENTRY_FILE).is_file() {
                if let Some(name) = dir_entry.file_name().to_str() {
                    run_ids.push(name.to_string());
                }
            }
        }

        Ok(run_ids.into_iter().sorted().collect())
    }
}
