use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use simcity_core::prelude::SimCityResult;
use simcity_replay_model::{DEFAULT_RUNS_DIR, SIMCITY_RUNS_DIR_ENV};
use simcity_store::{DEFAULT_DB_PATH, SIMCITY_DB_PATH_ENV};

pub const SIMCITY_SANDBOX_ENV: &str = "SIMCITY_SANDBOX";
pub const SIMCITY_SANDBOX_IMAGE_ENV: &str = "SIMCITY_SANDBOX_IMAGE";
pub const SIMCITY_TARGET_URL_ENV: &str = "SIMCITY_TARGET_URL";
pub const SIMCITY_POLL_INTERVAL_MS_ENV: &str = "SIMCITY_POLL_INTERVAL_MS";
/// Harness binary run by the process sandbox, see [crate::ProcessLauncher::locate].
pub const SIMCITY_HARNESS_PATH_ENV: &str = "SIMCITY_HARNESS_PATH";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_SANDBOX_IMAGE: &str = "simcity-harness:latest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SandboxKind {
    #[default]
    Docker,
    Process,
}

impl FromStr for SandboxKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "docker" => Ok(SandboxKind::Docker),
            "process" => Ok(SandboxKind::Process),
            other => anyhow::bail!("Unknown sandbox '{other}', expected docker or process"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub db_path: PathBuf,
    pub runs_dir: PathBuf,
    pub poll_interval: Duration,
    pub sandbox: SandboxKind,
    pub image: String,
    pub target_url: Option<String>,
    pub harness_path: Option<PathBuf>,
}

impl SchedulerConfig {
    pub fn from_env() -> SimCityResult<Self> {
        Self::resolve(|name| std::env::var(name).ok())
    }

    pub fn resolve(env: impl Fn(&str) -> Option<String>) -> SimCityResult<Self> {
        let non_empty = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let poll_interval = match non_empty(SIMCITY_POLL_INTERVAL_MS_ENV) {
            Some(raw) => Duration::from_millis(raw.trim().parse().with_context(|| {
                format!("Invalid {SIMCITY_POLL_INTERVAL_MS_ENV}={raw}, expected milliseconds")
            })?),
            None => DEFAULT_POLL_INTERVAL,
        };

        Ok(Self {
            db_path: non_empty(SIMCITY_DB_PATH_ENV)
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string())
                .into(),
            runs_dir: non_empty(SIMCITY_RUNS_DIR_ENV)
                .unwrap_or_else(|| DEFAULT_RUNS_DIR.to_string())
                .into(),
            poll_interval,
            sandbox: non_empty(SIMCITY_SANDBOX_ENV)
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or_default(),
            image: non_empty(SIMCITY_SANDBOX_IMAGE_ENV)
                .unwrap_or_else(|| DEFAULT_SANDBOX_IMAGE.to_string()),
            target_url: non_empty(SIMCITY_TARGET_URL_ENV),
            harness_path: non_empty(SIMCITY_HARNESS_PATH_ENV).map(PathBuf::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn defaults_apply_when_unset() {
        let config = SchedulerConfig::resolve(|_| None).unwrap();
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.sandbox, SandboxKind::Docker);
        assert_eq!(config.db_path, PathBuf::from("simcity.db"));
        assert_eq!(config.runs_dir, PathBuf::from("simcity-runs"));
        assert_eq!(config.target_url, None);
        assert_eq!(config.harness_path, None);
    }

    #[test]
    fn environment_overrides() {
        let env: HashMap<&str, &str> = [
            (SIMCITY_POLL_INTERVAL_MS_ENV, "250"),
            (SIMCITY_SANDBOX_ENV, "Process"),
            (SIMCITY_TARGET_URL_ENV, "http://localhost:3000"),
            (SIMCITY_HARNESS_PATH_ENV, "/opt/simcity/bin/simcity-harness"),
        ]
        .into_iter()
        .collect();
        let config = SchedulerConfig::resolve(|name| env.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.sandbox, SandboxKind::Process);
        assert_eq!(config.target_url.as_deref(), Some("http://localhost:3000"));
        assert_eq!(
            config.harness_path,
            Some(PathBuf::from("/opt/simcity/bin/simcity-harness"))
        );

        assert!(SchedulerConfig::resolve(|name| {
            (name == SIMCITY_SANDBOX_ENV).then(|| "vm".to_string())
        })
        .is_err());
    }
}
