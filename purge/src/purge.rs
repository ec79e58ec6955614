use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use simcity_core::prelude::DeployEnvironment;
use simcity_safety::SYNTHETIC_SOURCE;
use simcity_store::SHARED_TABLES;

use crate::auth::{Credentials, PurgeAuth};
use crate::rows::SyntheticRowStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeRequest {
    #[serde(default)]
    pub dry_run: Option<bool>,
}

impl PurgeRequest {
    /// Purges are dry runs unless explicitly asked not to be.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run.unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableResult {
    /// Rows matched in a dry run, rows deleted otherwise.
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeReport {
    pub dry_run: bool,
    pub tables: BTreeMap<String, TableResult>,
    pub total: u64,
    pub errors: Vec<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PurgeError {
    #[error("Synthetic data purge is disabled in the {0} environment")]
    Environment(String),
    #[error("Unauthorized: an internal or administrator token is required")]
    Unauthorized,
}

impl PurgeError {
    pub fn status_code(&self) -> u16 {
        match self {
            PurgeError::Environment(_) => 403,
            PurgeError::Unauthorized => 401,
        }
    }
}

/// Count or delete synthetic rows in each table.
///
/// A failing table is recorded in the report and does not stop the others.
pub fn purge_synthetic<I, S>(rows: &dyn SyntheticRowStore, tables: I, dry_run: bool) -> PurgeReport
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut report = PurgeReport {
        dry_run,
        tables: BTreeMap::new(),
        total: 0,
        errors: Vec::new(),
    };

    for table in tables {
        let table = table.as_ref();
        let result = if dry_run {
            rows.count_synthetic(table, SYNTHETIC_SOURCE)
        } else {
            rows.delete_synthetic(table, SYNTHETIC_SOURCE)
        };

        let entry = match result {
            Ok(count) => {
                report.total += count;
                TableResult { count, error: None }
            }
            Err(e) => {
                let message = format!("{table}: {e:#}");
                log::warn!("Failed to purge synthetic rows from {message}");
                report.errors.push(message);
                TableResult {
                    count: 0,
                    error: Some(format!("{e:#}")),
                }
            }
        };
        report.tables.insert(table.to_string(), entry);
    }

    report
}

/// Gatekeeper in front of [purge_synthetic].
pub struct Purger {
    rows: Arc<dyn SyntheticRowStore>,
    auth: PurgeAuth,
    environment: DeployEnvironment,
    tables: Vec<String>,
}

impl Purger {
    pub fn new(
        rows: Arc<dyn SyntheticRowStore>,
        auth: PurgeAuth,
        environment: DeployEnvironment,
    ) -> Self {
        Self {
            rows,
            auth,
            environment,
            tables: SHARED_TABLES.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn with_tables(mut self, tables: Vec<String>) -> Self {
        self.tables = tables;
        self
    }

    /// Refuse in production, before anything about the request is looked at.
    pub fn check_environment(&self) -> Result<(), PurgeError> {
        if self.environment.is_production() {
            log::warn!("Rejected synthetic data purge in {}", self.environment);
            return Err(PurgeError::Environment(self.environment.to_string()));
        }
        Ok(())
    }

    /// The environment is checked before the caller, so production always answers with the
    /// environment reason whoever is asking.
    pub fn purge(
        &self,
        credentials: &Credentials,
        request: &PurgeRequest,
    ) -> Result<PurgeReport, PurgeError> {
        self.check_environment()?;

        let caller = self
            .auth
            .authenticate(credentials)
            .ok_or(PurgeError::Unauthorized)?;

        let dry_run = request.is_dry_run();
        log::info!("Synthetic data purge requested by {caller:?}, dry run: {dry_run}");
        let report = purge_synthetic(self.rows.as_ref(), &self.tables, dry_run);
        log::info!(
            "Synthetic data purge {} {} rows with {} errors",
            if dry_run { "matched" } else { "deleted" },
            report.total,
            report.errors.len()
        );

        Ok(report)
    }
}
