use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use simcity_core::prelude::{ShutdownHandle, SimCityResult};
use simcity_harness::{parse_harness_output, ParsedOutcome};
use simcity_replay_model::{load_event_log, FileReplayStore, ReplayEntry};
use simcity_store::{RunRequest, RunStatus, StoreError};

use crate::run_store::RunStore;
use crate::sandbox::{Sandbox, SandboxExit, SandboxLauncher, SandboxSpec};

const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_millis(500);

/// What one poll of the queue did.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Nothing to do.
    Idle,
    /// Another run holds the global run slot.
    Busy { running: i64 },
    /// Someone else claimed the run slot between our check and our write.
    Lost { id: i64 },
    Finished {
        id: i64,
        run_id: String,
        status: RunStatus,
    },
}

/// Runs queued requests one at a time system-wide.
pub struct Scheduler {
    store: Arc<dyn RunStore>,
    launcher: Arc<dyn SandboxLauncher>,
    replays: FileReplayStore,
    target_url: Option<String>,
    wait_interval: Duration,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn RunStore>,
        launcher: Arc<dyn SandboxLauncher>,
        replays: FileReplayStore,
    ) -> Self {
        Self {
            store,
            launcher,
            replays,
            target_url: None,
            wait_interval: DEFAULT_WAIT_INTERVAL,
        }
    }

    pub fn with_target_url(mut self, target_url: Option<String>) -> Self {
        self.target_url = target_url;
        self
    }

    /// How often a running sandbox is checked for exit and for an external stop.
    pub fn with_wait_interval(mut self, wait_interval: Duration) -> Self {
        self.wait_interval = wait_interval;
        self
    }

    /// Poll until `shutdown` is triggered. A run in progress is finished before returning.
    pub fn run(&self, poll_interval: Duration, shutdown: &ShutdownHandle) -> SimCityResult<()> {
        let mut listener = shutdown.new_listener();
        log::info!("Scheduler polling every {}ms", poll_interval.as_millis());

        loop {
            match self.poll_once() {
                Ok(PollOutcome::Idle) => log::trace!("No pending run requests"),
                Ok(outcome) => log::info!("Poll finished: {outcome:?}"),
                Err(e) => log::error!("Scheduler poll failed: {e:?}"),
            }

            if listener.sleep_unless_shutdown(poll_interval) {
                log::info!("Scheduler shutting down");
                return Ok(());
            }
        }
    }

    /// Pick up at most one pending request and run it to completion.
    pub fn poll_once(&self) -> SimCityResult<PollOutcome> {
        if let Some(running) = self.store.running()? {
            log::info!("Run request {} is still running, yielding", running.id);
            return Ok(PollOutcome::Busy {
                running: running.id,
            });
        }

        let Some(request) = self.store.next_pending()? else {
            return Ok(PollOutcome::Idle);
        };

        if !self.store.try_claim(request.id)? {
            log::info!("Lost the run slot while claiming request {}", request.id);
            return Ok(PollOutcome::Lost { id: request.id });
        }
        log::info!(
            "Picked up run request {} (seed {}, tier {}) as run {}",
            request.id,
            request.seed,
            request.tier,
            request.run_id
        );

        let exit = self.launch_and_wait(&request);
        self.finish(&request, exit)
    }

    fn launch_and_wait(&self, request: &RunRequest) -> SimCityResult<SandboxExit> {
        let run_dir = self.replays.ensure_run_dir(&request.run_id)?;
        let stale_log = self.replays.event_log_path(&request.run_id)?;
        if stale_log.exists() {
            std::fs::remove_file(&stale_log)
                .with_context(|| format!("Failed to remove {}", stale_log.display()))?;
        }

        let spec = SandboxSpec::for_request(request, self.target_url.as_deref(), run_dir);
        let mut sandbox = self.launcher.launch(&spec)?;
        self.supervise(sandbox.as_mut())
    }

    /// Wait for the sandbox to exit.
    ///
    /// A request marked STOPPED in the meantime is left to drain, its status is only looked at
    /// once the harness has exited.
    fn supervise(&self, sandbox: &mut dyn Sandbox) -> SimCityResult<SandboxExit> {
        loop {
            if let Some(exit) = sandbox.try_wait()? {
                return Ok(exit);
            }
            std::thread::sleep(self.wait_interval);
        }
    }

    fn finish(
        &self,
        request: &RunRequest,
        exit: SimCityResult<SandboxExit>,
    ) -> SimCityResult<PollOutcome> {
        let finished = |status| PollOutcome::Finished {
            id: request.id,
            run_id: request.run_id.clone(),
            status,
        };

        let current = self
            .store
            .get(request.id)?
            .ok_or(StoreError::NotFound(request.id))?;
        if current.status == RunStatus::Stopped {
            self.store.mark_ended(request.id)?;
            log::info!("Run request {} finalised as STOPPED", request.id);
            return Ok(finished(RunStatus::Stopped));
        }

        let (status, outcome, error) = match exit {
            Err(e) => {
                log::error!("Sandbox for run request {} failed: {e:?}", request.id);
                (RunStatus::Failed, None, Some(format!("{e:#}")))
            }
            Ok(exit) => match parse_harness_output(&exit.stdout, exit.exit_code) {
                Ok(parsed) if parsed.success => (RunStatus::Completed, Some(parsed), None),
                Ok(parsed) => (RunStatus::Failed, Some(parsed), None),
                Err(e) => {
                    log::error!("Run request {}: {e}", request.id);
                    (RunStatus::Failed, None, Some(e.to_string()))
                }
            },
        };

        let encoded = outcome.as_ref().map(serde_json::to_string).transpose()?;
        if !self
            .store
            .finalize(request.id, status, encoded.as_deref(), error.as_deref())?
        {
            // Stopped between the re-read and the write.
            self.store.mark_ended(request.id)?;
            return Ok(finished(RunStatus::Stopped));
        }
        log::info!("Run request {} finalised as {status}", request.id);

        // Infrastructure failures are never evaluated.
        if error.is_some() {
            log::warn!(
                "Run {} ended with an infrastructure failure, no replay recorded",
                request.run_id
            );
        } else if let Err(e) = self.record_replay(request, status, outcome.as_ref()) {
            log::error!("Failed to record replay for run {}: {e:?}", request.run_id);
        }

        Ok(finished(status))
    }

    fn record_replay(
        &self,
        request: &RunRequest,
        status: RunStatus,
        outcome: Option<&ParsedOutcome>,
    ) -> SimCityResult<()> {
        let log_path = self.replays.event_log_path(&request.run_id)?;
        let events = if log_path.exists() {
            load_event_log(&log_path)?
        } else {
            log::warn!("Run {} left no event log", request.run_id);
            Vec::new()
        };

        let report = json!({
            "requestId": request.id,
            "seed": request.seed,
            "tier": request.tier,
            "status": status,
            "outcome": outcome,
        });
        let entry = ReplayEntry::new(request.run_id.clone(), report, events);
        self.replays.save(&entry)?;
        log::info!(
            "Recorded replay for run {} with hash {}",
            entry.run_id,
            entry.report_hash
        );
        Ok(())
    }
}
