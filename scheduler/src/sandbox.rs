use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;

use anyhow::Context;
use simcity_core::prelude::{SimCityResult, DEPLOY_ENV_ENV, SIMCITY_ALLOWED_ENVS_ENV};
use simcity_harness::{
    TierDefaults, SIMCITY_CHAOS_REORDER_RATE_ENV, SIMCITY_CHAOS_RESTART_RATE_ENV,
    SIMCITY_CHAOS_RETRY_RATE_ENV,
};
use simcity_replay_model::EVENT_LOG_FILE;
use simcity_safety::{
    SIMCITY_ALLOWED_TARGET_HOSTS_ENV, SIMCITY_HMAC_SECRET_ENV, SIMCITY_REQUIRE_SIGNATURE_ENV,
};
use simcity_store::RunRequest;

use crate::config::{SchedulerConfig, SIMCITY_HARNESS_PATH_ENV};

/// Name of the harness binary, on the host and inside the docker image.
pub const HARNESS_BIN: &str = "simcity-harness";

/// Scheduler environment forwarded into every sandbox when set.
pub const PASSTHROUGH_ENV: [&str; 6] = [
    DEPLOY_ENV_ENV,
    SIMCITY_ALLOWED_ENVS_ENV,
    SIMCITY_HMAC_SECRET_ENV,
    SIMCITY_REQUIRE_SIGNATURE_ENV,
    SIMCITY_ALLOWED_TARGET_HOSTS_ENV,
    "RUST_LOG",
];

/// Where the run directory is mounted inside a docker sandbox.
const DOCKER_WORK_DIR: &str = "/work";

/// Name under which the sandbox for a request can be found, and killed, out of band.
pub fn sandbox_name(request_id: i64) -> String {
    format!("simcity-run-{request_id}")
}

/// How to run the harness for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSpec {
    pub name: String,
    pub run_id: String,
    /// Directory on the scheduler's host that receives the run's event log.
    pub run_dir: PathBuf,
    /// Harness arguments, except for `--out` which each launcher adds for its own file layout.
    pub harness_args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl SandboxSpec {
    pub fn for_request(request: &RunRequest, target_url: Option<&str>, run_dir: PathBuf) -> Self {
        Self::with_env(request, target_url, run_dir, |name| std::env::var(name).ok())
    }

    pub fn with_env(
        request: &RunRequest,
        target_url: Option<&str>,
        run_dir: PathBuf,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let chaos = TierDefaults::for_tier(request.tier).chaos;

        let mut args = vec![
            "--seed".to_string(),
            request.seed.to_string(),
            "--tier".to_string(),
            request.tier.to_string(),
        ];
        if let Some(duration) = request.duration_seconds {
            args.extend(["--duration".to_string(), duration.to_string()]);
        }
        if let Some(max_events) = request.max_events {
            args.extend(["--max-events".to_string(), max_events.to_string()]);
        }
        if let Some(concurrency) = request.concurrency {
            args.extend(["--concurrency".to_string(), concurrency.to_string()]);
        }
        if let Some(url) = target_url {
            args.extend(["--target-url".to_string(), url.to_string()]);
        }
        args.extend([
            "--retry-rate".to_string(),
            chaos.retry_rate.to_string(),
            "--restart-rate".to_string(),
            chaos.restart_rate.to_string(),
            "--reorder-rate".to_string(),
            chaos.reorder_rate.to_string(),
            "--no-progress".to_string(),
        ]);

        let mut vars = vec![
            (SIMCITY_CHAOS_RETRY_RATE_ENV.to_string(), chaos.retry_rate.to_string()),
            (SIMCITY_CHAOS_RESTART_RATE_ENV.to_string(), chaos.restart_rate.to_string()),
            (SIMCITY_CHAOS_REORDER_RATE_ENV.to_string(), chaos.reorder_rate.to_string()),
        ];
        for name in PASSTHROUGH_ENV {
            if let Some(value) = env(name) {
                vars.push((name.to_string(), value));
            }
        }

        Self {
            name: sandbox_name(request.id),
            run_id: request.run_id.clone(),
            run_dir,
            harness_args: args,
            env: vars,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SandboxExit {
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
}

/// A running harness.
pub trait Sandbox: Send {
    fn name(&self) -> &str;

    /// The exit of the harness, or `None` while it is still running.
    fn try_wait(&mut self) -> SimCityResult<Option<SandboxExit>>;

    fn kill(&mut self) -> SimCityResult<()>;
}

/// Starts harness runs in an isolated environment.
pub trait SandboxLauncher: Send + Sync {
    fn launch(&self, spec: &SandboxSpec) -> SimCityResult<Box<dyn Sandbox>>;
}

/// Runs the harness binary as a child process of the scheduler, inside the run directory.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    harness: PathBuf,
}

impl ProcessLauncher {
    pub fn new(harness: PathBuf) -> Self {
        Self { harness }
    }

    /// Locate the harness from the scheduler's configuration, its own install directory and the
    /// `PATH` of its environment.
    pub fn from_config(config: &SchedulerConfig) -> SimCityResult<Self> {
        let own_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        Self::locate(
            config.harness_path.as_deref(),
            own_dir.as_deref(),
            std::env::var_os("PATH"),
        )
    }

    /// Find the harness binary.
    ///
    /// A `configured` path is used as is and must be a file. Otherwise a [HARNESS_BIN] next to
    /// the scheduler, in `install_dir`, wins over one on `search_path`, so that a scheduler never
    /// drives a harness from a different build.
    pub fn locate(
        configured: Option<&Path>,
        install_dir: Option<&Path>,
        search_path: Option<OsString>,
    ) -> SimCityResult<Self> {
        if let Some(path) = configured {
            if !path.is_file() {
                anyhow::bail!(
                    "{SIMCITY_HARNESS_PATH_ENV}={} does not point to a file",
                    path.display()
                );
            }
            log::info!("Using harness {} from {SIMCITY_HARNESS_PATH_ENV}", path.display());
            return Ok(Self::new(path.to_path_buf()));
        }

        if let Some(dir) = install_dir {
            if let Ok(harness) = which::which_in(HARNESS_BIN, Some(dir), dir) {
                log::info!("Using harness {} installed with the scheduler", harness.display());
                return Ok(Self::new(harness));
            }
        }

        let cwd = std::env::current_dir().context("Failed to read the working directory")?;
        let harness = which::which_in(HARNESS_BIN, search_path, cwd).with_context(|| {
            format!("{HARNESS_BIN} not found in PATH, install it or set {SIMCITY_HARNESS_PATH_ENV}")
        })?;
        log::info!("Using harness {} from PATH", harness.display());
        Ok(Self::new(harness))
    }

    pub fn harness(&self) -> &Path {
        &self.harness
    }
}

impl SandboxLauncher for ProcessLauncher {
    fn launch(&self, spec: &SandboxSpec) -> SimCityResult<Box<dyn Sandbox>> {
        let mut command = Command::new(&self.harness);
        command
            .args(&spec.harness_args)
            .arg("--out")
            .arg(spec.run_dir.join(EVENT_LOG_FILE))
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&spec.run_dir);

        log::info!("Starting harness process {}", spec.name);
        let sandbox = ChildSandbox::spawn(spec.name.clone(), command, None)
            .with_context(|| format!("Failed to start {}", self.harness.display()))?;
        Ok(Box::new(sandbox))
    }
}

/// Runs the harness in a throwaway docker container with the run directory mounted.
#[derive(Debug, Clone)]
pub struct DockerLauncher {
    docker: PathBuf,
    image: String,
}

impl DockerLauncher {
    pub fn new(image: impl Into<String>) -> SimCityResult<Self> {
        let docker = which::which("docker").context("docker not found in PATH")?;
        Ok(Self::with_docker(docker, image))
    }

    pub fn with_docker(docker: PathBuf, image: impl Into<String>) -> Self {
        Self {
            docker,
            image: image.into(),
        }
    }

    /// Arguments passed to `docker`.
    pub fn docker_args(&self, spec: &SandboxSpec, host_run_dir: &Path) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "-v".to_string(),
            format!("{}:{DOCKER_WORK_DIR}", host_run_dir.display()),
        ];
        for (name, value) in &spec.env {
            args.extend(["-e".to_string(), format!("{name}={value}")]);
        }
        args.push(self.image.clone());
        args.push(HARNESS_BIN.to_string());
        args.extend(spec.harness_args.iter().cloned());
        args.extend([
            "--out".to_string(),
            format!("{DOCKER_WORK_DIR}/{EVENT_LOG_FILE}"),
        ]);
        args
    }
}

impl SandboxLauncher for DockerLauncher {
    fn launch(&self, spec: &SandboxSpec) -> SimCityResult<Box<dyn Sandbox>> {
        let host_run_dir = std::fs::canonicalize(&spec.run_dir)
            .with_context(|| format!("Run directory {} is missing", spec.run_dir.display()))?;

        let mut command = Command::new(&self.docker);
        command.args(self.docker_args(spec, &host_run_dir));

        log::info!("Starting docker sandbox {} from {}", spec.name, self.image);
        let sandbox = ChildSandbox::spawn(spec.name.clone(), command, Some(self.docker.clone()))
            .context("Failed to run 'docker run'")?;
        Ok(Box::new(sandbox))
    }
}

/// A child process whose stdout is collected in the background.
struct ChildSandbox {
    name: String,
    child: Child,
    stdout: Option<JoinHandle<String>>,
    /// Set for docker sandboxes, which are killed by name.
    docker: Option<PathBuf>,
    exited: bool,
}

impl ChildSandbox {
    fn spawn(name: String, mut command: Command, docker: Option<PathBuf>) -> SimCityResult<Self> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let mut pipe = child
            .stdout
            .take()
            .context("Failed to get stdout for the sandbox process")?;
        let stdout = std::thread::Builder::new()
            .name(format!("{name}-stdout"))
            .spawn(move || {
                let mut out = String::new();
                if let Err(e) = pipe.read_to_string(&mut out) {
                    log::warn!("Failed to read sandbox output: {e}");
                }
                out
            })?;

        Ok(Self {
            name,
            child,
            stdout: Some(stdout),
            docker,
            exited: false,
        })
    }
}

impl Sandbox for ChildSandbox {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_wait(&mut self) -> SimCityResult<Option<SandboxExit>> {
        let Some(status) = self.child.try_wait()? else {
            return Ok(None);
        };
        self.exited = true;

        let stdout = self
            .stdout
            .take()
            .map(|reader| reader.join().unwrap_or_default())
            .unwrap_or_default();
        Ok(Some(SandboxExit {
            exit_code: status.code(),
            stdout,
        }))
    }

    fn kill(&mut self) -> SimCityResult<()> {
        log::info!("Killing sandbox {}", self.name);
        if let Some(docker) = &self.docker {
            let status = Command::new(docker)
                .arg("kill")
                .arg(&self.name)
                .stdout(Stdio::null())
                .status()
                .context("Failed to run 'docker kill'")?;
            if !status.success() {
                log::warn!("'docker kill {}' exited with {status}", self.name);
            }
        }

        match self.child.kill() {
            Ok(()) => Ok(()),
            // Already exited.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for ChildSandbox {
    fn drop(&mut self) {
        if self.exited {
            return;
        }

        log::trace!("Killing the running sandbox {}", self.name);
        if let Err(e) = self.kill() {
            log::error!("Failed to kill sandbox {}: {e:?}", self.name);
            return;
        }
        if let Err(e) = self.child.wait() {
            log::error!("Failed to wait for sandbox {} to exit: {e}", self.name);
        }
    }
}
