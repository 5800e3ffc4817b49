//! One-shot task resources
//!
//! A task runs an attached, auto-removed container per invocation. Admission
//! is serialized by a file lock held only around the count-check-and-register
//! step on the task's run directory; confirmation and execution happen outside
//! the lock. Only the last-run record persists between invocations.

use crate::args::Args;
use crate::config::{CheckPolicy, ContainerConfig, TaskConfig};
use crate::confirm::{confirm, ConfirmOptions, Prompter};
use crate::container::{ContainerResource, StatusReport};
use crate::engine::Engine;
use crate::env::KeyStore;
use crate::errors::{ConcurrencyError, ConfigError, EngineError, Result, VesselError};
use crate::graph::{ContainerIdentity, Resource, ResourceLookup};
use crate::identity::{ObjectPath, ResourceId};
use crate::lastrun::{LastRun, LastRunStore};
use crate::lifecycle::Lifecycle;
use crate::lock::FileLock;
use crate::process::OutputMode;
use crate::retcodes::RetcodeMap;
use crate::runfile::RunDir;
use crate::status::Status;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Environment variable marking a scheduler-origin run
pub const CRON_ENV: &str = "VESSEL_CRON";

/// Exit code recorded when the run outlived its timeout
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Caller-side parameters of one task run
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Execution session id; generated when unset
    pub session_id: Option<String>,
    /// The caller already confirmed the run
    pub confirmed: bool,
    /// The run originates from the scheduler
    pub cron: bool,
    pub mode: OutputMode,
    pub cancel: Option<CancellationToken>,
}

impl RunRequest {
    /// Request with the scheduler origin read from the environment
    pub fn from_env() -> Self {
        Self {
            cron: std::env::var(CRON_ENV).is_ok_and(|v| v == "1"),
            ..Default::default()
        }
    }
}

/// Outcome of a task run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRunReport {
    pub session_id: String,
    pub exit_code: i32,
    pub status: Status,
}

/// One-shot task resource
#[derive(Debug)]
pub struct TaskResource {
    container: ContainerResource,
    retcodes: RetcodeMap,
    retcode_errors: Vec<String>,
    max_parallel: usize,
    confirmation: bool,
    confirm_timeout: Duration,
    run_timeout: Option<Duration>,
    check: CheckPolicy,
    lock_timeout: Duration,
    var_dir: PathBuf,
    run_dir: RunDir,
    last_run: LastRunStore,
}

impl TaskResource {
    pub fn new(
        path: ObjectPath,
        rid: ResourceId,
        config: TaskConfig,
        engine: Arc<dyn Engine>,
        store: Arc<dyn KeyStore>,
        var_dir: PathBuf,
    ) -> std::result::Result<Self, ConfigError> {
        if config.max_parallel == 0 {
            return Err(ConfigError::Validation {
                message: format!("{}: max_parallel must be at least 1", rid),
            });
        }
        let parsed = RetcodeMap::parse(&config.retcodes)?;
        let retcode_errors: Vec<String> = parsed.errors.iter().map(|e| e.to_string()).collect();
        for message in &retcode_errors {
            warn!(rid = %rid, "{}", message);
        }

        // Tasks never leave a running container behind
        let container_config = ContainerConfig {
            detach: false,
            remove: true,
            ..config.container
        };
        let container = ContainerResource::new(path, rid, container_config, engine, store)?;

        Ok(Self {
            container,
            retcodes: parsed.map,
            retcode_errors,
            max_parallel: config.max_parallel,
            confirmation: config.confirmation,
            confirm_timeout: Duration::from_secs(config.confirm_timeout),
            run_timeout: config
                .run_timeout
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
            check: config.check,
            lock_timeout: Duration::from_secs(config.lock_timeout),
            run_dir: RunDir::new(var_dir.join("run")),
            last_run: LastRunStore::new(&var_dir),
            var_dir,
        })
    }

    /// Replace the run directory tracker (process table injection)
    pub fn with_run_dir(mut self, run_dir: RunDir) -> Self {
        self.run_dir = run_dir;
        self
    }

    pub fn container(&self) -> &ContainerResource {
        &self.container
    }

    pub fn var_dir(&self) -> &Path {
        &self.var_dir
    }

    pub fn run_dir(&self) -> &RunDir {
        &self.run_dir
    }

    pub fn lock_path(&self) -> PathBuf {
        self.var_dir.join("run.lock")
    }

    pub fn last_run_store(&self) -> &LastRunStore {
        &self.last_run
    }

    pub fn retcodes(&self) -> &RetcodeMap {
        &self.retcodes
    }

    /// Container name of one run; concurrent runs get a per-session suffix
    fn run_container_name(&self, session_id: &str) -> String {
        let base = self.container.container_name();
        if self.max_parallel > 1 {
            let short: String = session_id.chars().filter(|c| *c != '-').take(8).collect();
            format!("{}.{}", base, short)
        } else {
            base.to_string()
        }
    }

    /// Execute the task once
    #[instrument(skip(self, lookup, request, prompter), fields(rid = %self.container.rid()))]
    pub async fn run<P: Prompter>(
        &self,
        lookup: &dyn ResourceLookup,
        request: &RunRequest,
        prompter: &P,
    ) -> Result<TaskRunReport> {
        let rid = self.container.rid().to_string();
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let cancel = request.cancel.as_ref();

        let run_file = {
            let _lock = FileLock::acquire(&self.lock_path(), self.lock_timeout).await?;
            let count = self.run_dir.count_and_clean()?;
            if count >= self.max_parallel {
                return Err(ConcurrencyError::AlreadyRunning {
                    rid,
                    count,
                    max: self.max_parallel,
                }
                .into());
            }
            self.run_dir.create(&session_id)?
        };
        debug!(session_id = %session_id, "Run admitted");

        confirm(
            &rid,
            &ConfirmOptions {
                required: self.confirmation,
                confirmed: request.confirmed,
                cron: request.cron,
                timeout: self.confirm_timeout,
            },
            prompter,
        )
        .await?;

        let exit_code = self
            .execute(lookup, &session_id, request.mode, cancel)
            .await?;

        self.last_run.save(&LastRun {
            at: Utc::now(),
            exitcode: exit_code,
            session_id: session_id.clone(),
        })?;
        if let Err(e) = run_file.remove() {
            warn!(error = %e, "Failed to remove run file");
        }

        let status = self.retcodes.status(exit_code);
        info!(session_id = %session_id, exit_code, status = %status, "Task run finished");
        Ok(TaskRunReport {
            session_id,
            exit_code,
            status,
        })
    }

    async fn execute(
        &self,
        lookup: &dyn ResourceLookup,
        session_id: &str,
        mode: OutputMode,
        cancel: Option<&CancellationToken>,
    ) -> Result<i32> {
        let mut invocation = self.container.build_run_command(lookup)?;
        let name = self.run_container_name(session_id);
        if name != self.container.container_name() {
            invocation.args = rename(invocation.args, &name);
        }
        invocation.mode = mode;
        invocation.deadline = self.run_timeout;

        let lifecycle = Lifecycle::new(self.container.engine().clone(), name);
        if lifecycle.inspect_refresh(cancel).await?.is_some() {
            info!(container = %lifecycle.name(), "Removing leftover container of a previous run");
            lifecycle.remove(true, cancel).await?;
        }
        self.container.ensure_image(cancel).await?;

        match lifecycle.run(invocation, cancel).await {
            Ok(outcome) => Ok(outcome.exit_code),
            Err(VesselError::Engine(EngineError::Timeout { secs, .. })) => {
                error!(secs, "Task run timed out");
                // The engine client was killed; the container may outlive it
                if let Err(e) = lifecycle.remove(true, None).await {
                    warn!(error = %e, "Failed to remove timed out container");
                }
                Ok(TIMEOUT_EXIT_CODE)
            }
            Err(e @ VesselError::Engine(EngineError::Cancelled { .. })) => {
                warn!("Task run cancelled");
                if let Err(e) = lifecycle.remove(true, None).await {
                    warn!(error = %e, "Failed to remove cancelled container");
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Stop in-flight runs of the task
    pub async fn stop(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        self.container.stop(cancel).await
    }

    /// Status derived from the last run per the check policy
    pub fn status(&self) -> StatusReport {
        let mut report = match self.check {
            CheckPolicy::None => StatusReport::new(Status::NotApplicable),
            CheckPolicy::LastRun => match self.last_run.load() {
                Ok(Some(last_run)) => {
                    let mut report = StatusReport::new(self.retcodes.status(last_run.exitcode));
                    report.log.push(format!(
                        "last run at {} exited with code {}",
                        last_run.at.to_rfc3339(),
                        last_run.exitcode
                    ));
                    report
                }
                Ok(None) => StatusReport::new(Status::NotApplicable),
                Err(e) => StatusReport {
                    status: Status::Undef,
                    log: vec![e.to_string()],
                },
            },
        };
        report.log.extend(self.retcode_errors.iter().cloned());
        report
    }

    /// Concurrently running instances
    pub fn running(&self) -> Result<usize> {
        Ok(self.run_dir.count()?)
    }
}

/// Replace the `--name` value of a run command
fn rename(args: Args, name: &str) -> Args {
    let mut renamed = Args::new();
    for mut arg in args.iter().cloned() {
        if arg.option == "--name" {
            arg.value = Some(name.to_string());
        }
        renamed.push(arg);
    }
    renamed
}

impl ContainerIdentity for TaskResource {
    fn container_name(&self) -> String {
        self.container.container_name().to_string()
    }
}

impl Resource for TaskResource {
    fn rid(&self) -> &ResourceId {
        self.container.rid()
    }

    fn driver(&self) -> String {
        format!("task.{}", self.container.engine().kind())
    }

    fn container_identity(&self) -> Option<&dyn ContainerIdentity> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DockerCli;
    use crate::env::DirKeyStore;
    use tempfile::TempDir;

    fn task(dir: &Path, config: TaskConfig) -> std::result::Result<TaskResource, ConfigError> {
        TaskResource::new(
            ObjectPath::new("ns1", "app"),
            "task#backup".parse().unwrap(),
            config,
            Arc::new(DockerCli::default()),
            Arc::new(DirKeyStore::new(dir.join("store"))),
            dir.join("var"),
        )
    }

    fn base() -> TaskConfig {
        TaskConfig {
            container: ContainerConfig {
                image: "busybox".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_task_forces_attached_auto_remove() {
        let dir = TempDir::new().unwrap();
        let task = task(dir.path(), base()).unwrap();
        assert!(!task.container().config().detach);
        assert!(task.container().config().remove);
        assert_eq!(task.driver(), "task.docker");
        assert_eq!(task.lock_path(), dir.path().join("var/run.lock"));
    }

    #[test]
    fn test_status_follows_check_policy() {
        let dir = TempDir::new().unwrap();
        let task_res = task(
            dir.path(),
            TaskConfig {
                retcodes: "0:up 2:down oops".to_string(),
                ..base()
            },
        )
        .unwrap();
        let report = task_res.status();
        assert_eq!(report.status, Status::NotApplicable);
        assert_eq!(report.log.len(), 1);

        task_res
            .last_run_store()
            .save(&LastRun {
                at: Utc::now(),
                exitcode: 2,
                session_id: "s".to_string(),
            })
            .unwrap();
        assert_eq!(task_res.status().status, Status::Down);

        let unchecked = task(
            dir.path(),
            TaskConfig {
                check: CheckPolicy::None,
                ..base()
            },
        )
        .unwrap();
        assert_eq!(unchecked.status().status, Status::NotApplicable);
    }

    #[test]
    fn test_invalid_task_configuration() {
        let dir = TempDir::new().unwrap();
        assert!(task(
            dir.path(),
            TaskConfig {
                max_parallel: 0,
                ..base()
            }
        )
        .is_err());
        assert!(task(
            dir.path(),
            TaskConfig {
                retcodes: "bogus".to_string(),
                ..base()
            }
        )
        .is_err());
    }

    #[test]
    fn test_parallel_runs_get_distinct_names() {
        let dir = TempDir::new().unwrap();
        let single = task(dir.path(), base()).unwrap();
        assert_eq!(
            single.run_container_name("6f1c0a0e-5d4b"),
            "ns1..app.task.backup"
        );
        let parallel = task(
            dir.path(),
            TaskConfig {
                max_parallel: 3,
                ..base()
            },
        )
        .unwrap();
        assert_eq!(
            parallel.run_container_name("6f1c0a0e-5d4b"),
            "ns1..app.task.backup.6f1c0a0e"
        );
    }
}
