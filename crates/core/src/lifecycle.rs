//! Container lifecycle executor
//!
//! One executor drives one container's external representation through
//! `absent -> image-present -> running -> stopped -> absent`. Every transition
//! builds its arguments, spawns the engine once, logs the obfuscated command
//! line and classifies the outcome with the engine's not-found rules.
//!
//! Operations that can legitimately make the container disappear (stop and
//! remove) converge: when they fail and a fresh inspect finds the container
//! absent, the failure is dropped because the intended end state was reached.

use crate::args::Args;
use crate::engine::{Engine, WaitCondition};
use crate::errors::{EngineError, Result};
use crate::inspect::{InspectCache, InspectSnapshot};
use crate::process::{execute, CommandOutput, EngineCommand, OutputMode};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Bound of the implicit refresh done by [`Lifecycle::inspect`]
const IMPLICIT_INSPECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval while waiting for removal on engines without a native
/// `removed` wait condition
const REMOVAL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Parameters of a `container run`
#[derive(Debug, Clone, Default)]
pub struct RunInvocation {
    /// Arguments following `container run`
    pub args: Args,
    /// Values passed through the process environment
    pub env: Vec<(String, String)>,
    /// Attached runs report the container's exit code instead of failing
    pub detach: bool,
    pub mode: OutputMode,
    /// Kill the engine process after this long
    pub deadline: Option<Duration>,
}

/// Outcome of a `container run`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Exit code reported by the engine (the container's own for attached runs)
    pub exit_code: i32,
    /// Container id for detached runs
    pub container_id: Option<String>,
}

/// Lifecycle executor of one named container
#[derive(Debug)]
pub struct Lifecycle {
    engine: Arc<dyn Engine>,
    name: String,
    cache: InspectCache,
}

impl Lifecycle {
    pub fn new(engine: Arc<dyn Engine>, name: impl Into<String>) -> Self {
        Self {
            engine,
            name: name.into(),
            cache: InspectCache::new(),
        }
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache(&self) -> &InspectCache {
        &self.cache
    }

    fn command(&self, args: Args) -> EngineCommand {
        EngineCommand::new(self.engine.as_ref(), args)
    }

    /// Turn a finished process into a result, re-classifying the engine's
    /// not-found signal
    fn check(
        &self,
        command: &EngineCommand,
        target: &str,
        output: CommandOutput,
    ) -> std::result::Result<CommandOutput, EngineError> {
        if output.success() {
            return Ok(output);
        }
        let failure = match output.code {
            Some(code) => EngineError::Exit {
                command: command.display(),
                code,
                stderr: output.stderr.clone(),
            },
            None => EngineError::Signaled {
                command: command.display(),
            },
        };
        if self.engine.is_not_found(output.code, &output.stderr) {
            return Err(EngineError::NotFound {
                target: target.to_string(),
                source: Box::new(failure),
            });
        }
        Err(failure)
    }

    fn container_target(&self) -> String {
        format!("container {}", self.name)
    }

    /// Re-inspect and fetch the current snapshot, replacing the cached one.
    ///
    /// A parse failure leaves "no snapshot" in the cache and is returned.
    #[instrument(skip(self, cancel), fields(container = %self.name))]
    pub async fn inspect_refresh(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<InspectSnapshot>> {
        let mut args = Args::from_words(["container", "inspect"]);
        args.word(self.name.clone());
        let command = self.command(args);
        let output = execute(&command, cancel).await?;
        let snapshot = match self.check(&command, &self.container_target(), output) {
            Ok(output) => match self.engine.parse_inspect(&output.stdout) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    self.cache.store(None);
                    return Err(e.into());
                }
            },
            Err(EngineError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        debug!(present = snapshot.is_some(), "Inspect refreshed");
        self.cache.store(snapshot.clone());
        Ok(snapshot)
    }

    /// Cached snapshot, refreshed under a bounded timeout when never inspected
    pub async fn inspect(&self) -> Option<InspectSnapshot> {
        if let Some(cached) = self.cache.get() {
            return cached;
        }
        warn!(
            container = %self.name,
            "Inspect used before any explicit refresh; refreshing with a {}s bound",
            IMPLICIT_INSPECT_TIMEOUT.as_secs()
        );
        let token = CancellationToken::new();
        let refresh = self.inspect_refresh(Some(&token));
        match tokio::time::timeout(IMPLICIT_INSPECT_TIMEOUT, refresh).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                warn!(container = %self.name, error = %e, "Implicit inspect failed");
                None
            }
            Err(_) => {
                token.cancel();
                warn!(container = %self.name, "Implicit inspect timed out");
                None
            }
        }
    }

    /// Whether `image` is present in the local image store
    #[instrument(skip(self, cancel))]
    pub async fn image_present(
        &self,
        image: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<bool> {
        let mut args = Args::from_words(["image", "inspect"]);
        args.word(image);
        let command = self.command(args);
        let output = execute(&command, cancel).await?;
        match self.check(&command, &format!("image {}", image), output) {
            Ok(_) => Ok(true),
            Err(EngineError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Pull `image`; the engine has no pull timeout flag so a non-zero
    /// `timeout` bounds the process itself
    #[instrument(skip(self, cancel))]
    pub async fn pull(
        &self,
        image: &str,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let mut args = Args::from_words(["image", "pull"]);
        args.word(image);
        let command = self.command(args).deadline(timeout);
        let output = execute(&command, cancel).await?;
        self.check(&command, &format!("image {}", image), output)?;
        Ok(())
    }

    /// `container run`. Detached runs fail on a non-zero engine status;
    /// attached runs report the container's exit code.
    ///
    /// A detached `--rm` run whose container is already gone when the engine
    /// reports back converges to success with no id. Runs without auto-remove
    /// never converge: a missing container there means the run failed.
    #[instrument(skip(self, invocation, cancel), fields(container = %self.name, detach = invocation.detach))]
    pub async fn run(
        &self,
        invocation: RunInvocation,
        cancel: Option<&CancellationToken>,
    ) -> Result<RunOutcome> {
        let auto_remove = invocation.args.has_option("--rm");
        let mut args = Args::from_words(["container", "run"]);
        args.extend(invocation.args);
        let mode = if invocation.detach {
            OutputMode::Capture
        } else {
            invocation.mode
        };
        let command = self
            .command(args)
            .envs(invocation.env)
            .mode(mode)
            .deadline(invocation.deadline);
        self.cache.invalidate();
        let output = execute(&command, cancel).await?;

        if !invocation.detach {
            return match output.code {
                Some(code) => Ok(RunOutcome {
                    exit_code: code,
                    container_id: None,
                }),
                None => Err(EngineError::Signaled {
                    command: command.display(),
                }
                .into()),
            };
        }

        let output = match self.check(&command, &self.container_target(), output) {
            Ok(output) => output,
            Err(EngineError::NotFound { .. }) if auto_remove => {
                debug!(container = %self.name, "Auto-removed container already gone");
                self.cache.store(None);
                return Ok(RunOutcome {
                    exit_code: 0,
                    container_id: None,
                });
            }
            Err(e) => return Err(e.into()),
        };
        let id = output.stdout.trim().to_string();
        Ok(RunOutcome {
            exit_code: 0,
            container_id: (!id.is_empty()).then_some(id),
        })
    }

    /// `container start` of an existing container; a non-zero `timeout`
    /// bounds the process
    #[instrument(skip(self, cancel), fields(container = %self.name))]
    pub async fn start(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let mut args = Args::from_words(["container", "start"]);
        args.word(self.name.clone());
        let command = self.command(args).deadline(timeout);
        self.cache.invalidate();
        let output = execute(&command, cancel).await?;
        self.check(&command, &self.container_target(), output)?;
        Ok(())
    }

    /// `container stop`, translating a non-zero `timeout` into the engine's
    /// stop timeout flag
    #[instrument(skip(self, cancel), fields(container = %self.name))]
    pub async fn stop(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let mut args = Args::from_words(["container", "stop"]);
        if let Some(timeout) = timeout.filter(|t| !t.is_zero()) {
            let flag = self.engine.capabilities().stop_timeout_flag.flag();
            args.option_value(flag, timeout.as_secs().to_string());
        }
        args.word(self.name.clone());
        let command = self.command(args);
        self.cache.invalidate();
        let output = execute(&command, cancel).await?;
        let result = self.check(&command, &self.container_target(), output);
        self.converge(result, cancel).await
    }

    /// `container rm`
    #[instrument(skip(self, cancel), fields(container = %self.name))]
    pub async fn remove(&self, force: bool, cancel: Option<&CancellationToken>) -> Result<()> {
        let mut args = Args::from_words(["container", "rm"]);
        if force {
            args.word("--force");
        }
        args.word(self.name.clone());
        let command = self.command(args);
        self.cache.invalidate();
        let output = execute(&command, cancel).await?;
        let result = self.check(&command, &self.container_target(), output);
        self.converge(result, cancel).await
    }

    /// Block until `condition` holds. A container that no longer exists
    /// satisfies every condition.
    #[instrument(skip(self, cancel), fields(container = %self.name))]
    pub async fn wait(
        &self,
        condition: WaitCondition,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let mut args = Args::from_words(["container", "wait"]);
        let native = self.engine.wait_condition(condition);
        if let Some(value) = native {
            args.option_value("--condition", value);
        }
        args.word(self.name.clone());
        let command = self.command(args);
        self.cache.invalidate();
        let output = execute(&command, cancel).await?;
        match self.check(&command, &self.container_target(), output) {
            Ok(_) => {}
            Err(EngineError::NotFound { .. }) => {
                debug!(%condition, "Container already gone");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        if condition == WaitCondition::Removed && native.is_none() {
            while self.inspect_refresh(cancel).await?.is_some() {
                tokio::time::sleep(REMOVAL_POLL_INTERVAL).await;
            }
        }
        Ok(())
    }

    /// Apply the not-found convergence rule to a stop or remove result
    async fn converge(
        &self,
        result: std::result::Result<CommandOutput, EngineError>,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let failure = match result {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };
        if let EngineError::NotFound { .. } = failure {
            debug!(container = %self.name, "Target already absent");
            self.cache.store(None);
            return Ok(());
        }
        match self.inspect_refresh(cancel).await {
            Ok(None) => {
                debug!(container = %self.name, error = %failure, "Container vanished; treating failure as success");
                Ok(())
            }
            _ => Err(failure.into()),
        }
    }
}
