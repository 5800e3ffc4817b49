//! Cancellable engine process execution
//!
//! One external process per lifecycle operation. Cancellation before dispatch
//! short-circuits without spawning; cancellation or deadline expiry during
//! execution kills the child.

use crate::args::Args;
use crate::engine::Engine;
use crate::errors::EngineError;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// What happens to the child's standard streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Capture stdout and stderr, stdin closed
    #[default]
    Capture,
    /// Share the caller's terminal
    Inherit,
}

/// A fully shaped engine invocation
#[derive(Debug, Clone)]
pub struct EngineCommand {
    program: String,
    args: Args,
    env: Vec<(String, String)>,
    mode: OutputMode,
    deadline: Option<Duration>,
}

impl EngineCommand {
    /// Invocation of `engine` with its global arguments followed by `args`
    pub fn new(engine: &dyn Engine, args: Args) -> Self {
        let mut full = engine.global_args();
        full.extend(args);
        Self {
            program: engine.binary().to_string(),
            args: full,
            env: Vec::new(),
            mode: OutputMode::Capture,
            deadline: None,
        }
    }

    /// Variables passed through the process environment, never through argv
    pub fn envs(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    /// Kill the process when it outlives `deadline`; zero means no deadline
    pub fn deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline.filter(|d| !d.is_zero());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    /// Obfuscated command line, safe to log
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args)
        }
    }
}

/// Result of a finished engine process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status, `None` when terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn expired(deadline: Option<Duration>) {
    match deadline {
        Some(deadline) => tokio::time::sleep(deadline).await,
        None => std::future::pending().await,
    }
}

/// Run `command` to completion.
///
/// A non-zero exit is not an error at this level; callers classify the
/// output with their engine's not-found rules.
pub async fn execute(
    command: &EngineCommand,
    cancel: Option<&CancellationToken>,
) -> Result<CommandOutput, EngineError> {
    let shown = command.display();
    if cancel.is_some_and(|t| t.is_cancelled()) {
        debug!(command = %shown, "Cancelled before dispatch");
        return Err(EngineError::Cancelled { command: shown });
    }

    info!("{}", shown);

    let mut cmd = Command::new(&command.program);
    cmd.args(command.args.to_argv())
        .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .kill_on_drop(true);
    match command.mode {
        OutputMode::Capture => {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        }
        OutputMode::Inherit => {
            cmd.stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        }
    }

    let child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            EngineError::NotInstalled {
                binary: command.program.clone(),
            }
        } else {
            EngineError::Spawn {
                command: shown.clone(),
                source: e,
            }
        }
    })?;

    // Dropping the wait future drops the child, which kills it
    let output = tokio::select! {
        output = child.wait_with_output() => output.map_err(|e| EngineError::Spawn {
            command: shown.clone(),
            source: e,
        })?,
        _ = cancelled(cancel) => {
            debug!(command = %shown, "Cancelled; killing engine process");
            return Err(EngineError::Cancelled { command: shown });
        }
        _ = expired(command.deadline) => {
            let secs = command.deadline.map(|d| d.as_secs()).unwrap_or_default();
            debug!(command = %shown, secs, "Deadline expired; killing engine process");
            return Err(EngineError::Timeout { command: shown, secs });
        }
    };

    let result = CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };
    debug!(command = %shown, code = ?result.code, "Engine process finished");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Arg;
    use crate::engine::DockerCli;

    fn sh(script: &str) -> EngineCommand {
        let engine = DockerCli::with_path("/bin/sh");
        EngineCommand::new(&engine, Args::from_words(["-c", script]))
    }

    #[tokio::test]
    async fn test_execute_captures_output() {
        let output = execute(&sh("echo out; echo err >&2; exit 3"), None)
            .await
            .unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr, "err");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_env_side_channel() {
        let command = sh("printf %s \"$TOKEN\"").envs([("TOKEN".to_string(), "s3cr3t".to_string())]);
        let output = execute(&command, None).await.unwrap();
        assert_eq!(output.stdout, "s3cr3t");
        assert!(!command.display().contains("s3cr3t"));
    }

    #[tokio::test]
    async fn test_cancel_before_dispatch() {
        let token = CancellationToken::new();
        token.cancel();
        let err = execute(&sh("exit 0"), Some(&token)).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_cancel_during_execution_kills_process() {
        let token = CancellationToken::new();
        let child_token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            child_token.cancel();
        });
        let started = std::time::Instant::now();
        let err = execute(&sh("sleep 30"), Some(&token)).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_deadline() {
        let command = sh("sleep 30").deadline(Some(Duration::from_millis(100)));
        let err = execute(&command, None).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let engine = DockerCli::with_path("/nonexistent/vessel-engine");
        let command = EngineCommand::new(&engine, Args::from_words(["ps"]));
        let err = execute(&command, None).await.unwrap_err();
        assert!(matches!(err, EngineError::NotInstalled { .. }));
    }

    #[test]
    fn test_display_is_obfuscated() {
        let engine = DockerCli::default();
        let mut args = Args::from_words(["container", "run"]);
        args.push(Arg::with_value("--env", "A=secret").obfuscated());
        let command = EngineCommand::new(&engine, args);
        assert_eq!(command.display(), "docker container run --env xxx");
    }
}
