//! Interactive run confirmation

use crate::errors::ConfirmError;
use std::io::IsTerminal;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

/// The only answer accepted as a confirmation
pub const AFFIRMATIVE: &str = "yes";

/// Default bound on the wait for an answer
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of operator answers
#[allow(async_fn_in_trait)]
pub trait Prompter {
    /// True when an operator can answer
    fn is_interactive(&self) -> bool;

    /// Ask `question`; `Ok(None)` when no answer arrived within `timeout`
    async fn ask(&self, question: &str, timeout: Duration) -> std::io::Result<Option<String>>;
}

/// Prompter reading the process's terminal
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn is_interactive(&self) -> bool {
        std::io::stdin().is_terminal()
    }

    async fn ask(&self, question: &str, timeout: Duration) -> std::io::Result<Option<String>> {
        let mut stderr = tokio::io::stderr();
        stderr.write_all(question.as_bytes()).await?;
        stderr.flush().await?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        match tokio::time::timeout(timeout, lines.next_line()).await {
            Ok(line) => Ok(Some(line?.unwrap_or_default())),
            Err(_) => Ok(None),
        }
    }
}

/// How the run was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmOptions {
    /// The resource requires confirmation
    pub required: bool,
    /// The caller already confirmed
    pub confirmed: bool,
    /// The run originates from the scheduler
    pub cron: bool,
    pub timeout: Duration,
}

impl Default for ConfirmOptions {
    fn default() -> Self {
        Self {
            required: false,
            confirmed: false,
            cron: false,
            timeout: DEFAULT_CONFIRM_TIMEOUT,
        }
    }
}

/// Honor a confirmation requirement before running `rid`
pub async fn confirm<P: Prompter>(
    rid: &str,
    options: &ConfirmOptions,
    prompter: &P,
) -> Result<(), ConfirmError> {
    if !options.required {
        return Ok(());
    }
    if options.confirmed {
        debug!(rid, "Run pre-confirmed by caller");
        return Ok(());
    }
    if options.cron {
        return Err(ConfirmError::Scheduled {
            rid: rid.to_string(),
        });
    }
    if !prompter.is_interactive() {
        return Err(ConfirmError::NoTty {
            rid: rid.to_string(),
        });
    }

    let question = format!(
        "{}: this task requires confirmation. Type '{}' within {}s to run: ",
        rid,
        AFFIRMATIVE,
        options.timeout.as_secs()
    );
    let answer = prompter
        .ask(&question, options.timeout)
        .await
        .map_err(|_| ConfirmError::NoTty {
            rid: rid.to_string(),
        })?;
    match answer {
        None => Err(ConfirmError::Timeout {
            rid: rid.to_string(),
            secs: options.timeout.as_secs(),
        }),
        Some(answer) if answer.trim_end_matches(['\r', '\n']) == AFFIRMATIVE => {
            info!(rid, "Run confirmed");
            Ok(())
        }
        Some(answer) => Err(ConfirmError::Declined {
            rid: rid.to_string(),
            answer: answer.trim().to_string(),
        }),
    }
}
