//! Run command implementation
//!
//! Runs a task resource once in the foreground. The container's stdio is
//! inherited so its output reaches the caller's terminal.

use super::Context;
use anyhow::{bail, Result};
use tracing::{info, instrument};
use vessel_core::confirm::StdinPrompter;
use vessel_core::process::OutputMode;
use vessel_core::task::RunRequest;
use vessel_core::Status;

/// Run command arguments
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub rid: String,
    /// Skip the interactive confirmation
    pub confirm: bool,
    /// Scheduler-origin run
    pub cron: bool,
    pub session_id: Option<String>,
}

/// Run the task; exits 0 when the mapped status is up
#[instrument(skip(context))]
pub async fn execute(context: &Context, args: RunArgs) -> Result<i32> {
    let object = &context.object;
    let rid = object.require(&args.rid)?;
    let Some(task) = object.task(&rid) else {
        bail!("{} is not a task resource", rid);
    };

    let from_env = RunRequest::from_env();
    let request = RunRequest {
        session_id: args.session_id,
        confirmed: args.confirm,
        cron: args.cron || from_env.cron,
        mode: OutputMode::Inherit,
        cancel: Some(context.cancel.clone()),
    };
    let report = task.run(&object.graph, &request, &StdinPrompter).await?;
    info!(
        session_id = %report.session_id,
        exit_code = report.exit_code,
        status = %report.status,
        "Run finished"
    );
    eprintln!("{}: exit code {} ({})", rid, report.exit_code, report.status);
    Ok(if report.status == Status::Up { 0 } else { 1 })
}
