//! Start, stop and print-cmd of container and task resources

use super::Context;
use anyhow::{bail, Result};
use tracing::instrument;
use vessel_core::args::Args;
use vessel_core::process::EngineCommand;

#[instrument(skip(context))]
pub async fn start(context: &Context, rid: &str) -> Result<i32> {
    let object = &context.object;
    let rid = object.require(rid)?;
    match object.container(&rid) {
        Some(container) => {
            container.start(&object.graph, Some(&context.cancel)).await?;
            Ok(0)
        }
        None => bail!("{} is a task; use `vessel run --rid {}`", rid, rid),
    }
}

#[instrument(skip(context))]
pub async fn stop(context: &Context, rid: &str) -> Result<i32> {
    let object = &context.object;
    let rid = object.require(rid)?;
    if let Some(container) = object.container(&rid) {
        container.stop(Some(&context.cancel)).await?;
    } else if let Some(task) = object.task(&rid) {
        task.stop(Some(&context.cancel)).await?;
    }
    Ok(0)
}

/// Print the obfuscated `container run` command line of a resource
pub fn print_cmd(context: &Context, rid: &str) -> Result<i32> {
    let object = &context.object;
    let rid = object.require(rid)?;
    let container = match (object.container(&rid), object.task(&rid)) {
        (Some(container), _) => container.as_ref(),
        (None, Some(task)) => task.container(),
        (None, None) => bail!("no container or task resource {}", rid),
    };
    let invocation = container.build_run_command(&object.graph)?;
    let mut args = Args::from_words(["container", "run"]);
    args.extend(invocation.args);
    let command = EngineCommand::new(container.engine().as_ref(), args);
    println!("{}", command.display());
    Ok(0)
}
