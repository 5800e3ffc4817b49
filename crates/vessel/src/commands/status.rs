//! Status of container and task resources

use super::Context;
use anyhow::Result;
use serde::Serialize;
use vessel_core::container::StatusReport;
use vessel_core::Status;

#[derive(Debug, Serialize)]
struct StatusLine {
    rid: String,
    status: Status,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    log: Vec<String>,
}

impl StatusLine {
    fn new(rid: String, report: StatusReport) -> Self {
        Self {
            rid,
            status: report.status,
            log: report.log,
        }
    }
}

/// Print statuses; exits 1 when a selected resource is not up or n/a
pub async fn execute(context: &Context, rid: Option<&str>, json: bool) -> Result<i32> {
    let object = &context.object;
    let selected = match rid {
        Some(rid) => Some(object.require(rid)?),
        None => None,
    };
    let wanted = |rid: &vessel_core::ResourceId| selected.as_ref().map_or(true, |s| s == rid);

    let mut lines = Vec::new();
    for (rid, container) in &object.containers {
        if wanted(rid) {
            let report = container.status(Some(&context.cancel)).await;
            lines.push(StatusLine::new(rid.to_string(), report));
        }
    }
    for (rid, task) in &object.tasks {
        if wanted(rid) {
            lines.push(StatusLine::new(rid.to_string(), task.status()));
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&lines)?);
    } else {
        for line in &lines {
            println!("{}\t{}", line.rid, line.status);
            for message in &line.log {
                println!("\t{}", message);
            }
        }
    }

    let healthy = lines
        .iter()
        .all(|l| matches!(l.status, Status::Up | Status::NotApplicable));
    Ok(if healthy || selected.is_none() { 0 } else { 1 })
}
