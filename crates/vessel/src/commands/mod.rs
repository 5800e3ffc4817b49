//! Command implementations
//!
//! Every subcommand loads the object configuration, instantiates its
//! resources and drives one of them through the core.

pub mod resource;
pub mod run;
pub mod status;

use anyhow::{Context as _, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vessel_core::config::{Object, ObjectConfig};

/// Loaded object plus the cancellation token of this invocation
#[derive(Debug)]
pub struct Context {
    pub object: Object,
    pub cancel: CancellationToken,
}

impl Context {
    pub fn load(config_path: &Path) -> Result<Self> {
        let config = ObjectConfig::load_from_path(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?;
        let object = config.build()?;
        debug!(object = %config.path(), "Object loaded");
        Ok(Self {
            object,
            cancel: cancel_on_interrupt(),
        })
    }
}

/// Token cancelled on the first Ctrl-C, terminating in-flight engine processes
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling engine operations");
            child.cancel();
        }
    });
    token
}
