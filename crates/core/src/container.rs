//! Container-backed resources
//!
//! A [`ContainerResource`] holds no authoritative state of its own. It is a
//! view over the engine's inspect output plus static configuration, and every
//! action starts by refreshing that view.

use crate::args::{normalize_user_args, Arg, ArgPhase, FlagPolicies, RunArgsBuilder};
use crate::config::{ContainerConfig, PullPolicy};
use crate::engine::{Engine, WaitCondition};
use crate::env::{self, EnvDecl, KeyStore};
use crate::errors::{ConfigError, Result};
use crate::graph::{ContainerIdentity, Resource, ResourceLookup};
use crate::identity::{self, ObjectPath, ResourceId};
use crate::inspect::InspectSnapshot;
use crate::lifecycle::{Lifecycle, RunInvocation};
use crate::namespace::{self, NamespaceKind, NamespaceRef};
use crate::process::OutputMode;
use crate::status::Status;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Status with the messages explaining it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: Status,
    pub log: Vec<String>,
}

impl StatusReport {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            log: Vec::new(),
        }
    }
}

/// Long-lived container resource
#[derive(Debug)]
pub struct ContainerResource {
    path: ObjectPath,
    rid: ResourceId,
    name: String,
    config: ContainerConfig,
    command: Vec<String>,
    entrypoint: Option<Vec<String>>,
    run_args: Vec<String>,
    policies: FlagPolicies,
    store: Arc<dyn KeyStore>,
    lifecycle: Lifecycle,
}

fn split_words(
    rid: &ResourceId,
    field: &str,
    value: &str,
) -> std::result::Result<Vec<String>, ConfigError> {
    shell_words::split(value).map_err(|e| ConfigError::Validation {
        message: format!("{}: invalid {}: {}", rid, field, e),
    })
}

impl ContainerResource {
    pub fn new(
        path: ObjectPath,
        rid: ResourceId,
        config: ContainerConfig,
        engine: Arc<dyn Engine>,
        store: Arc<dyn KeyStore>,
    ) -> std::result::Result<Self, ConfigError> {
        if config.image.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: format!("{}: image must be set", rid),
            });
        }
        let command = match config.command.as_deref() {
            Some(command) => split_words(&rid, "command", command)?,
            None => Vec::new(),
        };
        let entrypoint = config
            .entrypoint
            .as_deref()
            .map(|e| split_words(&rid, "entrypoint", e))
            .transpose()?;
        let run_args = split_words(&rid, "run_args", &config.run_args)?;
        let name = config
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| identity::container_name(&path, &rid));
        let policies = config.flag_policies();
        let lifecycle = Lifecycle::new(engine, name.clone());

        Ok(Self {
            path,
            rid,
            name,
            config,
            command,
            entrypoint,
            run_args,
            policies,
            store,
            lifecycle,
        })
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn object_path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        self.lifecycle.engine()
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Name of the engine container
    pub fn container_name(&self) -> &str {
        &self.name
    }

    fn namespace_value(&self, kind: NamespaceKind) -> &str {
        match kind {
            NamespaceKind::Net => &self.config.netns,
            NamespaceKind::Pid => &self.config.pidns,
            NamespaceKind::Ipc => &self.config.ipcns,
            NamespaceKind::Uts => &self.config.utsns,
            NamespaceKind::User => &self.config.userns,
        }
    }

    fn owns_netns(&self) -> std::result::Result<bool, crate::errors::NamespaceError> {
        let engine = self.engine().as_ref();
        Ok(NamespaceRef::parse(NamespaceKind::Net, &self.config.netns, engine)?.is_private())
    }

    /// Arguments of `container run` for this resource, plus the values to pass
    /// through the engine process environment.
    ///
    /// Creates missing bind mount source directories. Fails without partial
    /// output on unresolvable namespace references or mount failures.
    #[instrument(skip(self, lookup), fields(rid = %self.rid))]
    pub fn build_run_command(&self, lookup: &dyn ResourceLookup) -> Result<RunInvocation> {
        let engine = self.engine().as_ref();
        let config = &self.config;
        let mut builder = RunArgsBuilder::new();

        builder.push(ArgPhase::Name, Arg::with_value("--name", self.name.clone()));

        self.push_runtime_args(&mut builder)?;

        for kind in NamespaceKind::ALL {
            match namespace::resolve(kind, self.namespace_value(kind), lookup, engine)? {
                Some(value) => {
                    builder.push(ArgPhase::Namespace, Arg::with_value(kind.flag(), value));
                }
                None if kind == NamespaceKind::Net => {
                    builder.push(
                        ArgPhase::Namespace,
                        Arg::with_value(kind.flag(), "none").as_default(),
                    );
                }
                None => {}
            }
        }

        for volume in &config.volumes {
            ensure_mount_source(volume)?;
            builder.push(ArgPhase::Mount, Arg::with_value("--volume", volume.clone()).multi());
        }

        let env = env::compute(
            EnvDecl {
                env: &config.env,
                secrets: &config.secrets_env,
                configs: &config.configs_env,
            },
            self.store.as_ref(),
        )?;
        builder.extend(ArgPhase::Env, env.args);

        let labels = identity::labels(&self.path, &self.rid)
            .into_iter()
            .chain(config.labels.clone());
        for (key, value) in labels {
            builder.push(
                ArgPhase::Label,
                Arg::with_value("--label", format!("{}={}", key, value)).multi(),
            );
        }

        if self.owns_netns()? {
            let dns_option_flag = engine.capabilities().dns_option_flag;
            for server in &config.dns {
                builder.push(ArgPhase::Dns, Arg::with_value("--dns", server.clone()).multi());
            }
            for domain in &config.dns_search {
                builder.push(
                    ArgPhase::Dns,
                    Arg::with_value("--dns-search", domain.clone()).multi(),
                );
            }
            for option in &config.dns_options {
                builder.push(
                    ArgPhase::Dns,
                    Arg::with_value(dns_option_flag, option.clone()).multi(),
                );
            }
        } else if !config.dns.is_empty() || !config.dns_options.is_empty() {
            debug!("Network namespace is shared; ignoring dns settings");
        }

        for device in &config.devices {
            builder.push(ArgPhase::Device, Arg::with_value("--device", device.clone()).multi());
        }

        builder.extend(
            ArgPhase::Extra,
            normalize_user_args(&self.run_args, engine.user_arg_aliases()),
        );

        builder.push(ArgPhase::Image, Arg::flag(config.image.clone()));
        builder.extend(ArgPhase::Command, self.command.iter().cloned().map(Arg::flag));

        Ok(RunInvocation {
            args: builder.build(&self.policies),
            env: env.side_channel,
            detach: config.detach,
            mode: OutputMode::Capture,
            deadline: None,
        })
    }

    fn push_runtime_args(&self, builder: &mut RunArgsBuilder) -> Result<()> {
        let config = &self.config;
        let mut push_value = |option: &str, value: &Option<String>| {
            if let Some(value) = value.as_ref().filter(|v| !v.is_empty()) {
                builder.push(ArgPhase::Runtime, Arg::with_value(option, value.clone()));
            }
        };

        // The engine rejects a hostname on a joined network namespace
        if self.owns_netns()? {
            push_value("--hostname", &config.hostname);
        }
        push_value("--user", &config.user);
        push_value("--workdir", &config.workdir);
        push_value("--cgroup-parent", &config.cgroup_parent);
        push_value("--stop-signal", &config.stop_signal);

        if let Some(ref entrypoint) = self.entrypoint {
            // The engine takes one executable; remaining words move ahead of the command
            let executable = entrypoint.first().cloned().unwrap_or_default();
            builder.push(ArgPhase::Runtime, Arg::with_value("--entrypoint", executable));
            builder.extend(
                ArgPhase::Command,
                entrypoint.iter().skip(1).cloned().map(Arg::flag),
            );
        }
        if let Some(timeout) = config.stop_timeout() {
            builder.push(
                ArgPhase::Runtime,
                Arg::with_value("--stop-timeout", timeout.as_secs().to_string()),
            );
        }

        for (enabled, flag) in [
            (config.privileged, "--privileged"),
            (config.init, "--init"),
            (config.tty, "--tty"),
            (config.interactive, "--interactive"),
            (config.detach, "--detach"),
            (config.remove, "--rm"),
            (config.read_only, "--read-only"),
        ] {
            if enabled {
                builder.push(ArgPhase::Runtime, Arg::flag(flag));
            }
        }
        Ok(())
    }

    /// Make the image available according to the pull policy
    #[instrument(skip(self, cancel), fields(rid = %self.rid))]
    pub async fn ensure_image(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        let image = &self.config.image;
        let pull = match self.config.pull {
            PullPolicy::Never => false,
            PullPolicy::Always => true,
            PullPolicy::Missing => !self.lifecycle.image_present(image, cancel).await?,
        };
        if pull {
            info!(image = %image, "Pulling image");
            self.lifecycle
                .pull(image, self.config.pull_timeout(), cancel)
                .await?;
        }
        Ok(())
    }

    /// Bring the container up
    #[instrument(skip(self, lookup, cancel), fields(rid = %self.rid, container = %self.name))]
    pub async fn start(
        &self,
        lookup: &dyn ResourceLookup,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let invocation = self.build_run_command(lookup)?;

        match self.lifecycle.inspect_refresh(cancel).await? {
            Some(snapshot) if snapshot.running => {
                info!("Container already running");
                return Ok(());
            }
            Some(_) if self.config.remove => {
                info!("Removing stale container before a fresh run");
                self.lifecycle.remove(true, cancel).await?;
            }
            Some(_) => {
                self.lifecycle
                    .start(self.config.start_timeout(), cancel)
                    .await?;
                self.lifecycle.inspect_refresh(cancel).await?;
                return Ok(());
            }
            None => {}
        }

        self.ensure_image(cancel).await?;
        let detach = invocation.detach;
        let outcome = self.lifecycle.run(invocation, cancel).await?;
        if let Some(ref id) = outcome.container_id {
            debug!(container_id = %id, "Container created");
        }
        if detach {
            self.lifecycle.inspect_refresh(cancel).await?;
        }
        Ok(())
    }

    /// Bring the container down
    #[instrument(skip(self, cancel), fields(rid = %self.rid, container = %self.name))]
    pub async fn stop(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        match self.lifecycle.inspect_refresh(cancel).await? {
            Some(snapshot) if snapshot.running => {}
            _ => {
                info!("Container already stopped");
                return Ok(());
            }
        }
        self.lifecycle
            .stop(self.config.stop_timeout(), cancel)
            .await?;
        if self.config.remove {
            self.lifecycle.remove(false, cancel).await?;
        }
        Ok(())
    }

    /// Remove the container, absent or not
    pub async fn remove(&self, force: bool, cancel: Option<&CancellationToken>) -> Result<()> {
        self.lifecycle.remove(force, cancel).await
    }

    /// Block until the container reaches `condition`
    pub async fn wait(
        &self,
        condition: WaitCondition,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.lifecycle.wait(condition, cancel).await
    }

    /// Up when running, down otherwise
    #[instrument(skip(self, cancel), fields(rid = %self.rid, container = %self.name))]
    pub async fn status(&self, cancel: Option<&CancellationToken>) -> StatusReport {
        match self.lifecycle.inspect_refresh(cancel).await {
            Ok(Some(snapshot)) if snapshot.running => {
                let mut report = StatusReport::new(Status::Up);
                if self.config.remove && !snapshot.auto_remove {
                    let message =
                        "container is not auto-remove but the resource asks for remove".to_string();
                    warn!("{}", message);
                    report.log.push(message);
                }
                report
            }
            Ok(_) => StatusReport::new(Status::Down),
            Err(e) => {
                warn!(error = %e, "Status inspect failed");
                StatusReport {
                    status: Status::Undef,
                    log: vec![e.to_string()],
                }
            }
        }
    }

    /// Pid of the running container's init process, from the cached inspect
    pub async fn container_pid(&self) -> Option<i64> {
        self.lifecycle
            .inspect()
            .await
            .filter(|s| s.running && s.pid > 0)
            .map(|s| s.pid)
    }

    /// Network sandbox path, from the cached inspect
    pub async fn sandbox_key(&self) -> Option<String> {
        self.lifecycle
            .inspect()
            .await
            .map(|s: InspectSnapshot| s.sandbox_key)
            .filter(|k| !k.is_empty())
    }
}

/// Create the source directory of a bind mount when missing
fn ensure_mount_source(volume: &str) -> std::result::Result<(), ConfigError> {
    let Some((source, _)) = volume.split_once(':') else {
        // Anonymous volume, the path lives inside the container
        return Ok(());
    };
    if !source.starts_with('/') {
        // Named volume, managed by the engine
        return Ok(());
    }
    let path = Path::new(source);
    if path.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(path).map_err(|e| ConfigError::MountSource {
        path: source.to_string(),
        source: e,
    })?;
    info!("Created mount source directory {}", source);
    Ok(())
}

impl ContainerIdentity for ContainerResource {
    fn container_name(&self) -> String {
        self.name.clone()
    }
}

impl Resource for ContainerResource {
    fn rid(&self) -> &ResourceId {
        &self.rid
    }

    fn driver(&self) -> String {
        format!("container.{}", self.engine().kind())
    }

    fn container_identity(&self) -> Option<&dyn ContainerIdentity> {
        Some(self)
    }
}
