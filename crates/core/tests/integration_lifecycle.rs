//! Lifecycle executor against shell scripts standing in for the engine binary

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use vessel_core::engine::{DockerCli, Engine, PodmanCli, WaitCondition};
use vessel_core::errors::{EngineError, VesselError};
use vessel_core::args::{Arg, Args};
use vessel_core::lifecycle::{Lifecycle, RunInvocation};

const RUNNING_INSPECT: &str = r#"[{"Id":"c0ffee","State":{"Running":true,"Pid":4242,"ExitCode":0,"Status":"running"},"HostConfig":{"AutoRemove":false},"NetworkSettings":{"SandboxKey":"/run/netns/c0ffee"}}]"#;

/// Write an engine script whose body sees every invocation appended to `calls.log`
fn fake_engine(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("engine");
    let script = format!(
        "#!/bin/sh\necho \"$@\" >> '{}'\n{}\n",
        dir.join("calls.log").display(),
        body
    );
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn calls(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn docker(binary: &Path) -> Arc<dyn Engine> {
    Arc::new(DockerCli::with_path(binary.display().to_string()).with_version(Some("24.0.7")))
}

fn podman(binary: &Path) -> Arc<dyn Engine> {
    Arc::new(PodmanCli::with_path(binary.display().to_string()))
}

#[tokio::test]
async fn test_absent_container_converges_on_docker() {
    let dir = TempDir::new().unwrap();
    let binary = fake_engine(
        dir.path(),
        r#"echo "Error response from daemon: No such container: $3" >&2; exit 1"#,
    );
    let lifecycle = Lifecycle::new(docker(&binary), "web");

    assert_eq!(lifecycle.inspect_refresh(None).await.unwrap(), None);
    assert_eq!(lifecycle.cache().get(), Some(None));
    lifecycle.stop(Some(Duration::from_secs(5)), None).await.unwrap();
    lifecycle.remove(true, None).await.unwrap();
    lifecycle.wait(WaitCondition::NotRunning, None).await.unwrap();
}

#[tokio::test]
async fn test_absent_container_converges_on_podman() {
    let dir = TempDir::new().unwrap();
    // Podman reports a missing container with exit status 125
    let binary = fake_engine(dir.path(), "exit 125");
    let lifecycle = Lifecycle::new(podman(&binary), "web");

    assert_eq!(lifecycle.inspect_refresh(None).await.unwrap(), None);
    lifecycle.stop(None, None).await.unwrap();
    lifecycle.remove(false, None).await.unwrap();
    lifecycle.wait(WaitCondition::Removed, None).await.unwrap();

    let calls = calls(dir.path());
    assert!(calls.contains(&"container wait --condition removing web".to_string()));
}

#[tokio::test]
async fn test_inspect_and_stop_running_container() {
    let dir = TempDir::new().unwrap();
    let binary = fake_engine(
        dir.path(),
        &format!(
            "case \"$1 $2\" in\n  \"container inspect\") echo '{}' ;;\nesac\nexit 0",
            RUNNING_INSPECT
        ),
    );
    let lifecycle = Lifecycle::new(docker(&binary), "web");

    let snapshot = lifecycle.inspect_refresh(None).await.unwrap().unwrap();
    assert!(snapshot.running);
    assert_eq!(snapshot.pid, 4242);
    assert_eq!(snapshot.sandbox_key, "/run/netns/c0ffee");
    assert!(!snapshot.auto_remove);

    lifecycle.stop(Some(Duration::from_secs(10)), None).await.unwrap();
    assert!(!lifecycle.cache().is_inspected());
    assert_eq!(
        calls(dir.path()),
        vec!["container inspect web", "container stop --timeout 10 web"]
    );
}

#[tokio::test]
async fn test_stop_failure_on_vanished_container_is_success() {
    let dir = TempDir::new().unwrap();
    let binary = fake_engine(
        dir.path(),
        r#"case "$1 $2" in
  "container stop") echo "Error: cannot stop: device busy" >&2; exit 1 ;;
  "container inspect") echo "Error: No such container: $3" >&2; exit 1 ;;
esac
exit 0"#,
    );
    let lifecycle = Lifecycle::new(docker(&binary), "web");
    lifecycle.stop(None, None).await.unwrap();
}

#[tokio::test]
async fn test_stop_failure_on_present_container_propagates() {
    let dir = TempDir::new().unwrap();
    let binary = fake_engine(
        dir.path(),
        &format!(
            "case \"$1 $2\" in\n  \"container stop\") echo 'Error: cannot stop: device busy' >&2; exit 1 ;;\n  \"container inspect\") echo '{}' ;;\nesac\nexit 0",
            RUNNING_INSPECT
        ),
    );
    let lifecycle = Lifecycle::new(docker(&binary), "web");
    let err = lifecycle.stop(None, None).await.unwrap_err();
    assert!(matches!(
        err,
        VesselError::Engine(EngineError::Exit { code: 1, .. })
    ));
    assert!(!err.is_not_found());
}

#[tokio::test]
async fn test_docker_removal_wait_polls_inspect() {
    let dir = TempDir::new().unwrap();
    let gone = dir.path().join("gone");
    let binary = fake_engine(
        dir.path(),
        &format!(
            "case \"$1 $2\" in\n  \"container wait\") touch '{gone}'; echo 0 ;;\n  \"container inspect\") if [ -e '{gone}' ]; then echo 'Error: No such container: web' >&2; exit 1; fi; echo '{inspect}' ;;\nesac\nexit 0",
            gone = gone.display(),
            inspect = RUNNING_INSPECT
        ),
    );
    let lifecycle = Lifecycle::new(docker(&binary), "web");
    lifecycle.wait(WaitCondition::Removed, None).await.unwrap();

    let calls = calls(dir.path());
    assert_eq!(calls[0], "container wait web");
    assert_eq!(calls.last().map(String::as_str), Some("container inspect web"));
}

#[tokio::test]
async fn test_cancelled_before_dispatch() {
    let dir = TempDir::new().unwrap();
    let binary = fake_engine(dir.path(), "exit 0");
    let lifecycle = Lifecycle::new(docker(&binary), "web");
    let token = CancellationToken::new();
    token.cancel();

    let err = lifecycle.remove(false, Some(&token)).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(calls(dir.path()).is_empty());
}

#[tokio::test]
async fn test_cancel_terminates_running_engine_process() {
    let dir = TempDir::new().unwrap();
    let binary = fake_engine(dir.path(), "exec sleep 30");
    let lifecycle = Lifecycle::new(docker(&binary), "web");
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let err = lifecycle
        .wait(WaitCondition::NotRunning, Some(&token))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_start_deadline_kills_engine_process() {
    let dir = TempDir::new().unwrap();
    let binary = fake_engine(dir.path(), "exec sleep 30");
    let lifecycle = Lifecycle::new(podman(&binary), "web");

    let err = lifecycle
        .start(Some(Duration::from_millis(200)), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        VesselError::Engine(EngineError::Timeout { .. })
    ));
}

#[tokio::test]
async fn test_missing_engine_binary() {
    let dir = TempDir::new().unwrap();
    let lifecycle = Lifecycle::new(docker(&dir.path().join("nope")), "web");
    let err = lifecycle.inspect_refresh(None).await.unwrap_err();
    assert!(matches!(
        err,
        VesselError::Engine(EngineError::NotInstalled { .. })
    ));
}

#[tokio::test]
async fn test_unparseable_inspect_leaves_no_snapshot() {
    let dir = TempDir::new().unwrap();
    let binary = fake_engine(dir.path(), "echo 'not json'; exit 0");
    let lifecycle = Lifecycle::new(docker(&binary), "web");

    let err = lifecycle.inspect_refresh(None).await.unwrap_err();
    assert!(matches!(
        err,
        VesselError::Engine(EngineError::InspectParse { .. })
    ));
    assert_eq!(lifecycle.cache().get(), Some(None));
}

#[tokio::test]
async fn test_detached_run_converges_only_with_auto_remove() {
    let dir = TempDir::new().unwrap();
    let binary = fake_engine(
        dir.path(),
        r#"echo "Error: No such container: web" >&2; exit 1"#,
    );
    let lifecycle = Lifecycle::new(docker(&binary), "web");
    let invocation = |auto_remove: bool| {
        let mut args = Args::new();
        args.option_value("--name", "web");
        if auto_remove {
            args.push(Arg::flag("--rm"));
        }
        args.word("busybox");
        RunInvocation {
            args,
            detach: true,
            ..Default::default()
        }
    };

    let outcome = lifecycle.run(invocation(true), None).await.unwrap();
    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.container_id, None);

    let err = lifecycle.run(invocation(false), None).await.unwrap_err();
    assert!(err.is_not_found());
}
