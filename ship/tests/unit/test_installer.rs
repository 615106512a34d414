//! Agent installation under the host-scoped lock, using real flock/curl/tar

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use ship::errors::ShipError;
use ship::exec::local::LocalRunner;
use ship::exec::{Capture, Cmd, CommandRunner};
use ship::installer::{
    dev_version, AgentInstaller, AgentSource, InstallLock, InstallOutcome, Privilege,
};
use ship::storage::settings::AgentSettings;
use tempfile::TempDir;

const VERSION: &str = "1.4.0";

fn tools_available() -> bool {
    ["flock", "curl", "tar"].iter().all(|t| which::which(t).is_ok())
}

/// Settings pointing every path into `tmp`, with a published release fixture
fn settings(tmp: &TempDir, lock_timeout_secs: u64) -> AgentSettings {
    let root = tmp.path();
    let src = root.join("src");
    fs::create_dir_all(&src).unwrap();
    let binary = src.join("ship-agent");
    fs::write(&binary, "#!/bin/sh\necho agent-ok\n").unwrap();
    fs::set_permissions(&binary, fs::Permissions::from_mode(0o644)).unwrap();

    let releases = root.join("releases");
    fs::create_dir_all(&releases).unwrap();
    let status = Command::new("tar")
        .arg("-czf")
        .arg(releases.join(format!("ship-agent-{}.tar.gz", VERSION)))
        .arg("-C")
        .arg(&src)
        .arg("ship-agent")
        .status()
        .unwrap();
    assert!(status.success());

    fs::create_dir_all(root.join("locks")).unwrap();
    AgentSettings {
        deploy_dir: root.join("deploy"),
        root_dir: root.join("root"),
        lock_dir: root.join("locks"),
        lock_timeout_secs,
        release_url_template: format!(
            "file://{}/ship-agent-{{version}}.tar.gz",
            releases.display()
        ),
        ..AgentSettings::default()
    }
}

fn release() -> AgentSource {
    AgentSource::Release {
        version: VERSION.to_string(),
    }
}

/// Hold `lock` from another process until the returned child is killed
fn hold_lock(lock: &Path, ready: &Path) -> Child {
    // exec keeps the locked descriptor in the one process we kill
    let child = Command::new("sh")
        .args([
            "-c",
            "exec 9>\"$1\" && flock 9 && touch \"$2\" && exec sleep 30",
            "sh",
        ])
        .arg(lock)
        .arg(ready)
        .spawn()
        .unwrap();
    let started = Instant::now();
    while !ready.exists() {
        assert!(started.elapsed() < Duration::from_secs(10), "lock holder never started");
        std::thread::sleep(Duration::from_millis(20));
    }
    child
}

#[tokio::test]
async fn test_released_agent_is_installed_once() {
    if !tools_available() {
        eprintln!("flock, curl or tar not available, skipping");
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(&tmp, 30);

    let first_runner = LocalRunner::default();
    let second_runner = LocalRunner::default();
    let first = AgentInstaller::new(&first_runner, settings.clone());
    let second = AgentInstaller::new(&second_runner, settings.clone());
    let source = release();

    let (a, b) = tokio::join!(
        first.ensure(&source, Privilege::Deploy),
        second.ensure(&source, Privilege::Deploy)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let mut outcomes = vec![a.outcome, b.outcome];
    outcomes.sort();
    assert_eq!(outcomes, vec![InstallOutcome::Installed, InstallOutcome::Present]);
    assert_eq!(a.path, b.path);

    let binary = PathBuf::from(&a.path);
    assert_eq!(binary, settings.deploy_dir.join(VERSION).join("ship-agent"));
    assert_eq!(fs::metadata(&binary).unwrap().permissions().mode() & 0o777, 0o755);

    let out = first_runner.capture(&Cmd::new(a.path.as_str())).await.unwrap();
    assert_eq!(out.trim(), "agent-ok");

    // nothing but the binary is left in the install dir
    let leftovers: Vec<String> = fs::read_dir(settings.deploy_dir.join(VERSION))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(leftovers, vec!["ship-agent"]);

    let again = first.ensure(&source, Privilege::Deploy).await.unwrap();
    assert_eq!(again.outcome, InstallOutcome::Present);
}

#[tokio::test]
async fn test_held_lock_times_out() {
    if !tools_available() {
        eprintln!("flock, curl or tar not available, skipping");
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(&tmp, 1);
    let lock = InstallLock::for_privilege(
        &settings.lock_dir,
        Privilege::Deploy,
        Duration::from_secs(settings.lock_timeout_secs),
    );
    let mut holder = hold_lock(lock.path(), &tmp.path().join("ready"));

    let runner = LocalRunner::default();
    let installer = AgentInstaller::new(&runner, settings.clone());
    let started = Instant::now();
    let result = installer.ensure(&release(), Privilege::Deploy).await;

    holder.kill().unwrap();
    holder.wait().unwrap();

    match result {
        Err(ShipError::LockTimeoutError { path, timeout }) => {
            assert_eq!(PathBuf::from(path), lock.path());
            assert_eq!(timeout, Duration::from_secs(1));
        }
        other => panic!("expected a lock timeout, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!settings.deploy_dir.join(VERSION).join("ship-agent").exists());

    // the lock is free again once its holder is gone
    let agent = installer.ensure(&release(), Privilege::Deploy).await.unwrap();
    assert_eq!(agent.outcome, InstallOutcome::Installed);
}

#[tokio::test]
async fn test_guarded_script_exiting_with_conflict_code_is_not_a_timeout() {
    if which::which("flock").is_err() {
        eprintln!("flock not available, skipping");
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let lock = InstallLock::new(tmp.path().join("install.lock"), Duration::from_secs(1));
    let cmd = lock.guard("echo fetching\nexit 75", Vec::<String>::new());

    let runner = LocalRunner::default();
    let output = runner.execute(&cmd, Capture::Piped).await.unwrap();
    assert_eq!(output.code, Some(75));

    match lock.check(output, &cmd) {
        Err(ShipError::RemoteCommandError { code, .. }) => assert_eq!(code, Some(75)),
        other => panic!("expected a command error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_dev_version_is_content_addressed() {
    let tmp = tempfile::tempdir().unwrap();
    let a = tmp.path().join("a");
    let b = tmp.path().join("b");
    fs::write(&a, b"agent build one").unwrap();
    fs::write(&b, b"agent build two").unwrap();

    let version = dev_version(&a).await.unwrap();
    assert!(version.starts_with("dev-"));
    assert_eq!(version.len(), "dev-".len() + 12);
    assert!(version["dev-".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(version, dev_version(&a).await.unwrap());
    assert_ne!(version, dev_version(&b).await.unwrap());
}
