//! Release staging, cutover and upload against a temporary apps root

use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ship::cancel::Cancellation;
use ship::errors::ShipError;
use ship::exec::local::LocalRunner;
use ship::exec::testing::{exit, ok, ScriptedRunner};
use ship::installer::{AgentInstaller, RemoteAgent};
use ship::release::archive::write_archive;
use ship::release::manager::ReleaseManager;
use ship::release::stage::ReleaseStager;
use ship::release::state::ReleaseState;
use ship::release::ReleaseRequest;
use ship::storage::layout::AppLayout;
use ship::storage::settings::{PermissionPolicy, Settings};
use tempfile::TempDir;

struct Fixture {
    tmp: TempDir,
    layout: AppLayout,
}

impl Fixture {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let layout = AppLayout::new(tmp.path().join("apps"));
        Self { tmp, layout }
    }

    /// A project with a compose file, a nested dir and git metadata
    fn project(&self) -> PathBuf {
        let root = self.tmp.path().join("project");
        fs::create_dir_all(root.join("public")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("compose.yml"), "services: {}\n").unwrap();
        fs::write(root.join("public/index.html"), "<h1>shop</h1>\n").unwrap();
        fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
        root
    }

    /// Place an archive of the project where the client would upload it
    fn upload(&self, request: &ReleaseRequest) {
        let project = self.project();
        fs::create_dir_all(self.layout.version_dir(&request.app, &request.version)).unwrap();
        write_archive(
            &project,
            &self.layout.archive_path(&request.app, &request.version),
            &Cancellation::new(),
        )
        .unwrap();
    }

    fn stager<'a>(&self, runner: &'a ScriptedRunner) -> ReleaseStager<'a> {
        ReleaseStager {
            runner,
            layout: self.layout.clone(),
            permissions: PermissionPolicy::default(),
            proxy_root: self.tmp.path().join("proxy"),
        }
    }

    /// Make `version` the live release without going through staging
    fn make_live(&self, request: &ReleaseRequest) {
        let dir = self.layout.version_dir(&request.app, &request.version);
        fs::create_dir_all(&dir).unwrap();
        std::os::unix::fs::symlink(&dir, self.layout.current_link(&request.app)).unwrap();
    }
}

fn agent() -> RemoteAgent {
    RemoteAgent::new("ship-agent", "/home/deploy/.ship/.settings-test.json")
}

fn mode(path: &Path) -> u32 {
    fs::metadata(path).unwrap().permissions().mode() & 0o7777
}

#[tokio::test]
async fn test_successful_release_cuts_over_and_links_shared_state() {
    let fixture = Fixture::new();
    let request = ReleaseRequest::parse("shop", "v3", &["uploads"]).unwrap();
    fixture.upload(&request);
    let (app, version) = (&request.app, &request.version);
    let layout = &fixture.layout;

    let runner = ScriptedRunner::succeeding();
    let state = fixture.stager(&runner).stage(&request).await.unwrap();
    assert_eq!(state, ReleaseState::ServicesRunning);

    let version_dir = layout.version_dir(app, version);
    assert_eq!(fs::read_link(layout.current_link(app)).unwrap(), version_dir);
    assert_eq!(
        fs::canonicalize(layout.current_link(app)).unwrap(),
        fs::canonicalize(layout.app_dir(app).join("v3")).unwrap()
    );

    let linked = fs::metadata(layout.secrets_link(app, version)).unwrap();
    let shared = fs::metadata(layout.secrets_root(app)).unwrap();
    assert_eq!(linked.ino(), shared.ino());
    assert_eq!(linked.dev(), shared.dev());
    assert_eq!(
        fs::canonicalize(layout.volumes_link(app, version)).unwrap(),
        fs::canonicalize(layout.volumes_root(app)).unwrap()
    );

    assert_eq!(mode(&layout.secrets_root(app)), 0o700);
    assert_eq!(mode(&layout.volumes_root(app)), 0o750);
    let uploads = layout.volume_dir(app, &request.volumes[0]);
    assert!(uploads.is_dir());
    assert_eq!(mode(&uploads), 0o750);

    assert!(version_dir.join("public/index.html").is_file());
    assert!(!version_dir.join(".git").exists());
    assert!(!layout.archive_path(app, version).exists());

    let lines = runner.lines();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("pull"));
    assert!(lines[1].ends_with("build --build-arg VERSION=v3"));
    assert!(lines[2].ends_with("up -d --remove-orphans"));
    assert!(runner.commands().iter().all(|c| c.env.iter().any(|(k, v)| k == "VERSION" && v == "v3")));
}

#[tokio::test]
async fn test_populated_version_dir_is_rejected_and_current_kept() {
    let fixture = Fixture::new();
    let live = ReleaseRequest::parse::<&str>("shop", "v1", &[]).unwrap();
    fixture.make_live(&live);

    let request = ReleaseRequest::parse::<&str>("shop", "v2", &[]).unwrap();
    fixture.upload(&request);
    let version_dir = fixture.layout.version_dir(&request.app, &request.version);
    fs::write(version_dir.join("index.html"), "stale").unwrap();

    let runner = ScriptedRunner::succeeding();
    let err = fixture.stager(&runner).stage(&request).await.unwrap_err();

    assert!(matches!(err, ShipError::PreconditionError(_)), "{err}");
    assert_eq!(
        fs::read_link(fixture.layout.current_link(&request.app)).unwrap(),
        fixture.layout.version_dir(&live.app, &live.version)
    );
    assert!(runner.commands().is_empty());
}

#[tokio::test]
async fn test_missing_archive_is_a_precondition_error() {
    let fixture = Fixture::new();
    let request = ReleaseRequest::parse::<&str>("shop", "v4", &[]).unwrap();
    fs::create_dir_all(fixture.layout.version_dir(&request.app, &request.version)).unwrap();

    let runner = ScriptedRunner::succeeding();
    let err = fixture.stager(&runner).stage(&request).await.unwrap_err();
    match err {
        ShipError::PreconditionError(message) => assert!(message.contains("not found")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_corrupt_archive_leaves_the_upload_retryable() {
    let fixture = Fixture::new();
    let live = ReleaseRequest::parse::<&str>("shop", "v1", &[]).unwrap();
    fixture.make_live(&live);

    let request = ReleaseRequest::parse::<&str>("shop", "v2", &[]).unwrap();
    let version_dir = fixture.layout.version_dir(&request.app, &request.version);
    fs::create_dir_all(&version_dir).unwrap();
    fs::write(fixture.layout.archive_path(&request.app, &request.version), "not a zip").unwrap();

    let runner = ScriptedRunner::succeeding();
    assert!(fixture.stager(&runner).stage(&request).await.is_err());

    let entries: Vec<String> = fs::read_dir(&version_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec!["archive.zip"]);
    assert_eq!(
        fs::read_link(fixture.layout.current_link(&request.app)).unwrap(),
        fixture.layout.version_dir(&live.app, &live.version)
    );
}

#[tokio::test]
async fn test_service_failure_after_cutover_stays_live() {
    let fixture = Fixture::new();
    let request = ReleaseRequest::parse::<&str>("shop", "v5", &[]).unwrap();
    fixture.upload(&request);

    let runner = ScriptedRunner::new(|cmd| {
        if cmd.args.iter().any(|a| a == "pull") {
            exit(1, "manifest unknown")
        } else {
            ok("")
        }
    });
    let err = fixture.stager(&runner).stage(&request).await.unwrap_err();

    assert!(matches!(err, ShipError::RemoteCommandError { .. }));
    assert_eq!(
        fs::read_link(fixture.layout.current_link(&request.app)).unwrap(),
        fixture.layout.version_dir(&request.app, &request.version)
    );
}

#[tokio::test]
async fn test_site_file_is_published_to_the_proxy() {
    let fixture = Fixture::new();
    let request = ReleaseRequest::parse::<&str>("shop", "v6", &[]).unwrap();
    let project = fixture.project();
    fs::remove_file(project.join("compose.yml")).unwrap();
    fs::write(project.join("Caddyfile"), "shop.example.com {\n}\n").unwrap();
    fs::create_dir_all(fixture.layout.version_dir(&request.app, &request.version)).unwrap();
    write_archive(
        &project,
        &fixture.layout.archive_path(&request.app, &request.version),
        &Cancellation::new(),
    )
    .unwrap();

    let runner = ScriptedRunner::succeeding();
    let state = fixture.stager(&runner).stage(&request).await.unwrap();

    // no compose file, so services were never started
    assert_eq!(state, ReleaseState::Current);
    let published = fixture.tmp.path().join("proxy/sites-enabled/shop");
    assert_eq!(fs::read_to_string(&published).unwrap(), "shop.example.com {\n}\n");
    assert_eq!(mode(&published), 0o644);
    assert_eq!(runner.lines().len(), 1);
    assert!(runner.lines()[0].contains("caddy reload --config /etc/caddy/Caddyfile"));
}

#[tokio::test]
async fn test_client_uploads_verifies_and_activates() {
    if which::which("sha256sum").is_err() {
        eprintln!("sha256sum not available, skipping");
        return;
    }
    let fixture = Fixture::new();
    let project = fixture.project();
    let request = ReleaseRequest::parse("shop", "v3", &["uploads", "db"]).unwrap();

    let agent = fixture.tmp.path().join("ship-agent");
    fs::write(
        &agent,
        "#!/bin/sh\nprintf '%s\\n' \"$@\" > \"$(dirname \"$0\")/agent-args\"\n",
    )
    .unwrap();
    fs::set_permissions(&agent, fs::Permissions::from_mode(0o755)).unwrap();

    let runner = LocalRunner::default();
    let manager = ReleaseManager::new(
        &runner,
        fixture.layout.clone(),
        RemoteAgent::new(agent.to_string_lossy(), "/etc/ship/client.json"),
        Cancellation::new(),
    );
    manager.deploy(&project, &request).await.unwrap();

    let archive = fixture.layout.archive_path(&request.app, &request.version);
    assert!(archive.is_file());
    assert_eq!(mode(&archive), 0o644);

    let args = fs::read_to_string(fixture.tmp.path().join("agent-args")).unwrap();
    assert_eq!(
        args.lines().collect::<Vec<_>>(),
        vec![
            "deploy",
            "--app-name",
            "shop",
            "--app-version",
            "v3",
            "--volume-name",
            "db",
            "--volume-name",
            "uploads",
            "--config",
            "/etc/ship/client.json"
        ]
    );

    let staged = ScriptedRunner::succeeding();
    let state = fixture.stager(&staged).stage(&request).await.unwrap();
    assert_eq!(state, ReleaseState::ServicesRunning);
    assert_eq!(
        fs::read_link(fixture.layout.current_link(&request.app)).unwrap(),
        fixture.layout.version_dir(&request.app, &request.version)
    );

    let err = manager.deploy(&project, &request).await.unwrap_err();
    assert!(matches!(err, ShipError::PreconditionError(_)));
}

#[tokio::test]
async fn test_release_lands_under_the_configured_apps_root() {
    if which::which("sha256sum").is_err() {
        eprintln!("sha256sum not available, skipping");
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let project = tmp.path().join("project");
    fs::create_dir_all(project.join("public")).unwrap();
    fs::write(project.join("public/index.html"), "<h1>shop</h1>\n").unwrap();

    let mut settings = Settings::default();
    settings.apps_root = tmp.path().join("custom-apps");
    settings.agent.deploy_dir = tmp.path().join("agent");
    settings.proxy.root_dir = tmp.path().join("proxy");
    let layout = AppLayout::new(&settings.apps_root);
    let request = ReleaseRequest::parse("shop", "v3", &["uploads"]).unwrap();

    // the real agent binary, reading only the settings it is handed
    let runner = LocalRunner::default();
    let installer = AgentInstaller::new(&runner, settings.agent.clone());
    let config = installer.push_settings(&settings).await.unwrap();
    assert_eq!(mode(Path::new(&config)), 0o600);
    let agent = RemoteAgent::new(env!("CARGO_BIN_EXE_ship-agent"), config);

    ReleaseManager::new(&runner, layout.clone(), agent.clone(), Cancellation::new())
        .deploy(&project, &request)
        .await
        .unwrap();
    installer.discard(&agent).await;

    let version_dir = layout.version_dir(&request.app, &request.version);
    assert_eq!(fs::read_link(layout.current_link(&request.app)).unwrap(), version_dir);
    assert!(version_dir.join("public/index.html").is_file());
    assert!(!layout.archive_path(&request.app, &request.version).exists());
    assert!(layout.volume_dir(&request.app, &request.volumes[0]).is_dir());
    assert!(!Path::new(&agent.config).exists());
}

#[tokio::test]
async fn test_client_preflight_refuses_existing_deployment() {
    let fixture = Fixture::new();
    let project = fixture.project();
    let request = ReleaseRequest::parse::<&str>("shop", "v2", &[]).unwrap();

    let runner = ScriptedRunner::new(|cmd| {
        if cmd.program == "sh" {
            ok("archive.zip\nindex.html\n")
        } else {
            ok("")
        }
    });
    let manager = ReleaseManager::new(&runner, fixture.layout.clone(), agent(), Cancellation::new());
    let err = manager.deploy(&project, &request).await.unwrap_err();

    assert!(matches!(err, ShipError::PreconditionError(_)));
    assert_eq!(runner.commands().len(), 1);
    assert!(runner.copies().is_empty());
}

#[tokio::test]
async fn test_client_detects_checksum_mismatch() {
    let fixture = Fixture::new();
    let project = fixture.project();
    let request = ReleaseRequest::parse::<&str>("shop", "v2", &[]).unwrap();

    let listings = Arc::new(AtomicUsize::new(0));
    let seen = listings.clone();
    let runner = ScriptedRunner::new(move |cmd| match cmd.program.as_str() {
        "sh" if seen.fetch_add(1, Ordering::SeqCst) == 0 => ok(""),
        "sh" => ok("archive.zip\n"),
        "sha256sum" => ok("deadbeef  archive.zip\n"),
        _ => ok(""),
    });
    let manager = ReleaseManager::new(&runner, fixture.layout.clone(), agent(), Cancellation::new());
    let err = manager.deploy(&project, &request).await.unwrap_err();

    assert!(matches!(err, ShipError::TransportError(_)), "{err}");
    assert_eq!(listings.load(Ordering::SeqCst), 2);
    assert_eq!(runner.copies().len(), 1);
    assert!(!runner.lines().iter().any(|l| l.contains("deploy")));

    // the local archive is released even though the release failed
    let (local_archive, _, _) = &runner.copies()[0];
    assert!(!local_archive.exists());
}

#[test]
fn test_archive_skips_git_and_itself() {
    let fixture = Fixture::new();
    let project = fixture.project();
    let dest = project.join("archive.zip");

    let entries = write_archive(&project, &dest, &Cancellation::new()).unwrap();

    let archive = zip::ZipArchive::new(fs::File::open(&dest).unwrap()).unwrap();
    let mut names: Vec<&str> = archive.file_names().collect();
    names.sort_unstable();
    assert_eq!(names, vec!["compose.yml", "public/", "public/index.html"]);
    assert_eq!(entries, 3);
}

#[test]
fn test_cancelled_archive_stops() {
    let fixture = Fixture::new();
    let project = fixture.project();
    let cancel = Cancellation::new();
    cancel.cancel();

    let err = write_archive(&project, &fixture.tmp.path().join("out.zip"), &cancel).unwrap_err();
    assert!(matches!(err, ShipError::Cancelled));
}
