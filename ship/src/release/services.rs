//! Services that depend on a release: its compose project and the shared proxy

use std::path::{Path, PathBuf};

use tracing::info;

use crate::errors::ShipError;
use crate::exec::{Cmd, CommandRunner};
use crate::filesys::file::File;
use crate::reconcile::proxy::CONTAINER_CADDYFILE;
use crate::release::ident::{AppName, ReleaseVersion};
use crate::storage::settings::FileMode;

/// Compose file names looked up in a release, in order
pub const COMPOSE_FILES: &[&str] = &["compose.yml", "compose.yaml"];

/// Site file name looked up in a release
pub const SITE_FILE: &str = "Caddyfile";

async fn find_compose_file(version_dir: &Path) -> Option<PathBuf> {
    for name in COMPOSE_FILES {
        let path = version_dir.join(name);
        if File::new(&path).is_file().await {
            return Some(path);
        }
    }
    None
}

/// Pull, build and start the release's compose project
///
/// Returns `false` when the release has no compose file.
pub async fn restart_compose(
    runner: &dyn CommandRunner,
    version_dir: &Path,
    version: &ReleaseVersion,
) -> Result<bool, ShipError> {
    let Some(compose_file) = find_compose_file(version_dir).await else {
        info!("No compose file in {}, skipping services", version_dir.display());
        return Ok(false);
    };
    let file = compose_file.to_string_lossy().into_owned();

    let compose = |args: &[&str]| {
        Cmd::new("docker")
            .args(["compose", "-f", file.as_str()])
            .args(args.iter().copied())
            .env("VERSION", version.as_str())
            .current_dir(version_dir)
    };
    runner.run(&compose(&["pull"])).await?;
    runner
        .run(&compose(&["build", "--build-arg"]).arg(format!("VERSION={}", version)))
        .await?;
    runner.run(&compose(&["up", "-d", "--remove-orphans"])).await?;
    Ok(true)
}

/// Publish the release's site file to the shared proxy and reload it
///
/// Returns `false` when the release has no site file.
pub async fn publish_site(
    runner: &dyn CommandRunner,
    version_dir: &Path,
    app: &AppName,
    proxy_root: &Path,
) -> Result<bool, ShipError> {
    let site = File::new(version_dir.join(SITE_FILE));
    if !site.is_file().await {
        info!("No {} in {}, skipping proxy", SITE_FILE, version_dir.display());
        return Ok(false);
    }

    let enabled = File::new(proxy_root.join("sites-enabled").join(app.as_str()));
    site.copy_to(&enabled, FileMode::new(0o644)).await?;
    info!("Published {} to {}", SITE_FILE, enabled.path().display());

    runner
        .run(
            &Cmd::new("docker")
                .args(["compose", "exec", "-T", "caddy", "caddy", "reload", "--config"])
                .arg(CONTAINER_CADDYFILE)
                .current_dir(proxy_root),
        )
        .await?;
    Ok(true)
}
