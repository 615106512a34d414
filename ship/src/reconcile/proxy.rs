//! Shared Caddy reverse proxy
//!
//! Caddy runs as a docker compose project in the proxy root. Apps drop their
//! site files into `sites-enabled/` and reload the running proxy.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::info;

use crate::errors::ShipError;
use crate::exec::{Cmd, CommandRunner};
use crate::reconcile::{ReconcileContext, Reconciler};
use crate::storage::layout::remote_path;
use crate::storage::settings::ProxySettings;

const CADDYFILE: &str = include_str!("../../assets/caddy/Caddyfile");
const COMPOSE_TEMPLATE: &str = include_str!("../../assets/caddy/compose.yml");

/// Docker network shared by the proxy and app containers
pub const PROXY_NETWORK: &str = "caddy";

/// Caddy's config path inside its container
pub const CONTAINER_CADDYFILE: &str = "/etc/caddy/Caddyfile";

/// Install and start the shared proxy
#[derive(Debug, Clone)]
pub struct ProxyInstall {
    pub root_dir: PathBuf,
    pub deploy_user: String,
    /// Exact version; discovered from `tags_url` when absent
    pub version: Option<String>,
    pub major: String,
    pub tags_url: String,
}

impl ProxyInstall {
    pub fn from_settings(settings: &ProxySettings, deploy_user: &str) -> Self {
        Self {
            root_dir: settings.root_dir.clone(),
            deploy_user: deploy_user.to_string(),
            version: settings.version.clone(),
            major: settings.major.clone(),
            tags_url: settings.tags_url.clone(),
        }
    }

    fn version_pattern(&self) -> Result<Regex, ShipError> {
        Regex::new(&format!(r"^{}\.[0-9]+\.[0-9]+$", regex::escape(&self.major)))
            .map_err(|e| ShipError::ConfigError(format!("invalid proxy major version: {}", e)))
    }

    async fn resolve_version(&self) -> Result<String, ShipError> {
        let pattern = self.version_pattern()?;
        if let Some(version) = &self.version {
            if !pattern.is_match(version) {
                return Err(ShipError::ConfigError(format!(
                    "proxy version {:?} is not a {}.x.y release",
                    version, self.major
                )));
            }
            return Ok(version.clone());
        }

        let page: TagPage = reqwest::get(&self.tags_url)
            .await?
            .error_for_status()?
            .json()
            .await?;
        latest_version(&page, &pattern).ok_or_else(|| {
            ShipError::PreconditionError(format!(
                "no Caddy {}.x.y release listed at {}",
                self.major, self.tags_url
            ))
        })
    }

    fn compose_file(version: &str) -> String {
        COMPOSE_TEMPLATE.replace("{{VERSION}}", version)
    }

    fn in_root(&self, cmd: Cmd) -> Cmd {
        cmd.current_dir(&self.root_dir)
    }
}

/// Docker Hub tag listing
#[derive(Debug, Deserialize)]
pub struct TagPage {
    #[serde(default)]
    pub results: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
pub struct Tag {
    pub name: String,
}

/// First tag matching `pattern`; listings are ordered newest first
pub fn latest_version(page: &TagPage, pattern: &Regex) -> Option<String> {
    page.results
        .iter()
        .map(|tag| tag.name.as_str())
        .find(|name| pattern.is_match(name))
        .map(String::from)
}

/// Write `contents` to `path` on the runner's machine
async fn write_remote_file(
    runner: &dyn CommandRunner,
    path: &Path,
    contents: &str,
) -> Result<(), ShipError> {
    let cmd = Cmd::sh(
        r#"tmp="$1.tmp.$$" && cat > "$tmp" && chmod 644 "$tmp" && mv -f "$tmp" "$1""#,
        [remote_path(path)],
    )
    .stdin(contents);
    runner.run(&cmd).await
}

#[async_trait]
impl Reconciler for ProxyInstall {
    fn name(&self) -> &str {
        "proxy"
    }

    async fn converge(&self, ctx: &mut ReconcileContext<'_>) -> Result<(), ShipError> {
        let runner = ctx.runner;
        let root = remote_path(&self.root_dir);

        for dir in ["", "data", "config"] {
            let path = if dir.is_empty() {
                root.clone()
            } else {
                remote_path(&self.root_dir.join(dir))
            };
            runner
                .run(&Cmd::new("install").args(["-d", "-m", "0755"]).arg(path))
                .await?;
        }
        runner
            .run(
                &Cmd::new("install")
                    .args(["-d", "-m", "0755", "-o"])
                    .arg(self.deploy_user.as_str())
                    .arg("-g")
                    .arg(self.deploy_user.as_str())
                    .arg(remote_path(&self.root_dir.join("sites-enabled"))),
            )
            .await?;

        let version = self.resolve_version().await?;
        info!("Using Caddy version: {}", version);

        write_remote_file(runner, &self.root_dir.join("Caddyfile"), CADDYFILE).await?;
        write_remote_file(
            runner,
            &self.root_dir.join("compose.yml"),
            &Self::compose_file(&version),
        )
        .await?;

        runner
            .run(&Cmd::sh(
                r#"docker network inspect "$1" >/dev/null 2>&1 || docker network create "$1""#,
                [PROXY_NETWORK],
            ))
            .await?;
        for args in [
            vec!["compose", "pull"],
            vec!["compose", "up", "-d"],
            vec!["compose", "exec", "-T", "caddy", "caddy", "version"],
        ] {
            runner.run(&self.in_root(Cmd::new("docker").args(args))).await?;
        }
        Ok(())
    }
}
