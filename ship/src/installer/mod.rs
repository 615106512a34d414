//! Remote executor installation
//!
//! Before any remote reconciliation or release, the target must have the
//! `ship-agent` matching this client at a fixed path. Installs are guarded by
//! an [`InstallLock`] per privilege level and skip when the binary is already
//! there, so concurrent invocations converge on one install.
//!
//! The agent never reads settings of its own: [`AgentInstaller::prepare`]
//! uploads the client's resolved settings and every invocation passes them
//! with `--config`.

pub mod lock;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::errors::ShipError;
use crate::exec::local::LocalRunner;
use crate::exec::{Capture, Cmd, CommandRunner, FileTransfer};
use crate::storage::layout::remote_path;
use crate::storage::settings::{AgentSettings, Settings};
use crate::utils::sha256_file;

pub use lock::InstallLock;

/// Binary name on the target
pub const AGENT_BINARY: &str = "ship-agent";

const INSTALLED_MARKER: &str = "ship-agent: installed";
const PRESENT_MARKER: &str = "ship-agent: present";

/// $1 install dir, $2 binary path, $3 download URL, $4 owner or empty
const DOWNLOAD_SCRIPT: &str = r#"set -e
if [ -x "$2" ]; then echo "ship-agent: present"; exit 0; fi
mkdir -p "$1"
tmp=$(mktemp -d "$1/.install.XXXXXX")
trap 'rm -rf "$tmp"' EXIT
curl -fsSL -o "$tmp/agent.tar.gz" "$3"
tar -xzf "$tmp/agent.tar.gz" -C "$tmp"
chmod 0755 "$tmp/ship-agent"
if [ -n "$4" ]; then chown "$4" "$tmp/ship-agent"; fi
mv -f "$tmp/ship-agent" "$2"
echo "ship-agent: installed""#;

/// $1 install dir, $2 binary path, $3 staged upload, $4 owner or empty
const PROMOTE_SCRIPT: &str = r#"set -e
trap 'rm -f "$3"' EXIT
if [ -x "$2" ]; then echo "ship-agent: present"; exit 0; fi
mkdir -p "$1"
tmp="$1/.ship-agent.$$"
cp "$3" "$tmp"
chmod 0755 "$tmp"
if [ -n "$4" ]; then chown "$4" "$tmp"; fi
mv -f "$tmp" "$2"
echo "ship-agent: installed""#;

/// $1 directory, $2 settings file; contents on stdin
const PUSH_SETTINGS_SCRIPT: &str = r#"mkdir -p "$1" && umask 077 && cat > "$2""#;

/// Identity the agent runs as on the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Privilege {
    /// Machine reconciliation
    Root,
    /// Releases and secrets
    Deploy,
}

impl Privilege {
    pub fn as_str(self) -> &'static str {
        match self {
            Privilege::Root => "root",
            Privilege::Deploy => "deploy",
        }
    }

    fn owner(self) -> &'static str {
        match self {
            Privilege::Root => "root:root",
            Privilege::Deploy => "",
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the agent comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentSource {
    /// A published release, downloaded on the target
    Release { version: String },
    /// Built from a local workspace and uploaded
    Dev { workspace: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InstallOutcome {
    /// This invocation installed the binary
    Installed,
    /// The binary was already there
    Present,
}

/// A usable agent on the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledAgent {
    pub path: String,
    pub version: String,
    pub outcome: InstallOutcome,
}

/// An installed agent together with the settings it runs with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAgent {
    pub path: String,
    /// Settings file on the target
    pub config: String,
}

impl RemoteAgent {
    pub fn new(path: impl Into<String>, config: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            config: config.into(),
        }
    }

    /// `<agent> <args> --config <settings>`
    pub fn command<I, S>(&self, args: I) -> Cmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Cmd::new(self.path.as_str())
            .args(args)
            .arg("--config")
            .arg(self.config.as_str())
    }
}

/// Ensures the agent is present on the machine behind `transport`
pub struct AgentInstaller<'a, T: CommandRunner + FileTransfer> {
    transport: &'a T,
    settings: AgentSettings,
}

impl<'a, T: CommandRunner + FileTransfer> AgentInstaller<'a, T> {
    pub fn new(transport: &'a T, settings: AgentSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    fn install_dir(&self, privilege: Privilege, version: &str) -> PathBuf {
        let root = match privilege {
            Privilege::Root => &self.settings.root_dir,
            Privilege::Deploy => &self.settings.deploy_dir,
        };
        root.join(version)
    }

    /// Path of the agent binary for `privilege` and `version`
    pub fn binary_path(&self, privilege: Privilege, version: &str) -> PathBuf {
        self.install_dir(privilege, version).join(AGENT_BINARY)
    }

    fn lock(&self, privilege: Privilege) -> InstallLock {
        InstallLock::for_privilege(
            &self.settings.lock_dir,
            privilege,
            Duration::from_secs(self.settings.lock_timeout_secs),
        )
    }

    pub async fn ensure(
        &self,
        source: &AgentSource,
        privilege: Privilege,
    ) -> Result<InstalledAgent, ShipError> {
        let agent = match source {
            AgentSource::Release { version } => self.ensure_release(version, privilege).await?,
            AgentSource::Dev { workspace } => self.ensure_dev(workspace, privilege).await?,
        };
        match agent.outcome {
            InstallOutcome::Installed => info!("Installed {} ({}) for {}", agent.path, agent.version, privilege),
            InstallOutcome::Present => info!("Using {} ({}) for {}", agent.path, agent.version, privilege),
        }
        Ok(agent)
    }

    /// Ensure the agent for `privilege` and hand it `settings`
    ///
    /// Call [`discard`](Self::discard) once the agent has run.
    pub async fn prepare(
        &self,
        source: &AgentSource,
        privilege: Privilege,
        settings: &Settings,
    ) -> Result<RemoteAgent, ShipError> {
        let agent = self.ensure(source, privilege).await?;
        let config = self.push_settings(settings).await?;
        Ok(RemoteAgent::new(agent.path, config))
    }

    /// Upload `settings` to a private file under the deploy install root
    ///
    /// Both identities can read it: the deploy agent owns it and the root agent
    /// runs through sudo. Returns the path on the target.
    pub async fn push_settings(&self, settings: &Settings) -> Result<String, ShipError> {
        // the log destination is a client-side path
        let forwarded = Settings {
            log_dir: None,
            ..settings.clone()
        };
        let dir = &self.settings.deploy_dir;
        let path = remote_path(&dir.join(format!(".settings-{}.json", uuid::Uuid::new_v4())));
        let cmd = Cmd::sh(PUSH_SETTINGS_SCRIPT, [remote_path(dir), path.clone()])
            .stdin(serde_json::to_vec_pretty(&forwarded)?);
        self.transport.run(&cmd).await?;
        Ok(path)
    }

    /// Remove the settings uploaded for `agent`
    pub async fn discard(&self, agent: &RemoteAgent) {
        let cmd = Cmd::new("rm").args(["-f", agent.config.as_str()]);
        if let Err(e) = self.transport.run(&cmd).await {
            warn!("Failed to remove {}: {}", agent.config, e);
        }
    }

    async fn ensure_release(
        &self,
        version: &str,
        privilege: Privilege,
    ) -> Result<InstalledAgent, ShipError> {
        let url = self.settings.release_url_template.replace("{version}", version);
        let path = remote_path(&self.binary_path(privilege, version));
        let cmd = self
            .lock(privilege)
            .guard(
                DOWNLOAD_SCRIPT,
                [
                    remote_path(&self.install_dir(privilege, version)),
                    path.clone(),
                    url,
                    privilege.owner().to_string(),
                ],
            )
            .sudo(privilege == Privilege::Root);
        let outcome = self.run_guarded(privilege, &cmd).await?;
        Ok(InstalledAgent {
            path,
            version: version.to_string(),
            outcome,
        })
    }

    async fn ensure_dev(
        &self,
        workspace: &Path,
        privilege: Privilege,
    ) -> Result<InstalledAgent, ShipError> {
        let binary = build_dev_agent(workspace, &self.settings.dev_target).await?;
        let version = dev_version(&binary).await?;
        let path = remote_path(&self.binary_path(privilege, &version));

        let probe = Cmd::new("test").args(["-x", path.as_str()]).sudo(privilege == Privilege::Root);
        if self.transport.status(&probe).await? == Some(0) {
            return Ok(InstalledAgent {
                path,
                version,
                outcome: InstallOutcome::Present,
            });
        }

        let staging_dir = remote_path(&self.settings.deploy_dir);
        let staged = remote_path(
            &self
                .settings
                .deploy_dir
                .join(format!(".staging-{}", uuid::Uuid::new_v4())),
        );
        self.transport
            .run(&Cmd::new("mkdir").arg("-p").arg(staging_dir))
            .await?;
        info!("Uploading development agent {}", version);
        self.transport.copy_file(&binary, &staged, 0o755).await?;

        let cmd = self
            .lock(privilege)
            .guard(
                PROMOTE_SCRIPT,
                [
                    remote_path(&self.install_dir(privilege, &version)),
                    path.clone(),
                    staged,
                    privilege.owner().to_string(),
                ],
            )
            .sudo(privilege == Privilege::Root);
        let outcome = self.run_guarded(privilege, &cmd).await?;
        Ok(InstalledAgent {
            path,
            version,
            outcome,
        })
    }

    async fn run_guarded(&self, privilege: Privilege, cmd: &Cmd) -> Result<InstallOutcome, ShipError> {
        let output = self.transport.execute(cmd, Capture::Piped).await?;
        let output = self.lock(privilege).check(output, cmd)?;
        parse_outcome(&output.stdout)
    }
}

fn parse_outcome(stdout: &str) -> Result<InstallOutcome, ShipError> {
    for line in stdout.lines().rev().map(str::trim) {
        if line == INSTALLED_MARKER {
            return Ok(InstallOutcome::Installed);
        }
        if line == PRESENT_MARKER {
            return Ok(InstallOutcome::Present);
        }
    }
    Err(ShipError::ParseError(format!(
        "installer did not report an outcome: {:?}",
        stdout.trim()
    )))
}

/// Build the agent for the target from a local workspace
pub async fn build_dev_agent(workspace: &Path, target: &str) -> Result<PathBuf, ShipError> {
    info!("Building {} for {}", AGENT_BINARY, target);
    LocalRunner::default()
        .run(
            &Cmd::new("cargo")
                .args(["build", "--release", "--bin", AGENT_BINARY, "--target", target])
                .current_dir(workspace),
        )
        .await?;
    Ok(workspace
        .join("target")
        .join(target)
        .join("release")
        .join(AGENT_BINARY))
}

/// Content-addressed version of a development build
pub async fn dev_version(binary: &Path) -> Result<String, ShipError> {
    let digest = sha256_file(binary).await?;
    Ok(format!("dev-{}", &digest[..12]))
}
