//! Command line options for the client and the agent

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::exec::ssh::SshTarget;
use crate::installer::AgentSource;
use crate::logs::LogLevel;

/// Options accepted by every subcommand of both binaries
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalOptions {
    /// Settings file; defaults to /etc/ship/settings.json when present
    #[arg(long, global = true, env = "SHIP_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Overrides the configured log level
    #[arg(long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Operator-side CLI
#[derive(Debug, Parser)]
#[command(name = "ship", version, about = "Provision machines and ship containerized apps")]
pub struct ClientCli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: ClientCommand,
}

#[derive(Debug, Subcommand)]
pub enum ClientCommand {
    /// Converge a machine
    #[command(subcommand)]
    Machine(MachineCommand),

    /// Release a project directory as a new app version
    Deploy(DeployOptions),

    /// Manage app secrets
    #[command(subcommand)]
    Secret(SecretCommand),
}

impl ClientCommand {
    /// Subcommand path, for error reports
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::Machine(MachineCommand::Up { .. }) => "machine up",
            ClientCommand::Machine(MachineCommand::Maintain { .. }) => "machine maintain",
            ClientCommand::Deploy(_) => "deploy",
            ClientCommand::Secret(SecretCommand::Set { .. }) => "secret set",
            ClientCommand::Secret(SecretCommand::Del { .. }) => "secret del",
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum MachineCommand {
    /// Bootstrap packages, firewall, hardening, docker, proxy and runtime
    Up {
        #[command(flatten)]
        connection: ConnectionOptions,
    },

    /// Upgrade packages and prune unused docker data
    Maintain {
        #[command(flatten)]
        connection: ConnectionOptions,

        /// Reboot one minute later if the machine requires it
        #[arg(long)]
        allow_reboot: bool,
    },
}

#[derive(Debug, Args)]
pub struct DeployOptions {
    #[command(flatten)]
    pub connection: ConnectionOptions,

    #[command(flatten)]
    pub release: ReleaseOptions,

    /// Directory to archive
    #[arg(long, default_value = ".", value_name = "DIR")]
    pub project_dir: PathBuf,
}

/// Identifiers of one release
#[derive(Debug, Clone, Args)]
pub struct ReleaseOptions {
    #[arg(long)]
    pub app_name: String,

    #[arg(long)]
    pub app_version: String,

    /// Named volume to provision; may be repeated
    #[arg(long = "volume-name", value_name = "NAME")]
    pub volume_names: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum SecretCommand {
    /// Create or replace a secret. The value is read from SHIP_SECRET_VALUE or stdin.
    Set {
        #[command(flatten)]
        connection: ConnectionOptions,

        #[command(flatten)]
        secret: SecretOptions,
    },

    /// Remove a secret
    Del {
        #[command(flatten)]
        connection: ConnectionOptions,

        #[command(flatten)]
        secret: SecretOptions,
    },
}

#[derive(Debug, Clone, Args)]
pub struct SecretOptions {
    #[arg(long)]
    pub app_name: String,

    #[arg(long)]
    pub secret_name: String,
}

/// How to reach the target machine
#[derive(Debug, Clone, Args)]
pub struct ConnectionOptions {
    #[arg(long, env = "SHIP_HOST")]
    pub host: String,

    #[arg(long, default_value_t = 22)]
    pub port: u16,

    #[arg(long, default_value = "deploy")]
    pub user: String,

    #[arg(long, env = "SHIP_SSH_PRIVATE_KEY", value_name = "PATH")]
    pub ssh_private_key: Option<PathBuf>,

    /// Seconds to wait for the connection
    #[arg(long, default_value_t = 10, value_name = "SECS")]
    pub connect_timeout: u64,

    /// Build ship-agent from this workspace instead of downloading a release
    #[arg(long, value_name = "WORKSPACE")]
    pub dev_agent: Option<PathBuf>,
}

impl ConnectionOptions {
    pub fn target(&self) -> SshTarget {
        SshTarget {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            identity: self.ssh_private_key.clone(),
            connect_timeout_secs: self.connect_timeout,
        }
    }

    /// The released agent matching this client, unless a workspace was given
    pub fn agent_source(&self, client_version: &str) -> AgentSource {
        match &self.dev_agent {
            Some(workspace) => AgentSource::Dev {
                workspace: workspace.clone(),
            },
            None => AgentSource::Release {
                version: client_version.to_string(),
            },
        }
    }
}

/// Remote executor CLI, invoked by the client over the connection
#[derive(Debug, Parser)]
#[command(name = "ship-agent", version, about = "Converge this machine and activate releases")]
pub struct AgentCli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: AgentCommand,
}

#[derive(Debug, Subcommand)]
pub enum AgentCommand {
    /// Run the bootstrap plan on this machine
    Up,

    /// Run maintenance on this machine
    Maintain {
        #[arg(long)]
        allow_reboot: bool,
    },

    /// Activate an uploaded release
    Deploy(ReleaseOptions),

    /// Print version information as JSON
    Version,
}

impl AgentCommand {
    pub fn name(&self) -> &'static str {
        match self {
            AgentCommand::Up => "up",
            AgentCommand::Maintain { .. } => "maintain",
            AgentCommand::Deploy(_) => "deploy",
            AgentCommand::Version => "version",
        }
    }
}
