//! Settings file management

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info};

use crate::errors::ShipError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Settings file read when no `--config` is given
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/ship/settings.json";

/// Ship settings, shared by the client and the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory for rolling log files; stderr only when absent
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Root of every application's release tree on the target
    #[serde(default = "default_apps_root")]
    pub apps_root: PathBuf,

    /// Unprivileged identity that owns releases
    #[serde(default = "default_deploy_user")]
    pub deploy_user: String,

    /// Permission bits for shared state
    #[serde(default)]
    pub permissions: PermissionPolicy,

    /// Firewall policy
    #[serde(default)]
    pub firewall: FirewallSettings,

    /// System packages
    #[serde(default)]
    pub packages: PackageSettings,

    /// Reverse proxy
    #[serde(default)]
    pub proxy: ProxySettings,

    /// Node.js runtime
    #[serde(default)]
    pub runtime: RuntimeSettings,

    /// Remote executor installation
    #[serde(default)]
    pub agent: AgentSettings,
}

fn default_true() -> bool {
    true
}

fn default_apps_root() -> PathBuf {
    PathBuf::from("/home/deploy/apps")
}

fn default_deploy_user() -> String {
    "deploy".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_dir: None,
            apps_root: default_apps_root(),
            deploy_user: default_deploy_user(),
            permissions: PermissionPolicy::default(),
            firewall: FirewallSettings::default(),
            packages: PackageSettings::default(),
            proxy: ProxySettings::default(),
            runtime: RuntimeSettings::default(),
            agent: AgentSettings::default(),
        }
    }
}

impl Settings {
    /// Load from `path`, or from [`DEFAULT_SETTINGS_PATH`] if it exists, or fall
    /// back to defaults
    pub async fn load(path: Option<&Path>) -> Result<Self, ShipError> {
        let settings = match path {
            Some(path) => {
                let file = File::new(path);
                if !file.exists().await {
                    return Err(ShipError::ConfigError(format!(
                        "Settings file not found: {}",
                        path.display()
                    )));
                }
                info!("Loading settings from {}", path.display());
                file.read_json::<Settings>().await?
            }
            None => {
                let file = File::new(DEFAULT_SETTINGS_PATH);
                if file.exists().await {
                    info!("Loading settings from {}", DEFAULT_SETTINGS_PATH);
                    file.read_json::<Settings>().await?
                } else {
                    debug!("No settings file, using defaults");
                    Settings::default()
                }
            }
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that would produce broken commands on the target
    pub fn validate(&self) -> Result<(), ShipError> {
        if self.deploy_user.is_empty() {
            return Err(ShipError::ConfigError("deploy_user must not be empty".to_string()));
        }
        if !self.apps_root.is_absolute() {
            return Err(ShipError::ConfigError(format!(
                "apps_root must be absolute, got {}",
                self.apps_root.display()
            )));
        }
        if let Some(port) = self.firewall.allowed_tcp_ports.iter().find(|p| **p == 0) {
            return Err(ShipError::ConfigError(format!(
                "allowed_tcp_ports contains invalid port {}",
                port
            )));
        }
        if !self.agent.release_url_template.contains("{version}") {
            return Err(ShipError::ConfigError(
                "agent.release_url_template must contain {version}".to_string(),
            ));
        }
        check_url(
            "agent.release_url_template",
            &self.agent.release_url_template.replace("{version}", "0.0.0"),
        )?;
        check_url("proxy.tags_url", &self.proxy.tags_url)?;
        Ok(())
    }
}

fn check_url(field: &str, value: &str) -> Result<(), ShipError> {
    let url = url::Url::parse(value)
        .map_err(|e| ShipError::ConfigError(format!("{} is not a valid URL: {}", field, e)))?;
    match url.scheme() {
        "http" | "https" | "file" => Ok(()),
        scheme => Err(ShipError::ConfigError(format!(
            "{} has unsupported scheme {}",
            field, scheme
        ))),
    }
}

/// Unix permission bits, written as an octal string such as `"0750"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileMode(u32);

impl FileMode {
    pub const fn new(bits: u32) -> Self {
        Self(bits & 0o7777)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn parse(s: &str) -> Result<Self, ShipError> {
        let digits = s.trim();
        let digits = digits.strip_prefix("0o").unwrap_or(digits);
        if digits.is_empty() || digits.len() > 4 {
            return Err(ShipError::ConfigError(format!("Invalid file mode: {:?}", s)));
        }
        u32::from_str_radix(digits, 8)
            .map(FileMode)
            .map_err(|_| ShipError::ConfigError(format!("Invalid file mode: {:?}", s)))
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

impl Serialize for FileMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FileMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        FileMode::parse(&s).map_err(de::Error::custom)
    }
}

/// Permission bits applied to app-scoped shared state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionPolicy {
    /// `<app>/volumes` and every named volume below it
    #[serde(default = "default_volumes_dir_mode")]
    pub volumes_dir: FileMode,

    /// `<app>/secrets`
    #[serde(default = "default_secrets_dir_mode")]
    pub secrets_dir: FileMode,

    /// Each file in `<app>/secrets`
    #[serde(default = "default_secret_file_mode")]
    pub secret_file: FileMode,
}

fn default_volumes_dir_mode() -> FileMode {
    FileMode::new(0o750)
}

fn default_secrets_dir_mode() -> FileMode {
    FileMode::new(0o700)
}

fn default_secret_file_mode() -> FileMode {
    FileMode::new(0o600)
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self {
            volumes_dir: default_volumes_dir_mode(),
            secrets_dir: default_secrets_dir_mode(),
            secret_file: default_secret_file_mode(),
        }
    }
}

/// Firewall policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallSettings {
    /// TCP ports that must stay reachable
    #[serde(default = "default_allowed_tcp_ports")]
    pub allowed_tcp_ports: Vec<u16>,

    /// Delete allow rules that are not in `allowed_tcp_ports`
    #[serde(default = "default_true")]
    pub prune_unmanaged: bool,
}

fn default_allowed_tcp_ports() -> Vec<u16> {
    vec![22, 80, 443]
}

impl Default for FirewallSettings {
    fn default() -> Self {
        Self {
            allowed_tcp_ports: default_allowed_tcp_ports(),
            prune_unmanaged: true,
        }
    }
}

/// System packages installed on bootstrap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSettings {
    #[serde(default = "default_packages")]
    pub install: Vec<String>,

    /// Run `upgrade` and `dist-upgrade` before installing
    #[serde(default = "default_true")]
    pub upgrade: bool,
}

fn default_packages() -> Vec<String> {
    ["ca-certificates", "curl", "fail2ban", "jq", "tree", "ufw", "unzip"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for PackageSettings {
    fn default() -> Self {
        Self {
            install: default_packages(),
            upgrade: true,
        }
    }
}

/// Shared Caddy reverse proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Directory holding the proxy's compose file, Caddyfile and sites
    #[serde(default = "default_proxy_root")]
    pub root_dir: PathBuf,

    /// Pinned Caddy version; the latest release of `major` when absent
    #[serde(default)]
    pub version: Option<String>,

    #[serde(default = "default_proxy_major")]
    pub major: String,

    /// Docker Hub tag listing used to discover the latest version
    #[serde(default = "default_proxy_tags_url")]
    pub tags_url: String,
}

fn default_proxy_root() -> PathBuf {
    PathBuf::from("/opt/ship/caddy")
}

fn default_proxy_major() -> String {
    "2".to_string()
}

fn default_proxy_tags_url() -> String {
    "https://hub.docker.com/v2/repositories/library/caddy/tags?page_size=100&ordering=last_updated"
        .to_string()
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            root_dir: default_proxy_root(),
            version: None,
            major: default_proxy_major(),
            tags_url: default_proxy_tags_url(),
        }
    }
}

/// Node.js runtime installed through nvm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    #[serde(default = "default_nvm_version")]
    pub nvm_version: String,

    /// Argument to `nvm install`
    #[serde(default = "default_node_version")]
    pub node_version: String,

    #[serde(default = "default_global_npm_packages")]
    pub global_npm_packages: Vec<String>,
}

fn default_nvm_version() -> String {
    "v0.40.3".to_string()
}

fn default_node_version() -> String {
    "--lts".to_string()
}

fn default_global_npm_packages() -> Vec<String> {
    vec!["npm@latest".to_string()]
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            nvm_version: default_nvm_version(),
            node_version: default_node_version(),
            global_npm_packages: default_global_npm_packages(),
        }
    }
}

/// Where and how the remote executor is installed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Install root for the deploy identity
    #[serde(default = "default_agent_deploy_dir")]
    pub deploy_dir: PathBuf,

    /// Install root for root
    #[serde(default = "default_agent_root_dir")]
    pub root_dir: PathBuf,

    /// Directory holding the install lock files
    #[serde(default = "default_agent_lock_dir")]
    pub lock_dir: PathBuf,

    /// How long to wait for the install lock
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    /// Download URL of a released agent; `{version}` is substituted
    #[serde(default = "default_release_url_template")]
    pub release_url_template: String,

    /// Target triple for development builds
    #[serde(default = "default_dev_target")]
    pub dev_target: String,
}

fn default_agent_deploy_dir() -> PathBuf {
    PathBuf::from("/home/deploy/.ship")
}

fn default_agent_root_dir() -> PathBuf {
    PathBuf::from("/root/.ship")
}

fn default_agent_lock_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_lock_timeout_secs() -> u64 {
    5
}

fn default_release_url_template() -> String {
    "https://github.com/ship-rs/ship/releases/download/v{version}/ship-agent-linux-amd64.tar.gz"
        .to_string()
}

fn default_dev_target() -> String {
    "x86_64-unknown-linux-musl".to_string()
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            deploy_dir: default_agent_deploy_dir(),
            root_dir: default_agent_root_dir(),
            lock_dir: default_agent_lock_dir(),
            lock_timeout_secs: default_lock_timeout_secs(),
            release_url_template: default_release_url_template(),
            dev_target: default_dev_target(),
        }
    }
}
