//! App secrets: plain files with restrictive permissions in the shared secrets root

use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::errors::ShipError;
use crate::exec::{Cmd, CommandRunner};
use crate::release::ident::{AppName, SecretName};
use crate::storage::layout::{remote_path, AppLayout};
use crate::storage::settings::PermissionPolicy;

/// The value arrives on stdin and never appears on a command line.
const SET_SCRIPT: &str = r#"set -e
umask 077
mkdir -p "$1"
chmod "$3" "$1"
tmp=$(mktemp "$1/.$2.XXXXXX")
trap 'rm -f "$tmp"' EXIT
cat > "$tmp"
chmod "$4" "$tmp"
mv -f "$tmp" "$1/$2"
trap - EXIT"#;

/// Writes and removes secrets of any app on one machine
pub struct SecretStore<'a> {
    runner: &'a dyn CommandRunner,
    layout: AppLayout,
    permissions: PermissionPolicy,
}

impl<'a> SecretStore<'a> {
    pub fn new(runner: &'a dyn CommandRunner, layout: AppLayout, permissions: PermissionPolicy) -> Self {
        Self {
            runner,
            layout,
            permissions,
        }
    }

    /// Create or replace a secret atomically
    pub async fn set(
        &self,
        app: &AppName,
        name: &SecretName,
        value: &SecretString,
    ) -> Result<(), ShipError> {
        let cmd = Cmd::sh(
            SET_SCRIPT,
            [
                remote_path(&self.layout.secrets_root(app)),
                name.to_string(),
                self.permissions.secrets_dir.to_string(),
                self.permissions.secret_file.to_string(),
            ],
        )
        .stdin(value.expose_secret().as_bytes());
        self.runner.run(&cmd).await?;
        info!("Secret {} set for {}", name, app);
        Ok(())
    }

    /// Remove a secret; removing a missing secret succeeds
    pub async fn delete(&self, app: &AppName, name: &SecretName) -> Result<(), ShipError> {
        let cmd = Cmd::new("rm")
            .arg("-f")
            .arg(remote_path(&self.layout.secret_file(app, name)));
        self.runner.run(&cmd).await?;
        info!("Secret {} deleted for {}", name, app);
        Ok(())
    }
}
