//! System package reconciler

use async_trait::async_trait;

use crate::errors::ShipError;
use crate::exec::Cmd;
use crate::reconcile::{ReconcileContext, Reconciler};
use crate::storage::settings::PackageSettings;

/// Packages that must be installed through apt
#[derive(Debug, Clone)]
pub struct PackageSet {
    pub packages: Vec<String>,
    /// Upgrade installed packages first
    pub upgrade: bool,
}

impl PackageSet {
    pub fn from_settings(settings: &PackageSettings) -> Self {
        Self {
            packages: settings.install.clone(),
            upgrade: settings.upgrade,
        }
    }
}

pub(crate) fn apt_get<I, S>(args: I) -> Cmd
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Cmd::new("apt-get")
        .args(args)
        .env("DEBIAN_FRONTEND", "noninteractive")
}

#[async_trait]
impl Reconciler for PackageSet {
    fn name(&self) -> &str {
        "packages"
    }

    async fn converge(&self, ctx: &mut ReconcileContext<'_>) -> Result<(), ShipError> {
        ctx.runner.run(&apt_get(["update"])).await?;
        if self.upgrade {
            ctx.runner.run(&apt_get(["upgrade", "-y"])).await?;
            ctx.runner.run(&apt_get(["dist-upgrade", "-y"])).await?;
        }
        if !self.packages.is_empty() {
            ctx.runner
                .run(&apt_get(["install", "-y"]).args(self.packages.iter().cloned()))
                .await?;
        }
        Ok(())
    }
}
