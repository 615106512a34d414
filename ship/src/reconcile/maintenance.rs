//! Routine upkeep of a provisioned machine

use async_trait::async_trait;
use tracing::info;

use crate::errors::ShipError;
use crate::exec::Cmd;
use crate::reconcile::packages::apt_get;
use crate::reconcile::{ReconcileContext, Reconciler};

/// Marker file the package manager leaves when a reboot is pending
pub const REBOOT_REQUIRED_MARKER: &str = "/var/run/reboot-required";

/// Upgrade packages, prune docker, and optionally schedule a pending reboot
#[derive(Debug, Clone)]
pub struct Maintenance {
    pub allow_reboot: bool,
    /// Docker objects older than this are pruned
    pub prune_until: String,
}

impl Maintenance {
    pub fn new(allow_reboot: bool) -> Self {
        Self {
            allow_reboot,
            prune_until: "168h".to_string(),
        }
    }
}

#[async_trait]
impl Reconciler for Maintenance {
    fn name(&self) -> &str {
        "maintenance"
    }

    async fn converge(&self, ctx: &mut ReconcileContext<'_>) -> Result<(), ShipError> {
        for args in [
            vec!["update"],
            vec!["-y", "upgrade"],
            vec!["-y", "autoremove"],
            vec!["-y", "clean"],
        ] {
            ctx.runner.run(&apt_get(args)).await?;
        }

        ctx.runner
            .run(
                &Cmd::new("docker")
                    .args(["system", "prune", "-f", "--filter"])
                    .arg(format!("until={}", self.prune_until)),
            )
            .await?;

        if !self.allow_reboot {
            info!("Reboot not allowed, skipping reboot check");
            return Ok(());
        }
        let marker = Cmd::new("test").args(["-e", REBOOT_REQUIRED_MARKER]);
        match ctx.runner.status(&marker).await? {
            Some(0) => {
                info!("Reboot required, scheduling reboot in 1 minute");
                ctx.runner
                    .run(&Cmd::new("shutdown").args(["--reboot", "+1"]))
                    .await
            }
            Some(1) => {
                info!("No reboot required");
                Ok(())
            }
            code => Err(ShipError::RemoteCommandError {
                command: marker.shell_line(),
                code,
                stderr: String::new(),
            }),
        }
    }
}
