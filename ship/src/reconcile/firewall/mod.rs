//! Firewall reconciler
//!
//! Converges `ufw` to allow exactly the desired TCP ports, one IPv4 and one
//! IPv6 rule each. Allow rules for the desired ports are always in place
//! before the firewall is enabled.

pub mod plan;
pub mod rules;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::errors::ShipError;
use crate::exec::{Cmd, CommandRunner};
use crate::reconcile::firewall::plan::{plan, DesiredPortSet};
use crate::reconcile::firewall::rules::{parse_rules, parse_status};
use crate::reconcile::{ReconcileContext, Reconciler};

const UFW: &str = "ufw";

/// What one convergence changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirewallReport {
    /// The firewall was inactive and got enabled
    pub enabled: bool,
    /// Deleted rule numbers, in the order they were deleted
    pub deleted: Vec<usize>,
    /// Ports an allow rule was added for after enabling
    pub added: Vec<u16>,
    /// Final `ufw status verbose`
    pub status: String,
}

/// Desired firewall state
#[derive(Debug, Clone)]
pub struct FirewallPolicy {
    pub desired: DesiredPortSet,
    /// Delete inbound allow rules outside `desired`
    pub prune_unmanaged: bool,
}

impl FirewallPolicy {
    pub fn new(ports: impl IntoIterator<Item = u16>, prune_unmanaged: bool) -> Self {
        Self {
            desired: DesiredPortSet::new(ports),
            prune_unmanaged,
        }
    }

    fn allow(port: u16) -> Cmd {
        Cmd::new(UFW).arg("allow").arg(format!("{}/tcp", port))
    }

    pub async fn converge_with_report(
        &self,
        runner: &dyn CommandRunner,
    ) -> Result<FirewallReport, ShipError> {
        if !runner.has_program(UFW).await? {
            return Err(ShipError::ToolMissingError(UFW.to_string()));
        }
        let mut report = FirewallReport::default();

        let status = runner.capture(&Cmd::new(UFW).arg("status")).await?;
        if !parse_status(&status)? {
            info!("Firewall inactive, allowing desired ports before enabling");
            for port in self.desired.ports() {
                runner.run(&Self::allow(port)).await?;
            }
            runner
                .run(&Cmd::new(UFW).args(["--force", "enable"]))
                .await?;
            report.enabled = true;
        }

        let listing = runner
            .capture(&Cmd::new(UFW).args(["status", "numbered"]))
            .await?;
        if !parse_status(&listing)? {
            return Err(ShipError::ParseError(
                "firewall reports inactive after enabling".to_string(),
            ));
        }
        let rules = parse_rules(&listing);
        let plan = plan(&self.desired, &rules, self.prune_unmanaged);
        debug!("Firewall plan: {:?}", plan);

        for number in &plan.deletions {
            runner
                .run(&Cmd::new(UFW).args(["--force", "delete"]).arg(number.to_string()))
                .await?;
            report.deleted.push(*number);
        }
        for port in &plan.additions {
            runner.run(&Self::allow(*port)).await?;
            report.added.push(*port);
        }

        report.status = runner
            .capture(&Cmd::new(UFW).args(["status", "verbose"]))
            .await?;
        info!(
            "Firewall converged: {} deleted, {} added\n{}",
            report.deleted.len(),
            report.added.len(),
            report.status.trim_end()
        );
        Ok(report)
    }
}

#[async_trait]
impl Reconciler for FirewallPolicy {
    fn name(&self) -> &str {
        "firewall"
    }

    async fn converge(&self, ctx: &mut ReconcileContext<'_>) -> Result<(), ShipError> {
        self.converge_with_report(ctx.runner).await.map(|_| ())
    }
}
