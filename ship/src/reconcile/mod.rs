//! Idempotent machine-state convergence
//!
//! Every [`ReconcileStep`] brings one aspect of a machine to its desired state
//! and is safe to re-run. A [`pipeline::Pipeline`] runs steps in order and
//! stops at the first failure.

pub mod firewall;
pub mod maintenance;
pub mod packages;
pub mod pipeline;
pub mod proxy;
pub mod runtime;
pub mod script;

use async_trait::async_trait;

use crate::cancel::Cancellation;
use crate::errors::ShipError;
use crate::exec::CommandRunner;

pub use firewall::FirewallPolicy;
pub use maintenance::Maintenance;
pub use packages::PackageSet;
pub use pipeline::{Pipeline, PipelineState};
pub use proxy::ProxyInstall;
pub use runtime::RuntimeInstall;
pub use script::RawScript;

/// What a step gets to work with
pub struct ReconcileContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub cancel: Cancellation,
}

impl<'a> ReconcileContext<'a> {
    pub fn new(runner: &'a dyn CommandRunner, cancel: Cancellation) -> Self {
        Self { runner, cancel }
    }
}

/// One idempotent unit of convergence
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Short name for logs and errors
    fn name(&self) -> &str;

    async fn converge(&self, ctx: &mut ReconcileContext<'_>) -> Result<(), ShipError>;
}

/// A step of a machine plan
#[derive(Debug, Clone)]
pub enum ReconcileStep {
    PackageSet(PackageSet),
    FirewallPolicy(FirewallPolicy),
    RawScript(RawScript),
    ProxyInstall(ProxyInstall),
    RuntimeInstall(RuntimeInstall),
    Maintenance(Maintenance),
}

impl ReconcileStep {
    fn reconciler(&self) -> &dyn Reconciler {
        match self {
            ReconcileStep::PackageSet(step) => step,
            ReconcileStep::FirewallPolicy(step) => step,
            ReconcileStep::RawScript(step) => step,
            ReconcileStep::ProxyInstall(step) => step,
            ReconcileStep::RuntimeInstall(step) => step,
            ReconcileStep::Maintenance(step) => step,
        }
    }
}

#[async_trait]
impl Reconciler for ReconcileStep {
    fn name(&self) -> &str {
        self.reconciler().name()
    }

    async fn converge(&self, ctx: &mut ReconcileContext<'_>) -> Result<(), ShipError> {
        self.reconciler().converge(ctx).await
    }
}
