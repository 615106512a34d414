//! Opaque idempotent shell scripts

use async_trait::async_trait;

use crate::errors::ShipError;
use crate::exec::Cmd;
use crate::reconcile::{ReconcileContext, Reconciler};

/// A bash script that is already safe to re-run
#[derive(Debug, Clone)]
pub struct RawScript {
    pub name: String,
    pub script: String,
}

impl RawScript {
    pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
        }
    }
}

#[async_trait]
impl Reconciler for RawScript {
    fn name(&self) -> &str {
        &self.name
    }

    async fn converge(&self, ctx: &mut ReconcileContext<'_>) -> Result<(), ShipError> {
        let cmd = Cmd::new("bash")
            .args(["-euxo", "pipefail", "-c"])
            .arg(self.script.as_str());
        ctx.runner.run(&cmd).await
    }
}
