//! Node.js runtime through nvm

use async_trait::async_trait;

use crate::errors::ShipError;
use crate::exec::Cmd;
use crate::exec::command::quote;
use crate::reconcile::{ReconcileContext, Reconciler};
use crate::storage::settings::RuntimeSettings;

const LOAD_NVM: &str = r#"export NVM_DIR="$HOME/.nvm"; . "$NVM_DIR/nvm.sh""#;

/// Node.js for root and the deploy user, plus global npm packages
#[derive(Debug, Clone)]
pub struct RuntimeInstall {
    pub deploy_user: String,
    pub nvm_version: String,
    pub node_version: String,
    pub global_packages: Vec<String>,
}

impl RuntimeInstall {
    pub fn from_settings(settings: &RuntimeSettings, deploy_user: &str) -> Self {
        Self {
            deploy_user: deploy_user.to_string(),
            nvm_version: settings.nvm_version.clone(),
            node_version: settings.node_version.clone(),
            global_packages: settings.global_npm_packages.clone(),
        }
    }

    fn scripts(&self) -> Vec<String> {
        let mut scripts = vec![
            format!(
                "curl -fsSL https://raw.githubusercontent.com/nvm-sh/nvm/{}/install.sh | bash",
                self.nvm_version
            ),
            format!("{}; nvm install {}", LOAD_NVM, quote(&self.node_version)),
            format!("{}; node -v && npm -v", LOAD_NVM),
        ];
        if !self.global_packages.is_empty() {
            let packages: Vec<String> = self.global_packages.iter().map(|p| quote(p)).collect();
            scripts.push(format!("{}; npm install -g {}", LOAD_NVM, packages.join(" ")));
        }
        scripts
    }

    /// Same script for root and for the deploy user, in that order
    fn commands(&self) -> Vec<Cmd> {
        self.scripts()
            .into_iter()
            .flat_map(|script| {
                [
                    Cmd::new("bash").arg("-lc").arg(script.as_str()),
                    Cmd::new("sudo")
                        .args(["-u", self.deploy_user.as_str(), "-H", "bash", "-lc"])
                        .arg(script.as_str()),
                ]
            })
            .collect()
    }
}

#[async_trait]
impl Reconciler for RuntimeInstall {
    fn name(&self) -> &str {
        "runtime"
    }

    async fn converge(&self, ctx: &mut ReconcileContext<'_>) -> Result<(), ShipError> {
        for cmd in self.commands() {
            ctx.runner.run(&cmd).await?;
        }
        Ok(())
    }
}
