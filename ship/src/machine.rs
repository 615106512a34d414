//! Machine plans run by the agent

use crate::exec::command::quote;
use crate::reconcile::{
    FirewallPolicy, Maintenance, PackageSet, ProxyInstall, RawScript, ReconcileStep,
    RuntimeInstall,
};
use crate::storage::settings::Settings;

const SETUP_SSHD_CONFIG: &str = include_str!("../scripts/setup_sshd_config.sh");
const SETUP_FAIL2BAN: &str = include_str!("../scripts/setup_fail2ban.sh");
const SETUP_FZF: &str = include_str!("../scripts/setup_fzf.sh");
const INSTALL_DOCKER: &str = include_str!("../scripts/install_docker.sh");

/// Bring a fresh machine to the known-good state
pub fn bootstrap_plan(settings: &Settings) -> Vec<ReconcileStep> {
    vec![
        ReconcileStep::PackageSet(PackageSet::from_settings(&settings.packages)),
        ReconcileStep::FirewallPolicy(FirewallPolicy::new(
            settings.firewall.allowed_tcp_ports.iter().copied(),
            settings.firewall.prune_unmanaged,
        )),
        ReconcileStep::RawScript(RawScript::new("sshd-config", SETUP_SSHD_CONFIG)),
        ReconcileStep::RawScript(RawScript::new("fail2ban", SETUP_FAIL2BAN)),
        ReconcileStep::RawScript(RawScript::new(
            "fzf",
            format!("DEPLOY_USER={}\n{}", quote(&settings.deploy_user), SETUP_FZF),
        )),
        ReconcileStep::RawScript(RawScript::new(
            "docker",
            format!("DEPLOY_USER={}\n{}", quote(&settings.deploy_user), INSTALL_DOCKER),
        )),
        ReconcileStep::ProxyInstall(ProxyInstall::from_settings(
            &settings.proxy,
            &settings.deploy_user,
        )),
        ReconcileStep::RuntimeInstall(RuntimeInstall::from_settings(
            &settings.runtime,
            &settings.deploy_user,
        )),
    ]
}

/// Routine upkeep
pub fn maintenance_plan(allow_reboot: bool) -> Vec<ReconcileStep> {
    vec![ReconcileStep::Maintenance(Maintenance::new(allow_reboot))]
}
