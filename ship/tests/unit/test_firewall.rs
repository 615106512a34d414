//! Firewall convergence against an in-memory ufw

use ship::errors::ShipError;
use ship::exec::testing::{ok, FakeRule, FakeUfw, ScriptedRunner};
use ship::exec::{Cmd, CommandRunner};
use ship::reconcile::firewall::rules::{parse_rules, Family};
use ship::reconcile::firewall::FirewallPolicy;

async fn numbered_count(ufw: &FakeUfw, port: u16, family: Family) -> usize {
    let listing = ufw
        .capture(&Cmd::new("ufw").args(["status", "numbered"]))
        .await
        .unwrap();
    parse_rules(&listing)
        .iter()
        .filter(|r| r.is_inbound_allow() && r.tcp_port() == Some(port) && r.family == family)
        .count()
}

#[tokio::test]
async fn test_inactive_firewall_converges_to_desired_ports() {
    let ufw = FakeUfw::new()
        .with_rule(FakeRule::allow("OpenSSH"))
        .with_rule(FakeRule::allow("OpenSSH").v6());
    let policy = FirewallPolicy::new([80, 443], true);

    let report = policy.converge_with_report(&ufw).await.unwrap();

    assert!(report.enabled);
    assert!(ufw.is_active());
    for port in ["80/tcp", "443/tcp"] {
        assert_eq!(ufw.count(port, false), 1, "{} v4", port);
        assert_eq!(ufw.count(port, true), 1, "{} v6", port);
    }
    assert_eq!(ufw.count("OpenSSH", false), 0);
    assert_eq!(ufw.count("OpenSSH", true), 0);
    assert_eq!(ufw.rules().len(), 4);
    assert_eq!(report.deleted, vec![4, 1]);
    assert!(report.added.is_empty());
    assert!(report.status.starts_with("Status: active"));
}

#[tokio::test]
async fn test_desired_ports_are_allowed_before_enabling() {
    let ufw = FakeUfw::new();
    FirewallPolicy::new([22, 80, 443], true)
        .converge_with_report(&ufw)
        .await
        .unwrap();

    let at_enable: Vec<String> = ufw
        .allowed_at_enable()
        .expect("firewall was enabled")
        .into_iter()
        .filter(|r| !r.v6)
        .map(|r| r.to)
        .collect();
    assert_eq!(at_enable, vec!["22/tcp", "80/tcp", "443/tcp"]);
}

#[tokio::test]
async fn test_duplicate_rules_collapse_to_one() {
    let ufw = FakeUfw::new()
        .active()
        .with_rule(FakeRule::allow("22/tcp"))
        .with_rule(FakeRule::allow("80/tcp"))
        .with_rule(FakeRule::allow("443/tcp"))
        .with_rule(FakeRule::allow("22/tcp").v6())
        .with_rule(FakeRule::allow("80/tcp").v6())
        .with_rule(FakeRule::allow("443/tcp").v6())
        .with_rule(FakeRule::allow("443/tcp"));

    let report = FirewallPolicy::new([22, 80, 443], true)
        .converge_with_report(&ufw)
        .await
        .unwrap();

    assert!(!report.enabled);
    assert_eq!(report.deleted, vec![7]);
    assert!(report.added.is_empty());
    assert_eq!(numbered_count(&ufw, 443, Family::V4).await, 1);
    assert_eq!(numbered_count(&ufw, 443, Family::V6).await, 1);
}

#[tokio::test]
async fn test_deletions_run_high_to_low() {
    // deleting 2 before 3 would renumber the second 443 rule onto 2
    let ufw = FakeUfw::new()
        .active()
        .with_rule(FakeRule::allow("443/tcp"))
        .with_rule(FakeRule::allow("8080/tcp"))
        .with_rule(FakeRule::allow("443/tcp"));

    let report = FirewallPolicy::new([443], true)
        .converge_with_report(&ufw)
        .await
        .unwrap();

    assert_eq!(report.deleted, vec![3, 2]);
    assert_eq!(report.added, vec![443]);
    assert_eq!(ufw.count("443/tcp", false), 1);
    assert_eq!(ufw.count("443/tcp", true), 1);
    assert_eq!(ufw.count("8080/tcp", false), 0);
}

#[tokio::test]
async fn test_second_convergence_changes_nothing() {
    let ufw = FakeUfw::new()
        .with_rule(FakeRule::allow("OpenSSH"))
        .with_rule(FakeRule::allow("3000:3100/tcp"));
    let policy = FirewallPolicy::new([22, 80, 443], true);

    policy.converge_with_report(&ufw).await.unwrap();
    let rules = ufw.rules();
    ufw.clear_log();

    let report = policy.converge_with_report(&ufw).await.unwrap();
    assert!(!report.enabled);
    assert!(report.deleted.is_empty());
    assert!(report.added.is_empty());
    assert!(ufw.mutations().is_empty());
    assert_eq!(ufw.rules(), rules);
}

#[tokio::test]
async fn test_unmanaged_rules_survive_without_pruning() {
    let ufw = FakeUfw::new()
        .active()
        .with_rule(FakeRule::allow("OpenSSH"))
        .with_rule(FakeRule::allow("80/tcp"))
        .with_rule(FakeRule::allow("80/tcp"))
        .with_rule(FakeRule::deny("25/tcp"))
        .with_rule(FakeRule::allow("53/tcp").outbound());

    let report = FirewallPolicy::new([80], false)
        .converge_with_report(&ufw)
        .await
        .unwrap();

    assert_eq!(report.deleted, vec![3]);
    assert_eq!(ufw.count("OpenSSH", false), 1);
    assert_eq!(ufw.count("80/tcp", false), 1);
    assert_eq!(ufw.count("80/tcp", true), 1);
    assert_eq!(ufw.rules().iter().filter(|r| r.action == "DENY").count(), 1);
}

#[tokio::test]
async fn test_missing_ufw() {
    let ufw = FakeUfw::not_installed();
    let err = FirewallPolicy::new([22], true)
        .converge_with_report(&ufw)
        .await
        .unwrap_err();
    assert!(matches!(err, ShipError::ToolMissingError(ref tool) if tool == "ufw"));
    assert!(ufw.log().is_empty());
}

#[tokio::test]
async fn test_ambiguous_status_is_fatal() {
    let runner = ScriptedRunner::new(|_| ok("Status: maybe\n")).with_programs(["ufw"]);
    let err = FirewallPolicy::new([22], true)
        .converge_with_report(&runner)
        .await
        .unwrap_err();
    assert!(matches!(err, ShipError::ParseError(_)));
    assert_eq!(runner.lines(), vec!["ufw status"]);
}
