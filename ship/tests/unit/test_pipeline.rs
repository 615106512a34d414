//! Reconciliation pipeline ordering, failure and cancellation

use ship::cancel::Cancellation;
use ship::errors::ShipError;
use ship::exec::testing::{exit, ok, FakeUfw, ScriptedRunner};
use ship::machine::maintenance_plan;
use ship::reconcile::{FirewallPolicy, Pipeline, PipelineState, RawScript, ReconcileStep};
use tokio_test::{assert_err, assert_ok};

fn script(name: &str) -> ReconcileStep {
    ReconcileStep::RawScript(RawScript::new(name, format!("echo {}", name)))
}

fn failing_on(marker: &'static str) -> ScriptedRunner {
    ScriptedRunner::new(move |cmd| {
        if cmd.args.iter().any(|a| a.contains(marker)) {
            exit(3, "step exploded")
        } else {
            ok("")
        }
    })
}

#[tokio::test]
async fn test_steps_run_in_declared_order() {
    let runner = ScriptedRunner::succeeding();
    let mut pipeline = Pipeline::new(vec![script("first"), script("second"), script("third")]);
    assert_eq!(pipeline.state(), &PipelineState::Pending);

    assert_ok!(pipeline.run(&runner, &Cancellation::new()).await);

    assert_eq!(pipeline.state(), &PipelineState::Converged);
    let scripts: Vec<String> = runner
        .commands()
        .into_iter()
        .map(|c| c.args.last().cloned().unwrap_or_default())
        .collect();
    assert_eq!(scripts, vec!["echo first", "echo second", "echo third"]);
}

#[tokio::test]
async fn test_first_failure_stops_the_pipeline() {
    let runner = failing_on("second");
    let mut pipeline = Pipeline::new(vec![script("first"), script("second"), script("third")]);

    let err = assert_err!(pipeline.run(&runner, &Cancellation::new()).await);

    match err {
        ShipError::RemoteCommandError { code, stderr, command } => {
            assert_eq!(code, Some(3));
            assert_eq!(stderr, "step exploded");
            assert!(command.contains("echo second"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(pipeline.state(), PipelineState::Failed { index: 1, .. }));
    assert_eq!(runner.commands().len(), 2);
}

#[tokio::test]
async fn test_cancelled_pipeline_dispatches_nothing() {
    let runner = ScriptedRunner::succeeding();
    let cancel = Cancellation::new();
    cancel.cancel();

    let mut pipeline = Pipeline::new(vec![script("first"), script("second")]);
    let err = assert_err!(pipeline.run(&runner, &cancel).await);

    assert!(matches!(err, ShipError::Cancelled));
    assert!(matches!(pipeline.state(), PipelineState::Failed { index: 0, .. }));
    assert!(runner.commands().is_empty());
}

#[tokio::test]
async fn test_firewall_step_runs_through_the_pipeline() {
    let ufw = FakeUfw::new();
    let mut pipeline = Pipeline::new(vec![ReconcileStep::FirewallPolicy(FirewallPolicy::new(
        [22, 80, 443],
        true,
    ))]);

    assert_ok!(pipeline.run(&ufw, &Cancellation::new()).await);
    assert!(ufw.is_active());
    assert_eq!(ufw.count("22/tcp", false), 1);
}

#[tokio::test]
async fn test_maintenance_without_reboot_marker() {
    let runner = ScriptedRunner::new(|cmd| {
        if cmd.program == "test" {
            exit(1, "")
        } else {
            ok("")
        }
    });
    let mut pipeline = Pipeline::new(maintenance_plan(true));

    assert_ok!(pipeline.run(&runner, &Cancellation::new()).await);

    let lines = runner.lines();
    assert_eq!(
        lines,
        vec![
            "env DEBIAN_FRONTEND=noninteractive apt-get update",
            "env DEBIAN_FRONTEND=noninteractive apt-get -y upgrade",
            "env DEBIAN_FRONTEND=noninteractive apt-get -y autoremove",
            "env DEBIAN_FRONTEND=noninteractive apt-get -y clean",
            "docker system prune -f --filter until=168h",
            "test -e /var/run/reboot-required",
        ]
    );
}

#[tokio::test]
async fn test_maintenance_reboots_when_required() {
    let runner = ScriptedRunner::succeeding();
    let mut pipeline = Pipeline::new(maintenance_plan(true));

    assert_ok!(pipeline.run(&runner, &Cancellation::new()).await);
    assert_eq!(runner.lines().last().unwrap(), "shutdown --reboot +1");
}
