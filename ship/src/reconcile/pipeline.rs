//! Ordered, fail-fast execution of reconcile steps

use tracing::{error, info};

use crate::cancel::Cancellation;
use crate::errors::ShipError;
use crate::exec::CommandRunner;
use crate::reconcile::{ReconcileContext, ReconcileStep, Reconciler};

/// Pipeline state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    /// Not started
    Pending,

    /// Step `i` is converging
    Running(usize),

    /// Every step converged
    Converged,

    /// Step `index` failed; later steps did not run
    Failed { index: usize, error: String },
}

/// Runs steps strictly in order, stopping at the first failure
///
/// No progress is persisted. Re-running after a failure starts over and relies
/// on each step being idempotent.
#[derive(Debug)]
pub struct Pipeline {
    steps: Vec<ReconcileStep>,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(steps: Vec<ReconcileStep>) -> Self {
        Self {
            steps,
            state: PipelineState::Pending,
        }
    }

    pub fn steps(&self) -> &[ReconcileStep] {
        &self.steps
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub async fn run(
        &mut self,
        runner: &dyn CommandRunner,
        cancel: &Cancellation,
    ) -> Result<(), ShipError> {
        let mut ctx = ReconcileContext::new(runner, cancel.clone());
        let total = self.steps.len();

        for (index, step) in self.steps.iter().enumerate() {
            self.state = PipelineState::Running(index);
            info!("[{}/{}] Converging {}", index + 1, total, step.name());

            let result = match cancel.check() {
                Ok(()) => step.converge(&mut ctx).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                error!("Step {} ({}) failed: {}", index + 1, step.name(), e);
                self.state = PipelineState::Failed {
                    index,
                    error: e.to_string(),
                };
                return Err(e);
            }
        }

        self.state = PipelineState::Converged;
        info!("All {} steps converged", total);
        Ok(())
    }
}
