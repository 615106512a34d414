//! State machine of one release on the target

use serde::{Deserialize, Serialize};

use crate::errors::ShipError;

/// Release state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseState {
    /// Archive is in transit or waiting to be unpacked
    Uploading,

    /// Payload unpacked into the version directory
    Extracted,

    /// Shared volumes and secrets linked into the version
    Linked,

    /// `current` points at this version
    Current,

    /// Dependent services restarted on this version
    ServicesRunning,

    /// A stage failed
    Failed,
}

/// Release event
#[derive(Debug, Clone)]
pub enum ReleaseEvent {
    Extracted,
    Linked,
    CutOver,
    ServicesStarted,
    Failed(String),
}

/// Tracks a release through staging and cutover
#[derive(Debug, Clone)]
pub struct ReleaseFsm {
    state: ReleaseState,
    error: Option<String>,
    /// Whether `current` was repointed before a failure
    cut_over: bool,
}

impl Default for ReleaseFsm {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleaseFsm {
    /// Create a new FSM in uploading state
    pub fn new() -> Self {
        Self {
            state: ReleaseState::Uploading,
            error: None,
            cut_over: false,
        }
    }

    /// Get current state
    pub fn state(&self) -> ReleaseState {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether this release went live, even if a later stage failed
    pub fn is_live(&self) -> bool {
        self.cut_over
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: ReleaseEvent) -> Result<(), ShipError> {
        let new_state = match (self.state, &event) {
            (ReleaseState::Uploading, ReleaseEvent::Extracted) => ReleaseState::Extracted,
            (ReleaseState::Extracted, ReleaseEvent::Linked) => ReleaseState::Linked,
            (ReleaseState::Linked, ReleaseEvent::CutOver) => {
                self.cut_over = true;
                ReleaseState::Current
            }
            (ReleaseState::Current, ReleaseEvent::ServicesStarted) => {
                ReleaseState::ServicesRunning
            }

            (ReleaseState::Failed, _) => {
                return Err(ShipError::Internal(format!(
                    "release already failed, cannot process {:?}",
                    event
                )));
            }
            (_, ReleaseEvent::Failed(err)) => {
                self.error = Some(err.clone());
                ReleaseState::Failed
            }

            (state, event) => {
                return Err(ShipError::Internal(format!(
                    "invalid release transition from {:?} on {:?}",
                    state, event
                )));
            }
        };

        self.state = new_state;
        Ok(())
    }
}
