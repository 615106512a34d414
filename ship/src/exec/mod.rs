//! Command execution on the local or the target machine
//!
//! Everything that touches a machine goes through [`CommandRunner`]; file
//! uploads go through [`FileTransfer`]. Reconcilers and the release pipeline
//! only depend on these two traits.

use std::path::Path;

use async_trait::async_trait;

use crate::errors::ShipError;

pub mod command;
pub mod local;
pub mod ssh;
#[cfg(any(test, feature = "test"))]
pub mod testing;

pub use command::Cmd;

/// Where the output of a command goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// Stream to the operator's terminal
    Inherit,
    /// Collect into [`CmdOutput`]
    Piped,
}

/// Result of a finished command
#[derive(Debug, Clone, Default)]
pub struct CmdOutput {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into a [`ShipError::RemoteCommandError`]
    pub fn check(self, cmd: &Cmd) -> Result<Self, ShipError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ShipError::RemoteCommandError {
                command: cmd.shell_line(),
                code: self.code,
                stderr: self.stderr,
            })
        }
    }
}

/// Runs commands on one machine and reports how they exited
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `cmd` to completion. A non-zero exit is not an error here.
    async fn execute(&self, cmd: &Cmd, capture: Capture) -> Result<CmdOutput, ShipError>;

    /// Whether `program` can be found on the machine's `PATH`
    async fn has_program(&self, program: &str) -> Result<bool, ShipError>;

    /// Run with output streamed to the operator, failing on non-zero exit
    async fn run(&self, cmd: &Cmd) -> Result<(), ShipError> {
        self.execute(cmd, Capture::Inherit).await?.check(cmd)?;
        Ok(())
    }

    /// Run and return stdout, failing on non-zero exit
    async fn capture(&self, cmd: &Cmd) -> Result<String, ShipError> {
        Ok(self.execute(cmd, Capture::Piped).await?.check(cmd)?.stdout)
    }

    /// Run quietly and return only the exit code
    async fn status(&self, cmd: &Cmd) -> Result<Option<i32>, ShipError> {
        Ok(self.execute(cmd, Capture::Piped).await?.code)
    }
}

/// Copies local files onto the machine a runner talks to
#[async_trait]
pub trait FileTransfer: Send + Sync {
    async fn copy_file(&self, local: &Path, remote: &str, mode: u32) -> Result<(), ShipError>;
}
