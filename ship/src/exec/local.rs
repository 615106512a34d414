//! Runner for commands on this machine

use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::cancel::Cancellation;
use crate::errors::ShipError;
use crate::exec::{Capture, Cmd, CmdOutput, CommandRunner, FileTransfer};

/// Runs commands as child processes of the current process
#[derive(Debug, Clone, Default)]
pub struct LocalRunner {
    cancel: Cancellation,
}

impl LocalRunner {
    pub fn new(cancel: Cancellation) -> Self {
        Self { cancel }
    }

    fn build(cmd: &Cmd) -> Command {
        let mut command = if cmd.sudo {
            // sudo scrubs the environment, so pass variables through env(1)
            let mut command = Command::new("sudo");
            if !cmd.env.is_empty() {
                command.arg("env");
                command.args(cmd.env.iter().map(|(k, v)| format!("{}={}", k, v)));
            }
            command.arg(&cmd.program);
            command
        } else {
            let mut command = Command::new(&cmd.program);
            command.envs(cmd.env.iter().map(|(k, v)| (k, v)));
            command
        };
        command.args(&cmd.args);
        if let Some(cwd) = &cmd.cwd {
            command.current_dir(cwd);
        }
        command
    }
}

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn execute(&self, cmd: &Cmd, capture: Capture) -> Result<CmdOutput, ShipError> {
        self.cancel.check()?;
        debug!("Running: {}", cmd);

        let mut command = Self::build(cmd);
        command.stdin(if cmd.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        match capture {
            Capture::Inherit => command.stdout(Stdio::inherit()).stderr(Stdio::inherit()),
            Capture::Piped => command.stdout(Stdio::piped()).stderr(Stdio::piped()),
        };

        let mut child = command.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => ShipError::ToolMissingError(cmd.program.clone()),
            _ => ShipError::IoError(e),
        })?;

        let writer = match (cmd.stdin.clone(), child.stdin.take()) {
            (Some(input), Some(mut stdin)) => Some(tokio::spawn(async move {
                let result = stdin.write_all(&input).await;
                drop(stdin);
                match result {
                    Err(e) if e.kind() != ErrorKind::BrokenPipe => Err(e),
                    _ => Ok(()),
                }
            })),
            _ => None,
        };

        let output = child.wait_with_output().await?;
        if let Some(writer) = writer {
            writer.await??;
        }

        debug!("Finished with {:?}: {}", output.status.code(), cmd.program);
        Ok(CmdOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn has_program(&self, program: &str) -> Result<bool, ShipError> {
        Ok(which::which(program).is_ok())
    }
}

#[async_trait]
impl FileTransfer for LocalRunner {
    async fn copy_file(&self, local: &Path, remote: &str, mode: u32) -> Result<(), ShipError> {
        self.cancel.check()?;
        tokio::fs::copy(local, remote).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(remote, std::fs::Permissions::from_mode(mode)).await?;
        }
        #[cfg(not(unix))]
        let _ = mode;

        Ok(())
    }
}
