//! SSH transport to the target machine
//!
//! One OpenSSH control-master connection is opened per invocation; every
//! command runs as its own session multiplexed over that connection, one at
//! a time.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::cancel::Cancellation;
use crate::errors::ShipError;
use crate::exec::command::quote;
use crate::exec::{Capture, Cmd, CmdOutput, CommandRunner, FileTransfer};

/// ssh(1) reserves this exit code for its own failures
const SSH_FAILURE_CODE: i32 = 255;

/// Where and as whom to connect
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub identity: Option<PathBuf>,
    pub connect_timeout_secs: u64,
}

impl SshTarget {
    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// An open connection to the target machine
#[derive(Debug)]
pub struct SshSession {
    target: SshTarget,
    control_dir: PathBuf,
    control_path: PathBuf,
    cancel: Cancellation,
    closed: bool,
}

impl SshSession {
    /// Establish the control-master connection
    pub async fn connect(target: SshTarget, cancel: Cancellation) -> Result<Self, ShipError> {
        cancel.check()?;

        let control_dir = std::env::temp_dir().join(format!("ship-ssh-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&control_dir).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&control_dir, std::fs::Permissions::from_mode(0o700))
                .await?;
        }
        let control_path = control_dir.join("cm");

        info!("Connecting to {}:{}", target.destination(), target.port);
        let mut command = Command::new("ssh");
        command
            .args(["-M", "-N", "-f"])
            .args(["-o", "ControlPersist=yes"])
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .args(["-o", "ServerAliveInterval=15"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", target.connect_timeout_secs))
            .arg("-o")
            .arg(format!("ControlPath={}", control_path.display()))
            .arg("-p")
            .arg(target.port.to_string());
        if let Some(identity) = &target.identity {
            command.arg("-i").arg(identity).args(["-o", "IdentitiesOnly=yes"]);
        }
        // the backgrounded master keeps inherited pipes open, so errors go to a file
        let log_path = control_dir.join("connect.log");
        command
            .arg("-E")
            .arg(&log_path)
            .arg(target.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let status = command.status().await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ShipError::ToolMissingError("ssh".to_string()),
            _ => ShipError::TransportError(format!("Failed to start ssh: {}", e)),
        })?;
        if !status.success() {
            let log = tokio::fs::read_to_string(&log_path).await.unwrap_or_default();
            let _ = tokio::fs::remove_dir_all(&control_dir).await;
            return Err(ShipError::TransportError(format!(
                "Failed to connect to {}:{}: {}",
                target.destination(),
                target.port,
                log.trim()
            )));
        }

        Ok(Self {
            target,
            control_dir,
            control_path,
            cancel,
            closed: false,
        })
    }

    fn session_command(&self, program: &str) -> Command {
        let mut command = Command::new(program);
        command
            .args(["-o", "ControlMaster=no", "-o", "BatchMode=yes"])
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()));
        command
    }

    /// Tear down the control-master connection
    pub async fn close(mut self) -> Result<(), ShipError> {
        self.closed = true;
        let status = self
            .session_command("ssh")
            .args(["-O", "exit"])
            .arg(self.target.destination())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        if !status.success() {
            warn!("ssh control master did not exit cleanly");
        }
        tokio::fs::remove_dir_all(&self.control_dir).await?;
        Ok(())
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let _ = std::process::Command::new("ssh")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .args(["-O", "exit"])
            .arg(self.target.destination())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        let _ = std::fs::remove_dir_all(&self.control_dir);
    }
}

#[async_trait]
impl CommandRunner for SshSession {
    async fn execute(&self, cmd: &Cmd, capture: Capture) -> Result<CmdOutput, ShipError> {
        self.cancel.check()?;
        let line = cmd.shell_line();
        debug!("Running on {}: {}", self.target.host, line);

        let mut command = self.session_command("ssh");
        command
            .arg("-p")
            .arg(self.target.port.to_string())
            .arg(self.target.destination())
            .arg("--")
            .arg(&line)
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        match capture {
            Capture::Inherit => command.stdout(Stdio::inherit()).stderr(Stdio::inherit()),
            Capture::Piped => command.stdout(Stdio::piped()).stderr(Stdio::piped()),
        };

        let mut child = command
            .spawn()
            .map_err(|e| ShipError::TransportError(format!("Failed to open ssh session: {}", e)))?;
        if let (Some(input), Some(mut stdin)) = (cmd.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    debug!("Writing session stdin failed: {}", e);
                }
            });
        }
        let output = child.wait_with_output().await?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.code() == Some(SSH_FAILURE_CODE) {
            return Err(ShipError::TransportError(format!(
                "ssh session to {} failed while running `{}`{}",
                self.target.host,
                line,
                if stderr.trim().is_empty() {
                    String::new()
                } else {
                    format!(": {}", stderr.trim())
                }
            )));
        }

        Ok(CmdOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }

    async fn has_program(&self, program: &str) -> Result<bool, ShipError> {
        let cmd = Cmd::sh("command -v \"$1\" >/dev/null 2>&1", [program]);
        Ok(self.status(&cmd).await? == Some(0))
    }
}

#[async_trait]
impl FileTransfer for SshSession {
    async fn copy_file(&self, local: &Path, remote: &str, mode: u32) -> Result<(), ShipError> {
        self.cancel.check()?;
        debug!("Copying {} to {}:{}", local.display(), self.target.host, remote);

        let output = self
            .session_command("scp")
            .arg("-q")
            .arg("-P")
            .arg(self.target.port.to_string())
            .arg(local)
            .arg(format!("{}:{}", self.target.destination(), quote(remote)))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ShipError::TransportError(format!("Failed to start scp: {}", e)))?;
        if !output.status.success() {
            return Err(ShipError::TransportError(format!(
                "Failed to copy {} to {}: {}",
                local.display(),
                remote,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        self.run(&Cmd::new("chmod").arg(format!("{:o}", mode)).arg(remote))
            .await
    }
}
