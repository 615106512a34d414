//! Host-scoped install mutex
//!
//! Backed by `flock(1)` on a lock file. The lock is released when the holding
//! process exits, so a crashed installer never leaves it behind. Acquisition
//! waits at most `timeout`; there is no queue, and a holder that outlives the
//! timeout makes every other acquirer fail with
//! [`ShipError::LockTimeoutError`]. The timeout bounds only the wait, never the
//! work done while holding the lock.
//!
//! The guarded script may exit with any code, including the conflict code.
//! A timeout is only reported when the script never started, which the
//! wrapper announces with [`LOCK_HELD_MARKER`] on stdout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ShipError;
use crate::exec::{Cmd, CmdOutput};
use crate::installer::Privilege;
use crate::storage::layout::remote_path;

/// Exit code `flock` reports when the wait times out
pub const LOCK_CONFLICT_EXIT_CODE: i32 = 75;

/// First stdout line of a guarded script, printed once the lock is held
pub const LOCK_HELD_MARKER: &str = "ship-install-lock-held";

/// A named lock with a bounded wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLock {
    path: PathBuf,
    timeout: Duration,
}

impl InstallLock {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    /// One lock per privilege level, shared by every version
    pub fn for_privilege(lock_dir: &Path, privilege: Privilege, timeout: Duration) -> Self {
        Self::new(
            lock_dir.join(format!("ship-agent-install-{}.lock", privilege.as_str())),
            timeout,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `sh -c <script>` with `params`, run while holding the lock
    pub fn guard<I, S>(&self, script: &str, params: I) -> Cmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let script = format!("echo {}\n{}", LOCK_HELD_MARKER, script);
        Cmd::new("flock")
            .arg("--wait")
            .arg(self.timeout.as_secs().max(1).to_string())
            .arg("--conflict-exit-code")
            .arg(LOCK_CONFLICT_EXIT_CODE.to_string())
            .arg(remote_path(&self.path))
            .args(["sh", "-c", script.as_str(), "sh"])
            .args(params)
    }

    /// Map the result of a [`guard`](Self::guard)ed command
    ///
    /// The command must have been run with piped stdout.
    pub fn check(&self, output: CmdOutput, cmd: &Cmd) -> Result<CmdOutput, ShipError> {
        let acquired = output.stdout.lines().any(|l| l.trim() == LOCK_HELD_MARKER);
        if output.code == Some(LOCK_CONFLICT_EXIT_CODE) && !acquired {
            return Err(ShipError::LockTimeoutError {
                path: remote_path(&self.path),
                timeout: self.timeout,
            });
        }
        output.check(cmd)
    }
}
