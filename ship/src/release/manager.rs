//! Client-side release pipeline

use std::path::Path;

use tracing::{info, warn};

use crate::cancel::Cancellation;
use crate::errors::ShipError;
use crate::exec::{Cmd, CommandRunner, FileTransfer};
use crate::installer::RemoteAgent;
use crate::release::archive::build_archive;
use crate::release::cleanup::Cleanups;
use crate::release::ReleaseRequest;
use crate::storage::layout::{remote_path, AppLayout, ARCHIVE_NAME};
use crate::utils::sha256_file;

const LIST_IF_EXISTS: &str = r#"if [ -e "$1" ]; then ls -A1 "$1"; fi"#;

/// Ships a local project directory to the target as one release
pub struct ReleaseManager<'a, T: CommandRunner + FileTransfer> {
    transport: &'a T,
    layout: AppLayout,
    agent: RemoteAgent,
    cancel: Cancellation,
}

impl<'a, T: CommandRunner + FileTransfer> ReleaseManager<'a, T> {
    pub fn new(transport: &'a T, layout: AppLayout, agent: RemoteAgent, cancel: Cancellation) -> Self {
        Self {
            transport,
            layout,
            agent,
            cancel,
        }
    }

    /// Archive `project_root`, upload it and activate it on the target
    pub async fn deploy(&self, project_root: &Path, request: &ReleaseRequest) -> Result<(), ShipError> {
        let mut cleanups = Cleanups::default();
        let version_dir = remote_path(&self.layout.version_dir(&request.app, &request.version));

        self.preflight(&version_dir).await?;

        let archive = std::env::temp_dir().join(format!("ship-{}.zip", uuid::Uuid::new_v4()));
        let cleanup_path = archive.clone();
        cleanups.push("remove local archive", move || {
            if let Err(e) = std::fs::remove_file(&cleanup_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", cleanup_path.display(), e);
                }
            }
        });
        let entries = build_archive(project_root.to_path_buf(), archive.clone(), self.cancel.clone()).await?;
        info!("Archived {} entries", entries);

        self.upload(&archive, &version_dir, request).await?;
        self.activate(request).await?;

        cleanups.run_all();
        info!("Released {} {}", request.app, request.version);
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, ShipError> {
        let out = self.transport.capture(&Cmd::sh(LIST_IF_EXISTS, [dir])).await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// The target must be absent, empty, or hold only an in-flight archive
    async fn preflight(&self, version_dir: &str) -> Result<(), ShipError> {
        let entries = self.list(version_dir).await?;
        if entries.iter().any(|e| e != ARCHIVE_NAME) {
            return Err(ShipError::PreconditionError(format!(
                "{} already contains a deployment",
                version_dir
            )));
        }
        Ok(())
    }

    async fn upload(
        &self,
        archive: &Path,
        version_dir: &str,
        request: &ReleaseRequest,
    ) -> Result<(), ShipError> {
        let remote_archive = remote_path(&self.layout.archive_path(&request.app, &request.version));

        self.transport
            .run(&Cmd::new("mkdir").arg("-p").arg(version_dir))
            .await?;
        info!("Uploading archive to {}", remote_archive);
        self.transport.copy_file(archive, &remote_archive, 0o644).await?;

        let entries = self.list(version_dir).await?;
        if entries != [ARCHIVE_NAME] {
            return Err(ShipError::PreconditionError(format!(
                "{} holds unexpected entries after upload: {}",
                version_dir,
                entries.join(", ")
            )));
        }

        let local = sha256_file(archive).await?;
        let out = self
            .transport
            .capture(&Cmd::new("sha256sum").arg(remote_archive.as_str()))
            .await?;
        let remote = out.split_whitespace().next().unwrap_or_default();
        if remote != local {
            return Err(ShipError::TransportError(format!(
                "checksum mismatch for {}: local {}, remote {}",
                remote_archive, local, remote
            )));
        }
        Ok(())
    }

    async fn activate(&self, request: &ReleaseRequest) -> Result<(), ShipError> {
        let mut args = vec![
            "deploy",
            "--app-name",
            request.app.as_str(),
            "--app-version",
            request.version.as_str(),
        ];
        for volume in &request.volumes {
            args.extend(["--volume-name", volume.as_str()]);
        }
        let cmd = self.agent.command(args);
        info!("Activating: {}", cmd);
        self.transport.run(&cmd).await
    }
}
