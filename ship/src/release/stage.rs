//! Agent-side staging and cutover of an uploaded release

use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::errors::ShipError;
use crate::exec::CommandRunner;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::filesys::link::replace_symlink;
use crate::release::archive::unpack_archive;
use crate::release::services::{publish_site, restart_compose};
use crate::release::state::{ReleaseEvent, ReleaseFsm, ReleaseState};
use crate::release::ReleaseRequest;
use crate::storage::layout::{AppLayout, ARCHIVE_NAME};
use crate::storage::settings::PermissionPolicy;

/// Turns an uploaded archive into the live release of an app
pub struct ReleaseStager<'a> {
    pub runner: &'a dyn CommandRunner,
    pub layout: AppLayout,
    pub permissions: PermissionPolicy,
    pub proxy_root: PathBuf,
}

impl<'a> ReleaseStager<'a> {
    /// Run every stage, stopping at the first failure
    ///
    /// Any failure before cutover leaves the previous release live. A failure
    /// while restarting services leaves `current` on the new release.
    pub async fn stage(&self, request: &ReleaseRequest) -> Result<ReleaseState, ShipError> {
        let mut fsm = ReleaseFsm::new();
        match self.run_stages(request, &mut fsm).await {
            Ok(()) => Ok(fsm.state()),
            Err(e) => {
                fsm.process(ReleaseEvent::Failed(e.to_string()))?;
                if fsm.is_live() {
                    error!(
                        "{} {} is live but its services failed: {}",
                        request.app, request.version, e
                    );
                } else {
                    error!(
                        "Release {} {} aborted before cutover: {}",
                        request.app, request.version, e
                    );
                }
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        request: &ReleaseRequest,
        fsm: &mut ReleaseFsm,
    ) -> Result<(), ShipError> {
        let layout = &self.layout;
        let (app, version) = (&request.app, &request.version);
        let version_dir = Dir::new(layout.version_dir(app, version));

        self.check_version_dir(&version_dir).await?;

        let archive = layout.archive_path(app, version);
        info!("Extracting {}", archive.display());
        if let Err(e) = unpack_archive(archive.clone(), version_dir.path().to_path_buf()).await {
            discard_partial(&version_dir).await;
            return Err(e);
        }
        if let Err(e) = File::new(&archive).delete().await {
            warn!("Failed to remove archive {}: {}", archive.display(), e);
        }
        fsm.process(ReleaseEvent::Extracted)?;

        let volumes_root = Dir::new(layout.volumes_root(app));
        volumes_root.ensure(self.permissions.volumes_dir).await?;
        for volume in &request.volumes {
            Dir::new(layout.volume_dir(app, volume))
                .ensure(self.permissions.volumes_dir)
                .await?;
        }
        let secrets_root = Dir::new(layout.secrets_root(app));
        secrets_root.ensure(self.permissions.secrets_dir).await?;

        Dir::new(layout.ship_dir(app, version)).create().await?;
        replace_symlink(volumes_root.path(), &layout.volumes_link(app, version)).await?;
        replace_symlink(secrets_root.path(), &layout.secrets_link(app, version)).await?;
        fsm.process(ReleaseEvent::Linked)?;

        replace_symlink(version_dir.path(), &layout.current_link(app)).await?;
        fsm.process(ReleaseEvent::CutOver)?;
        info!("{} now points at {}", layout.current_link(app).display(), version);

        let started = restart_compose(self.runner, version_dir.path(), version).await?;
        publish_site(self.runner, version_dir.path(), app, &self.proxy_root).await?;
        if started {
            fsm.process(ReleaseEvent::ServicesStarted)?;
        }
        Ok(())
    }

    /// The version directory must hold the archive and nothing else
    async fn check_version_dir(&self, version_dir: &Dir) -> Result<(), ShipError> {
        let entries = version_dir.entry_names().await?;
        if !entries.iter().any(|e| e == ARCHIVE_NAME) {
            return Err(ShipError::PreconditionError(format!(
                "archive {} not found",
                version_dir.path().join(ARCHIVE_NAME).display()
            )));
        }
        if entries.len() > 1 {
            return Err(ShipError::PreconditionError(format!(
                "{} already contains a deployment",
                version_dir.path().display()
            )));
        }
        Ok(())
    }
}

/// Remove a half-extracted payload so the upload can be retried
async fn discard_partial(version_dir: &Dir) {
    let entries = match version_dir.entry_names().await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Unable to list {}: {}", version_dir.path().display(), e);
            return;
        }
    };
    for name in entries.iter().filter(|n| *n != ARCHIVE_NAME) {
        let path = version_dir.path().join(name);
        let result = match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Unable to remove partial entry {}: {}", path.display(), e);
        }
    }
}
