//! Release tree layout on the target machine
//!
//! ```text
//! <apps-root>/<app>/<version>/                 extracted release payload
//! <apps-root>/<app>/<version>/.ship/volumes     -> <apps-root>/<app>/volumes
//! <apps-root>/<app>/<version>/.ship/secrets     -> <apps-root>/<app>/secrets
//! <apps-root>/<app>/current                     -> <apps-root>/<app>/<version>
//! <apps-root>/<app>/volumes/<name>/
//! <apps-root>/<app>/secrets/<name>
//! ```

use std::path::{Path, PathBuf};

use crate::release::ident::{AppName, ReleaseVersion, SecretName, VolumeName};

/// Name of the archive while it is in transit
pub const ARCHIVE_NAME: &str = "archive.zip";

/// Private per-version directory holding the shared-state links
pub const SHIP_DIR_NAME: &str = ".ship";

/// Paths of every application under one apps root
#[derive(Debug, Clone)]
pub struct AppLayout {
    apps_root: PathBuf,
}

impl AppLayout {
    pub fn new(apps_root: impl Into<PathBuf>) -> Self {
        Self {
            apps_root: apps_root.into(),
        }
    }

    pub fn apps_root(&self) -> &Path {
        &self.apps_root
    }

    pub fn app_dir(&self, app: &AppName) -> PathBuf {
        self.apps_root.join(app.as_str())
    }

    pub fn version_dir(&self, app: &AppName, version: &ReleaseVersion) -> PathBuf {
        self.app_dir(app).join(version.as_str())
    }

    pub fn archive_path(&self, app: &AppName, version: &ReleaseVersion) -> PathBuf {
        self.version_dir(app, version).join(ARCHIVE_NAME)
    }

    pub fn ship_dir(&self, app: &AppName, version: &ReleaseVersion) -> PathBuf {
        self.version_dir(app, version).join(SHIP_DIR_NAME)
    }

    pub fn volumes_link(&self, app: &AppName, version: &ReleaseVersion) -> PathBuf {
        self.ship_dir(app, version).join("volumes")
    }

    pub fn secrets_link(&self, app: &AppName, version: &ReleaseVersion) -> PathBuf {
        self.ship_dir(app, version).join("secrets")
    }

    /// The single live pointer of an app
    pub fn current_link(&self, app: &AppName) -> PathBuf {
        self.app_dir(app).join("current")
    }

    pub fn volumes_root(&self, app: &AppName) -> PathBuf {
        self.app_dir(app).join("volumes")
    }

    pub fn volume_dir(&self, app: &AppName, volume: &VolumeName) -> PathBuf {
        self.volumes_root(app).join(volume.as_str())
    }

    pub fn secrets_root(&self, app: &AppName) -> PathBuf {
        self.app_dir(app).join("secrets")
    }

    pub fn secret_file(&self, app: &AppName, secret: &SecretName) -> PathBuf {
        self.secrets_root(app).join(secret.as_str())
    }
}

/// Render a target path for use in a remote command
pub fn remote_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
