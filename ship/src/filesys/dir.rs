//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::ShipError;
use crate::storage::settings::FileMode;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), ShipError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Create if absent, then apply `mode`
    ///
    /// Only the directory itself gets `mode`; parents keep the umask default.
    pub async fn ensure(&self, mode: FileMode) -> Result<(), ShipError> {
        fs::create_dir_all(&self.path).await?;
        set_mode(&self.path, mode).await
    }

    /// Names of every entry, sorted
    ///
    /// A missing directory has no entries.
    pub async fn entry_names(&self) -> Result<Vec<String>, ShipError> {
        let mut entries = match fs::read_dir(&self.path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

pub(crate) async fn set_mode(path: &Path, mode: FileMode) -> Result<(), ShipError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode.bits())).await?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}
