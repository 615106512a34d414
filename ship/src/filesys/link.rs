//! Atomic symlink replacement

use std::io::ErrorKind;
use std::path::Path;

use tokio::fs;
use tracing::debug;

use crate::errors::ShipError;

/// Point `link` at `target`, replacing an existing symlink atomically
///
/// Fails with [`ShipError::PreconditionError`] if `link` exists and is not a
/// symlink. The new link is created beside `link` and renamed over it, so
/// readers see either the old or the new target, never a missing link.
pub async fn replace_symlink(target: &Path, link: &Path) -> Result<(), ShipError> {
    match fs::symlink_metadata(link).await {
        Ok(meta) if !meta.file_type().is_symlink() => {
            return Err(ShipError::PreconditionError(format!(
                "{} exists and is not a symlink",
                link.display()
            )));
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let name = link
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ShipError::Internal(format!("invalid link path {}", link.display())))?;
    let temp = link.with_file_name(format!(".{}.tmp-{}", name, uuid::Uuid::new_v4()));

    fs::symlink(target, &temp).await?;
    if let Err(e) = fs::rename(&temp, link).await {
        let _ = fs::remove_file(&temp).await;
        return Err(e.into());
    }

    debug!("Linked {} -> {}", link.display(), target.display());
    Ok(())
}
