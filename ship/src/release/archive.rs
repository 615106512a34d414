//! Release archive: build on the operator's machine, unpack on the target

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::cancel::Cancellation;
use crate::errors::ShipError;

/// Directory names never shipped
pub const EXCLUDED_DIRS: &[&str] = &[".git"];

/// Zip every file and directory below `root` into `dest`
///
/// Entry names are relative with `/` separators and directories end in `/`.
/// Returns the number of entries written.
pub fn write_archive(root: &Path, dest: &Path, cancel: &Cancellation) -> Result<usize, ShipError> {
    let root = std::path::absolute(root)?;
    let dest = std::path::absolute(dest)?;
    if !root.is_dir() {
        return Err(ShipError::PreconditionError(format!(
            "project root {} is not a directory",
            root.display()
        )));
    }

    let mut writer = ZipWriter::new(fs::File::create(&dest)?);
    let mut entries = 0;

    let walker = WalkDir::new(&root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && EXCLUDED_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
        });

    for entry in walker {
        cancel.check()?;
        let entry = entry?;
        let path = entry.path();
        if path == dest {
            continue;
        }

        let name = entry_name(&root, path)?;
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(permissions(&entry.metadata()?));

        let file_type = entry.file_type();
        if file_type.is_dir() {
            writer.add_directory(format!("{}/", name), options)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(path)?;
            writer.add_symlink(name, target.to_string_lossy().into_owned(), options)?;
        } else {
            writer.start_file(name, options)?;
            io::copy(&mut fs::File::open(path)?, &mut writer)?;
        }
        entries += 1;
    }

    writer.finish()?;
    debug!("Archived {} entries from {}", entries, root.display());
    Ok(entries)
}

/// [`write_archive`] off the async runtime
pub async fn build_archive(
    root: PathBuf,
    dest: PathBuf,
    cancel: Cancellation,
) -> Result<usize, ShipError> {
    info!("Archiving {}", root.display());
    tokio::task::spawn_blocking(move || write_archive(&root, &dest, &cancel)).await?
}

/// Unpack `archive` into `dest_dir`
///
/// Entries that would land outside `dest_dir` are rejected by the zip reader.
pub fn extract_archive(archive: &Path, dest_dir: &Path) -> Result<usize, ShipError> {
    let mut zip = ZipArchive::new(fs::File::open(archive)?)?;
    let entries = zip.len();
    zip.extract(dest_dir)?;
    Ok(entries)
}

/// [`extract_archive`] off the async runtime
pub async fn unpack_archive(archive: PathBuf, dest_dir: PathBuf) -> Result<usize, ShipError> {
    tokio::task::spawn_blocking(move || extract_archive(&archive, &dest_dir)).await?
}

fn entry_name(root: &Path, path: &Path) -> Result<String, ShipError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| ShipError::Internal(format!("{} is outside {}", path.display(), root.display())))?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

#[cfg(unix)]
fn permissions(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permissions(meta: &fs::Metadata) -> u32 {
    if meta.is_dir() {
        0o755
    } else {
        0o644
    }
}
