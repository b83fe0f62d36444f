// Durable file and directory helpers
//
// Rendered configuration is written to a temporary file in the target's
// directory, flushed, and renamed over the target, so a crash leaves either
// the old or the new content.

use std::fs::{File, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio::fs;
use tracing::debug;

use crate::error::{ExportError, Result};

/// Mode of the host configuration files we write.
pub const CONFIG_FILE_MODE: u32 = 0o664;

/// Mode required on the base path and export directories.
pub const DEFAULT_DIRECTORY_MODE: u32 = 0o777;

/// Replace `path` with `contents` atomically.
pub async fn write_atomic(path: &Path, contents: Vec<u8>, mode: u32) -> Result<()> {
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&target, &contents, mode))
        .await
        .map_err(io::Error::other)?
}

fn write_atomic_blocking(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let dir: PathBuf = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().set_permissions(Permissions::from_mode(mode))?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| ExportError::Persist {
        path: path.to_path_buf(),
        source: err.error,
    })?;

    // Make the rename itself durable
    File::open(&dir)?.sync_all()?;

    debug!("wrote {} ({} bytes)", path.display(), contents.len());
    Ok(())
}

/// Read `path` as text, treating a missing file as empty.
pub async fn read_file_if_exists(path: &Path) -> Result<String> {
    match fs::read(path).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(err.into()),
    }
}

/// Create `path` (and parents) and force the permissive directory mode on
/// it, whatever the umask.
pub async fn create_dir_all(path: &Path) -> Result<()> {
    fs::DirBuilder::new()
        .recursive(true)
        .mode(DEFAULT_DIRECTORY_MODE)
        .create(path)
        .await?;
    fs::set_permissions(path, Permissions::from_mode(DEFAULT_DIRECTORY_MODE)).await?;
    Ok(())
}

/// Ensure `path` is a directory carrying at least the default mode bits,
/// creating it when missing.
pub async fn verify_exports_dir(path: &Path) -> Result<()> {
    let metadata = match fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return create_dir_all(path).await,
        Err(err) => return Err(err.into()),
    };
    if !metadata.is_dir() {
        return Err(ExportError::BasePathNotDir);
    }
    let mode = metadata.permissions().mode();
    if mode & DEFAULT_DIRECTORY_MODE != DEFAULT_DIRECTORY_MODE {
        debug!("fixing mode {:o} on {}", mode & 0o7777, path.display());
        fs::set_permissions(
            path,
            Permissions::from_mode((mode & 0o7000) | DEFAULT_DIRECTORY_MODE),
        )
        .await?;
    }
    Ok(())
}
