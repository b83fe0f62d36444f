// Best-effort release of export mounts
//
// Runs at the end of every sync, restart and stop. Failures are logged and
// never abort the pass.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{info, warn};

use crate::mount::MountProc;

/// Unmount every directory under `subtree` whose name is not in `exported`,
/// then purge the deprecated export path.
pub async fn cleanup_bind_mounts(
    mounts: &dyn MountProc,
    subtree: &Path,
    exported: &BTreeSet<String>,
    deprecated: &Path,
) {
    let stale = match stale_dirs(subtree, exported).await {
        Ok(stale) => stale,
        Err(err) => {
            warn!("could not read contents of {}: {}", subtree.display(), err);
            Vec::new()
        }
    };

    for dir in stale {
        if let Err(err) = mounts.unmount(&dir).await {
            warn!("could not unmount exported directory {}: {}", dir.display(), err);
        }
    }

    remove_deprecated(mounts, deprecated).await;
}

async fn stale_dirs(subtree: &Path, exported: &BTreeSet<String>) -> io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(subtree).await?;
    let mut stale = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        if is_dir && !exported.contains(&*entry.file_name().to_string_lossy()) {
            stale.push(entry.path());
        }
    }
    Ok(stale)
}

/// Unmount `dirpath` and delete it if nothing is left inside.
pub async fn remove_deprecated(mounts: &dyn MountProc, dirpath: &Path) {
    match fs::read_dir(dirpath).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => return,
        Err(err) => {
            warn!("could not look up deprecated exports path {}: {}", dirpath.display(), err);
            return;
        }
    }

    if let Err(err) = mounts.unmount(dirpath).await {
        warn!("could not unmount deprecated path {}: {}", dirpath.display(), err);
    }

    let empty = match fs::read_dir(dirpath).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(err) => {
            warn!("could not look up deprecated exports path {}: {}", dirpath.display(), err);
            return;
        }
    };
    if !empty {
        warn!("path is not empty {}", dirpath.display());
        return;
    }

    match fs::remove_dir(dirpath).await {
        Ok(()) => info!("deleted deprecated path {}", dirpath.display()),
        Err(err) => warn!("could not remove deprecated path {}: {}", dirpath.display(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMounts;
    use std::fs;
    use tempfile::TempDir;

    fn exported(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn test_unmounts_only_unexported_dirs() {
        let dir = TempDir::new().unwrap();
        let subtree = dir.path().join("v");
        for name in ["vol1", "vol2", "stale"] {
            fs::create_dir_all(subtree.join(name)).unwrap();
        }
        fs::write(subtree.join("note.txt"), "").unwrap();

        let mounts = FakeMounts::new();
        cleanup_bind_mounts(
            &mounts,
            &subtree,
            &exported(&["vol1", "vol2"]),
            &dir.path().join("deprecated"),
        )
        .await;

        assert_eq!(mounts.unmounted(), vec![subtree.join("stale")]);
    }

    #[tokio::test]
    async fn test_unmount_failure_continues() {
        let dir = TempDir::new().unwrap();
        let subtree = dir.path().join("v");
        fs::create_dir_all(subtree.join("a")).unwrap();
        fs::create_dir_all(subtree.join("b")).unwrap();

        let mounts = FakeMounts::new();
        mounts.fail_unmount(subtree.join("a"));
        cleanup_bind_mounts(&mounts, &subtree, &exported(&[]), &dir.path().join("deprecated")).await;

        let mut unmounted = mounts.unmounted();
        unmounted.sort();
        assert_eq!(unmounted, vec![subtree.join("a"), subtree.join("b")]);
    }

    #[tokio::test]
    async fn test_missing_subtree_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let mounts = FakeMounts::new();
        cleanup_bind_mounts(
            &mounts,
            &dir.path().join("missing"),
            &exported(&[]),
            &dir.path().join("deprecated"),
        )
        .await;
        assert!(mounts.unmounted().is_empty());
    }

    #[tokio::test]
    async fn test_remove_empty_deprecated() {
        let dir = TempDir::new().unwrap();
        let deprecated = dir.path().join("serviced_var_volumes");
        fs::create_dir(&deprecated).unwrap();

        let mounts = FakeMounts::new();
        mounts.mount(&deprecated);
        remove_deprecated(&mounts, &deprecated).await;

        assert_eq!(mounts.unmounted(), vec![deprecated.clone()]);
        assert!(!deprecated.exists());
    }

    #[tokio::test]
    async fn test_keep_non_empty_deprecated() {
        let dir = TempDir::new().unwrap();
        let deprecated = dir.path().join("serviced_var_volumes");
        fs::create_dir_all(deprecated.join("leftover")).unwrap();

        let mounts = FakeMounts::new();
        mounts.fail_unmount(&deprecated);
        remove_deprecated(&mounts, &deprecated).await;

        assert!(deprecated.join("leftover").is_dir());
    }

    #[tokio::test]
    async fn test_missing_deprecated_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mounts = FakeMounts::new();
        remove_deprecated(&mounts, &dir.path().join("serviced_var_volumes")).await;
        assert!(mounts.unmounted().is_empty());
    }
}
