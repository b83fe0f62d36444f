// Mount table access and bind mounts
//
// `MountProc` answers "is this path a mount point" and unmounts. The Linux
// implementation reads mountinfo and shells out to umount(8). `BindMounter`
// exposes a volume inside the export tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::exec::{CommandOutput, CommandRunner, command_line, mount_args, privileged};
use crate::persist;
use crate::render::clean_path;

#[async_trait]
pub trait MountProc: Send + Sync {
    async fn is_mounted(&self, path: &Path) -> Result<bool>;

    /// Unmount `path`; succeeds without side effects when nothing is mounted.
    async fn unmount(&self, path: &Path) -> Result<()>;
}

/// Mount point queries backed by `/proc/self/mountinfo`.
pub struct LinuxMountProc {
    runner: Arc<dyn CommandRunner>,
    mountinfo: PathBuf,
    elevate: bool,
}

impl LinuxMountProc {
    pub fn new(runner: Arc<dyn CommandRunner>, mountinfo: impl Into<PathBuf>, elevate: bool) -> Self {
        Self {
            runner,
            mountinfo: mountinfo.into(),
            elevate,
        }
    }
}

#[async_trait]
impl MountProc for LinuxMountProc {
    async fn is_mounted(&self, path: &Path) -> Result<bool> {
        let table = tokio::fs::read_to_string(&self.mountinfo).await?;
        let target = clean_path(path);
        Ok(mount_points(&table).any(|point| Path::new(&point) == target))
    }

    async fn unmount(&self, path: &Path) -> Result<()> {
        if !self.is_mounted(path).await? {
            return Ok(());
        }
        let path = path.to_string_lossy();
        let (cmd, args) = privileged("umount", &[&*path], self.elevate);
        let line = command_line(&cmd, &args);
        info!("running unmount: {}", line);
        self.runner.run(&cmd, &args).await?.check(&line)?;
        Ok(())
    }
}

/// Mount points listed in a mountinfo table (fifth column).
pub fn mount_points(table: &str) -> impl Iterator<Item = String> + '_ {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .map(unescape_mount_field)
}

/// Decode the `\ooo` octal escapes the kernel uses for whitespace and `\`.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_escape(&bytes[i + 1..i + 4]) {
            let value = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3 && digits[0] <= b'3' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}

/// Bind mounts volumes into the export tree.
pub struct BindMounter {
    runner: Arc<dyn CommandRunner>,
    mounts: Arc<dyn MountProc>,
    elevate: bool,
}

impl BindMounter {
    pub fn new(runner: Arc<dyn CommandRunner>, mounts: Arc<dyn MountProc>, elevate: bool) -> Self {
        Self {
            runner,
            mounts,
            elevate,
        }
    }

    /// Bind mount `src` at `dst`. A no-op when `dst` is already mounted; a
    /// stale file handle failure is retried once with `remount`.
    pub async fn bind_mount(&self, src: &Path, dst: &Path) -> Result<()> {
        info!("bindMount {} at {}", src.display(), dst.display());
        if self.mounts.is_mounted(dst).await? {
            debug!("{} already mounted", dst.display());
            return Ok(());
        }
        persist::create_dir_all(dst).await?;

        let result = self.run_mount(src, dst, &["bind"]).await;
        match result {
            Err(err) if err.is_stale_handle() => {
                warn!("stale file handle on {}, retrying with remount", dst.display());
                self.run_mount(src, dst, &["bind", "remount"]).await?;
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    async fn run_mount(&self, src: &Path, dst: &Path, options: &[&str]) -> Result<CommandOutput> {
        let src = src.to_string_lossy();
        let dst = dst.to_string_lossy();
        let (cmd, args) = mount_args(&src, &dst, "", options, self.elevate);
        let line = command_line(&cmd, &args);
        info!("running mount: {}", line);
        self.runner.run(&cmd, &args).await?.check(&line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExportError;
    use crate::testing::{FakeMounts, FakeRunner};
    use tempfile::TempDir;

    const MOUNTINFO: &str = "\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
36 22 8:1 /data/vol1 /exports/v/vol1 rw,relatime shared:1 - ext4 /dev/sda1 rw
37 22 8:1 /data/my\\040vol /exports/v/my\\040vol rw - ext4 /dev/sda1 rw
";

    #[test]
    fn test_mount_points() {
        let points: Vec<String> = mount_points(MOUNTINFO).collect();
        assert_eq!(points, vec!["/", "/exports/v/vol1", "/exports/v/my vol"]);
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape_mount_field("a\\134b"), "a\\b");
        assert_eq!(unescape_mount_field("tab\\011x"), "tab\tx");
        assert_eq!(unescape_mount_field("trailing\\04"), "trailing\\04");
    }

    #[tokio::test]
    async fn test_linux_is_mounted() {
        let dir = TempDir::new().unwrap();
        let mountinfo = dir.path().join("mountinfo");
        std::fs::write(&mountinfo, MOUNTINFO).unwrap();

        let runner = Arc::new(FakeRunner::new());
        let proc_ = LinuxMountProc::new(runner.clone(), &mountinfo, false);
        assert!(proc_.is_mounted(Path::new("/exports/v/vol1")).await.unwrap());
        assert!(proc_.is_mounted(Path::new("/exports/v/vol1/")).await.unwrap());
        assert!(proc_.is_mounted(Path::new("/exports/v/my vol")).await.unwrap());
        assert!(!proc_.is_mounted(Path::new("/exports/v")).await.unwrap());
    }

    #[tokio::test]
    async fn test_linux_unmount() {
        let dir = TempDir::new().unwrap();
        let mountinfo = dir.path().join("mountinfo");
        std::fs::write(&mountinfo, MOUNTINFO).unwrap();

        let runner = Arc::new(FakeRunner::new());
        let proc_ = LinuxMountProc::new(runner.clone(), &mountinfo, true);

        proc_.unmount(Path::new("/exports/v/other")).await.unwrap();
        assert!(runner.calls().is_empty());

        proc_.unmount(Path::new("/exports/v/vol1")).await.unwrap();
        assert_eq!(runner.calls(), vec!["sudo umount /exports/v/vol1"]);

        runner.push_status(1);
        let err = proc_.unmount(Path::new("/exports/v/vol1")).await.unwrap_err();
        assert!(matches!(err, ExportError::Command { status: Some(1), .. }));
    }

    #[tokio::test]
    async fn test_bind_mount_skips_mounted_destination() {
        let runner = Arc::new(FakeRunner::new());
        let mounts = Arc::new(FakeMounts::new());
        mounts.mount("/exports/v/vol1");

        let binder = BindMounter::new(runner.clone(), mounts, false);
        binder
            .bind_mount(Path::new("/data/vol1"), Path::new("/exports/v/vol1"))
            .await
            .unwrap();
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bind_mount_creates_destination() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("v").join("vol1");
        let runner = Arc::new(FakeRunner::new());
        let binder = BindMounter::new(runner.clone(), Arc::new(FakeMounts::new()), false);

        binder.bind_mount(Path::new("/data/vol1"), &dst).await.unwrap();
        assert!(dst.is_dir());
        assert_eq!(
            runner.calls(),
            vec![format!("mount -o bind /data/vol1 {}", dst.display())]
        );
    }

    #[tokio::test]
    async fn test_bind_mount_retries_stale_handle() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("vol1");
        let runner = Arc::new(FakeRunner::new());
        runner.push_status(32);
        let binder = BindMounter::new(runner.clone(), Arc::new(FakeMounts::new()), true);

        binder.bind_mount(Path::new("/data/vol1"), &dst).await.unwrap();
        assert_eq!(
            runner.calls(),
            vec![
                format!("sudo mount -o bind /data/vol1 {}", dst.display()),
                format!("sudo mount -o bind -o remount /data/vol1 {}", dst.display()),
            ]
        );
    }

    #[tokio::test]
    async fn test_bind_mount_surfaces_output() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("vol1");
        let runner = Arc::new(FakeRunner::new());
        runner.push_output(1, "mount: special device does not exist");
        let binder = BindMounter::new(runner.clone(), Arc::new(FakeMounts::new()), false);

        let err = binder.bind_mount(Path::new("/data/vol1"), &dst).await.unwrap_err();
        assert!(err.to_string().contains("special device does not exist"));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_bind_mount_stale_retry_fails() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("vol1");
        let runner = Arc::new(FakeRunner::new());
        runner.push_status(32);
        runner.push_status(32);
        let binder = BindMounter::new(runner.clone(), Arc::new(FakeMounts::new()), false);

        let err = binder.bind_mount(Path::new("/data/vol1"), &dst).await.unwrap_err();
        assert!(err.is_stale_handle());
        assert_eq!(runner.calls().len(), 2);
    }
}
