// Shared collaborators for export managers
//
// Everything that would otherwise be process-global (the fsid counter, the
// mount procedure, command execution, service control) lives here. Servers
// built from clones of one context share the same fsid sequence.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::{Config, HostConfig};
use crate::exec::{CommandRunner, SystemCommandRunner, needs_elevation};
use crate::mount::{BindMounter, LinuxMountProc, MountProc};
use crate::service::{NfsService, SystemdNfsService};

/// Directory name of the pre-v2 export tree that is purged on cleanup.
pub const DEPRECATED_EXPORT_NAME: &str = "serviced_var_volumes";

/// Host locations touched by the export manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    /// Root of the export tree, e.g. `/exports`
    pub exports_dir: PathBuf,
    pub exports_file: PathBuf,
    pub hosts_allow: PathBuf,
    pub hosts_deny: PathBuf,
    pub deprecated_export: PathBuf,
}

impl HostPaths {
    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            exports_dir: config.exports_dir.clone(),
            exports_file: config.exports_file.clone(),
            hosts_allow: config.hosts_allow.clone(),
            hosts_deny: config.hosts_deny.clone(),
            deprecated_export: config.exports_dir.join(DEPRECATED_EXPORT_NAME),
        }
    }
}

impl Default for HostPaths {
    fn default() -> Self {
        Self::from_config(&HostConfig::default())
    }
}

/// Shared collaborators and host paths handed to every `Server`, plus the
/// process-wide fsid counter.
#[derive(Clone)]
pub struct ExportContext {
    fsid: Arc<AtomicU32>,
    runner: Arc<dyn CommandRunner>,
    mounts: Arc<dyn MountProc>,
    service: Arc<dyn NfsService>,
    paths: HostPaths,
    elevate: bool,
    bind_mount_volumes: bool,
}

impl ExportContext {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        mounts: Arc<dyn MountProc>,
        service: Arc<dyn NfsService>,
        paths: HostPaths,
        elevate: bool,
    ) -> Self {
        Self {
            fsid: Arc::new(AtomicU32::new(0)),
            runner,
            mounts,
            service,
            paths,
            elevate,
            bind_mount_volumes: false,
        }
    }

    /// Context for the running host: mountinfo queries, systemd, and `sudo`
    /// when not running as root.
    pub fn system(config: &Config) -> Self {
        let elevate = needs_elevation();
        let runner: Arc<dyn CommandRunner> =
            Arc::new(SystemCommandRunner::new(config.service.command_timeout()));
        let mounts = Arc::new(LinuxMountProc::new(
            runner.clone(),
            &config.host.mountinfo,
            elevate,
        ));
        let service = Arc::new(SystemdNfsService::new(
            runner.clone(),
            &config.service.unit,
            elevate,
        ));

        Self::new(runner, mounts, service, HostPaths::from_config(&config.host), elevate)
            .with_bind_mounts(config.service.bind_mount_volumes)
    }

    /// Bind mount tracked volumes into the export tree on every sync.
    pub fn with_bind_mounts(mut self, enabled: bool) -> Self {
        self.bind_mount_volumes = enabled;
        self
    }

    /// Next filesystem id; starts at 1 and never repeats within this context.
    pub fn next_fsid(&self) -> u32 {
        self.fsid.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn mounts(&self) -> &dyn MountProc {
        self.mounts.as_ref()
    }

    pub fn service(&self) -> &dyn NfsService {
        self.service.as_ref()
    }

    pub fn paths(&self) -> &HostPaths {
        &self.paths
    }

    pub fn bind_mount_volumes(&self) -> bool {
        self.bind_mount_volumes
    }

    pub fn bind_mounter(&self) -> BindMounter {
        BindMounter::new(self.runner.clone(), self.mounts.clone(), self.elevate)
    }
}
