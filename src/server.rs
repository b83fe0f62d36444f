// NFS export manager
//
// `Server` owns the desired export state (clients, volumes, exported names)
// and reconciles the host with it: hosts.deny, hosts.allow and /etc/exports
// are rewritten, the NFS service is started or restarted, and stale bind
// mounts are released. Every operation serializes on one lock.

use std::collections::{BTreeMap, BTreeSet};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::cleanup::cleanup_bind_mounts;
use crate::context::ExportContext;
use crate::error::{ExportError, Result};
use crate::network::ExportNetwork;
use crate::persist::{self, CONFIG_FILE_MODE};
use crate::render::{self, clean_path};
use crate::validator::{AllowAll, ClientValidator};

struct ServerState {
    clients: BTreeSet<String>,
    /// Volume path to fsid
    volumes: BTreeMap<PathBuf, u32>,
    /// Volume names written by the last export table render
    exported: BTreeSet<String>,
    validator: Arc<dyn ClientValidator>,
}

/// Manages the NFS exports of one volume tree and the host files that
/// publish them.
pub struct Server {
    ctx: ExportContext,
    base_path: PathBuf,
    exported_name: String,
    exported_name_path: PathBuf,
    network: ExportNetwork,
    state: Mutex<ServerState>,
}

impl Server {
    /// Create a manager exporting volumes under `base_path` as
    /// `<exports_dir>/<exported_name>` to hosts in `network`.
    ///
    /// Both directories are created (or have their mode fixed), anything
    /// still mounted on the export subtree is unmounted, and the NFS service
    /// is started.
    pub async fn new(
        ctx: ExportContext,
        base_path: impl AsRef<Path>,
        exported_name: &str,
        network: &str,
    ) -> Result<Self> {
        let base_path = base_path.as_ref();
        if exported_name.len() < 2 || exported_name.contains('/') {
            return Err(ExportError::InvalidExportedName);
        }
        if base_path.as_os_str().len() < 2 {
            return Err(ExportError::InvalidBasePath);
        }
        persist::verify_exports_dir(base_path).await?;

        let exported_name_path = ctx.paths().exports_dir.join(exported_name);
        persist::verify_exports_dir(&exported_name_path).await?;
        if let Err(err) = ctx.mounts().unmount(&exported_name_path).await {
            error!(
                "could not unmount export directory {}: {}",
                exported_name_path.display(),
                err
            );
            return Err(err);
        }

        let network = ExportNetwork::parse(network)?;

        ctx.service().start().await?;

        info!(
            "exporting {} as {} to {}",
            base_path.display(),
            exported_name_path.display(),
            network
        );
        Ok(Self {
            ctx,
            base_path: base_path.to_path_buf(),
            exported_name: exported_name.to_string(),
            exported_name_path,
            network,
            state: Mutex::new(ServerState {
                clients: BTreeSet::new(),
                volumes: BTreeMap::new(),
                exported: BTreeSet::new(),
                validator: Arc::new(AllowAll),
            }),
        })
    }

    /// External export name; `/foo` for the export `/exports/foo`.
    pub fn export_path(&self) -> String {
        format!("/{}", self.exported_name)
    }

    /// Local path of the export subtree, e.g. `/exports/foo`.
    pub fn export_name_path(&self) -> &Path {
        &self.exported_name_path
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn network(&self) -> &ExportNetwork {
        &self.network
    }

    /// Backing device of `path`, for detecting mount boundaries.
    pub fn get_device(&self, path: impl AsRef<Path>) -> Result<u64> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path).map_err(|source| ExportError::Stat {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(metadata.dev())
    }

    /// Current client addresses, sorted.
    pub async fn clients(&self) -> Vec<String> {
        self.state.lock().await.clients.iter().cloned().collect()
    }

    /// Tracked volumes and their fsids, sorted by path.
    pub async fn volumes(&self) -> Vec<(PathBuf, u32)> {
        let state = self.state.lock().await;
        state.volumes.iter().map(|(path, fsid)| (path.clone(), *fsid)).collect()
    }

    /// Volume names exported by the last sync or restart.
    pub async fn exported(&self) -> BTreeSet<String> {
        self.state.lock().await.exported.clone()
    }

    /// Install the validator consulted by later `set_clients` calls. The
    /// current client set is not re-filtered.
    pub async fn set_client_validator(&self, validator: Arc<dyn ClientValidator>) {
        self.state.lock().await.validator = validator;
    }

    pub async fn clear_client_validator(&self) {
        self.state.lock().await.validator = Arc::new(AllowAll);
    }

    /// Replace the client set with the addresses the validator accepts.
    pub async fn set_clients<I, S>(&self, clients: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock().await;
        let mut accepted = BTreeSet::new();
        for client in clients {
            let client = client.into();
            if state.validator.validate_client(&client) {
                accepted.insert(client);
            } else {
                info!("filtered NFS client with ip {}", client);
            }
        }
        state.clients = accepted;
    }

    /// Track a volume for export; returns its newly assigned fsid.
    pub async fn add_volume(&self, volume_path: impl AsRef<Path>) -> u32 {
        let mut state = self.state.lock().await;
        let fsid = self.ctx.next_fsid();
        state.volumes.insert(volume_path.as_ref().to_path_buf(), fsid);
        debug!("tracking volume {} (fsid {})", volume_path.as_ref().display(), fsid);
        fsid
    }

    pub async fn remove_volume(&self, volume_path: impl AsRef<Path>) {
        let mut state = self.state.lock().await;
        if state.volumes.remove(volume_path.as_ref()).is_some() {
            debug!("untracked volume {}", volume_path.as_ref().display());
        }
    }

    /// Make the exports visible to all clients: rewrite the host files,
    /// start the service, reload the export table and release stale mounts.
    ///
    /// Stops at the first failing step; files written before it stay.
    pub async fn sync(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.write_host_files(&mut state).await?;
        self.ctx
            .service()
            .start()
            .await
            .inspect_err(|err| error!("error running start: {}", err))?;
        self.ctx
            .service()
            .reload()
            .await
            .inspect_err(|err| error!("error running reload: {}", err))?;
        self.cleanup(&state).await;
        Ok(())
    }

    /// Rewrite the host files and restart the NFS service.
    pub async fn restart(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.write_host_files(&mut state).await?;
        self.ctx
            .service()
            .restart()
            .await
            .inspect_err(|err| error!("error running restart: {}", err))?;
        self.cleanup(&state).await;
        Ok(())
    }

    /// Stop the NFS service and release stale mounts. Host files are left
    /// untouched.
    pub async fn stop(&self) -> Result<()> {
        let state = self.state.lock().await;
        self.ctx
            .service()
            .stop()
            .await
            .inspect_err(|err| error!("error running stop: {}", err))?;
        self.cleanup(&state).await;
        Ok(())
    }

    async fn write_host_files(&self, state: &mut ServerState) -> Result<()> {
        self.hosts_deny()
            .await
            .inspect_err(|err| error!("error writing host deny: {}", err))?;
        self.hosts_allow(state)
            .await
            .inspect_err(|err| error!("error writing host allow: {}", err))?;
        self.write_exports(state)
            .await
            .inspect_err(|err| error!("error writing exports: {}", err))?;
        if self.ctx.bind_mount_volumes() {
            self.bind_volumes(state)
                .await
                .inspect_err(|err| error!("error bind mounting volumes: {}", err))?;
        }
        Ok(())
    }

    async fn hosts_deny(&self) -> Result<()> {
        let path = &self.ctx.paths().hosts_deny;
        let existing = persist::read_file_if_exists(path).await?;
        match render::render_hosts_deny(&existing) {
            Some(content) => {
                persist::write_atomic(path, content.into_bytes(), CONFIG_FILE_MODE).await
            }
            None => Ok(()),
        }
    }

    async fn hosts_allow(&self, state: &ServerState) -> Result<()> {
        let path = &self.ctx.paths().hosts_allow;
        let existing = persist::read_file_if_exists(path).await?;
        let content =
            render::render_hosts_allow(&existing, state.clients.iter().map(String::as_str));
        persist::write_atomic(path, content.into_bytes(), CONFIG_FILE_MODE).await
    }

    async fn write_exports(&self, state: &mut ServerState) -> Result<()> {
        let paths = self.ctx.paths();
        persist::create_dir_all(&paths.exports_dir).await?;
        persist::create_dir_all(&self.exported_name_path).await?;

        let lines = render::export_lines(
            state.volumes.keys().map(PathBuf::as_path),
            &self.exported_name_path,
            &self.network.export_host(),
        );
        state.exported = lines.exported;

        let existing = persist::read_file_if_exists(&paths.exports_file).await?;
        let content = render::render_exports(
            &existing,
            &paths.exports_dir,
            &self.exported_name_path,
            &lines.body,
        );
        persist::write_atomic(&paths.exports_file, content.into_bytes(), CONFIG_FILE_MODE).await
    }

    async fn bind_volumes(&self, state: &ServerState) -> Result<()> {
        let binder = self.ctx.bind_mounter();
        for volume in state.volumes.keys() {
            let volume = clean_path(volume);
            let Some(name) = volume.file_name() else {
                continue;
            };
            let dst = self.exported_name_path.join(name);
            binder.bind_mount(&volume, &dst).await?;
        }
        Ok(())
    }

    async fn cleanup(&self, state: &ServerState) {
        cleanup_bind_mounts(
            self.ctx.mounts(),
            &self.exported_name_path,
            &state.exported,
            &self.ctx.paths().deprecated_export,
        )
        .await;
    }
}
