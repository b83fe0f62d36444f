// NFS service lifecycle
//
// Start/stop/restart go through systemd; reload re-exports the table.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::exec::{CommandRunner, command_line, privileged};

#[async_trait]
pub trait NfsService: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn restart(&self) -> Result<()>;
    /// Re-read the export table without restarting the daemon
    async fn reload(&self) -> Result<()>;
}

/// Controls the NFS server through `systemctl` on `unit`, reloading the
/// export table with `exportfs -ra`.
pub struct SystemdNfsService {
    runner: Arc<dyn CommandRunner>,
    unit: String,
    elevate: bool,
}

impl SystemdNfsService {
    pub fn new(runner: Arc<dyn CommandRunner>, unit: impl Into<String>, elevate: bool) -> Self {
        Self {
            runner,
            unit: unit.into(),
            elevate,
        }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<()> {
        let (cmd, args) = privileged(program, args, self.elevate);
        let line = command_line(&cmd, &args);
        info!("running: {}", line);
        self.runner.run(&cmd, &args).await?.check(&line)?;
        Ok(())
    }

    async fn systemctl(&self, action: &str) -> Result<()> {
        self.run("systemctl", &[action, self.unit.as_str()]).await
    }
}

#[async_trait]
impl NfsService for SystemdNfsService {
    async fn start(&self) -> Result<()> {
        self.systemctl("start").await
    }

    async fn stop(&self) -> Result<()> {
        self.systemctl("stop").await
    }

    async fn restart(&self) -> Result<()> {
        self.systemctl("restart").await
    }

    async fn reload(&self) -> Result<()> {
        self.run("exportfs", &["-ra"]).await
    }
}
