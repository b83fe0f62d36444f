//! Configuration management for the NFS export manager
//!
//! Loads configuration from:
//! 1. CLI argument `--config <path>` (if provided)
//! 2. Default path `/etc/nfs-export-manager/config.toml` (falls back to defaults if not found)

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "/etc/nfs-export-manager/config.toml";

#[derive(Parser, Debug)]
#[command(name = "nfs-exportd")]
#[command(about = "Keeps the host NFS exports in line with the tracked volumes", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub action: Option<Action>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Rewrite the host files, start the service and reload the exports
    Sync,
    /// Rewrite the host files and restart the service
    Restart,
    /// Stop the service and release stale export mounts
    Stop,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub export: ExportConfig,
    pub host: HostConfig,
    pub service: ServiceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub base_path: PathBuf,
    pub exported_name: String,
    pub network: String,
    /// Volumes tracked at startup
    pub volumes: Vec<PathBuf>,
    pub clients: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub exports_dir: PathBuf,
    pub exports_file: PathBuf,
    pub hosts_allow: PathBuf,
    pub hosts_deny: PathBuf,
    pub mountinfo: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub unit: String,
    /// Deadline for every external command; 0 waits indefinitely
    pub command_timeout_secs: u64,
    pub bind_mount_volumes: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level. If not set, falls back to RUST_LOG env var, then "info"
    pub level: Option<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("/opt/serviced/var/volumes"),
            exported_name: "serviced_volumes_v2".to_string(),
            network: "0.0.0.0/0".to_string(),
            volumes: Vec::new(),
            clients: Vec::new(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            exports_dir: PathBuf::from("/exports"),
            exports_file: PathBuf::from("/etc/exports"),
            hosts_allow: PathBuf::from("/etc/hosts.allow"),
            hosts_deny: PathBuf::from("/etc/hosts.deny"),
            mountinfo: PathBuf::from("/proc/self/mountinfo"),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            unit: "nfs-kernel-server".to_string(),
            command_timeout_secs: 60,
            bind_mount_volumes: false,
        }
    }
}

impl LoggingConfig {
    /// Get log level with fallback: config -> RUST_LOG -> "info"
    pub fn effective_level(&self) -> String {
        match self.level.as_deref() {
            Some(level) => level.to_string(),
            None => std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

impl ServiceConfig {
    pub fn command_timeout(&self) -> Option<Duration> {
        match self.command_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Config {
    /// Load configuration from file or use defaults
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (config_path, user_specified) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            println!("  Config: {}", config_path.display());
            Ok(config)
        } else if user_specified {
            // User specified --config but file doesn't exist
            anyhow::bail!("Configuration file not found: {}", config_path.display());
        } else {
            // Default path doesn't exist, use defaults
            println!("  Config: using defaults");
            Ok(Config::default())
        }
    }
}
