//! Host-side NFS export manager.
//!
//! Decides which local volumes are exported, to which clients, and keeps
//! `/etc/hosts.deny`, `/etc/hosts.allow`, `/etc/exports` and the export
//! tree's bind mounts consistent with that decision.

#[cfg(not(target_os = "linux"))]
compile_error!("nfs-export-manager only supports Linux");

pub mod cleanup;
pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod mount;
pub mod network;
pub mod persist;
pub mod render;
pub mod server;
pub mod service;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{ExportContext, HostPaths};
pub use error::{ExportError, Result};
pub use network::ExportNetwork;
pub use server::Server;
pub use validator::{AllowAll, ClientValidator};
