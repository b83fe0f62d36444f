// Export manager error types
//
// Construction-validation errors are fatal to `Server::new`. I/O errors are
// propagated unchanged. External command failures carry the combined output.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Exit status bit reported by mount(8) for a stale NFS file handle.
pub const STALE_HANDLE_STATUS: i32 = 0x20;

pub type Result<T> = std::result::Result<T, ExportError>;

/// Errors returned by export management operations.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Exported name is shorter than two characters or contains a separator
    #[error("nfs server: invalid exported name")]
    InvalidExportedName,

    #[error("nfs server: invalid base path")]
    InvalidBasePath,

    #[error("nfs server: base path not a directory")]
    BasePathNotDir,

    #[error("nfs server: the network value is not CIDR: {0}")]
    InvalidNetwork(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    /// Rename of a fully written temporary file onto its target failed
    #[error("could not replace {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to get volume stats for {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` failed (status {status:?}): {output}")]
    Command {
        command: String,
        status: Option<i32>,
        output: String,
    },

    #[error("`{command}` did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

impl ExportError {
    /// True when a failed command exited with the stale file handle bit set.
    pub fn is_stale_handle(&self) -> bool {
        match self {
            ExportError::Command {
                status: Some(code), ..
            } => code & STALE_HANDLE_STATUS != 0,
            _ => false,
        }
    }
}
