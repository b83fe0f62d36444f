// External command execution
//
// Mount and service control go through `CommandRunner` so that tests can
// substitute a fake. The system runner enforces an optional deadline.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ExportError, Result};

/// Exit status and combined stdout/stderr of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal
    pub status: Option<i32>,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Turn a non-zero exit into `ExportError::Command`.
    pub fn check(self, command: &str) -> Result<CommandOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(ExportError::Command {
                command: command.to_string(),
                status: self.status,
                output: self.output,
            })
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` to completion. A non-zero exit is reported in the
    /// returned output, not as an error.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Runs commands on the host with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner {
    timeout: Option<Duration>,
}

impl SystemCommandRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let command = command_line(program, args);
        debug!("running: {}", command);

        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);
        let child = cmd.output();

        let output = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child).await {
                Ok(result) => result,
                Err(_) => return Err(ExportError::Timeout { command, timeout }),
            },
            None => child.await,
        }
        .map_err(|source| ExportError::Spawn {
            command: command.clone(),
            source,
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            status: output.status.code(),
            output: combined,
        })
    }
}

/// Whether commands must be escalated through `sudo`.
pub fn needs_elevation() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() != 0 }
}

/// Prefix `program args` with `sudo` when `elevate` is set.
pub fn privileged(program: &str, args: &[&str], elevate: bool) -> (String, Vec<String>) {
    let mut argv: Vec<String> = Vec::with_capacity(args.len() + 2);
    if elevate {
        argv.push("sudo".to_string());
    }
    argv.push(program.to_string());
    argv.extend(args.iter().map(|arg| arg.to_string()));
    let program = argv.remove(0);
    (program, argv)
}

/// Build the argument vector for mount(8):
/// `[sudo] mount -o <opt>... [-t <fs_type>] [<src>] <dst>`
pub fn mount_args(
    src: &str,
    dst: &str,
    fs_type: &str,
    options: &[&str],
    elevate: bool,
) -> (String, Vec<String>) {
    let mut args: Vec<&str> = Vec::new();
    for option in options {
        args.push("-o");
        args.push(*option);
    }
    if !fs_type.is_empty() {
        args.push("-t");
        args.push(fs_type);
    }
    if !src.is_empty() {
        args.push(src);
    }
    args.push(dst);
    privileged("mount", &args, elevate)
}

/// Render a command for logs and error messages.
pub fn command_line(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}
