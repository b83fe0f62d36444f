// Test doubles for the external collaborators

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ExportError, Result};
use crate::exec::{CommandOutput, CommandRunner, command_line};
use crate::mount::MountProc;
use crate::service::NfsService;

/// Records every invocation and replays queued results, succeeding once the
/// queue is empty.
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<String>>,
    outputs: Mutex<VecDeque<CommandOutput>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_status(&self, status: i32) {
        self.push_output(status, "");
    }

    pub fn push_output(&self, status: i32, output: &str) {
        self.outputs.lock().unwrap().push_back(CommandOutput {
            status: Some(status),
            output: output.to_string(),
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(command_line(program, args));
        Ok(self
            .outputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(CommandOutput {
                status: Some(0),
                output: String::new(),
            }))
    }
}

/// In-memory mount table.
#[derive(Default)]
pub struct FakeMounts {
    mounted: Mutex<BTreeSet<PathBuf>>,
    failing: Mutex<HashSet<PathBuf>>,
    unmounted: Mutex<Vec<PathBuf>>,
}

impl FakeMounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount(&self, path: impl AsRef<Path>) {
        self.mounted.lock().unwrap().insert(path.as_ref().to_path_buf());
    }

    /// Make every unmount of `path` fail.
    pub fn fail_unmount(&self, path: impl AsRef<Path>) {
        self.failing.lock().unwrap().insert(path.as_ref().to_path_buf());
    }

    /// Paths passed to `unmount`, in call order.
    pub fn unmounted(&self) -> Vec<PathBuf> {
        self.unmounted.lock().unwrap().clone()
    }
}

#[async_trait]
impl MountProc for FakeMounts {
    async fn is_mounted(&self, path: &Path) -> Result<bool> {
        Ok(self.mounted.lock().unwrap().contains(path))
    }

    async fn unmount(&self, path: &Path) -> Result<()> {
        self.unmounted.lock().unwrap().push(path.to_path_buf());
        if self.failing.lock().unwrap().contains(path) {
            return Err(ExportError::Command {
                command: format!("umount {}", path.display()),
                status: Some(32),
                output: "umount: target is busy".to_string(),
            });
        }
        self.mounted.lock().unwrap().remove(path);
        Ok(())
    }
}

/// Records lifecycle calls; fails the named operation when configured.
#[derive(Default)]
pub struct FakeService {
    calls: Mutex<Vec<&'static str>>,
    failing: Mutex<Option<&'static str>>,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, op: &'static str) {
        *self.failing.lock().unwrap() = Some(op);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, op: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(op);
        if *self.failing.lock().unwrap() == Some(op) {
            return Err(io::Error::other(format!("{op} failed")).into());
        }
        Ok(())
    }
}

#[async_trait]
impl NfsService for FakeService {
    async fn start(&self) -> Result<()> {
        self.record("start")
    }

    async fn stop(&self) -> Result<()> {
        self.record("stop")
    }

    async fn restart(&self) -> Result<()> {
        self.record("restart")
    }

    async fn reload(&self) -> Result<()> {
        self.record("reload")
    }
}
