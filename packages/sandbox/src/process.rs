// ABOUTME: Host process table used by the kill switch to find and stop marked processes
// ABOUTME: sysinfo-backed enumeration with SIGKILL delivery through nix

use crate::error::ProcessError;
use serde::Serialize;
use std::sync::Mutex;
use sysinfo::System;
use tracing::debug;

/// One host process as seen by the kill switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

impl ProcessInfo {
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
        }
    }
}

/// OS process boundary: enumerate and forcibly stop
pub trait ProcessTable: Send + Sync {
    fn list(&self) -> Vec<ProcessInfo>;

    fn kill(&self, pid: u32) -> Result<(), ProcessError>;

    /// Processes whose name contains `marker`
    fn matching(&self, marker: &str) -> Vec<ProcessInfo> {
        if marker.is_empty() {
            return Vec::new();
        }
        self.list()
            .into_iter()
            .filter(|p| p.name.contains(marker))
            .collect()
    }
}

/// Process table of the machine this binary runs on
pub struct SystemProcessTable {
    system: Mutex<System>,
    own_pid: u32,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            own_pid: std::process::id(),
        }
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn list(&self) -> Vec<ProcessInfo> {
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        system.refresh_processes();

        system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessInfo::new(pid.as_u32(), process.name()))
            .collect()
    }

    fn kill(&self, pid: u32) -> Result<(), ProcessError> {
        if pid == self.own_pid {
            return Err(ProcessError::OwnProcess(pid));
        }
        send_sigkill(pid)
    }
}

#[cfg(unix)]
fn send_sigkill(pid: u32) -> Result<(), ProcessError> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| ProcessError::SignalFailed {
        pid,
        reason: "pid out of range".to_string(),
    })?;

    match kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        // Already gone
        Err(Errno::ESRCH) => {
            debug!("Process {} exited before SIGKILL", pid);
            Ok(())
        }
        Err(e) => Err(ProcessError::SignalFailed {
            pid,
            reason: e.to_string(),
        }),
    }
}

#[cfg(not(unix))]
fn send_sigkill(_pid: u32) -> Result<(), ProcessError> {
    Err(ProcessError::Unsupported)
}
