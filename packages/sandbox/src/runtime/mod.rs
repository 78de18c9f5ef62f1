// ABOUTME: Container runtime trait shared by every sandbox component
// ABOUTME: Abstract interface for container lifecycle, exec, archives, networking, and stats

use crate::error::RuntimeError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::AsyncWrite;

pub mod docker;

pub use docker::DockerRuntime;

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Container configuration for creating isolated environments
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    /// Runtime network mode ("none" or "bridge")
    pub network_mode: String,
    pub nano_cpus: i64,
    pub memory_bytes: i64,
    pub pids_limit: Option<i64>,
    pub working_dir: String,
    /// Long-running keep-alive command
    pub command: Vec<String>,
    pub binds: Vec<String>,
    pub cap_drop: Vec<String>,
    pub security_opt: Vec<String>,
}

/// Runtime-side view of one container
#[derive(Debug, Clone)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Raw runtime state, e.g. "created", "running", "exited"
    pub state: String,
    pub labels: HashMap<String, String>,
    pub network_mode: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ContainerDetails {
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }
}

/// Parameters for a command run inside a container
#[derive(Debug, Clone)]
pub struct ExecSpec {
    pub argv: Vec<String>,
    pub working_dir: Option<String>,
    pub tty: bool,
    pub privileged: bool,
    pub user: Option<String>,
}

impl ExecSpec {
    /// Unprivileged, non-TTY exec of `argv`
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            working_dir: None,
            tty: false,
            privileged: false,
            user: None,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }
}

/// Execution result from running a command in a container
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Container resource usage reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerUsage {
    pub cpu_fraction: f64,
    pub memory_used_bytes: u64,
    pub memory_limit_bytes: u64,
}

/// Capability set the sandbox core needs from a container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Verify the runtime daemon is reachable
    async fn ping(&self) -> Result<()>;

    /// Check if an image exists locally
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pull an image
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Create (but do not start) a container, returning its id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, container: &str) -> Result<()>;

    /// Stop a container, waiting at most `grace` before forcing it
    async fn stop_container(&self, container: &str, grace: Duration) -> Result<()>;

    /// Remove a container together with its anonymous volumes
    async fn remove_container(&self, container: &str, force: bool) -> Result<()>;

    async fn inspect_container(&self, container: &str) -> Result<ContainerDetails>;

    /// List containers (running or not) carrying the `key=value` label
    async fn list_containers(&self, label: &str) -> Result<Vec<ContainerDetails>>;

    /// Prepare a command inside a container, returning the exec id
    async fn create_exec(&self, container: &str, spec: &ExecSpec) -> Result<String>;

    /// Run a prepared exec to completion
    async fn start_exec(&self, exec_id: &str) -> Result<ExecOutput>;

    /// Forcibly stop a single exec without touching its container
    async fn kill_exec(&self, exec_id: &str) -> Result<()>;

    /// Stream a tar archive of `path` inside the container into `sink`, returning bytes written
    async fn download_archive(
        &self,
        container: &str,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64>;

    /// Extract a tar archive into `dest_path` inside the container
    async fn upload_archive(&self, container: &str, dest_path: &str, archive: Vec<u8>)
        -> Result<()>;

    /// Detach the container from every network, returning how many were detached
    async fn disconnect_networks(&self, container: &str) -> Result<usize>;

    /// Current CPU and memory usage of a container
    async fn stats(&self, container: &str) -> Result<ContainerUsage>;

    /// Create and run an exec in one step
    async fn exec(&self, container: &str, spec: &ExecSpec) -> Result<ExecOutput> {
        let exec_id = self.create_exec(container, spec).await?;
        self.start_exec(&exec_id).await
    }
}
