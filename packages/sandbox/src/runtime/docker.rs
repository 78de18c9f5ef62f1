// ABOUTME: Docker implementation of the container runtime trait
// ABOUTME: Uses the bollard library to manage isolated environment containers

use super::{
    ContainerDetails, ContainerRuntime, ContainerSpec, ContainerUsage, ExecOutput, ExecSpec,
    Result,
};
use crate::error::RuntimeError;
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, DownloadFromContainerOptions, ListContainersOptions,
        LogOutput, RemoveContainerOptions, StartContainerOptions, StatsOptions,
        StopContainerOptions, UploadToContainerOptions,
    },
    errors::Error as BollardError,
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    models::{HostConfig, RestartPolicy, RestartPolicyNameEnum},
    network::DisconnectNetworkOptions,
    Docker,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default timeout for image pull operations
const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(600);

pub struct DockerRuntime {
    client: Docker,
    /// Cache of successfully pulled images to avoid redundant pulls
    image_cache: Arc<RwLock<HashMap<String, chrono::DateTime<chrono::Utc>>>>,
    pull_timeout: Duration,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon with the default pull timeout
    pub fn new() -> Result<Self> {
        Self::with_pull_timeout(DEFAULT_PULL_TIMEOUT)
    }

    pub fn with_pull_timeout(timeout: Duration) -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| RuntimeError::Unavailable(format!("Docker connection error: {}", e)))?;
        Ok(Self::with_client_and_timeout(client, timeout))
    }

    pub fn with_client(client: Docker) -> Self {
        Self::with_client_and_timeout(client, DEFAULT_PULL_TIMEOUT)
    }

    pub fn with_client_and_timeout(client: Docker, timeout: Duration) -> Self {
        Self {
            client,
            image_cache: Arc::new(RwLock::new(HashMap::new())),
            pull_timeout: timeout,
        }
    }

    /// Convert our spec to bollard config
    fn to_bollard_config(spec: &ContainerSpec) -> Config<String> {
        let host_config = HostConfig {
            memory: Some(spec.memory_bytes),
            // Disallow swap beyond the memory cap
            memory_swap: Some(spec.memory_bytes),
            nano_cpus: Some(spec.nano_cpus),
            pids_limit: spec.pids_limit,
            network_mode: Some(spec.network_mode.clone()),
            binds: if spec.binds.is_empty() {
                None
            } else {
                Some(spec.binds.clone())
            },
            cap_drop: Some(spec.cap_drop.clone()),
            security_opt: Some(spec.security_opt.clone()),
            privileged: Some(false),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::NO),
                maximum_retry_count: Some(0),
            }),
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            working_dir: Some(spec.working_dir.clone()),
            labels: Some(spec.labels.clone()),
            network_disabled: Some(spec.network_mode == "none"),
            tty: Some(false),
            attach_stdout: Some(false),
            attach_stderr: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    fn parse_timestamp(raw: Option<&str>) -> chrono::DateTime<chrono::Utc> {
        raw.and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now)
    }
}

/// Map a bollard error onto the runtime taxonomy
fn classify(err: BollardError, context: &str) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(format!("{}: {}", context, message)),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::Fault(format!("{} ({}): {}", context, status_code, message)),
        other => RuntimeError::Unavailable(format!("{}: {}", context, other)),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.client.ping().await.map_err(|e| {
            warn!("Docker not available: {}", e);
            RuntimeError::Unavailable(format!("Docker daemon not responding: {}", e))
        })?;
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(classify(e, "inspect image")),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        {
            let cache = self.image_cache.read().await;
            if cache.contains_key(image) {
                debug!("Image {} found in cache, skipping pull", image);
                return Ok(());
            }
        }

        info!(
            "Pulling image: {} (timeout: {:?})",
            image, self.pull_timeout
        );

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let stream = self.client.create_image(Some(options), None, None);

        let result = tokio::time::timeout(self.pull_timeout, async {
            let mut stream = stream;
            let mut last_status = String::new();

            while let Some(result) = stream.next().await {
                let info = result.map_err(|e| classify(e, "pull image"))?;
                if let Some(status) = &info.status {
                    if status != &last_status {
                        debug!("Pull status: {}", status);
                        last_status = status.clone();
                    }
                }
                if let Some(error) = info.error {
                    return Err(RuntimeError::NotFound(format!(
                        "Failed to pull image {}: {}",
                        image, error
                    )));
                }
            }
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {
                info!("Successfully pulled image: {}", image);
                let mut cache = self.image_cache.write().await;
                cache.insert(image.to_string(), chrono::Utc::now());
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RuntimeError::Fault(format!(
                "Timeout pulling image {} after {:?}",
                image, self.pull_timeout
            ))),
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        info!("Creating container: {}", spec.name);

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let container = self
            .client
            .create_container(Some(options), Self::to_bollard_config(spec))
            .await
            .map_err(|e| classify(e, "create container"))?;

        for warning in &container.warnings {
            warn!("Container {} created with warning: {}", spec.name, warning);
        }
        debug!("Created container: {}", container.id);
        Ok(container.id)
    }

    async fn start_container(&self, container: &str) -> Result<()> {
        info!("Starting container: {}", container);

        self.client
            .start_container(container, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| classify(e, "start container"))
    }

    async fn stop_container(&self, container: &str, grace: Duration) -> Result<()> {
        info!("Stopping container: {} (grace: {:?})", container, grace);

        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };

        match self.client.stop_container(container, Some(options)).await {
            Ok(_) => Ok(()),
            // Container already stopped is not an error
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!("Container {} already stopped", container);
                Ok(())
            }
            Err(e) => Err(classify(e, "stop container")),
        }
    }

    async fn remove_container(&self, container: &str, force: bool) -> Result<()> {
        info!("Removing container: {} (force: {})", container, force);

        let options = RemoveContainerOptions {
            force,
            v: true, // Remove anonymous volumes
            ..Default::default()
        };

        self.client
            .remove_container(container, Some(options))
            .await
            .map_err(|e| classify(e, "remove container"))
    }

    async fn inspect_container(&self, container: &str) -> Result<ContainerDetails> {
        let inspect = self
            .client
            .inspect_container(container, None)
            .await
            .map_err(|e| classify(e, "inspect container"))?;

        let state = inspect
            .state
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .map(|s| {
                let status: &str = s.as_ref();
                status.to_string()
            })
            .unwrap_or_else(|| "unknown".to_string());

        let (image, labels) = match &inspect.config {
            Some(config) => (
                config.image.clone().unwrap_or_default(),
                config.labels.clone().unwrap_or_default(),
            ),
            None => (String::new(), HashMap::new()),
        };

        Ok(ContainerDetails {
            id: inspect.id.clone().unwrap_or_else(|| container.to_string()),
            name: inspect
                .name
                .clone()
                .unwrap_or_else(|| container.to_string())
                .trim_start_matches('/')
                .to_string(),
            image,
            state,
            labels,
            network_mode: inspect
                .host_config
                .as_ref()
                .and_then(|hc| hc.network_mode.clone()),
            created_at: Self::parse_timestamp(inspect.created.as_deref()),
        })
    }

    async fn list_containers(&self, label: &str) -> Result<Vec<ContainerDetails>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![label.to_string()]);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| classify(e, "list containers"))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                Some(ContainerDetails {
                    name: c
                        .names
                        .unwrap_or_default()
                        .first()
                        .map(|n| n.trim_start_matches('/').to_string())
                        .unwrap_or_else(|| id.clone()),
                    id,
                    image: c.image.unwrap_or_default(),
                    state: c.state.unwrap_or_default(),
                    labels: c.labels.unwrap_or_default(),
                    network_mode: c.host_config.and_then(|hc| hc.network_mode),
                    created_at: chrono::DateTime::from_timestamp(c.created.unwrap_or(0), 0)
                        .unwrap_or_else(chrono::Utc::now),
                })
            })
            .collect())
    }

    async fn create_exec(&self, container: &str, spec: &ExecSpec) -> Result<String> {
        debug!("Creating exec in container {}: {:?}", container, spec.argv);

        let options = CreateExecOptions {
            cmd: Some(spec.argv.clone()),
            working_dir: spec.working_dir.clone(),
            user: spec.user.clone(),
            tty: Some(spec.tty),
            privileged: Some(spec.privileged),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .client
            .create_exec(container, options)
            .await
            .map_err(|e| classify(e, "create exec"))?;
        Ok(exec.id)
    }

    async fn start_exec(&self, exec_id: &str) -> Result<ExecOutput> {
        let start_result = self
            .client
            .start_exec(exec_id, None)
            .await
            .map_err(|e| classify(e, "start exec"))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        match start_result {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(msg) = output.next().await {
                    match msg.map_err(|e| classify(e, "exec output"))? {
                        LogOutput::StdOut { message } => stdout.extend_from_slice(&message),
                        LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                        LogOutput::Console { message } => stdout.extend_from_slice(&message),
                        _ => {}
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(RuntimeError::Fault(
                    "Exec was detached unexpectedly".to_string(),
                ))
            }
        }

        let exec_inspect = self
            .client
            .inspect_exec(exec_id)
            .await
            .map_err(|e| classify(e, "inspect exec"))?;

        Ok(ExecOutput {
            exit_code: exec_inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    async fn kill_exec(&self, exec_id: &str) -> Result<()> {
        let inspect = self
            .client
            .inspect_exec(exec_id)
            .await
            .map_err(|e| classify(e, "inspect exec"))?;

        if inspect.running == Some(false) {
            debug!("Exec {} already finished", exec_id);
            return Ok(());
        }

        let pid = inspect.pid.filter(|pid| *pid > 0).ok_or_else(|| {
            RuntimeError::Fault(format!("Exec {} has no host pid to signal", exec_id))
        })?;

        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {
                    info!("Killed exec {} (pid {})", exec_id, pid);
                    Ok(())
                }
                Err(e) => Err(RuntimeError::Fault(format!(
                    "Failed to kill exec {} (pid {}): {}",
                    exec_id, pid, e
                ))),
            }
        }

        #[cfg(not(unix))]
        {
            Err(RuntimeError::Fault(format!(
                "Killing exec {} (pid {}) is not supported on this platform",
                exec_id, pid
            )))
        }
    }

    async fn download_archive(
        &self,
        container: &str,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        info!("Downloading archive {}:{}", container, path);

        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };
        let mut stream = self
            .client
            .download_from_container(container, Some(options));

        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| classify(e, "download archive"))?;
            sink.write_all(&bytes)
                .await
                .map_err(|e| RuntimeError::Fault(format!("Failed to write archive: {}", e)))?;
            written += bytes.len() as u64;
        }
        sink.flush()
            .await
            .map_err(|e| RuntimeError::Fault(format!("Failed to flush archive: {}", e)))?;

        Ok(written)
    }

    async fn upload_archive(
        &self,
        container: &str,
        dest_path: &str,
        archive: Vec<u8>,
    ) -> Result<()> {
        info!(
            "Uploading {} byte archive to {}:{}",
            archive.len(),
            container,
            dest_path
        );

        let options = UploadToContainerOptions {
            path: dest_path.to_string(),
            ..Default::default()
        };

        self.client
            .upload_to_container(container, Some(options), archive.into())
            .await
            .map_err(|e| classify(e, "upload archive"))
    }

    async fn disconnect_networks(&self, container: &str) -> Result<usize> {
        let inspect = self
            .client
            .inspect_container(container, None)
            .await
            .map_err(|e| classify(e, "inspect container"))?;

        let networks: Vec<String> = inspect
            .network_settings
            .and_then(|ns| ns.networks)
            .map(|n| n.into_keys().filter(|name| name != "none").collect())
            .unwrap_or_default();

        let mut disconnected = 0;
        for network in networks {
            let options = DisconnectNetworkOptions {
                container: container.to_string(),
                force: true,
            };
            match self.client.disconnect_network(&network, options).await {
                Ok(()) => {
                    info!("Disconnected {} from network {}", container, network);
                    disconnected += 1;
                }
                Err(e) => return Err(classify(e, "disconnect network")),
            }
        }
        Ok(disconnected)
    }

    async fn stats(&self, container: &str) -> Result<ContainerUsage> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };

        let mut stats_stream = self.client.stats(container, Some(options));

        let stats = match stats_stream.next().await {
            Some(result) => result.map_err(|e| classify(e, "container stats"))?,
            None => {
                return Err(RuntimeError::Fault(format!(
                    "No stats returned for container {}",
                    container
                )))
            }
        };

        let cpu_delta = stats
            .cpu_stats
            .cpu_usage
            .total_usage
            .saturating_sub(stats.precpu_stats.cpu_usage.total_usage);
        let system_delta = stats
            .cpu_stats
            .system_cpu_usage
            .unwrap_or(0)
            .saturating_sub(stats.precpu_stats.system_cpu_usage.unwrap_or(0));

        // Cores in use, comparable with the nano_cpus cap (1.0 = one full core)
        let cpu_fraction = if system_delta > 0 {
            (cpu_delta as f64 / system_delta as f64)
                * stats.cpu_stats.online_cpus.unwrap_or(1) as f64
        } else {
            0.0
        };

        Ok(ContainerUsage {
            cpu_fraction,
            memory_used_bytes: stats.memory_stats.usage.unwrap_or(0),
            memory_limit_bytes: stats.memory_stats.limit.unwrap_or(0),
        })
    }
}
