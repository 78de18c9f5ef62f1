// ABOUTME: Container lifecycle manager for isolated environments
// ABOUTME: Provisions capped containers, runs allowlisted commands in order, and tears environments down

use crate::allowlist::CommandAllowlist;
use crate::audit::AuditSink;
use crate::error::{ExecutionError, ProvisionError, RuntimeError, TeardownError};
use crate::limits::ResourceLimits;
use crate::runtime::{ContainerDetails, ContainerRuntime, ContainerSpec, ExecSpec};
use crate::settings::WardenSettings;
use crate::types::{
    container_name, managed_label_filter, CommandOutput, IsolatedEnvironment, LifecycleState,
    SecurityPolicy, CPU_FRACTION_LABEL, ENVIRONMENT_ID_LABEL, MANAGED_LABEL, MEMORY_BYTES_LABEL,
    SECURITY_POLICY_LABEL,
};
use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Mount point of the per-environment host scratch directory
pub const SCRATCH_MOUNT: &str = "/scratch";

/// Provisioning and execution settings for the lifecycle manager
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub name_prefix: String,
    pub workspace_path: String,
    pub scratch_prefix: String,
    pub temp_root: PathBuf,
    pub pids_limit: Option<i64>,
    pub stop_grace: Duration,
    pub allowlist: CommandAllowlist,
}

impl LifecycleConfig {
    pub fn from_settings(settings: &WardenSettings) -> Self {
        Self {
            name_prefix: settings.container_name_prefix.clone(),
            workspace_path: settings.workspace_path.clone(),
            scratch_prefix: settings.scratch_prefix.clone(),
            temp_root: settings.temp_root.clone(),
            pids_limit: (settings.pids_limit > 0).then_some(settings.pids_limit),
            stop_grace: settings.stop_grace(),
            allowlist: settings.allowlist(),
        }
    }
}

/// Provisioning facts that never change after creation
#[derive(Debug, Clone)]
struct EnvironmentRecord {
    container_id: String,
    image: String,
    security_policy: SecurityPolicy,
    limits: ResourceLimits,
}

/// Sole owner of isolated environments
pub struct ContainerLifecycleManager {
    runtime: Arc<dyn ContainerRuntime>,
    audit: Arc<dyn AuditSink>,
    config: LifecycleConfig,
    registry: RwLock<HashMap<String, EnvironmentRecord>>,
    exec_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Environments with an exec that timed out and survived `kill_exec`
    unstoppable: Mutex<HashSet<String>>,
}

impl ContainerLifecycleManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        audit: Arc<dyn AuditSink>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            runtime,
            audit,
            config,
            registry: RwLock::new(HashMap::new()),
            exec_locks: Mutex::new(HashMap::new()),
            unstoppable: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Host directory bind-mounted at `/scratch` inside the environment
    pub fn scratch_dir(&self, environment_id: &str) -> PathBuf {
        self.config
            .temp_root
            .join(format!("{}{}", self.config.scratch_prefix, environment_id))
    }

    /// Parse human-readable limits, then provision
    pub async fn provision_with(
        &self,
        image: &str,
        cpu_limit: &str,
        memory_limit: &str,
        security_policy: SecurityPolicy,
    ) -> Result<IsolatedEnvironment, ProvisionError> {
        let limits = match ResourceLimits::parse(cpu_limit, memory_limit) {
            Ok(limits) => limits,
            Err(e) => {
                let err = ProvisionError::from(e);
                self.audit.record(
                    "sandbox_creation_error",
                    json!({ "image": image, "error": err.to_string() }),
                );
                return Err(err);
            }
        };
        self.provision(image, limits, security_policy).await
    }

    /// Create and start a new isolated environment
    ///
    /// On failure nothing is registered and any partially created container is removed.
    pub async fn provision(
        &self,
        image: &str,
        limits: ResourceLimits,
        security_policy: SecurityPolicy,
    ) -> Result<IsolatedEnvironment, ProvisionError> {
        let environment_id = Uuid::new_v4().to_string();

        match self
            .create_environment(&environment_id, image, limits, security_policy)
            .await
        {
            Ok(environment) => {
                info!(
                    "Provisioned environment {} from {} ({}, {})",
                    environment.id, image, limits, security_policy
                );
                self.audit.record(
                    "sandbox_created",
                    json!({
                        "environment_id": environment.id,
                        "container_id": environment.container_id,
                        "image": image,
                        "security_policy": security_policy,
                        "limits": limits,
                    }),
                );
                Ok(environment)
            }
            Err(e) => {
                error!("Failed to provision environment from {}: {}", image, e);
                self.audit.record(
                    "sandbox_creation_error",
                    json!({ "image": image, "error": e.to_string() }),
                );
                Err(e)
            }
        }
    }

    async fn create_environment(
        &self,
        environment_id: &str,
        image: &str,
        limits: ResourceLimits,
        security_policy: SecurityPolicy,
    ) -> Result<IsolatedEnvironment, ProvisionError> {
        self.ensure_image(image).await?;

        let scratch = self.scratch_dir(environment_id);
        tokio::fs::create_dir_all(&scratch).await.map_err(|e| {
            ProvisionError::RuntimeFault(format!(
                "Failed to create scratch directory {}: {}",
                scratch.display(),
                e
            ))
        })?;

        let name = container_name(&self.config.name_prefix, environment_id);
        let labels = environment_labels(environment_id, security_policy, limits);
        let spec = ContainerSpec {
            name: name.clone(),
            image: image.to_string(),
            labels: labels.clone(),
            network_mode: security_policy.network_mode().to_string(),
            nano_cpus: limits.nano_cpus(),
            memory_bytes: i64::try_from(limits.memory_bytes()).unwrap_or(i64::MAX),
            pids_limit: self.config.pids_limit,
            working_dir: self.config.workspace_path.clone(),
            command: vec!["sleep".to_string(), "infinity".to_string()],
            binds: vec![format!("{}:{}", scratch.display(), SCRATCH_MOUNT)],
            cap_drop: vec!["ALL".to_string()],
            security_opt: vec!["no-new-privileges:true".to_string()],
        };

        let container_id = match self.runtime.create_container(&spec).await {
            Ok(id) => id,
            Err(e) => {
                remove_dir_if_exists(&scratch).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.runtime.start_container(&container_id).await {
            if let Err(cleanup) = self.runtime.remove_container(&container_id, true).await {
                warn!(
                    "Failed to remove container {} after start failure: {}",
                    container_id, cleanup
                );
            }
            remove_dir_if_exists(&scratch).await;
            return Err(e.into());
        }

        let record = EnvironmentRecord {
            container_id: container_id.clone(),
            image: image.to_string(),
            security_policy,
            limits,
        };
        self.registry
            .write()
            .await
            .insert(environment_id.to_string(), record);

        Ok(IsolatedEnvironment {
            id: environment_id.to_string(),
            container_id,
            container_name: name,
            image: image.to_string(),
            security_policy,
            limits,
            state: LifecycleState::Running,
            labels,
            created_at: Utc::now(),
        })
    }

    async fn ensure_image(&self, image: &str) -> Result<(), ProvisionError> {
        if self.runtime.image_exists(image).await? {
            return Ok(());
        }

        info!("Image {} not found locally, pulling", image);
        self.runtime.pull_image(image).await.map_err(|e| match e {
            RuntimeError::Unavailable(msg) => ProvisionError::RuntimeUnavailable(msg),
            other => ProvisionError::ImageUnavailable(format!("{}: {}", image, other)),
        })
    }

    /// Run an allowlisted command in the environment's workspace
    ///
    /// Commands for one environment run one at a time in submission order. A
    /// command exceeding `timeout` is killed; the environment stays up.
    pub async fn run_command(
        &self,
        environment_id: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecutionError> {
        if !self.config.allowlist.is_allowed(command) {
            warn!("Rejected command for {}: {}", environment_id, command);
            self.audit.record(
                "command_rejected",
                json!({ "environment_id": environment_id, "command": command }),
            );
            return Err(ExecutionError::CommandNotAllowed(command.to_string()));
        }

        let lock = self.exec_lock(environment_id);
        let guard = lock.lock().await;

        let result = if self.is_unstoppable(environment_id) {
            Err(ExecutionError::RuntimeFault(format!(
                "Environment {} still has a command that could not be stopped; tear it down",
                environment_id
            )))
        } else {
            self.execute(environment_id, command, timeout).await
        };

        drop(guard);
        if matches!(result, Err(ExecutionError::UnknownEnvironment(_))) {
            self.release_exec_lock(environment_id, &lock);
        }

        match &result {
            Ok(output) => {
                debug!(
                    "Command in {} exited with {} after {}ms",
                    environment_id, output.exit_code, output.duration_ms
                );
                self.audit.record(
                    "command_executed",
                    json!({
                        "environment_id": environment_id,
                        "command": command,
                        "exit_code": output.exit_code,
                        "duration_ms": output.duration_ms,
                    }),
                );
            }
            Err(ExecutionError::TimedOut { seconds, .. }) => {
                warn!(
                    "Command in {} timed out after {:.1}s: {}",
                    environment_id, seconds, command
                );
                self.audit.record(
                    "command_timeout",
                    json!({
                        "environment_id": environment_id,
                        "command": command,
                        "timeout_secs": seconds,
                    }),
                );
            }
            Err(ExecutionError::NotStopped { seconds, reason, .. }) => {
                error!(
                    "Command in {} timed out after {:.1}s and could not be killed: {}",
                    environment_id, seconds, reason
                );
                self.audit.record(
                    "command_kill_error",
                    json!({
                        "environment_id": environment_id,
                        "command": command,
                        "timeout_secs": seconds,
                        "error": reason,
                    }),
                );
            }
            Err(e) => {
                warn!("Command in {} failed: {}", environment_id, e);
                self.audit.record(
                    "execution_error",
                    json!({
                        "environment_id": environment_id,
                        "command": command,
                        "error": e.to_string(),
                    }),
                );
            }
        }
        result
    }

    async fn execute(
        &self,
        environment_id: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecutionError> {
        let container = container_name(&self.config.name_prefix, environment_id);
        let details = match self.runtime.inspect_container(&container).await {
            Ok(details) if is_managed(&details) => details,
            Ok(_) | Err(RuntimeError::NotFound(_)) => {
                return Err(ExecutionError::UnknownEnvironment(environment_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if !details.is_running() {
            return Err(ExecutionError::RuntimeFault(format!(
                "Environment {} is not running (state: {})",
                environment_id, details.state
            )));
        }

        let spec = ExecSpec::new(command.split_whitespace()).in_dir(&self.config.workspace_path);
        let exec_id = self.runtime.create_exec(&container, &spec).await?;

        let started = Instant::now();
        match tokio::time::timeout(timeout, self.runtime.start_exec(&exec_id)).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                exit_code: output.exit_code,
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                duration_ms: started.elapsed().as_millis() as u64,
            }),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => match self.runtime.kill_exec(&exec_id).await {
                Ok(()) => Err(ExecutionError::TimedOut {
                    command: command.to_string(),
                    seconds: timeout.as_secs_f64(),
                }),
                Err(e) => {
                    self.mark_unstoppable(environment_id);
                    Err(ExecutionError::NotStopped {
                        command: command.to_string(),
                        seconds: timeout.as_secs_f64(),
                        reason: e.to_string(),
                    })
                }
            },
        }
    }

    fn is_unstoppable(&self, environment_id: &str) -> bool {
        match self.unstoppable.lock() {
            Ok(set) => set.contains(environment_id),
            Err(poisoned) => poisoned.into_inner().contains(environment_id),
        }
    }

    fn mark_unstoppable(&self, environment_id: &str) {
        match self.unstoppable.lock() {
            Ok(mut set) => set.insert(environment_id.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(environment_id.to_string()),
        };
    }

    /// Number of environments with a command queue
    pub fn exec_queue_count(&self) -> usize {
        match self.exec_locks.lock() {
            Ok(locks) => locks.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Drop the queue entry for an id that turned out not to be an environment
    ///
    /// Kept when another caller still holds or waits on the same lock.
    fn release_exec_lock(&self, environment_id: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = match self.exec_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let idle = locks
            .get(environment_id)
            .is_some_and(|existing| Arc::ptr_eq(existing, lock) && Arc::strong_count(lock) == 2);
        if idle {
            locks.remove(environment_id);
        }
    }

    fn exec_lock(&self, environment_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.exec_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(environment_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Stop and remove an environment along with its scratch directory
    ///
    /// Succeeds for environments that are already gone.
    pub async fn teardown(&self, environment_id: &str) -> Result<(), TeardownError> {
        match self.remove_environment(environment_id).await {
            Ok(existed) => {
                if existed {
                    info!("Tore down environment {}", environment_id);
                } else {
                    debug!("Environment {} already absent", environment_id);
                }
                self.audit.record(
                    "sandbox_cleaned",
                    json!({ "environment_id": environment_id, "existed": existed }),
                );
                Ok(())
            }
            Err(e) => {
                error!("Teardown of {} failed: {}", environment_id, e);
                self.audit.record(
                    "cleanup_error",
                    json!({ "environment_id": environment_id, "error": e.to_string() }),
                );
                Err(e)
            }
        }
    }

    async fn remove_environment(&self, environment_id: &str) -> Result<bool, TeardownError> {
        let container = container_name(&self.config.name_prefix, environment_id);

        let mut existed = true;
        match self
            .runtime
            .stop_container(&container, self.config.stop_grace)
            .await
        {
            Ok(()) => {}
            Err(RuntimeError::NotFound(_)) => existed = false,
            // Forced removal below still kills it
            Err(e) => warn!("Failed to stop {}: {}", container, e),
        }

        if existed {
            match self.runtime.remove_container(&container, true).await {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let scratch = self.scratch_dir(environment_id);
        match tokio::fs::remove_dir_all(&scratch).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(TeardownError::RuntimeFault(format!(
                    "Failed to remove scratch directory {}: {}",
                    scratch.display(),
                    e
                )))
            }
        }

        let registered = self.registry.write().await.remove(environment_id).is_some();
        if let Ok(mut locks) = self.exec_locks.lock() {
            locks.remove(environment_id);
        }
        if let Ok(mut unstoppable) = self.unstoppable.lock() {
            unstoppable.remove(environment_id);
        }

        Ok(existed || registered)
    }

    /// Environments carrying the discoverability label, re-queried from the runtime
    pub async fn list_managed_environments(&self) -> Result<Vec<IsolatedEnvironment>, RuntimeError> {
        let containers = self.runtime.list_containers(&managed_label_filter()).await?;
        let registry = self.registry.read().await;

        let mut environments: Vec<IsolatedEnvironment> = containers
            .into_iter()
            .filter(is_managed)
            .filter_map(|details| environment_from_details(details, &registry))
            .collect();
        environments.sort_by_key(|e| e.created_at);
        Ok(environments)
    }

    /// Ids of every managed environment, including ones whose labels are incomplete
    pub async fn managed_environment_ids(&self) -> Result<Vec<String>, RuntimeError> {
        let containers = self.runtime.list_containers(&managed_label_filter()).await?;
        let prefix = format!("{}-", self.config.name_prefix);

        Ok(containers
            .into_iter()
            .filter(is_managed)
            .filter_map(|details| {
                details
                    .labels
                    .get(ENVIRONMENT_ID_LABEL)
                    .cloned()
                    .or_else(|| details.name.strip_prefix(&prefix).map(str::to_string))
            })
            .collect())
    }

    /// Ids this manager provisioned and has not torn down
    pub async fn registered_environment_ids(&self) -> Vec<String> {
        self.registry.read().await.keys().cloned().collect()
    }

    /// Current view of one environment, or `None` if it does not exist
    pub async fn environment(
        &self,
        environment_id: &str,
    ) -> Result<Option<IsolatedEnvironment>, RuntimeError> {
        let container = container_name(&self.config.name_prefix, environment_id);
        let details = match self.runtime.inspect_container(&container).await {
            Ok(details) => details,
            Err(RuntimeError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        if !is_managed(&details) {
            return Ok(None);
        }

        let registry = self.registry.read().await;
        Ok(environment_from_details(details, &registry))
    }
}

fn environment_labels(
    environment_id: &str,
    security_policy: SecurityPolicy,
    limits: ResourceLimits,
) -> HashMap<String, String> {
    HashMap::from([
        (MANAGED_LABEL.to_string(), "true".to_string()),
        (ENVIRONMENT_ID_LABEL.to_string(), environment_id.to_string()),
        (
            SECURITY_POLICY_LABEL.to_string(),
            security_policy.as_str().to_string(),
        ),
        (
            CPU_FRACTION_LABEL.to_string(),
            limits.cpu_fraction().to_string(),
        ),
        (
            MEMORY_BYTES_LABEL.to_string(),
            limits.memory_bytes().to_string(),
        ),
    ])
}

fn is_managed(details: &ContainerDetails) -> bool {
    details.labels.get(MANAGED_LABEL).map(String::as_str) == Some("true")
}

/// Rebuild an environment from runtime labels, falling back to the registry
fn environment_from_details(
    details: ContainerDetails,
    registry: &HashMap<String, EnvironmentRecord>,
) -> Option<IsolatedEnvironment> {
    let id = details.labels.get(ENVIRONMENT_ID_LABEL)?.clone();
    let record = registry.get(&id);

    let security_policy = details
        .labels
        .get(SECURITY_POLICY_LABEL)
        .and_then(|p| p.parse().ok())
        .or_else(|| record.map(|r| r.security_policy))
        .unwrap_or(match details.network_mode.as_deref() {
            Some("none") => SecurityPolicy::NoNetwork,
            _ => SecurityPolicy::Bridged,
        });

    let labelled_limits = details
        .labels
        .get(CPU_FRACTION_LABEL)
        .and_then(|c| c.parse::<f64>().ok())
        .zip(
            details
                .labels
                .get(MEMORY_BYTES_LABEL)
                .and_then(|m| m.parse::<u64>().ok()),
        )
        .and_then(|(cpu, memory)| ResourceLimits::new(cpu, memory).ok());
    let Some(limits) = labelled_limits.or_else(|| record.map(|r| r.limits)) else {
        warn!("Skipping environment {} with unreadable limits", id);
        return None;
    };

    let image = if details.image.is_empty() {
        record.map(|r| r.image.clone()).unwrap_or_default()
    } else {
        details.image
    };
    let container_id = if details.id.is_empty() {
        record.map(|r| r.container_id.clone()).unwrap_or_default()
    } else {
        details.id
    };

    Some(IsolatedEnvironment {
        id,
        container_id,
        container_name: details.name,
        image,
        security_policy,
        limits,
        state: LifecycleState::from_runtime_state(&details.state),
        labels: details.labels,
        created_at: details.created_at,
    })
}

async fn remove_dir_if_exists(path: &std::path::Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}
