// ABOUTME: Sandbox settings loaded from WARDEN_* environment variables
// ABOUTME: Groups resource limits, allowlist, provisioning, kill-switch, and snapshot settings

use crate::allowlist::CommandAllowlist;
use crate::error::LimitError;
use crate::limits::ResourceLimits;
use crate::types::SecurityPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use warden_config::constants::*;
use warden_config::{parse_env_list, parse_env_or_default, parse_env_or_default_with_validation};

pub const DEFAULT_ALLOWED_COMMANDS: &[&str] = &["ls", "cp", "python", "python3", "pip"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenSettings {
    // Resource Limits
    pub cpu_limit: String,
    pub memory_limit: String,
    pub max_processes: usize,

    // Provisioning
    pub base_image: String,
    pub security_policy: SecurityPolicy,
    pub workspace_path: String,
    pub container_name_prefix: String,
    pub pids_limit: i64,
    pub stop_grace_secs: u64,
    pub image_pull_timeout_secs: u64,

    // Command Execution
    pub allowed_commands: Vec<String>,
    pub command_timeout_secs: u64,

    // Kill Switch
    pub process_marker: String,
    pub scratch_prefix: String,
    pub temp_root: PathBuf,
    pub poll_interval_secs: u64,
    pub sample_timeout_ms: u64,
    pub snapshot_before_termination: bool,

    // Network Isolation
    pub network_interface: String,

    // Snapshots
    pub snapshot_dir: PathBuf,
}

impl Default for WardenSettings {
    fn default() -> Self {
        let temp_root = std::env::temp_dir();
        Self {
            cpu_limit: "80%".to_string(),
            memory_limit: "16GB".to_string(),
            max_processes: 5,
            base_image: "ubuntu-ai-lab:latest".to_string(),
            security_policy: SecurityPolicy::NoNetwork,
            workspace_path: "/workspace".to_string(),
            container_name_prefix: "warden".to_string(),
            pids_limit: 256,
            stop_grace_secs: 1,
            image_pull_timeout_secs: 600,
            allowed_commands: DEFAULT_ALLOWED_COMMANDS
                .iter()
                .map(|c| c.to_string())
                .collect(),
            command_timeout_secs: 30,
            process_marker: "ai_agent".to_string(),
            scratch_prefix: "ai_agent_".to_string(),
            snapshot_dir: temp_root.join("warden_snapshots"),
            temp_root,
            poll_interval_secs: 5,
            sample_timeout_ms: 500,
            snapshot_before_termination: false,
            network_interface: "eth0".to_string(),
        }
    }
}

impl WardenSettings {
    /// Build settings from the environment, falling back to defaults per field
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let security_policy = match std::env::var(WARDEN_SECURITY_POLICY) {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("{}, using default: {}", e, defaults.security_policy);
                defaults.security_policy
            }),
            Err(_) => defaults.security_policy,
        };

        Self {
            cpu_limit: parse_env_or_default(WARDEN_CPU_LIMIT, defaults.cpu_limit),
            memory_limit: parse_env_or_default(WARDEN_MEMORY_LIMIT, defaults.memory_limit),
            max_processes: parse_env_or_default_with_validation(
                WARDEN_MAX_PROCESSES,
                defaults.max_processes,
                |v| v > 0,
            ),
            base_image: parse_env_or_default(WARDEN_BASE_IMAGE, defaults.base_image),
            security_policy,
            workspace_path: parse_env_or_default(WARDEN_WORKSPACE_PATH, defaults.workspace_path),
            container_name_prefix: defaults.container_name_prefix,
            pids_limit: defaults.pids_limit,
            stop_grace_secs: parse_env_or_default_with_validation(
                WARDEN_STOP_GRACE_SECS,
                defaults.stop_grace_secs,
                |v| v <= 30,
            ),
            image_pull_timeout_secs: parse_env_or_default_with_validation(
                WARDEN_IMAGE_PULL_TIMEOUT_SECS,
                defaults.image_pull_timeout_secs,
                |v| v > 0,
            ),
            allowed_commands: parse_env_list(WARDEN_ALLOWED_COMMANDS)
                .unwrap_or(defaults.allowed_commands),
            command_timeout_secs: parse_env_or_default_with_validation(
                WARDEN_COMMAND_TIMEOUT_SECS,
                defaults.command_timeout_secs,
                |v| v > 0,
            ),
            process_marker: parse_env_or_default(WARDEN_PROCESS_MARKER, defaults.process_marker),
            scratch_prefix: parse_env_or_default(WARDEN_SCRATCH_PREFIX, defaults.scratch_prefix),
            temp_root: parse_env_or_default(WARDEN_TEMP_ROOT, defaults.temp_root),
            poll_interval_secs: parse_env_or_default_with_validation(
                WARDEN_POLL_INTERVAL_SECS,
                defaults.poll_interval_secs,
                |v| v > 0,
            ),
            sample_timeout_ms: parse_env_or_default_with_validation(
                WARDEN_SAMPLE_TIMEOUT_MS,
                defaults.sample_timeout_ms,
                |v| v > 0,
            ),
            snapshot_before_termination: parse_env_or_default(
                WARDEN_SNAPSHOT_BEFORE_TERMINATION,
                defaults.snapshot_before_termination,
            ),
            network_interface: parse_env_or_default(
                WARDEN_NETWORK_INTERFACE,
                defaults.network_interface,
            ),
            snapshot_dir: parse_env_or_default(WARDEN_SNAPSHOT_DIR, defaults.snapshot_dir),
        }
    }

    pub fn resource_limits(&self) -> Result<ResourceLimits, LimitError> {
        ResourceLimits::parse(&self.cpu_limit, &self.memory_limit)
    }

    pub fn allowlist(&self) -> CommandAllowlist {
        CommandAllowlist::new(self.allowed_commands.iter().cloned())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.sample_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn image_pull_timeout(&self) -> Duration {
        Duration::from_secs(self.image_pull_timeout_secs)
    }
}
