// ABOUTME: Core type definitions for isolated environments and their observations
// ABOUTME: Defines environment records, command output, resource samples, and violation records

use crate::limits::ResourceLimits;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Discoverability marker carried by every environment this system creates
pub const MANAGED_LABEL: &str = "warden.managed";
pub const ENVIRONMENT_ID_LABEL: &str = "warden.environment_id";
pub const SECURITY_POLICY_LABEL: &str = "warden.security_policy";
pub const CPU_FRACTION_LABEL: &str = "warden.cpu_fraction";
pub const MEMORY_BYTES_LABEL: &str = "warden.memory_bytes";

/// Label filter selecting only managed environments
pub fn managed_label_filter() -> String {
    format!("{}=true", MANAGED_LABEL)
}

/// Runtime container name for an environment id
pub fn container_name(prefix: &str, environment_id: &str) -> String {
    format!("{}-{}", prefix, environment_id)
}

/// Network posture of an isolated environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPolicy {
    /// No network attached at all
    NoNetwork,
    /// Restricted bridge network
    Bridged,
}

impl SecurityPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityPolicy::NoNetwork => "no_network",
            SecurityPolicy::Bridged => "bridged",
        }
    }

    /// Network mode passed to the container runtime
    pub fn network_mode(&self) -> &'static str {
        match self {
            SecurityPolicy::NoNetwork => "none",
            SecurityPolicy::Bridged => "bridge",
        }
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "no_network" | "none" => Ok(SecurityPolicy::NoNetwork),
            "bridged" | "bridge" => Ok(SecurityPolicy::Bridged),
            other => Err(format!("Unknown security policy: {}", other)),
        }
    }
}

/// Lifecycle of an environment: Created → Running → Terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Created,
    Running,
    /// Container exists but is paused or restarting; it accepts no commands
    Paused,
    Terminated,
}

impl LifecycleState {
    /// Map a runtime state string ("created", "running", "exited", ...) onto the lifecycle
    pub fn from_runtime_state(state: &str) -> Self {
        match state.to_lowercase().as_str() {
            "created" => LifecycleState::Created,
            "running" => LifecycleState::Running,
            "paused" | "restarting" => LifecycleState::Paused,
            _ => LifecycleState::Terminated,
        }
    }
}

/// A provisioned, resource-capped execution context
///
/// Values handed out by the lifecycle manager are point-in-time copies; re-query
/// the manager instead of holding on to `state`.
#[derive(Debug, Clone, Serialize)]
pub struct IsolatedEnvironment {
    pub id: String,
    /// Runtime-side container id
    pub container_id: String,
    /// Runtime-side container name, usable wherever an id is accepted
    pub container_name: String,
    pub image: String,
    pub security_policy: SecurityPolicy,
    pub limits: ResourceLimits,
    pub state: LifecycleState,
    pub labels: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl IsolatedEnvironment {
    pub fn is_running(&self) -> bool {
        self.state == LifecycleState::Running
    }
}

/// Result of a command executed inside an environment
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Point-in-time CPU and memory usage of the host or one environment
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSample {
    /// CPU utilization as a fraction of capacity (host: all cores, container: one core)
    pub cpu_fraction: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub sampled_at: DateTime<Utc>,
}

impl ResourceSample {
    pub fn memory_fraction(&self) -> f64 {
        if self.memory_total_bytes == 0 {
            0.0
        } else {
            self.memory_used_bytes as f64 / self.memory_total_bytes as f64
        }
    }
}

/// Which limit a violation refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitKind {
    Cpu,
    Memory,
}

/// Immutable record of one exceeded limit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViolationRecord {
    pub kind: LimitKind,
    pub sampled_value: f64,
    pub limit_value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of one governor poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceCheck {
    pub cpu_violation: bool,
    pub memory_violation: bool,
}

impl ResourceCheck {
    pub fn any(&self) -> bool {
        self.cpu_violation || self.memory_violation
    }
}
