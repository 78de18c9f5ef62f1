// ABOUTME: Resource governor comparing sampled CPU/memory usage against configured limits
// ABOUTME: Host sampling via sysinfo, container sampling via runtime stats, append-only violation trail

use crate::audit::AuditSink;
use crate::error::RuntimeError;
use crate::limits::ResourceLimits;
use crate::runtime::ContainerRuntime;
use crate::types::{LimitKind, ResourceCheck, ResourceSample, ViolationRecord};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::System;
use tracing::{debug, warn};

/// Source of point-in-time resource usage
#[async_trait]
pub trait ResourceSampler: Send + Sync {
    async fn sample(&self) -> Result<ResourceSample, RuntimeError>;
}

/// Samples whole-host CPU and memory usage
///
/// Keeps one `System` alive so each refresh measures CPU since the previous poll;
/// the very first sample may report 0% CPU.
pub struct HostSampler {
    system: Mutex<System>,
}

impl HostSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceSampler for HostSampler {
    async fn sample(&self) -> Result<ResourceSample, RuntimeError> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| RuntimeError::Fault("Host sampler lock poisoned".to_string()))?;
        system.refresh_cpu();
        system.refresh_memory();

        Ok(ResourceSample {
            cpu_fraction: (system.global_cpu_info().cpu_usage() as f64 / 100.0).clamp(0.0, 1.0),
            memory_used_bytes: system.used_memory(),
            memory_total_bytes: system.total_memory(),
            sampled_at: Utc::now(),
        })
    }
}

/// Samples one container through the runtime's stats endpoint
pub struct ContainerSampler {
    runtime: Arc<dyn ContainerRuntime>,
    container: String,
}

impl ContainerSampler {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, container: impl Into<String>) -> Self {
        Self {
            runtime,
            container: container.into(),
        }
    }
}

#[async_trait]
impl ResourceSampler for ContainerSampler {
    async fn sample(&self) -> Result<ResourceSample, RuntimeError> {
        let usage = self.runtime.stats(&self.container).await?;
        Ok(ResourceSample {
            cpu_fraction: usage.cpu_fraction,
            memory_used_bytes: usage.memory_used_bytes,
            memory_total_bytes: usage.memory_limit_bytes,
            sampled_at: Utc::now(),
        })
    }
}

/// Compares samples against limits and keeps the violation audit trail
pub struct ResourceGovernor {
    limits: ResourceLimits,
    sampler: Arc<dyn ResourceSampler>,
    audit: Arc<dyn AuditSink>,
    sample_timeout: Duration,
    violations: Mutex<Vec<ViolationRecord>>,
}

impl ResourceGovernor {
    pub fn new(
        limits: ResourceLimits,
        sampler: Arc<dyn ResourceSampler>,
        audit: Arc<dyn AuditSink>,
        sample_timeout: Duration,
    ) -> Self {
        Self {
            limits,
            sampler,
            audit,
            sample_timeout,
            violations: Mutex::new(Vec::new()),
        }
    }

    pub fn limits(&self) -> ResourceLimits {
        self.limits
    }

    /// Take one sample and compare it against the limits
    ///
    /// Completes within the sample timeout. A sample that fails or times out
    /// reports no violation.
    pub async fn check_resources(&self) -> ResourceCheck {
        match tokio::time::timeout(self.sample_timeout, self.sampler.sample()).await {
            Ok(Ok(sample)) => self.evaluate(&sample),
            Ok(Err(e)) => {
                warn!("Resource sampling failed: {}", e);
                self.audit
                    .record("resource_sample_error", json!({ "error": e.to_string() }));
                ResourceCheck::default()
            }
            Err(_) => {
                warn!(
                    "Resource sampling exceeded {:?}, skipping this poll",
                    self.sample_timeout
                );
                self.audit.record(
                    "resource_sample_error",
                    json!({
                        "error": "sample timed out",
                        "timeout_ms": self.sample_timeout.as_millis() as u64,
                    }),
                );
                ResourceCheck::default()
            }
        }
    }

    /// Compare an existing sample against the limits, recording any violations
    pub fn evaluate(&self, sample: &ResourceSample) -> ResourceCheck {
        let check = ResourceCheck {
            cpu_violation: sample.cpu_fraction > self.limits.cpu_fraction(),
            memory_violation: sample.memory_used_bytes > self.limits.memory_bytes(),
        };

        debug!(
            "Resource sample: cpu={:.1}% memory={} bytes ({:.1}%)",
            sample.cpu_fraction * 100.0,
            sample.memory_used_bytes,
            sample.memory_fraction() * 100.0
        );

        if !check.any() {
            return check;
        }

        let mut records = Vec::with_capacity(2);
        if check.cpu_violation {
            records.push(ViolationRecord {
                kind: LimitKind::Cpu,
                sampled_value: sample.cpu_fraction,
                limit_value: self.limits.cpu_fraction(),
                timestamp: sample.sampled_at,
            });
        }
        if check.memory_violation {
            records.push(ViolationRecord {
                kind: LimitKind::Memory,
                sampled_value: sample.memory_used_bytes as f64,
                limit_value: self.limits.memory_bytes() as f64,
                timestamp: sample.sampled_at,
            });
        }

        warn!(
            "Resource limits exceeded: cpu={} memory={}",
            check.cpu_violation, check.memory_violation
        );
        self.audit.record(
            "resource_violation",
            json!({
                "cpu_usage": sample.cpu_fraction,
                "memory_usage": sample.memory_fraction(),
                "memory_used_bytes": sample.memory_used_bytes,
                "violations": check,
            }),
        );

        match self.violations.lock() {
            Ok(mut trail) => trail.extend(records),
            Err(poisoned) => poisoned.into_inner().extend(records),
        }

        check
    }

    /// Copy of every violation recorded so far, oldest first
    pub fn violations(&self) -> Vec<ViolationRecord> {
        match self.violations.lock() {
            Ok(trail) => trail.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
