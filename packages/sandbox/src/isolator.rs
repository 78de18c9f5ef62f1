// ABOUTME: Network isolation for running environments
// ABOUTME: Applies 100% netem packet loss and detaches the container from every runtime network

use crate::audit::AuditSink;
use crate::error::{IsolationError, RuntimeError};
use crate::runtime::{ContainerRuntime, ExecSpec};
use crate::types::{container_name, SecurityPolicy, SECURITY_POLICY_LABEL};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What `isolate` had to do for one environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationOutcome {
    /// Environment was provisioned without any network
    AlreadyIsolated,
    /// Loss policy applied and networks detached
    Isolated {
        loss_applied: bool,
        networks_detached: usize,
    },
}

pub struct NetworkIsolator {
    runtime: Arc<dyn ContainerRuntime>,
    audit: Arc<dyn AuditSink>,
    name_prefix: String,
    interface: String,
}

impl NetworkIsolator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        audit: Arc<dyn AuditSink>,
        name_prefix: impl Into<String>,
        interface: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            audit,
            name_prefix: name_prefix.into(),
            interface: interface.into(),
        }
    }

    /// Cut an environment off from the network
    ///
    /// Re-isolating an environment succeeds. A missing environment is
    /// `TargetUnavailable`.
    pub async fn isolate(&self, environment_id: &str) -> Result<IsolationOutcome, IsolationError> {
        match self.apply(environment_id).await {
            Ok(outcome) => {
                let (loss_applied, networks_detached) = match outcome {
                    IsolationOutcome::AlreadyIsolated => (false, 0),
                    IsolationOutcome::Isolated {
                        loss_applied,
                        networks_detached,
                    } => (loss_applied, networks_detached),
                };
                info!("Isolated network for environment {}", environment_id);
                self.audit.record(
                    "network_isolation",
                    json!({
                        "environment_id": environment_id,
                        "already_isolated": outcome == IsolationOutcome::AlreadyIsolated,
                        "loss_applied": loss_applied,
                        "networks_detached": networks_detached,
                    }),
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!("Network isolation failed for {}: {}", environment_id, e);
                self.audit.record(
                    "isolation_error",
                    json!({
                        "environment_id": environment_id,
                        "error": e.to_string(),
                    }),
                );
                Err(e)
            }
        }
    }

    async fn apply(&self, environment_id: &str) -> Result<IsolationOutcome, IsolationError> {
        let container = container_name(&self.name_prefix, environment_id);
        let details = self.runtime.inspect_container(&container).await?;

        let policy = details
            .labels
            .get(SECURITY_POLICY_LABEL)
            .and_then(|p| p.parse::<SecurityPolicy>().ok());
        let no_network = policy == Some(SecurityPolicy::NoNetwork)
            || details.network_mode.as_deref() == Some("none");
        if no_network {
            debug!("Environment {} has no network attached", environment_id);
            return Ok(IsolationOutcome::AlreadyIsolated);
        }

        let loss_applied = if details.is_running() {
            self.apply_packet_loss(&container).await?
        } else {
            false
        };

        let networks_detached = self.runtime.disconnect_networks(&container).await?;

        Ok(IsolationOutcome::Isolated {
            loss_applied,
            networks_detached,
        })
    }

    async fn apply_packet_loss(&self, container: &str) -> Result<bool, IsolationError> {
        // `replace` makes re-application a no-op instead of "file exists"
        let spec = ExecSpec::new([
            "tc",
            "qdisc",
            "replace",
            "dev",
            self.interface.as_str(),
            "root",
            "netem",
            "loss",
            "100%",
        ])
        .privileged();

        match self.runtime.exec(container, &spec).await {
            Ok(output) if output.exit_code == 0 => Ok(true),
            Ok(output) => {
                // Images without tc still get their networks detached
                warn!(
                    "tc exited with {} in {}: {}",
                    output.exit_code,
                    container,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                Ok(false)
            }
            Err(RuntimeError::Fault(msg)) => {
                warn!("Could not apply packet loss in {}: {}", container, msg);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
