// ABOUTME: Sandbox lifecycle and safety enforcement for autonomous workloads
// ABOUTME: Provisioning, resource governance, network isolation, snapshots, and the emergency kill switch

pub mod allowlist;
pub mod audit;
pub mod error;
pub mod governor;
pub mod isolator;
pub mod kill_switch;
pub mod limits;
pub mod manager;
pub mod process;
pub mod runtime;
pub mod settings;
pub mod snapshot;
pub mod types;

pub use allowlist::CommandAllowlist;
pub use audit::{AuditEvent, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use error::{
    ExecutionError, IsolationError, LimitError, ProcessError, ProvisionError, RuntimeError,
    SnapshotError, TeardownError,
};
pub use governor::{ContainerSampler, HostSampler, ResourceGovernor, ResourceSampler};
pub use isolator::{IsolationOutcome, NetworkIsolator};
pub use kill_switch::{KillSwitch, KillSwitchConfig, KillSwitchState, TerminationReport};
pub use limits::ResourceLimits;
pub use manager::{ContainerLifecycleManager, LifecycleConfig};
pub use process::{ProcessInfo, ProcessTable, SystemProcessTable};
pub use runtime::{ContainerRuntime, DockerRuntime};
pub use settings::WardenSettings;
pub use snapshot::{Snapshot, SnapshotManager};
pub use types::{
    CommandOutput, IsolatedEnvironment, LifecycleState, LimitKind, ResourceCheck, ResourceSample,
    SecurityPolicy, ViolationRecord,
};

use std::sync::Arc;

/// Every sandbox component wired to one shared runtime and audit sink
pub struct Warden {
    pub settings: WardenSettings,
    pub lifecycle: Arc<ContainerLifecycleManager>,
    pub isolator: Arc<NetworkIsolator>,
    pub snapshots: Arc<SnapshotManager>,
    pub governor: Arc<ResourceGovernor>,
    pub kill_switch: Arc<KillSwitch>,
}

impl Warden {
    /// Build the component graph from settings
    pub fn build(
        settings: WardenSettings,
        runtime: Arc<dyn ContainerRuntime>,
        sampler: Arc<dyn ResourceSampler>,
        processes: Arc<dyn ProcessTable>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, LimitError> {
        let limits = settings.resource_limits()?;

        let lifecycle = Arc::new(ContainerLifecycleManager::new(
            runtime.clone(),
            audit.clone(),
            LifecycleConfig::from_settings(&settings),
        ));
        let isolator = Arc::new(NetworkIsolator::new(
            runtime.clone(),
            audit.clone(),
            settings.container_name_prefix.clone(),
            settings.network_interface.clone(),
        ));
        let snapshots = Arc::new(SnapshotManager::new(
            runtime,
            audit.clone(),
            settings.snapshot_dir.clone(),
            settings.container_name_prefix.clone(),
            settings.workspace_path.clone(),
        ));
        let governor = Arc::new(ResourceGovernor::new(
            limits,
            sampler,
            audit.clone(),
            settings.sample_timeout(),
        ));
        let kill_switch = Arc::new(KillSwitch::new(
            KillSwitchConfig::from_settings(&settings),
            governor.clone(),
            isolator.clone(),
            lifecycle.clone(),
            snapshots.clone(),
            processes,
            audit,
        ));

        Ok(Self {
            settings,
            lifecycle,
            isolator,
            snapshots,
            governor,
            kill_switch,
        })
    }
}
