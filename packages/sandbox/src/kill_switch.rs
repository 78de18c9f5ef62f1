// ABOUTME: Emergency kill switch owning the Armed -> Triggered -> Terminated safety state machine
// ABOUTME: Kills marked processes, isolates and tears down every managed environment, wipes scratch files

use crate::audit::AuditSink;
use crate::error::ProcessError;
use crate::governor::ResourceGovernor;
use crate::isolator::NetworkIsolator;
use crate::manager::ContainerLifecycleManager;
use crate::process::{ProcessInfo, ProcessTable};
use crate::settings::WardenSettings;
use crate::snapshot::SnapshotManager;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum KillSwitchState {
    Armed = 0,
    Triggered = 1,
    Terminated = 2,
}

impl KillSwitchState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => KillSwitchState::Armed,
            1 => KillSwitchState::Triggered,
            _ => KillSwitchState::Terminated,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KillSwitchConfig {
    pub max_processes: usize,
    pub process_marker: String,
    pub scratch_prefix: String,
    pub temp_root: PathBuf,
    pub snapshot_before_termination: bool,
    pub snapshot_timeout: Duration,
}

impl KillSwitchConfig {
    pub fn from_settings(settings: &WardenSettings) -> Self {
        Self {
            max_processes: settings.max_processes,
            process_marker: settings.process_marker.clone(),
            scratch_prefix: settings.scratch_prefix.clone(),
            temp_root: settings.temp_root.clone(),
            snapshot_before_termination: settings.snapshot_before_termination,
            snapshot_timeout: Duration::from_secs(30),
        }
    }
}

/// What one run of the termination sequence did
#[derive(Debug, Clone, Serialize)]
pub struct TerminationReport {
    pub reason: String,
    pub processes_killed: Vec<u32>,
    pub environments_isolated: Vec<String>,
    pub environments_torn_down: Vec<String>,
    pub snapshots: Vec<PathBuf>,
    pub temp_entries_removed: usize,
    /// Step failures, in the order they happened
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TerminationReport {
    fn new(reason: &str) -> Self {
        let now = Utc::now();
        Self {
            reason: reason.to_string(),
            processes_killed: Vec::new(),
            environments_isolated: Vec::new(),
            environments_torn_down: Vec::new(),
            snapshots: Vec::new(),
            temp_entries_removed: 0,
            errors: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    fn fail(&mut self, step: &str, err: impl std::fmt::Display) {
        let message = format!("{}: {}", step, err);
        error!("Kill switch step failed: {}", message);
        self.errors.push(message);
    }
}

/// Single authority allowed to terminate workloads
pub struct KillSwitch {
    inner: Arc<Inner>,
}

/// State and collaborators shared with the detached termination task
struct Inner {
    state: AtomicU8,
    config: KillSwitchConfig,
    governor: Arc<ResourceGovernor>,
    isolator: Arc<NetworkIsolator>,
    lifecycle: Arc<ContainerLifecycleManager>,
    snapshots: Arc<SnapshotManager>,
    processes: Arc<dyn ProcessTable>,
    audit: Arc<dyn AuditSink>,
    last_report: Mutex<Option<TerminationReport>>,
}

impl KillSwitch {
    pub fn new(
        config: KillSwitchConfig,
        governor: Arc<ResourceGovernor>,
        isolator: Arc<NetworkIsolator>,
        lifecycle: Arc<ContainerLifecycleManager>,
        snapshots: Arc<SnapshotManager>,
        processes: Arc<dyn ProcessTable>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(KillSwitchState::Armed as u8),
                config,
                governor,
                isolator,
                lifecycle,
                snapshots,
                processes,
                audit,
                last_report: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> KillSwitchState {
        KillSwitchState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn is_tripped(&self) -> bool {
        self.state() != KillSwitchState::Armed
    }

    /// Report of the termination run, once it has finished
    pub fn last_report(&self) -> Option<TerminationReport> {
        match self.inner.last_report.lock() {
            Ok(report) => report.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Check the process ceiling and resource limits, triggering on any breach
    ///
    /// Returns `true` once the switch has tripped ("stop now"), `false` while armed.
    pub async fn monitor(&self, processes: &[ProcessInfo]) -> bool {
        if self.is_tripped() {
            return true;
        }

        let max_processes = self.inner.config.max_processes;
        if processes.len() > max_processes {
            warn!(
                "Process count {} exceeds limit {}",
                processes.len(),
                max_processes
            );
            self.inner.audit.record(
                "process_limit_exceeded",
                json!({
                    "count": processes.len(),
                    "limit": max_processes,
                    "pids": processes.iter().map(|p| p.pid).collect::<Vec<_>>(),
                }),
            );
            self.activate("process_limit_exceeded").await;
            return true;
        }

        if self.inner.governor.check_resources().await.any() {
            self.activate("resource_violation").await;
            return true;
        }

        self.is_tripped()
    }

    /// Run `monitor` against the host processes carrying the process marker
    pub async fn monitor_host(&self) -> bool {
        let table = self.inner.processes.clone();
        let marker = self.inner.config.process_marker.clone();
        let processes = match tokio::task::spawn_blocking(move || table.matching(&marker)).await {
            Ok(processes) => processes,
            Err(e) => {
                warn!("Process enumeration failed: {}", e);
                Vec::new()
            }
        };
        self.monitor(&processes).await
    }

    /// Poll `monitor_host` every `interval` until the switch trips
    pub fn spawn_watchdog(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let switch = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Kill switch watchdog started (interval {:?})", interval);
            loop {
                ticker.tick().await;
                if switch.monitor_host().await {
                    info!("Kill switch tripped, watchdog exiting");
                    break;
                }
            }
        })
    }

    /// Trip the switch and run the termination sequence
    ///
    /// Only the caller that moves the state out of `Armed` starts the sequence
    /// and receives the report; every other caller gets `None` immediately.
    /// The sequence runs on its own task, so dropping this future (a timeout,
    /// a lost `select!` branch, an aborted watchdog) does not stop it.
    pub async fn activate(&self, reason: &str) -> Option<TerminationReport> {
        if self
            .inner
            .state
            .compare_exchange(
                KillSwitchState::Armed as u8,
                KillSwitchState::Triggered as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            debug!("Kill switch already tripped, ignoring activation ({})", reason);
            return None;
        }

        error!("KILL SWITCH ACTIVATED: {}", reason);
        self.inner
            .audit
            .record("killswitch_activated", json!({ "reason": reason }));

        let inner = Arc::clone(&self.inner);
        let reason = reason.to_string();
        let sequence = tokio::spawn(async move { inner.run(&reason).await });

        match sequence.await {
            Ok(report) => Some(report),
            Err(e) => {
                error!("Kill switch termination task failed: {}", e);
                self.inner
                    .audit
                    .record("killswitch_error", json!({ "error": e.to_string() }));
                None
            }
        }
    }
}

impl Inner {
    async fn run(&self, reason: &str) -> TerminationReport {
        let report = self.terminate(reason).await;

        info!(
            "Kill switch finished: {} processes killed, {} environments torn down, {} errors",
            report.processes_killed.len(),
            report.environments_torn_down.len(),
            report.errors.len()
        );
        self.audit.record(
            "killswitch_completed",
            serde_json::to_value(&report).unwrap_or_else(|e| json!({ "error": e.to_string() })),
        );

        match self.last_report.lock() {
            Ok(mut slot) => *slot = Some(report.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(report.clone()),
        }
        self.state
            .store(KillSwitchState::Terminated as u8, Ordering::SeqCst);
        report
    }

    async fn terminate(&self, reason: &str) -> TerminationReport {
        let mut report = TerminationReport::new(reason);

        self.kill_marked_processes(&mut report).await;

        let environment_ids = self.collect_environment_ids(&mut report).await;

        for id in &environment_ids {
            match self.isolator.isolate(id).await {
                Ok(_) => report.environments_isolated.push(id.clone()),
                Err(e) => report.fail(&format!("isolate {}", id), e),
            }
        }

        if self.config.snapshot_before_termination {
            for id in &environment_ids {
                match tokio::time::timeout(
                    self.config.snapshot_timeout,
                    self.snapshots.create_snapshot(id),
                )
                .await
                {
                    Ok(Ok(snapshot)) => report.snapshots.push(snapshot.archive_path),
                    Ok(Err(e)) => report.fail(&format!("snapshot {}", id), e),
                    Err(_) => report.fail(
                        &format!("snapshot {}", id),
                        format!("timed out after {:?}", self.config.snapshot_timeout),
                    ),
                }
            }
        }

        for id in &environment_ids {
            match self.lifecycle.teardown(id).await {
                Ok(()) => report.environments_torn_down.push(id.clone()),
                Err(e) => report.fail(&format!("teardown {}", id), e),
            }
        }

        self.remove_scratch_entries(&mut report).await;

        report.finished_at = Utc::now();
        report
    }

    async fn kill_marked_processes(&self, report: &mut TerminationReport) {
        let table = self.processes.clone();
        let marker = self.config.process_marker.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            table
                .matching(&marker)
                .into_iter()
                .map(|process| (process.pid, table.kill(process.pid)))
                .collect::<Vec<_>>()
        })
        .await;

        let results = match outcome {
            Ok(results) => results,
            Err(e) => {
                report.fail("kill processes", e);
                return;
            }
        };

        for (pid, result) in results {
            match result {
                Ok(()) => {
                    info!("Killed process {}", pid);
                    report.processes_killed.push(pid);
                }
                Err(ProcessError::OwnProcess(_)) => {
                    debug!("Skipping own process {}", pid);
                }
                Err(e) => report.fail("kill process", e),
            }
        }
    }

    /// Managed environments known to the runtime plus any still in the registry
    async fn collect_environment_ids(&self, report: &mut TerminationReport) -> Vec<String> {
        let mut ids: BTreeSet<String> = self
            .lifecycle
            .registered_environment_ids()
            .await
            .into_iter()
            .collect();

        match self.lifecycle.managed_environment_ids().await {
            Ok(listed) => ids.extend(listed),
            Err(e) => report.fail("list environments", e),
        }

        ids.into_iter().collect()
    }

    async fn remove_scratch_entries(&self, report: &mut TerminationReport) {
        let prefix = &self.config.scratch_prefix;
        if prefix.is_empty() {
            warn!("No scratch prefix configured, skipping temp cleanup");
            return;
        }

        let mut entries = match tokio::fs::read_dir(&self.config.temp_root).await {
            Ok(entries) => entries,
            Err(e) => {
                report.fail("read temp root", e);
                return;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    report.fail("read temp root", e);
                    break;
                }
            };
            let matches = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(prefix.as_str()));
            if !matches {
                continue;
            }

            let path = entry.path();
            let removed = match entry.file_type().await {
                Ok(kind) if kind.is_dir() => tokio::fs::remove_dir_all(&path).await,
                Ok(_) => tokio::fs::remove_file(&path).await,
                Err(e) => Err(e),
            };
            match removed {
                Ok(()) => {
                    debug!("Removed scratch entry {}", path.display());
                    report.temp_entries_removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => report.fail(&format!("remove {}", path.display()), e),
            }
        }
    }
}
