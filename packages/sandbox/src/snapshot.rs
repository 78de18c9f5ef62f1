// ABOUTME: Workspace snapshots written as tar archives with a JSON manifest as completion marker
// ABOUTME: Restore verifies the checksum, stages the archive inside the container, then swaps it in

use crate::audit::AuditSink;
use crate::error::SnapshotError;
use crate::runtime::{ContainerRuntime, ExecSpec};
use crate::types::{container_name, LifecycleState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Largest archive a restore will load; the runtime upload takes the archive in one piece
pub const MAX_RESTORE_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Handle to a completed snapshot; serialized as the manifest next to the archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub environment_id: String,
    pub archive_path: PathBuf,
    pub manifest_path: PathBuf,
    /// Directory inside the environment that was captured
    pub source_path: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

pub struct SnapshotManager {
    runtime: Arc<dyn ContainerRuntime>,
    audit: Arc<dyn AuditSink>,
    snapshot_dir: PathBuf,
    name_prefix: String,
    workspace_path: String,
}

impl SnapshotManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        audit: Arc<dyn AuditSink>,
        snapshot_dir: impl Into<PathBuf>,
        name_prefix: impl Into<String>,
        workspace_path: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            audit,
            snapshot_dir: snapshot_dir.into(),
            name_prefix: name_prefix.into(),
            workspace_path: workspace_path.into(),
        }
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    /// Capture the environment's workspace into a new archive
    pub async fn create_snapshot(&self, environment_id: &str) -> Result<Snapshot> {
        match self.capture(environment_id).await {
            Ok(snapshot) => {
                info!(
                    "Created snapshot of {} at {} ({} bytes)",
                    environment_id,
                    snapshot.archive_path.display(),
                    snapshot.size_bytes
                );
                self.audit.record(
                    "snapshot_created",
                    json!({
                        "environment_id": environment_id,
                        "path": snapshot.archive_path,
                        "size_bytes": snapshot.size_bytes,
                        "sha256": snapshot.sha256,
                    }),
                );
                Ok(snapshot)
            }
            Err(e) => {
                warn!("Snapshot of {} failed: {}", environment_id, e);
                self.audit.record(
                    "snapshot_error",
                    json!({ "environment_id": environment_id, "error": e.to_string() }),
                );
                Err(e)
            }
        }
    }

    /// Replace the environment's workspace with the snapshot content
    ///
    /// Fails without touching the environment when it is not running or the
    /// archive does not verify.
    pub async fn restore_snapshot(&self, environment_id: &str, snapshot: &Snapshot) -> Result<()> {
        match self.restore(environment_id, snapshot).await {
            Ok(()) => {
                info!(
                    "Restored {} from {}",
                    environment_id,
                    snapshot.archive_path.display()
                );
                self.audit.record(
                    "snapshot_restored",
                    json!({
                        "environment_id": environment_id,
                        "path": snapshot.archive_path,
                        "source_environment_id": snapshot.environment_id,
                    }),
                );
                Ok(())
            }
            Err(e) => {
                warn!("Restore of {} failed: {}", environment_id, e);
                self.audit.record(
                    "restore_error",
                    json!({
                        "environment_id": environment_id,
                        "path": snapshot.archive_path,
                        "error": e.to_string(),
                    }),
                );
                Err(e)
            }
        }
    }

    /// Completed snapshots of one environment, oldest first
    pub async fn list_snapshots(&self, environment_id: &str) -> Result<Vec<Snapshot>> {
        let mut entries = match tokio::fs::read_dir(&self.snapshot_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("{}-", environment_id);
        let mut snapshots = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !name.starts_with(&prefix) || !name.ends_with(".json") {
                continue;
            }
            match self.open_snapshot(entry.path()).await {
                Ok(snapshot) if snapshot.environment_id == environment_id => {
                    snapshots.push(snapshot)
                }
                Ok(_) => {}
                Err(e) => debug!("Skipping snapshot manifest {}: {}", name, e),
            }
        }

        snapshots.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.archive_path.cmp(&b.archive_path))
        });
        Ok(snapshots)
    }

    /// Load a snapshot from its manifest
    pub async fn open_snapshot(&self, manifest_path: impl AsRef<Path>) -> Result<Snapshot> {
        let manifest_path = manifest_path.as_ref();
        let raw = tokio::fs::read(manifest_path).await?;
        let snapshot: Snapshot = serde_json::from_slice(&raw).map_err(|e| {
            SnapshotError::Corrupt(format!(
                "Invalid manifest {}: {}",
                manifest_path.display(),
                e
            ))
        })?;

        if !tokio::fs::try_exists(&snapshot.archive_path).await? {
            return Err(SnapshotError::Corrupt(format!(
                "Archive missing for manifest {}",
                manifest_path.display()
            )));
        }
        Ok(snapshot)
    }

    /// Remove a snapshot; the manifest goes first so a partial delete is never listed
    pub async fn delete_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        remove_if_exists(&snapshot.manifest_path).await?;
        remove_if_exists(&snapshot.archive_path).await?;
        debug!("Deleted snapshot {}", snapshot.archive_path.display());
        Ok(())
    }

    async fn capture(&self, environment_id: &str) -> Result<Snapshot> {
        let container = container_name(&self.name_prefix, environment_id);
        self.runtime.inspect_container(&container).await?;

        tokio::fs::create_dir_all(&self.snapshot_dir).await?;

        let created_at = Utc::now();
        let mut millis = created_at.timestamp_millis();
        let (name, archive_path) = loop {
            let name = format!("{}-{}", environment_id, millis);
            let path = self.snapshot_dir.join(format!("{}.tar", name));
            if !tokio::fs::try_exists(&path).await? {
                break (name, path);
            }
            millis += 1;
        };
        let staging_path = self.snapshot_dir.join(format!(".{}.tar.partial", name));
        let manifest_path = self.snapshot_dir.join(format!("{}.json", name));

        let size_bytes = match self.download_to(&container, &staging_path).await {
            Ok(size) => size,
            Err(e) => {
                let _ = tokio::fs::remove_file(&staging_path).await;
                return Err(e);
            }
        };

        tokio::fs::rename(&staging_path, &archive_path).await?;

        let snapshot = Snapshot {
            environment_id: environment_id.to_string(),
            sha256: sha256_file(&archive_path).await?,
            archive_path,
            manifest_path,
            source_path: self.workspace_path.clone(),
            size_bytes,
            created_at,
        };

        if let Err(e) = write_manifest(&snapshot, &name, &self.snapshot_dir).await {
            let _ = tokio::fs::remove_file(&snapshot.archive_path).await;
            return Err(e);
        }

        Ok(snapshot)
    }

    async fn download_to(&self, container: &str, staging_path: &Path) -> Result<u64> {
        let mut file = tokio::fs::File::create(staging_path).await?;
        let size = self
            .runtime
            .download_archive(container, &self.workspace_path, &mut file)
            .await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(size)
    }

    async fn restore(&self, environment_id: &str, snapshot: &Snapshot) -> Result<()> {
        let (parent, base) = split_workspace(&self.workspace_path)?;

        let (archive, checksum) =
            read_archive(&snapshot.archive_path, snapshot.size_bytes, MAX_RESTORE_BYTES).await?;
        if checksum != snapshot.sha256 {
            return Err(SnapshotError::Corrupt(format!(
                "Checksum mismatch for {}: expected {}, found {}",
                snapshot.archive_path.display(),
                snapshot.sha256,
                checksum
            )));
        }
        verify_archive(&archive, base)?;

        let container = container_name(&self.name_prefix, environment_id);
        let details = self.runtime.inspect_container(&container).await?;
        let state = LifecycleState::from_runtime_state(&details.state);
        if state != LifecycleState::Running {
            return Err(SnapshotError::EnvironmentNotReady(format!(
                "Environment {} is {:?}",
                environment_id, state
            )));
        }

        let token = Uuid::new_v4().simple().to_string();
        let staging_dir = join_posix(parent, &format!(".warden-restore-{}", token));
        let backup_dir = join_posix(parent, &format!(".warden-backup-{}", token));
        let staged_workspace = join_posix(&staging_dir, base);

        let result = self
            .stage_and_swap(&container, archive, &staging_dir, &staged_workspace, &backup_dir)
            .await;

        if let Err(e) = self.run(&container, &["rm", "-rf", staging_dir.as_str()]).await {
            warn!("Failed to remove restore staging {}: {}", staging_dir, e);
        }
        result
    }

    async fn stage_and_swap(
        &self,
        container: &str,
        archive: Vec<u8>,
        staging_dir: &str,
        staged_workspace: &str,
        backup_dir: &str,
    ) -> Result<()> {
        self.run(container, &["mkdir", "-p", staging_dir]).await?;
        self.runtime
            .upload_archive(container, staging_dir, archive)
            .await?;

        self.run(container, &["mv", self.workspace_path.as_str(), backup_dir])
            .await?;
        if let Err(e) = self
            .run(container, &["mv", staged_workspace, self.workspace_path.as_str()])
            .await
        {
            if let Err(rollback) = self
                .run(container, &["mv", backup_dir, self.workspace_path.as_str()])
                .await
            {
                warn!(
                    "Rollback of {} failed, previous content left at {}: {}",
                    self.workspace_path, backup_dir, rollback
                );
            }
            return Err(e);
        }

        if let Err(e) = self.run(container, &["rm", "-rf", backup_dir]).await {
            warn!("Failed to remove restore backup {}: {}", backup_dir, e);
        }
        Ok(())
    }

    async fn run(&self, container: &str, argv: &[&str]) -> Result<()> {
        let output = self
            .runtime
            .exec(container, &ExecSpec::new(argv.iter().copied()))
            .await?;
        if output.exit_code != 0 {
            return Err(SnapshotError::IOFailure(format!(
                "`{}` exited with {}: {}",
                argv.join(" "),
                output.exit_code,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

async fn write_manifest(snapshot: &Snapshot, name: &str, dir: &Path) -> Result<()> {
    let staging = dir.join(format!(".{}.json.partial", name));
    let body = serde_json::to_vec_pretty(snapshot)
        .map_err(|e| SnapshotError::IOFailure(format!("Failed to encode manifest: {}", e)))?;

    let mut file = tokio::fs::File::create(&staging).await?;
    file.write_all(&body).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&staging, &snapshot.manifest_path).await?;
    Ok(())
}

async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Load an archive whose size must match the manifest, hashing it as it is read
async fn read_archive(path: &Path, expected_size: u64, max_bytes: u64) -> Result<(Vec<u8>, String)> {
    let mut file = tokio::fs::File::open(path).await?;
    let actual_size = file.metadata().await?.len();
    if actual_size != expected_size {
        return Err(SnapshotError::Corrupt(format!(
            "Size mismatch for {}: expected {} bytes, found {}",
            path.display(),
            expected_size,
            actual_size
        )));
    }
    if actual_size > max_bytes {
        return Err(SnapshotError::IOFailure(format!(
            "Archive {} is {} bytes, above the restore limit of {}",
            path.display(),
            actual_size,
            max_bytes
        )));
    }

    let mut archive = Vec::with_capacity(actual_size as usize);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if archive.len() as u64 + n as u64 > actual_size {
            return Err(SnapshotError::Corrupt(format!(
                "{} grew while it was being read",
                path.display()
            )));
        }
        hasher.update(&buf[..n]);
        archive.extend_from_slice(&buf[..n]);
    }
    Ok((archive, format!("{:x}", hasher.finalize())))
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Check every entry lives under `root/` and nothing escapes it
fn verify_archive(bytes: &[u8], root: &str) -> Result<usize> {
    let corrupt = |e: std::io::Error| SnapshotError::Corrupt(format!("Unreadable archive: {}", e));

    let mut archive = tar::Archive::new(bytes);
    let mut count = 0;
    for entry in archive.entries().map_err(corrupt)? {
        let entry = entry.map_err(corrupt)?;
        let path = entry.path().map_err(corrupt)?;

        let mut components = path.components();
        let rooted = matches!(
            components.next(),
            Some(Component::Normal(first)) if first == OsStr::new(root)
        );
        let escapes =
            components.any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if !rooted || escapes {
            return Err(SnapshotError::Corrupt(format!(
                "Unexpected archive entry {}",
                path.display()
            )));
        }
        count += 1;
    }

    if count == 0 {
        return Err(SnapshotError::Corrupt("Archive is empty".to_string()));
    }
    Ok(count)
}

/// Split "/a/workspace" into ("/a", "workspace")
fn split_workspace(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, base)) if !base.is_empty() && !trimmed.is_empty() => {
            Ok((if parent.is_empty() { "/" } else { parent }, base))
        }
        _ => Err(SnapshotError::IOFailure(format!(
            "Workspace path must be absolute and not the root: {:?}",
            path
        ))),
    }
}

fn join_posix(parent: &str, child: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, child)
    } else {
        format!("{}/{}", parent, child)
    }
}
