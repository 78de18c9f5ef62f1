// ABOUTME: CLI commands for workspace snapshots (create, restore, list)
// ABOUTME: Restores resolve snapshots from their on-disk manifests

use super::{format_date, new_table, print_json};
use anyhow::{Context, Result};
use colored::*;
use std::path::Path;
use warden_sandbox::limits::format_bytes;
use warden_sandbox::Warden;

pub async fn create_command(warden: &Warden, id: &str) -> Result<()> {
    let snapshot = warden.snapshots.create_snapshot(id).await?;
    eprintln!(
        "{} Captured {} ({})",
        "✓".green(),
        snapshot.source_path,
        format_bytes(snapshot.size_bytes)
    );
    print_json(&snapshot)
}

pub async fn restore_command(warden: &Warden, id: &str, manifest: &Path) -> Result<()> {
    let snapshot = warden
        .snapshots
        .open_snapshot(manifest)
        .await
        .with_context(|| format!("Failed to open snapshot manifest {}", manifest.display()))?;

    warden.snapshots.restore_snapshot(id, &snapshot).await?;
    println!(
        "{} Restored {} from {}",
        "✓".green(),
        id.bold(),
        snapshot.archive_path.display()
    );
    Ok(())
}

pub async fn list_command(warden: &Warden, id: &str, json: bool) -> Result<()> {
    let snapshots = warden.snapshots.list_snapshots(id).await?;

    if json {
        return print_json(&snapshots);
    }

    if snapshots.is_empty() {
        println!("{}", format!("No snapshots for {}.", id).yellow());
        return Ok(());
    }

    let mut table = new_table();
    table.set_header(vec!["Created", "Size", "SHA-256", "Manifest"]);
    for snapshot in &snapshots {
        table.add_row(vec![
            format_date(&snapshot.created_at),
            format_bytes(snapshot.size_bytes),
            snapshot.sha256.chars().take(12).collect::<String>(),
            snapshot.manifest_path.display().to_string(),
        ]);
    }

    println!("{}", table);
    Ok(())
}
