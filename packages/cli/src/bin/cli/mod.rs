// ABOUTME: Shared plumbing for warden CLI commands
// ABOUTME: Wires the sandbox components to Docker and renders command results

pub mod environments;
pub mod safety;
pub mod snapshots;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{presets::UTF8_FULL, modifiers::UTF8_ROUND_CORNERS, ContentArrangement, Table};
use serde::Serialize;
use std::sync::Arc;
use warden_sandbox::{
    DockerRuntime, HostSampler, SystemProcessTable, TracingAuditSink, Warden, WardenSettings,
};

/// Build every sandbox component against the local Docker daemon
pub fn build_warden() -> Result<Warden> {
    let settings = WardenSettings::from_env();
    let runtime = DockerRuntime::with_pull_timeout(settings.image_pull_timeout())
        .context("Failed to connect to the container runtime")?;

    Warden::build(
        settings,
        Arc::new(runtime),
        Arc::new(HostSampler::new()),
        Arc::new(SystemProcessTable::new()),
        Arc::new(TracingAuditSink),
    )
    .context("Invalid resource limits in WARDEN_CPU_LIMIT / WARDEN_MEMORY_LIMIT")
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%Y-%m-%d %H:%M:%S").to_string()
}
