// ABOUTME: CLI commands for the kill switch (watch, kill)
// ABOUTME: Runs the watchdog in the foreground and prints termination reports

use super::print_json;
use anyhow::{bail, Result};
use colored::*;
use std::time::Duration;
use tracing::info;
use warden_sandbox::{KillSwitchState, TerminationReport, Warden};

pub async fn watch_command(warden: &Warden, interval: Option<u64>) -> Result<()> {
    let interval = match interval {
        Some(0) => bail!("--interval must be at least 1 second"),
        Some(secs) => Duration::from_secs(secs),
        None => warden.settings.poll_interval(),
    };

    println!(
        "{} Watching (every {}s, max {} '{}' processes, limits {})",
        "👁".cyan(),
        interval.as_secs(),
        warden.settings.max_processes,
        warden.settings.process_marker,
        warden.governor.limits()
    );

    let mut handle = warden.kill_switch.spawn_watchdog(interval);

    tokio::select! {
        result = &mut handle => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            handle.abort();
            let _ = handle.await;
            if !warden.kill_switch.is_tripped() {
                info!("Watch interrupted, kill switch still armed");
                println!("{}", "Stopped watching. Kill switch was not triggered.".yellow());
                return Ok(());
            }
            // Aborting the watchdog leaves the termination task running
            println!("{}", "Termination in progress, waiting for it to finish...".yellow());
            while warden.kill_switch.state() != KillSwitchState::Terminated {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }

    match warden.kill_switch.last_report() {
        Some(report) => finish(&report),
        None => Ok(()),
    }
}

pub async fn kill_command(warden: &Warden, reason: &str) -> Result<()> {
    match warden.kill_switch.activate(reason).await {
        Some(report) => finish(&report),
        None => bail!("Kill switch was already triggered"),
    }
}

fn finish(report: &TerminationReport) -> Result<()> {
    println!(
        "{} Kill switch triggered: {}",
        "⚠".red().bold(),
        report.reason.bold()
    );
    print_json(report)?;

    if !report.errors.is_empty() {
        bail!(
            "Termination finished with {} failed step(s)",
            report.errors.len()
        );
    }
    Ok(())
}
