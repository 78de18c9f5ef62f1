// ABOUTME: CLI commands for environment lifecycle (provision, exec, teardown, list)
// ABOUTME: Thin wrappers over the lifecycle manager with table or JSON output

use super::{format_date, new_table, print_json};
use anyhow::{bail, Result};
use clap::Subcommand;
use colored::*;
use std::time::Duration;
use warden_sandbox::limits::format_bytes;
use warden_sandbox::{LifecycleState, SecurityPolicy, Warden};

#[derive(Subcommand)]
pub enum EnvironmentCommands {
    /// Provision a new isolated environment
    Provision {
        /// Base image (default: WARDEN_BASE_IMAGE)
        #[arg(long)]
        image: Option<String>,

        /// CPU limit, e.g. 80% or 0.5 (default: WARDEN_CPU_LIMIT)
        #[arg(long)]
        cpu: Option<String>,

        /// Memory limit, e.g. 16GB or 512MB (default: WARDEN_MEMORY_LIMIT)
        #[arg(long)]
        memory: Option<String>,

        /// Network policy: no_network or bridged (default: WARDEN_SECURITY_POLICY)
        #[arg(long)]
        policy: Option<SecurityPolicy>,
    },
    /// Run an allowlisted command inside an environment
    ///
    /// Options go before the command: everything after it is passed through,
    /// so `warden exec --timeout 5 ID ls -la` limits `ls -la` to five seconds.
    Exec {
        /// Environment ID
        id: String,

        /// Command and arguments, passed through verbatim
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,

        /// Timeout in seconds, given before the command (default: WARDEN_COMMAND_TIMEOUT_SECS)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Stop and remove an environment
    Teardown {
        /// Environment ID
        id: String,
    },
    /// List environments managed by warden
    List,
}

impl EnvironmentCommands {
    pub async fn execute(self, warden: &Warden, json: bool) -> Result<()> {
        match self {
            EnvironmentCommands::Provision {
                image,
                cpu,
                memory,
                policy,
            } => provision_command(warden, image, cpu, memory, policy).await,
            EnvironmentCommands::Exec {
                id,
                command,
                timeout,
            } => exec_command(warden, &id, &command.join(" "), timeout).await,
            EnvironmentCommands::Teardown { id } => teardown_command(warden, &id).await,
            EnvironmentCommands::List => list_command(warden, json).await,
        }
    }
}

async fn provision_command(
    warden: &Warden,
    image: Option<String>,
    cpu: Option<String>,
    memory: Option<String>,
    policy: Option<SecurityPolicy>,
) -> Result<()> {
    let settings = &warden.settings;
    let image = image.unwrap_or_else(|| settings.base_image.clone());
    let cpu = cpu.unwrap_or_else(|| settings.cpu_limit.clone());
    let memory = memory.unwrap_or_else(|| settings.memory_limit.clone());
    let policy = policy.unwrap_or(settings.security_policy);

    let env = warden
        .lifecycle
        .provision_with(&image, &cpu, &memory, policy)
        .await?;

    eprintln!("{} Provisioned {}", "✓".green(), env.id.bold());
    print_json(&env)
}

async fn exec_command(
    warden: &Warden,
    id: &str,
    command: &str,
    timeout: Option<u64>,
) -> Result<()> {
    let timeout = timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| warden.settings.command_timeout());

    let output = warden.lifecycle.run_command(id, command, timeout).await?;
    print_json(&output)?;

    if !output.success() {
        bail!("Command exited with status {}", output.exit_code);
    }
    Ok(())
}

async fn teardown_command(warden: &Warden, id: &str) -> Result<()> {
    warden.lifecycle.teardown(id).await?;
    println!("{} Environment {} removed", "✓".green(), id.bold());
    Ok(())
}

async fn list_command(warden: &Warden, json: bool) -> Result<()> {
    let environments = warden.lifecycle.list_managed_environments().await?;

    if json {
        return print_json(&environments);
    }

    if environments.is_empty() {
        println!("{}", "No managed environments.".yellow());
        return Ok(());
    }

    let mut table = new_table();
    table.set_header(vec!["ID", "Image", "Policy", "CPU", "Memory", "State", "Created"]);

    for env in &environments {
        let state = match env.state {
            LifecycleState::Created => "Created".yellow(),
            LifecycleState::Running => "Running".green(),
            LifecycleState::Paused => "Paused".yellow(),
            LifecycleState::Terminated => "Terminated".red(),
        };
        table.add_row(vec![
            env.id.clone(),
            env.image.clone(),
            env.security_policy.to_string(),
            format!("{:.0}%", env.limits.cpu_fraction() * 100.0),
            format_bytes(env.limits.memory_bytes()),
            state.to_string(),
            format_date(&env.created_at),
        ]);
    }

    println!("{}", table);
    println!("\n{} {} environment(s)", "Total:".bold(), environments.len());
    Ok(())
}
