//! vboxctl - operator CLI for VirtualBox analysis machines.
//!
//! Builds a [`LifecycleController`] from a TOML configuration file and runs
//! a single lifecycle operation against one machine.
//!
//! Logs go to stderr; results go to stdout (as JSON with `--json`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vbox_machinery::{
    BestEffort, InMemoryRegistry, LifecycleController, MachineLabel, MachineState,
    MachineryConfig, MachineryServices, PollingWaiter, StatusQuery, StorageTracePaths,
    SystemExecutor, TaskRef, VBoxManage,
};

/// vboxctl - drive VirtualBox analysis machines through VBoxManage
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Configuration file.
    #[arg(
        short,
        long,
        default_value = "machinery.toml",
        env = "VBOX_MACHINERY_CONFIG"
    )]
    config: PathBuf,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List the machines known to VirtualBox.
    List,

    /// Show the current state of a machine.
    Status {
        /// Machine label.
        label: String,
    },

    /// Restore a machine's snapshot and boot it.
    Start {
        /// Machine label.
        label: String,
        /// Task the machine is started for (names the trace file).
        #[arg(long)]
        task: String,
    },

    /// Power a machine off.
    Stop {
        /// Machine label.
        label: String,
    },

    /// Write a memory dump of a running machine.
    DumpMemory {
        /// Machine label.
        label: String,
        /// Destination file.
        path: PathBuf,
    },

    /// Enable NIC tracing for a task.
    DumpPcap {
        /// Machine label.
        label: String,
        /// Task whose trace file is written.
        #[arg(long)]
        task: String,
    },
}

#[derive(Serialize)]
struct StatusLine<'a> {
    label: &'a MachineLabel,
    state: MachineState,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("vbox_machinery=info".parse()?)
                .add_directive("vboxctl=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = MachineryConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::debug!(?config, "Configuration loaded");

    let controller = build_controller(&config).await?;

    match cli.command {
        Cmd::List => {
            let labels = controller.list().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&labels)?);
            } else {
                for label in labels {
                    println!("{label}");
                }
            }
        }
        Cmd::Status { label } => {
            let label = MachineLabel::new(label);
            let state = controller.status(&label).await?;
            if cli.json {
                let line = StatusLine {
                    label: &label,
                    state,
                };
                println!("{}", serde_json::to_string(&line)?);
            } else {
                println!("{label}: {state}");
            }
        }
        Cmd::Start { label, task } => {
            let label = MachineLabel::new(label);
            let trace = controller.start(&label, &TaskRef::new(task)).await?;
            report("trace", &trace);
            println!("{label}: started");
        }
        Cmd::Stop { label } => {
            let label = MachineLabel::new(label);
            let confirmation = controller.stop(&label).await?;
            report("poweroff", &confirmation);
            println!("{label}: stopped");
        }
        Cmd::DumpMemory { label, path } => {
            let label = MachineLabel::new(label);
            let dump = controller.dump_memory(&label, &path).await?;
            println!("{label}: {dump} written to {}", path.display());
        }
        Cmd::DumpPcap { label, task } => {
            let label = MachineLabel::new(label);
            let outcome = controller.dump_pcap(&label, &TaskRef::new(task)).await;
            outcome
                .into_strict()
                .context("network capture was not enabled")?;
            println!("{label}: tracing");
        }
    }

    Ok(())
}

/// Wire the reference collaborators around a controller.
///
/// Fails if a configured machine is unknown to VirtualBox.
async fn build_controller(config: &MachineryConfig) -> Result<LifecycleController> {
    let executor = Arc::new(SystemExecutor::new());
    let registry = Arc::new(InMemoryRegistry::from_records(config.machines.clone()));

    let query = StatusQuery::new(VBoxManage::new(config.validate()?), executor.clone());
    let waiter = PollingWaiter::new(
        query,
        registry.clone(),
        config.timeouts.poll_interval(),
        config.timeouts.vm_state(),
    );
    let host = MachineryServices::new(
        registry,
        Arc::new(waiter),
        Arc::new(StorageTracePaths::new(&config.storage.root)),
    );

    let controller = LifecycleController::connect(config, executor, Arc::new(host)).await?;
    tracing::info!(
        tool = %controller.tool().path().display(),
        mode = controller.mode(),
        machines = config.machines.len(),
        "Controller ready"
    );
    Ok(controller)
}

fn report(action: &str, outcome: &BestEffort) {
    if let Some(e) = outcome.error() {
        eprintln!("warning: {action}: {e}");
    }
}
