//! # vbox-machinery
//!
//! VirtualBox machine lifecycle control for an analysis sandbox.
//! Drives guest machines through the `VBoxManage` command-line tool.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use vbox_machinery::{
//!     InMemoryRegistry, LifecycleController, MachineLabel, MachineryConfig, MachineryServices,
//!     PollingWaiter, StatusQuery, StorageTracePaths, SystemExecutor, TaskRef, VBoxManage,
//! };
//!
//! # async fn example() -> vbox_machinery::Result<()> {
//! let config = MachineryConfig::from_file("machinery.toml".as_ref())?;
//! let executor = Arc::new(SystemExecutor::new());
//! let registry = Arc::new(InMemoryRegistry::from_records(config.machines.clone()));
//!
//! let query = StatusQuery::new(VBoxManage::new(config.validate()?), executor.clone());
//! let waiter = PollingWaiter::new(
//!     query,
//!     registry.clone(),
//!     config.timeouts.poll_interval(),
//!     Duration::from_secs(config.timeouts.vm_state),
//! );
//! let host = MachineryServices::new(
//!     registry,
//!     Arc::new(waiter),
//!     Arc::new(StorageTracePaths::new(&config.storage.root)),
//! );
//!
//! let controller = LifecycleController::connect(&config, executor, Arc::new(host)).await?;
//! let label = MachineLabel::new("cuckoo1");
//!
//! // Network capture and poweroff confirmation are best-effort.
//! let _trace = controller.start(&label, &TaskRef::from(1)).await?;
//! controller.stop(&label).await?.into_strict()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Lifecycle**: Restore a snapshot and boot, power off with a bounded wait
//! - **Status**: Map `showvminfo` output onto a small state set
//! - **Inventory**: List the machines VirtualBox knows about
//! - **Memory dumps**: Version-dependent `debugvm` dump commands
//! - **Network capture**: Per-task NIC tracing to a pcap file

mod commands;
mod config;
mod controller;
mod error;
mod executor;
mod host;
mod inventory;
mod locks;
mod outcome;
mod registry;
mod status;
mod types;
mod version;
mod waiter;

#[cfg(test)]
mod testing;

pub use commands::VBoxManage;
pub use config::{
    ControllerConfig, MachineryConfig, StorageConfig, TimeoutConfig, VirtualBoxConfig,
};
pub use controller::LifecycleController;
pub use error::{ConfigError, ErrorClass, MachineryError, Result, TraceStep};
pub use executor::{CommandExecutor, CommandLine, ControlProcess, SystemExecutor};
pub use host::{
    MachineRegistry, MachineryHost, MachineryServices, StatusWaiter, StorageTracePaths,
    TracePaths,
};
pub use inventory::{parse_vm_list, INACCESSIBLE_LABEL};
pub use locks::LabelLocks;
pub use outcome::BestEffort;
pub use registry::{InMemoryRegistry, StatusReport};
pub use status::{StatusMapper, StatusQuery};
pub use types::{
    CommandOutcome, MachineLabel, MachineRecord, MachineState, TaskRef, NICTRACE_OPTION,
};
pub use version::{DumpCommand, VersionDispatch, VersionProbe};
pub use waiter::PollingWaiter;
