//! Collaborators the lifecycle controller depends on.
//!
//! The controller never owns machine records, status waiting or trace
//! locations. It reaches them through [`MachineryHost`], injected at
//! construction.

use crate::error::Result;
use crate::types::{MachineLabel, MachineRecord, MachineState, TaskRef};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Source of machine records and sink for observed states.
#[async_trait]
pub trait MachineRegistry: Send + Sync {
    /// Resolve a label to its record.
    ///
    /// # Errors
    /// Returns [`MachineNotFound`](crate::MachineryError::MachineNotFound)
    /// for unknown labels.
    async fn lookup(&self, label: &MachineLabel) -> Result<MachineRecord>;

    /// Record a freshly observed state.
    async fn report_status(&self, label: &MachineLabel, state: MachineState) -> Result<()>;

    /// Labels this registry expects VirtualBox to know about.
    ///
    /// Registries that resolve labels lazily return nothing, which skips the
    /// inventory check.
    async fn registered_labels(&self) -> Result<Vec<MachineLabel>> {
        Ok(Vec::new())
    }
}

/// Blocks until a machine reaches one of a set of states.
#[async_trait]
pub trait StatusWaiter: Send + Sync {
    /// Wait until the observed state of `label` is one of `targets`.
    ///
    /// # Errors
    /// Returns [`WaitTimeout`](crate::MachineryError::WaitTimeout) if the
    /// states are not reached within the waiter's own timeout.
    async fn await_status(&self, label: &MachineLabel, targets: &[MachineState]) -> Result<()>;
}

/// Derives where the network trace of a task is written.
pub trait TracePaths: Send + Sync {
    /// Path of the pcap file for `task`.
    fn trace_path_for(&self, task: &TaskRef) -> PathBuf;
}

/// Everything the controller needs from its surroundings.
pub trait MachineryHost: MachineRegistry + StatusWaiter + TracePaths {
    /// Validate the collaborators; called once when the controller is built.
    ///
    /// # Errors
    /// Returns a configuration error if the host cannot be used.
    fn initialize_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Trace paths rooted at a storage directory:
/// `<root>/analyses/<task>/dump.pcap`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageTracePaths {
    root: PathBuf,
}

impl StorageTracePaths {
    /// Create trace paths under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TracePaths for StorageTracePaths {
    fn trace_path_for(&self, task: &TaskRef) -> PathBuf {
        self.root
            .join("analyses")
            .join(task.as_str())
            .join("dump.pcap")
    }
}

/// [`MachineryHost`] assembled from independent collaborators.
#[derive(Clone)]
pub struct MachineryServices {
    registry: Arc<dyn MachineRegistry>,
    waiter: Arc<dyn StatusWaiter>,
    traces: Arc<dyn TracePaths>,
}

impl MachineryServices {
    /// Combine a registry, a waiter and trace paths.
    pub fn new(
        registry: Arc<dyn MachineRegistry>,
        waiter: Arc<dyn StatusWaiter>,
        traces: Arc<dyn TracePaths>,
    ) -> Self {
        Self {
            registry,
            waiter,
            traces,
        }
    }
}

impl std::fmt::Debug for MachineryServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineryServices").finish_non_exhaustive()
    }
}

#[async_trait]
impl MachineRegistry for MachineryServices {
    async fn lookup(&self, label: &MachineLabel) -> Result<MachineRecord> {
        self.registry.lookup(label).await
    }

    async fn report_status(&self, label: &MachineLabel, state: MachineState) -> Result<()> {
        self.registry.report_status(label, state).await
    }

    async fn registered_labels(&self) -> Result<Vec<MachineLabel>> {
        self.registry.registered_labels().await
    }
}

#[async_trait]
impl StatusWaiter for MachineryServices {
    async fn await_status(&self, label: &MachineLabel, targets: &[MachineState]) -> Result<()> {
        self.waiter.await_status(label, targets).await
    }
}

impl TracePaths for MachineryServices {
    fn trace_path_for(&self, task: &TaskRef) -> PathBuf {
        self.traces.trace_path_for(task)
    }
}

impl MachineryHost for MachineryServices {}
