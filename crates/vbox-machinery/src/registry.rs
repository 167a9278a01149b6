//! In-memory machine registry.

use crate::error::{MachineryError, Result};
use crate::host::MachineRegistry;
use crate::types::{MachineLabel, MachineRecord, MachineState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Last state reported for a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Observed state
    pub state: MachineState,
    /// When it was reported
    pub reported_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Entry {
    record: MachineRecord,
    status: Option<StatusReport>,
}

/// [`MachineRegistry`] holding records in memory.
///
/// Typically filled from the `[[machines]]` section of the configuration.
/// Reports for distinct labels may arrive concurrently.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    machines: RwLock<HashMap<MachineLabel, Entry>>,
}

impl InMemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding `records`.
    pub fn from_records(records: impl IntoIterator<Item = MachineRecord>) -> Self {
        let machines = records
            .into_iter()
            .map(|record| {
                (
                    record.label.clone(),
                    Entry {
                        record,
                        status: None,
                    },
                )
            })
            .collect();
        Self {
            machines: RwLock::new(machines),
        }
    }

    /// Add or replace a record. The previous status report is dropped.
    pub async fn insert(&self, record: MachineRecord) {
        let mut machines = self.machines.write().await;
        machines.insert(
            record.label.clone(),
            Entry {
                record,
                status: None,
            },
        );
    }

    /// Last reported state of `label`, if any.
    pub async fn last_status(&self, label: &MachineLabel) -> Option<StatusReport> {
        self.machines
            .read()
            .await
            .get(label)
            .and_then(|entry| entry.status)
    }

    /// All registered labels, sorted.
    pub async fn labels(&self) -> Vec<MachineLabel> {
        let mut labels: Vec<_> = self.machines.read().await.keys().cloned().collect();
        labels.sort();
        labels
    }
}

#[async_trait]
impl MachineRegistry for InMemoryRegistry {
    async fn lookup(&self, label: &MachineLabel) -> Result<MachineRecord> {
        self.machines
            .read()
            .await
            .get(label)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| MachineryError::MachineNotFound(label.clone()))
    }

    async fn report_status(&self, label: &MachineLabel, state: MachineState) -> Result<()> {
        let mut machines = self.machines.write().await;
        match machines.get_mut(label) {
            Some(entry) => {
                entry.status = Some(StatusReport {
                    state,
                    reported_at: Utc::now(),
                });
            }
            None => {
                // Machines found through `list vms` need not be registered.
                tracing::trace!(label = %label, status = %state, "Status for unregistered machine");
            }
        }
        Ok(())
    }

    async fn registered_labels(&self) -> Result<Vec<MachineLabel>> {
        Ok(self.labels().await)
    }
}
