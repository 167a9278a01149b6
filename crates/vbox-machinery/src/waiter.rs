//! Polling implementation of [`StatusWaiter`].

use crate::error::{MachineryError, Result};
use crate::host::{MachineRegistry, StatusWaiter};
use crate::status::StatusQuery;
use crate::types::{MachineLabel, MachineState};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Waits for a state by re-querying `showvminfo` at a fixed interval.
///
/// Every observation is reported to the registry, like a direct status
/// call would.
#[derive(Clone)]
pub struct PollingWaiter {
    query: StatusQuery,
    registry: Arc<dyn MachineRegistry>,
    interval: Duration,
    timeout: Duration,
}

impl PollingWaiter {
    /// Create a waiter polling every `interval` for at most `timeout`.
    pub fn new(
        query: StatusQuery,
        registry: Arc<dyn MachineRegistry>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            query,
            registry,
            interval,
            timeout,
        }
    }

    async fn observe(&self, label: &MachineLabel) -> Result<MachineState> {
        let state = self.query.query(label).await?;
        self.registry.report_status(label, state).await?;
        Ok(state)
    }
}

impl std::fmt::Debug for PollingWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingWaiter")
            .field("query", &self.query)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StatusWaiter for PollingWaiter {
    async fn await_status(&self, label: &MachineLabel, targets: &[MachineState]) -> Result<()> {
        let start = Instant::now();
        let mut current = self.observe(label).await?;

        while !targets.contains(&current) {
            tracing::debug!(
                label = %label,
                status = %current,
                "Waiting for machine to switch status"
            );
            if start.elapsed() >= self.timeout {
                return Err(MachineryError::WaitTimeout {
                    label: label.clone(),
                    expected: describe(targets),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
            sleep(self.interval).await;
            current = self.observe(label).await?;
        }

        tracing::debug!(
            label = %label,
            status = %current,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Machine reached expected status"
        );
        Ok(())
    }
}

fn describe(states: &[MachineState]) -> String {
    states
        .iter()
        .map(MachineState::as_str)
        .collect::<Vec<_>>()
        .join("|")
}
