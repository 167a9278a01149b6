//! Machine status resolution from `showvminfo --machinereadable`.

use crate::commands::VBoxManage;
use crate::error::{MachineryError, Result};
use crate::executor::CommandExecutor;
use crate::types::{CommandOutcome, MachineLabel, MachineState};
use std::sync::Arc;

const VM_STATE_KEY: &str = "VMState=";

/// Maps machine-readable `showvminfo` output to a [`MachineState`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusMapper;

impl StatusMapper {
    /// Extract the state from the `VMState="<value>"` line.
    ///
    /// Only lines carrying exactly two quote characters count; if several
    /// match, the last wins. Values outside the tracked states map to
    /// [`MachineState::Error`]. Returns `None` when no line matches.
    pub fn parse(output: &str) -> Option<MachineState> {
        let mut state = None;
        for line in output.lines() {
            if !line.starts_with(VM_STATE_KEY) || line.matches('"').count() != 2 {
                continue;
            }
            let Some(raw) = line.split('"').nth(1) else {
                continue;
            };
            let value = raw.to_lowercase();
            state = Some(MachineState::from_vm_state(&value).unwrap_or_else(|| {
                tracing::debug!(vm_state = %value, "Untracked machine state");
                MachineState::Error
            }));
        }
        state
    }

    /// Resolve the state from a finished query.
    ///
    /// A non-zero exit resolves to [`MachineState::Error`]; a clean exit
    /// without a `VMState` line stays unresolved.
    pub fn resolve(outcome: &CommandOutcome) -> Option<MachineState> {
        if !outcome.success() {
            return Some(MachineState::Error);
        }
        Self::parse(&outcome.stdout)
    }

    /// Like [`resolve`](Self::resolve), with unresolved output mapped to
    /// [`MachineState::Error`].
    pub fn map(outcome: &CommandOutcome) -> MachineState {
        Self::resolve(outcome).unwrap_or(MachineState::Error)
    }
}

/// Runs a fresh status query against `VBoxManage`.
///
/// Never caches: every call launches `showvminfo`.
#[derive(Clone)]
pub struct StatusQuery {
    tool: VBoxManage,
    executor: Arc<dyn CommandExecutor>,
}

impl StatusQuery {
    /// Create a query for the given tool.
    pub fn new(tool: VBoxManage, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { tool, executor }
    }

    /// Query the current state of `label`.
    ///
    /// Launch failures and non-zero exits are logged and resolve to
    /// [`MachineState::Error`].
    ///
    /// # Errors
    /// Returns [`MachineryError::StatusUnavailable`] if the tool exited
    /// cleanly without reporting a `VMState`.
    pub async fn query(&self, label: &MachineLabel) -> Result<MachineState> {
        tracing::debug!(label = %label, "Getting status");
        let command = self.tool.show_vm_info(label);

        let state = match self.executor.output(&command).await {
            Ok(outcome) => {
                if !outcome.success() {
                    // VBoxManage commonly exits with E_ACCESSDENIED here.
                    tracing::debug!(
                        label = %label,
                        exit_code = outcome.exit_code,
                        stderr = %outcome.stderr.trim(),
                        "VBoxManage returned an error checking status"
                    );
                }
                StatusMapper::resolve(&outcome)
            }
            Err(e) => {
                tracing::warn!(label = %label, error = %e, "VBoxManage failed to check status");
                Some(MachineState::Error)
            }
        };

        match state {
            Some(state) => {
                tracing::debug!(label = %label, status = %state, "Machine status");
                Ok(state)
            }
            None => Err(MachineryError::StatusUnavailable {
                label: label.clone(),
            }),
        }
    }
}

impl std::fmt::Debug for StatusQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusQuery")
            .field("tool", &self.tool)
            .finish_non_exhaustive()
    }
}
