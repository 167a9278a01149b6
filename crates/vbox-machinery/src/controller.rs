//! LifecycleController - drives VirtualBox machines through `VBoxManage`.

use crate::commands::VBoxManage;
use crate::config::MachineryConfig;
use crate::error::{MachineryError, Result, TraceStep};
use crate::executor::{CommandExecutor, ControlProcess};
use crate::host::MachineryHost;
use crate::inventory::parse_vm_list;
use crate::locks::LabelLocks;
use crate::outcome::BestEffort;
use crate::status::StatusQuery;
use crate::types::{MachineLabel, MachineState, TaskRef};
use crate::version::{DumpCommand, VersionDispatch, VersionProbe};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::Instrument;

/// Interval between polls of the poweroff control process.
const POWEROFF_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// States accepted once a poweroff has been issued.
const STOPPED_STATES: [MachineState; 3] = [
    MachineState::PoweredOff,
    MachineState::Aborted,
    MachineState::Saved,
];

/// How the poweroff control process ended.
enum PoweroffWait {
    Exited(i32),
    TimedOut,
    Lost(std::io::Error),
}

/// Start/stop state machine for VirtualBox machines.
///
/// Every operation queries `VBoxManage` afresh; no machine state is kept
/// between calls. Within one call, each step waits for the previous
/// command to finish.
///
/// # Concurrency
///
/// By default nothing prevents two calls from racing on the same label;
/// the caller is expected to serialize them. With
/// `controller.serialize_per_label` set, `start`, `stop`, `dump_memory` and
/// `dump_pcap` take a per-label lock.
pub struct LifecycleController {
    tool: VBoxManage,
    mode: String,
    dispatch: VersionDispatch,
    vm_state_timeout: u64,
    executor: Arc<dyn CommandExecutor>,
    host: Arc<dyn MachineryHost>,
    status: StatusQuery,
    locks: Option<LabelLocks>,
    span: tracing::Span,
}

impl LifecycleController {
    /// Create a controller after validating the configuration and the host.
    ///
    /// # Errors
    /// Returns a configuration error if the `VBoxManage` path is unset or
    /// does not exist, or if the host's own check fails.
    pub fn new(
        config: &MachineryConfig,
        executor: Arc<dyn CommandExecutor>,
        host: Arc<dyn MachineryHost>,
    ) -> Result<Self> {
        let tool = VBoxManage::new(config.validate()?);
        host.initialize_check()?;

        let span = tracing::info_span!("virtualbox", tool = %tool.path().display());
        span.in_scope(|| {
            tracing::debug!(
                mode = %config.virtualbox.mode,
                vm_state_timeout = config.timeouts.vm_state,
                serialize_per_label = config.controller.serialize_per_label,
                "Machinery initialized"
            );
        });

        Ok(Self {
            status: StatusQuery::new(tool.clone(), executor.clone()),
            tool,
            mode: config.virtualbox.mode.clone(),
            dispatch: config.virtualbox.version_dispatch,
            vm_state_timeout: config.timeouts.vm_state,
            executor,
            host,
            locks: config.controller.serialize_per_label.then(LabelLocks::new),
            span,
        })
    }

    /// Create a controller and check the registry against the VirtualBox
    /// inventory with [`verify_inventory`](Self::verify_inventory).
    ///
    /// # Errors
    /// Everything [`new`](Self::new) returns, plus
    /// [`MachineryError::MachineNotDetected`] and
    /// [`MachineryError::ListFailed`].
    pub async fn connect(
        config: &MachineryConfig,
        executor: Arc<dyn CommandExecutor>,
        host: Arc<dyn MachineryHost>,
    ) -> Result<Self> {
        let controller = Self::new(config, executor, host)?;
        controller.verify_inventory().await?;
        Ok(controller)
    }

    /// The `VBoxManage` command builder in use.
    pub fn tool(&self) -> &VBoxManage {
        &self.tool
    }

    /// Display mode passed to `startvm`.
    pub fn mode(&self) -> &str {
        &self.mode
    }

    async fn serialize(&self, label: &MachineLabel) -> Option<OwnedMutexGuard<()>> {
        match &self.locks {
            Some(locks) => Some(locks.acquire(label).await),
            None => None,
        }
    }

    /// Query the current state of `label` and report it to the registry.
    ///
    /// # Errors
    /// Returns [`MachineryError::StatusUnavailable`] if `VBoxManage` exits
    /// cleanly without a `VMState`, or the registry's error if the report
    /// fails.
    pub async fn status(&self, label: &MachineLabel) -> Result<MachineState> {
        self.refresh_status(label).instrument(self.span.clone()).await
    }

    async fn refresh_status(&self, label: &MachineLabel) -> Result<MachineState> {
        let state = self.status.query(label).await?;
        self.host.report_status(label, state).await?;
        Ok(state)
    }

    /// Restore the machine's snapshot and boot it.
    ///
    /// If the machine has the `nictrace` option, NIC tracing is enabled
    /// afterwards; its outcome is returned but never fails the start.
    ///
    /// # Errors
    /// - [`MachineryError::AlreadyRunning`] if the machine is running
    /// - [`MachineryError::RestoreFailed`] if the snapshot restore fails
    /// - [`MachineryError::StartFailed`] if `startvm` fails or writes to stderr
    /// - any error of the registry or the status waiter
    pub async fn start(&self, label: &MachineLabel, task: &TaskRef) -> Result<BestEffort> {
        let _serial = self.serialize(label).await;
        self.run_start(label, task)
            .instrument(self.span.clone())
            .await
    }

    async fn run_start(&self, label: &MachineLabel, task: &TaskRef) -> Result<BestEffort> {
        let start = std::time::Instant::now();
        tracing::debug!(label = %label, task = %task, "Starting vm");

        if self.refresh_status(label).await? == MachineState::Running {
            return Err(MachineryError::AlreadyRunning {
                label: label.clone(),
            });
        }

        let machine = self.host.lookup(label).await?;
        match machine.snapshot.as_deref() {
            Some(snapshot) => {
                tracing::debug!(label = %label, snapshot = %snapshot, "Using snapshot")
            }
            None => tracing::debug!(label = %label, "Using current snapshot"),
        }

        let restore = self.tool.restore_snapshot(label, machine.snapshot.as_deref());
        let detail = match self.executor.output(&restore).await {
            Ok(outcome) if outcome.success() => None,
            Ok(outcome) if outcome.stderr.trim().is_empty() => {
                Some(format!("VBoxManage exited with code {}", outcome.exit_code))
            }
            Ok(outcome) => Some(outcome.stderr.trim().to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(detail) = detail {
            return Err(MachineryError::RestoreFailed {
                label: label.clone(),
                detail,
            });
        }

        self.host.await_status(label, &[MachineState::Saved]).await?;

        let startvm = self.tool.start_vm(label, &self.mode);
        let outcome = self
            .executor
            .output(&startvm)
            .await
            .map_err(|e| self.start_failed(label, e.to_string()))?;
        if !outcome.stderr.is_empty() {
            return Err(self.start_failed(label, outcome.stderr.trim().to_string()));
        }

        self.host.await_status(label, &[MachineState::Running]).await?;
        tracing::info!(
            label = %label,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Machine started"
        );

        if machine.wants_nictrace() {
            return Ok(self.run_dump_pcap(label, task).await);
        }
        Ok(BestEffort::Skipped)
    }

    fn start_failed(&self, label: &MachineLabel, detail: String) -> MachineryError {
        MachineryError::StartFailed {
            label: label.clone(),
            mode: self.mode.to_uppercase(),
            detail,
        }
    }

    /// Power the machine off.
    ///
    /// `VBoxManage controlvm poweroff` is known to hang, so the control
    /// process is polled once per second and terminated after
    /// `timeouts.vm_state` seconds. The machine itself may still be
    /// transitioning at that point; the final wait for a stopped state
    /// covers it. How the control process ended is returned as a
    /// [`BestEffort`] and never raised.
    ///
    /// # Errors
    /// - [`MachineryError::AlreadyStopped`] if the machine is powered off or aborted
    /// - [`MachineryError::PoweroffFailed`] if the control process cannot be launched
    /// - any error of the registry or the status waiter
    pub async fn stop(&self, label: &MachineLabel) -> Result<BestEffort> {
        let _serial = self.serialize(label).await;
        self.run_stop(label).instrument(self.span.clone()).await
    }

    async fn run_stop(&self, label: &MachineLabel) -> Result<BestEffort> {
        tracing::debug!(label = %label, "Stopping vm");

        if self.refresh_status(label).await?.is_stopped() {
            return Err(MachineryError::AlreadyStopped {
                label: label.clone(),
            });
        }

        let timeout_secs = self.vm_state_timeout;
        let poweroff = self.tool.poweroff(label);
        let mut process = self
            .executor
            .spawn(&poweroff)
            .map_err(|e| MachineryError::PoweroffFailed {
                label: label.clone(),
                detail: e.to_string(),
            })?;

        let confirmation = match wait_or_terminate(process.as_mut(), timeout_secs).await {
            PoweroffWait::Exited(0) => BestEffort::Done,
            PoweroffWait::Exited(code) => {
                tracing::debug!(
                    label = %label,
                    exit_code = code,
                    "VBoxManage exited with error powering off the machine"
                );
                BestEffort::Failed(MachineryError::PoweroffExit {
                    label: label.clone(),
                    code,
                })
            }
            PoweroffWait::TimedOut => {
                tracing::debug!(
                    label = %label,
                    timeout_secs,
                    "Stopping vm timed out, control process killed"
                );
                BestEffort::Failed(MachineryError::PoweroffTimedOut {
                    label: label.clone(),
                    timeout_secs,
                })
            }
            PoweroffWait::Lost(e) => {
                tracing::warn!(
                    label = %label,
                    error = %e,
                    "Lost track of the poweroff control process"
                );
                BestEffort::Failed(MachineryError::PoweroffFailed {
                    label: label.clone(),
                    detail: e.to_string(),
                })
            }
        };

        self.host.await_status(label, &STOPPED_STATES).await?;
        Ok(confirmation)
    }

    /// List the labels of all machines in the VirtualBox inventory.
    ///
    /// # Errors
    /// Returns [`MachineryError::ListFailed`] if `VBoxManage` cannot be launched.
    pub async fn list(&self) -> Result<Vec<MachineLabel>> {
        self.run_list().instrument(self.span.clone()).await
    }

    async fn run_list(&self) -> Result<Vec<MachineLabel>> {
        let outcome = self
            .executor
            .output(&self.tool.list_vms())
            .await
            .map_err(|e| MachineryError::ListFailed(e.to_string()))?;
        let labels = parse_vm_list(&outcome.stdout);
        tracing::debug!(count = labels.len(), "Listed machines");
        Ok(labels)
    }

    /// Check that every registered machine is known to VirtualBox.
    ///
    /// Skips `list vms` entirely when the registry is empty.
    ///
    /// # Errors
    /// - [`MachineryError::MachineNotDetected`] for the first registered
    ///   label missing from the inventory
    /// - [`MachineryError::ListFailed`] if `VBoxManage` cannot be launched
    pub async fn verify_inventory(&self) -> Result<()> {
        async {
            let registered = self.host.registered_labels().await?;
            if registered.is_empty() {
                return Ok(());
            }

            let installed = self.run_list().await?;
            if let Some(missing) = registered.iter().find(|label| !installed.contains(*label)) {
                return Err(MachineryError::MachineNotDetected {
                    label: missing.clone(),
                });
            }

            tracing::debug!(count = registered.len(), "Registered machines detected");
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// Point NIC 1's trace file at the task's pcap path and enable tracing.
    ///
    /// Never raises: a failing step is logged at error level and returned
    /// as [`BestEffort::Failed`].
    pub async fn dump_pcap(&self, label: &MachineLabel, task: &TaskRef) -> BestEffort {
        let _serial = self.serialize(label).await;
        self.run_dump_pcap(label, task)
            .instrument(self.span.clone())
            .await
    }

    async fn run_dump_pcap(&self, label: &MachineLabel, task: &TaskRef) -> BestEffort {
        let path = self.host.trace_path_for(task);
        let steps = [
            (TraceStep::SetTraceFile, self.tool.nic_trace_file(label, &path)),
            (TraceStep::EnableTrace, self.tool.nic_trace_on(label)),
        ];

        for (step, command) in steps {
            let detail = match self.executor.run(&command).await {
                Ok(0) => continue,
                Ok(code) => format!("command '{command}' returned non-zero exit status {code}"),
                Err(e) => e.to_string(),
            };
            tracing::error!(label = %label, "Unable to {step}: {detail}");
            return BestEffort::Failed(MachineryError::TraceFailed {
                label: label.clone(),
                step,
                detail,
            });
        }

        tracing::debug!(label = %label, path = %path.display(), "NIC tracing enabled");
        BestEffort::Done
    }

    /// Write a memory dump of the machine to `path`.
    ///
    /// The `debugvm` sub-command is chosen from the `VBoxManage` version;
    /// its exit code is not checked.
    ///
    /// # Errors
    /// - [`MachineryError::VersionQueryFailed`] if `VBoxManage -v` cannot be launched
    /// - [`MachineryError::DumpFailed`] if `debugvm` cannot be launched
    pub async fn dump_memory(&self, label: &MachineLabel, path: &Path) -> Result<DumpCommand> {
        let _serial = self.serialize(label).await;
        self.run_dump_memory(label, path)
            .instrument(self.span.clone())
            .await
    }

    async fn run_dump_memory(&self, label: &MachineLabel, path: &Path) -> Result<DumpCommand> {
        let probe = VersionProbe::new(self.tool.clone(), self.executor.clone());
        let dump = probe.dump_command(self.dispatch).await?;

        let command = self.tool.debug_dump(label, dump, path);
        self.executor
            .run(&command)
            .await
            .map_err(|e| MachineryError::DumpFailed {
                label: label.clone(),
                detail: e.to_string(),
            })?;

        tracing::info!(
            label = %label,
            path = %path.display(),
            "Successfully generated memory dump for virtual machine"
        );
        Ok(dump)
    }
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("tool", &self.tool)
            .field("mode", &self.mode)
            .field("dispatch", &self.dispatch)
            .field("vm_state_timeout", &self.vm_state_timeout)
            .field("serialize_per_label", &self.locks.is_some())
            .finish_non_exhaustive()
    }
}

/// Poll `process` once per second; terminate it after `timeout_secs` polls.
async fn wait_or_terminate(process: &mut dyn ControlProcess, timeout_secs: u64) -> PoweroffWait {
    let mut waited = 0u64;
    loop {
        match process.try_wait() {
            Ok(Some(code)) => return PoweroffWait::Exited(code),
            Ok(None) if waited < timeout_secs => {
                tokio::time::sleep(POWEROFF_POLL_INTERVAL).await;
                waited += 1;
            }
            Ok(None) => {
                if let Err(e) = process.terminate().await {
                    tracing::warn!(error = %e, "Failed to terminate the poweroff control process");
                }
                return PoweroffWait::TimedOut;
            }
            Err(e) => return PoweroffWait::Lost(e),
        }
    }
}
