//! Error types for vbox-machinery.

use crate::types::MachineLabel;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for machinery operations.
pub type Result<T> = std::result::Result<T, MachineryError>;

/// Configuration errors. These are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("VirtualBox VBoxManage path missing, please add it to the config file")]
    MissingToolPath,

    #[error("VirtualBox VBoxManage not found at specified path \"{}\"", .0.display())]
    ToolNotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Step of the NIC trace setup that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceStep {
    /// `controlvm <label> nictracefile1 <path>`
    SetTraceFile,
    /// `controlvm <label> nictrace1 on`
    EnableTrace,
}

impl fmt::Display for TraceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetTraceFile => write!(f, "set NIC tracefile (pcap file)"),
            Self::EnableTrace => write!(f, "enable NIC tracing (pcap file)"),
        }
    }
}

/// Broad class of a [`MachineryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Invalid or missing configuration
    Configuration,
    /// Operation refused before any command was issued
    Precondition,
    /// `VBoxManage` could not be launched or reported failure
    ExternalTool,
    /// The machine status could not be resolved
    StatusUnavailable,
    /// Failure of a secondary action that is logged, never raised
    BestEffort,
    /// Failure reported by the registry or the status waiter
    Collaborator,
}

/// Errors that can occur while driving VirtualBox machines.
#[derive(Debug, Error)]
pub enum MachineryError {
    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A registered machine is missing from `list vms`
    #[error("configured machine {label} was not detected or it's not in proper state")]
    MachineNotDetected { label: MachineLabel },

    /// `start` called on a running machine
    #[error("trying to start an already started vm {label}")]
    AlreadyRunning { label: MachineLabel },

    /// `stop` called on a powered off or aborted machine
    #[error("trying to stop an already stopped vm {label}")]
    AlreadyStopped { label: MachineLabel },

    /// Snapshot restore failed
    #[error("VBoxManage failed restoring the snapshot of {label}: {detail}")]
    RestoreFailed { label: MachineLabel, detail: String },

    /// `startvm` failed or wrote to stderr
    #[error("VBoxManage failed starting {label} in {mode} mode: {detail}")]
    StartFailed {
        label: MachineLabel,
        /// Display mode, uppercased
        mode: String,
        detail: String,
    },

    /// The poweroff control process could not be launched or polled
    #[error("VBoxManage failed powering off {label}: {detail}")]
    PoweroffFailed { label: MachineLabel, detail: String },

    /// The poweroff control process exited non-zero
    #[error("VBoxManage exited with code {code} powering off {label}")]
    PoweroffExit { label: MachineLabel, code: i32 },

    /// The poweroff control process was terminated after the timeout
    #[error("powering off {label} did not complete within {timeout_secs}s, control process terminated")]
    PoweroffTimedOut {
        label: MachineLabel,
        timeout_secs: u64,
    },

    /// `list vms` could not be run
    #[error("VBoxManage error listing installed machines: {0}")]
    ListFailed(String),

    /// No `VMState` could be resolved
    #[error("unable to get status for {label}")]
    StatusUnavailable { label: MachineLabel },

    /// `VBoxManage -v` could not be run
    #[error("VBoxManage failed to return its version: {0}")]
    VersionQueryFailed(String),

    /// `debugvm` could not be run
    #[error("VBoxManage failed to take a memory dump of the machine with label {label}: {detail}")]
    DumpFailed { label: MachineLabel, detail: String },

    /// A NIC trace step failed
    #[error("unable to {step} for {label}: {detail}")]
    TraceFailed {
        label: MachineLabel,
        step: TraceStep,
        detail: String,
    },

    /// Label unknown to the registry
    #[error("machine not found: {0}")]
    MachineNotFound(MachineLabel),

    /// The machine did not reach any of the expected states in time
    #[error("timeout hit after {timeout_secs}s waiting for {label} to change status to {expected}")]
    WaitTimeout {
        label: MachineLabel,
        expected: String,
        timeout_secs: u64,
    },

    /// Registry failure
    #[error("registry error: {0}")]
    Registry(String),
}

impl MachineryError {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_) | Self::MachineNotDetected { .. } => ErrorClass::Configuration,
            Self::AlreadyRunning { .. } | Self::AlreadyStopped { .. } => ErrorClass::Precondition,
            Self::RestoreFailed { .. }
            | Self::StartFailed { .. }
            | Self::PoweroffFailed { .. }
            | Self::ListFailed(_)
            | Self::VersionQueryFailed(_)
            | Self::DumpFailed { .. } => ErrorClass::ExternalTool,
            Self::StatusUnavailable { .. } => ErrorClass::StatusUnavailable,
            Self::PoweroffExit { .. }
            | Self::PoweroffTimedOut { .. }
            | Self::TraceFailed { .. } => ErrorClass::BestEffort,
            Self::MachineNotFound(_) | Self::WaitTimeout { .. } | Self::Registry(_) => {
                ErrorClass::Collaborator
            }
        }
    }

    /// Check if this error is a refused precondition.
    pub fn is_precondition(&self) -> bool {
        self.class() == ErrorClass::Precondition
    }

    /// Check if this error is fatal at startup.
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Configuration
    }
}
