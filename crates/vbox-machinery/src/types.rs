//! Domain types used throughout the VirtualBox machinery.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Machine option that enables VirtualBox's built-in NIC tracing.
pub const NICTRACE_OPTION: &str = "nictrace";

/// Identifier of a virtual machine in the VirtualBox inventory.
///
/// This is the name `VBoxManage` knows the machine by, not a UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineLabel(String);

impl MachineLabel {
    /// Create a label from any string.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Get the inner string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MachineLabel {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MachineLabel {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<MachineLabel> for String {
    fn from(label: MachineLabel) -> String {
        label.0
    }
}

/// Canonical state of a machine as reported by `VBoxManage showvminfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    /// Machine state was saved (after a snapshot restore).
    Saved,
    /// Machine is running.
    Running,
    /// Machine is powered off.
    #[serde(rename = "poweroff")]
    PoweredOff,
    /// Machine was aborted.
    Aborted,
    /// Sentinel: the state could not be determined.
    Error,
}

impl MachineState {
    /// Map a lowercased `VMState` value to a state.
    ///
    /// Returns `None` for values this machinery does not track
    /// (`paused`, `starting`, `restoring`, ...).
    pub fn from_vm_state(value: &str) -> Option<Self> {
        match value {
            "saved" => Some(Self::Saved),
            "running" => Some(Self::Running),
            "poweroff" => Some(Self::PoweredOff),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }

    /// The name VirtualBox uses for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Saved => "saved",
            Self::Running => "running",
            Self::PoweredOff => "poweroff",
            Self::Aborted => "aborted",
            Self::Error => "error",
        }
    }

    /// Check if the machine is already down (powered off or aborted).
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::PoweredOff | Self::Aborted)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry view of a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRecord {
    /// VirtualBox label
    pub label: MachineLabel,
    /// Snapshot to restore before starting (current snapshot if unset)
    #[serde(default)]
    pub snapshot: Option<String>,
    /// Feature options, e.g. `nictrace`
    #[serde(default)]
    pub options: BTreeSet<String>,
}

impl MachineRecord {
    /// Create a record without snapshot or options.
    pub fn new(label: impl Into<MachineLabel>) -> Self {
        Self {
            label: label.into(),
            snapshot: None,
            options: BTreeSet::new(),
        }
    }

    /// Set the snapshot restored on start.
    pub fn with_snapshot(mut self, snapshot: impl Into<String>) -> Self {
        self.snapshot = Some(snapshot.into());
        self
    }

    /// Add a feature option.
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.insert(option.into());
        self
    }

    /// Check if network trace capture is enabled for this machine.
    pub fn wants_nictrace(&self) -> bool {
        self.options.contains(NICTRACE_OPTION)
    }
}

/// Reference to the analysis task a machine is started for.
///
/// Only used to derive where the network trace is written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskRef(String);

impl TaskRef {
    /// Create a task reference from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TaskRef {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for TaskRef {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Captured result of a finished `VBoxManage` invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutcome {
    /// Process exit code (-1 if terminated by a signal)
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandOutcome {
    /// Check if the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
