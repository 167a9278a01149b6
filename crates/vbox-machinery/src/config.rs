//! Configuration for the VirtualBox machinery.
//!
//! Loaded from a TOML file; any key can be overridden from the environment
//! with the `VBOX_` prefix and `__` as section separator, e.g.
//! `VBOX_VIRTUALBOX__PATH=/usr/local/bin/VBoxManage`.

use crate::error::ConfigError;
use crate::types::MachineRecord;
use crate::version::VersionDispatch;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete machinery configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineryConfig {
    /// VirtualBox tool settings
    #[serde(default)]
    pub virtualbox: VirtualBoxConfig,
    /// Timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Controller behavior
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Storage locations
    #[serde(default)]
    pub storage: StorageConfig,
    /// Machines known to the registry
    #[serde(default)]
    pub machines: Vec<MachineRecord>,
}

/// `[virtualbox]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualBoxConfig {
    /// Path to `VBoxManage` (required)
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Display mode passed to `startvm --type` (gui, sdl, headless)
    #[serde(default = "default_mode")]
    pub mode: String,
    /// How the tool version selects the memory dump command
    #[serde(default)]
    pub version_dispatch: VersionDispatch,
}

fn default_mode() -> String {
    "headless".to_string()
}

impl Default for VirtualBoxConfig {
    fn default() -> Self {
        Self {
            path: None,
            mode: default_mode(),
            version_dispatch: VersionDispatch::default(),
        }
    }
}

/// `[timeouts]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Seconds allowed for a machine to change state
    #[serde(default = "default_vm_state")]
    pub vm_state: u64,
    /// Status polling interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_vm_state() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    1000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            vm_state: default_vm_state(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl TimeoutConfig {
    /// Get the state change timeout as a Duration.
    pub fn vm_state(&self) -> Duration {
        Duration::from_secs(self.vm_state)
    }

    /// Get the polling interval as a Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// `[controller]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Serialize start/stop/dump operations per machine label
    #[serde(default)]
    pub serialize_per_label: bool,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root under which `analyses/<task>/dump.pcap` is written
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("/var/lib/vbox-machinery")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

impl MachineryConfig {
    /// Create a configuration for the tool at `path` with defaults elsewhere.
    pub fn with_tool(path: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.virtualbox.path = Some(path.into());
        config
    }

    /// Load configuration from a TOML file plus `VBOX_` environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (no environment overrides).
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validate the configuration and return the `VBoxManage` path.
    ///
    /// Call this at startup; a missing tool is fatal.
    pub fn validate(&self) -> Result<&Path, ConfigError> {
        let path = match self.virtualbox.path.as_deref() {
            Some(path) if !path.as_os_str().is_empty() => path,
            _ => return Err(ConfigError::MissingToolPath),
        };

        if !path.exists() {
            return Err(ConfigError::ToolNotFound(path.to_path_buf()));
        }

        if self.virtualbox.mode.trim().is_empty() {
            return Err(ConfigError::Invalid("virtualbox.mode must not be empty".into()));
        }

        if self.timeouts.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeouts.poll_interval_ms must be > 0".into(),
            ));
        }

        Ok(path)
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("VBOX")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
