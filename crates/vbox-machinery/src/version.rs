//! `VBoxManage` version probing and memory-dump command selection.

use crate::commands::VBoxManage;
use crate::error::{MachineryError, Result};
use crate::executor::CommandExecutor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Diagnostic command used by `debugvm` to write a memory dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpCommand {
    /// `dumpvmcore` (VirtualBox 5 and later)
    DumpVmCore,
    /// `dumpguestcore` (VirtualBox 4)
    DumpGuestCore,
}

impl DumpCommand {
    /// The `debugvm` sub-command name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DumpVmCore => "dumpvmcore",
            Self::DumpGuestCore => "dumpguestcore",
        }
    }
}

impl std::fmt::Display for DumpCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the version string selects a [`DumpCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionDispatch {
    /// `dumpvmcore` only if the version starts with `5`.
    #[default]
    LeadingChar,
    /// `dumpvmcore` for major version 5 and later, or if the major
    /// version cannot be parsed.
    Major,
}

impl VersionDispatch {
    /// Pick the dump command for a `VBoxManage -v` output.
    pub fn select(&self, version: &str) -> DumpCommand {
        match self {
            Self::LeadingChar => {
                if version.starts_with('5') {
                    DumpCommand::DumpVmCore
                } else {
                    DumpCommand::DumpGuestCore
                }
            }
            Self::Major => match major_version(version) {
                Some(major) if major < 5 => DumpCommand::DumpGuestCore,
                _ => DumpCommand::DumpVmCore,
            },
        }
    }
}

fn major_version(version: &str) -> Option<u32> {
    version.trim().split('.').next()?.parse().ok()
}

/// Queries the version of the installed `VBoxManage`.
#[derive(Clone)]
pub struct VersionProbe {
    tool: VBoxManage,
    executor: Arc<dyn CommandExecutor>,
}

impl VersionProbe {
    /// Create a probe for the given tool.
    pub fn new(tool: VBoxManage, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { tool, executor }
    }

    /// Run `VBoxManage -v` and return its stdout.
    ///
    /// A non-zero exit is only logged; the output may still be usable.
    ///
    /// # Errors
    /// Returns [`MachineryError::VersionQueryFailed`] if the tool cannot be
    /// launched.
    pub async fn version(&self) -> Result<String> {
        let outcome = self
            .executor
            .output(&self.tool.version())
            .await
            .map_err(|e| MachineryError::VersionQueryFailed(e.to_string()))?;

        if !outcome.success() {
            tracing::debug!(
                exit_code = outcome.exit_code,
                stderr = %outcome.stderr.trim(),
                "VBoxManage returned an error reporting its version"
            );
        }
        Ok(outcome.stdout)
    }

    /// Query the version and select the dump command for it.
    ///
    /// # Errors
    /// See [`version`](Self::version).
    pub async fn dump_command(&self, dispatch: VersionDispatch) -> Result<DumpCommand> {
        let version = self.version().await?;
        let dump = dispatch.select(&version);
        tracing::debug!(version = %version.trim(), command = %dump, "Selected memory dump command");
        Ok(dump)
    }
}

impl std::fmt::Debug for VersionProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionProbe")
            .field("tool", &self.tool)
            .finish_non_exhaustive()
    }
}
