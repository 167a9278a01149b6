//! Process execution for `VBoxManage` invocations.
//!
//! Every command the controller issues goes through [`CommandExecutor`],
//! so tests can swap in a scripted executor and the state machine never
//! touches `std::process` directly.

use crate::types::CommandOutcome;
use async_trait::async_trait;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

/// A fully built argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Executable to run
    pub program: PathBuf,
    /// Arguments, in order
    pub args: Vec<OsString>,
}

impl CommandLine {
    /// Create a command line for `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Arguments as strings, for logging and assertions.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Runs command lines as child processes.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run to completion and return the exit code.
    ///
    /// # Errors
    /// Returns an error if the process cannot be launched.
    async fn run(&self, command: &CommandLine) -> io::Result<i32>;

    /// Run to completion, capturing stdout and stderr.
    ///
    /// # Errors
    /// Returns an error if the process cannot be launched.
    async fn output(&self, command: &CommandLine) -> io::Result<CommandOutcome>;

    /// Launch without waiting for completion.
    ///
    /// # Errors
    /// Returns an error if the process cannot be launched.
    fn spawn(&self, command: &CommandLine) -> io::Result<Box<dyn ControlProcess>>;
}

/// Handle to a launched control process.
#[async_trait]
pub trait ControlProcess: Send {
    /// Non-blocking check for completion; `Some(code)` once exited.
    fn try_wait(&mut self) -> io::Result<Option<i32>>;

    /// Forcibly terminate the process and reap it; the wait for the exit is
    /// bounded, an unkillable process is left behind.
    async fn terminate(&mut self) -> io::Result<()>;
}

/// [`CommandExecutor`] backed by real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl SystemExecutor {
    /// Create a new executor.
    pub fn new() -> Self {
        Self
    }

    fn command(line: &CommandLine) -> Command {
        let mut cmd = Command::new(&line.program);
        cmd.args(&line.args).stdin(Stdio::null());
        cmd
    }
}

#[async_trait]
impl CommandExecutor for SystemExecutor {
    async fn run(&self, command: &CommandLine) -> io::Result<i32> {
        tracing::trace!(command = %command, "running");
        let status = Self::command(command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        Ok(status.code().unwrap_or(-1))
    }

    async fn output(&self, command: &CommandLine) -> io::Result<CommandOutcome> {
        tracing::trace!(command = %command, "running with captured output");
        let output = Self::command(command).output().await?;
        let outcome = CommandOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::trace!(
            exit_code = outcome.exit_code,
            stdout_len = outcome.stdout.len(),
            stderr_len = outcome.stderr.len(),
            "command completed"
        );
        Ok(outcome)
    }

    fn spawn(&self, command: &CommandLine) -> io::Result<Box<dyn ControlProcess>> {
        tracing::trace!(command = %command, "spawning");
        let child = Self::command(command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(Box::new(SystemProcess { child }))
    }
}

/// Upper bound on reaping a killed control process.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

struct SystemProcess {
    child: Child,
}

#[async_trait]
impl ControlProcess for SystemProcess {
    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| status.code().unwrap_or(-1)))
    }

    async fn terminate(&mut self) -> io::Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child.start_kill()?;
        match tokio::time::timeout(REAP_TIMEOUT, self.child.wait()).await {
            Ok(status) => status.map(|_| ()),
            Err(_) => {
                tracing::warn!(
                    pid = self.child.id(),
                    "Killed control process did not exit, leaving it unreaped"
                );
                Ok(())
            }
        }
    }
}
