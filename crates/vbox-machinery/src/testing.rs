//! Scripted collaborators shared by the unit tests.

use crate::error::{MachineryError, Result};
use crate::executor::{CommandExecutor, CommandLine, ControlProcess};
use crate::host::{MachineRegistry, MachineryHost, StatusWaiter, TracePaths};
use crate::types::{CommandOutcome, MachineLabel, MachineRecord, MachineState, TaskRef};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Something the controller did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Command(Vec<String>),
    Await(Vec<MachineState>),
    Report(MachineState),
    Terminate,
}

/// Ordered log shared between the fake executor and the fake host.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Event>>>);

impl Journal {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    /// Issued command lines (arguments only).
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Command(args) => Some(args),
                _ => None,
            })
            .collect()
    }

    pub fn terminations(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| **event == Event::Terminate)
            .count()
    }

    /// Events other than status queries and reports.
    pub fn actions(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|event| match event {
                Event::Command(args) => args.first().map(String::as_str) != Some("showvminfo"),
                Event::Report(_) => false,
                _ => true,
            })
            .collect()
    }
}

/// Scripted response to a command.
#[derive(Debug, Clone)]
pub enum Reply {
    Output(CommandOutcome),
    LaunchError,
    /// Spawned process never exits on its own.
    Hang,
    /// Spawned process exits with `code` after `polls` unsuccessful polls.
    ExitAfter { polls: u32, code: i32 },
}

impl Reply {
    pub fn exit(code: i32) -> Self {
        Self::Output(CommandOutcome {
            exit_code: code,
            ..Default::default()
        })
    }

    pub fn output(code: i32, stdout: &str, stderr: &str) -> Self {
        Self::Output(CommandOutcome {
            exit_code: code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        })
    }
}

/// Key a command by its verb; `controlvm` is keyed by its action.
fn verb(args: &[String]) -> String {
    match args.first().map(String::as_str) {
        Some("controlvm") => args.get(2).cloned().unwrap_or_default(),
        Some(first) => first.to_string(),
        None => String::new(),
    }
}

/// [`CommandExecutor`] answering from a script.
///
/// `showvminfo` reports queued states first, then the current state.
/// Unscripted commands exit 0 with no output.
#[derive(Debug, Default)]
pub struct FakeExecutor {
    journal: Journal,
    replies: Mutex<HashMap<String, Reply>>,
    states: Mutex<VecDeque<MachineState>>,
    state: Mutex<Option<MachineState>>,
}

impl FakeExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_journal(journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            journal,
            ..Default::default()
        })
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    pub fn reply(&self, verb: &str, reply: Reply) {
        self.replies.lock().unwrap().insert(verb.to_string(), reply);
    }

    pub fn set_state(&self, state: MachineState) {
        *self.state.lock().unwrap() = Some(state);
    }

    pub fn queue_states(&self, states: impl IntoIterator<Item = MachineState>) {
        let mut queue = self.states.lock().unwrap();
        for state in states {
            queue.push_back(state);
            *self.state.lock().unwrap() = Some(state);
        }
    }

    fn record(&self, command: &CommandLine) -> Option<Reply> {
        let args = command.args_lossy();
        let key = verb(&args);
        self.journal.push(Event::Command(args));
        self.replies.lock().unwrap().get(&key).cloned()
    }

    fn showvminfo(&self) -> CommandOutcome {
        let state = self
            .states
            .lock()
            .unwrap()
            .pop_front()
            .or(*self.state.lock().unwrap());
        let stdout = match state {
            Some(state) => format!("name=\"fake\"\nVMState=\"{state}\"\n"),
            None => "name=\"fake\"\n".to_string(),
        };
        CommandOutcome {
            exit_code: 0,
            stdout,
            stderr: String::new(),
        }
    }
}

fn launch_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, "No such file or directory")
}

#[async_trait]
impl CommandExecutor for FakeExecutor {
    async fn run(&self, command: &CommandLine) -> io::Result<i32> {
        Ok(self.output(command).await?.exit_code)
    }

    async fn output(&self, command: &CommandLine) -> io::Result<CommandOutcome> {
        let is_status = command.args_lossy().first().map(String::as_str) == Some("showvminfo");
        match self.record(command) {
            Some(Reply::Output(outcome)) => Ok(outcome),
            Some(Reply::LaunchError) => Err(launch_error()),
            Some(Reply::Hang) | Some(Reply::ExitAfter { .. }) => Ok(CommandOutcome::default()),
            None if is_status => Ok(self.showvminfo()),
            None => Ok(CommandOutcome::default()),
        }
    }

    fn spawn(&self, command: &CommandLine) -> io::Result<Box<dyn ControlProcess>> {
        let (remaining, code) = match self.record(command) {
            Some(Reply::LaunchError) => return Err(launch_error()),
            Some(Reply::Hang) => (None, 0),
            Some(Reply::ExitAfter { polls, code }) => (Some(polls), code),
            Some(Reply::Output(outcome)) => (Some(0), outcome.exit_code),
            None => (Some(0), 0),
        };
        Ok(Box::new(FakeProcess {
            journal: self.journal.clone(),
            remaining,
            code,
            terminated: false,
        }))
    }
}

struct FakeProcess {
    journal: Journal,
    remaining: Option<u32>,
    code: i32,
    terminated: bool,
}

#[async_trait]
impl ControlProcess for FakeProcess {
    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        if self.terminated {
            return Ok(Some(-1));
        }
        match self.remaining.as_mut() {
            Some(0) => Ok(Some(self.code)),
            Some(n) => {
                *n -= 1;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn terminate(&mut self) -> io::Result<()> {
        self.journal.push(Event::Terminate);
        self.terminated = true;
        Ok(())
    }
}

/// [`MachineryHost`] recording waits and reports into the journal.
#[derive(Debug, Default)]
pub struct FakeHost {
    journal: Journal,
    records: Mutex<HashMap<MachineLabel, MachineRecord>>,
    fail_waits: Mutex<bool>,
}

impl FakeHost {
    pub fn new(journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            journal,
            ..Default::default()
        })
    }

    pub fn add(&self, record: MachineRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.label.clone(), record);
    }

    pub fn fail_waits(&self) {
        *self.fail_waits.lock().unwrap() = true;
    }
}

#[async_trait]
impl MachineRegistry for FakeHost {
    async fn lookup(&self, label: &MachineLabel) -> Result<MachineRecord> {
        self.records
            .lock()
            .unwrap()
            .get(label)
            .cloned()
            .ok_or_else(|| MachineryError::MachineNotFound(label.clone()))
    }

    async fn report_status(&self, _label: &MachineLabel, state: MachineState) -> Result<()> {
        self.journal.push(Event::Report(state));
        Ok(())
    }

    async fn registered_labels(&self) -> Result<Vec<MachineLabel>> {
        let mut labels: Vec<_> = self.records.lock().unwrap().keys().cloned().collect();
        labels.sort();
        Ok(labels)
    }
}

#[async_trait]
impl StatusWaiter for FakeHost {
    async fn await_status(&self, label: &MachineLabel, targets: &[MachineState]) -> Result<()> {
        self.journal.push(Event::Await(targets.to_vec()));
        if *self.fail_waits.lock().unwrap() {
            return Err(MachineryError::WaitTimeout {
                label: label.clone(),
                expected: "target".into(),
                timeout_secs: 60,
            });
        }
        Ok(())
    }
}

impl TracePaths for FakeHost {
    fn trace_path_for(&self, task: &TaskRef) -> PathBuf {
        PathBuf::from("/storage/analyses")
            .join(task.as_str())
            .join("dump.pcap")
    }
}

impl MachineryHost for FakeHost {}
