//! `VBoxManage` argument vectors.

use crate::executor::CommandLine;
use crate::types::MachineLabel;
use crate::version::DumpCommand;
use std::path::{Path, PathBuf};

/// Builds every command line issued against `VBoxManage`.
///
/// Each method is a pure function of its arguments and the tool path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VBoxManage {
    path: PathBuf,
}

impl VBoxManage {
    /// Create a builder for the tool at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path to the `VBoxManage` executable.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn command(&self) -> CommandLine {
        CommandLine::new(&self.path)
    }

    /// `snapshot <label> restore <name>`, or `restorecurrent` without a name.
    pub fn restore_snapshot(&self, label: &MachineLabel, snapshot: Option<&str>) -> CommandLine {
        let cmd = self.command().arg("snapshot").arg(label.as_str());
        match snapshot {
            Some(name) => cmd.arg("restore").arg(name),
            None => cmd.arg("restorecurrent"),
        }
    }

    /// `startvm <label> --type <mode>`
    pub fn start_vm(&self, label: &MachineLabel, mode: &str) -> CommandLine {
        self.command()
            .arg("startvm")
            .arg(label.as_str())
            .arg("--type")
            .arg(mode)
    }

    /// `controlvm <label> poweroff`
    pub fn poweroff(&self, label: &MachineLabel) -> CommandLine {
        self.command()
            .arg("controlvm")
            .arg(label.as_str())
            .arg("poweroff")
    }

    /// `controlvm <label> nictracefile1 <path>`
    pub fn nic_trace_file(&self, label: &MachineLabel, path: &Path) -> CommandLine {
        self.command()
            .arg("controlvm")
            .arg(label.as_str())
            .arg("nictracefile1")
            .arg(path)
    }

    /// `controlvm <label> nictrace1 on`
    pub fn nic_trace_on(&self, label: &MachineLabel) -> CommandLine {
        self.command()
            .arg("controlvm")
            .arg(label.as_str())
            .arg("nictrace1")
            .arg("on")
    }

    /// `list vms`
    pub fn list_vms(&self) -> CommandLine {
        self.command().arg("list").arg("vms")
    }

    /// `showvminfo <label> --machinereadable`
    pub fn show_vm_info(&self, label: &MachineLabel) -> CommandLine {
        self.command()
            .arg("showvminfo")
            .arg(label.as_str())
            .arg("--machinereadable")
    }

    /// `-v`
    pub fn version(&self) -> CommandLine {
        self.command().arg("-v")
    }

    /// `debugvm <label> <dumpvmcore|dumpguestcore> --filename <path>`
    pub fn debug_dump(&self, label: &MachineLabel, dump: DumpCommand, path: &Path) -> CommandLine {
        self.command()
            .arg("debugvm")
            .arg(label.as_str())
            .arg(dump.as_str())
            .arg("--filename")
            .arg(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> VBoxManage {
        VBoxManage::new("/usr/bin/VBoxManage")
    }

    #[test]
    fn test_restore_named_snapshot() {
        let label = MachineLabel::new("cuckoo1");
        let cmd = tool().restore_snapshot(&label, Some("clean"));
        assert_eq!(cmd.program, PathBuf::from("/usr/bin/VBoxManage"));
        assert_eq!(cmd.args_lossy(), ["snapshot", "cuckoo1", "restore", "clean"]);
    }

    #[test]
    fn test_restore_current_snapshot() {
        let label = MachineLabel::new("cuckoo1");
        let cmd = tool().restore_snapshot(&label, None);
        assert_eq!(cmd.args_lossy(), ["snapshot", "cuckoo1", "restorecurrent"]);
    }

    #[test]
    fn test_control_commands() {
        let label = MachineLabel::new("cuckoo1");
        assert_eq!(
            tool().start_vm(&label, "headless").args_lossy(),
            ["startvm", "cuckoo1", "--type", "headless"]
        );
        assert_eq!(
            tool().poweroff(&label).args_lossy(),
            ["controlvm", "cuckoo1", "poweroff"]
        );
        assert_eq!(
            tool()
                .nic_trace_file(&label, Path::new("/tmp/1/dump.pcap"))
                .args_lossy(),
            ["controlvm", "cuckoo1", "nictracefile1", "/tmp/1/dump.pcap"]
        );
        assert_eq!(
            tool().nic_trace_on(&label).args_lossy(),
            ["controlvm", "cuckoo1", "nictrace1", "on"]
        );
    }

    #[test]
    fn test_query_commands() {
        let label = MachineLabel::new("cuckoo1");
        assert_eq!(tool().list_vms().args_lossy(), ["list", "vms"]);
        assert_eq!(
            tool().show_vm_info(&label).args_lossy(),
            ["showvminfo", "cuckoo1", "--machinereadable"]
        );
        assert_eq!(tool().version().args_lossy(), ["-v"]);
        assert_eq!(
            tool()
                .debug_dump(&label, DumpCommand::DumpVmCore, Path::new("/tmp/mem.dmp"))
                .args_lossy(),
            ["debugvm", "cuckoo1", "dumpvmcore", "--filename", "/tmp/mem.dmp"]
        );
    }
}
