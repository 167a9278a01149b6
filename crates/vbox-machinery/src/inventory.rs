//! Parsing of `VBoxManage list vms` output.

use crate::types::MachineLabel;

/// Label VirtualBox prints for machines whose settings cannot be read.
pub const INACCESSIBLE_LABEL: &str = "<inaccessible>";

/// Extract machine labels from `list vms` output.
///
/// Each line looks like `"label" {uuid}`. Lines without a quote are
/// ignored and inaccessible machines are skipped with a warning. Order of
/// appearance is preserved.
pub fn parse_vm_list(output: &str) -> Vec<MachineLabel> {
    let mut labels = Vec::new();
    for line in output.lines() {
        if !line.contains('"') {
            continue;
        }
        let label = line.split('"').nth(1).unwrap_or_default();
        if label == INACCESSIBLE_LABEL {
            tracing::warn!("Found an inaccessible virtual machine, please check its state");
            continue;
        }
        labels.push(MachineLabel::new(label));
    }
    labels
}
