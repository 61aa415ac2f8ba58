//! Repair plan for Windows hosts

use std::path::PathBuf;

use super::RepairStep;
use crate::types::EndpointConfig;

const FAMILIES: [&str; 2] = ["python", "node"];

/// `temp_dir` is the value of `%TEMP%`, when set.
pub fn plan(endpoint: &EndpointConfig, temp_dir: Option<PathBuf>) -> Vec<RepairStep> {
    let process_match = endpoint.process_match.to_lowercase();
    let mut steps = Vec::new();

    for family in FAMILIES {
        if process_match.contains(family) {
            steps.push(RepairStep::Command {
                label: format!("kill {family} processes"),
                argv: vec![
                    "taskkill".into(),
                    "/F".into(),
                    "/IM".into(),
                    format!("{family}.exe"),
                    "/T".into(),
                ],
            });
        }
    }

    let mut dirs = vec![PathBuf::from(r"C:\temp"), PathBuf::from(r"C:\tmp")];
    dirs.extend(temp_dir);
    steps.push(RepairStep::ClearScratch { dirs, prefix: endpoint.name.to_lowercase() });

    // Windows has no per-port release; resetting the IP stack is the blunt equivalent.
    if endpoint.port.is_some() {
        steps.push(RepairStep::Command {
            label: "reset network stack".into(),
            argv: vec!["netsh".into(), "int".into(), "ip".into(), "reset".into()],
        });
    }

    steps
}
