//! Repair plan for Linux and macOS hosts

use std::path::PathBuf;

use super::RepairStep;
use crate::types::EndpointConfig;

/// Interpreter families whose stray processes are killed wholesale.
const FAMILIES: [&str; 2] = ["python", "node"];

pub fn plan(endpoint: &EndpointConfig) -> Vec<RepairStep> {
    let process_match = endpoint.process_match.to_lowercase();
    let mut steps = Vec::new();

    for family in FAMILIES {
        if process_match.contains(family) {
            steps.push(RepairStep::Command {
                label: format!("kill {family} processes"),
                argv: vec!["pkill".into(), "-f".into(), family.into()],
            });
        }
    }

    steps.push(RepairStep::ClearScratch {
        dirs: vec![PathBuf::from("/tmp"), PathBuf::from("/var/tmp")],
        prefix: endpoint.name.to_lowercase(),
    });

    if let Some(port) = endpoint.port {
        steps.push(RepairStep::Command {
            label: format!("release port {port}"),
            argv: vec!["fuser".into(), "-k".into(), format!("{port}/tcp")],
        });
    }

    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(process_match: &str, port: Option<u16>) -> EndpointConfig {
        let mut cfg = EndpointConfig::new(
            "TextGen",
            "http://localhost:5000",
            "/api/v1/model",
            process_match,
            vec!["python".into(), "server.py".into()],
        );
        cfg.port = port;
        cfg
    }

    #[test]
    fn python_service_with_port_gets_full_plan() {
        let steps = plan(&endpoint("python server.py", Some(5000)));
        assert_eq!(steps.len(), 3);
        assert_eq!(
            steps[0],
            RepairStep::Command {
                label: "kill python processes".into(),
                argv: vec!["pkill".into(), "-f".into(), "python".into()],
            }
        );
        assert!(matches!(&steps[1], RepairStep::ClearScratch { prefix, .. } if prefix == "textgen"));
        assert!(matches!(&steps[2], RepairStep::Command { argv, .. } if argv[2] == "5000/tcp"));
    }

    #[test]
    fn native_binary_without_port_only_clears_scratch() {
        let steps = plan(&endpoint("ollama", None));
        assert_eq!(steps.len(), 1);
        assert!(matches!(&steps[0], RepairStep::ClearScratch { dirs, .. } if dirs.len() == 2));
    }
}
