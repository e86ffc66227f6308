//! Orchestrator configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the stage orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Default number of concurrent per-project invocations.
    /// 1 runs projects one after another.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// When this file exists, runs stop dispatching new projects.
    /// In-flight projects still finish and are recorded.
    #[serde(default)]
    pub stop_file: Option<PathBuf>,
}

fn default_max_workers() -> usize {
    1
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            stop_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_workers, 1);
        assert!(config.stop_file.is_none());
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: OrchestratorConfig = toml::from_str("").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            max_workers = 4
            stop_file = "/tmp/drp.stop"
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.stop_file, Some(PathBuf::from("/tmp/drp.stop")));
    }
}
