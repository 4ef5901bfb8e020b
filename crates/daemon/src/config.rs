//! Orchestrator configuration

use crate::homerunner::HomeServer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// HTTP listen address for adapters and the status pages
    pub listen: String,

    /// Directory uploaded files are written to
    pub upload_folder: PathBuf,

    /// Homerunner base URL
    pub homerunner_url: String,

    /// Fixed servers to use instead of homerunner, keyed by server type name
    pub server_overrides: HashMap<String, Vec<HomeServer>>,

    /// Only load scenarios whose name matches this regex
    pub test_filter: Option<String>,

    /// Background sweeper configuration
    pub sweeper: SweeperConfig,

    /// Shut down once every test case has finished
    pub exit_when_done: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5000".to_string(),
            upload_folder: PathBuf::from("/tmp/trafficlight"),
            homerunner_url: "http://localhost:54321".to_string(),
            server_overrides: HashMap::new(),
            test_filter: None,
            sweeper: SweeperConfig::default(),
            exit_when_done: false,
        }
    }
}

/// Sweeper cadence and thresholds, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    /// Interval between promoter and reaper ticks
    pub interval_secs: u64,

    /// Unbound adapters silent for longer than this are removed
    pub idle_timeout_secs: u64,

    /// Bound adapters silent for longer than this are failed
    pub active_timeout_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            idle_timeout_secs: 60,
            active_timeout_secs: 180,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Check values that would otherwise fail much later
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(filter) = &self.test_filter {
            regex_lite::Regex::new(filter)
                .map_err(|e| anyhow::anyhow!("invalid test_filter {:?}: {}", filter, e))?;
        }
        if self.sweeper.interval_secs == 0 {
            anyhow::bail!("sweeper.interval_secs must be greater than zero");
        }
        Ok(())
    }
}
