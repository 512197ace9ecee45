//! Agent configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Root of the agent's persisted state.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Orchestrator loop configuration.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Merge engine configuration.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            orchestrator: OrchestratorConfig::default(),
            merge: MergeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Orchestrator loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Queue poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Total attempts for one deployment task, counting the first run.
    #[serde(default = "default_max_task_attempts")]
    pub max_task_attempts: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_task_attempts: default_max_task_attempts(),
        }
    }
}

impl OrchestratorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Merge engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Convergence poll interval in milliseconds.
    #[serde(default = "default_convergence_poll_ms")]
    pub convergence_poll_interval_ms: u64,

    /// Grace period handed to the supervisor on restart requests, seconds.
    #[serde(default = "default_restart_grace_secs")]
    pub restart_grace_secs: u64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            convergence_poll_interval_ms: default_convergence_poll_ms(),
            restart_grace_secs: default_restart_grace_secs(),
        }
    }
}

impl MergeConfig {
    pub fn convergence_poll_interval(&self) -> Duration {
        Duration::from_millis(self.convergence_poll_interval_ms)
    }

    pub fn restart_grace(&self) -> Duration {
        Duration::from_secs(self.restart_grace_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON-formatted logs.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/larch")
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_task_attempts() -> u32 {
    3
}

fn default_convergence_poll_ms() -> u64 {
    1000
}

fn default_restart_grace_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AgentConfig {
    /// Load configuration from defaults, an optional file, and
    /// `LARCH_`-prefixed environment variables, in that order.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&AgentConfig::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("LARCH")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Where deployment workspaces live.
    pub fn deployments_dir(&self) -> PathBuf {
        self.data_dir.join("deployments")
    }

    /// Where the deployment service's runtime state lives.
    pub fn runtime_dir(&self) -> PathBuf {
        self.data_dir.join("runtime").join("deployment-service")
    }

    /// Where retained status records live.
    pub fn processed_deployments_dir(&self) -> PathBuf {
        self.runtime_dir().join("processed-deployments")
    }
}
