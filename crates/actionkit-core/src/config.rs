//! Environment-derived harness configuration.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Default wait for `docker logs -f` to attach before an invocation.
pub const DEFAULT_LOG_ATTACH_DELAY_MS: u64 = 100;

/// Settings that come from the process environment rather than the action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Container runtime client binary.
    pub docker_binary: String,
    /// Host IP to publish the action control port on (when running inside a
    /// container ourselves).
    pub docker_host_ip: Option<String>,
    /// Value forwarded to the action as `DEBUG`.
    pub worker_debug: Option<String>,
    /// Wait before an invocation so container logs are attached in time.
    pub log_attach_delay_ms: u64,
    /// Unique id for container and staging names of concurrent CI jobs.
    pub run_id: String,
    /// CA certificate trusted by the action when talking to mock services.
    pub mock_ca_cert: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            docker_binary: env_non_empty("ACTIONKIT_DOCKER").unwrap_or_else(|| "docker".to_string()),
            docker_host_ip: env_non_empty("DOCKER_HOST_IP"),
            worker_debug: env_non_empty("WORKER_DEBUG"),
            log_attach_delay_ms: env_non_empty("ACTIONKIT_LOG_DELAY")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_LOG_ATTACH_DELAY_MS),
            run_id: env_non_empty("CIRCLE_WORKFLOW_JOB_ID")
                .or_else(|| env_non_empty("BUILD_TAG"))
                .unwrap_or_else(default_run_id),
            mock_ca_cert: env_non_empty("ACTIONKIT_MOCK_CA_CERT").map(PathBuf::from),
        }
    }
}

impl HarnessConfig {
    /// Read the configuration from environment variables.
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn log_attach_delay(&self) -> Duration {
        Duration::from_millis(self.log_attach_delay_ms)
    }

    /// Run id reduced to characters safe for directory names.
    pub fn run_dir_name(&self) -> String {
        self.run_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect()
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn default_run_id() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}
