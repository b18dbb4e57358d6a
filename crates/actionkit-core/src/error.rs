//! Error taxonomy for the action harness.

use std::path::PathBuf;

/// Errors produced by the runtime, runner and mock layers.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("could not start container '{container}': {reason}")]
    ContainerStart { container: String, reason: String },

    #[error("Could not init action on container (POST {url}): no response after {attempts} attempts: {reason}")]
    InitTimeout {
        url: String,
        attempts: u32,
        reason: String,
        container_logs: String,
    },

    #[error("Could not init action on container (POST {url}): responded with error: {reason}")]
    InitFailed {
        url: String,
        reason: String,
        container_logs: String,
    },

    #[error("action '{action}' timed out after {} seconds", as_seconds(.timeout_ms))]
    InvocationTimeout { action: String, timeout_ms: u64 },

    #[error("'{action}' invocation failed due to a system error: {reason}")]
    InvocationSystem { action: String, reason: String },

    #[error("'{action}' invocation failed: {}", describe_action_error(.error.as_ref()))]
    InvocationProtocol {
        action: String,
        status: Option<u16>,
        error: Option<serde_json::Value>,
    },

    /// The produced rendition differs from the expected one.
    #[error("{0}")]
    ValidationFailure(String),

    /// Success or error did not match what the fixture expects.
    #[error("{0}")]
    UnexpectedOutcome(String),

    #[error("error starting mock container '{container}': {reason}")]
    MockSetup { container: String, reason: String },

    #[error("{context}: {source}")]
    HarnessIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed: {stderr}")]
    Runtime { command: String, stderr: String },

    #[error("Unsupported kind: {0}")]
    UnsupportedKind(String),

    #[error("invalid fixture: {0}")]
    InvalidFixture(String),

    #[error("invalid runner state: {0}")]
    InvalidState(&'static str),
}

impl HarnessError {
    /// Wrap an io error with a description of the operation and path.
    pub fn io(context: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarnessError::HarnessIo {
            context: format!("{} {}", context.into(), path.into().display()),
            source,
        }
    }

    /// Container logs gathered while diagnosing an init failure.
    pub fn container_logs(&self) -> Option<&str> {
        match self {
            HarnessError::InitTimeout { container_logs, .. }
            | HarnessError::InitFailed { container_logs, .. } => Some(container_logs),
            _ => None,
        }
    }

    /// Candidate reasons this failure can be matched against when a fixture
    /// declares an expected error.
    ///
    /// The structured payload of a failed invocation comes first (a bare
    /// string, or the `reason`, `name` and `message` fields of an object),
    /// followed by the display message.
    pub fn failure_reasons(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if let HarnessError::InvocationProtocol {
            error: Some(payload),
            ..
        } = self
        {
            match payload {
                serde_json::Value::String(s) => reasons.push(s.clone()),
                serde_json::Value::Object(map) => {
                    for key in ["reason", "name", "message"] {
                        if let Some(serde_json::Value::String(s)) = map.get(key) {
                            reasons.push(s.clone());
                        }
                    }
                }
                _ => {}
            }
        }
        reasons.push(self.to_string());
        reasons
    }

    /// Whether this error came out of the action invocation itself.
    pub fn is_invocation_error(&self) -> bool {
        matches!(
            self,
            HarnessError::InvocationTimeout { .. }
                | HarnessError::InvocationSystem { .. }
                | HarnessError::InvocationProtocol { .. }
        )
    }
}

fn as_seconds(ms: &u64) -> f64 {
    *ms as f64 / 1000.0
}

fn describe_action_error(error: Option<&serde_json::Value>) -> String {
    match error {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(value) => serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
        None => "(returned empty result)".to_string(),
    }
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
