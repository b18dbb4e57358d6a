//! Action descriptor: code, runtime and limits of one action.

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Default invocation timeout (milliseconds).
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
/// Default memory limit (megabytes).
pub const DEFAULT_MEMORY_MB: u64 = 256;
/// Kind used when neither kind nor image is given.
pub const DEFAULT_KIND: &str = "nodejs:10";

/// Runtime kinds and the images that implement them.
const KIND_IMAGES: &[(&str, &str)] = &[
    ("nodejs:10", "adobeapiplatform/adobe-action-nodejs-v10:3.0.27"),
    ("nodejs:12", "adobeapiplatform/adobe-action-nodejs-v12:3.0.27"),
    ("nodejs:14", "adobeapiplatform/adobe-action-nodejs-v14:3.0.27"),
];

/// Executable payload of an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCode {
    /// Packaged archive (e.g. a zip), sent base64-encoded.
    Binary(Vec<u8>),
    /// Plain source text.
    Script(String),
}

impl ActionCode {
    pub fn is_binary(&self) -> bool {
        matches!(self, ActionCode::Binary(_))
    }

    pub fn len(&self) -> usize {
        match self {
            ActionCode::Binary(bytes) => bytes.len(),
            ActionCode::Script(source) => source.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where the runtime image comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionRuntime {
    /// Named runtime kind, resolved through the kind table.
    Kind(String),
    /// Custom ("blackbox") image reference used as-is.
    Image(String),
}

impl Default for ActionRuntime {
    fn default() -> Self {
        ActionRuntime::Kind(DEFAULT_KIND.to_string())
    }
}

/// Resource limits applied to the action container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLimits {
    pub timeout_ms: u64,
    pub memory_mb: u64,
}

impl Default for ActionLimits {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            memory_mb: DEFAULT_MEMORY_MB,
        }
    }
}

impl ActionLimits {
    /// Memory limit in bytes, capped at `u64::MAX`.
    pub fn memory_bytes(&self) -> u64 {
        self.memory_mb.saturating_mul(1024 * 1024)
    }
}

/// Immutable description of one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub name: String,
    pub code: ActionCode,
    /// Entry point function name.
    pub main: String,
    pub runtime: ActionRuntime,
    pub limits: ActionLimits,
}

impl ActionDescriptor {
    /// Create a descriptor with default runtime, entry point and limits.
    pub fn new(name: impl Into<String>, code: ActionCode) -> Result<Self> {
        if code.is_empty() {
            return Err(HarnessError::InvalidFixture("Missing action code".to_string()));
        }
        Ok(Self {
            name: name.into(),
            code,
            main: "main".to_string(),
            runtime: ActionRuntime::default(),
            limits: ActionLimits::default(),
        })
    }

    pub fn with_runtime(mut self, runtime: ActionRuntime) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_main(mut self, main: impl Into<String>) -> Self {
        self.main = main.into();
        self
    }

    /// Override limits; zero values keep the defaults.
    pub fn with_limits(mut self, timeout_ms: u64, memory_mb: u64) -> Self {
        if timeout_ms > 0 {
            self.limits.timeout_ms = timeout_ms;
        }
        if memory_mb > 0 {
            self.limits.memory_mb = memory_mb;
        }
        self
    }

    /// Container image running this action.
    pub fn image(&self) -> Result<String> {
        match &self.runtime {
            ActionRuntime::Image(image) => Ok(image.clone()),
            ActionRuntime::Kind(kind) => {
                let lookup = kind.strip_suffix(":default").unwrap_or(kind);
                KIND_IMAGES
                    .iter()
                    .find(|(k, _)| *k == lookup)
                    .map(|(_, image)| image.to_string())
                    .ok_or_else(|| HarnessError::UnsupportedKind(kind.clone()))
            }
        }
    }
}
