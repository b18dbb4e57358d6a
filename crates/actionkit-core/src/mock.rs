//! Per-test mock services standing in for external HTTP(S) dependencies.
//!
//! A mock spec file `mock-<hostname>.json` holds the expectations of a
//! mockserver container. The container joins a private network under the
//! alias `<hostname>`, and the action container joins the same network, so
//! requests from the action to `https://<hostname>/...` resolve to the mock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{HarnessError, Result};
use crate::obs;
use crate::runtime::{sanitize_container_name, ContainerRuntime, ContainerSpec, Mount};

pub const MOCK_SERVER_IMAGE: &str = "mockserver/mockserver:mockserver-5.11.1";
pub const NETWORK_PREFIX: &str = "mock-network-";
pub const CONTAINER_PREFIX: &str = "mock-server-";
const SPEC_PREFIX: &str = "mock-";
const SPEC_EXTENSION: &str = "json";

/// Log line the mock container prints once expectations are loaded.
pub const READY_MARKER: &str = "started on ports: [80, 443]";
/// Maximum wait for [`READY_MARKER`].
pub const READY_TIMEOUT: Duration = Duration::from_secs(15);
const STOP_GRACE_SECS: u32 = 15;

/// Hostname emulated by a mock spec file.
///
/// `mock-upload.example.org.json` => `upload.example.org`
pub fn mock_hostname(spec_file: &Path) -> Option<String> {
    let stem = spec_file.file_stem()?.to_str()?;
    let host = stem.strip_prefix(SPEC_PREFIX).unwrap_or(stem);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Whether a file name follows the `mock-<hostname>.json` convention.
pub fn is_mock_spec(file_name: &str) -> bool {
    file_name.starts_with(SPEC_PREFIX)
        && Path::new(file_name)
            .extension()
            .is_some_and(|ext| ext == SPEC_EXTENSION)
        && mock_hostname(Path::new(file_name)).is_some()
}

/// One mocked dependency, alive for one test case.
pub struct MockService {
    spec_file: PathBuf,
    host: String,
    network: String,
    container: String,
    action_container: String,
    runtime: Arc<dyn ContainerRuntime>,
    ready_timeout: Duration,
}

impl MockService {
    pub fn new(
        spec_file: impl Into<PathBuf>,
        action_container: impl Into<String>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self> {
        let spec_file = spec_file.into();
        let host = mock_hostname(&spec_file).ok_or_else(|| {
            HarnessError::InvalidFixture(format!(
                "cannot derive a hostname from mock file {}",
                spec_file.display()
            ))
        })?;
        Ok(Self {
            network: sanitize_container_name(&format!("{NETWORK_PREFIX}{host}")),
            container: sanitize_container_name(&format!("{CONTAINER_PREFIX}{host}")),
            host,
            spec_file,
            action_container: action_container.into(),
            runtime,
            ready_timeout: READY_TIMEOUT,
        })
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn spec_file(&self) -> &Path {
        &self.spec_file
    }

    /// Start the mock container, wait for readiness, wire up the network.
    pub async fn start(&self) -> Result<()> {
        // leftovers from an aborted run usually don't exist
        self.stop(true).await;

        if let Err(e) = self.start_container().await {
            self.stop(true).await;
            return Err(self.setup_error(e));
        }
        if let Err(e) = self.wait_ready().await {
            self.stop(true).await;
            return Err(self.setup_error(e));
        }
        if let Err(e) = self.setup_network().await {
            self.stop(true).await;
            return Err(self.setup_error(e));
        }

        obs::emit_mock_started(&self.host, &self.container, &self.network);
        Ok(())
    }

    /// Tear down container and network.
    ///
    /// Each step runs independently. Failures are logged unless
    /// `ignore_errors` is set; they never propagate.
    pub async fn stop(&self, ignore_errors: bool) {
        if let Err(e) = self.runtime.stop(&self.container, STOP_GRACE_SECS).await {
            if !ignore_errors {
                warn!(container = %self.container, error = %e, "error shutting down mock container");
            }
        }
        if let Err(e) = self
            .runtime
            .network_disconnect(&self.network, &self.action_container)
            .await
        {
            if !ignore_errors {
                warn!(
                    network = %self.network,
                    container = %self.action_container,
                    error = %e,
                    "error disconnecting mock network"
                );
            }
        }
        if let Err(e) = self.runtime.network_remove(&self.network).await {
            if !ignore_errors {
                warn!(network = %self.network, error = %e, "error removing mock network");
            }
        }
        if !ignore_errors {
            obs::emit_mock_stopped(&self.host);
        }
    }

    // -------------------------------< internal >--------------------------

    fn setup_error(&self, e: HarnessError) -> HarnessError {
        match e {
            HarnessError::MockSetup { .. } => e,
            other => HarnessError::MockSetup {
                container: self.container.clone(),
                reason: other.to_string(),
            },
        }
    }

    fn container_spec(&self) -> Result<ContainerSpec> {
        let file_name = self
            .spec_file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                HarnessError::InvalidFixture(format!("invalid mock file {}", self.spec_file.display()))
            })?;
        let dir = self
            .spec_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut env = BTreeMap::new();
        env.insert(
            "MOCKSERVER_INITIALIZATION_JSON_PATH".to_string(),
            format!("/mocks/{file_name}"),
        );
        env.insert(
            "MOCKSERVER_SSL_CERTIFICATE_DOMAIN_NAME".to_string(),
            self.host.clone(),
        );

        Ok(ContainerSpec {
            name: self.container.clone(),
            image: MOCK_SERVER_IMAGE.to_string(),
            auto_remove: true,
            user: Some("root".to_string()),
            memory_bytes: None,
            publish: None,
            env,
            mounts: vec![Mount::read_only(dir, "/mocks")],
            args: vec!["-serverPort".to_string(), "80,443".to_string()],
        })
    }

    async fn start_container(&self) -> Result<()> {
        let id = self.runtime.run_detached(&self.container_spec()?).await?;
        info!(
            container = %self.container,
            id = %id,
            image = MOCK_SERVER_IMAGE,
            hostname = %self.host,
            "started mock container"
        );
        Ok(())
    }

    async fn wait_ready(&self) -> Result<()> {
        let mut follower = self.runtime.follow_logs(&self.container, false).await?;
        let waited = tokio::time::timeout(self.ready_timeout, async {
            while let Some(line) = follower.next_line().await {
                debug!(container = %self.container, "{}", line);
                if line.contains(READY_MARKER) {
                    return true;
                }
            }
            false
        })
        .await;

        match waited {
            Ok(true) => Ok(()),
            Ok(false) => Err(HarnessError::MockSetup {
                container: self.container.clone(),
                reason: "container exited before it was ready".to_string(),
            }),
            Err(_) => Err(HarnessError::MockSetup {
                container: self.container.clone(),
                reason: format!(
                    "Error setting up container (stopped after waiting for {}ms)",
                    self.ready_timeout.as_millis()
                ),
            }),
        }
    }

    async fn setup_network(&self) -> Result<()> {
        if let Err(e) = self.runtime.network_create(&self.network).await {
            // reuse a network that already exists
            debug!(network = %self.network, error = %e, "network create failed");
        }
        self.runtime
            .network_connect(&self.network, &self.container, Some(&self.host))
            .await?;
        self.runtime
            .network_connect(&self.network, &self.action_container, None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeRuntime;

    #[test]
    fn test_mock_hostname() {
        assert_eq!(
            mock_hostname(Path::new("/t/case/mock-upload.wikimedia.org.json")).as_deref(),
            Some("upload.wikimedia.org")
        );
        assert_eq!(mock_hostname(Path::new("mock-.json")), None);
    }

    #[test]
    fn test_is_mock_spec() {
        assert!(is_mock_spec("mock-example.com.json"));
        assert!(!is_mock_spec("mock-example.com.yaml"));
        assert!(!is_mock_spec("example.com.json"));
        assert!(!is_mock_spec("mock-.json"));
    }

    #[test]
    fn test_names_derive_from_host() {
        let runtime = Arc::new(FakeRuntime::new());
        let mock = MockService::new("/t/mock-example.com.json", "worker", runtime).unwrap();
        assert_eq!(mock.host(), "example.com");
        assert_eq!(mock.network(), "mock-network-example.com");
        assert_eq!(mock.container(), "mock-server-example.com");
    }

    #[test]
    fn test_container_spec() {
        let runtime = Arc::new(FakeRuntime::new());
        let mock = MockService::new("/t/case/mock-example.com.json", "worker", runtime).unwrap();
        let spec = mock.container_spec().unwrap();
        assert_eq!(spec.user.as_deref(), Some("root"));
        assert_eq!(spec.mounts[0].to_volume_arg(), "/t/case:/mocks:ro");
        assert_eq!(
            spec.env.get("MOCKSERVER_INITIALIZATION_JSON_PATH").map(String::as_str),
            Some("/mocks/mock-example.com.json")
        );
        assert_eq!(
            spec.env.get("MOCKSERVER_SSL_CERTIFICATE_DOMAIN_NAME").map(String::as_str),
            Some("example.com")
        );
        assert_eq!(spec.args, vec!["-serverPort", "80,443"]);
    }
}
