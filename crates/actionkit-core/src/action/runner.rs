//! Runs a single action in a local container and drives its control protocol.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::descriptor::ActionDescriptor;
use super::protocol::{InitRequest, InitResponse, RunRequest, RUNTIME_PORT};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::obs;
use crate::runtime::{sanitize_container_name, ContainerRuntime, ContainerSpec, Mount, PublishedPort};
use crate::test_log::TestLog;

/// Fixed delay between `/init` attempts.
pub const INIT_RETRY_DELAY: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Container-level settings composed into an [`ActionRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Human-readable container name hint; sanitized before use.
    pub container_name: Option<String>,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    /// Host interface for the published control port.
    pub host_ip: Option<String>,
    pub retry_delay: Duration,
    pub log_attach_delay: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            container_name: None,
            env: BTreeMap::new(),
            mounts: Vec::new(),
            host_ip: None,
            retry_delay: INIT_RETRY_DELAY,
            log_attach_delay: Duration::from_millis(crate::config::DEFAULT_LOG_ATTACH_DELAY_MS),
        }
    }
}

impl RunnerConfig {
    /// Runner settings taken from the harness environment.
    pub fn from_harness(harness: &HarnessConfig) -> Self {
        let mut config = Self {
            host_ip: harness.docker_host_ip.clone(),
            log_attach_delay: harness.log_attach_delay(),
            ..Self::default()
        };
        if let Some(debug) = &harness.worker_debug {
            config.env.insert("DEBUG".to_string(), debug.clone());
        }
        config
    }

    /// Worker defaults: test mode flag, read-only `/in` and writable `/out`.
    pub fn worker(mut self, in_dir: &Path, out_dir: &Path) -> Self {
        self.env
            .insert("WORKER_TEST_MODE".to_string(), "true".to_string());
        self.mounts.push(Mount::read_only(in_dir, "/in"));
        self.mounts.push(Mount::read_write(out_dir, "/out"));
        self
    }

    pub fn with_container_name(mut self, hint: impl Into<String>) -> Self {
        self.container_name = Some(hint.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Lifecycle state of an [`ActionRunner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Created,
    /// `run_detached` was issued but has not returned a container id.
    Launching,
    Started,
    Ready,
    Failed,
    Stopped,
}

/// Container owned by a runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    /// `host:port` of the control endpoint.
    pub endpoint: String,
}

/// Aborts log forwarding when dropped.
struct LogForwarder(JoinHandle<()>);

impl Drop for LogForwarder {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs one action in a local container.
pub struct ActionRunner {
    action: ActionDescriptor,
    config: RunnerConfig,
    runtime: Arc<dyn ContainerRuntime>,
    http: reqwest::Client,
    log: TestLog,
    container_name: String,
    container: Option<ContainerHandle>,
    state: RunnerState,
}

impl ActionRunner {
    pub fn new(
        action: ActionDescriptor,
        config: RunnerConfig,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let hint = config
            .container_name
            .clone()
            .unwrap_or_else(|| format!("actionkit-{}", action.name));
        debug!(
            action = %action.name,
            code_bytes = action.code.len(),
            timeout_ms = action.limits.timeout_ms,
            memory_mb = action.limits.memory_mb,
            "created action runner"
        );
        Self {
            container_name: sanitize_container_name(&hint),
            action,
            config,
            runtime,
            http: reqwest::Client::new(),
            log: TestLog::disabled(),
            container: None,
            state: RunnerState::Created,
        }
    }

    /// Send captured container output of invocations to `log`.
    pub fn with_log(mut self, log: TestLog) -> Self {
        self.log = log;
        self
    }

    pub fn action(&self) -> &ActionDescriptor {
        &self.action
    }

    /// Sanitized container name, used to attach mock networks.
    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn container(&self) -> Option<&ContainerHandle> {
        self.container.as_ref()
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Launch the container and initialize the action.
    ///
    /// On init failure the container is stopped and the error carries the
    /// container logs.
    pub async fn start(&mut self) -> Result<()> {
        if matches!(
            self.state,
            RunnerState::Launching | RunnerState::Started | RunnerState::Ready
        ) {
            return Err(HarnessError::InvalidState("runner already started"));
        }

        if let Err(e) = self.start_container().await {
            self.fail().await;
            return Err(e);
        }

        match self.init_action().await {
            Ok(()) => {
                self.state = RunnerState::Ready;
                obs::emit_action_ready(&self.action.name, &self.container_name);
                Ok(())
            }
            Err(e) => {
                self.fail().await;
                Err(e)
            }
        }
    }

    /// Invoke the action once; the raw result body is returned unmodified.
    ///
    /// No retry: an invocation may have side effects.
    pub async fn run(&self, params: serde_json::Value) -> Result<serde_json::Value> {
        if self.state != RunnerState::Ready {
            return Err(HarnessError::InvalidState("run() requires a started runner"));
        }
        let endpoint = match &self.container {
            Some(handle) => handle.endpoint.clone(),
            None => return Err(HarnessError::InvalidState("runner has no container")),
        };

        let _forwarder = self.forward_logs().await;
        // give the log follower time to attach, otherwise early output is lost
        tokio::time::sleep(self.config.log_attach_delay).await;

        let timeout_ms = self.action.limits.timeout_ms;
        let url = format!("http://{endpoint}/run");
        debug!(
            "invoking action '{}': POST {} (timeout {} seconds)",
            self.action.name,
            url,
            timeout_ms as f64 / 1000.0
        );
        debug!("{}", serde_json::to_string_pretty(&params).unwrap_or_default());

        let body = RunRequest::new(&self.action, params, Utc::now().timestamp_millis());
        let response = self
            .http
            .post(&url)
            .timeout(Duration::from_millis(timeout_ms))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        debug!(status = status.as_u16(), "activation result: {}", text);

        let parsed: Option<serde_json::Value> = if text.trim().is_empty() {
            None
        } else {
            serde_json::from_str(&text).ok()
        };

        match parsed {
            Some(result) if status.is_success() => Ok(result),
            Some(body) => Err(HarnessError::InvocationProtocol {
                action: self.action.name.clone(),
                status: Some(status.as_u16()),
                error: body.get("error").cloned(),
            }),
            None => Err(HarnessError::InvocationProtocol {
                action: self.action.name.clone(),
                status: Some(status.as_u16()),
                error: None,
            }),
        }
    }

    /// Force-remove the container. A no-op when none is active.
    ///
    /// A launch that was abandoned before the runtime returned an id is
    /// cleaned up by container name.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.container.take() else {
            if self.state == RunnerState::Launching {
                self.state = RunnerState::Stopped;
                match self.runtime.remove_force(&self.container_name).await {
                    Ok(()) => debug!(container = %self.container_name, "removed abandoned container"),
                    Err(e) => debug!(error = %e, "no abandoned container removed"),
                }
            }
            return Ok(());
        };
        self.state = RunnerState::Stopped;
        self.runtime.remove_force(&handle.id).await?;
        debug!(container = %handle.id, "stopped container");
        Ok(())
    }

    // -------------------------------< internal >--------------------------

    /// Remove whatever was started and mark the runner failed.
    async fn fail(&mut self) {
        if let Err(e) = self.stop().await {
            warn!(error = %e, "failed to remove container after start failure");
        }
        self.state = RunnerState::Failed;
    }

    fn container_spec(&self) -> Result<ContainerSpec> {
        Ok(ContainerSpec {
            name: self.container_name.clone(),
            image: self.action.image()?,
            auto_remove: true,
            user: None,
            memory_bytes: Some(self.action.limits.memory_bytes()),
            publish: Some(PublishedPort {
                host_ip: self.config.host_ip.clone(),
                container_port: RUNTIME_PORT,
            }),
            env: self.config.env.clone(),
            mounts: self.config.mounts.clone(),
            args: Vec::new(),
        })
    }

    async fn start_container(&mut self) -> Result<()> {
        // a left over container with the same name would block the name
        if let Err(e) = self.runtime.remove_force(&self.container_name).await {
            debug!(error = %e, "no stale container removed");
        }

        let spec = self.container_spec()?;
        self.state = RunnerState::Launching;
        let id = self
            .runtime
            .run_detached(&spec)
            .await
            .map_err(|e| HarnessError::ContainerStart {
                container: self.container_name.clone(),
                reason: e.to_string(),
            })?;

        self.container = Some(ContainerHandle {
            id: id.clone(),
            endpoint: String::new(),
        });
        self.state = RunnerState::Started;

        let endpoint = match self.runtime.port(&id, RUNTIME_PORT).await {
            Ok(mapping) if !mapping.is_empty() => resolve_endpoint(&mapping),
            Ok(_) => {
                return Err(HarnessError::ContainerStart {
                    container: self.container_name.clone(),
                    reason: format!("no host mapping for port {RUNTIME_PORT}"),
                });
            }
            Err(e) => {
                return Err(HarnessError::ContainerStart {
                    container: self.container_name.clone(),
                    reason: e.to_string(),
                });
            }
        };

        info!(container = %id, endpoint = %endpoint, "started container");
        if let Some(handle) = self.container.as_mut() {
            handle.endpoint = endpoint;
        }
        Ok(())
    }

    fn init_attempts(&self) -> u32 {
        let delay_ms = self.config.retry_delay.as_millis().max(1) as u64;
        (self.action.limits.timeout_ms / delay_ms).clamp(1, u32::MAX as u64) as u32
    }

    async fn init_action(&self) -> Result<()> {
        let Some(handle) = self.container.clone() else {
            return Err(HarnessError::InvalidState("runner has no container"));
        };
        let url = format!("http://{}/init", handle.endpoint);
        let body = InitRequest::for_action(&self.action);
        let max_attempts = self.init_attempts();
        // the whole init phase shares one budget, however many attempts it takes
        let deadline = Instant::now() + Duration::from_millis(self.action.limits.timeout_ms);
        debug!("initializing action: POST {}", url);

        let mut attempts = 0;
        let mut last_error = String::from("no attempt made");
        while attempts < max_attempts {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            attempts += 1;

            let sent = self
                .http
                .post(&url)
                .timeout(remaining)
                .json(&body)
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(e) => {
                    // network-level failure: the runtime is not listening yet
                    debug!(attempt = attempts, error = %e, "retrying /init");
                    last_error = e.to_string();
                    let left = deadline.saturating_duration_since(Instant::now());
                    if attempts < max_attempts && !left.is_zero() {
                        tokio::time::sleep(self.config.retry_delay.min(left)).await;
                    }
                    continue;
                }
            };

            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let outcome = evaluate_init_response(status, &text);
            return match outcome {
                Ok(()) => {
                    debug!("action ready");
                    Ok(())
                }
                Err(reason) => Err(HarnessError::InitFailed {
                    url,
                    reason,
                    container_logs: self.collect_logs(&handle.id).await,
                }),
            };
        }

        Err(HarnessError::InitTimeout {
            url,
            attempts,
            reason: last_error,
            container_logs: self.collect_logs(&handle.id).await,
        })
    }

    async fn collect_logs(&self, container: &str) -> String {
        match self.runtime.logs(container).await {
            Ok(logs) => {
                debug!("container logs:\n{}", logs);
                self.log.line(&logs);
                logs
            }
            Err(e) => {
                warn!(error = %e, "could not fetch container logs");
                String::new()
            }
        }
    }

    async fn forward_logs(&self) -> Option<LogForwarder> {
        let mut follower = match self.runtime.follow_logs(&self.container_name, true).await {
            Ok(follower) => follower,
            Err(e) => {
                warn!(error = %e, "could not follow container logs");
                return None;
            }
        };
        let log = self.log.clone();
        Some(LogForwarder(tokio::spawn(async move {
            while let Some(line) = follower.next_line().await {
                log.capture(line);
            }
        })))
    }

    fn transport_error(&self, e: reqwest::Error) -> HarnessError {
        if e.is_timeout() {
            HarnessError::InvocationTimeout {
                action: self.action.name.clone(),
                timeout_ms: self.action.limits.timeout_ms,
            }
        } else {
            HarnessError::InvocationSystem {
                action: self.action.name.clone(),
                reason: e.to_string(),
            }
        }
    }
}

/// Turn a `docker port` mapping into a reachable endpoint.
fn resolve_endpoint(mapping: &str) -> String {
    match mapping.strip_prefix("0.0.0.0:") {
        Some(port) => format!("127.0.0.1:{port}"),
        None => mapping.to_string(),
    }
}

fn evaluate_init_response(
    status: reqwest::StatusCode,
    text: &str,
) -> std::result::Result<(), String> {
    if text.trim().is_empty() {
        return Err(status.as_u16().to_string());
    }
    let parsed: std::result::Result<InitResponse, _> = serde_json::from_str(text);
    match parsed {
        Ok(body) if status.is_success() && body.ok == Some(true) => Ok(()),
        Ok(InitResponse {
            error: Some(serde_json::Value::String(reason)),
            ..
        }) => Err(reason),
        Ok(InitResponse {
            error: Some(error), ..
        }) => Err(error.to_string()),
        _ => Err(format!("{} {}", status.as_u16(), text.trim())),
    }
}
