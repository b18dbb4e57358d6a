//! Container runtime abstraction and the Docker CLI backend.
//!
//! Every runtime operation is a blocking (awaited) subprocess call built from
//! an argument vector, so paths and hostnames never pass through a shell.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{HarnessError, Result};

// ---------------------------------------------------------------------------
// Container specification
// ---------------------------------------------------------------------------

/// A host directory bind-mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl Mount {
    pub fn read_only(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: true,
        }
    }

    pub fn read_write(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: false,
        }
    }

    /// `-v` argument value, e.g. `/tmp/in:/in:ro`.
    pub fn to_volume_arg(&self) -> String {
        let mut arg = format!("{}:{}", self.host.display(), self.container);
        if self.read_only {
            arg.push_str(":ro");
        }
        arg
    }
}

/// Port published from a container to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPort {
    /// Host interface to bind; `None` lets the runtime choose.
    pub host_ip: Option<String>,
    pub container_port: u16,
}

/// Everything needed to launch one detached container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub auto_remove: bool,
    pub user: Option<String>,
    pub memory_bytes: Option<u64>,
    pub publish: Option<PublishedPort>,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    /// Arguments passed to the image entry point.
    pub args: Vec<String>,
}

impl ContainerSpec {
    /// Argument vector for `docker run`.
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec!["run".to_string(), "-d".to_string()];
        if self.auto_remove {
            args.push("--rm".to_string());
        }
        args.push("--name".to_string());
        args.push(self.name.clone());
        if let Some(user) = &self.user {
            args.push("-u".to_string());
            args.push(user.clone());
        }
        if let Some(publish) = &self.publish {
            args.push("-p".to_string());
            args.push(match &publish.host_ip {
                Some(ip) => format!("{}::{}", ip, publish.container_port),
                None => publish.container_port.to_string(),
            });
        }
        if let Some(memory) = self.memory_bytes {
            args.push("-m".to_string());
            args.push(memory.to_string());
        }
        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        for mount in &self.mounts {
            args.push("-v".to_string());
            args.push(mount.to_volume_arg());
        }
        // options must precede the image; anything after it goes to the entry point
        args.push(self.image.clone());
        args.extend(self.args.iter().cloned());
        args
    }
}

// ---------------------------------------------------------------------------
// Log following
// ---------------------------------------------------------------------------

/// A live stream of container log lines.
///
/// Dropping the follower kills the underlying log process and its reader
/// tasks, so log forwarding stops on every exit path.
pub struct LogFollower {
    lines: mpsc::Receiver<String>,
    child: Option<Child>,
    tasks: Vec<JoinHandle<()>>,
}

impl LogFollower {
    /// Follower fed by an existing channel (used by in-memory runtimes).
    pub fn from_channel(lines: mpsc::Receiver<String>) -> Self {
        Self {
            lines,
            child: None,
            tasks: Vec::new(),
        }
    }

    /// Next log line, or `None` once the stream has ended.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }
}

impl Drop for LogFollower {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Runtime trait
// ---------------------------------------------------------------------------

/// Container runtime operations used by the harness.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Launch a detached container; returns the runtime-assigned id.
    async fn run_detached(&self, spec: &ContainerSpec) -> Result<String>;

    /// Resolve the first host mapping (`host:port`) of a published port.
    async fn port(&self, container: &str, container_port: u16) -> Result<String>;

    /// Complete timestamped log output of a container.
    async fn logs(&self, container: &str) -> Result<String>;

    /// Follow a container's log output, optionally only from now on.
    async fn follow_logs(&self, container: &str, since_now: bool) -> Result<LogFollower>;

    /// Force-remove a container (stopping it first if running).
    async fn remove_force(&self, container: &str) -> Result<()>;

    /// Stop a container, waiting up to `grace_secs` before killing it.
    async fn stop(&self, container: &str, grace_secs: u32) -> Result<()>;

    async fn network_create(&self, network: &str) -> Result<()>;

    /// Join a container to a network, optionally under a DNS alias.
    async fn network_connect(&self, network: &str, container: &str, alias: Option<&str>)
        -> Result<()>;

    /// Forcefully detach a container from a network.
    async fn network_disconnect(&self, network: &str, container: &str) -> Result<()>;

    async fn network_remove(&self, network: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Docker CLI backend
// ---------------------------------------------------------------------------

/// [`ContainerRuntime`] backed by the `docker` command line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run a docker command to completion and return trimmed stdout.
    async fn exec(&self, args: &[String]) -> Result<String> {
        let command_line = format!("{} {}", self.binary, args.join(" "));
        debug!("> {}", command_line);

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| HarnessError::Runtime {
                command: command_line.clone(),
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(HarnessError::Runtime {
                command: command_line,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn strings<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn run_detached(&self, spec: &ContainerSpec) -> Result<String> {
        self.exec(&spec.run_args()).await
    }

    async fn port(&self, container: &str, container_port: u16) -> Result<String> {
        let output = self
            .exec(&strings(["port", container, &container_port.to_string()]))
            .await?;
        Ok(output.lines().next().unwrap_or_default().trim().to_string())
    }

    async fn logs(&self, container: &str) -> Result<String> {
        let args = strings(["logs", "-t", container]);
        debug!("> {} {}", self.binary, args.join(" "));
        // docker logs replays the container's stderr on our stderr
        let command_line = format!("{} {}", self.binary, args.join(" "));
        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| HarnessError::Runtime {
                command: command_line.clone(),
                stderr: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(HarnessError::Runtime {
                command: command_line,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs.trim_end().to_string())
    }

    async fn follow_logs(&self, container: &str, since_now: bool) -> Result<LogFollower> {
        let mut args = strings(["logs", "-t", "-f"]);
        if since_now {
            args.push("--since".to_string());
            args.push("0m".to_string());
        }
        args.push(container.to_string());
        debug!("> {} {}", self.binary, args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HarnessError::Runtime {
                command: format!("{} {}", self.binary, args.join(" ")),
                stderr: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel(256);
        let mut tasks = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            tasks.push(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tasks.push(forward_lines(stderr, tx));
        }

        Ok(LogFollower {
            lines: rx,
            child: Some(child),
            tasks,
        })
    }

    async fn remove_force(&self, container: &str) -> Result<()> {
        self.exec(&strings(["rm", "-f", container])).await.map(|_| ())
    }

    async fn stop(&self, container: &str, grace_secs: u32) -> Result<()> {
        self.exec(&strings(["stop", "--time", &grace_secs.to_string(), container]))
            .await
            .map(|_| ())
    }

    async fn network_create(&self, network: &str) -> Result<()> {
        self.exec(&strings(["network", "create", network]))
            .await
            .map(|_| ())
    }

    async fn network_connect(
        &self,
        network: &str,
        container: &str,
        alias: Option<&str>,
    ) -> Result<()> {
        let mut args = strings(["network", "connect"]);
        if let Some(alias) = alias {
            args.push("--alias".to_string());
            args.push(alias.to_string());
        }
        args.push(network.to_string());
        args.push(container.to_string());
        self.exec(&args).await.map(|_| ())
    }

    async fn network_disconnect(&self, network: &str, container: &str) -> Result<()> {
        self.exec(&strings(["network", "disconnect", "--force", network, container]))
            .await
            .map(|_| ())
    }

    async fn network_remove(&self, network: &str) -> Result<()> {
        self.exec(&strings(["network", "rm", network]))
            .await
            .map(|_| ())
    }
}

/// Normalize a human-readable hint to a valid container name.
///
/// Container names are restricted to `[a-zA-Z0-9][a-zA-Z0-9_.-]*`: runs of
/// other characters become a single dash, leading characters other than
/// alphanumerics are dropped, trailing special characters are trimmed.
pub fn sanitize_container_name(hint: &str) -> String {
    let mut name = String::with_capacity(hint.len());
    let mut in_invalid_run = false;
    for c in hint.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
            name.push(c);
            in_invalid_run = false;
        } else if !in_invalid_run {
            name.push('-');
            in_invalid_run = true;
        }
    }
    name.trim_start_matches(|c: char| !c.is_ascii_alphanumeric())
        .trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}
