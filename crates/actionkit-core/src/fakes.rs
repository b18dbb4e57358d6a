//! In-memory container runtime (testing only)
//!
//! `FakeRuntime` satisfies the [`ContainerRuntime`] contract without Docker.
//! It records every call and tracks live containers and networks, so
//! lifecycle and cleanup invariants can be asserted directly.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{HarnessError, Result};
use crate::mock::{CONTAINER_PREFIX, READY_MARKER};
use crate::runtime::{ContainerRuntime, ContainerSpec, LogFollower};

#[derive(Debug)]
struct FakeContainer {
    id: String,
    spec: ContainerSpec,
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<String>,
    next_id: u64,
    containers: BTreeMap<String, FakeContainer>,
    networks: BTreeMap<String, BTreeSet<String>>,
    specs: Vec<ContainerSpec>,
    // keeps follow streams open like a running `docker logs -f`
    open_streams: Vec<mpsc::Sender<String>>,
}

/// In-memory [`ContainerRuntime`].
#[derive(Debug)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
    port_mapping: String,
    logs: HashMap<String, Vec<String>>,
    failing: HashSet<String>,
    mock_ready: bool,
    // the container exists before `run` returns, like a slow `docker run`
    run_delay: Option<Duration>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            port_mapping: "0.0.0.0:8080".to_string(),
            logs: HashMap::new(),
            failing: HashSet::new(),
            mock_ready: true,
            run_delay: None,
        }
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapping returned by [`ContainerRuntime::port`], e.g. a wiremock address.
    pub fn with_port_mapping(mut self, mapping: impl Into<String>) -> Self {
        self.port_mapping = mapping.into();
        self
    }

    /// Log lines produced by the named container.
    pub fn with_logs(mut self, container: &str, lines: &[&str]) -> Self {
        self.logs.insert(
            container.to_string(),
            lines.iter().map(|l| l.to_string()).collect(),
        );
        self
    }

    /// Make an operation fail: `run`, `port`, `remove`, `stop`,
    /// `network_create`, `network_connect`, `network_disconnect`,
    /// `network_remove`, `follow_logs`.
    pub fn failing(mut self, op: &str) -> Self {
        self.failing.insert(op.to_string());
        self
    }

    /// `run` creates the container at once but only returns after `delay`.
    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = Some(delay);
        self
    }

    /// Mock containers never print their readiness marker.
    pub fn without_mock_readiness(mut self) -> Self {
        self.mock_ready = false;
        self
    }

    /// Recorded calls, e.g. `run worker`, `network connect net c`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Names of containers that are currently running.
    pub fn live_containers(&self) -> Vec<String> {
        self.state.lock().unwrap().containers.keys().cloned().collect()
    }

    /// Names of networks that currently exist.
    pub fn networks(&self) -> Vec<String> {
        self.state.lock().unwrap().networks.keys().cloned().collect()
    }

    /// Containers joined to a network.
    pub fn network_members(&self, network: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .networks
            .get(network)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every spec passed to `run_detached`, in order.
    pub fn specs(&self) -> Vec<ContainerSpec> {
        self.state.lock().unwrap().specs.clone()
    }

    fn check(&self, op: &str) -> Result<()> {
        if self.failing.contains(op) {
            return Err(HarnessError::Runtime {
                command: format!("fake {op}"),
                stderr: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn no_such(what: &str, name: &str) -> HarnessError {
        HarnessError::Runtime {
            command: format!("fake {what}"),
            stderr: format!("Error: No such {what}: {name}"),
        }
    }

    fn lines_for(&self, name: &str) -> Vec<String> {
        let mut lines = self.logs.get(name).cloned().unwrap_or_default();
        if self.mock_ready && name.starts_with(CONTAINER_PREFIX) && !self.logs.contains_key(name) {
            lines.push(format!("INFO 1080 {READY_MARKER}"));
        }
        lines
    }
}

/// Resolve a container by name or id.
fn resolve(state: &FakeState, name_or_id: &str) -> Option<String> {
    if state.containers.contains_key(name_or_id) {
        return Some(name_or_id.to_string());
    }
    state
        .containers
        .iter()
        .find(|(_, c)| c.id == name_or_id)
        .map(|(name, _)| name.clone())
}

fn remove_container(state: &mut FakeState, name: &str) {
    state.containers.remove(name);
    for members in state.networks.values_mut() {
        members.remove(name);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn run_detached(&self, spec: &ContainerSpec) -> Result<String> {
        self.record(format!("run {}", spec.name));
        self.check("run")?;
        let id = {
            let mut state = self.state.lock().unwrap();
            if state.containers.contains_key(&spec.name) {
                return Err(HarnessError::Runtime {
                    command: "fake run".to_string(),
                    stderr: format!("Conflict. The container name \"/{}\" is already in use", spec.name),
                });
            }
            state.next_id += 1;
            let id = format!("fake{:012}", state.next_id);
            state.specs.push(spec.clone());
            state.containers.insert(
                spec.name.clone(),
                FakeContainer {
                    id: id.clone(),
                    spec: spec.clone(),
                },
            );
            id
        };
        if let Some(delay) = self.run_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(id)
    }

    async fn port(&self, container: &str, container_port: u16) -> Result<String> {
        self.record(format!("port {container} {container_port}"));
        self.check("port")?;
        let state = self.state.lock().unwrap();
        let name = resolve(&state, container).ok_or_else(|| Self::no_such("container", container))?;
        match state.containers.get(&name).and_then(|c| c.spec.publish.as_ref()) {
            Some(_) => Ok(self.port_mapping.clone()),
            None => Ok(String::new()),
        }
    }

    async fn logs(&self, container: &str) -> Result<String> {
        self.record(format!("logs {container}"));
        let name = {
            let state = self.state.lock().unwrap();
            resolve(&state, container).unwrap_or_else(|| container.to_string())
        };
        Ok(self.lines_for(&name).join("\n"))
    }

    async fn follow_logs(&self, container: &str, since_now: bool) -> Result<LogFollower> {
        self.record(format!("follow {container} since_now={since_now}"));
        self.check("follow_logs")?;
        let mut state = self.state.lock().unwrap();
        let name = resolve(&state, container).ok_or_else(|| Self::no_such("container", container))?;
        let lines = self.lines_for(&name);
        let (tx, rx) = mpsc::channel(lines.len() + 1);
        for line in lines {
            let _ = tx.try_send(line);
        }
        state.open_streams.push(tx);
        Ok(LogFollower::from_channel(rx))
    }

    async fn remove_force(&self, container: &str) -> Result<()> {
        self.record(format!("rm -f {container}"));
        self.check("remove")?;
        let mut state = self.state.lock().unwrap();
        let name = resolve(&state, container).ok_or_else(|| Self::no_such("container", container))?;
        remove_container(&mut state, &name);
        Ok(())
    }

    async fn stop(&self, container: &str, grace_secs: u32) -> Result<()> {
        self.record(format!("stop --time {grace_secs} {container}"));
        self.check("stop")?;
        let mut state = self.state.lock().unwrap();
        let name = resolve(&state, container).ok_or_else(|| Self::no_such("container", container))?;
        // every container the harness starts is auto-removed on stop
        remove_container(&mut state, &name);
        Ok(())
    }

    async fn network_create(&self, network: &str) -> Result<()> {
        self.record(format!("network create {network}"));
        self.check("network_create")?;
        let mut state = self.state.lock().unwrap();
        if state.networks.contains_key(network) {
            return Err(HarnessError::Runtime {
                command: "fake network create".to_string(),
                stderr: format!("network with name {network} already exists"),
            });
        }
        state.networks.insert(network.to_string(), BTreeSet::new());
        Ok(())
    }

    async fn network_connect(
        &self,
        network: &str,
        container: &str,
        alias: Option<&str>,
    ) -> Result<()> {
        match alias {
            Some(alias) => self.record(format!("network connect {network} {container} --alias {alias}")),
            None => self.record(format!("network connect {network} {container}")),
        }
        self.check("network_connect")?;
        let mut state = self.state.lock().unwrap();
        let name = resolve(&state, container).ok_or_else(|| Self::no_such("container", container))?;
        let members = state
            .networks
            .get_mut(network)
            .ok_or_else(|| Self::no_such("network", network))?;
        members.insert(name);
        Ok(())
    }

    async fn network_disconnect(&self, network: &str, container: &str) -> Result<()> {
        self.record(format!("network disconnect {network} {container}"));
        self.check("network_disconnect")?;
        let mut state = self.state.lock().unwrap();
        let name = resolve(&state, container).unwrap_or_else(|| container.to_string());
        let members = state
            .networks
            .get_mut(network)
            .ok_or_else(|| Self::no_such("network", network))?;
        members.remove(&name);
        Ok(())
    }

    async fn network_remove(&self, network: &str) -> Result<()> {
        self.record(format!("network rm {network}"));
        self.check("network_remove")?;
        let mut state = self.state.lock().unwrap();
        match state.networks.get(network) {
            None => Err(Self::no_such("network", network)),
            Some(members) if !members.is_empty() => Err(HarnessError::Runtime {
                command: "fake network rm".to_string(),
                stderr: format!("error while removing network: {network} has active endpoints"),
            }),
            Some(_) => {
                state.networks.remove(network);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: "img".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_run_and_remove() {
        let rt = FakeRuntime::new();
        let id = rt.run_detached(&spec("a")).await.unwrap();
        assert_eq!(rt.live_containers(), vec!["a"]);
        assert!(rt.run_detached(&spec("a")).await.is_err());
        rt.remove_force(&id).await.unwrap();
        assert!(rt.live_containers().is_empty());
        assert!(rt.remove_force("a").await.is_err());
    }

    #[tokio::test]
    async fn test_network_lifecycle() {
        let rt = FakeRuntime::new();
        rt.run_detached(&spec("a")).await.unwrap();
        rt.network_create("n").await.unwrap();
        assert!(rt.network_create("n").await.is_err());
        rt.network_connect("n", "a", Some("example.com")).await.unwrap();
        assert_eq!(rt.network_members("n"), vec!["a"]);
        assert!(rt.network_remove("n").await.is_err());
        rt.network_disconnect("n", "a").await.unwrap();
        rt.network_remove("n").await.unwrap();
        assert!(rt.networks().is_empty());
    }

    #[tokio::test]
    async fn test_mock_containers_report_ready() {
        let rt = FakeRuntime::new();
        rt.run_detached(&spec("mock-server-example.com")).await.unwrap();
        let mut follower = rt.follow_logs("mock-server-example.com", false).await.unwrap();
        assert!(follower.next_line().await.unwrap().contains(READY_MARKER));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let rt = FakeRuntime::new().failing("run");
        assert!(rt.run_detached(&spec("a")).await.is_err());
        assert_eq!(rt.calls(), vec!["run a"]);
    }
}
