//! In-memory container runtime for engine tests

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::runtime::{
    ContainerInfo, ContainerRuntime, ContainerSpec, NetworkInfo, NetworkSpec, ResourceFilter,
};
use crate::{Error, Result};

/// A recorded runtime call, with names resolved from IDs
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    CreateNetwork(String),
    RemoveNetwork(String),
    PullImage(String),
    CreateContainer(String),
    StartContainer(String),
    StopContainer(String, Duration),
    RemoveContainer(String, bool),
}

struct Failure {
    op: &'static str,
    target: String,
    remaining: Option<u32>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    networks: Vec<(NetworkInfo, NetworkSpec)>,
    containers: Vec<(ContainerInfo, ContainerSpec)>,
    calls: Vec<Call>,
    failures: Vec<Failure>,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:04}", self.next_id)
    }

    fn container_name(&self, id: &str) -> String {
        self.containers
            .iter()
            .find(|(c, _)| c.id == id)
            .map(|(c, _)| c.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn check(&mut self, op: &'static str, target: &str) -> Result<()> {
        let hit = self
            .failures
            .iter_mut()
            .find(|f| f.op == op && (f.target.is_empty() || f.target == target));
        match hit {
            Some(failure) => {
                match failure.remaining.as_mut() {
                    Some(0) => return Ok(()),
                    Some(n) => *n -= 1,
                    None => {}
                }
                Err(Error::runtime(op, format!("injected failure for {target}")))
            }
            None => Ok(()),
        }
    }
}

fn matches(filter: &ResourceFilter, name: &str, labels: &HashMap<String, String>) -> bool {
    match filter {
        ResourceFilter::Name(n) => n == name,
        ResourceFilter::Label(selector) => match selector.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => labels.contains_key(selector),
        },
    }
}

/// Container runtime backed by in-memory maps
#[derive(Default)]
pub(crate) struct FakeRuntime {
    state: Mutex<State>,
}

impl FakeRuntime {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail every `op` call against `target` (empty target = any)
    pub(crate) fn fail(&self, op: &'static str, target: &str) {
        self.push_failure(op, target, None);
    }

    /// Fail the next `times` `op` calls against `target`
    pub(crate) fn fail_times(&self, op: &'static str, target: &str, times: u32) {
        self.push_failure(op, target, Some(times));
    }

    fn push_failure(&self, op: &'static str, target: &str, remaining: Option<u32>) {
        self.lock().failures.push(Failure {
            op,
            target: target.to_string(),
            remaining,
        });
    }

    pub(crate) fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub(crate) fn containers(&self) -> Vec<ContainerInfo> {
        self.lock().containers.iter().map(|(c, _)| c.clone()).collect()
    }

    pub(crate) fn container_spec(&self, name: &str) -> Option<ContainerSpec> {
        self.lock()
            .containers
            .iter()
            .find(|(c, _)| c.name == name)
            .map(|(_, s)| s.clone())
    }

    pub(crate) fn container_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.containers().into_iter().map(|c| c.name).collect();
        names.sort();
        names
    }

    pub(crate) fn networks(&self) -> Vec<NetworkSpec> {
        self.lock().networks.iter().map(|(_, s)| s.clone()).collect()
    }

    /// Flip a container's running state as if it crashed or restarted
    pub(crate) fn set_running(&self, name: &str, running: bool) {
        let mut state = self.lock();
        if let Some((c, _)) = state.containers.iter_mut().find(|(c, _)| c.name == name) {
            c.running = running;
        }
    }

    /// Remove a container behind the engine's back
    pub(crate) fn remove_out_of_band(&self, name: &str) {
        self.lock().containers.retain(|(c, _)| c.name != name);
    }

    /// Remove a network behind the engine's back
    pub(crate) fn remove_network_out_of_band(&self, name: &str) {
        self.lock().networks.retain(|(n, _)| n.name != name);
    }

    /// Seed a network that was created without labels
    pub(crate) fn seed_unlabeled_network(&self, name: &str) {
        let mut state = self.lock();
        let id = state.next_id("net-");
        let spec = NetworkSpec {
            name: name.to_string(),
            cidr: "10.10.0.0/16".to_string(),
            gateway: "10.10.0.1".to_string(),
            enable_ipv6: false,
            labels: HashMap::new(),
        };
        state.networks.push((
            NetworkInfo {
                id,
                name: name.to_string(),
                labels: HashMap::new(),
            },
            spec,
        ));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<()> {
        self.lock().check("ping", "")
    }

    async fn list_networks(&self, filter: &ResourceFilter) -> Result<Vec<NetworkInfo>> {
        let mut state = self.lock();
        state.check("list_networks", "")?;
        Ok(state
            .networks
            .iter()
            .filter(|(n, _)| matches(filter, &n.name, &n.labels))
            .map(|(n, _)| n.clone())
            .collect())
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<String> {
        let mut state = self.lock();
        state.check("create_network", &spec.name)?;
        if state.networks.iter().any(|(n, _)| n.name == spec.name) {
            return Err(Error::runtime(
                "create network",
                format!("network with name {} already exists", spec.name),
            ));
        }
        let id = state.next_id("net-");
        state.calls.push(Call::CreateNetwork(spec.name.clone()));
        state.networks.push((
            NetworkInfo {
                id: id.clone(),
                name: spec.name.clone(),
                labels: spec.labels.clone(),
            },
            spec.clone(),
        ));
        Ok(id)
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        let mut state = self.lock();
        let name = state
            .networks
            .iter()
            .find(|(n, _)| n.id == id)
            .map(|(n, _)| n.name.clone())
            .unwrap_or_else(|| id.to_string());
        state.check("remove_network", &name)?;
        state.calls.push(Call::RemoveNetwork(name));
        state.networks.retain(|(n, _)| n.id != id);
        Ok(())
    }

    async fn list_containers(&self, filter: &ResourceFilter) -> Result<Vec<ContainerInfo>> {
        let mut state = self.lock();
        state.check("list_containers", "")?;
        Ok(state
            .containers
            .iter()
            .filter(|(c, _)| matches(filter, &c.name, &c.labels))
            .map(|(c, _)| c.clone())
            .collect())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(Call::PullImage(image.to_string()));
        state.check("pull_image", image)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.lock();
        state.check("create_container", &spec.name)?;
        if state.containers.iter().any(|(c, _)| c.name == spec.name) {
            return Err(Error::runtime(
                "create container",
                format!("Conflict. The container name {} is already in use", spec.name),
            ));
        }
        if !state.networks.iter().any(|(n, _)| n.name == spec.network) {
            return Err(Error::runtime(
                "create container",
                format!("network {} not found", spec.network),
            ));
        }
        let id = state.next_id("ctr-");
        state.calls.push(Call::CreateContainer(spec.name.clone()));
        state.containers.push((
            ContainerInfo {
                id: id.clone(),
                name: spec.name.clone(),
                labels: spec.labels.clone(),
                running: false,
            },
            spec.clone(),
        ));
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut state = self.lock();
        let name = state.container_name(id);
        state.check("start_container", &name)?;
        state.calls.push(Call::StartContainer(name));
        match state.containers.iter_mut().find(|(c, _)| c.id == id) {
            Some((c, _)) => {
                c.running = true;
                Ok(())
            }
            None => Err(Error::runtime("start container", format!("no such container: {id}"))),
        }
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()> {
        let mut state = self.lock();
        let name = state.container_name(id);
        state.check("stop_container", &name)?;
        state.calls.push(Call::StopContainer(name, grace));
        if let Some((c, _)) = state.containers.iter_mut().find(|(c, _)| c.id == id) {
            c.running = false;
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str, remove_volumes: bool) -> Result<()> {
        let mut state = self.lock();
        let name = state.container_name(id);
        state.check("remove_container", &name)?;
        state.calls.push(Call::RemoveContainer(name, remove_volumes));
        state.containers.retain(|(c, _)| c.id != id);
        Ok(())
    }
}
