//! Session orchestration: one controller drives all unit agents.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cohda_core::{Candidate, Result};
use futures::future::join_all;
use ndarray::Array1;
use parking_lot::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::agent::UnitAgentApi;
use crate::communication::Signal;
use crate::observer::{ControllerApi, ObserverApi};
use crate::topology::TopologyManager;
use crate::EngineConfig;

#[derive(Clone)]
struct RegisteredAgent {
    api: Arc<dyn UnitAgentApi>,
    addr: String,
    name: String,
}

/// Orchestrates negotiations: builds the topology, distributes the target
/// curve, starts the gossip exchange through a seed agent, enforces the
/// session timeout and broadcasts the final assignment.
pub struct Controller {
    n_agents: Option<usize>,
    single_start: bool,
    neg_timeout: Duration,
    resolution: u32,
    intervals: usize,
    topology: TopologyManager,
    agents: Mutex<Vec<RegisteredAgent>>,
    agents_registered: Signal,
    observer: Mutex<Option<Arc<dyn ObserverApi>>>,
    observer_registered: Signal,
    neg_done: Mutex<Option<Signal>>,
}

impl Controller {
    pub fn new(config: &EngineConfig) -> Self {
        let agents_registered = Signal::new();
        if config.n_agents.is_none() {
            agents_registered.set();
        }
        Self {
            n_agents: config.n_agents,
            single_start: config.single_start,
            neg_timeout: config.neg_timeout,
            resolution: config.resolution,
            intervals: config.intervals(),
            topology: TopologyManager::new(config.topology_phi, config.topology_seed),
            agents: Mutex::new(Vec::new()),
            agents_registered,
            observer: Mutex::new(None),
            observer_registered: Signal::new(),
            neg_done: Mutex::new(None),
        }
    }

    /// Register a unit agent under its address and display name.
    pub fn register_unit_agent(&self, api: Arc<dyn UnitAgentApi>, addr: &str, name: &str) {
        debug!(addr, name, "controller registered unit agent");
        let mut agents = self.agents.lock();
        agents.push(RegisteredAgent {
            api,
            addr: addr.to_owned(),
            name: name.to_owned(),
        });
        if Some(agents.len()) == self.n_agents {
            self.agents_registered.set();
        }
    }

    pub fn register_observer(&self, observer: Arc<dyn ObserverApi>) {
        debug!("controller registered observer");
        *self.observer.lock() = Some(observer);
        self.observer_registered.set();
    }

    /// Resolves once the expected number of agents has registered.
    pub fn agents_registered(&self) -> Signal {
        self.agents_registered.clone()
    }

    pub fn observer_registered(&self) -> Signal {
        self.observer_registered.clone()
    }

    /// Run one full negotiation and return the agreed solution.
    ///
    /// Timeouts are not errors: the observer merges whatever the agents
    /// reached and the partial solution is broadcast like a full one.
    pub async fn run_negotiation(
        self: Arc<Self>,
        start: DateTime<Utc>,
        target: Array1<f64>,
        weights: Array1<f64>,
    ) -> anyhow::Result<Arc<Candidate>> {
        let agents = self.agents.lock().clone();
        anyhow::ensure!(!agents.is_empty(), "no unit agents registered");
        let observer = self
            .observer
            .lock()
            .clone()
            .context("observer not registered")?;

        // Topology over the agent addresses; the observer gets the
        // canonical edge list for its records.
        let addrs: Vec<String> = agents.iter().map(|a| a.addr.clone()).collect();
        let names: HashMap<String, String> = agents
            .iter()
            .map(|a| (a.addr.clone(), a.name.clone()))
            .collect();
        let topology = self.topology.build(&addrs);
        let edges = TopologyManager::edges(&topology, &names);
        debug!(agents = agents.len(), edges = edges.len(), "topology built");

        observer
            .start_observation(edges, start, target.clone(), weights.clone())
            .await?;

        let done = Signal::new();
        *self.neg_done.lock() = Some(done.clone());

        for agent in &agents {
            agent.api.new_negotiation().await?;
            let neighbors: Vec<String> = topology
                .get(&agent.addr)
                .map(|peers| peers.iter().cloned().collect())
                .unwrap_or_default();
            agent
                .api
                .store_topology(
                    neighbors,
                    target.clone(),
                    weights.clone(),
                    self.resolution,
                    self.intervals,
                    start,
                )
                .await?;
        }

        info!(%start, "starting negotiation");
        for agent in &agents {
            agent.api.init_negotiation().await?;
            if self.single_start {
                break;
            }
        }

        if timeout(self.neg_timeout, done.wait()).await.is_err() {
            info!(after = ?self.neg_timeout, "negotiation stopped by timeout");
        }

        // Stop every agent; a failing one must not keep the rest hanging.
        let results = join_all(agents.iter().map(|a| a.api.stop_negotiation())).await;
        for (agent, result) in agents.iter().zip(results) {
            if let Err(err) = result {
                warn!(agent = %agent.name, %err, "stop_negotiation failed");
            }
        }

        let solution = observer.pass_solution().await?;
        info!(
            perf = solution.perf(),
            sids = ?solution.sids(),
            "broadcasting solution"
        );

        for agent in &agents {
            match solution.sid_for(&agent.addr) {
                Some(sid) => agent.api.set_schedule(sid).await?,
                None => warn!(agent = %agent.name, "agent missing from solution"),
            }
        }

        Ok(solution)
    }
}

#[async_trait]
impl ControllerApi for Controller {
    async fn negotiation_finished(&self) -> Result<()> {
        debug!("negotiation finished, releasing the session");
        if let Some(done) = self.neg_done.lock().as_ref() {
            done.set();
        }
        Ok(())
    }
}
