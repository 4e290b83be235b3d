//! Negotiation engine: unit agents gossiping their way to a joint plan.
//!
//! Each unit agent owns a private catalogue of operation schedules and a
//! planner that runs the perceive/decide/act cycle of the COHDA heuristic:
//! drain the inbox, merge the received system configurations and
//! candidates into the local view, try to improve the joint plan by
//! switching the own schedule, and broadcast when anything changed. A
//! controller drives the session lifecycle over a ring-plus-random
//! topology while an observer collects statistics, detects quiescence and
//! aggregates the final solution.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  register / run_negotiation   ┌────────────┐
//! │ Controller ├──────────────────────────────▶│ Unit Agent │⟍
//! │            │                               │  planner   │ ⟍ gossip
//! │  topology  │        stats / final          └────────────┘  ⟋(ring ∪
//! │  timeout   │       candidates  ▲           ┌────────────┐ ⟋  random)
//! └─────┬──────┘                   │           │ Unit Agent │⟋
//!       │ start_observation  ┌─────┴────┐      │  planner   │
//!       └────────────────────▶ Observer │◀─────└────────────┘
//!                            └──────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cohda_engine::{Engine, EngineConfig};
//! use cohda_units::StaticModel;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EngineConfig {
//!         resolution: 900,
//!         period: 3600,
//!         ..EngineConfig::default()
//!     };
//!     let units = vec![
//!         ("pv".to_owned(), Arc::new(StaticModel::new(vec![
//!             vec![0.0, 0.0, 0.0, 0.0],
//!             vec![1.0, 2.0, 2.0, 1.0],
//!         ])) as _),
//!     ];
//!     let engine = Engine::new(config, units, None)?;
//!     let solution = engine
//!         .run_negotiation(
//!             "2017-07-05T00:00:00Z".parse()?,
//!             vec![1.0, 2.0, 2.0, 1.0],
//!             vec![1.0, 1.0, 1.0, 1.0],
//!         )
//!         .await?;
//!     println!("perf {}", solution.perf());
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod communication;
pub mod controller;
pub mod observer;
mod planner;
pub mod sink;
pub mod termination;
pub mod topology;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cohda_core::{Candidate, UnitModel};
use ndarray::Array1;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

pub use agent::{UnitAgent, UnitAgentApi};
pub use communication::{AgentLink, Connector, Gossip, Inbox, LocalRegistry, Signal};
pub use controller::Controller;
pub use observer::{ControllerApi, Observer, ObserverApi, StatsUpdate};
pub use planner::PlannerState;
pub use sink::{JsonSink, MemorySink, ResultSink, SessionRecord, StatsRow};
pub use termination::{MessageCounter, TerminationDetector};
pub use topology::TopologyManager;

/// Session-wide engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of unit agents expected to register; `None` accepts any.
    pub n_agents: Option<usize>,
    /// Start the gossip exchange from a single seed agent instead of all.
    pub single_start: bool,
    /// Wall-clock budget for one negotiation.
    pub neg_timeout: Duration,
    /// Planner poll interval for the inbox.
    pub check_inbox_interval: Duration,
    /// Density of random extra topology edges (ring plus `n * phi` pairs).
    pub topology_phi: f64,
    /// Seed for the topology draw; `None` draws fresh entropy.
    pub topology_seed: Option<u64>,
    /// Seconds per scheduling interval.
    pub resolution: u32,
    /// Planning horizon in seconds.
    pub period: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            n_agents: None,
            single_start: true,
            neg_timeout: Duration::from_secs(15 * 60),
            check_inbox_interval: Duration::from_millis(10),
            topology_phi: 1.0,
            topology_seed: None,
            resolution: 15 * 60,
            period: 24 * 60 * 60,
        }
    }
}

impl EngineConfig {
    /// Number of scheduling intervals in the planning horizon.
    pub fn intervals(&self) -> usize {
        (self.period / self.resolution) as usize
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.resolution > 0, "resolution must be > 0");
        anyhow::ensure!(
            self.period >= self.resolution && self.period % self.resolution == 0,
            "period must be a multiple of the resolution"
        );
        anyhow::ensure!(self.topology_phi >= 0.0, "topology_phi must be >= 0");
        anyhow::ensure!(
            !self.check_inbox_interval.is_zero(),
            "check_inbox_interval must be > 0"
        );
        Ok(())
    }
}

/// An all-in-one-process negotiation system: controller, observer and unit
/// agents wired over a local registry.
pub struct Engine {
    config: EngineConfig,
    controller: Arc<Controller>,
    observer: Arc<Observer>,
    agents: Vec<Arc<UnitAgent>>,
    running: Mutex<Option<tokio::task::AbortHandle>>,
}

impl Engine {
    /// Assemble an engine for the given `(name, model)` units. Statistics
    /// and results go to `sink` if one is provided.
    pub fn new(
        config: EngineConfig,
        units: Vec<(String, Arc<dyn UnitModel>)>,
        sink: Option<Box<dyn ResultSink>>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        if let Some(expected) = config.n_agents {
            anyhow::ensure!(
                expected == units.len(),
                "{} units supplied but n_agents is {expected}",
                units.len()
            );
        }
        info!(units = units.len(), "initializing engine");

        let registry = Arc::new(LocalRegistry::default());
        let observer = Arc::new(Observer::new(
            Some(units.len()),
            Box::new(MessageCounter::new()),
            sink,
        ));
        let controller = Arc::new(Controller::new(&config));
        observer.set_controller(controller.clone());
        controller.register_observer(observer.clone());

        let mut agents = Vec::with_capacity(units.len());
        for (i, (name, model)) in units.into_iter().enumerate() {
            let addr = format!("local/{i:04}");
            let agent = UnitAgent::new(
                name,
                addr.clone(),
                model,
                observer.clone() as Arc<dyn ObserverApi>,
                registry.clone() as Arc<dyn Connector>,
                config.check_inbox_interval,
            );
            registry.register(&addr, agent.inbox());
            controller.register_unit_agent(agent.clone(), &addr, agent.name());
            observer.register_unit_agent(&addr, agent.name());
            agents.push(agent);
        }

        Ok(Self {
            config,
            controller,
            observer,
            agents,
            running: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn agents(&self) -> &[Arc<UnitAgent>] {
        &self.agents
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    pub fn observer(&self) -> &Arc<Observer> {
        &self.observer
    }

    /// Run one negotiation for the given target curve and return the
    /// solution candidate.
    pub async fn run_negotiation(
        &self,
        start: DateTime<Utc>,
        target: Vec<f64>,
        weights: Vec<f64>,
    ) -> anyhow::Result<Arc<Candidate>> {
        let controller = Arc::clone(&self.controller);
        let task = tokio::spawn(controller.run_negotiation(
            start,
            Array1::from(target),
            Array1::from(weights),
        ));
        *self.running.lock() = Some(task.abort_handle());

        let outcome = task.await;
        *self.running.lock() = None;
        match outcome {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => anyhow::bail!("negotiation cancelled"),
            Err(err) => Err(err.into()),
        }
    }

    /// Cancel a running negotiation, if any. The planners of the unit
    /// agents are aborted as well.
    pub fn stop(&self) {
        if let Some(handle) = self.running.lock().take() {
            handle.abort();
        }
        for agent in &self.agents {
            agent.stop();
        }
    }
}
