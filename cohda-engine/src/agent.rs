//! Unit agents: one per participating unit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cohda_core::{Candidate, CohdaError, Objective, Result, ScheduleId, SystemConfig, UnitModel};
use futures::future::try_join_all;
use ndarray::Array1;
use parking_lot::Mutex;
use tracing::debug;

use crate::communication::Connector;
use crate::observer::ObserverApi;
use crate::planner::{Planner, PlannerState, WorkingMemory};

/// Methods the controller uses to drive a unit agent, whether it lives in
/// this process or behind a transport.
#[async_trait]
pub trait UnitAgentApi: Send + Sync {
    /// Display name of the unit.
    fn name(&self) -> &str;

    /// Unique address; the identity under which the agent appears in the
    /// shared structures.
    fn addr(&self) -> &str;

    /// Forget any previously broadcast assignment before a new session.
    async fn new_negotiation(&self) -> Result<()>;

    /// Hand the agent its neighbors and session parameters, arm the
    /// planner.
    #[allow(clippy::too_many_arguments)]
    async fn store_topology(
        &self,
        neighbors: Vec<String>,
        target: Array1<f64>,
        weights: Array1<f64>,
        resolution: u32,
        intervals: usize,
        start: DateTime<Utc>,
    ) -> Result<()>;

    /// Make this agent the seed of the gossip exchange.
    async fn init_negotiation(&self) -> Result<()>;

    /// Wind the negotiation down and report the final candidate.
    async fn stop_negotiation(&self) -> Result<()>;

    /// Final-assignment hook: record the schedule this unit should run.
    async fn set_schedule(&self, sid: ScheduleId) -> Result<()>;
}

/// A unit agent: owns a schedule provider and a planner that negotiates on
/// the unit's behalf.
pub struct UnitAgent {
    name: String,
    addr: String,
    model: Arc<dyn UnitModel>,
    connector: Arc<dyn Connector>,
    planner: Planner,
    chosen: Mutex<Option<ScheduleId>>,
}

impl UnitAgent {
    pub fn new(
        name: impl Into<String>,
        addr: impl Into<String>,
        model: Arc<dyn UnitModel>,
        observer: Arc<dyn ObserverApi>,
        connector: Arc<dyn Connector>,
        check_inbox_interval: Duration,
    ) -> Arc<Self> {
        let name = name.into();
        let addr = addr.into();
        let planner = Planner::new(addr.clone(), name.clone(), check_inbox_interval, observer);
        Arc::new(Self {
            name,
            addr,
            model,
            connector,
            planner,
            chosen: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The inbox handle neighbors deliver into; registered with the local
    /// registry or a host.
    pub fn inbox(&self) -> Arc<crate::communication::Inbox> {
        self.planner.inbox()
    }

    pub fn state(&self) -> PlannerState {
        self.planner.state()
    }

    /// Receiver-side gossip hook. Appends to the inbox and returns
    /// immediately; processing happens on the next planner tick.
    pub fn update(&self, sysconf: Arc<SystemConfig>, candidate: Arc<Candidate>) {
        self.planner
            .receive(crate::communication::Gossip { sysconf, candidate });
    }

    /// The assignment received at the end of the last negotiation.
    pub fn current_schedule(&self) -> Option<ScheduleId> {
        *self.chosen.lock()
    }

    /// Hard abort of a running negotiation task.
    pub fn stop(&self) {
        self.planner.abort();
    }
}

#[async_trait]
impl UnitAgentApi for UnitAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn addr(&self) -> &str {
        &self.addr
    }

    async fn new_negotiation(&self) -> Result<()> {
        *self.chosen.lock() = None;
        Ok(())
    }

    async fn store_topology(
        &self,
        neighbors: Vec<String>,
        target: Array1<f64>,
        weights: Array1<f64>,
        resolution: u32,
        intervals: usize,
        start: DateTime<Utc>,
    ) -> Result<()> {
        if intervals != target.len() || target.len() != weights.len() {
            return Err(CohdaError::Config(format!(
                "{} intervals requested but target/weights cover {}/{}",
                intervals,
                target.len(),
                weights.len()
            )));
        }

        let links = try_join_all(neighbors.iter().map(|addr| self.connector.connect(addr)))
            .await?;

        let possible_schedules = self.model.generate_schedules(start, resolution, intervals)?;
        debug!(
            agent = %self.name,
            schedules = possible_schedules.len(),
            "catalogue enumerated"
        );
        let first = possible_schedules.first().ok_or_else(|| {
            CohdaError::ScheduleUnavailable(format!("{} has an empty catalogue", self.name))
        })?;

        // The first entry seeds the shared structures; its quality is
        // irrelevant, negotiation starts from here.
        let objective = Objective::new(target, weights);
        let sysconf = SystemConfig::seed(&self.addr, &first.os, first.sid);
        let candidate = Candidate::from_sysconf(&self.addr, &sysconf, &objective);

        self.planner.arm(WorkingMemory {
            neighbors: links,
            start,
            resolution,
            intervals,
            objective,
            possible_schedules,
            sysconf,
            candidate,
            msgs_in: 0,
            msgs_out: 0,
            armed_at: Instant::now(),
        });
        Ok(())
    }

    async fn init_negotiation(&self) -> Result<()> {
        self.planner.init_negotiation().await;
        Ok(())
    }

    async fn stop_negotiation(&self) -> Result<()> {
        self.planner.stop_negotiation().await
    }

    async fn set_schedule(&self, sid: ScheduleId) -> Result<()> {
        debug!(agent = %self.name, %sid, "assignment received");
        *self.chosen.lock() = Some(sid);
        Ok(())
    }
}
