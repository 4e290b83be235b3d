//! Passive observation of a running negotiation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cohda_core::{Candidate, CohdaError, Objective, Result};
use ndarray::Array1;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::communication::Signal;
use crate::sink::{ResultSink, StatsRow};
use crate::termination::TerminationDetector;

/// One per-cycle report from a unit agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsUpdate {
    /// The reporting agent's display name.
    pub agent: String,
    /// Seconds since the agent armed its negotiation.
    pub t: f64,
    pub perf: f64,
    /// Number of agents the reporter's candidate covers.
    pub n_os: usize,
    pub msgs_in: u64,
    pub msgs_out: u64,
    pub msg_sent: bool,
}

/// Observer methods reachable by unit agents and the controller, local or
/// remote.
#[async_trait]
pub trait ObserverApi: Send + Sync {
    async fn start_observation(
        &self,
        edges: Vec<(String, String)>,
        start: DateTime<Utc>,
        target: Array1<f64>,
        weights: Array1<f64>,
    ) -> Result<()>;

    async fn update_stats(&self, stats: StatsUpdate) -> Result<()>;

    async fn update_final_cand(&self, candidate: Arc<Candidate>) -> Result<()>;

    async fn pass_solution(&self) -> Result<Arc<Candidate>>;
}

/// Controller methods the observer calls back into.
#[async_trait]
pub trait ControllerApi: Send + Sync {
    /// Termination has been detected; the negotiation can be stopped.
    async fn negotiation_finished(&self) -> Result<()>;
}

struct Session {
    objective: Objective,
    candidates: Vec<Arc<Candidate>>,
    solution: Option<Arc<Candidate>>,
    solution_ready: Signal,
    terminated: bool,
}

/// Monitors one negotiation at a time: persists per-cycle statistics,
/// detects quiescence, reports it to the controller and aggregates the
/// final candidates into the session solution.
pub struct Observer {
    agents: Mutex<Vec<(String, String)>>,
    n_agents: Option<usize>,
    agents_registered: Signal,
    controller: Mutex<Option<Arc<dyn ControllerApi>>>,
    detector: Mutex<Box<dyn TerminationDetector>>,
    sink: Mutex<Option<Box<dyn ResultSink>>>,
    session: Mutex<Option<Session>>,
}

impl Observer {
    /// `n_agents` gates the registration signal; `None` means "whoever
    /// registers before the first negotiation".
    pub fn new(
        n_agents: Option<usize>,
        detector: Box<dyn TerminationDetector>,
        sink: Option<Box<dyn ResultSink>>,
    ) -> Self {
        let agents_registered = Signal::new();
        if n_agents.is_none() {
            agents_registered.set();
        }
        Self {
            agents: Mutex::new(Vec::new()),
            n_agents,
            agents_registered,
            controller: Mutex::new(None),
            detector: Mutex::new(detector),
            sink: Mutex::new(sink),
            session: Mutex::new(None),
        }
    }

    /// Wire the controller callback target. Must happen before the first
    /// negotiation starts.
    pub fn set_controller(&self, controller: Arc<dyn ControllerApi>) {
        *self.controller.lock() = Some(controller);
    }

    /// Register a unit agent by `(address, name)`.
    pub fn register_unit_agent(&self, addr: &str, name: &str) {
        debug!(addr, name, "observer registered unit agent");
        let mut agents = self.agents.lock();
        agents.push((addr.to_owned(), name.to_owned()));
        if Some(agents.len()) == self.n_agents {
            self.agents_registered.set();
        }
    }

    /// Resolves once the expected number of agents has registered.
    pub fn agents_registered(&self) -> Signal {
        self.agents_registered.clone()
    }

    fn solve(session: &mut Session) -> Arc<Candidate> {
        let solution = if session.terminated {
            // At quiescence every agent holds the same candidate.
            let first = Arc::clone(&session.candidates[0]);
            debug_assert!(
                session
                    .candidates
                    .iter()
                    .all(|candidate| **candidate == *first),
                "termination was detected but the final candidates disagree"
            );
            first
        } else {
            // Stopped early: fold whatever the agents got to into one
            // proposal.
            let mut merged = Arc::clone(&session.candidates[0]);
            for candidate in &session.candidates[1..] {
                merged = Candidate::merge(&merged, candidate, "controller", &session.objective);
            }
            merged
        };
        session.solution = Some(Arc::clone(&solution));
        session.solution_ready.set();
        solution
    }
}

#[async_trait]
impl ObserverApi for Observer {
    async fn start_observation(
        &self,
        edges: Vec<(String, String)>,
        start: DateTime<Utc>,
        target: Array1<f64>,
        weights: Array1<f64>,
    ) -> Result<()> {
        if target.len() != weights.len() {
            return Err(CohdaError::Config(format!(
                "target covers {} intervals but weights cover {}",
                target.len(),
                weights.len()
            )));
        }
        info!(agents = self.agents.lock().len(), %start, "starting observation");

        self.detector.lock().reset();

        if let Some(sink) = self.sink.lock().as_mut() {
            sink.open_session(start, &self.agents.lock())?;
            sink.store_topology(&edges)?;
        }

        *self.session.lock() = Some(Session {
            objective: Objective::new(target, weights),
            candidates: Vec::new(),
            solution: None,
            solution_ready: Signal::new(),
            terminated: false,
        });
        Ok(())
    }

    async fn update_stats(&self, stats: StatsUpdate) -> Result<()> {
        let n_agents = self.agents.lock().len();
        if let Some(sink) = self.sink.lock().as_mut() {
            sink.append(StatsRow {
                t: stats.t,
                agent: stats.agent.clone(),
                perf: stats.perf,
                complete: stats.n_os == n_agents,
                msgs_out: stats.msgs_out,
                msgs_in: stats.msgs_in,
                msg_sent: stats.msg_sent,
            });
        }

        let quiesced = self
            .detector
            .lock()
            .update(&stats.agent, stats.msgs_in, stats.msgs_out);

        let newly_terminated = {
            let mut session = self.session.lock();
            match session.as_mut() {
                Some(session) if quiesced && !session.terminated => {
                    session.terminated = true;
                    true
                }
                _ => false,
            }
        };

        if newly_terminated {
            info!("negotiation terminated, notifying controller");
            let controller = self.controller.lock().clone();
            match controller {
                Some(controller) => controller.negotiation_finished().await?,
                None => warn!("termination detected but no controller is registered"),
            }
        }
        Ok(())
    }

    async fn update_final_cand(&self, candidate: Arc<Candidate>) -> Result<()> {
        let expected = self.agents.lock().len();
        let flushed = {
            let mut session = self.session.lock();
            let session = session.as_mut().ok_or_else(|| {
                CohdaError::Config("final candidate outside a negotiation".to_owned())
            })?;
            session.candidates.push(candidate);
            debug!(
                received = session.candidates.len(),
                expected, "final candidate buffered"
            );
            if session.candidates.len() == expected {
                let solution = Self::solve(session);
                Some((session.objective.clone(), solution))
            } else {
                None
            }
        };

        if let Some((objective, solution)) = flushed {
            if let Some(sink) = self.sink.lock().as_mut() {
                sink.flush(&objective, &solution)?;
            }
        }
        Ok(())
    }

    async fn pass_solution(&self) -> Result<Arc<Candidate>> {
        let ready = {
            let session = self.session.lock();
            let session = session
                .as_ref()
                .ok_or_else(|| CohdaError::Config("no negotiation was observed".to_owned()))?;
            session.solution_ready.clone()
        };
        ready.wait().await;

        let session = self.session.lock();
        session
            .as_ref()
            .and_then(|session| session.solution.clone())
            .ok_or_else(|| CohdaError::Config("solution not determined".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::termination::MessageCounter;
    use cohda_core::{ScheduleId, SystemConfig};
    use ndarray::array;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingController(AtomicUsize);

    #[async_trait]
    impl ControllerApi for CountingController {
        async fn negotiation_finished(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn observer(n: usize) -> (Arc<Observer>, Arc<CountingController>) {
        let observer = Arc::new(Observer::new(
            Some(n),
            Box::new(MessageCounter::new()),
            Some(Box::new(MemorySink::new())),
        ));
        let controller = Arc::new(CountingController(AtomicUsize::new(0)));
        observer.set_controller(controller.clone());
        (observer, controller)
    }

    fn stats(agent: &str, msgs_in: u64, msgs_out: u64) -> StatsUpdate {
        StatsUpdate {
            agent: agent.to_owned(),
            t: 0.0,
            perf: -1.0,
            n_os: 1,
            msgs_in,
            msgs_out,
            msg_sent: msgs_out > 0,
        }
    }

    fn candidate(addr: &str, value: f64) -> Arc<Candidate> {
        let objective = Objective::new(array![1.0], array![1.0]);
        let sysconf = SystemConfig::seed(addr, &array![value], ScheduleId(0));
        Candidate::from_sysconf(addr, &sysconf, &objective)
    }

    #[tokio::test]
    async fn termination_is_reported_once() {
        let (observer, controller) = observer(2);
        observer.register_unit_agent("local/0000", "a");
        observer.register_unit_agent("local/0001", "b");
        observer
            .start_observation(vec![], Utc::now(), array![1.0], array![1.0])
            .await
            .unwrap();

        observer.update_stats(stats("a", 0, 1)).await.unwrap();
        assert_eq!(controller.0.load(Ordering::SeqCst), 0);
        observer.update_stats(stats("b", 1, 0)).await.unwrap();
        assert_eq!(controller.0.load(Ordering::SeqCst), 1);
        // A later balanced report does not re-notify.
        observer.update_stats(stats("b", 1, 0)).await.unwrap();
        assert_eq!(controller.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn early_stop_merges_the_partial_candidates() {
        let (observer, _controller) = observer(2);
        observer.register_unit_agent("local/0000", "a");
        observer.register_unit_agent("local/0001", "b");
        observer
            .start_observation(vec![], Utc::now(), array![1.0], array![1.0])
            .await
            .unwrap();

        observer
            .update_final_cand(candidate("local/0000", 1.0))
            .await
            .unwrap();
        observer
            .update_final_cand(candidate("local/0001", 0.0))
            .await
            .unwrap();

        let solution = observer.pass_solution().await.unwrap();
        assert_eq!(solution.agent(), "controller");
        assert_eq!(solution.len(), 2);
    }

    #[tokio::test]
    async fn detector_resets_between_sessions() {
        let (observer, controller) = observer(1);
        observer.register_unit_agent("local/0000", "a");
        observer
            .start_observation(vec![], Utc::now(), array![1.0], array![1.0])
            .await
            .unwrap();
        observer.update_stats(stats("a", 0, 0)).await.unwrap();
        assert_eq!(controller.0.load(Ordering::SeqCst), 1);

        observer
            .start_observation(vec![], Utc::now(), array![1.0], array![1.0])
            .await
            .unwrap();
        observer.update_stats(stats("a", 0, 0)).await.unwrap();
        assert_eq!(controller.0.load(Ordering::SeqCst), 2);
    }
}
