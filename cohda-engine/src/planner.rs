//! The negotiation planner: perceive, decide, act.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use cohda_core::{Candidate, Objective, PossibleSchedules, SystemConfig};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::communication::{AgentLink, Gossip, Inbox};
use crate::observer::{ObserverApi, StatsUpdate};

/// Lifecycle of a planner between negotiations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerState {
    Idle,
    Armed,
    Running,
    Stopping,
}

/// Everything a planner knows during one negotiation. Exclusively owned;
/// created when the topology is stored and dropped when the negotiation
/// stops.
pub(crate) struct WorkingMemory {
    pub neighbors: Vec<Box<dyn AgentLink>>,
    pub start: DateTime<Utc>,
    pub resolution: u32,
    pub intervals: usize,
    pub objective: Objective,
    pub possible_schedules: PossibleSchedules,
    pub sysconf: Arc<SystemConfig>,
    pub candidate: Arc<Candidate>,
    pub msgs_in: u64,
    pub msgs_out: u64,
    pub armed_at: Instant,
}

/// Per-agent planning instance driving the gossip protocol.
///
/// The planner identifies itself by the agent's address (the key used in
/// the shared structures) and reports statistics under the agent's display
/// name.
pub(crate) struct Planner {
    shared: Arc<PlannerShared>,
}

struct PlannerShared {
    addr: String,
    name: String,
    check_inbox_interval: Duration,
    observer: Arc<dyn ObserverApi>,
    inbox: Arc<Inbox>,
    state: Mutex<PlannerState>,
    stop: AtomicBool,
    wm: Mutex<Option<WorkingMemory>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Planner {
    pub fn new(
        addr: String,
        name: String,
        check_inbox_interval: Duration,
        observer: Arc<dyn ObserverApi>,
    ) -> Self {
        Self {
            shared: Arc::new(PlannerShared {
                addr,
                name,
                check_inbox_interval,
                observer,
                inbox: Arc::new(Inbox::default()),
                state: Mutex::new(PlannerState::Idle),
                stop: AtomicBool::new(false),
                wm: Mutex::new(None),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn inbox(&self) -> Arc<Inbox> {
        Arc::clone(&self.shared.inbox)
    }

    pub fn state(&self) -> PlannerState {
        *self.shared.state.lock()
    }

    /// Receiver-side hook: append a gossip message for the next tick.
    /// Never suspends.
    pub fn receive(&self, msg: Gossip) {
        self.shared.inbox.push(msg);
    }

    /// Install the working memory for a new negotiation and spawn the
    /// inbox-processing task.
    pub fn arm(&self, wm: WorkingMemory) {
        let shared = &self.shared;
        debug_assert_eq!(*shared.state.lock(), PlannerState::Idle);
        debug!(
            agent = %shared.name,
            start = %wm.start,
            resolution = wm.resolution,
            intervals = wm.intervals,
            neighbors = wm.neighbors.len(),
            "negotiation armed"
        );

        shared.stop.store(false, Ordering::SeqCst);
        shared.inbox.clear();
        *shared.wm.lock() = Some(wm);
        *shared.state.lock() = PlannerState::Armed;

        let task = tokio::spawn(process_inbox(Arc::clone(shared)));
        *shared.task.lock() = Some(task);
    }

    /// Kick off the negotiation: run one local decision pass over the seed
    /// state and broadcast the result to every neighbor.
    pub async fn init_negotiation(&self) {
        let shared = &self.shared;
        let stats = {
            let mut wm = shared.wm.lock();
            let Some(wm) = wm.as_mut() else { return };
            let (sysconf, candidate) = decide(
                &shared.addr,
                Arc::clone(&wm.sysconf),
                Arc::clone(&wm.candidate),
                &wm.possible_schedules,
                &wm.objective,
            );
            wm.sysconf = sysconf;
            wm.candidate = candidate;
            wm.msgs_out += wm.neighbors.len() as u64;
            *shared.state.lock() = PlannerState::Running;
            stats_of(shared, wm, true)
        };
        report(shared, stats).await;
        broadcast(shared);
    }

    /// Stop the negotiation: wind down the inbox task, hand the final
    /// candidate to the observer and clear the working memory.
    pub async fn stop_negotiation(&self) -> cohda_core::Result<()> {
        let shared = &self.shared;
        *shared.state.lock() = PlannerState::Stopping;
        shared.stop.store(true, Ordering::SeqCst);

        let task = shared.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!(agent = %shared.name, %err, "inbox task ended abnormally");
                }
            }
        }

        let candidate = {
            let mut wm = shared.wm.lock();
            shared.inbox.clear();
            wm.take().map(|wm| wm.candidate)
        };
        *shared.state.lock() = PlannerState::Idle;

        if let Some(candidate) = candidate {
            self.shared.observer.update_final_cand(candidate).await?;
        }
        debug!(agent = %shared.name, "finished negotiation");
        Ok(())
    }

    /// Hard abort: kill the inbox task without draining. Idempotent.
    pub fn abort(&self) {
        if let Some(task) = self.shared.task.lock().as_ref() {
            task.abort();
        }
    }
}

/// Background loop: drain the inbox, merge, decide, act, report.
async fn process_inbox(shared: Arc<PlannerShared>) {
    loop {
        tokio::time::sleep(shared.check_inbox_interval).await;
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }

        let batch = shared.inbox.drain();
        if batch.is_empty() {
            continue;
        }
        debug!(agent = %shared.name, msgs = batch.len(), "processing inbox");

        let stats = {
            let mut wm = shared.wm.lock();
            let Some(wm) = wm.as_mut() else { continue };

            // Perceive: fold the batch into local copies; the working
            // memory is only written once the outcome is known.
            let mut sysconf = Arc::clone(&wm.sysconf);
            let mut candidate = Arc::clone(&wm.candidate);
            for msg in &batch {
                sysconf = SystemConfig::merge(&sysconf, &msg.sysconf);
                candidate = Candidate::merge(&candidate, &msg.candidate, &shared.addr, &wm.objective);
                wm.msgs_in += 1;
            }

            let state_changed = !Arc::ptr_eq(&sysconf, &wm.sysconf)
                || !Arc::ptr_eq(&candidate, &wm.candidate);

            if state_changed {
                let mut state = shared.state.lock();
                if *state == PlannerState::Armed {
                    *state = PlannerState::Running;
                }
                drop(state);

                let (sysconf, candidate) = decide(
                    &shared.addr,
                    sysconf,
                    candidate,
                    &wm.possible_schedules,
                    &wm.objective,
                );
                wm.sysconf = sysconf;
                wm.candidate = candidate;
                // Outgoing messages are counted before they hit the wire so
                // the observer never sees receipts outrun sends.
                wm.msgs_out += wm.neighbors.len() as u64;
            }

            stats_of(&shared, wm, state_changed)
        };

        let state_changed = stats.msg_sent;
        report(&shared, stats).await;
        if state_changed {
            broadcast(&shared);
        }
    }
}

/// Act: send the current view and proposal to every neighbor. Unreachable
/// neighbors are skipped; their counters were already accounted for.
fn broadcast(shared: &PlannerShared) {
    let wm = shared.wm.lock();
    let Some(wm) = wm.as_ref() else { return };
    let msg = Gossip {
        sysconf: Arc::clone(&wm.sysconf),
        candidate: Arc::clone(&wm.candidate),
    };
    for link in &wm.neighbors {
        debug!(agent = %shared.name, to = link.addr(), "sending gossip");
        if let Err(err) = link.send(msg.clone()) {
            warn!(agent = %shared.name, to = link.addr(), %err, "neighbor unreachable");
        }
    }
}

fn stats_of(shared: &PlannerShared, wm: &WorkingMemory, msg_sent: bool) -> StatsUpdate {
    StatsUpdate {
        agent: shared.name.clone(),
        t: wm.armed_at.elapsed().as_secs_f64(),
        perf: wm.candidate.perf(),
        n_os: wm.candidate.len(),
        msgs_in: wm.msgs_in,
        msgs_out: wm.msgs_out,
        msg_sent,
    }
}

async fn report(shared: &PlannerShared, stats: StatsUpdate) {
    if let Err(err) = shared.observer.update_stats(stats).await {
        warn!(agent = %shared.name, %err, "observer unreachable");
    }
}

/// Decide: scan the private catalogue for a schedule whose hypothetical
/// adoption would outperform the current candidate.
///
/// The scan uses strict improvement over the running best, so on exact
/// ties the first entry in catalogue order wins. The system configuration
/// is only touched (and its counter bumped) when the finally chosen
/// schedule id differs from the one it currently records for this agent.
fn decide(
    addr: &str,
    sysconf: Arc<SystemConfig>,
    candidate: Arc<Candidate>,
    possible_schedules: &PossibleSchedules,
    objective: &Objective,
) -> (Arc<SystemConfig>, Arc<Candidate>) {
    let current_sid = sysconf
        .data(addr)
        .expect("own row missing from system configuration")
        .sid;
    let own_row = candidate
        .data(addr)
        .expect("own row missing from candidate");
    let mut best_os = own_row.os.to_owned();
    let mut best_sid = own_row.sid;

    let mut best_perf = candidate.perf();
    let mut improvement = None;
    for entry in possible_schedules {
        let hypothetical = sysconf.update(addr, &entry.os, entry.sid);
        let perf = objective.perf(hypothetical.cs());
        if perf > best_perf {
            best_perf = perf;
            improvement = Some(entry);
        }
    }

    let mut candidate = candidate;
    let mut sysconf = sysconf;
    if let Some(entry) = improvement {
        let hypothetical = sysconf.update(addr, &entry.os, entry.sid);
        let proposed = Candidate::from_sysconf(addr, &hypothetical, objective);
        if proposed.perf() > candidate.perf() {
            candidate = proposed;
            best_os = entry.os.clone();
            best_sid = entry.sid;
        }
    }

    if best_sid != current_sid {
        sysconf = sysconf.update(addr, &best_os, best_sid);
    }

    (sysconf, candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohda_core::{PossibleSchedule, ScheduleId};
    use ndarray::array;

    fn catalogue(curves: &[Vec<f64>]) -> PossibleSchedules {
        curves
            .iter()
            .enumerate()
            .map(|(i, values)| {
                PossibleSchedule::new(
                    ScheduleId(i as u32),
                    0.0,
                    ndarray::Array1::from(values.clone()),
                )
            })
            .collect()
    }

    #[test]
    fn decide_switches_to_an_improving_schedule() {
        let objective = Objective::new(array![1.0, 1.0], array![1.0, 1.0]);
        let schedules = catalogue(&[vec![0.0, 0.0], vec![1.0, 1.0]]);
        let sysconf = SystemConfig::seed("a", &schedules[0].os, schedules[0].sid);
        let candidate = Candidate::from_sysconf("a", &sysconf, &objective);

        let (sysconf, candidate) = decide("a", sysconf, candidate, &schedules, &objective);
        assert_eq!(candidate.sid_for("a"), Some(ScheduleId(1)));
        assert_eq!(candidate.perf(), 0.0);
        assert_eq!(sysconf.data("a").unwrap().sid, ScheduleId(1));
        assert_eq!(sysconf.data("a").unwrap().count, 1);
    }

    #[test]
    fn decide_keeps_the_counter_when_nothing_improves() {
        let objective = Objective::new(array![1.0, 1.0], array![1.0, 1.0]);
        let schedules = catalogue(&[vec![1.0, 1.0], vec![0.0, 0.0]]);
        let sysconf = SystemConfig::seed("a", &schedules[0].os, schedules[0].sid);
        let candidate = Candidate::from_sysconf("a", &sysconf, &objective);

        let (sysconf_after, candidate_after) = decide(
            "a",
            Arc::clone(&sysconf),
            Arc::clone(&candidate),
            &schedules,
            &objective,
        );
        assert!(Arc::ptr_eq(&sysconf_after, &sysconf));
        assert!(Arc::ptr_eq(&candidate_after, &candidate));
        assert_eq!(sysconf_after.data("a").unwrap().count, 0);
    }

    #[test]
    fn decide_breaks_exact_ties_by_catalogue_order() {
        let objective = Objective::new(array![1.0], array![1.0]);
        // Entries 1 and 2 improve equally; the scan must keep the first.
        let schedules = catalogue(&[vec![0.0], vec![1.0], vec![1.0]]);
        let sysconf = SystemConfig::seed("a", &schedules[0].os, schedules[0].sid);
        let candidate = Candidate::from_sysconf("a", &sysconf, &objective);

        let (_, candidate) = decide("a", sysconf, candidate, &schedules, &objective);
        assert_eq!(candidate.sid_for("a"), Some(ScheduleId(1)));
    }
}
