//! Result sinks: where a negotiation's statistics and outcome end up.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cohda_core::{Candidate, CohdaError, Objective, Result, ScheduleId};
use serde::Serialize;
use tracing::info;

/// One per-cycle statistics row reported by a unit agent.
#[derive(Debug, Clone, Serialize)]
pub struct StatsRow {
    pub t: f64,
    pub agent: String,
    pub perf: f64,
    /// Whether the agent's candidate covered every registered agent at the
    /// time of the report.
    pub complete: bool,
    pub msgs_out: u64,
    pub msgs_in: u64,
    pub msg_sent: bool,
}

/// Per-agent entry of a flushed solution.
#[derive(Debug, Clone, Serialize)]
pub struct AgentDetail {
    pub name: String,
    pub address: String,
    pub index: usize,
    pub sid: ScheduleId,
}

/// Everything collected for one negotiation session.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SessionRecord {
    pub key: String,
    pub topology: Vec<(String, String)>,
    pub target: Vec<f64>,
    pub weights: Vec<f64>,
    pub stats: Vec<StatsRow>,
    pub solution: Option<Candidate>,
    pub agents: Vec<AgentDetail>,
}

/// Hierarchical store for negotiation results, one group per session keyed
/// by the session's start date.
pub trait ResultSink: Send {
    /// Begin a new session group. `agents` lists `(address, name)` pairs
    /// of every registered unit agent.
    fn open_session(&mut self, start: DateTime<Utc>, agents: &[(String, String)]) -> Result<()>;

    /// Persist the session topology as a bidirectional edge list.
    fn store_topology(&mut self, edges: &[(String, String)]) -> Result<()>;

    /// Append one statistics row. Buffered until [`ResultSink::flush`].
    fn append(&mut self, row: StatsRow);

    /// Write the finished session: target and weights, the solution and
    /// the per-agent assignment derived from it.
    fn flush(&mut self, objective: &Objective, solution: &Arc<Candidate>) -> Result<()>;
}

fn agent_details(
    solution: &Candidate,
    names: &HashMap<String, String>,
) -> Vec<AgentDetail> {
    let mut details: Vec<AgentDetail> = solution
        .idx()
        .iter()
        .map(|(addr, &index)| AgentDetail {
            name: names.get(addr).cloned().unwrap_or_else(|| addr.clone()),
            address: addr.clone(),
            index,
            sid: solution.sids()[index],
        })
        .collect();
    details.sort_by_key(|d| d.index);
    details
}

fn session_key(start: DateTime<Utc>) -> String {
    start.format("%Y%m%d").to_string()
}

/// Keeps every session in memory; the inspection sink for tests and
/// embedded use.
#[derive(Default)]
pub struct MemorySink {
    names: HashMap<String, String>,
    sessions: Vec<SessionRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> &[SessionRecord] {
        &self.sessions
    }

    fn current(&mut self) -> Option<&mut SessionRecord> {
        self.sessions.last_mut()
    }
}

impl ResultSink for MemorySink {
    fn open_session(&mut self, start: DateTime<Utc>, agents: &[(String, String)]) -> Result<()> {
        self.names = agents.iter().cloned().collect();
        self.sessions.push(SessionRecord {
            key: session_key(start),
            ..SessionRecord::default()
        });
        Ok(())
    }

    fn store_topology(&mut self, edges: &[(String, String)]) -> Result<()> {
        if let Some(session) = self.current() {
            session.topology = edges.to_vec();
        }
        Ok(())
    }

    fn append(&mut self, row: StatsRow) {
        if let Some(session) = self.current() {
            session.stats.push(row);
        }
    }

    fn flush(&mut self, objective: &Objective, solution: &Arc<Candidate>) -> Result<()> {
        let names = self.names.clone();
        if let Some(session) = self.current() {
            session.target = objective.target().to_vec();
            session.weights = objective.weights().to_vec();
            session.agents = agent_details(solution, &names);
            session.solution = Some(solution.as_ref().clone());
        }
        Ok(())
    }
}

/// Writes one JSON document per session into a directory.
pub struct JsonSink {
    dir: PathBuf,
    names: HashMap<String, String>,
    session: SessionRecord,
}

impl JsonSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            names: HashMap::new(),
            session: SessionRecord::default(),
        }
    }
}

impl ResultSink for JsonSink {
    fn open_session(&mut self, start: DateTime<Utc>, agents: &[(String, String)]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        self.names = agents.iter().cloned().collect();
        self.session = SessionRecord {
            key: session_key(start),
            ..SessionRecord::default()
        };
        Ok(())
    }

    fn store_topology(&mut self, edges: &[(String, String)]) -> Result<()> {
        self.session.topology = edges.to_vec();
        Ok(())
    }

    fn append(&mut self, row: StatsRow) {
        self.session.stats.push(row);
    }

    fn flush(&mut self, objective: &Objective, solution: &Arc<Candidate>) -> Result<()> {
        if self.session.key.is_empty() {
            return Err(CohdaError::Config(
                "flush without an open session".to_owned(),
            ));
        }
        self.session.target = objective.target().to_vec();
        self.session.weights = objective.weights().to_vec();
        self.session.agents = agent_details(solution, &self.names);
        self.session.solution = Some(solution.as_ref().clone());

        let path = self.dir.join(format!("{}.json", self.session.key));
        let file = fs::File::create(&path)?;
        serde_json::to_writer_pretty(file, &self.session)?;
        info!(path = %path.display(), "session results written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohda_core::SystemConfig;
    use ndarray::array;

    fn solution() -> (Objective, Arc<Candidate>) {
        let objective = Objective::new(array![1.0], array![1.0]);
        let a = SystemConfig::seed("local/0000", &array![1.0], ScheduleId(1));
        let b = SystemConfig::seed("local/0001", &array![0.0], ScheduleId(0));
        let merged = SystemConfig::merge(&a, &b);
        (
            objective.clone(),
            Candidate::from_sysconf("local/0000", &merged, &objective),
        )
    }

    fn agents() -> Vec<(String, String)> {
        vec![
            ("local/0000".into(), "unit-0".into()),
            ("local/0001".into(), "unit-1".into()),
        ]
    }

    #[test]
    fn memory_sink_collects_a_full_session() {
        let (objective, solution) = solution();
        let mut sink = MemorySink::new();
        sink.open_session(Utc::now(), &agents()).unwrap();
        sink.store_topology(&[("unit-0".into(), "unit-1".into())])
            .unwrap();
        sink.append(StatsRow {
            t: 0.1,
            agent: "unit-0".into(),
            perf: -1.0,
            complete: false,
            msgs_out: 1,
            msgs_in: 0,
            msg_sent: true,
        });
        sink.flush(&objective, &solution).unwrap();

        let session = &sink.sessions()[0];
        assert_eq!(session.topology.len(), 1);
        assert_eq!(session.stats.len(), 1);
        assert_eq!(session.target, vec![1.0]);
        let details = &session.agents;
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].name, "unit-0");
        assert_eq!(details[0].sid, ScheduleId(1));
        assert_eq!(details[1].sid, ScheduleId(0));
    }

    #[test]
    fn json_sink_writes_one_file_per_session() {
        let dir = std::env::temp_dir().join(format!("cohda-sink-{}", std::process::id()));
        let (objective, solution) = solution();
        let mut sink = JsonSink::new(&dir);
        let start = "2017-07-05T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        sink.open_session(start, &agents()).unwrap();
        sink.flush(&objective, &solution).unwrap();

        let written = fs::read_to_string(dir.join("20170705.json")).unwrap();
        assert!(written.contains("unit-1"));
        fs::remove_dir_all(&dir).ok();
    }
}
