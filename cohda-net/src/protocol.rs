//! Wire protocol between cohda processes.
//!
//! Frames are newline-delimited JSON. Calls carry a request id and expect
//! a correlated response; notifications are fire-and-forget and carry the
//! gossip and statistics traffic of a live negotiation.

use chrono::{DateTime, Utc};
use cohda_core::{Candidate, ScheduleId, SystemConfig};
use cohda_engine::StatsUpdate;
use serde::{Deserialize, Serialize};

/// Everything that travels over a cohda connection.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireFrame {
    Request { id: u64, call: RpcCall },
    Response { id: u64, result: RpcResult },
    Notify { note: Notification },
}

/// Calls a host dispatches to its controller, observer or agents.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcCall {
    /// A unit-agent process announces one of its agents to the
    /// controller-side host.
    RegisterUnitAgent { addr: String, name: String },
    NewNegotiation {
        agent: String,
    },
    StoreTopology {
        agent: String,
        neighbors: Vec<String>,
        target: Vec<f64>,
        weights: Vec<f64>,
        resolution: u32,
        intervals: usize,
        start: DateTime<Utc>,
    },
    InitNegotiation {
        agent: String,
    },
    StopNegotiation {
        agent: String,
    },
    SetSchedule {
        agent: String,
        sid: ScheduleId,
    },
    /// A per-cycle statistics report for the observer-side host. Confirmed
    /// so that a reporting agent never outruns the observer's view.
    UpdateStats { stats: StatsUpdate },
    /// A unit agent hands its final candidate to the observer-side host.
    UpdateFinalCand { candidate: Candidate },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcResult {
    Ok,
    Err(String),
}

/// Fire-and-forget traffic.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Notification {
    /// One gossip exchange addressed to an agent hosted by the receiver.
    Gossip {
        to: String,
        sysconf: SystemConfig,
        candidate: Candidate,
    },
}

/// Split an agent address `host:port/name` into its socket and agent name.
pub fn parse_addr(addr: &str) -> cohda_core::Result<(&str, &str)> {
    addr.split_once('/').ok_or_else(|| {
        cohda_core::CohdaError::Transport(format!(
            "agent address {addr:?} is not of the form host:port/name"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_split_into_socket_and_name() {
        let (socket, name) = parse_addr("127.0.0.1:7711/ua0").unwrap();
        assert_eq!(socket, "127.0.0.1:7711");
        assert_eq!(name, "ua0");
        assert!(parse_addr("127.0.0.1:7711").is_err());
    }

    #[test]
    fn frames_survive_a_json_round_trip() {
        let frame = WireFrame::Request {
            id: 7,
            call: RpcCall::SetSchedule {
                agent: "ua0".to_owned(),
                sid: ScheduleId(3),
            },
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: WireFrame = serde_json::from_str(&json).unwrap();
        match back {
            WireFrame::Request {
                id: 7,
                call: RpcCall::SetSchedule { agent, sid },
            } => {
                assert_eq!(agent, "ua0");
                assert_eq!(sid, ScheduleId(3));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
