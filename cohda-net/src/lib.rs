//! Process boundary for cohda clusters.
//!
//! Unit agents may be spread over several processes to parallelize the
//! CPU-bound schedule scans. This crate carries everything across that
//! boundary: newline-delimited JSON frames over TCP with request-id
//! correlation for calls and fire-and-forget notifications for gossip.
//!
//! A unit-agent process wraps its agents in a [`Host`], connects its
//! neighbors through a [`NetConnector`] and reports through a
//! [`RemoteObserver`]; the controller process hosts the controller and
//! observer and drives remote agents through [`RemoteAgent`] proxies, the
//! same interface local agents implement.

pub mod client;
pub mod frame;
pub mod host;
pub mod protocol;

pub use client::{NetConnector, RemoteAgent, RemoteObserver, RpcClient};
pub use host::Host;
pub use protocol::{parse_addr, Notification, RpcCall, RpcResult, WireFrame};
