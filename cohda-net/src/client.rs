//! Client side of the wire: RPC calls and remote proxies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cohda_core::{Candidate, CohdaError, Result, ScheduleId};
use cohda_engine::{AgentLink, Connector, Gossip, ObserverApi, StatsUpdate, UnitAgentApi};
use ndarray::Array1;
use tokio::io::BufStream;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::frame::{read_frame, write_frame};
use crate::protocol::{parse_addr, Notification, RpcCall, RpcResult, WireFrame};

/// Connection to one remote host. Calls are correlated by request id and
/// serialized over the single stream.
pub struct RpcClient {
    peer: String,
    stream: Mutex<BufStream<TcpStream>>,
    next_id: AtomicU64,
}

impl RpcClient {
    pub async fn connect(socket: &str) -> Result<Self> {
        info!(peer = socket, "connecting");
        let stream = TcpStream::connect(socket)
            .await
            .map_err(|err| CohdaError::Transport(format!("connect {socket}: {err}")))?;
        Ok(Self {
            peer: socket.to_owned(),
            stream: Mutex::new(BufStream::new(stream)),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Issue one call and wait for its response.
    pub async fn call(&self, call: RpcCall) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut stream = self.stream.lock().await;
        debug!(peer = %self.peer, id, "sending request");
        write_frame(&mut *stream, &WireFrame::Request { id, call })
            .await
            .map_err(|err| CohdaError::Transport(format!("{}: {err}", self.peer)))?;

        loop {
            let frame = read_frame(&mut *stream)
                .await
                .map_err(|err| CohdaError::Transport(format!("{}: {err}", self.peer)))?
                .ok_or_else(|| {
                    CohdaError::Transport(format!("{} closed the connection", self.peer))
                })?;
            match frame {
                WireFrame::Response { id: got, result } if got == id => {
                    return match result {
                        RpcResult::Ok => Ok(()),
                        RpcResult::Err(message) => Err(CohdaError::Transport(format!(
                            "{}: {message}",
                            self.peer
                        ))),
                    };
                }
                other => warn!(peer = %self.peer, ?other, "ignoring unexpected frame"),
            }
        }
    }

    /// Send a notification without waiting for anything.
    pub async fn notify(&self, note: Notification) -> Result<()> {
        let mut stream = self.stream.lock().await;
        write_frame(&mut *stream, &WireFrame::Notify { note })
            .await
            .map_err(|err| CohdaError::Transport(format!("{}: {err}", self.peer)))
    }
}

/// Proxy for a unit agent hosted by another process. Implements the same
/// driving interface as a local agent.
pub struct RemoteAgent {
    name: String,
    addr: String,
    client: RpcClient,
}

impl RemoteAgent {
    /// Dial the host part of `addr` (`host:port/name`).
    pub async fn connect(addr: &str, name: &str) -> Result<Self> {
        let (socket, _) = parse_addr(addr)?;
        let client = RpcClient::connect(socket).await?;
        Ok(Self {
            name: name.to_owned(),
            addr: addr.to_owned(),
            client,
        })
    }
}

#[async_trait]
impl UnitAgentApi for RemoteAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn addr(&self) -> &str {
        &self.addr
    }

    async fn new_negotiation(&self) -> Result<()> {
        self.client
            .call(RpcCall::NewNegotiation {
                agent: self.name.clone(),
            })
            .await
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
        self.client
            .call(RpcCall::StoreTopology {
                agent: self.name.clone(),
                neighbors,
                target: target.to_vec(),
                weights: weights.to_vec(),
                resolution,
                intervals,
                start,
            })
            .await
    }

    async fn init_negotiation(&self) -> Result<()> {
        self.client
            .call(RpcCall::InitNegotiation {
                agent: self.name.clone(),
            })
            .await
    }

    async fn stop_negotiation(&self) -> Result<()> {
        self.client
            .call(RpcCall::StopNegotiation {
                agent: self.name.clone(),
            })
            .await
    }

    async fn set_schedule(&self, sid: ScheduleId) -> Result<()> {
        self.client
            .call(RpcCall::SetSchedule {
                agent: self.name.clone(),
                sid,
            })
            .await
    }
}

/// Observer proxy for unit-agent processes: statistics go out as
/// notifications, final candidates as confirmed calls. The observation
/// lifecycle itself stays with the controller-side process.
pub struct RemoteObserver {
    client: RpcClient,
}

impl RemoteObserver {
    pub async fn connect(socket: &str) -> Result<Self> {
        Ok(Self {
            client: RpcClient::connect(socket).await?,
        })
    }
}

#[async_trait]
impl ObserverApi for RemoteObserver {
    async fn start_observation(
        &self,
        _edges: Vec<(String, String)>,
        _start: DateTime<Utc>,
        _target: Array1<f64>,
        _weights: Array1<f64>,
    ) -> Result<()> {
        Err(CohdaError::Transport(
            "observation is driven from the controller process".to_owned(),
        ))
    }

    async fn update_stats(&self, stats: StatsUpdate) -> Result<()> {
        self.client.call(RpcCall::UpdateStats { stats }).await
    }

    async fn update_final_cand(&self, candidate: Arc<Candidate>) -> Result<()> {
        self.client
            .call(RpcCall::UpdateFinalCand {
                candidate: candidate.as_ref().clone(),
            })
            .await
    }

    async fn pass_solution(&self) -> Result<Arc<Candidate>> {
        Err(CohdaError::Transport(
            "the solution lives in the controller process".to_owned(),
        ))
    }
}

/// Gossip link to an agent behind a host: messages are queued and shipped
/// by a writer task, so sending never suspends.
struct RemoteLink {
    addr: String,
    to: String,
    outbox: mpsc::UnboundedSender<Notification>,
}

impl AgentLink for RemoteLink {
    fn addr(&self) -> &str {
        &self.addr
    }

    fn send(&self, msg: Gossip) -> Result<()> {
        let note = Notification::Gossip {
            to: self.to.clone(),
            sysconf: msg.sysconf.as_ref().clone(),
            candidate: msg.candidate.as_ref().clone(),
        };
        self.outbox
            .send(note)
            .map_err(|_| CohdaError::Transport(format!("link to {} closed", self.addr)))
    }
}

/// Resolves `host:port/name` addresses to gossip links, keeping one
/// connection and writer task per peer host.
#[derive(Default)]
pub struct NetConnector {
    outboxes: Mutex<HashMap<String, mpsc::UnboundedSender<Notification>>>,
}

impl NetConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Connector for NetConnector {
    async fn connect(&self, addr: &str) -> Result<Box<dyn AgentLink>> {
        let (socket, name) = parse_addr(addr)?;
        let mut outboxes = self.outboxes.lock().await;
        let outbox = match outboxes.get(socket) {
            Some(outbox) if !outbox.is_closed() => outbox.clone(),
            _ => {
                let client = RpcClient::connect(socket).await?;
                let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
                tokio::spawn(async move {
                    while let Some(note) = rx.recv().await {
                        if let Err(err) = client.notify(note).await {
                            warn!(peer = client.peer(), %err, "dropping gossip");
                        }
                    }
                });
                outboxes.insert(socket.to_owned(), tx.clone());
                tx
            }
        };
        Ok(Box::new(RemoteLink {
            addr: addr.to_owned(),
            to: name.to_owned(),
            outbox,
        }))
    }
}
