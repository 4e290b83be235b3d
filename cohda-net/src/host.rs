//! Host side of the wire: serves agent calls, gossip and statistics.

use std::collections::HashMap;
use std::sync::Arc;

use cohda_core::{CohdaError, Result};
use cohda_engine::{Controller, Observer, ObserverApi, UnitAgent, UnitAgentApi};
use ndarray::Array1;
use parking_lot::Mutex;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::client::{RemoteAgent, RpcClient};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{Notification, RpcCall, RpcResult, WireFrame};

/// Serves one process's share of a cohda cluster over TCP.
///
/// A unit-agent process hosts its agents and routes gossip to their
/// inboxes; the controller process additionally hosts the controller and
/// observer so remote agents can register and report.
pub struct Host {
    agents: Mutex<HashMap<String, Arc<UnitAgent>>>,
    controller: Option<Arc<Controller>>,
    observer: Option<Arc<Observer>>,
}

impl Host {
    /// A host for a unit-agent process.
    pub fn for_agents(agents: impl IntoIterator<Item = Arc<UnitAgent>>) -> Arc<Self> {
        let agents = agents
            .into_iter()
            .map(|agent| (agent.name().to_owned(), agent))
            .collect();
        Arc::new(Self {
            agents: Mutex::new(agents),
            controller: None,
            observer: None,
        })
    }

    /// The controller-side host: accepts registrations, statistics and
    /// final candidates.
    pub fn for_controller(controller: Arc<Controller>, observer: Arc<Observer>) -> Arc<Self> {
        Arc::new(Self {
            agents: Mutex::new(HashMap::new()),
            controller: Some(controller),
            observer: Some(observer),
        })
    }

    pub fn add_agent(&self, agent: Arc<UnitAgent>) {
        self.agents.lock().insert(agent.name().to_owned(), agent);
    }

    /// Announce every hosted agent to the controller process at
    /// `controller_socket`.
    pub async fn register_agents(&self, controller_socket: &str) -> Result<()> {
        let agents: Vec<Arc<UnitAgent>> = self.agents.lock().values().cloned().collect();
        let client = RpcClient::connect(controller_socket).await?;
        for agent in agents {
            client
                .call(RpcCall::RegisterUnitAgent {
                    addr: agent.addr().to_owned(),
                    name: agent.name().to_owned(),
                })
                .await?;
        }
        Ok(())
    }

    /// Accept connections until the listener is dropped.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        info!(addr = ?listener.local_addr(), "host listening");
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "connection accepted");
                    let host = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = host.handle_connection(stream).await {
                            warn!(%peer, %err, "connection ended");
                        }
                    });
                }
                Err(err) => {
                    warn!(%err, "accept failed");
                    break;
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> std::io::Result<()> {
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        while let Some(frame) = read_frame(&mut reader).await? {
            match frame {
                WireFrame::Request { id, call } => {
                    let result = match self.dispatch(call).await {
                        Ok(()) => RpcResult::Ok,
                        Err(err) => RpcResult::Err(err.to_string()),
                    };
                    write_frame(&mut write, &WireFrame::Response { id, result }).await?;
                }
                WireFrame::Notify { note } => self.dispatch_note(note),
                WireFrame::Response { id, .. } => {
                    warn!(id, "stray response frame");
                }
            }
        }
        Ok(())
    }

    fn agent(&self, name: &str) -> Result<Arc<UnitAgent>> {
        self.agents
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| CohdaError::Transport(format!("no agent {name} hosted here")))
    }

    fn observer(&self) -> Result<&Arc<Observer>> {
        self.observer
            .as_ref()
            .ok_or_else(|| CohdaError::Transport("no observer hosted here".to_owned()))
    }

    async fn dispatch(&self, call: RpcCall) -> Result<()> {
        match call {
            RpcCall::RegisterUnitAgent { addr, name } => {
                let controller = self.controller.as_ref().ok_or_else(|| {
                    CohdaError::Transport("no controller hosted here".to_owned())
                })?;
                let proxy = RemoteAgent::connect(&addr, &name).await?;
                controller.register_unit_agent(Arc::new(proxy), &addr, &name);
                self.observer()?.register_unit_agent(&addr, &name);
                Ok(())
            }
            RpcCall::NewNegotiation { agent } => self.agent(&agent)?.new_negotiation().await,
            RpcCall::StoreTopology {
                agent,
                neighbors,
                target,
                weights,
                resolution,
                intervals,
                start,
            } => {
                self.agent(&agent)?
                    .store_topology(
                        neighbors,
                        Array1::from(target),
                        Array1::from(weights),
                        resolution,
                        intervals,
                        start,
                    )
                    .await
            }
            RpcCall::InitNegotiation { agent } => self.agent(&agent)?.init_negotiation().await,
            RpcCall::StopNegotiation { agent } => self.agent(&agent)?.stop_negotiation().await,
            RpcCall::SetSchedule { agent, sid } => self.agent(&agent)?.set_schedule(sid).await,
            RpcCall::UpdateStats { stats } => self.observer()?.update_stats(stats).await,
            RpcCall::UpdateFinalCand { candidate } => {
                self.observer()?
                    .update_final_cand(Arc::new(candidate))
                    .await
            }
        }
    }

    fn dispatch_note(&self, note: Notification) {
        match note {
            Notification::Gossip {
                to,
                sysconf,
                candidate,
            } => match self.agent(&to) {
                Ok(agent) => agent.update(Arc::new(sysconf), Arc::new(candidate)),
                Err(err) => warn!(%err, "gossip for unknown agent"),
            },
        }
    }
}
