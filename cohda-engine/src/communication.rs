//! Messaging between unit agents and coordination primitives.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cohda_core::{Candidate, CohdaError, Result, SystemConfig};
use parking_lot::Mutex;
use tokio::sync::watch;

/// One gossip exchange: the sender's current view of the system and its
/// current proposal.
#[derive(Debug, Clone)]
pub struct Gossip {
    pub sysconf: Arc<SystemConfig>,
    pub candidate: Arc<Candidate>,
}

/// Mailbox a planner drains once per tick.
///
/// Appending never suspends. Draining swaps the whole buffer out, so
/// messages arriving while a batch is being processed wait for the next
/// tick.
#[derive(Default)]
pub struct Inbox {
    queue: Mutex<Vec<Gossip>>,
}

impl Inbox {
    pub fn push(&self, msg: Gossip) {
        self.queue.lock().push(msg);
    }

    pub fn drain(&self) -> Vec<Gossip> {
        std::mem::take(&mut *self.queue.lock())
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }
}

/// Reliable FIFO channel to one neighbor. `send` only enqueues and returns
/// immediately; a failure means the neighbor is gone and the caller should
/// carry on without it.
pub trait AgentLink: Send + Sync {
    /// Address of the agent behind this link.
    fn addr(&self) -> &str;

    fn send(&self, msg: Gossip) -> Result<()>;
}

/// Resolves agent addresses to live links.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, addr: &str) -> Result<Box<dyn AgentLink>>;
}

/// Link to an agent in the same process: a shared handle on its inbox.
pub struct LocalLink {
    addr: String,
    inbox: Arc<Inbox>,
}

impl AgentLink for LocalLink {
    fn addr(&self) -> &str {
        &self.addr
    }

    fn send(&self, msg: Gossip) -> Result<()> {
        self.inbox.push(msg);
        Ok(())
    }
}

/// Address book for a single-process cluster: every agent registers its
/// inbox here and neighbors connect by address.
#[derive(Default)]
pub struct LocalRegistry {
    inboxes: Mutex<HashMap<String, Arc<Inbox>>>,
}

impl LocalRegistry {
    pub fn register(&self, addr: &str, inbox: Arc<Inbox>) {
        self.inboxes.lock().insert(addr.to_owned(), inbox);
    }
}

#[async_trait]
impl Connector for LocalRegistry {
    async fn connect(&self, addr: &str) -> Result<Box<dyn AgentLink>> {
        let inbox = self
            .inboxes
            .lock()
            .get(addr)
            .cloned()
            .ok_or_else(|| CohdaError::Transport(format!("unknown agent address {addr}")))?;
        Ok(Box::new(LocalLink {
            addr: addr.to_owned(),
            inbox,
        }))
    }
}

/// One-shot readiness flag that any number of tasks can await.
#[derive(Clone)]
pub struct Signal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Signal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Mark the signal as set. Idempotent.
    pub fn set(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_set(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the signal is set; returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohda_core::{Objective, ScheduleId};
    use ndarray::array;

    fn gossip() -> Gossip {
        let objective = Objective::new(array![1.0], array![1.0]);
        let sysconf = SystemConfig::seed("a", &array![1.0], ScheduleId(0));
        let candidate = Candidate::from_sysconf("a", &sysconf, &objective);
        Gossip { sysconf, candidate }
    }

    #[test]
    fn drain_swaps_the_buffer() {
        let inbox = Inbox::default();
        inbox.push(gossip());
        inbox.push(gossip());
        let batch = inbox.drain();
        assert_eq!(batch.len(), 2);
        assert!(inbox.drain().is_empty());
    }

    #[tokio::test]
    async fn local_registry_resolves_registered_agents() {
        let registry = LocalRegistry::default();
        let inbox = Arc::new(Inbox::default());
        registry.register("local/0000", inbox.clone());

        let link = registry.connect("local/0000").await.unwrap();
        link.send(gossip()).unwrap();
        assert_eq!(inbox.drain().len(), 1);

        assert!(registry.connect("local/9999").await.is_err());
    }

    #[tokio::test]
    async fn signal_wakes_current_and_future_waiters() {
        let signal = Signal::new();
        assert!(!signal.is_set());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        signal.set();
        waiter.await.unwrap();
        assert!(signal.is_set());
        // A late waiter returns immediately.
        signal.wait().await;
    }
}
