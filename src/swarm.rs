//! Peer-to-peer agent swarm.
//!
//! Every peer is a tokio task that owns its [`Agent`] and history. Peers
//! share nothing but channels: a bounded inbox per peer, outbound senders to
//! connected peers, and a broadcast channel of [`SwarmEvent`]s for
//! observers. A peer handles one inbox message at a time and, on each tick,
//! reflects on its history if it grew since the last reflection.

use std::collections::HashMap;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

use crate::agent::Agent;
use crate::config::SwarmConfig;
use crate::error::{ConclaveError, Result};

pub const REFLECTION_PROMPT: &str = "Summarize what you've accomplished so far in one sentence.";

const EVENT_CAPACITY: usize = 256;

#[derive(Debug)]
pub enum SwarmMessage {
    /// Work to perform; the result is shared with every connected peer.
    Task(String),
    /// Another peer's task result.
    Response { from: String, content: String },
    /// External nudge, handled like a task but not shared or recorded.
    Trigger(String),
    /// Ask for a copy of the peer's state.
    Inspect(oneshot::Sender<PeerSnapshot>),
    /// Stop after the current message; anything still queued is dropped.
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SwarmEvent {
    TaskCompleted {
        peer: String,
        task: String,
        result: String,
    },
    TaskFailed {
        peer: String,
        task: String,
        error: String,
    },
    TriggerHandled {
        peer: String,
        trigger: String,
        reply: String,
    },
    ResponseReceived {
        peer: String,
        from: String,
        content: String,
    },
    Reflection {
        peer: String,
        summary: String,
    },
    Stopped {
        peer: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeerSnapshot {
    pub id: String,
    pub history: Vec<String>,
    pub tasks_completed: usize,
    pub reflections: Vec<String>,
}

struct SwarmPeer {
    id: String,
    agent: Agent,
    inbox: mpsc::Receiver<SwarmMessage>,
    peers: Vec<(String, mpsc::Sender<SwarmMessage>)>,
    events: broadcast::Sender<SwarmEvent>,
    tick: Duration,
    history: Vec<String>,
    reflected_len: usize,
    reflections: Vec<String>,
    tasks_completed: usize,
}

impl SwarmPeer {
    async fn run(mut self) {
        info!(peers = self.peers.len(), "swarm peer started");
        let mut ticker = interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = self.inbox.recv() => match message {
                    Some(SwarmMessage::Shutdown) | None => break,
                    Some(message) => self.handle(message).await,
                },
                _ = ticker.tick() => self.reflect().await,
            }
        }

        info!(discarded = self.inbox.len(), "swarm peer stopped");
        self.emit(SwarmEvent::Stopped {
            peer: self.id.clone(),
        });
    }

    async fn handle(&mut self, message: SwarmMessage) {
        match message {
            SwarmMessage::Task(task) => match self.agent.prompt(task.as_str()).await {
                Ok(result) => {
                    debug!(task = %task, "task completed");
                    self.history.push(format!("Task: {task} | Result: {result}"));
                    self.tasks_completed += 1;
                    self.share(&result);
                    self.emit(SwarmEvent::TaskCompleted {
                        peer: self.id.clone(),
                        task,
                        result,
                    });
                }
                Err(err) => self.failed(task, err),
            },
            SwarmMessage::Response { from, content } => {
                debug!(from = %from, "received peer response");
                self.history.push(format!("From {from}: {content}"));
                self.emit(SwarmEvent::ResponseReceived {
                    peer: self.id.clone(),
                    from,
                    content,
                });
            }
            SwarmMessage::Trigger(trigger) => match self.agent.prompt(trigger.as_str()).await {
                Ok(reply) => self.emit(SwarmEvent::TriggerHandled {
                    peer: self.id.clone(),
                    trigger,
                    reply,
                }),
                Err(err) => self.failed(trigger, err),
            },
            SwarmMessage::Inspect(reply) => {
                let _ = reply.send(self.snapshot());
            }
            SwarmMessage::Shutdown => {}
        }
    }

    async fn reflect(&mut self) {
        if self.history.len() <= self.reflected_len {
            return;
        }
        let prompt = format!("{REFLECTION_PROMPT}\n\n{}", self.history.join("\n"));
        match self.agent.prompt(prompt).await {
            Ok(summary) => {
                info!(summary = %summary, "reflection");
                self.reflected_len = self.history.len();
                self.reflections.push(summary.clone());
                self.emit(SwarmEvent::Reflection {
                    peer: self.id.clone(),
                    summary,
                });
            }
            Err(err) => warn!(error = %err, "reflection failed; retrying next tick"),
        }
    }

    /// Never blocks: a full peer inbox drops the response.
    fn share(&self, content: &str) {
        for (peer, sender) in &self.peers {
            let message = SwarmMessage::Response {
                from: self.id.clone(),
                content: content.to_string(),
            };
            match sender.try_send(message) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(to = %peer, "peer inbox full; response dropped")
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(to = %peer, "peer stopped; response dropped")
                }
            }
        }
    }

    fn failed(&self, task: String, err: ConclaveError) {
        warn!(task = %task, error = %err, "swarm task failed");
        self.emit(SwarmEvent::TaskFailed {
            peer: self.id.clone(),
            task,
            error: err.to_string(),
        });
    }

    fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            id: self.id.clone(),
            history: self.history.clone(),
            tasks_completed: self.tasks_completed,
            reflections: self.reflections.clone(),
        }
    }

    fn emit(&self, event: SwarmEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

struct PendingPeer {
    agent: Agent,
    sender: mpsc::Sender<SwarmMessage>,
    inbox: mpsc::Receiver<SwarmMessage>,
    links: Vec<String>,
}

/// Collects peers and their connections before [`Swarm::start`] spawns them.
pub struct Swarm {
    config: SwarmConfig,
    order: Vec<String>,
    peers: HashMap<String, PendingPeer>,
    events: broadcast::Sender<SwarmEvent>,
}

impl Swarm {
    pub fn new(config: SwarmConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            order: Vec::new(),
            peers: HashMap::new(),
            events,
        }
    }

    pub fn add_agent(&mut self, id: impl Into<String>, agent: Agent) -> Result<()> {
        let id = id.into();
        if self.peers.contains_key(&id) {
            return Err(ConclaveError::DuplicatePeer(id));
        }
        let (sender, inbox) = mpsc::channel(self.config.inbox_capacity.max(1));
        self.order.push(id.clone());
        self.peers.insert(
            id,
            PendingPeer {
                agent,
                sender,
                inbox,
                links: Vec::new(),
            },
        );
        Ok(())
    }

    /// Let `a` and `b` receive each other's task results.
    pub fn connect(&mut self, a: &str, b: &str) -> Result<()> {
        for id in [a, b] {
            if !self.peers.contains_key(id) {
                return Err(ConclaveError::UnknownPeer(id.to_string()));
            }
        }
        if a == b {
            return Ok(());
        }
        self.link(a, b);
        self.link(b, a);
        Ok(())
    }

    pub fn connect_all(&mut self) {
        let ids = self.order.clone();
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                self.link(a, b);
                self.link(b, a);
            }
        }
    }

    fn link(&mut self, from: &str, to: &str) {
        if let Some(peer) = self.peers.get_mut(from) {
            if !peer.links.iter().any(|existing| existing == to) {
                peer.links.push(to.to_string());
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.events.subscribe()
    }

    /// Spawn one task per peer. Must be called inside a tokio runtime.
    pub fn start(mut self) -> SwarmHandle {
        let senders: HashMap<String, mpsc::Sender<SwarmMessage>> = self
            .peers
            .iter()
            .map(|(id, peer)| (id.clone(), peer.sender.clone()))
            .collect();
        let tick = self.config.tick_interval();

        let mut tasks = Vec::with_capacity(self.order.len());
        for id in &self.order {
            let Some(pending) = self.peers.remove(id) else {
                continue;
            };
            let peers = pending
                .links
                .iter()
                .filter_map(|to| senders.get(to).map(|tx| (to.clone(), tx.clone())))
                .collect();
            let peer = SwarmPeer {
                id: id.clone(),
                agent: pending.agent,
                inbox: pending.inbox,
                peers,
                events: self.events.clone(),
                tick,
                history: Vec::new(),
                reflected_len: 0,
                reflections: Vec::new(),
                tasks_completed: 0,
            };
            let span = tracing::info_span!("swarm.peer", peer = %id);
            tasks.push((id.clone(), tokio::spawn(peer.run().instrument(span))));
        }

        info!(peers = tasks.len(), tick_secs = tick.as_secs(), "swarm started");
        SwarmHandle {
            order: self.order,
            senders,
            tasks,
            events: self.events,
        }
    }
}

/// Entry point into a running swarm.
pub struct SwarmHandle {
    order: Vec<String>,
    senders: HashMap<String, mpsc::Sender<SwarmMessage>>,
    tasks: Vec<(String, JoinHandle<()>)>,
    events: broadcast::Sender<SwarmEvent>,
}

impl SwarmHandle {
    /// Peer ids in registration order.
    pub fn peers(&self) -> &[String] {
        &self.order
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.events.subscribe()
    }

    /// Queue a message, waiting for inbox capacity.
    pub async fn send(&self, peer: &str, message: SwarmMessage) -> Result<()> {
        let sender = self
            .senders
            .get(peer)
            .ok_or_else(|| ConclaveError::UnknownPeer(peer.to_string()))?;
        sender
            .send(message)
            .await
            .map_err(|_| ConclaveError::PeerUnavailable(peer.to_string()))
    }

    pub async fn task(&self, peer: &str, task: impl Into<String>) -> Result<()> {
        self.send(peer, SwarmMessage::Task(task.into())).await
    }

    pub async fn trigger(&self, peer: &str, trigger: impl Into<String>) -> Result<()> {
        self.send(peer, SwarmMessage::Trigger(trigger.into())).await
    }

    /// State of `peer` once it has handled everything queued before this request.
    pub async fn snapshot(&self, peer: &str) -> Result<PeerSnapshot> {
        let (reply, response) = oneshot::channel();
        self.send(peer, SwarmMessage::Inspect(reply)).await?;
        response
            .await
            .map_err(|_| ConclaveError::PeerUnavailable(peer.to_string()))
    }

    /// Ask every peer to stop and wait for all of them.
    pub async fn shutdown(self) -> Result<()> {
        for (id, sender) in &self.senders {
            if sender.send(SwarmMessage::Shutdown).await.is_err() {
                debug!(peer = %id, "peer already stopped");
            }
        }
        drop(self.senders);

        let (ids, handles): (Vec<String>, Vec<JoinHandle<()>>) = self.tasks.into_iter().unzip();
        let mut failed = None;
        for (id, joined) in ids.into_iter().zip(join_all(handles).await) {
            if let Err(err) = joined {
                warn!(peer = %id, error = %err, "swarm peer panicked");
                failed.get_or_insert(id);
            }
        }
        match failed {
            Some(id) => Err(ConclaveError::PeerUnavailable(id)),
            None => Ok(()),
        }
    }
}
