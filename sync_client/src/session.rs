//! Synchronization session.
//!
//! Owns the client's replica of the authoritative state tree and the snapshot
//! history built from it. One session lives exactly as long as one connection:
//! on reconnect the old session is disposed and a fresh one waits for a new
//! login. Nothing carries over.
//!
//! The session is the only mutator of the tree and the history. It is fully
//! synchronous; the driver feeds it messages in delivery order and samples the
//! interpolation engine only after the queue has been drained.

use std::collections::VecDeque;

use sync_shared::{
    config::SyncConfig,
    delta::apply_delta,
    error::{ProtocolError, ProtocolResult},
    event::EventBus,
    net::{ChatChannel, InputVector, NetMsg, UpdateMsg},
    tree::{find_record, flatten_entities, StateTree},
};
use tracing::{debug, info, warn};

use crate::interp::{Snapshot, SnapshotHistory};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection, or the session has been disposed.
    Disconnected,
    /// Connected, waiting for the full-state login.
    AwaitingLogin,
    /// Login received; deltas are being applied.
    Synchronized,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::AwaitingLogin => "awaiting login",
            SessionState::Synchronized => "synchronized",
        };
        f.write_str(s)
    }
}

/// Published once per login so camera/UI can bootstrap.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginEvent {
    pub id: String,
    pub world: Option<serde_json::Value>,
}

/// Inbound chat, forwarded verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatEvent {
    pub channel: ChatChannel,
    pub sender_id: String,
    pub content: String,
}

/// Published when the server closes the session.
#[derive(Debug, Clone, PartialEq)]
pub struct DisconnectEvent {
    pub reason: String,
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub updates_applied: u64,
    pub snapshots_pushed: u64,
    pub messages_rejected: u64,
    /// Sequence gaps or repeats seen on updates that carry `seq`.
    pub gaps_detected: u64,
}

/// Client-side replica of the authoritative world.
pub struct SyncSession {
    state: SessionState,
    local_id: Option<String>,
    tree: StateTree,
    history: SnapshotHistory,
    last_seq: Option<u64>,
    outbound: VecDeque<NetMsg>,
    events: EventBus,
    stats: SessionStats,
}

impl SyncSession {
    /// Creates a session for a freshly opened connection.
    pub fn create(cfg: &SyncConfig) -> Self {
        Self {
            state: SessionState::AwaitingLogin,
            local_id: None,
            tree: StateTree::new(),
            history: SnapshotHistory::new(cfg.interp_buffer_size.max(1)),
            last_seq: None,
            outbound: VecDeque::new(),
            events: EventBus::default(),
            stats: SessionStats::default(),
        }
    }

    /// Tears the session down. Queued sends are dropped.
    pub fn dispose(&mut self) {
        if self.state != SessionState::Disconnected {
            info!(local_id = ?self.local_id, "Sync session disposed");
        }
        self.state = SessionState::Disconnected;
        self.local_id = None;
        self.tree.clear();
        self.history.clear();
        self.last_seq = None;
        self.outbound.clear();
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    /// Current reconstructed tree.
    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    pub fn history(&self) -> &SnapshotHistory {
        &self.history
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// The local player's record, looked up in any category.
    pub fn local_record(&self) -> Option<&StateTree> {
        find_record(&self.tree, self.local_id.as_deref()?)
    }

    /// Event bus carrying [`LoginEvent`], [`ChatEvent`] and [`DisconnectEvent`].
    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    /// Applies one inbound message.
    ///
    /// A rejected message leaves the session untouched; the caller logs it
    /// and carries on with the next one.
    pub fn handle(&mut self, msg: NetMsg) -> ProtocolResult<()> {
        let result = self.dispatch(msg);
        if result.is_err() {
            self.stats.messages_rejected += 1;
        }
        result
    }

    fn dispatch(&mut self, msg: NetMsg) -> ProtocolResult<()> {
        if self.state == SessionState::Disconnected {
            return Err(ProtocolError::Disconnected);
        }
        match msg {
            NetMsg::Login { id, state, world } => {
                self.on_login(id, state, world);
                Ok(())
            }
            NetMsg::Update(update) => self.on_update(update),
            NetMsg::ChatBroadcast {
                channel,
                sender_id,
                content,
            } => {
                self.events.push(ChatEvent {
                    channel,
                    sender_id,
                    content,
                });
                Ok(())
            }
            NetMsg::Disconnect { reason } => {
                info!(reason = %reason, "Server closed the session");
                self.events.push(DisconnectEvent { reason });
                self.dispose();
                Ok(())
            }
            other => Err(ProtocolError::Unexpected {
                kind: other.kind(),
                state: self.state.to_string(),
            }),
        }
    }

    fn on_login(&mut self, id: String, state: StateTree, world: Option<serde_json::Value>) {
        info!(local_id = %id, categories = state.len(), "Login received");
        self.tree = state;
        self.history.clear();
        self.last_seq = None;
        self.local_id = Some(id.clone());
        self.state = SessionState::Synchronized;
        self.events.push(LoginEvent { id, world });
    }

    fn on_update(&mut self, update: UpdateMsg) -> ProtocolResult<()> {
        if self.state != SessionState::Synchronized {
            return Err(ProtocolError::Unexpected {
                kind: "update",
                state: self.state.to_string(),
            });
        }
        if !update.timestamp.is_finite() {
            return Err(ProtocolError::Malformed {
                kind: "update",
                reason: format!("timestamp {}", update.timestamp),
            });
        }

        if let Some(seq) = update.seq {
            if let Some(last) = self.last_seq {
                if seq != last.wrapping_add(1) {
                    warn!(expected = last.wrapping_add(1), got = seq, "Update sequence gap, state may have diverged");
                    self.stats.gaps_detected += 1;
                }
            }
            self.last_seq = Some(seq);
        }

        self.tree = apply_delta(Some(&self.tree), Some(&update.delta));
        self.stats.updates_applied += 1;

        if let Some(latest) = self.history.latest() {
            if update.timestamp < latest.time {
                warn!(
                    timestamp = update.timestamp,
                    latest = latest.time,
                    "Update older than newest snapshot, not buffered"
                );
                return Ok(());
            }
        }

        let entities = flatten_entities(&self.tree);
        debug!(time = update.timestamp, entities = entities.len(), "Snapshot");
        self.history.push(Snapshot::new(update.timestamp, entities));
        self.stats.snapshots_pushed += 1;
        Ok(())
    }

    /// Queues an input message. Fire-and-forget.
    pub fn send_input(&mut self, input: InputVector) {
        self.queue(NetMsg::Action { input });
    }

    /// Queues a chat message. Fire-and-forget.
    pub fn send_chat(&mut self, content: &str, channel: ChatChannel, target: Option<&str>) {
        self.queue(NetMsg::Chat {
            content: content.to_string(),
            channel,
            target: target.map(str::to_string),
        });
    }

    fn queue(&mut self, msg: NetMsg) {
        if self.state != SessionState::Synchronized {
            debug!(kind = msg.kind(), state = %self.state, "Dropping outbound message");
            return;
        }
        self.outbound.push_back(msg);
    }

    /// Hands queued outbound messages to the transport, oldest first.
    pub fn drain_outbound(&mut self) -> Vec<NetMsg> {
        self.outbound.drain(..).collect()
    }
}
