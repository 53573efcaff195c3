//! Server implementation.
//!
//! An authoritative state publisher. It owns the world tree, hands every new
//! client the full tree in a `login`, and afterwards streams one `update` per
//! tick carrying only what changed since that client's last update.
//!
//! Notes:
//! - Each client has its own baseline, since clients join at different times.
//! - Updates go out every tick even when the delta is empty; the timestamp
//!   alone keeps the client's snapshot clock moving.
//! - Keys are never removed from the world. The codec can't express removal,
//!   so a departed player is marked `connected: false` instead.

use anyhow::Context;
use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};
use sync_shared::{
    config::SyncConfig,
    delta::compute_delta,
    net::{
        ChatChannel, FrameWriter, InputVector, NetMsg, ReliableConn, ReliableListener, UpdateMsg,
        PROTOCOL_VERSION,
    },
    tree::{StateTree, Value},
};
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};

/// Category players are stored under.
pub const PLAYERS: &str = "players";

/// Units per second at full input deflection.
pub const MOVE_SPEED: f64 = 6.0;

static NEXT_CLIENT_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u32);

impl ClientId {
    pub fn new_unique() -> Self {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Connected client state.
struct ClientSlot {
    /// Entity id of this client's player record.
    entity_id: String,
    writer: FrameWriter,
    reader_task: JoinHandle<()>,
    /// Tree this client has reconstructed so far.
    baseline: StateTree,
}

impl Drop for ClientSlot {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Game server.
pub struct GameServer {
    pub cfg: SyncConfig,
    world: StateTree,
    clients: HashMap<ClientId, ClientSlot>,

    tcp: ReliableListener,
    inbound_tx: mpsc::UnboundedSender<(ClientId, NetMsg)>,
    inbound_rx: mpsc::UnboundedReceiver<(ClientId, NetMsg)>,

    tick: u64,
    seq: u64,
}

impl GameServer {
    /// Binds the listener described by `cfg`.
    pub async fn new(cfg: SyncConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let tcp = ReliableListener::bind(addr).await?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        Ok(Self {
            cfg,
            world: StateTree::new(),
            clients: HashMap::new(),
            tcp,
            inbound_tx,
            inbound_rx,
            tick: 0,
            seq: 0,
        })
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// The authoritative tree.
    pub fn world(&self) -> &StateTree {
        &self.world
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Entity id assigned to a client's player.
    pub fn player_of(&self, client: ClientId) -> Option<&str> {
        self.clients.get(&client).map(|c| c.entity_id.as_str())
    }

    /// Inserts or replaces a whole entity record.
    pub fn set_entity(&mut self, category: &str, id: &str, record: StateTree) {
        self.category_mut(category)
            .insert(id.to_string(), Value::Map(record));
    }

    /// Sets one field of an entity record, creating the record if needed.
    pub fn set_field(&mut self, category: &str, id: &str, field: &str, value: Value) {
        self.category_mut(category)
            .entry(id.to_string())
            .or_default()
            .ensure_map()
            .insert(field.to_string(), value);
    }

    fn category_mut(&mut self, category: &str) -> &mut StateTree {
        self.world
            .entry(category.to_string())
            .or_default()
            .ensure_map()
    }

    fn record_mut(&mut self, category: &str, id: &str) -> Option<&mut StateTree> {
        match self.world.get_mut(category)? {
            Value::Map(members) => match members.get_mut(id)? {
                Value::Map(record) => Some(record),
                _ => None,
            },
            _ => None,
        }
    }

    /// Accepts exactly one client (handshake + login).
    pub async fn accept_one(&mut self) -> anyhow::Result<ClientId> {
        let (conn, peer) = self.tcp.accept().await?;
        self.handle_new_connection(conn, peer).await
    }

    /// Accepts a client with timeout (non-blocking).
    pub async fn try_accept(&mut self, timeout: Duration) -> anyhow::Result<Option<ClientId>> {
        match tokio::time::timeout(timeout, self.tcp.accept()).await {
            Ok(Ok((conn, peer))) => self.handle_new_connection(conn, peer).await.map(Some),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None), // Timeout
        }
    }

    async fn handle_new_connection(
        &mut self,
        mut conn: ReliableConn,
        peer: SocketAddr,
    ) -> anyhow::Result<ClientId> {
        let name = match conn.recv().await? {
            NetMsg::Hello { protocol, name } if protocol == PROTOCOL_VERSION => name,
            other => anyhow::bail!("unexpected handshake msg: {other:?}"),
        };

        let id = ClientId::new_unique();
        let entity_id = format!("p{}", id.0);
        self.set_entity(PLAYERS, &entity_id, spawn_record(&name));

        conn.send(&NetMsg::Login {
            id: entity_id.clone(),
            state: self.world.clone(),
            world: Some(serde_json::json!({ "tick_hz": self.cfg.tick_hz })),
        })
        .await?;

        let (mut reader, writer) = conn.into_split();
        let tx = self.inbound_tx.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                match reader.recv().await {
                    Ok(Ok(msg)) => {
                        if tx.send((id, msg)).is_err() {
                            return;
                        }
                    }
                    Ok(Err(e)) => warn!(client_id = ?id, error = %e, "Dropping undecodable frame"),
                    Err(_) => break,
                }
            }
            let _ = tx.send((
                id,
                NetMsg::Disconnect {
                    reason: "connection closed".to_string(),
                },
            ));
        });

        self.clients.insert(
            id,
            ClientSlot {
                entity_id: entity_id.clone(),
                writer,
                reader_task,
                baseline: self.world.clone(),
            },
        );

        info!(client_id = ?id, %peer, entity = %entity_id, name = %name, "Client logged in");
        Ok(id)
    }

    /// Runs the server for a number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = Duration::from_secs_f64(1.0 / self.cfg.tick_hz.max(1) as f64);
        let mut next = Instant::now();

        for _ in 0..ticks {
            next += dt;
            self.step(dt.as_secs_f64()).await?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one step: apply client messages, then publish deltas.
    pub async fn step(&mut self, dt_sec: f64) -> anyhow::Result<()> {
        self.recv_messages(dt_sec).await;
        self.send_updates().await;
        self.tick += 1;
        Ok(())
    }

    async fn recv_messages(&mut self, dt_sec: f64) {
        while let Ok((from, msg)) = self.inbound_rx.try_recv() {
            match msg {
                NetMsg::Action { input } => self.on_action(from, input, dt_sec),
                NetMsg::Chat {
                    content,
                    channel,
                    target,
                } => self.on_chat(from, content, channel, target).await,
                NetMsg::Disconnect { reason } => self.drop_client(from, &reason),
                other => debug!(client_id = ?from, kind = other.kind(), "Unexpected client message"),
            }
        }
    }

    fn on_action(&mut self, from: ClientId, input: InputVector, dt_sec: f64) {
        let Some(entity_id) = self.player_of(from).map(str::to_string) else {
            return;
        };
        let Some(record) = self.record_mut(PLAYERS, &entity_id) else {
            return;
        };

        // Stand-in authority: move along the wish vector in the yaw frame.
        let (sin, cos) = (input.yaw as f64).sin_cos();
        let fwd = input.movement.x as f64;
        let right = input.movement.y as f64;
        let step = MOVE_SPEED * dt_sec;
        add_number(record, "x", (fwd * cos - right * sin) * step);
        add_number(record, "z", (fwd * sin + right * cos) * step);
        add_number(record, "y", input.movement.z as f64 * step);

        let half = input.yaw as f64 / 2.0;
        record.insert("qx".into(), Value::Number(0.0));
        record.insert("qy".into(), Value::Number(half.sin()));
        record.insert("qz".into(), Value::Number(0.0));
        record.insert("qw".into(), Value::Number(half.cos()));
    }

    async fn on_chat(
        &mut self,
        from: ClientId,
        content: String,
        channel: ChatChannel,
        target: Option<String>,
    ) {
        let Some(sender_id) = self.player_of(from).map(str::to_string) else {
            return;
        };
        let msg = NetMsg::ChatBroadcast {
            channel,
            sender_id: sender_id.clone(),
            content,
        };

        let mut failed = Vec::new();
        for (cid, client) in self.clients.iter_mut() {
            let deliver = match channel {
                ChatChannel::Whisper => {
                    client.entity_id == sender_id || Some(&client.entity_id) == target.as_ref()
                }
                ChatChannel::Global | ChatChannel::Team => true,
            };
            if deliver && client.writer.send(&msg).await.is_err() {
                failed.push(*cid);
            }
        }
        for cid in failed {
            self.drop_client(cid, "send failed");
        }
    }

    fn drop_client(&mut self, client: ClientId, reason: &str) {
        let Some(slot) = self.clients.remove(&client) else {
            return;
        };
        self.set_field(PLAYERS, &slot.entity_id, "connected", Value::Bool(false));
        info!(client_id = ?client, entity = %slot.entity_id, reason, "Client left");
    }

    async fn send_updates(&mut self) {
        if self.clients.is_empty() {
            return;
        }
        self.seq += 1;
        let timestamp = chrono::Utc::now().timestamp_millis() as f64;

        let mut failed = Vec::new();
        for (cid, client) in self.clients.iter_mut() {
            let delta = compute_delta(Some(&client.baseline), Some(&self.world)).unwrap_or_default();
            let msg = NetMsg::Update(UpdateMsg {
                timestamp,
                seq: Some(self.seq),
                delta,
            });
            if let Err(e) = client.writer.send(&msg).await {
                warn!(client_id = ?cid, error = %e, "Update send failed");
                failed.push(*cid);
                continue;
            }
            client.baseline.clone_from(&self.world);
        }
        for cid in failed {
            self.drop_client(cid, "send failed");
        }
    }

    /// Executes a console command.
    pub fn exec_console(&mut self, line: &str) -> Vec<String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&cmd) = tokens.first() else {
            return Vec::new();
        };

        match cmd {
            "status" => {
                let mut out = vec![
                    format!("Tick: {}", self.tick),
                    format!("Update seq: {}", self.seq),
                    format!("Clients: {}", self.clients.len()),
                ];
                for (id, client) in &self.clients {
                    out.push(format!("  {:?}: entity={}", id, client.entity_id));
                }
                for (category, members) in &self.world {
                    let count = members.as_map().map_or(0, |m| m.len());
                    out.push(format!("  {category}: {count}"));
                }
                out
            }
            // spawn <category> <id> <x> <y> <z>
            "spawn" if tokens.len() == 6 => {
                let coords: Option<Vec<f64>> = tokens[3..].iter().map(|t| t.parse().ok()).collect();
                match coords {
                    Some(c) => {
                        let mut record = spawn_record(tokens[2]);
                        record.remove("username");
                        record.insert("x".into(), Value::Number(c[0]));
                        record.insert("y".into(), Value::Number(c[1]));
                        record.insert("z".into(), Value::Number(c[2]));
                        self.set_entity(tokens[1], tokens[2], record);
                        vec![format!("Spawned {}/{}", tokens[1], tokens[2])]
                    }
                    None => vec!["Usage: spawn <category> <id> <x> <y> <z>".to_string()],
                }
            }
            // set <category> <id> <field> <value>
            "set" if tokens.len() == 5 => {
                let value = tokens[4]
                    .parse::<f64>()
                    .map(Value::Number)
                    .unwrap_or_else(|_| Value::from(tokens[4]));
                self.set_field(tokens[1], tokens[2], tokens[3], value);
                vec![format!("Set {}/{}.{}", tokens[1], tokens[2], tokens[3])]
            }
            "spawn" => vec!["Usage: spawn <category> <id> <x> <y> <z>".to_string()],
            "set" => vec!["Usage: set <category> <id> <field> <value>".to_string()],
            other => vec![format!("Unknown command: {other}")],
        }
    }
}

fn add_number(record: &mut StateTree, field: &str, by: f64) {
    let current = record.get(field).and_then(Value::as_f64).unwrap_or(0.0);
    record.insert(field.to_string(), Value::Number(current + by));
}

/// Fresh record for a newly joined player.
fn spawn_record(name: &str) -> StateTree {
    let mut r = StateTree::new();
    for (k, v) in [("x", 0.0), ("y", 0.0), ("z", 0.0), ("qx", 0.0), ("qy", 0.0), ("qz", 0.0), ("qw", 1.0), ("health", 100.0)] {
        r.insert(k.to_string(), Value::Number(v));
    }
    r.insert("username".into(), Value::from(name));
    r.insert("connected".into(), Value::Bool(true));
    r
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(tick_hz: u32) -> anyhow::Result<(GameServer, SyncConfig)> {
    let cfg = SyncConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        tick_hz,
        ..Default::default()
    };
    let mut server = GameServer::new(cfg).await?;
    let addr = server.local_addr()?;
    server.cfg.server_addr = addr.to_string();
    let cfg = server.cfg.clone();
    Ok((server, cfg))
}
