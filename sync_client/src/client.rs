//! Client implementation.
//!
//! The client maintains:
//! - A reliable, ordered connection to the server (framed JSON over TCP)
//! - A reader task that only moves decoded messages into an inbound queue
//! - The sync session, which drains that queue once per frame
//! - The interpolation engine, sampled after the queue is drained
//!
//! Reconnecting means building a new `GameClient`: the old session and its
//! history are thrown away with it.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use sync_shared::{
    config::SyncConfig,
    net::{ChatChannel, FrameWriter, NetMsg, ReliableConn, PROTOCOL_VERSION},
};
use tokio::{
    sync::mpsc::{self, error::TryRecvError},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    input::{build_input, InputState},
    interp::{InterpolatedFrame, InterpolationEngine},
    session::{SessionState, SyncSession},
};

/// High-level game client.
pub struct GameClient {
    pub session: SyncSession,
    pub interp: InterpolationEngine,

    inbound: mpsc::UnboundedReceiver<NetMsg>,
    writer: FrameWriter,
    reader_task: JoinHandle<()>,
    server_addr: SocketAddr,
}

impl GameClient {
    /// Connects to a server and sends the handshake.
    ///
    /// The session starts out awaiting login; the login itself arrives through
    /// the normal inbound queue.
    pub async fn connect(cfg: &SyncConfig) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;

        info!(server = %server_addr, name = %cfg.player_name, "Connecting to server");

        let mut conn = ReliableConn::connect(server_addr).await?;
        conn.send(&NetMsg::Hello {
            protocol: PROTOCOL_VERSION,
            name: cfg.player_name.clone(),
        })
        .await?;

        let (mut reader, writer) = conn.into_split();
        let (tx, inbound) = mpsc::unbounded_channel();

        let reader_task = tokio::spawn(async move {
            loop {
                match reader.recv().await {
                    Ok(Ok(msg)) => {
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "Dropping undecodable frame");
                    }
                    Err(e) => {
                        debug!(error = %e, "Connection reader stopped");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            session: SyncSession::create(cfg),
            interp: InterpolationEngine::from_config(cfg),
            inbound,
            writer,
            reader_task,
            server_addr,
        })
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Applies every queued inbound message, in delivery order.
    ///
    /// Returns how many messages were taken off the queue.
    pub fn poll(&mut self) -> usize {
        let mut taken = 0;
        loop {
            match self.inbound.try_recv() {
                Ok(msg) => {
                    taken += 1;
                    let kind = msg.kind();
                    if let Err(e) = self.session.handle(msg) {
                        warn!(kind, error = %e, "Ignoring message");
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.session.state() != SessionState::Disconnected {
                        info!(server = %self.server_addr, "Connection lost");
                        self.session.dispose();
                    }
                    break;
                }
            }
        }
        taken
    }

    /// Writes queued outbound messages. A failed write drops the rest.
    pub async fn flush(&mut self) {
        for msg in self.session.drain_outbound() {
            if let Err(e) = self.writer.send(&msg).await {
                warn!(error = %e, kind = msg.kind(), "Send failed, disposing session");
                self.session.dispose();
                break;
            }
        }
    }

    /// One render tick: drain inbound, flush outbound, sample.
    pub async fn frame(&mut self) -> InterpolatedFrame {
        self.poll();
        self.flush().await;
        self.interp.sample(self.session.history())
    }

    /// Polls until the login arrives.
    pub async fn wait_for_login(&mut self, timeout: Duration) -> anyhow::Result<()> {
        tokio::time::timeout(timeout, async {
            loop {
                self.poll();
                match self.session.state() {
                    SessionState::Synchronized => return Ok(()),
                    SessionState::Disconnected => anyhow::bail!("disconnected before login"),
                    SessionState::AwaitingLogin => {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                }
            }
        })
        .await
        .context("timed out waiting for login")?
    }

    /// Queues sampled input for the next flush.
    pub fn send_input(&mut self, input: InputState) {
        self.session.send_input(build_input(input));
    }

    pub fn send_chat(&mut self, content: &str, channel: ChatChannel, target: Option<&str>) {
        self.session.send_chat(content, channel, target);
    }

    /// Tells the server we're leaving and tears the session down.
    pub async fn disconnect(&mut self, reason: &str) {
        let msg = NetMsg::Disconnect {
            reason: reason.to_string(),
        };
        if let Err(e) = self.writer.send(&msg).await {
            debug!(error = %e, "Disconnect notice not delivered");
        }
        self.session.dispose();
        self.reader_task.abort();
    }

    /// Executes a console command.
    pub async fn exec_console(&mut self, line: &str) -> Vec<String> {
        let line = line.trim();
        let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match cmd {
            "say" => {
                self.send_chat(rest, ChatChannel::Global, None);
                self.flush().await;
                Vec::new()
            }
            "team" => {
                self.send_chat(rest, ChatChannel::Team, None);
                self.flush().await;
                Vec::new()
            }
            "whisper" => match rest.split_once(' ') {
                Some((target, msg)) => {
                    self.send_chat(msg, ChatChannel::Whisper, Some(target));
                    self.flush().await;
                    Vec::new()
                }
                None => vec!["Usage: whisper <id> <message>".to_string()],
            },
            "status" => {
                let stats = self.session.stats();
                let mut out = vec![
                    format!("State: {}", self.session.state()),
                    format!("Server: {}", self.server_addr),
                    format!("Local ID: {:?}", self.session.local_id()),
                    format!(
                        "Snapshots buffered: {}/{}",
                        self.session.history().len(),
                        self.session.history().max()
                    ),
                    format!(
                        "Updates: {} applied, {} rejected, {} seq gaps",
                        stats.updates_applied, stats.messages_rejected, stats.gaps_detected
                    ),
                ];
                if let Some(latest) = self.session.history().latest() {
                    out.push(format!("Latest server time: {:.0}ms", latest.time));
                }
                out
            }
            "" => Vec::new(),
            other => vec![format!("Unknown command: {other}")],
        }
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
