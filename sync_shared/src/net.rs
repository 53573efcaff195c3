//! Networking primitives.
//!
//! Goals:
//! - Provide the message taxonomy exchanged between client and server.
//! - Provide a reliable, ordered channel (length-prefixed JSON over TCP).
//! - Keep serialization explicit and versionable.
//!
//! The transport is trusted to deliver frames in send order, exactly once.
//! Nothing here numbers, acknowledges or retries messages.

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};

use crate::{math::Vec3, tree::StateTree};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on a single frame. Anything larger is treated as a broken stream.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NetMsg {
    // ─── Connection handshake ───
    /// Client -> server: first frame on a new connection.
    Hello { protocol: u32, name: String },
    /// Server -> client: full authoritative state and the client's entity id.
    Login {
        id: String,
        state: StateTree,
        /// Opaque world bootstrap data (terrain seed etc.), forwarded untouched.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        world: Option<serde_json::Value>,
    },

    // ─── State sync ───
    /// Server -> client: delta against the previous update (or the login state).
    Update(UpdateMsg),

    // ─── Gameplay ───
    /// Client -> server: sampled input.
    Action { input: InputVector },

    // ─── Chat ───
    /// Client -> server.
    Chat {
        content: String,
        channel: ChatChannel,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    /// Server -> client. Not part of state sync.
    ChatBroadcast {
        channel: ChatChannel,
        sender_id: String,
        content: String,
    },

    // ─── Disconnect ───
    Disconnect { reason: String },
}

impl NetMsg {
    /// Short name used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            NetMsg::Hello { .. } => "hello",
            NetMsg::Login { .. } => "login",
            NetMsg::Update(_) => "update",
            NetMsg::Action { .. } => "action",
            NetMsg::Chat { .. } => "chat",
            NetMsg::ChatBroadcast { .. } => "chat_broadcast",
            NetMsg::Disconnect { .. } => "disconnect",
        }
    }
}

/// Delta update.
///
/// On the wire the delta's categories sit next to `timestamp` at the top
/// level, so categories must not be named `kind`, `timestamp` or `seq`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateMsg {
    /// Authoritative server time, milliseconds.
    pub timestamp: f64,
    /// Optional monotonically increasing update counter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(flatten)]
    pub delta: StateTree,
}

/// Chat routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatChannel {
    Global,
    Team,
    Whisper,
}

/// Client input for one frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct InputVector {
    /// Wish move in local space, each axis in `[-1, 1]`.
    pub movement: Vec3,
    /// Look angles, radians.
    pub yaw: f32,
    pub pitch: f32,
    #[serde(default)]
    pub jump: bool,
    #[serde(default)]
    pub fire: bool,
    /// Mount / dismount / use.
    #[serde(default)]
    pub interact: bool,
}

async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, msg: &NetMsg) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

/// Reads one raw frame payload.
async fn read_payload<R: AsyncRead + Unpin>(r: &mut R) -> anyhow::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await.context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    anyhow::ensure!(len <= MAX_FRAME_LEN, "frame of {len} bytes exceeds limit");
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    Ok(payload)
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok(Self::new(stream))
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.stream, msg).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        let payload = read_payload(&mut self.stream).await?;
        decode_from_bytes(&payload)
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Splits into independently owned read and write halves.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (r, w) = self.stream.into_split();
        (FrameReader { half: r }, FrameWriter { half: w })
    }
}

/// Read half of a [`ReliableConn`].
#[derive(Debug)]
pub struct FrameReader {
    half: OwnedReadHalf,
}

impl FrameReader {
    /// Reads the next frame.
    ///
    /// The outer error means the stream is gone. The inner result is the
    /// decode of a frame that arrived intact; a bad payload does not poison
    /// the frames behind it.
    pub async fn recv(&mut self) -> anyhow::Result<anyhow::Result<NetMsg>> {
        let payload = read_payload(&mut self.half).await?;
        Ok(decode_from_bytes(&payload))
    }
}

/// Write half of a [`ReliableConn`].
#[derive(Debug)]
pub struct FrameWriter {
    half: OwnedWriteHalf,
}

impl FrameWriter {
    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.half, msg).await
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}
