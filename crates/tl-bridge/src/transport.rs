use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::protocol::BridgeMessage;

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Failures reported by a transport.
///
/// The rendered messages are what the subscription controller classifies, so
/// each variant names its condition in words the error classifier knows
/// (`connection closed`, `stream`, `unauthorized`, ...).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("send failed: stream error: {0}")]
    SendFailed(String),

    #[error("receive failed: stream error: {0}")]
    ReceiveFailed(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("transport not connected")]
    NotConnected,

    #[error("transport already connected")]
    AlreadyConnected,

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("rejected by server: {0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

// ---------------------------------------------------------------------------
// TransportKind: identifies which transport backend is in use
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Label for externally provided network transports.
    WebSocket,
    InProcess,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::WebSocket => write!(f, "websocket"),
            TransportKind::InProcess => write!(f, "in-process"),
        }
    }
}

// ---------------------------------------------------------------------------
// TransportState: connection lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

// ---------------------------------------------------------------------------
// ProxyTransport trait
// ---------------------------------------------------------------------------

/// A transport-agnostic channel for sending/receiving [`BridgeMessage`]s.
///
/// The session driver never talks to a specific wire protocol; it goes
/// through a `ProxyTransport`. This crate ships only [`InProcessTransport`].
/// Network clients (a WebSocket connection to the task backend, say) are
/// implemented by the embedding application and report
/// [`TransportKind::WebSocket`].
#[async_trait]
pub trait ProxyTransport: Send + Sync {
    /// The transport kind this implementation provides.
    fn kind(&self) -> TransportKind;

    /// Current connection state.
    fn state(&self) -> TransportState;

    /// Send a message through the transport.
    async fn send(&self, msg: BridgeMessage) -> Result<()>;

    /// Receive the next message. Blocks (async) until one arrives.
    ///
    /// A clean close of the remote side is reported as
    /// [`TransportError::ConnectionClosed`].
    async fn recv(&self) -> Result<BridgeMessage>;

    /// Attempt to connect or reconnect.
    async fn connect(&mut self) -> Result<()>;

    /// Gracefully close the transport.
    async fn disconnect(&mut self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// InProcessTransport: for testing and in-memory use
// ---------------------------------------------------------------------------

/// An in-process transport backed by flume channels.
///
/// Dropping one end closes the other: its `recv` then reports
/// [`TransportError::ConnectionClosed`].
pub struct InProcessTransport {
    state: TransportState,
    tx: flume::Sender<BridgeMessage>,
    rx: flume::Receiver<BridgeMessage>,
}

impl InProcessTransport {
    /// Create a pair of connected in-process transports.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = flume::unbounded();
        let (tx_b, rx_a) = flume::unbounded();

        let a = Self {
            state: TransportState::Connected,
            tx: tx_a,
            rx: rx_a,
        };
        let b = Self {
            state: TransportState::Connected,
            tx: tx_b,
            rx: rx_b,
        };
        (a, b)
    }
}

#[async_trait]
impl ProxyTransport for InProcessTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::InProcess
    }

    fn state(&self) -> TransportState {
        self.state
    }

    async fn send(&self, msg: BridgeMessage) -> Result<()> {
        if self.state != TransportState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.tx
            .send_async(msg)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&self) -> Result<BridgeMessage> {
        if self.state != TransportState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.rx
            .recv_async()
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn connect(&mut self) -> Result<()> {
        if self.state == TransportState::Connected {
            return Err(TransportError::AlreadyConnected);
        }
        if self.rx.is_disconnected() {
            self.state = TransportState::Failed;
            return Err(TransportError::ConnectionClosed);
        }
        self.state = TransportState::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.state = TransportState::Disconnected;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
