// Peer-to-peer module
//
// Nodes keep persistent WebSocket connections to each other and exchange
// JSON messages to gossip transactions and converge on the longest valid chain.

pub mod message;
pub mod server;

pub use message::PeerMessage;
pub use server::{P2pServer, PeerInfo};

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur on the peer-to-peer layer
#[derive(Debug, Error)]
pub enum P2pError {
    #[error("Malformed message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Peer {0} is not connected")]
    PeerClosed(Uuid),
}
