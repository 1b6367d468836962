use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_async, connect_async, WebSocketStream};
use utoipa::ToSchema;
use uuid::Uuid;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::blockchain::crypto::generate_key_pair;
use crate::blockchain::{Block, Blockchain, ReplaceOutcome, Transaction};

use super::{P2pError, PeerMessage};

/// An open connection, as seen by the rest of the node
struct PeerHandle {
    address: String,
    outbound: bool,
    sender: mpsc::UnboundedSender<WsMessage>,
}

/// Public view of a connected peer
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PeerInfo {
    #[schema(value_type = String)]
    pub id: Uuid,

    /// Remote socket address for inbound peers, dialed URL for outbound ones
    pub address: String,

    /// Whether this node initiated the connection
    pub outbound: bool,
}

/// Accepts and dials peer connections and dispatches their messages to the ledger.
///
/// Cloning yields another handle to the same connection set.
#[derive(Clone)]
pub struct P2pServer {
    blockchain: Blockchain,
    peers: Arc<DashMap<Uuid, PeerHandle>>,
    allow_custodial_signing: bool,
}

impl P2pServer {
    pub fn new(blockchain: Blockchain, allow_custodial_signing: bool) -> Self {
        P2pServer {
            blockchain,
            peers: Arc::new(DashMap::new()),
            allow_custodial_signing,
        }
    }

    pub fn blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    /// Binds `addr` and accepts peers in the background.
    ///
    /// Returns the bound address, useful when binding port 0.
    pub async fn listen<A: ToSocketAddrs>(&self, addr: A) -> Result<SocketAddr, P2pError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Listening for peer-to-peer connections on: {}", local_addr);

        let server = self.clone();
        tokio::spawn(async move { server.accept_loop(listener).await });

        Ok(local_addr)
    }

    async fn accept_loop(self, listener: TcpListener) {
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let server = self.clone();
            tokio::spawn(async move {
                match accept_async(stream).await {
                    Ok(ws) => {
                        server.register(ws, addr.to_string(), false);
                    }
                    Err(e) => warn!("WebSocket handshake with {} failed: {}", addr, e),
                }
            });
        }
    }

    /// Dials `url` and asks the peer for its chain once the connection is open
    pub async fn connect_peer(&self, url: &str) -> Result<Uuid, P2pError> {
        let (ws, _) = connect_async(url).await?;
        info!("Connected to peer {}", url);
        Ok(self.register(ws, url.to_string(), true))
    }

    /// Dials every URL in the background. Failures are logged, not retried.
    pub fn connect_all_peers(&self, urls: &[String]) {
        for url in urls {
            let server = self.clone();
            let url = url.clone();
            tokio::spawn(async move {
                if let Err(e) = server.connect_peer(&url).await {
                    warn!("Could not connect to peer {}: {}", url, e);
                }
            });
        }
    }

    fn register<S>(&self, ws: WebSocketStream<S>, address: String, outbound: bool) -> Uuid
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = Uuid::new_v4();
        let (mut sink, mut stream) = ws.split();
        let (sender, mut receiver) = mpsc::unbounded_channel::<WsMessage>();

        info!("Socket connected: {} ({})", id, address);
        self.peers.insert(
            id,
            PeerHandle {
                address,
                outbound,
                sender,
            },
        );

        if outbound {
            self.reply(id, &PeerMessage::RequestChain);
        }

        tokio::spawn(async move {
            while let Some(frame) = receiver.recv().await {
                if let Err(e) = sink.send(frame).await {
                    debug!("Write to peer {} failed: {}", id, e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let server = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => server.handle_text(id, &text).await,
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Read from peer {} failed: {}", id, e);
                        break;
                    }
                }
            }
            server.disconnect(id);
        });

        id
    }

    fn disconnect(&self, id: Uuid) {
        if let Some((_, peer)) = self.peers.remove(&id) {
            info!("Socket disconnected: {} ({})", id, peer.address);
        }
    }

    async fn handle_text(&self, from: Uuid, text: &str) {
        match PeerMessage::from_text(text) {
            Ok(message) => self.handle_message(from, message).await,
            Err(e) => warn!("Ignoring message from peer {}: {}", from, e),
        }
    }

    /// Applies one inbound message. Validation failures are logged and
    /// never close the connection.
    pub async fn handle_message(&self, from: Uuid, message: PeerMessage) {
        debug!("Received {} from peer {}", message.kind(), from);

        match message {
            PeerMessage::RequestChain => {
                let chain = self.blockchain.get_chain();
                self.reply(from, &PeerMessage::Chain { chain });
            }
            PeerMessage::Chain { chain } => self.handle_chain(from, chain).await,
            PeerMessage::Transaction { transaction } => {
                if let Err(e) = self.blockchain.add_transaction(transaction) {
                    debug!("Rejected transaction from peer {}: {}", from, e);
                }
            }
            PeerMessage::ClearTransactions => self.blockchain.clear_transactions(),
            PeerMessage::RequestTransactions => {
                let transactions = self.blockchain.get_pending_transactions();
                self.reply(from, &PeerMessage::Transactions { transactions });
            }
            PeerMessage::RequestBalance { public_key } => {
                let balance = self.blockchain.balance_of(&public_key);
                self.reply(from, &PeerMessage::Balance { balance });
            }
            PeerMessage::GenerateWallet => {
                self.reply(from, &PeerMessage::Key { key: generate_key_pair() });
            }
            PeerMessage::MakeTransaction {
                from: sender,
                to,
                amount,
                private_key,
            } => {
                if !self.allow_custodial_signing {
                    warn!("Refusing make-transaction from peer {}: custodial signing is disabled", from);
                    return;
                }
                self.make_transaction(from, Transaction::new(sender, to, amount), &private_key);
            }
            PeerMessage::Message { data } => info!("Message from peer {}: {}", from, data),
            PeerMessage::Transactions { transactions } => {
                debug!("Peer {} holds {} pending transactions", from, transactions.len());
            }
            PeerMessage::Balance { balance } => debug!("Peer {} reported balance {}", from, balance),
            PeerMessage::Key { .. } => debug!("Peer {} sent a key pair", from),
            PeerMessage::Unknown => debug!("Ignoring message of unknown type from peer {}", from),
        }
    }

    async fn handle_chain(&self, from: Uuid, chain: Vec<Block>) {
        let blockchain = self.blockchain.clone();
        let outcome = tokio::task::spawn_blocking(move || blockchain.replace_chain(chain)).await;

        match outcome {
            Ok(Ok(ReplaceOutcome::Replaced)) => {
                let chain = self.blockchain.get_chain();
                self.broadcast_except(Some(from), &PeerMessage::Chain { chain });
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!("Chain from peer {} was adopted but not persisted: {}", from, e),
            Err(e) => error!("Chain replacement worker failed: {}", e),
        }
    }

    fn make_transaction(&self, from: Uuid, mut transaction: Transaction, private_key: &str) {
        if let Err(e) = transaction.sign_with_private_key(private_key) {
            warn!("make-transaction from peer {} could not be signed: {}", from, e);
            return;
        }

        match self.blockchain.add_transaction(transaction.clone()) {
            Ok(()) => {
                self.broadcast_except(Some(from), &PeerMessage::Transaction { transaction });
            }
            Err(e) => warn!("make-transaction from peer {} rejected: {}", from, e),
        }
    }

    /// Queues `message` for a single peer
    pub fn send_to(&self, id: Uuid, message: &PeerMessage) -> Result<(), P2pError> {
        let text = message.to_text()?;
        let peer = self.peers.get(&id).ok_or(P2pError::PeerClosed(id))?;
        peer.sender
            .send(WsMessage::Text(text))
            .map_err(|_| P2pError::PeerClosed(id))
    }

    fn reply(&self, to: Uuid, message: &PeerMessage) {
        if let Err(e) = self.send_to(to, message) {
            debug!("Could not send {} to peer {}: {}", message.kind(), to, e);
        }
    }

    fn broadcast_except(&self, skip: Option<Uuid>, message: &PeerMessage) -> usize {
        let text = match message.to_text() {
            Ok(text) => text,
            Err(e) => {
                error!("Could not encode {} for broadcast: {}", message.kind(), e);
                return 0;
            }
        };

        let mut delivered = 0;
        for peer in self.peers.iter() {
            if Some(*peer.key()) == skip {
                continue;
            }
            if peer.sender.send(WsMessage::Text(text.clone())).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Queues `message` on every open connection and returns how many took it.
    /// Nothing waits for delivery.
    pub fn broadcast_message(&self, message: &PeerMessage) -> usize {
        self.broadcast_except(None, message)
    }

    pub fn broadcast_chain(&self) -> usize {
        let chain = self.blockchain.get_chain();
        self.broadcast_message(&PeerMessage::Chain { chain })
    }

    pub fn broadcast_transaction(&self, transaction: &Transaction) -> usize {
        self.broadcast_message(&PeerMessage::Transaction {
            transaction: transaction.clone(),
        })
    }

    pub fn broadcast_clear_transactions(&self) -> usize {
        self.broadcast_message(&PeerMessage::ClearTransactions)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers
            .iter()
            .map(|peer| PeerInfo {
                id: *peer.key(),
                address: peer.address.clone(),
                outbound: peer.outbound,
            })
            .collect()
    }
}
