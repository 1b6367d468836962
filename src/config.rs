use clap::Parser;

use std::path::PathBuf;

use crate::blockchain::chain::{DEFAULT_DIFFICULTY, DEFAULT_MINING_REWARD, MAX_DIFFICULTY};

/// Runtime settings of a ledger node. Every flag can also be set from the
/// environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "ledger-node", version, about = "Peer-to-peer proof-of-work ledger node")]
pub struct NodeConfig {
    /// Port for incoming peer WebSocket connections.
    #[arg(long, default_value_t = 5001, env = "P2P_PORT")]
    pub p2p_port: u16,

    /// Port for the HTTP control API.
    #[arg(long, default_value_t = 8080, env = "HTTP_PORT")]
    pub http_port: u16,

    /// Interface both servers bind to.
    #[arg(long, default_value = "0.0.0.0", env = "BIND_HOST")]
    pub host: String,

    /// Peers to dial at startup (comma-separated: "ws://10.0.0.2:5001,ws://10.0.0.3:5001").
    #[arg(long, env = "PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Address credited with mining rewards. A fresh wallet is generated when unset.
    #[arg(long, env = "REWARD_ADDRESS")]
    pub reward_address: Option<String>,

    /// Leading zero hex digits required of block hashes (at most 64).
    #[arg(long, default_value_t = DEFAULT_DIFFICULTY, env = "DIFFICULTY", value_parser = parse_difficulty)]
    pub difficulty: usize,

    /// Reward paid to the miner of each block.
    #[arg(long, default_value_t = DEFAULT_MINING_REWARD, env = "MINING_REWARD")]
    pub mining_reward: f64,

    /// Directory for the persistent chain. The chain lives in memory when unset.
    #[arg(long, env = "DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Mine one block as soon as the node is up.
    #[arg(long, env = "MINE_ON_START")]
    pub mine_on_start: bool,

    /// Honor `make-transaction` requests, which carry a private key over the wire.
    #[arg(long, env = "INSECURE_CUSTODIAL_SIGNING")]
    pub insecure_custodial_signing: bool,
}

fn parse_difficulty(value: &str) -> Result<usize, String> {
    let difficulty: usize = value.parse().map_err(|e| format!("{}", e))?;
    if difficulty > MAX_DIFFICULTY {
        return Err(format!("must be at most {}", MAX_DIFFICULTY));
    }
    Ok(difficulty)
}

impl NodeConfig {
    /// Peer URLs with blanks removed
    pub fn peer_urls(&self) -> Vec<String> {
        self.peers
            .iter()
            .map(|peer| peer.trim())
            .filter(|peer| !peer.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn p2p_addr(&self) -> (String, u16) {
        (self.host.clone(), self.p2p_port)
    }

    pub fn http_addr(&self) -> (String, u16) {
        (self.host.clone(), self.http_port)
    }
}
