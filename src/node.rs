use dashmap::DashMap;
use log::{info, warn};
use thiserror::Error;
use uuid::Uuid;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::blockchain::{Address, Block, Blockchain, BlockchainError, Transaction};
use crate::p2p::P2pServer;

/// Errors surfaced by node level operations
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Blockchain error: {0}")]
    Blockchain(#[from] BlockchainError),

    #[error("Mining worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Ties the ledger to the peer network: local changes are gossiped after
/// they are applied.
#[derive(Clone)]
pub struct Node {
    blockchain: Blockchain,
    p2p: P2pServer,
    reward_address: Address,

    /// Cancellation flag of every mining run in flight
    mining_runs: Arc<DashMap<Uuid, Arc<AtomicBool>>>,
}

impl Node {
    pub fn new(p2p: P2pServer, reward_address: Address) -> Self {
        Node {
            blockchain: p2p.blockchain().clone(),
            p2p,
            reward_address,
            mining_runs: Arc::new(DashMap::new()),
        }
    }

    pub fn blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    pub fn p2p(&self) -> &P2pServer {
        &self.p2p
    }

    pub fn reward_address(&self) -> &Address {
        &self.reward_address
    }

    /// Mines a block rewarding the node's own address
    pub async fn mine(&self) -> Result<Block, NodeError> {
        self.mine_to(self.reward_address.clone()).await
    }

    /// Mines the pending pool on a blocking worker, then announces the new
    /// chain and tells peers to drop their pools.
    pub async fn mine_to(&self, reward_address: Address) -> Result<Block, NodeError> {
        let run = Uuid::new_v4();
        let cancel = Arc::new(AtomicBool::new(false));
        self.mining_runs.insert(run, Arc::clone(&cancel));

        let blockchain = self.blockchain.clone();
        let mined = tokio::task::spawn_blocking(move || {
            blockchain.mine_pending_transactions_with_cancel(&reward_address, &cancel)
        })
        .await;
        self.mining_runs.remove(&run);
        let block = mined??;

        let peers = self.p2p.broadcast_chain();
        self.p2p.broadcast_clear_transactions();
        info!("Announced block {} to {} peers", block.index, peers);

        Ok(block)
    }

    /// Cancels every mining run in progress and returns how many were
    /// signalled. Runs started afterwards are not affected.
    pub fn abort_mining(&self) -> usize {
        let mut aborted = 0;
        for run in self.mining_runs.iter() {
            run.value().store(true, Ordering::Relaxed);
            aborted += 1;
        }
        warn!("Aborting {} mining runs", aborted);
        aborted
    }

    /// Admits a signed transaction to the local pool and gossips it
    pub fn submit_transaction(&self, transaction: Transaction) -> Result<(), NodeError> {
        self.blockchain.add_transaction(transaction.clone())?;
        self.p2p.broadcast_transaction(&transaction);
        Ok(())
    }
}
