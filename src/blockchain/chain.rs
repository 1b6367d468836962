use chrono::Utc;
use log::{info, warn};
use thiserror::Error;

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::block::Block;
use super::crypto::Address;
use super::storage::{BlockchainStorage, StorageError};
use super::transaction::{Transaction, TransactionError};

/// Leading zero hex digits required of a mined block hash
pub const DEFAULT_DIFFICULTY: usize = 5;

/// Amount credited to the miner of each block
pub const DEFAULT_MINING_REWARD: f64 = 100.0;

/// A SHA-256 hex digest has 64 digits, so no hash can meet a higher difficulty
pub const MAX_DIFFICULTY: usize = 64;

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Cannot add invalid transaction to chain")]
    UnsignedOrForged,

    #[error("Transaction amount must be greater than 0, got {0}")]
    NonPositiveAmount(f64),

    #[error("Not enough balance: required {required}, available {available}")]
    InsufficientBalance { required: f64, available: f64 },

    #[error("Invalid chain: {0}")]
    ChainIntegrity(String),

    #[error("Mining was cancelled")]
    MiningCancelled,
}

/// What [`Blockchain::replace_chain`] did with a candidate chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Replaced,
    NotLonger,
    Invalid(String),
}

/// Represents the blockchain
///
/// Cloning yields another handle to the same chain and pending pool.
#[derive(Debug, Clone)]
pub struct Blockchain {
    /// The chain of blocks, never empty
    chain: Arc<RwLock<Vec<Block>>>,

    /// Admitted transactions waiting for the next block
    pending_transactions: Arc<Mutex<Vec<Transaction>>>,

    /// Mining difficulty (number of leading zeros required in hash)
    difficulty: usize,

    /// Mining reward
    mining_reward: f64,

    /// Storage for blockchain data
    storage: Option<Arc<BlockchainStorage>>,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    /// Creates a new in-memory blockchain with the default settings
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_DIFFICULTY, DEFAULT_MINING_REWARD)
    }

    /// Creates a new in-memory blockchain holding only the genesis block
    pub fn with_settings(difficulty: usize, mining_reward: f64) -> Self {
        Blockchain {
            chain: Arc::new(RwLock::new(vec![Self::create_genesis_block()])),
            pending_transactions: Arc::new(Mutex::new(Vec::new())),
            difficulty: Self::capped_difficulty(difficulty),
            mining_reward,
            storage: None,
        }
    }

    /// Creates a blockchain backed by `storage`.
    ///
    /// A previously persisted chain is loaded and re-verified; an empty store
    /// is seeded with the genesis block.
    pub fn with_storage(
        storage: Arc<BlockchainStorage>,
        difficulty: usize,
        mining_reward: f64,
    ) -> Result<Self, BlockchainError> {
        let difficulty = Self::capped_difficulty(difficulty);
        let chain = match storage.load_chain() {
            Ok(chain) => {
                Self::validate_chain(&chain, difficulty)?;
                info!("Loaded blockchain of {} blocks from storage", chain.len());
                chain
            }
            Err(StorageError::NotFound(_)) => {
                info!("No existing blockchain found in storage, creating genesis block");
                let chain = vec![Self::create_genesis_block()];
                storage.save_chain(&chain)?;
                chain
            }
            Err(err) => return Err(err.into()),
        };

        Ok(Blockchain {
            chain: Arc::new(RwLock::new(chain)),
            pending_transactions: Arc::new(Mutex::new(Vec::new())),
            difficulty,
            mining_reward,
            storage: Some(storage),
        })
    }

    fn capped_difficulty(difficulty: usize) -> usize {
        if difficulty > MAX_DIFFICULTY {
            warn!("Difficulty {} is unreachable, using {}", difficulty, MAX_DIFFICULTY);
            return MAX_DIFFICULTY;
        }
        difficulty
    }

    /// Creates the genesis block (first block in the chain)
    pub fn create_genesis_block() -> Block {
        Block::genesis()
    }

    fn read_chain(&self) -> RwLockReadGuard<'_, Vec<Block>> {
        self.chain.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_chain(&self) -> RwLockWriteGuard<'_, Vec<Block>> {
        self.chain.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<Transaction>> {
        self.pending_transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn mining_reward(&self) -> f64 {
        self.mining_reward
    }

    /// Gets the last block in the chain
    pub fn latest_block(&self) -> Block {
        self.read_chain()
            .last()
            .cloned()
            .unwrap_or_else(Self::create_genesis_block)
    }

    /// Number of blocks in the chain, genesis included
    pub fn chain_len(&self) -> usize {
        self.read_chain().len()
    }

    /// Gets the entire blockchain
    pub fn get_chain(&self) -> Vec<Block> {
        self.read_chain().clone()
    }

    /// Gets the block at `index`
    pub fn get_block(&self, index: u64) -> Option<Block> {
        self.read_chain().iter().find(|block| block.index == index).cloned()
    }

    /// Gets all pending transactions
    pub fn get_pending_transactions(&self) -> Vec<Transaction> {
        self.lock_pending().clone()
    }

    /// Empties the pending pool
    pub fn clear_transactions(&self) {
        self.lock_pending().clear();
    }

    /// Admits a signed transaction into the pending pool.
    ///
    /// The sender's balance is checked against committed blocks only; other
    /// pending spends from the same address are not netted.
    pub fn add_transaction(&self, transaction: Transaction) -> Result<(), BlockchainError> {
        let (Some(from), Some(_)) = (&transaction.from_address, &transaction.to_address) else {
            return Err(BlockchainError::InvalidTransaction(
                "Transaction must include from and to address".to_string(),
            ));
        };

        if !transaction.is_valid()? {
            return Err(BlockchainError::UnsignedOrForged);
        }

        // Written this way so NaN is rejected too
        if !(transaction.amount > 0.0) {
            return Err(BlockchainError::NonPositiveAmount(transaction.amount));
        }

        let available = self.balance_of(from);
        if available < transaction.amount {
            return Err(BlockchainError::InsufficientBalance {
                required: transaction.amount,
                available,
            });
        }

        self.lock_pending().push(transaction);
        Ok(())
    }

    /// Mines the pending pool plus a reward for `reward_address` into a new block.
    pub fn mine_pending_transactions(&self, reward_address: &Address) -> Result<Block, BlockchainError> {
        let never = AtomicBool::new(false);
        self.mine_pending_transactions_with_cancel(reward_address, &never)
    }

    /// Cancellable form of [`Blockchain::mine_pending_transactions`].
    ///
    /// The pool is snapshotted up front and only the snapshot is removed once
    /// the block is committed; transactions admitted meanwhile stay pending.
    /// Snapshot entries already committed on the chain, or no longer covered
    /// by the sender's balance, are left out of the block. If the tip moves
    /// while mining (another block was committed or a peer chain adopted) the
    /// block is rebuilt against the new tip. A cancelled or failed run leaves
    /// chain and pool untouched.
    pub fn mine_pending_transactions_with_cancel(
        &self,
        reward_address: &Address,
        cancel: &AtomicBool,
    ) -> Result<Block, BlockchainError> {
        let snapshot = self.get_pending_transactions();

        loop {
            let (latest_block, mut transactions) = {
                let chain = self.read_chain();
                let latest_block = chain.last().cloned().unwrap_or_else(Self::create_genesis_block);
                (latest_block, Self::minable_transactions(&chain, &snapshot))
            };
            transactions.push(Transaction::reward(reward_address.clone(), self.mining_reward));

            let mut block = Block::new(
                latest_block.index + 1,
                Utc::now(),
                transactions,
                latest_block.hash,
            );

            if !block.mine_with_cancel(self.difficulty, cancel) {
                return Err(BlockchainError::MiningCancelled);
            }

            {
                let mut chain = self.write_chain();
                let tip_unchanged = chain.last().map(|tip| tip.hash.as_str())
                    == Some(block.previous_hash.as_str());

                if !tip_unchanged {
                    warn!(
                        "Chain tip moved while mining block {}, mining again on the new tip",
                        block.index
                    );
                    continue;
                }

                // Memory only changes once the block is durable
                if let Some(storage) = &self.storage {
                    storage.save_block(&block)?;
                    storage.flush()?;
                    info!("Saved block {} to storage", block.index);
                }

                chain.push(block.clone());
            }

            self.remove_from_pending(&snapshot);
            info!("Block {} successfully mined!", block.index);
            return Ok(block);
        }
    }

    /// The part of `snapshot` that may go into the next block on `chain`.
    ///
    /// Drops transfers already committed (or repeated within the snapshot) and
    /// transfers whose sender no longer holds the amount on `chain`.
    fn minable_transactions(chain: &[Block], snapshot: &[Transaction]) -> Vec<Transaction> {
        let mut minable: Vec<Transaction> = Vec::with_capacity(snapshot.len());

        for transaction in snapshot {
            let committed = chain
                .iter()
                .flat_map(|block| &block.transactions)
                .any(|included| included == transaction);
            if committed || minable.contains(transaction) {
                info!("Skipping transaction already on the chain: {}", transaction);
                continue;
            }

            if let Some(from) = &transaction.from_address {
                let available = Self::balance_in(chain, from);
                if available < transaction.amount {
                    warn!(
                        "Dropping pending transaction, sender now holds {}: {}",
                        available, transaction
                    );
                    continue;
                }
            }

            minable.push(transaction.clone());
        }

        minable
    }

    /// Removes one pool entry per transaction in `mined`
    fn remove_from_pending(&self, mined: &[Transaction]) {
        let mut pending = self.lock_pending();
        for transaction in mined {
            if let Some(position) = pending.iter().position(|p| p == transaction) {
                pending.remove(position);
            }
        }
    }

    /// Balance of `address` over every committed transaction.
    ///
    /// Pending transactions are not counted.
    pub fn balance_of(&self, address: &Address) -> f64 {
        Self::balance_in(&self.read_chain(), address)
    }

    fn balance_in(chain: &[Block], address: &Address) -> f64 {
        let mut balance = 0.0;

        for transaction in chain.iter().flat_map(|block| &block.transactions) {
            if transaction.from_address.as_ref() == Some(address) {
                balance -= transaction.amount;
            }
            if transaction.to_address.as_ref() == Some(address) {
                balance += transaction.amount;
            }
        }

        balance
    }

    /// Validates the blockchain
    pub fn is_valid(&self) -> bool {
        Self::validate_chain(&self.read_chain(), self.difficulty).is_ok()
    }

    /// Checks hash integrity, linkage, proof of work and every transaction of `chain`
    pub fn validate_chain(chain: &[Block], difficulty: usize) -> Result<(), BlockchainError> {
        let integrity =
            |reason: String| -> Result<(), BlockchainError> { Err(BlockchainError::ChainIntegrity(reason)) };

        match chain.first() {
            None => return integrity("Chain is empty".to_string()),
            Some(genesis) if *genesis != Self::create_genesis_block() => {
                return integrity("Genesis block does not match".to_string());
            }
            Some(_) => {}
        }

        for pair in chain.windows(2) {
            let (previous_block, current_block) = (&pair[0], &pair[1]);

            if current_block.hash != current_block.compute_hash() {
                return integrity(format!("Block {} hash does not match its contents", current_block.index));
            }

            if current_block.previous_hash != previous_block.hash {
                return integrity(format!("Block {} does not link to its predecessor", current_block.index));
            }

            if current_block.index != previous_block.index + 1 {
                return integrity(format!(
                    "Block index {} does not follow {}",
                    current_block.index, previous_block.index
                ));
            }

            if !current_block.meets_difficulty(difficulty) {
                return integrity(format!("Block {} lacks proof of work", current_block.index));
            }

            for transaction in &current_block.transactions {
                match transaction.is_valid() {
                    Ok(true) => {}
                    Ok(false) => {
                        return integrity(format!("Block {} holds a forged transaction", current_block.index));
                    }
                    Err(err) => {
                        return integrity(format!("Block {} holds an invalid transaction: {}", current_block.index, err));
                    }
                }
            }
        }

        Ok(())
    }

    /// Adopts `candidate` if it is strictly longer than the local chain and valid.
    ///
    /// Validation runs without holding the lock; the length check is repeated
    /// under the write lock so readers see either the old or the new chain.
    /// The pending pool is left as is.
    pub fn replace_chain(&self, candidate: Vec<Block>) -> Result<ReplaceOutcome, BlockchainError> {
        if candidate.len() <= self.chain_len() {
            info!("Received chain is not longer than the current chain.");
            return Ok(ReplaceOutcome::NotLonger);
        }

        if let Err(err) = Self::validate_chain(&candidate, self.difficulty) {
            warn!("The received chain is not valid: {}", err);
            return Ok(ReplaceOutcome::Invalid(err.to_string()));
        }

        let mut chain = self.write_chain();
        if candidate.len() <= chain.len() {
            info!("Local chain grew while validating, keeping it.");
            return Ok(ReplaceOutcome::NotLonger);
        }

        info!(
            "Replacing blockchain of {} blocks with the new chain of {} blocks.",
            chain.len(),
            candidate.len()
        );
        if let Some(storage) = &self.storage {
            storage.save_chain(&candidate)?;
        }

        *chain = candidate;

        Ok(ReplaceOutcome::Replaced)
    }
}
