use chrono::{DateTime, SubsecRound, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use super::transaction::Transaction;

/// How many nonces are tried between checks of the cancellation flag
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Previous hash stored in the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Index of the block in the chain
    pub index: u64,

    /// Creation time, milliseconds since the Unix epoch on the wire
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[schema(value_type = i64, example = 1672574400000_i64)]
    pub timestamp: DateTime<Utc>,

    /// Transactions in inclusion order
    pub transactions: Vec<Transaction>,

    /// Hash of the previous block
    pub previous_hash: String,

    /// Hash of this block
    pub hash: String,

    /// Proof of work counter
    pub nonce: u64,
}

impl Block {
    /// Creates an unmined block with nonce 0.
    ///
    /// The timestamp is truncated to milliseconds, the precision it is hashed
    /// and serialized with.
    pub fn new(
        index: u64,
        timestamp: DateTime<Utc>,
        transactions: Vec<Transaction>,
        previous_hash: String,
    ) -> Self {
        let mut block = Block {
            index,
            timestamp: timestamp.trunc_subsecs(3),
            transactions,
            previous_hash,
            hash: String::new(),
            nonce: 0,
        };
        block.hash = block.compute_hash();
        block
    }

    /// The fixed first block of every chain. It is never mined.
    pub fn genesis() -> Self {
        Block::new(0, DateTime::<Utc>::default(), Vec::new(), GENESIS_PREVIOUS_HASH.to_string())
    }

    /// Calculates the hash of the block
    ///
    /// # Returns
    ///
    /// The SHA-256 hash of the block as a hexadecimal string
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();

        hasher.update(self.index.to_string());
        hasher.update(&self.previous_hash);
        hasher.update(self.timestamp.timestamp_millis().to_string());
        for transaction in &self.transactions {
            hasher.update(transaction.hash_input());
            if let Some(signature) = &transaction.signature {
                hasher.update(&signature.0);
            }
        }
        hasher.update(self.nonce.to_string());

        format!("{:x}", hasher.finalize())
    }

    /// Whether the stored hash has `difficulty` leading zero hex digits
    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        self.hash.len() >= difficulty && self.hash.bytes().take(difficulty).all(|b| b == b'0')
    }

    /// Searches nonces until the hash meets `difficulty`
    pub fn mine(&mut self, difficulty: usize) {
        let never = AtomicBool::new(false);
        self.mine_with_cancel(difficulty, &never);
    }

    /// Like [`Block::mine`], but gives up once `cancel` is set.
    ///
    /// Returns `true` when a valid nonce was found.
    pub fn mine_with_cancel(&mut self, difficulty: usize, cancel: &AtomicBool) -> bool {
        let mut attempts = 0u64;
        self.hash = self.compute_hash();

        while !self.meets_difficulty(difficulty) {
            if attempts % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                debug!("Mining of block {} cancelled after {} attempts", self.index, attempts);
                return false;
            }

            self.nonce = self.nonce.wrapping_add(1);
            self.hash = self.compute_hash();
            attempts += 1;
        }

        info!("Block mined: {}", self);
        true
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Block #{}", self.index)?;
        writeln!(f, "  Timestamp: {}", self.timestamp.timestamp_millis())?;
        writeln!(f, "  Transactions: [")?;
        for transaction in &self.transactions {
            writeln!(f, "    {}", transaction)?;
        }
        writeln!(f, "  ]")?;
        writeln!(f, "  Previous Hash: {}", self.previous_hash)?;
        writeln!(f, "  Hash: {}", self.hash)?;
        write!(f, "  Nonce: {}", self.nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Address;

    fn reward_block() -> Block {
        let transactions = vec![
            Transaction::reward(Address::from("recipient1"), 10.0),
            Transaction::reward(Address::from("recipient2"), 20.0),
        ];
        Block::new(1, Utc::now(), transactions, "previous_hash".to_string())
    }

    #[test]
    fn test_new_block() {
        let block = reward_block();

        assert_eq!(block.index, 1);
        assert_eq!(block.nonce, 0);
        assert_eq!(block.previous_hash, "previous_hash");
        assert_eq!(block.hash, block.compute_hash());
        assert_eq!(block.hash.len(), 64); // SHA-256 hash is 64 characters in hex
    }

    #[test]
    fn test_genesis_is_deterministic() {
        let a = Block::genesis();
        let b = Block::genesis();

        assert_eq!(a, b);
        assert_eq!(a.index, 0);
        assert!(a.transactions.is_empty());
        assert_eq!(a.previous_hash, GENESIS_PREVIOUS_HASH);
    }

    #[test]
    fn test_hash_depends_on_every_field() {
        let block = reward_block();

        let mut other = block.clone();
        other.nonce += 1;
        assert_ne!(block.compute_hash(), other.compute_hash());

        let mut other = block.clone();
        other.transactions[0].amount = 11.0;
        assert_ne!(block.compute_hash(), other.compute_hash());

        let mut other = block.clone();
        other.previous_hash = "something else".to_string();
        assert_ne!(block.compute_hash(), other.compute_hash());
    }

    #[test]
    fn test_mine() {
        let mut block = reward_block();
        block.mine(2);

        assert!(block.hash.starts_with("00"));
        assert_eq!(block.hash, block.compute_hash());
        assert!(block.meets_difficulty(2));
    }

    #[test]
    fn test_mine_cancelled() {
        let mut block = reward_block();
        let cancel = AtomicBool::new(true);

        // 64 leading zeros is unreachable, so only the flag can stop this
        assert!(!block.mine_with_cancel(64, &cancel));
    }

    #[test]
    fn test_json_round_trip_preserves_hash() {
        let mut block = reward_block();
        block.mine(1);

        let json = serde_json::to_string(&block).unwrap();
        let parsed: Block = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.hash, block.hash);
        assert_eq!(parsed.compute_hash(), block.hash);
        assert!(json.contains("\"previousHash\""));
    }

    #[test]
    fn test_serialized_block_equals_original() {
        let mut block = reward_block();
        block.mine(1);

        let from_json: Block = serde_json::from_str(&serde_json::to_string(&block).unwrap()).unwrap();
        let from_bincode: Block = bincode::deserialize(&bincode::serialize(&block).unwrap()).unwrap();

        assert_eq!(from_json, block);
        assert_eq!(from_bincode, block);
        assert_eq!(block.timestamp.timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
