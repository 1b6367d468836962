use std::path::Path;

use log::warn;
use sled::{Batch, Db, Tree};
use thiserror::Error;

use super::block::Block;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Item not found: {0}")]
    NotFound(String),
}

/// Persistent copy of the chain.
///
/// Blocks are keyed by their big-endian index so iteration yields chain order.
pub struct BlockchainStorage {
    db: Db,
    blocks: Tree,

    /// Makes every write fail, to exercise error paths
    #[cfg(test)]
    reject_writes: std::sync::atomic::AtomicBool,
}

impl std::fmt::Debug for BlockchainStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainStorage").finish()
    }
}

impl BlockchainStorage {
    /// Opens (or creates) the database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::from_db(sled::open(path)?)
    }

    /// An in-memory database that disappears on drop
    pub fn temporary() -> Result<Self, StorageError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        let blocks = db.open_tree("blocks")?;
        Ok(Self {
            db,
            blocks,
            #[cfg(test)]
            reject_writes: std::sync::atomic::AtomicBool::new(false),
        })
    }

    #[cfg(test)]
    pub(crate) fn set_reject_writes(&self, reject: bool) {
        self.reject_writes
            .store(reject, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    fn check_writable(&self) -> Result<(), StorageError> {
        if self.reject_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(sled::Error::Unsupported("writes rejected".to_string()).into());
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn check_writable(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn encode(block: &Block) -> Result<Vec<u8>, StorageError> {
        bincode::serialize(block).map_err(|e| StorageError::SerializationError(e.to_string()))
    }

    /// Saves a single block at its index
    pub fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        self.check_writable()?;
        self.blocks.insert(block.index.to_be_bytes(), Self::encode(block)?)?;
        Ok(())
    }

    /// Replaces the stored chain with `chain`
    pub fn save_chain(&self, chain: &[Block]) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut batch = Batch::default();

        // Drop blocks beyond the new tip left over from a longer stored chain
        for key in self.blocks.iter().keys() {
            let key = key?;
            if key.as_ref() >= (chain.len() as u64).to_be_bytes().as_slice() {
                batch.remove(key);
            }
        }
        for block in chain {
            batch.insert(block.index.to_be_bytes().to_vec(), Self::encode(block)?);
        }

        self.blocks.apply_batch(batch)?;
        self.flush()
    }

    /// Loads the stored chain in index order
    pub fn load_chain(&self) -> Result<Vec<Block>, StorageError> {
        let mut blocks = Vec::new();

        for result in self.blocks.iter() {
            let (key, value) = result?;
            match bincode::deserialize::<Block>(&value) {
                Ok(block) => blocks.push(block),
                Err(e) => {
                    warn!("Stored block {:?} is unreadable: {}", key.as_ref(), e);
                    return Err(StorageError::DeserializationError(e.to_string()));
                }
            }
        }

        if blocks.is_empty() {
            return Err(StorageError::NotFound("No blocks found in storage".to_string()));
        }

        Ok(blocks)
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
