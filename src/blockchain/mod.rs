// Blockchain module
//
// This module contains the ledger implementation including:
// - Cryptography utilities
// - Transaction structure
// - Block structure and proof of work
// - Blockchain structure (pending pool, balances, validation, chain replacement)
// - Persistent storage

pub mod block;
pub mod chain;
pub mod crypto;
pub mod storage;
pub mod transaction;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Blockchain, BlockchainError, ReplaceOutcome};
pub use crypto::{Address, DigitalSignature, KeyPair, Wallet};
pub use storage::{BlockchainStorage, StorageError};
pub use transaction::{Transaction, TransactionError};
