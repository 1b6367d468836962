use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;

use super::crypto::{sha256_hex, verify_signature, Address, CryptoError, DigitalSignature, Wallet};

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("You cannot sign transactions for other wallets")]
    WrongWallet,

    #[error("Reward transactions cannot be signed")]
    RewardNotSignable,

    #[error("No signature in this transaction")]
    MissingSignature,

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// A signed transfer of `amount` from one address to another.
///
/// `from_address` is `None` only for mining rewards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Sender's address, null for reward transactions
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub from_address: Option<Address>,

    /// Recipient's address
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub to_address: Option<Address>,

    /// Amount being transferred
    pub amount: f64,

    /// Signature over `compute_hash()`, absent until signed
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub signature: Option<DigitalSignature>,
}

impl Transaction {
    /// Creates a new unsigned transaction
    pub fn new(from_address: Address, to_address: Address, amount: f64) -> Self {
        Transaction {
            from_address: Some(from_address),
            to_address: Some(to_address),
            amount,
            signature: None,
        }
    }

    /// Creates a mining reward transaction
    pub fn reward(to_address: Address, amount: f64) -> Self {
        Transaction {
            from_address: None,
            to_address: Some(to_address),
            amount,
            signature: None,
        }
    }

    pub fn is_reward(&self) -> bool {
        self.from_address.is_none()
    }

    /// The string the transaction hash is computed over
    pub(crate) fn hash_input(&self) -> String {
        let from = self.from_address.as_ref().map_or("null", Address::as_str);
        let to = self.to_address.as_ref().map_or("null", Address::as_str);
        format!("{}{}{}", from, to, self.amount)
    }

    /// SHA-256 of sender, recipient and amount
    pub fn compute_hash(&self) -> String {
        sha256_hex(self.hash_input().as_bytes())
    }

    /// Signs the transaction with a wallet whose address must be the sender
    pub fn sign(&mut self, wallet: &Wallet) -> Result<(), TransactionError> {
        match &self.from_address {
            None => return Err(TransactionError::RewardNotSignable),
            Some(from) if from != wallet.address() => return Err(TransactionError::WrongWallet),
            Some(_) => {}
        }

        self.signature = Some(wallet.sign(self.compute_hash().as_bytes()));
        Ok(())
    }

    /// Signs the transaction with a hex encoded private key
    pub fn sign_with_private_key(&mut self, private_key: &str) -> Result<(), TransactionError> {
        let wallet = Wallet::from_private_key_hex(private_key)?;
        self.sign(&wallet)
    }

    /// Checks the signature against the sender's address.
    ///
    /// Reward transactions are always valid.
    pub fn is_valid(&self) -> Result<bool, TransactionError> {
        let Some(from) = &self.from_address else {
            return Ok(true);
        };

        let signature = match &self.signature {
            Some(sig) if !sig.0.is_empty() => sig,
            _ => return Err(TransactionError::MissingSignature),
        };

        Ok(verify_signature(self.compute_hash().as_bytes(), signature, from))
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |a: &Option<Address>| a.as_ref().map_or("null".to_string(), |a| a.0.clone());
        write!(
            f,
            "{} -> {}: {} (signature: {})",
            show(&self.from_address),
            show(&self.to_address),
            self.amount,
            self.signature.as_ref().map_or("none", |s| s.0.as_str())
        )
    }
}
