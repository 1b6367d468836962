use serde::{Deserialize, Serialize};

use crate::blockchain::{Address, Block, KeyPair, Transaction};

use super::P2pError;

/// Messages exchanged between peers.
///
/// Each frame is a JSON object whose `type` field names the variant in
/// kebab-case, e.g. `{"type":"request-balance","public_key":"..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PeerMessage {
    /// Ask for the full chain
    RequestChain,

    /// A full chain, offered for replacement
    Chain { chain: Vec<Block> },

    /// A signed transaction for the pending pool
    Transaction { transaction: Transaction },

    /// Empty the pending pool
    ClearTransactions,

    RequestTransactions,

    Transactions { transactions: Vec<Transaction> },

    RequestBalance { public_key: Address },

    Balance { balance: f64 },

    GenerateWallet,

    /// Reply to `generate-wallet`
    Key { key: KeyPair },

    /// Have the receiving node sign and submit a transfer with the given key.
    /// Only honored when custodial signing is enabled.
    MakeTransaction {
        from: Address,
        to: Address,
        amount: f64,
        private_key: String,
    },

    /// Free-form note, only logged
    Message { data: serde_json::Value },

    /// Any `type` this node does not know
    #[serde(other)]
    Unknown,
}

impl PeerMessage {
    pub fn from_text(text: &str) -> Result<Self, P2pError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_text(&self) -> Result<String, P2pError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The wire `type` of this message
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::RequestChain => "request-chain",
            PeerMessage::Chain { .. } => "chain",
            PeerMessage::Transaction { .. } => "transaction",
            PeerMessage::ClearTransactions => "clear-transactions",
            PeerMessage::RequestTransactions => "request-transactions",
            PeerMessage::Transactions { .. } => "transactions",
            PeerMessage::RequestBalance { .. } => "request-balance",
            PeerMessage::Balance { .. } => "balance",
            PeerMessage::GenerateWallet => "generate-wallet",
            PeerMessage::Key { .. } => "key",
            PeerMessage::MakeTransaction { .. } => "make-transaction",
            PeerMessage::Message { .. } => "message",
            PeerMessage::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unit_messages_on_the_wire() {
        assert_eq!(
            PeerMessage::RequestChain.to_text().unwrap(),
            r#"{"type":"request-chain"}"#
        );
        assert_eq!(
            PeerMessage::ClearTransactions.to_text().unwrap(),
            r#"{"type":"clear-transactions"}"#
        );
    }

    #[test]
    fn test_kind_matches_wire_type() {
        let messages = vec![
            PeerMessage::RequestChain,
            PeerMessage::Chain { chain: vec![Block::genesis()] },
            PeerMessage::RequestTransactions,
            PeerMessage::Balance { balance: 1.5 },
            PeerMessage::GenerateWallet,
            PeerMessage::RequestBalance { public_key: Address::from("abc") },
        ];

        for message in messages {
            let value: serde_json::Value = serde_json::from_str(&message.to_text().unwrap()).unwrap();
            assert_eq!(value["type"], message.kind());
        }
    }

    #[test]
    fn test_parse_request_balance() {
        let message = PeerMessage::from_text(r#"{"type":"request-balance","public_key":"abc"}"#).unwrap();
        assert_eq!(message, PeerMessage::RequestBalance { public_key: Address::from("abc") });
    }

    #[test]
    fn test_parse_make_transaction() {
        let text = json!({
            "type": "make-transaction",
            "from": "alice",
            "to": "bob",
            "amount": 5,
            "private_key": "00ff"
        })
        .to_string();

        match PeerMessage::from_text(&text).unwrap() {
            PeerMessage::MakeTransaction { from, to, amount, private_key } => {
                assert_eq!(from, Address::from("alice"));
                assert_eq!(to, Address::from("bob"));
                assert_eq!(amount, 5.0);
                assert_eq!(private_key, "00ff");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_chain_message_keeps_block_fields() {
        let text = PeerMessage::Chain { chain: vec![Block::genesis()] }.to_text().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        let genesis = &value["chain"][0];
        assert_eq!(genesis["index"], 0);
        assert_eq!(genesis["previousHash"], "0");
        assert_eq!(genesis["hash"], Block::genesis().hash);
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let message = PeerMessage::from_text(r#"{"type":"register-peer","peer":"ws://x"}"#).unwrap();
        assert_eq!(message, PeerMessage::Unknown);
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        assert!(matches!(PeerMessage::from_text("not json"), Err(P2pError::Protocol(_))));
        assert!(matches!(
            PeerMessage::from_text(r#"{"type":"request-balance"}"#),
            Err(P2pError::Protocol(_))
        ));
        assert!(PeerMessage::from_text(r#"{"no_type":true}"#).is_err());
    }
}
