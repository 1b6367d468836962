use actix_web::{web, HttpResponse, Responder};
use log::warn;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::crypto::generate_key_pair;
use crate::blockchain::{Address, Block, BlockchainError, Transaction};
use crate::node::{Node, NodeError};
use crate::p2p::PeerInfo;

/// Shared node handle for the handlers
pub type NodeData = web::Data<Node>;

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Response for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The message
    pub message: String,

    /// The index of the block that will include this transaction
    pub block_index: u64,
}

/// Request for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// Address to reward instead of the node's own
    pub miner_address: Option<String>,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: Block,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ValidationResponse {
    pub is_valid: bool,
    pub length: usize,
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's address
    pub address: String,

    /// The wallet's private key (hex encoded)
    pub private_key: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: String,

    /// Sum over committed blocks only
    pub balance: f64,
}

fn error_response(status: actix_web::http::StatusCode, message: String) -> HttpResponse {
    HttpResponse::build(status).json(serde_json::json!({ "error": message }))
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(node: NodeData) -> impl Responder {
    let chain = node.blockchain().get_chain();
    let is_valid = node.blockchain().is_valid();

    let response = ChainResponse {
        length: chain.len(),
        chain,
        is_valid,
    };

    HttpResponse::Ok().json(response)
}

/// Get all pending transactions
///
/// Returns all transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.blockchain().get_pending_transactions())
}

/// Submit a signed transaction
///
/// Adds the transaction to the pending pool and relays it to peers.
/// Signing happens client side.
#[utoipa::path(
    post,
    path = "/api/v1/transactions/new",
    request_body = Transaction,
    responses(
        (status = 201, description = "Transaction accepted", body = TransactionResponse),
        (status = 400, description = "Transaction rejected")
    )
)]
pub async fn new_transaction(node: NodeData, transaction: web::Json<Transaction>) -> impl Responder {
    match node.submit_transaction(transaction.into_inner()) {
        Ok(()) => {
            let response = TransactionResponse {
                message: "Transaction will be added to Block".to_string(),
                block_index: node.blockchain().latest_block().index + 1,
            };

            HttpResponse::Created().json(response)
        }
        Err(err) => {
            warn!("Rejected submitted transaction: {}", err);
            error_response(
                actix_web::http::StatusCode::BAD_REQUEST,
                format!("Failed to add transaction: {}", err),
            )
        }
    }
}

/// Mine a new block
///
/// Mines every pending transaction plus the reward, then announces the chain to peers
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    request_body(content = MineRequest, description = "Optional reward address override"),
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 400, description = "Invalid miner address"),
        (status = 409, description = "Mining was aborted"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn mine_block(node: NodeData, mine_req: Option<web::Json<MineRequest>>) -> impl Responder {
    let miner_address = mine_req.and_then(|req| req.into_inner().miner_address);

    let reward_address = match miner_address {
        Some(address) => match address.parse::<Address>() {
            Ok(address) => address,
            Err(err) => {
                return error_response(
                    actix_web::http::StatusCode::BAD_REQUEST,
                    format!("Invalid miner address: {}", err),
                )
            }
        },
        None => node.reward_address().clone(),
    };

    match node.mine_to(reward_address).await {
        Ok(block) => HttpResponse::Ok().json(MineResponse {
            message: "New Block Mined".to_string(),
            block,
        }),
        Err(NodeError::Blockchain(BlockchainError::MiningCancelled)) => error_response(
            actix_web::http::StatusCode::CONFLICT,
            "Mining was aborted".to_string(),
        ),
        Err(err) => error_response(
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to mine block: {}", err),
        ),
    }
}

/// Abort mining
///
/// Cancels every block currently being mined. Later mining is not affected.
#[utoipa::path(
    post,
    path = "/api/v1/mine/abort",
    responses(
        (status = 202, description = "Abort requested")
    )
)]
pub async fn abort_mining(node: NodeData) -> impl Responder {
    let aborted = node.abort_mining();
    HttpResponse::Accepted().json(serde_json::json!({ "aborted": aborted }))
}

/// Check if the blockchain is valid
///
/// Validates the entire blockchain
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = ValidationResponse)
    )
)]
pub async fn validate_chain(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(ValidationResponse {
        is_valid: node.blockchain().is_valid(),
        length: node.blockchain().chain_len(),
    })
}

/// Create a new wallet
///
/// Creates a new wallet with a random keypair
///
/// The private key must be stored by your own
#[utoipa::path(
    post,
    path = "/api/v1/wallet/new",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse)
    )
)]
pub async fn create_wallet() -> impl Responder {
    let key = generate_key_pair();

    HttpResponse::Created().json(WalletResponse {
        address: key.public_key,
        private_key: key.private_key,
    })
}

/// Get wallet balance
///
/// Returns the balance of an address over the committed chain
#[utoipa::path(
    get,
    path = "/api/v1/wallet/balance/{address}",
    params(
        ("address" = String, Path, description = "Base58 wallet address")
    ),
    responses(
        (status = 200, description = "Wallet balance retrieved successfully", body = BalanceResponse)
    )
)]
pub async fn get_wallet_balance(node: NodeData, address: web::Path<String>) -> impl Responder {
    let address = Address(address.into_inner());
    let balance = node.blockchain().balance_of(&address);

    HttpResponse::Ok().json(BalanceResponse {
        address: address.0,
        balance,
    })
}

/// List connected peers
#[utoipa::path(
    get,
    path = "/api/v1/peers",
    responses(
        (status = 200, description = "Connected peers", body = Vec<PeerInfo>)
    )
)]
pub async fn get_peers(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.p2p().peers())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::blockchain::{Blockchain, Wallet};
    use crate::p2p::P2pServer;
    use actix_web::{http::StatusCode, test, App};

    fn test_node(reward_address: &Address) -> Node {
        let p2p = P2pServer::new(Blockchain::with_settings(1, 100.0), false);
        Node::new(p2p, reward_address.clone())
    }

    #[actix_web::test]
    async fn test_get_chain() {
        let node = test_node(&Address::from("miner"));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(node))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/chain").to_request();
        let resp: ChainResponse = test::call_and_read_body_json(&app, req).await;

        assert_eq!(resp.length, 1);
        assert_eq!(resp.chain[0], Block::genesis());
        assert!(resp.is_valid);
    }

    #[actix_web::test]
    async fn test_mine_then_transfer() {
        let alice = Wallet::generate();
        let node = test_node(alice.address());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(node.clone()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/v1/mine").to_request();
        let resp: MineResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.block.index, 1);

        let mut transaction = Transaction::new(alice.address().clone(), Address::from("bob"), 40.0);
        transaction.sign(&alice).unwrap();
        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(&transaction)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::get()
            .uri("/api/v1/transactions/pending")
            .to_request();
        let pending: Vec<Transaction> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(pending, vec![transaction]);

        let req = test::TestRequest::post()
            .uri("/api/v1/mine")
            .set_json(serde_json::json!({ "miner_address": "bob" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/wallet/balance/{}", alice.address()))
            .to_request();
        let balance: BalanceResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(balance.balance, 60.0);

        let req = test::TestRequest::get()
            .uri("/api/v1/wallet/balance/bob")
            .to_request();
        let balance: BalanceResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(balance.balance, 140.0);

        let req = test::TestRequest::get().uri("/api/v1/validate").to_request();
        let validation: ValidationResponse = test::call_and_read_body_json(&app, req).await;
        assert!(validation.is_valid);
        assert_eq!(validation.length, 3);
    }

    #[actix_web::test]
    async fn test_rejects_unsigned_transaction() {
        let alice = Wallet::generate();
        let node = test_node(alice.address());
        node.mine().await.unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(node.clone()))
                .configure(configure_routes),
        )
        .await;

        let transaction = Transaction::new(alice.address().clone(), Address::from("bob"), 1.0);
        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(&transaction)
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(node.blockchain().get_pending_transactions().is_empty());
    }

    #[actix_web::test]
    async fn test_create_wallet_and_peers() {
        let node = test_node(&Address::from("miner"));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(node))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/v1/wallet/new").to_request();
        let wallet: WalletResponse = test::call_and_read_body_json(&app, req).await;
        let restored = Wallet::from_private_key_hex(&wallet.private_key).unwrap();
        assert_eq!(restored.address().0, wallet.address);

        let req = test::TestRequest::get().uri("/api/v1/peers").to_request();
        let peers: Vec<serde_json::Value> = test::call_and_read_body_json(&app, req).await;
        assert!(peers.is_empty());

        let req = test::TestRequest::post().uri("/api/v1/mine/abort").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }
}
