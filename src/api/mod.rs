// API module
//
// HTTP control surface of the node, documented through OpenAPI

pub mod handlers;
pub mod routes;

use utoipa::OpenApi;

use crate::blockchain;
use crate::p2p;

// Re-export main components for easier access
pub use routes::configure_routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_chain,
        handlers::get_pending_transactions,
        handlers::new_transaction,
        handlers::mine_block,
        handlers::abort_mining,
        handlers::validate_chain,
        handlers::create_wallet,
        handlers::get_wallet_balance,
        handlers::get_peers
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::Address,
            blockchain::DigitalSignature,
            blockchain::KeyPair,
            p2p::PeerInfo,
            handlers::ChainResponse,
            handlers::TransactionResponse,
            handlers::MineRequest,
            handlers::MineResponse,
            handlers::ValidationResponse,
            handlers::WalletResponse,
            handlers::BalanceResponse
        )
    ),
    tags(
        (name = "ledger", description = "Ledger node API endpoints")
    ),
    info(
        title = "Ledger Node API",
        version = "1.0.0",
        description = "Control API of a peer-to-peer proof-of-work ledger node",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
pub struct ApiDoc;
