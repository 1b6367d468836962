use actix_web::web;

use super::handlers;

/// Mounts the node control API under `/api/v1`
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/validate", web::get().to(handlers::validate_chain))
            .route("/peers", web::get().to(handlers::get_peers))
            .service(
                web::scope("/transactions")
                    .route("/pending", web::get().to(handlers::get_pending_transactions))
                    .route("/new", web::post().to(handlers::new_transaction)),
            )
            .service(
                web::scope("/mine")
                    .route("", web::post().to(handlers::mine_block))
                    .route("/abort", web::post().to(handlers::abort_mining)),
            )
            .service(
                web::scope("/wallet")
                    .route("/new", web::post().to(handlers::create_wallet))
                    .route("/balance/{address}", web::get().to(handlers::get_wallet_balance)),
            ),
    );
}
