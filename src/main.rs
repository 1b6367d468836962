use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use std::sync::Arc;

mod api;
mod blockchain;
mod config;
mod node;
mod p2p;

use blockchain::{Address, Blockchain, BlockchainStorage, Wallet};
use config::NodeConfig;
use node::Node;
use p2p::P2pServer;

// Open the persisted chain when a data directory is configured, otherwise start in memory
fn initialize_blockchain(config: &NodeConfig) -> Result<Blockchain> {
    let Some(data_dir) = &config.data_dir else {
        info!("No data directory configured, keeping the chain in memory");
        return Ok(Blockchain::with_settings(config.difficulty, config.mining_reward));
    };

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    let storage = BlockchainStorage::new(data_dir)
        .with_context(|| format!("Failed to open storage at {}", data_dir.display()))?;
    let blockchain = Blockchain::with_storage(Arc::new(storage), config.difficulty, config.mining_reward)
        .context("Stored chain could not be loaded")?;

    info!("Loaded blockchain from storage at {}", data_dir.display());
    Ok(blockchain)
}

// Use the configured reward address, or create a wallet and print its key once
fn resolve_reward_address(config: &NodeConfig) -> Result<Address> {
    if let Some(address) = &config.reward_address {
        let address: Address = address.parse().context("Invalid reward address")?;
        return Ok(address);
    }

    let wallet = Wallet::generate();
    warn!("No reward address configured, generated wallet {}", wallet.address());
    warn!("Reward wallet private key: {}", wallet.export_private_key_hex());
    Ok(wallet.address().clone())
}

#[actix_web::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = NodeConfig::parse();

    let blockchain = initialize_blockchain(&config)?;
    let reward_address = resolve_reward_address(&config)?;

    if config.insecure_custodial_signing {
        warn!("Custodial signing is enabled: peers may send private keys to this node");
    }

    let p2p = P2pServer::new(blockchain, config.insecure_custodial_signing);
    p2p.listen(config.p2p_addr())
        .await
        .context("Failed to start peer-to-peer server")?;
    p2p.connect_all_peers(&config.peer_urls());

    let node = Node::new(p2p, reward_address);

    if config.mine_on_start {
        let node = node.clone();
        tokio::spawn(async move {
            if let Err(err) = node.mine().await {
                error!("Mining on start failed: {}", err);
            }
        });
    }

    let node = web::Data::new(node);
    let (host, port) = config.http_addr();
    info!("Starting HTTP server at http://{}:{}", host, port);

    // Start HTTP server
    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(node.clone())
            // API routes
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", api::ApiDoc::openapi()),
            )
    })
    .bind((host, port))?
    .run()
    .await?;

    Ok(())
}
