//! SDM node agent entry point.
//!
//! ```text
//! sdm-node <config.toml>
//! ```
//!
//! Startup order: config, local store, HTTP collaborators, shared
//! context, background tasks. Any failure before the tasks are up is
//! fatal; after that the agent only exits on ctrl-c.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{error, info, Level};
use uuid::Uuid;

use sdm_node::chain::ChainHttpClient;
use sdm_node::config::Config;
use sdm_node::coordinator::{SealCoordinator, SealCoordinatorHttpClient};
use sdm_node::storage::StorageHttpClient;
use sdm_node::store::MetaStore;
use sdm_node::tasks::{cleanup, group_info, seal_reconcile};
use sdm_node::throttle::EntropyMixedRandom;
use sdm_node::AppContext;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const META_DB_FILE: &str = "sdm-meta.sqlite";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let config_path = match env::args().nth(1) {
        Some(p) => p,
        None => {
            error!("usage: sdm-node <config.toml>");
            std::process::exit(1);
        }
    };

    let config = match Config::load(&config_path).and_then(Config::validate) {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!("SDM node agent starting");
    info!("Chain endpoint:   {}", config.chain.endpoint);
    info!("Storage endpoint: {}", config.storage.endpoint);
    info!("Data dir:         {}", config.data_dir.display());
    info!(
        "Pull strategy:    existed={} db={} new={}",
        config.strategy_weights.existed_files_weight,
        config.strategy_weights.db_files_weight,
        config.strategy_weights.new_files_weight
    );

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        error!("Failed to create data directory: {}", e);
        std::process::exit(1);
    }
    let store = match MetaStore::open(config.data_dir.join(META_DB_FILE)) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to open local store: {}", e);
            std::process::exit(1);
        }
    };

    let chain = Arc::new(ChainHttpClient::new(
        config.chain.endpoint.clone(),
        config.chain.account.clone(),
        HTTP_TIMEOUT,
    ));
    let storage = Arc::new(StorageHttpClient::new(
        config.storage.endpoint.clone(),
        HTTP_TIMEOUT,
    ));
    let coordinator: Option<Arc<dyn SealCoordinator>> = match &config.seal_coordinator {
        Some(sc) => {
            let node_uuid = if sc.node_uuid == "auto" {
                Uuid::new_v4().to_string()
            } else {
                sc.node_uuid.clone()
            };
            info!("Seal coordinator: {} (uuid {})", sc.endpoint, node_uuid);
            Some(Arc::new(SealCoordinatorHttpClient::new(
                sc.endpoint.clone(),
                node_uuid,
                &sc.auth_token,
                HTTP_TIMEOUT,
            )))
        }
        None => {
            info!("Seal coordinator: none, admission skips the claim round-trip");
            None
        }
    };

    let ctx = Arc::new(AppContext {
        config,
        chain,
        storage,
        coordinator,
        store,
        rng: Arc::new(EntropyMixedRandom),
        group_info: RwLock::new(None),
        node_info: RwLock::new(None),
        cancellations: Mutex::new(Default::default()),
    });

    let tasks = vec![
        group_info::create(ctx.clone()),
        seal_reconcile::create(ctx.clone()),
        cleanup::create(ctx.clone()),
    ];
    for t in &tasks {
        info!("Started task: {}", t.name());
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    for t in tasks {
        let name = t.name();
        t.stop().await;
        info!("Stopped task: {}", name);
    }
    info!("SDM node agent stopped");
}
