// src/main.rs
use chrono::Duration as ChronoDuration;
use env_logger::{Builder, Env};
use finmate::api::{self, AppState};
use finmate::assistant::{Assistant, ProxyCompletion, TextCompletion};
use finmate::auth::TokenKeys;
use finmate::config::{Config, StoreBackend};
use finmate::db::{MemoryStore, ScyllaStore, Store};
use finmate::prices::{with_cache, AlphaVantageQuotes, CoinGeckoPrices, PriceSource, PriceSources};
use log::{error, info, warn};
use reqwest::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Duration;

const AI_TIMEOUT_SECS: u64 = 30;

fn price_sources(config: &Config, client: Client) -> PriceSources {
    let cache_ttl = ChronoDuration::seconds(config.price_cache_secs);
    let stock: Arc<dyn PriceSource> = Arc::new(AlphaVantageQuotes::new(
        client.clone(),
        config.alpha_vantage_key.clone(),
        config.alpha_vantage_url.clone(),
    ));
    let crypto: Arc<dyn PriceSource> =
        Arc::new(CoinGeckoPrices::new(client, config.coingecko_url.clone()));
    PriceSources::new(with_cache(stock, cache_ttl), with_cache(crypto, cache_ttl))
}

fn assistant(config: &Config) -> Result<Assistant, reqwest::Error> {
    let completion = match &config.ai_proxy_url {
        Some(url) => {
            let client = Client::builder()
                .timeout(Duration::from_secs(AI_TIMEOUT_SECS))
                .build()?;
            let proxy: Arc<dyn TextCompletion> = Arc::new(ProxyCompletion::new(
                client,
                url.clone(),
                config.ai_api_key.clone(),
                config.ai_model.clone(),
            ));
            Some(proxy)
        }
        None => {
            info!("AI_PROXY_URL not set, assistant will answer with canned summaries.");
            None
        }
    };
    Ok(Assistant::new(completion))
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let store: Arc<dyn Store> = match config.store_backend {
        StoreBackend::Scylla => match ScyllaStore::connect(&config.scylla_node).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("Failed to initialize database: {}", e);
                return;
            }
        },
        StoreBackend::Memory => {
            warn!("Using in-memory store, data will not survive a restart.");
            Arc::new(MemoryStore::new())
        }
    };
    info!("Connected to database...");

    let client = match Client::builder()
        .timeout(Duration::from_secs(config.price_timeout_secs))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            return;
        }
    };
    if config.alpha_vantage_key.is_none() {
        warn!("ALPHA_VANTAGE_KEY not set, stock holdings will be valued at cost.");
    }

    let assistant = match assistant(&config) {
        Ok(assistant) => assistant,
        Err(e) => {
            error!("Failed to build AI client: {}", e);
            return;
        }
    };

    let state = Arc::new(AppState {
        store,
        prices: price_sources(&config, client),
        assistant,
        tokens: TokenKeys::new(
            config.jwt_secret.clone(),
            ChronoDuration::hours(config.token_ttl_hours),
        ),
    });

    let routes = api::routes(state);
    let addr = SocketAddr::new(config.bind_addr, config.port);
    info!("Server running on http://{}", addr);
    warp::serve(routes).run(addr).await;
}
