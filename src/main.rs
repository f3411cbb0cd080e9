use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use coingate::api::{self, CoinApi, Freshness};
use coingate::cache::Gateway;
use coingate::upstream::{Fetcher, HttpFetcher};
use coingate::{Config, Request, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("coingate=info")),
        )
        .with_target(true)
        .init();

    let config = Config::parse();
    config.validate()?;

    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(config.upstream_timeout())?);
    let gateway = Gateway::new(config.retry_policy(), config.upstream_timeout());
    let api = Arc::new(CoinApi::new(
        gateway.clone(),
        config.endpoints()?,
        fetcher,
        Freshness {
            coins: config.coins_ttl(),
            global: config.global_ttl(),
        },
    ));
    let pipeline = Arc::new(api::pipeline(&api));

    info!(
        upstream = %config.upstream_url,
        coins_ttl = ?config.coins_ttl(),
        global_ttl = ?config.global_ttl(),
        max_attempts = config.max_attempts,
        max_retry_after = ?config.retry_policy().max_delay,
        "starting coingate"
    );

    let server = Server::bind(&config.listen).await?;
    server
        .run_until(
            move |req: Request| {
                let pipeline = Arc::clone(&pipeline);
                async move { pipeline.handle(req).await }
            },
            async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "failed to listen for shutdown signal");
                }
            },
        )
        .await?;

    let stats = gateway.stats();
    info!(
        entries = gateway.len(),
        hits = stats.hits,
        misses = stats.misses,
        coalesced = stats.coalesced,
        failures = stats.failures,
        "shutting down"
    );
    gateway.clear();

    Ok(())
}
