mod analyzer;
mod auth;
mod catalog;
mod config;
mod error;
mod extract;
mod fallback;
mod model;
mod questionnaire;
mod rate_limit;
mod recommend;
mod server;
mod store;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use diagnosis_common::llm::{LlmClient, LlmClientConfig};
use diagnosis_common::redis::RedisCache;

use config::Config;
use rate_limit::RateLimiter;
use server::AppState;
use store::RecordStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting career-diagnosis server");

    let config = Config::from_env()?;
    info!(
        bind_addr = %config.bind_addr,
        model = %config.model,
        fast_model = %config.fast_model,
        fast_budget_ms = config.fast_budget.as_millis() as u64,
        recommend_limit = config.recommend_limit,
        admin_enabled = config.admin.is_some(),
        "config loaded"
    );

    let llm_config = LlmClientConfig::from_env();
    info!(
        base_url = %llm_config.base_url,
        timeout_ms = llm_config.default_timeout.as_millis() as u64,
        max_retries = llm_config.max_retries,
        "llm client configured"
    );
    let llm = Arc::new(LlmClient::new(llm_config)?);

    let redis = RedisCache::new(config.redis_url.as_deref());
    if redis.is_available().await {
        info!("redis connected");
    } else {
        info!("redis unavailable, sessions and admin records are disabled until it returns");
    }
    let store = RecordStore::new(redis, config.record_ttl_secs, config.record_index_max);

    let limiter = RateLimiter::from_env();
    if let Some(l) = &limiter {
        info!(rps = l.rps(), "rate limiting model endpoints");
    }

    let bind_addr = config.bind_addr;
    let state = AppState::new(config, llm, store, limiter)?;
    let app = server::build_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .inspect_err(|e| tracing::error!(error = %e, "server error"))?;

    info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
