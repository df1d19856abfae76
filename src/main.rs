mod cache;
mod config;
mod error;
mod formatter;
mod language;
mod server;
mod service;
mod transcript;

use std::sync::Arc;

use cache::TranscriptCache;
use config::Config;
use language::FallbackResolver;
use server::AppState;
use service::ResolutionService;
use transcript::YtTranscriptClient;

type MainResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() -> MainResult {
    init_logger();
    log::info!("Launching transcript service...");

    let config = Config::from_env()?;
    let cache = Arc::new(TranscriptCache::new(config.cache_max_size, config.cache_ttl)?);
    let resolver = FallbackResolver::new(&config.default_languages);
    log::info!(
        "Cache holds up to {} transcripts for {:?}, default languages {:?}",
        cache.capacity(),
        cache.ttl(),
        resolver.default_chain()
    );
    let service = ResolutionService::new(
        resolver,
        cache,
        Arc::new(YtTranscriptClient::new(config.accept_any_language)),
    );
    if config.api_key.is_none() {
        log::warn!("API_KEY is not set, transcript requests are not authenticated");
    }

    let router = server::build_router(
        AppState::new(service, config.api_key.clone()),
        &config.cors_origins,
    );
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    log::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Transcript service stopped");
    Ok(())
}

/// `RUST_LOG` wins; without it everything logs at `info`.
fn init_logger() {
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    pretty_env_logger::formatted_timed_builder()
        .parse_filters(&filters)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown requested, draining connections");
}
