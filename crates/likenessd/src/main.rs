use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use likeness_core::{spawn_engine, OnnxProvider};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod routes;

#[actix_web::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = config::Config::from_env();
    tracing::info!(
        bind = %config.bind,
        model_dir = %config.model_dir.display(),
        workers = config.workers,
        "likenessd starting"
    );

    // Models load before the listener opens; a missing model is fatal.
    let provider = OnnxProvider::load(&config.model_dir, config.detector)
        .with_context(|| format!("failed to load models from {}", config.model_dir.display()))?;
    let engine = spawn_engine(provider, config.provider_timeout)?;
    tracing::info!(
        provider = engine.provider(),
        timeout_secs = engine.timeout().as_secs(),
        "engine ready"
    );

    let state = web::Data::new(routes::AppState::new(engine));
    let max_image_bytes = config.max_image_bytes;

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(|cfg| routes::configure(cfg, max_image_bytes))
    })
    .workers(config.workers)
    .bind(&config.bind)
    .with_context(|| format!("failed to bind {}", config.bind))?
    .run()
    .await?;

    tracing::info!("likenessd shutting down");
    Ok(())
}
