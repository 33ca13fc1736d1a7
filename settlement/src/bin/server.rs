//! Settlement HTTP server binary

use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use settlement::{api, config::LogFormat, Config, SettlementEngine};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        data_dir = ?config.ledger.data_dir,
        balance_mode = ?config.ledger.balance.mode,
        "Starting settlement server"
    );

    let engine = Arc::new(
        SettlementEngine::open(&config)
            .await
            .context("Failed to open ledger")?,
    );
    let engine_data = web::Data::new(engine.clone());

    tracing::info!(addr = %config.http_listen_addr, "Starting HTTP server");

    HttpServer::new(move || {
        App::new()
            .app_data(engine_data.clone())
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(api::configure_routes)
    })
    .bind(&config.http_listen_addr)
    .with_context(|| format!("Failed to bind {}", config.http_listen_addr))?
    .run()
    .await?;

    tracing::info!("Shutting down settlement server");
    engine.shutdown().await?;
    Ok(())
}
