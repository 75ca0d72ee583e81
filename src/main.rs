//! Florence Patient Monitoring API
//!
//! Main entry point: configuration, database, engine wiring and the HTTP
//! server.

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;

use florence::api;
use florence::config::Config;
use florence::engine::RiskEngine;
use florence::store::PatientStore;

#[derive(Parser)]
#[command(name = "florence", about = "Patient Monitoring and AI Triage API")]
struct Cli {
    /// Override the configured bind host
    #[arg(long)]
    host: Option<String>,
    /// Override the configured bind port
    #[arg(long)]
    port: Option<u16>,
    /// Override the configured database URL
    #[arg(long)]
    database_url: Option<String>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }

    let store = PatientStore::connect(&config.database.url)
        .await
        .context("failed to open database")?;
    let engine = RiskEngine::from_config(&config.ai).context("failed to build risk engine")?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        strategy = engine.strategy_name(),
        "starting florence"
    );

    let store = web::Data::new(store);
    let engine = web::Data::new(engine);
    let bind = (config.server.host.clone(), config.server.port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin("http://localhost:3000")
            .allowed_origin("http://127.0.0.1:3000")
            .allow_any_method()
            .allow_any_header()
            .supports_credentials();
        App::new()
            .app_data(store.clone())
            .app_data(engine.clone())
            .wrap(cors)
            .wrap(TracingLogger::default())
            .configure(api::configure)
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}
