use std::sync::Arc;

use anyhow::Context;
use nimbus_backends::http_images::HttpImageRegistry;
use nimbus_backends::keygen::Ed25519KeyGenerator;
use nimbus_backends::postgres::{run_inline_migrations, PgStore};
use nimbus_backends::redis_bus::RedisDispatcher;
use nimbus_controller::{create_router, CloudController, ControllerConfig};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ControllerConfig::from_env();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let redis_url = std::env::var("REDIS_URL").context("REDIS_URL must be set")?;
    let registry_url =
        std::env::var("IMAGE_REGISTRY_URL").context("IMAGE_REGISTRY_URL must be set")?;
    let registry_token = std::env::var("IMAGE_REGISTRY_TOKEN")
        .ok()
        .filter(|t| !t.trim().is_empty());

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("database health check failed")?;
    run_inline_migrations(&pool)
        .await
        .context("failed to run migrations")?;
    tracing::info!("connected to database");

    let redis_client = redis::Client::open(redis_url).context("invalid REDIS_URL")?;
    let dispatcher = RedisDispatcher::new(redis_client, config.call_timeout);
    let images = HttpImageRegistry::new(registry_url, registry_token)
        .context("failed to build image registry client")?;

    let listen_addr = config.listen_addr.clone();
    let controller = Arc::new(CloudController::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(dispatcher),
        Arc::new(images),
        Arc::new(Ed25519KeyGenerator::new()),
        config,
    ));

    let app = create_router(controller);
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", listen_addr))?;
    tracing::info!(addr = %listen_addr, "cloud controller listening");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
