use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use loancrm::{
    auth::jwt::JwtService,
    config::AppConfig,
    contacts::{ContactDirectory, LeadConnectorClient},
    db,
    routes::create_router,
    state::AppState,
    storage::{ObjectStorage, S3Storage},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        s3_bucket = %config.s3_bucket,
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    db::run_migrations(&pool)?;

    let storage: Arc<dyn ObjectStorage> = Arc::new(S3Storage::connect(&config).await?);
    let contacts: Arc<dyn ContactDirectory> = Arc::new(LeadConnectorClient::from_config(&config)?);
    let jwt = JwtService::from_config(&config)?;

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let state = AppState::new(pool, config, storage, contacts, jwt);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
