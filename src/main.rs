use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use echo_reads::integrations::{
    http_client, ClerkIdentity, OpenLibraryCatalog, ResendMailer, S3Storage, StripeBilling,
};
use echo_reads::store::PgStore;
use echo_reads::{db, router, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "echo_reads=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Echo Reads API...");

    // Load configuration
    let config = Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    tracing::info!(
        "Environment: {}, Server: {}",
        config.environment,
        config.server_address()
    );

    if config.is_production() && config.resend_api_key.is_none() {
        tracing::warn!("RESEND_API_KEY is not set, transactional emails will be dropped");
    }

    let pool = db::connect(&config).await?;
    let http = http_client().map_err(|e| anyhow::anyhow!(e))?;

    let identity = ClerkIdentity::new(&config, http.clone()).map_err(|e| anyhow::anyhow!(e))?;

    let state = AppState {
        store: Arc::new(PgStore::new(pool)),
        identity: Arc::new(identity),
        catalog: Arc::new(OpenLibraryCatalog::new(
            &config.open_library_base_url,
            http.clone(),
        )),
        billing: Arc::new(StripeBilling::new(&config.stripe_secret_key, http.clone())),
        storage: Arc::new(S3Storage::new(config.storage.clone(), http.clone())),
        mailer: Arc::new(ResendMailer::new(
            config.resend_api_key.clone(),
            &config.email_from,
            http,
        )),
        config: config.clone(),
    };

    // Configure CORS
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(Any);

    let app = router(state).layer(cors);

    // Start server
    let addr: SocketAddr = config.server_address().parse()?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
