use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use servicebay::config::AppConfig;
use servicebay::db::SqliteStore;
use servicebay::handlers;
use servicebay::services::catalog::Catalog;
use servicebay::services::payments::{HttpPaymentGateway, PaymentService};
use servicebay::services::scheduling::SchedulingService;
use servicebay::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let store = Arc::new(SqliteStore::open(&config.database_url)?);

    if config.payment_api_key.is_empty() {
        tracing::warn!("PAYMENT_API_KEY is not set, payment gateway requests are unauthenticated");
    }
    if config.payment_webhook_secret.is_empty() {
        tracing::warn!("PAYMENT_WEBHOOK_SECRET is not set, webhook signatures are not checked");
    }
    let gateway = HttpPaymentGateway::new(
        config.payment_gateway_url.clone(),
        config.payment_api_key.clone(),
    );

    tracing::info!(
        business_hours = %config.scheduling.business_hours.to_human_readable(),
        granularity = config.scheduling.slot_granularity_minutes,
        tax_rate = %config.scheduling.tax_rate,
        "scheduling configured"
    );

    let state = Arc::new(AppState {
        config: config.clone(),
        scheduler: SchedulingService::new(
            Catalog::new(store.clone()),
            store.clone(),
            store.clone(),
            config.scheduling.clone(),
        ),
        payments: PaymentService::new(Arc::new(gateway), store),
    });

    let app = handlers::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
