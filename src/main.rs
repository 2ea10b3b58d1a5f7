use axum::{routing::get, Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;

use voice_ledger::config;
use voice_ledger::ledger::{start_billing_sync_worker, LedgerConfig, LedgerService};
use voice_ledger::routes::api_routes;
use voice_ledger::telemetry;

async fn root() -> &'static str {
    "Voice Ledger API"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let pool = PgPoolOptions::new()
        .max_connections(*config::DATABASE_MAX_CONNECTIONS)
        .connect(config::DATABASE_URL.as_str())
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(Box::new(error) as Box<dyn std::error::Error>);
        }
    }

    let ledger_config = LedgerConfig::from_env();
    tracing::info!(
        reference_offset_seconds = ledger_config.clock.zone().local_minus_utc(),
        max_commit_attempts = ledger_config.max_commit_attempts,
        "voice ledger configured"
    );
    let service = LedgerService::postgres(pool.clone(), ledger_config);
    let (sync_handle, _sync_worker) =
        start_billing_sync_worker(service.clone(), *config::BILLING_SYNC_QUEUE_DEPTH);

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/", get(root))
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(service))
        .layer(Extension(sync_handle));

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
