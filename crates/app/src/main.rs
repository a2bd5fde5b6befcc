mod cascade;
mod problem;
mod reconcile;
mod router;
mod state;
mod telemetry;

use std::{net::SocketAddr, sync::Arc};

use chrono::Utc;
use tracing::info;

use herdbook_storage::Database;
use herdbook_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;
    info!(stage = "storage", url = %config.database_url, "database ready");

    if let Some(every) = config.reconcile_interval {
        let reconciler = reconcile::Reconciler::new(database.clone(), Arc::new(Utc::now));
        reconcile::ReconcileWorker::new(reconciler, every).spawn();
        info!(stage = "reconcile", interval_secs = every.as_secs(), "reconcile worker started");
    }

    let state = router::AppState::new(metrics, database);

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
