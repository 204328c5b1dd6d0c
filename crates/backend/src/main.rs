use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod drive;
mod error;
mod events;
mod handlers;
mod mail;
mod models;
mod normalize;
mod parser;
mod reports;
mod retry;
mod schema;
mod sync;

use config::AppConfig;
use drive::{gdrive::DriveStore, ObjectStore};
use events::EventBus;
use handlers::AppState;
use mail::processor::EmailProcessor;
use reports::{cache, repository::PgReportDataRepository, ReportService};
use retry::RetryPolicy;
use sync::{records::PgRecordStore, state::SyncStateStore, SyncEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    let _log_guard = init_tracing(&config)?;

    let pool = db::establish_connection_pool(&config.db_dsn)?;

    let bus = Arc::new(EventBus::new());
    let dataset_cache = cache::build_cache(&config).await?;
    ReportService::subscribe_invalidation(&bus, Arc::clone(&dataset_cache));

    let store: Arc<dyn ObjectStore> = Arc::new(DriveStore::from_config(&config).await?);
    let gateway = mail::build_gateway(&config).await?;

    let processor = Arc::new(EmailProcessor::new(
        gateway,
        Arc::clone(&store),
        config.mail_subject_pattern.clone(),
        config.attachments_folder_id.clone(),
        config.required_table_columns.clone(),
        RetryPolicy::default(),
    ));

    let sync_engine = Arc::new(SyncEngine::new(
        store,
        Arc::new(PgRecordStore::new(pool.clone())),
        SyncStateStore::new(config.sync_state_path.clone()),
        Arc::clone(&bus),
        config.branch_id,
        RetryPolicy::default(),
    ));

    let reports = Arc::new(ReportService::new(
        Arc::new(PgReportDataRepository::new(pool)),
        dataset_cache,
        Duration::from_secs(config.cache_ttl_minutes * 60),
        config.branch_id,
        config.allowed_branches.clone(),
        config.arrival_days_ahead,
    ));

    let state = Arc::new(AppState {
        processor,
        sync: sync_engine,
        reports,
        arrival_days_ahead: config.arrival_days_ahead,
        birthday_days_ahead: config.birthday_days_ahead,
    });

    let app = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/process-emails", post(handlers::process_emails))
        .route("/emails/search", get(handlers::search_emails))
        .route("/extraccion_generacion", post(handlers::sync_generation))
        .route("/reports/cache/metrics", get(handlers::cache_metrics))
        .route("/reports/:dataset_id", get(handlers::get_report))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Console logging always; a JSON file sink when `LOG_FILE_PATH` is set.
fn init_tracing(
    config: &AppConfig,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.log_file_path {
        Some(path) => {
            let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            std::fs::create_dir_all(directory)?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "service.log".to_string());

            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(writer),
                )
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            Ok(None)
        }
    }
}
