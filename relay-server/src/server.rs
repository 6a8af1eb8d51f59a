use axum::{Extension, Router, response::IntoResponse, serve};
use shared::config::{Config, LogFormat};
use sqlx::postgres::PgPoolOptions;
use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
};
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use crate::{
    app_state::AppState,
    middleware::request_context::{self, RequestIdState},
    routes,
    services::{
        cache::ResponseCache,
        delivery_hub::DeliveryHub,
        event_store::EventStore,
        identity_probe::{HttpIdentityProbe, IdentityProbe},
        ingestor::Ingestor,
        mapping_store::MappingStore,
        retry::{DeadLetterLog, RetryPolicy},
    },
    store::{MemoryStore, ObjectStore, PgStore},
    tracer,
};
use axum::http::{HeaderValue, StatusCode, header};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use shared::RelayError;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Initializes the tracing subscriber for logging using the provided configuration.
pub fn initialize_tracing(config: &Config) -> String {
    let env_filter = build_env_filter(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).init();
    } else {
        fmt_builder.with_ansi(true).init();
    }

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Selects the durable store: Postgres when a URL is configured, otherwise
/// the in-memory store.
///
/// # Errors
/// Returns [`RelayError::Storage`] if the pool cannot connect or the schema
/// cannot be ensured.
pub async fn create_object_store(config: &Config) -> Result<Arc<dyn ObjectStore>, RelayError> {
    match config.database.url.as_deref() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .connect(url)
                .await
                .map_err(|err| RelayError::Storage(format!("cannot connect to database: {err}")))?;
            metrics::gauge!("relay_db_pool_max_connections")
                .set(f64::from(config.database.max_connections));

            let store = PgStore::new(pool);
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("no database configured; using in-memory store (data is not durable)");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Constructs every relay component from configuration and the chosen
/// store/probe collaborators.
pub fn create_app_state(
    config: Arc<Config>,
    store: Arc<dyn ObjectStore>,
    probe: Arc<dyn IdentityProbe>,
) -> Arc<AppState> {
    let mappings = Arc::new(MappingStore::new(Arc::clone(&store), probe));
    let events = Arc::new(EventStore::new(Arc::clone(&store)));
    let cache = Arc::new(ResponseCache::new(&config.cache));
    let hub = Arc::new(DeliveryHub::new(config.stream.channel_capacity));
    let dead_letters = Arc::new(DeadLetterLog::new(config.ingest.dead_letter_capacity));
    let ingestor = Arc::new(Ingestor::new(
        Arc::clone(&mappings),
        Arc::clone(&events),
        Arc::clone(&cache),
        Arc::clone(&hub),
        Arc::clone(&dead_letters),
        RetryPolicy::from_config(&config.ingest),
    ));

    Arc::new(AppState {
        config,
        store,
        mappings,
        events,
        cache,
        hub,
        ingestor,
        dead_letters,
    })
}

/// Creates the CORS layer for the application.
pub fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_methods(AllowMethods::any())
        .allow_headers(AllowHeaders::any())
        .allow_origin(AllowOrigin::any())
}

/// Creates the main application router with all middleware and routes.
pub fn create_app_router(
    state: Arc<AppState>,
    config: Arc<Config>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let request_id_state = RequestIdState::from_config(&config);

    Router::new()
        .nest("/api", routes::api::create_api_router())
        .merge(routes::webhook::create_webhook_router())
        .merge(routes::health::create_health_router())
        .route("/metrics", axum::routing::get(metrics_endpoint))
        .layer(Extension(metrics_handle))
        .layer(create_cors_layer())
        .layer(tracer::trace_layer())
        .layer(axum::middleware::from_fn_with_state(
            request_id_state,
            request_context::assign_request_id,
        ))
        .with_state(state)
}

/// Creates the graceful shutdown signal handler.
pub async fn create_shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutting down...");
}

/// Starts the relay and binds it to the configured port.
///
/// # Errors
/// Returns an error if the store cannot be reached or the listener fails to
/// bind.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    initialize_tracing(&config);
    info!("Starting relay...");

    let metrics_handle = metrics_handle();
    let config = Arc::new(config);

    let store = create_object_store(&config).await?;
    let probe: Arc<dyn IdentityProbe> = Arc::new(HttpIdentityProbe::new(config.probe.clone())?);

    let state = create_app_state(Arc::clone(&config), store, probe);

    // Background tasks: cache sweep and stream heartbeats.
    state.cache.spawn_sweeper();
    state.hub.spawn_heartbeat(config.stream.heartbeat_seconds);

    let app = create_app_router(Arc::clone(&state), Arc::clone(&config), metrics_handle);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    serve(listener, app)
        .with_graceful_shutdown(create_shutdown_signal())
        .await?;

    Ok(())
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::services::identity_probe::testing::ScriptedProbe;

    /// Config tuned for tests: known verify token, fast retries.
    pub fn test_config() -> Config {
        let mut config = Config::default();
        config.webhook.verify_token = "test-secret".to_string();
        config.ingest.retry_base_delay_ms = 1;
        config.ingest.retry_max_delay_ms = 2;
        config.ingest.max_attempts = 2;
        config
    }

    /// State on the in-memory store with a scripted probe returned for
    /// further scripting.
    pub fn test_state_with_probe() -> (Arc<AppState>, Arc<ScriptedProbe>) {
        let probe = Arc::new(ScriptedProbe::new());
        let state = create_app_state(
            Arc::new(test_config()),
            Arc::new(MemoryStore::new()),
            Arc::clone(&probe) as Arc<dyn IdentityProbe>,
        );
        (state, probe)
    }

    /// State on the in-memory store with an empty scripted probe.
    pub fn test_state() -> Arc<AppState> {
        test_state_with_probe().0
    }
}
