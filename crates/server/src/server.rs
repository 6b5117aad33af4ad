//! Server initialization and routing
//!
//! This module handles the Axum server setup including:
//! - Router configuration with all API endpoints
//! - Middleware stack (caller identity, forwarding, logging, compression, etc.)
//! - The submission relay task
//! - Graceful shutdown handling

use crate::config::ServerConfig;
use crate::metrics::{init_metrics, serve_metrics};
use crate::middleware::{forward_flexible, identify_caller, log_requests, request_id};
use crate::routes::not_found;
use crate::routes::{dimensions, filters, health, outputs};
use crate::state::ServerState;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use queue::{relay, LogSink, MessageSink, WebhookSink};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Build the Axum router with all routes and middleware
///
/// Routes are divided into:
/// - Public routes: /health, /metrics
/// - API routes: /filters and /filter-outputs, behind caller identification
///   and flexible-table forwarding
///
/// The request timeout also bounds every catalog and store call a handler
/// makes; dropping the handler future cancels them.
pub fn build_router(state: Arc<ServerState>) -> Router {
    let cors = if state.config.enable_cors {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any)
    } else {
        CorsLayer::new()
    };

    let mut public_routes = Router::new().route("/health", get(health::health_check));
    if state.config.metrics_enabled {
        public_routes = public_routes.route("/metrics", get(serve_metrics));
    }

    let api_routes = Router::new()
        // Blueprints
        .route("/filters", post(filters::create_filter))
        .route(
            "/filters/{id}",
            get(filters::get_filter).put(filters::update_filter),
        )
        // Dimensions
        .route("/filters/{id}/dimensions", get(dimensions::list_dimensions))
        .route(
            "/filters/{id}/dimensions/{name}",
            get(dimensions::get_dimension)
                .post(dimensions::add_dimension)
                .delete(dimensions::remove_dimension)
                .patch(dimensions::patch_dimension),
        )
        // Options
        .route(
            "/filters/{id}/dimensions/{name}/options",
            get(dimensions::list_options),
        )
        .route(
            "/filters/{id}/dimensions/{name}/options/{option}",
            get(dimensions::get_option)
                .post(dimensions::add_option)
                .delete(dimensions::remove_option),
        )
        // Outputs
        .route(
            "/filter-outputs/{id}",
            get(outputs::get_output).put(outputs::update_output),
        )
        .route("/filter-outputs/{id}/events", post(outputs::add_event))
        .layer(from_fn_with_state(state.clone(), forward_flexible))
        .layer(from_fn_with_state(state.clone(), identify_caller));

    // Outermost first.
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(request_id))
        .layer(from_fn(log_requests))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(state.config.timeout_secs),
        ))
        .layer(DefaultBodyLimit::max(state.config.max_body_size()));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .fallback(not_found)
        .layer(middleware)
        .with_state(state)
}

/// Start the filter API server
///
/// Initializes logging and metrics, opens the store, connects the catalog
/// client, starts the submission relay and serves until SIGTERM or Ctrl+C.
pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .json()
        .init();

    if config.metrics_enabled {
        init_metrics();
    }

    let (state, submissions) = ServerState::from_config(config.clone())?;
    let state = Arc::new(state);

    let sink: Box<dyn MessageSink> = match &config.submission_webhook_url {
        Some(url) if !url.trim().is_empty() => {
            Box::new(WebhookSink::new(url.clone(), config.queue_send_timeout()))
        }
        _ => Box::new(LogSink),
    };
    let relay_task = tokio::spawn(async move {
        let delivered = relay(submissions, sink.as_ref()).await;
        tracing::info!(delivered, "Submission relay stopped");
    });

    let app = build_router(state);
    let addr: SocketAddr = config.socket_addr()?;

    tracing::info!(
        addr = %addr,
        store = ?config.backend(),
        dataset_api_url = %config.dataset_api_url,
        "Starting filter API server"
    );
    tracing::info!(
        timeout_secs = config.timeout_secs,
        max_body_size_mb = config.max_body_size_mb,
        cors = config.enable_cors,
        metrics = config.metrics_enabled,
        flexible_forwarding = config.enable_flexible_forwarding,
        url_rewriting = config.enable_url_rewriting,
        "Server options"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router held the last producer; the relay drains what is left and stops.
    if let Err(e) = relay_task.await {
        tracing::warn!(error = %e, "Submission relay task failed");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Shutdown signal handler
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
