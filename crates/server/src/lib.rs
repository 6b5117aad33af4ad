//! Filter API server - HTTP REST API for filter blueprints and outputs
//!
//! This crate exposes the filter services over HTTP:
//!
//! - **Blueprints**: create, read, update and submit filter blueprints
//! - **Dimensions**: add, remove and patch dimension option selections
//! - **Outputs**: read outputs, record download artefacts and lifecycle events
//! - **Health & Metrics**: liveness probe and Prometheus-compatible metrics
//!
//! # Features
//!
//! - **Optimistic concurrency**: every mutation requires `If-Match`; responses
//!   carry the new `ETag`
//! - **Caller identity**: bearer service tokens and a download-service secret
//! - **Middleware**: compression, CORS, request ID tracking, structured logging,
//!   optional forwarding of flexible-table requests
//! - **Configuration**: `FILTER_API__*` environment variables and an optional
//!   `filter-api` config file
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use server::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::load()?;
//!     server::start_server(config).await?;
//!     Ok(())
//! }
//! ```
//!
//! # API Endpoints
//!
//! - `GET /health` - Liveness probe
//! - `GET /metrics` - Prometheus metrics
//! - `POST /filters` - Create a blueprint (`?submitted=true` to submit)
//! - `GET|PUT /filters/{id}` - Read or update a blueprint
//! - `GET /filters/{id}/dimensions` - List dimensions
//! - `GET|POST|DELETE|PATCH /filters/{id}/dimensions/{name}` - One dimension
//! - `GET /filters/{id}/dimensions/{name}/options` - List options
//! - `GET|POST|DELETE /filters/{id}/dimensions/{name}/options/{option}` - One option
//! - `GET|PUT /filter-outputs/{id}` - Read or update an output
//! - `POST /filter-outputs/{id}/events` - Append an output event

pub mod config;
pub mod error;
pub mod links;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{build_router, start_server};
pub use state::ServerState;
