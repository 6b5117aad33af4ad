//! Workspace umbrella crate for the filter API.
//!
//! Re-exports the workspace crates and offers [`FilterApi`], which wires a
//! store, a dataset catalog and a submission channel into a ready router so
//! embedders and integration tests do not repeat the plumbing.
//!
//! ```rust,no_run
//! use filter_api::{FilterApi, InMemoryCatalog, ServerConfig};
//! use std::sync::Arc;
//!
//! let catalog = Arc::new(InMemoryCatalog::new());
//! let api = FilterApi::in_memory(ServerConfig::default(), catalog);
//! let router = api.router();
//! # let _ = router;
//! ```

pub use catalog::{
    BatchConfig, CatalogError, Dataset, DatasetCatalog, HttpCatalogClient, InMemoryCatalog,
    Version, VersionDimension,
};
pub use model::{
    blueprint_etag, output_etag, Blueprint, BlueprintState, DatasetRef, Dimension, ETagSelector,
    Event, EventRequest, EventType, Output, OutputState,
};
pub use queue::{Envelope, OutputQueue, QueueError, SubmissionMessage};
pub use server::{build_router, ServerConfig, ServerError, ServerState};
pub use service::{Caller, FilterServices, ServiceError, ServiceSettings};
pub use store::{BackendConfig, FilterStore, StoreError};

use axum::Router;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A fully wired filter API together with the receiving end of its
/// submission channel.
pub struct FilterApi {
    state: Arc<ServerState>,
    submissions: mpsc::Receiver<Envelope>,
}

impl FilterApi {
    /// Wire the API over `store` and `catalog`, with a submission channel
    /// sized and timed from `config`.
    pub fn new(
        config: ServerConfig,
        store: Arc<FilterStore>,
        catalog: Arc<dyn DatasetCatalog>,
    ) -> Self {
        let (producer, submissions) = queue::channel(
            config.submission_topic.clone(),
            config.submission_queue_capacity,
            config.queue_send_timeout(),
        );
        let state = ServerState::new(config, store, catalog, Arc::new(producer));
        Self {
            state: Arc::new(state),
            submissions,
        }
    }

    /// Same as [`FilterApi::new`] over a fresh in-memory store.
    pub fn in_memory(config: ServerConfig, catalog: Arc<dyn DatasetCatalog>) -> Self {
        Self::new(config, Arc::new(FilterStore::in_memory()), catalog)
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Next submission already on the channel, without waiting.
    pub fn try_next_submission(&mut self) -> Option<Envelope> {
        self.submissions.try_recv().ok()
    }

    /// Hand the receiving end to a relay task.
    pub fn into_submissions(self) -> mpsc::Receiver<Envelope> {
        self.submissions
    }
}
