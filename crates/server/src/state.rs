use crate::config::ServerConfig;
use catalog::{DatasetCatalog, HttpCatalogClient};
use queue::{channel, Envelope, OutputQueue};
use service::FilterServices;
use std::sync::Arc;
use store::FilterStore;
use tokio::sync::mpsc;

/// Shared application state
#[derive(Clone)]
pub struct ServerState {
    /// Server configuration
    pub config: Arc<ServerConfig>,

    /// Blueprint, dimension and output services
    pub services: FilterServices,

    /// Store, consulted directly by the forwarding middleware
    pub store: Arc<FilterStore>,

    /// Dataset catalog, consulted directly by the forwarding middleware
    pub catalog: Arc<dyn DatasetCatalog>,

    /// Client used to proxy flexible-table requests
    pub http: reqwest::Client,
}

impl ServerState {
    /// Wire state over explicit collaborators.
    pub fn new(
        config: ServerConfig,
        store: Arc<FilterStore>,
        catalog: Arc<dyn DatasetCatalog>,
        queue: Arc<dyn OutputQueue>,
    ) -> Self {
        let services = FilterServices::new(
            store.clone(),
            catalog.clone(),
            queue,
            config.service_settings(),
        );
        Self {
            config: Arc::new(config),
            services,
            store,
            catalog,
            http: reqwest::Client::new(),
        }
    }

    /// Build state from configuration: the configured store backend, an HTTP
    /// catalog client and a bounded submission channel whose receiving end is
    /// returned for the relay task.
    pub fn from_config(config: ServerConfig) -> anyhow::Result<(Self, mpsc::Receiver<Envelope>)> {
        let store = Arc::new(FilterStore::open(&config.backend())?);

        let mut client = HttpCatalogClient::with_timeout(
            config.dataset_api_url.clone(),
            config.catalog_timeout(),
        );
        if let Some(token) = &config.service_auth_token {
            client = client.with_service_token(token.clone());
        }

        let (producer, receiver) = channel(
            config.submission_topic.clone(),
            config.submission_queue_capacity,
            config.queue_send_timeout(),
        );

        let state = Self::new(config, store, Arc::new(client), Arc::new(producer));
        Ok((state, receiver))
    }
}
