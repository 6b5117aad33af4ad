use catalog::BatchConfig;
use serde::{Deserialize, Serialize};
use service::ServiceSettings;
use std::net::SocketAddr;
use std::time::Duration;
use store::BackendConfig;

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server bind address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum request body size in MB
    #[serde(default = "default_max_body_size_mb")]
    pub max_body_size_mb: usize,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Metrics endpoint enabled
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// External base URL of this service, used in links
    #[serde(default = "default_filter_api_url")]
    pub filter_api_url: String,

    /// Base URL of the dataset catalog
    #[serde(default = "default_dataset_api_url")]
    pub dataset_api_url: String,

    /// Base URL artefact links point at
    #[serde(default = "default_download_service_url")]
    pub download_service_url: String,

    /// Shared secret presented by the download service
    #[serde(default)]
    pub download_service_token: Option<String>,

    /// Bearer token sent to the dataset catalog
    #[serde(default)]
    pub service_auth_token: Option<String>,

    /// Bearer tokens that identify an authenticated caller
    #[serde(default)]
    pub service_tokens: Vec<String>,

    /// Build links from `X-Forwarded-Host` when present
    #[serde(default)]
    pub enable_url_rewriting: bool,

    /// Forward flexible-table requests to `flexible_api_url`
    #[serde(default)]
    pub enable_flexible_forwarding: bool,

    #[serde(default = "default_flexible_api_url")]
    pub flexible_api_url: String,

    /// Page size when `limit` is omitted
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Largest accepted `limit`
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Option ids allowed across one patch request
    #[serde(default = "default_max_patch_options")]
    pub max_patch_options: usize,

    /// Option ids per catalog lookup
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent catalog lookups per validation
    #[serde(default = "default_batch_max_workers")]
    pub batch_max_workers: usize,

    /// redb file; in-memory storage when absent
    #[serde(default)]
    pub store_path: Option<String>,

    #[serde(default = "default_catalog_timeout_secs")]
    pub catalog_timeout_secs: u64,

    #[serde(default = "default_submission_topic")]
    pub submission_topic: String,

    #[serde(default = "default_submission_queue_capacity")]
    pub submission_queue_capacity: usize,

    #[serde(default = "default_queue_send_timeout_ms")]
    pub queue_send_timeout_ms: u64,

    /// Where the relay delivers submissions; logged only when absent
    #[serde(default)]
    pub submission_webhook_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
            max_body_size_mb: default_max_body_size_mb(),
            log_level: default_log_level(),
            enable_cors: default_true(),
            metrics_enabled: default_true(),
            filter_api_url: default_filter_api_url(),
            dataset_api_url: default_dataset_api_url(),
            download_service_url: default_download_service_url(),
            download_service_token: None,
            service_auth_token: None,
            service_tokens: Vec::new(),
            enable_url_rewriting: false,
            enable_flexible_forwarding: false,
            flexible_api_url: default_flexible_api_url(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            max_patch_options: default_max_patch_options(),
            batch_size: default_batch_size(),
            batch_max_workers: default_batch_max_workers(),
            store_path: None,
            catalog_timeout_secs: default_catalog_timeout_secs(),
            submission_topic: default_submission_topic(),
            submission_queue_capacity: default_submission_queue_capacity(),
            queue_send_timeout_ms: default_queue_send_timeout_ms(),
            submission_webhook_url: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from an optional `filter-api` file and
    /// `FILTER_API__*` environment variables
    pub fn load() -> anyhow::Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("filter-api").required(false))
            .add_source(
                config::Environment::with_prefix("FILTER_API")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("service_tokens"),
            );

        let config: ServerConfig = builder.build()?.try_deserialize()?;

        if config.service_tokens.is_empty() {
            tracing::warn!("No service tokens configured, every caller is anonymous");
        }

        Ok(config)
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.bind_addr, self.port);
        Ok(addr_str.parse()?)
    }

    /// Get request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get max body size in bytes
    pub fn max_body_size(&self) -> usize {
        self.max_body_size_mb * 1024 * 1024
    }

    pub fn catalog_timeout(&self) -> Duration {
        Duration::from_secs(self.catalog_timeout_secs)
    }

    pub fn queue_send_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_send_timeout_ms)
    }

    pub fn backend(&self) -> BackendConfig {
        BackendConfig::from_path(self.store_path.as_deref())
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            batch: BatchConfig {
                batch_size: self.batch_size.max(1),
                max_workers: self.batch_max_workers.max(1),
            },
            max_patch_options: self.max_patch_options,
            download_service_url: self.download_service_url.clone(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    22100
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_body_size_mb() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_filter_api_url() -> String {
    "http://localhost:22100".to_string()
}

fn default_dataset_api_url() -> String {
    "http://localhost:22000".to_string()
}

fn default_download_service_url() -> String {
    "http://localhost:23600".to_string()
}

fn default_flexible_api_url() -> String {
    "http://localhost:27100".to_string()
}

fn default_limit() -> usize {
    20
}

fn default_max_limit() -> usize {
    1000
}

fn default_max_patch_options() -> usize {
    1000
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_max_workers() -> usize {
    10
}

fn default_catalog_timeout_secs() -> u64 {
    10
}

fn default_submission_topic() -> String {
    "filter-job-submitted".to_string()
}

fn default_submission_queue_capacity() -> usize {
    1024
}

fn default_queue_send_timeout_ms() -> u64 {
    5000
}
