//! HTTP client for the dataset catalog API.

use std::time::Duration;

use async_trait::async_trait;
use model::DatasetRef;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{CatalogError, Dataset, DatasetCatalog, Version, VersionDimension};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct OptionItem {
    option: String,
}

/// Which not-found error a 404 from a given endpoint means.
#[derive(Debug, Clone, Copy)]
enum Missing {
    Dataset,
    Version,
}

/// Dataset catalog reached over HTTP.
///
/// Requests carry the service's own bearer token so that unpublished
/// versions are returned; the visibility rule for unauthenticated callers
/// is applied client-side.
#[derive(Clone)]
pub struct HttpCatalogClient {
    base_url: String,
    service_token: Option<String>,
    client: reqwest::Client,
}

impl HttpCatalogClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    #[must_use]
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into(),
            service_token: None,
            client,
        }
    }

    #[must_use]
    pub fn with_service_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.service_token = (!token.is_empty()).then_some(token);
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url, CatalogError> {
        let mut url = Url::parse(self.base_url.trim_end_matches('/'))
            .map_err(|e| CatalogError::Transport(format!("invalid catalog url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| CatalogError::Transport("catalog url cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn version_segments<'a>(dataset: &'a DatasetRef, version: &'a str) -> [&'a str; 6] {
        [
            "datasets",
            dataset.id.as_str(),
            "editions",
            dataset.edition.as_str(),
            "versions",
            version,
        ]
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        missing: Missing,
        what: &str,
    ) -> Result<T, CatalogError> {
        let request = match &self.service_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| CatalogError::Transport(format!("{what}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| CatalogError::Serialization(format!("{what}: {e}")));
        }

        if status == StatusCode::NOT_FOUND {
            debug!(what, "Catalog resource not found");
            return Err(match missing {
                Missing::Dataset => CatalogError::DatasetNotFound(what.to_string()),
                Missing::Version => CatalogError::VersionNotFound(what.to_string()),
            });
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|value| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or(body);
        warn!(what, status = status.as_u16(), %message, "Catalog request failed");
        Err(CatalogError::Upstream {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl DatasetCatalog for HttpCatalogClient {
    async fn get_dataset(&self, id: &str) -> Result<Dataset, CatalogError> {
        let url = self.url(&["datasets", id])?;
        self.fetch(self.client.get(url), Missing::Dataset, id).await
    }

    async fn get_version(
        &self,
        dataset: &DatasetRef,
        authenticated: bool,
    ) -> Result<Version, CatalogError> {
        let version = dataset.version.to_string();
        let url = self.url(&Self::version_segments(dataset, &version))?;
        let found: Version = self
            .fetch(self.client.get(url), Missing::Version, &dataset.to_string())
            .await?;
        found.visible_to(dataset, authenticated)
    }

    async fn get_version_dimensions(
        &self,
        dataset: &DatasetRef,
    ) -> Result<Vec<VersionDimension>, CatalogError> {
        let version = dataset.version.to_string();
        let mut segments = Self::version_segments(dataset, &version).to_vec();
        segments.push("dimensions");
        let url = self.url(&segments)?;
        let page: Page<VersionDimension> = self
            .fetch(self.client.get(url), Missing::Version, &dataset.to_string())
            .await?;
        Ok(page.items)
    }

    async fn get_options(
        &self,
        dataset: &DatasetRef,
        dimension: &str,
        ids: &[String],
    ) -> Result<Vec<String>, CatalogError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let version = dataset.version.to_string();
        let mut segments = Self::version_segments(dataset, &version).to_vec();
        segments.extend(["dimensions", dimension, "options"]);
        let url = self.url(&segments)?;

        let request = self.client.get(url).query(&[
            ("id", ids.join(",")),
            ("limit", ids.len().to_string()),
        ]);
        let page: Page<OptionItem> = self
            .fetch(request, Missing::Version, &dataset.to_string())
            .await?;
        Ok(page.items.into_iter().map(|item| item.option).collect())
    }
}
