//! # Dataset catalog
//!
//! Read-only access to the upstream dataset catalog: dataset metadata, a
//! single dataset version, the dimensions a version declares, and option
//! existence checks.
//!
//! Option checks are the hot path. A single filter edit may name hundreds of
//! option ids, so [`get_options_batched`] splits them into batches and fans
//! the batches out with a bounded number of concurrent requests.
//!
//! Two implementations of [`DatasetCatalog`] ship with the crate:
//! [`HttpCatalogClient`] talks to the catalog over HTTP, and
//! [`InMemoryCatalog`] serves fixtures for tests and local runs.

use async_trait::async_trait;
use model::DatasetRef;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod batch;
mod client;
mod memory;

pub use batch::{get_options_batched, BatchConfig};
pub use client::HttpCatalogClient;
pub use memory::InMemoryCatalog;

/// State string of a published dataset version.
pub const PUBLISHED_STATE: &str = "published";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("version not found: {0}")]
    VersionNotFound(String),

    #[error("dimension not found: {0}")]
    DimensionNotFound(String),

    #[error("catalog request failed: {0}")]
    Transport(String),

    #[error("catalog returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("invalid catalog response: {0}")]
    Serialization(String),
}

impl CatalogError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CatalogError::DatasetNotFound(_)
                | CatalogError::VersionNotFound(_)
                | CatalogError::DimensionNotFound(_)
        )
    }
}

/// Dataset-level metadata. Only the type matters to the filter API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub state: String,
}

impl Dataset {
    pub fn is_flexible(&self) -> bool {
        self.kind == model::FLEXIBLE_DATASET_TYPE
    }
}

/// One version of a dataset edition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Instance the version was imported as.
    #[serde(rename = "id")]
    pub instance_id: String,
    #[serde(default)]
    pub state: String,
}

impl Version {
    pub fn is_published(&self) -> bool {
        self.state == PUBLISHED_STATE
    }

    /// Apply the visibility rule: unpublished versions do not exist for
    /// unauthenticated callers.
    pub fn visible_to(
        self,
        dataset: &DatasetRef,
        authenticated: bool,
    ) -> Result<Self, CatalogError> {
        if self.is_published() || authenticated {
            Ok(self)
        } else {
            Err(CatalogError::VersionNotFound(dataset.to_string()))
        }
    }
}

/// A dimension declared on a dataset version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDimension {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
}

/// Upstream dataset catalog.
#[async_trait]
pub trait DatasetCatalog: Send + Sync {
    async fn get_dataset(&self, id: &str) -> Result<Dataset, CatalogError>;

    /// Fetch a version, hiding unpublished ones from unauthenticated callers.
    async fn get_version(
        &self,
        dataset: &DatasetRef,
        authenticated: bool,
    ) -> Result<Version, CatalogError>;

    async fn get_version_dimensions(
        &self,
        dataset: &DatasetRef,
    ) -> Result<Vec<VersionDimension>, CatalogError>;

    /// Return which of `ids` exist as options of `dimension`.
    ///
    /// Callers keep `ids` within one batch; see [`get_options_batched`].
    async fn get_options(
        &self,
        dataset: &DatasetRef,
        dimension: &str,
        ids: &[String],
    ) -> Result<Vec<String>, CatalogError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpublished_version_hidden_from_anonymous_callers() {
        let dataset = DatasetRef::new("cpih01", "time-series", 1);
        let version = Version {
            instance_id: "i-1".into(),
            state: "associated".into(),
        };
        assert_eq!(
            version.clone().visible_to(&dataset, false).unwrap_err(),
            CatalogError::VersionNotFound("cpih01/time-series/1".into())
        );
        assert!(version.visible_to(&dataset, true).is_ok());
    }

    #[test]
    fn version_deserializes_instance_id() {
        let version: Version =
            serde_json::from_str(r#"{"id":"inst","state":"published","edition":"2017"}"#).unwrap();
        assert_eq!(version.instance_id, "inst");
        assert!(version.is_published());
    }
}
