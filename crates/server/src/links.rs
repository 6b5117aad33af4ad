//! Hypermedia links in responses.
//!
//! Links to this service are built from the configured `filter_api_url`, or,
//! with URL rewriting enabled, from `X-Forwarded-Host` (always `https`) and an
//! optional `X-Forwarded-Path-Prefix`. Links to the dataset catalog always use
//! the configured `dataset_api_url`.

use crate::config::ServerConfig;
use axum::http::HeaderMap;
use model::{Blueprint, DatasetRef, Output};
use serde::Serialize;

pub const FORWARDED_HOST: &str = "x-forwarded-host";
pub const FORWARDED_PATH_PREFIX: &str = "x-forwarded-path-prefix";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Link {
    pub href: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Link {
    fn new(href: String) -> Self {
        Self { href, id: None }
    }

    fn with_id(href: String, id: impl Into<String>) -> Self {
        Self {
            href,
            id: Some(id.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BlueprintLinks {
    #[serde(rename = "self")]
    pub self_link: Link,
    pub dimensions: Link,
    pub version: Link,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_output: Option<Link>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DimensionLinks {
    #[serde(rename = "self")]
    pub self_link: Link,
    pub filter: Link,
    pub options: Link,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionLinks {
    #[serde(rename = "self")]
    pub self_link: Link,
    pub filter: Link,
    pub dimension: Link,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputLinks {
    #[serde(rename = "self")]
    pub self_link: Link,
    pub filter_blueprint: Link,
    pub version: Link,
}

/// Resolves link bases for one request.
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    api: String,
    datasets: String,
}

impl LinkBuilder {
    pub fn new(config: &ServerConfig, headers: &HeaderMap) -> Self {
        let configured = config.filter_api_url.trim_end_matches('/').to_string();
        let api = if config.enable_url_rewriting {
            forwarded_base(headers).unwrap_or(configured)
        } else {
            configured
        };
        Self {
            api,
            datasets: config.dataset_api_url.trim_end_matches('/').to_string(),
        }
    }

    fn filter_href(&self, id: &str) -> String {
        format!("{}/filters/{id}", self.api)
    }

    fn dimension_href(&self, filter_id: &str, name: &str) -> String {
        format!("{}/dimensions/{name}", self.filter_href(filter_id))
    }

    fn version_link(&self, dataset: &DatasetRef) -> Link {
        Link::with_id(
            format!(
                "{}/datasets/{}/editions/{}/versions/{}",
                self.datasets, dataset.id, dataset.edition, dataset.version
            ),
            dataset.version.to_string(),
        )
    }

    pub fn blueprint(&self, blueprint: &Blueprint) -> BlueprintLinks {
        BlueprintLinks {
            self_link: Link::with_id(self.filter_href(&blueprint.id), &blueprint.id),
            dimensions: Link::new(format!("{}/dimensions", self.filter_href(&blueprint.id))),
            version: self.version_link(&blueprint.dataset),
            filter_output: blueprint.filter_output_id.as_ref().map(|output_id| {
                Link::with_id(format!("{}/filter-outputs/{output_id}", self.api), output_id)
            }),
        }
    }

    pub fn dimension(&self, filter_id: &str, name: &str) -> DimensionLinks {
        let href = self.dimension_href(filter_id, name);
        DimensionLinks {
            options: Link::new(format!("{href}/options")),
            self_link: Link::with_id(href, name),
            filter: Link::with_id(self.filter_href(filter_id), filter_id),
        }
    }

    pub fn option(&self, filter_id: &str, name: &str, option: &str) -> OptionLinks {
        let dimension = self.dimension_href(filter_id, name);
        OptionLinks {
            self_link: Link::with_id(format!("{dimension}/options/{option}"), option),
            filter: Link::with_id(self.filter_href(filter_id), filter_id),
            dimension: Link::with_id(dimension, name),
        }
    }

    pub fn output(&self, output: &Output) -> OutputLinks {
        OutputLinks {
            self_link: Link::with_id(
                format!("{}/filter-outputs/{}", self.api, output.id),
                &output.id,
            ),
            filter_blueprint: Link::with_id(self.filter_href(&output.filter_id), &output.filter_id),
            version: self.version_link(&output.dataset),
        }
    }
}

fn forwarded_base(headers: &HeaderMap) -> Option<String> {
    let host = headers
        .get(FORWARDED_HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|h| !h.is_empty())?;
    let prefix = headers
        .get(FORWARDED_PATH_PREFIX)
        .and_then(|v| v.to_str().ok())
        .map(|p| p.trim().trim_matches('/'))
        .filter(|p| !p.is_empty());
    Some(match prefix {
        Some(prefix) => format!("https://{host}/{prefix}"),
        None => format!("https://{host}"),
    })
}
