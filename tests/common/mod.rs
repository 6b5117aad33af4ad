//! Shared helpers for the end-to-end tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use filter_api::{
    CatalogError, Dataset, DatasetCatalog, DatasetRef, FilterApi, InMemoryCatalog, ServerConfig,
    Version, VersionDimension,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

pub const SERVICE_TOKEN: &str = "svc-token";
pub const DOWNLOAD_TOKEN: &str = "dl-secret";

pub fn dataset() -> DatasetRef {
    DatasetRef::new("d", "2017", 1)
}

/// Version 1 is published, version 2 is not.
pub fn catalog() -> InMemoryCatalog {
    InMemoryCatalog::new()
        .with_dataset("d", "cantabular_table")
        .with_version(&dataset(), "inst-1", true)
        .with_dimension(&dataset(), "age", ["27", "28", "29", "33", "40"])
        .with_dimension(&dataset(), "sex", ["m", "f"])
        .with_version(&dataset().with_version(2), "inst-2", false)
        .with_dimension(&dataset().with_version(2), "age", ["27", "33"])
}

pub fn config() -> ServerConfig {
    ServerConfig {
        service_tokens: vec![SERVICE_TOKEN.to_string()],
        download_service_token: Some(DOWNLOAD_TOKEN.to_string()),
        download_service_url: "http://download".to_string(),
        filter_api_url: "http://filters".to_string(),
        dataset_api_url: "http://datasets".to_string(),
        metrics_enabled: false,
        ..ServerConfig::default()
    }
}

pub fn api() -> FilterApi {
    FilterApi::in_memory(config(), Arc::new(catalog()))
}

/// Catalog that answers from [`catalog`] until taken down, then fails every
/// call with an upstream 503.
pub struct OutageCatalog {
    inner: InMemoryCatalog,
    down: AtomicBool,
}

impl Default for OutageCatalog {
    fn default() -> Self {
        Self {
            inner: catalog(),
            down: AtomicBool::new(false),
        }
    }
}

impl OutageCatalog {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CatalogError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CatalogError::Upstream {
                status: 503,
                message: "dataset api unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DatasetCatalog for OutageCatalog {
    async fn get_dataset(&self, id: &str) -> Result<Dataset, CatalogError> {
        self.check()?;
        self.inner.get_dataset(id).await
    }

    async fn get_version(
        &self,
        dataset: &DatasetRef,
        authenticated: bool,
    ) -> Result<Version, CatalogError> {
        self.check()?;
        self.inner.get_version(dataset, authenticated).await
    }

    async fn get_version_dimensions(
        &self,
        dataset: &DatasetRef,
    ) -> Result<Vec<VersionDimension>, CatalogError> {
        self.check()?;
        self.inner.get_version_dimensions(dataset).await
    }

    async fn get_options(
        &self,
        dataset: &DatasetRef,
        dimension: &str,
        ids: &[String],
    ) -> Result<Vec<String>, CatalogError> {
        self.check()?;
        self.inner.get_options(dataset, dimension, ids).await
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl Reply {
    pub fn etag(&self) -> String {
        self.headers
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .expect("response carries an ETag")
            .to_string()
    }

    pub fn error_code(&self) -> &str {
        self.body["error"]["code"].as_str().unwrap_or_default()
    }
}

/// Request builder with the headers the tests need.
pub struct Call {
    method: Method,
    uri: String,
    if_match: Option<String>,
    token: Option<&'static str>,
    download_token: bool,
    body: Option<String>,
}

pub fn call(method: Method, uri: impl Into<String>) -> Call {
    Call {
        method,
        uri: uri.into(),
        if_match: None,
        token: None,
        download_token: false,
        body: None,
    }
}

impl Call {
    pub fn if_match(mut self, etag: impl Into<String>) -> Self {
        self.if_match = Some(etag.into());
        self
    }

    pub fn authenticated(mut self) -> Self {
        self.token = Some(SERVICE_TOKEN);
        self
    }

    pub fn bearer(mut self, token: &'static str) -> Self {
        self.token = Some(token);
        self
    }

    pub fn download_service(mut self) -> Self {
        self.download_token = true;
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body.to_string());
        self
    }

    pub fn raw(mut self, body: &str) -> Self {
        self.body = Some(body.to_string());
        self
    }

    pub async fn send(self, app: &Router) -> Reply {
        let mut builder = Request::builder().method(self.method).uri(self.uri);
        if let Some(etag) = self.if_match {
            builder = builder.header("if-match", etag);
        }
        if let Some(token) = self.token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        if self.download_token {
            builder = builder.header("x-download-service-token", DOWNLOAD_TOKEN);
        }
        let body = match self.body {
            Some(body) => {
                builder = builder.header("content-type", "application/json");
                Body::from(body)
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        Reply {
            status,
            headers,
            body,
        }
    }
}

/// Create a blueprint over version 1 with `age` = {27, 33}.
pub async fn create_blueprint(app: &Router) -> (String, String) {
    let reply = call(Method::POST, "/filters")
        .json(serde_json::json!({
            "dataset": {"id": "d", "edition": "2017", "version": 1},
            "dimensions": [{"name": "age", "options": ["27", "33"]}]
        }))
        .send(app)
        .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
    let id = reply.body["filter_id"].as_str().unwrap().to_string();
    (id, reply.etag())
}

pub fn sorted_options(body: &Value) -> Vec<String> {
    let mut options: Vec<String> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["option"].as_str().unwrap().to_string())
        .collect();
    options.sort();
    options
}
