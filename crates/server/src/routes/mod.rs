//! API route handlers
//!
//! Routes are organized by resource:
//!
//! - `health`: liveness
//! - `filters`: create, read and update filter blueprints
//! - `dimensions`: dimensions and options of a blueprint, including patch
//! - `outputs`: filter outputs and their lifecycle events

pub mod dimensions;
pub mod filters;
pub mod health;
pub mod outputs;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use axum::http::header::IF_MATCH;
use axum::http::HeaderMap;
use model::ETagSelector;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

/// 404 Not Found handler
pub async fn not_found() -> ServerError {
    ServerError::NotFound
}

/// `If-Match` is mandatory on mutations.
pub(crate) fn required_if_match(headers: &HeaderMap) -> ServerResult<ETagSelector> {
    headers
        .get(IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(ETagSelector::parse)
        .ok_or(ServerError::MissingIfMatch)
}

/// Reads accept an optional `If-Match`; without one any ETag matches.
pub(crate) fn optional_if_match(headers: &HeaderMap) -> ETagSelector {
    headers
        .get(IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(ETagSelector::parse)
        .unwrap_or_default()
}

/// The `submitted` query flag.
pub(crate) fn submitted_flag(query: &HashMap<String, String>) -> ServerResult<bool> {
    match query.get("submitted").map(String::as_str) {
        None | Some("") | Some("false") => Ok(false),
        Some("true") => Ok(true),
        Some(other) => Err(ServerError::InvalidQueryParameter(format!(
            "submitted must be true or false, got '{other}'"
        ))),
    }
}

pub(crate) fn parse_json<T: DeserializeOwned>(body: &[u8]) -> ServerResult<T> {
    Ok(serde_json::from_slice(body)?)
}

/// `offset` and `limit` query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
}

impl Pagination {
    pub fn from_query(
        query: &HashMap<String, String>,
        config: &ServerConfig,
    ) -> ServerResult<Self> {
        let offset = parse_count(query, "offset")?.unwrap_or(0);
        let limit = parse_count(query, "limit")?.unwrap_or(config.default_limit);
        if limit > config.max_limit {
            return Err(ServerError::InvalidQueryParameter(format!(
                "limit must not exceed {}",
                config.max_limit
            )));
        }
        Ok(Self { offset, limit })
    }
}

fn parse_count(query: &HashMap<String, String>, name: &str) -> ServerResult<Option<usize>> {
    query
        .get(name)
        .map(|raw| {
            raw.trim().parse::<usize>().map_err(|_| {
                ServerError::InvalidQueryParameter(format!(
                    "{name} must be a non-negative integer, got '{raw}'"
                ))
            })
        })
        .transpose()
}

/// One page of a listing.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub count: usize,
    pub offset: usize,
    pub limit: usize,
    pub total_count: usize,
}

impl<T> Page<T> {
    pub fn new(all: Vec<T>, pagination: Pagination) -> Self {
        let total_count = all.len();
        let items: Vec<T> = all
            .into_iter()
            .skip(pagination.offset)
            .take(pagination.limit)
            .collect();
        Self {
            count: items.len(),
            items,
            offset: pagination.offset,
            limit: pagination.limit,
            total_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn pagination_defaults_and_limits() {
        let config = ServerConfig::default();
        let p = Pagination::from_query(&query(&[]), &config).unwrap();
        assert_eq!(p, Pagination { offset: 0, limit: 20 });

        assert!(Pagination::from_query(&query(&[("offset", "-1")]), &config).is_err());
        assert!(Pagination::from_query(&query(&[("limit", "abc")]), &config).is_err());
        assert!(Pagination::from_query(&query(&[("limit", "1001")]), &config).is_err());
    }

    #[test]
    fn zero_limit_page_keeps_total() {
        let page = Page::new(vec![1, 2, 3], Pagination { offset: 0, limit: 0 });
        assert!(page.items.is_empty());
        assert_eq!(page.count, 0);
        assert_eq!(page.total_count, 3);

        let page = Page::new(vec![1, 2, 3], Pagination { offset: 2, limit: 5 });
        assert_eq!(page.items, vec![3]);
    }

    #[test]
    fn if_match_handling() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            required_if_match(&headers),
            Err(ServerError::MissingIfMatch)
        ));
        assert_eq!(optional_if_match(&headers), ETagSelector::Any);

        headers.insert(IF_MATCH, HeaderValue::from_static("\"abc\""));
        assert_eq!(
            required_if_match(&headers).unwrap(),
            ETagSelector::Exact("abc".into())
        );
    }

    #[test]
    fn submitted_flag_parsing() {
        assert!(!submitted_flag(&query(&[])).unwrap());
        assert!(submitted_flag(&query(&[("submitted", "true")])).unwrap());
        assert!(submitted_flag(&query(&[("submitted", "yes")])).is_err());
    }
}
