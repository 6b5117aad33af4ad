use super::{optional_if_match, parse_json, required_if_match, Page, Pagination};
use crate::error::{ServerError, ServerResult};
use crate::links::{DimensionLinks, LinkBuilder, OptionLinks};
use crate::state::ServerState;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_TYPE, ETAG};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use model::Dimension;
use serde::{Deserialize, Serialize};
use service::{parse_patch, Caller, ServiceError};
use std::collections::HashMap;
use std::sync::Arc;

pub const JSON_PATCH_CONTENT_TYPE: &str = "application/json-patch+json";

#[derive(Debug, Serialize)]
pub struct DimensionView {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    pub links: DimensionLinks,
}

#[derive(Debug, Serialize)]
pub struct OptionView {
    pub option: String,
    pub dimension: String,
    pub links: OptionLinks,
}

fn option_view(
    links: &LinkBuilder,
    filter_id: &str,
    dimension: &str,
    option: String,
) -> OptionView {
    OptionView {
        links: links.option(filter_id, dimension, &option),
        dimension: dimension.to_string(),
        option,
    }
}

/// Body of `POST /filters/{id}/dimensions/{name}`; may be empty.
#[derive(Debug, Default, Deserialize)]
struct AddDimension {
    #[serde(default)]
    options: Vec<String>,
}

/// `GET /filters/{id}/dimensions`
pub async fn list_dimensions(
    State(state): State<Arc<ServerState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> ServerResult<impl IntoResponse> {
    let pagination = Pagination::from_query(&query, &state.config)?;
    let selector = optional_if_match(&headers);
    let (dimensions, etag) = state
        .services
        .dimensions
        .list_dimensions(&id, &selector, caller)
        .await
        .map_err(ServerError::read)?;

    let links = LinkBuilder::new(&state.config, &headers);
    let items: Vec<DimensionView> = dimensions
        .into_iter()
        .map(|d| DimensionView {
            links: links.dimension(&id, &d.name),
            name: d.name,
            options: None,
        })
        .collect();
    Ok(([(ETAG, etag)], Json(Page::new(items, pagination))))
}

/// `GET /filters/{id}/dimensions/{name}`
pub async fn get_dimension(
    State(state): State<Arc<ServerState>>,
    Extension(caller): Extension<Caller>,
    Path((id, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> ServerResult<impl IntoResponse> {
    let selector = optional_if_match(&headers);
    let (dimension, etag) = state
        .services
        .dimensions
        .get_dimension(&id, &name, &selector, caller)
        .await
        .map_err(ServerError::read)?;

    let links = LinkBuilder::new(&state.config, &headers);
    let view = DimensionView {
        links: links.dimension(&id, &dimension.name),
        name: dimension.name,
        options: None,
    };
    Ok(([(ETAG, etag)], Json(view)))
}

/// `POST /filters/{id}/dimensions/{name}`
pub async fn add_dimension(
    State(state): State<Arc<ServerState>>,
    Extension(caller): Extension<Caller>,
    Path((id, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<impl IntoResponse> {
    let selector = required_if_match(&headers)?;
    let request: AddDimension = if body.iter().all(u8::is_ascii_whitespace) {
        AddDimension::default()
    } else {
        parse_json(&body)?
    };

    let (dimension, etag) = state
        .services
        .dimensions
        .add_dimension(&id, Dimension::new(name, request.options), &selector, caller)
        .await
        .map_err(ServerError::write)?;

    let links = LinkBuilder::new(&state.config, &headers);
    let view = DimensionView {
        links: links.dimension(&id, &dimension.name),
        name: dimension.name,
        options: Some(dimension.options),
    };
    Ok((StatusCode::CREATED, [(ETAG, etag)], Json(view)))
}

/// `DELETE /filters/{id}/dimensions/{name}`
pub async fn remove_dimension(
    State(state): State<Arc<ServerState>>,
    Extension(caller): Extension<Caller>,
    Path((id, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> ServerResult<impl IntoResponse> {
    let selector = required_if_match(&headers)?;
    let etag = state
        .services
        .dimensions
        .remove_dimension(&id, &name, &selector, caller)
        .await
        .map_err(ServerError::write)?;
    Ok((StatusCode::NO_CONTENT, [(ETAG, etag)]))
}

/// `PATCH /filters/{id}/dimensions/{name}`
///
/// Responds with the operations applied. When an operation fails the error
/// body lists the operations applied before it and the resulting ETag.
pub async fn patch_dimension(
    State(state): State<Arc<ServerState>>,
    Extension(caller): Extension<Caller>,
    Path((id, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<impl IntoResponse> {
    let selector = required_if_match(&headers)?;
    let operations = parse_patch(&body, state.config.max_patch_options)
        .map_err(|e| ServerError::write(ServiceError::Patch(e)))?;

    let (applied, etag) = state
        .services
        .dimensions
        .patch(&id, &name, operations, &selector, caller)
        .await
        .map_err(ServerError::write)?;

    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, JSON_PATCH_CONTENT_TYPE)],
        [(ETAG, etag)],
        Json(applied),
    ))
}

/// `GET /filters/{id}/dimensions/{name}/options`
pub async fn list_options(
    State(state): State<Arc<ServerState>>,
    Extension(caller): Extension<Caller>,
    Path((id, name)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> ServerResult<impl IntoResponse> {
    let pagination = Pagination::from_query(&query, &state.config)?;
    let selector = optional_if_match(&headers);
    let (options, etag) = state
        .services
        .dimensions
        .list_options(&id, &name, &selector, caller)
        .await
        .map_err(ServerError::read)?;

    let links = LinkBuilder::new(&state.config, &headers);
    let items: Vec<OptionView> = options
        .into_iter()
        .map(|option| option_view(&links, &id, &name, option))
        .collect();
    Ok(([(ETAG, etag)], Json(Page::new(items, pagination))))
}

/// `GET /filters/{id}/dimensions/{name}/options/{option}`
pub async fn get_option(
    State(state): State<Arc<ServerState>>,
    Extension(caller): Extension<Caller>,
    Path((id, name, option)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ServerResult<impl IntoResponse> {
    let selector = optional_if_match(&headers);
    let etag = state
        .services
        .dimensions
        .get_option(&id, &name, &option, &selector, caller)
        .await
        .map_err(ServerError::read)?;

    let links = LinkBuilder::new(&state.config, &headers);
    Ok(([(ETAG, etag)], Json(option_view(&links, &id, &name, option))))
}

/// `POST /filters/{id}/dimensions/{name}/options/{option}`
pub async fn add_option(
    State(state): State<Arc<ServerState>>,
    Extension(caller): Extension<Caller>,
    Path((id, name, option)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ServerResult<impl IntoResponse> {
    let selector = required_if_match(&headers)?;
    let etag = state
        .services
        .dimensions
        .add_option(&id, &name, &option, &selector, caller)
        .await
        .map_err(ServerError::write)?;

    let links = LinkBuilder::new(&state.config, &headers);
    Ok((
        StatusCode::CREATED,
        [(ETAG, etag)],
        Json(option_view(&links, &id, &name, option)),
    ))
}

/// `DELETE /filters/{id}/dimensions/{name}/options/{option}`
pub async fn remove_option(
    State(state): State<Arc<ServerState>>,
    Extension(caller): Extension<Caller>,
    Path((id, name, option)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ServerResult<impl IntoResponse> {
    let selector = required_if_match(&headers)?;
    let etag = state
        .services
        .dimensions
        .remove_option(&id, &name, &option, &selector, caller)
        .await
        .map_err(ServerError::write)?;
    Ok((StatusCode::NO_CONTENT, [(ETAG, etag)]))
}
