use super::{optional_if_match, parse_json, required_if_match, submitted_flag};
use crate::error::{ServerError, ServerResult};
use crate::links::{BlueprintLinks, LinkBuilder};
use crate::state::ServerState;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::ETAG;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use model::{Blueprint, BlueprintState, DatasetRef, Dimension, Event};
use serde::Serialize;
use service::{BlueprintUpdate, Caller, NewBlueprint};
use std::collections::HashMap;
use std::sync::Arc;

/// Blueprint as returned to clients.
#[derive(Debug, Serialize)]
pub struct BlueprintView {
    pub filter_id: String,
    pub instance_id: String,
    pub dataset: DatasetRef,
    pub dimensions: Vec<Dimension>,
    pub events: Vec<Event>,
    pub state: BlueprintState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    pub last_updated: DateTime<Utc>,
    pub links: BlueprintLinks,
}

impl BlueprintView {
    pub fn new(blueprint: Blueprint, links: &LinkBuilder) -> Self {
        let links = links.blueprint(&blueprint);
        Self {
            filter_id: blueprint.id,
            instance_id: blueprint.instance_id,
            dataset: blueprint.dataset,
            dimensions: blueprint.dimensions,
            events: blueprint.events,
            state: blueprint.state,
            published: blueprint.published,
            kind: blueprint.kind,
            last_updated: blueprint.last_updated,
            links,
        }
    }
}

fn respond(
    status: StatusCode,
    blueprint: Blueprint,
    links: &LinkBuilder,
) -> impl IntoResponse {
    let etag = blueprint.etag.clone();
    (status, [(ETAG, etag)], Json(BlueprintView::new(blueprint, links)))
}

/// `POST /filters`
pub async fn create_filter(
    State(state): State<Arc<ServerState>>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<impl IntoResponse> {
    let submit = submitted_flag(&query)?;
    let request: NewBlueprint = parse_json(&body)?;

    let blueprint = state
        .services
        .blueprints
        .create(request, submit, caller)
        .await
        .map_err(ServerError::create)?;

    let links = LinkBuilder::new(&state.config, &headers);
    Ok(respond(StatusCode::CREATED, blueprint, &links))
}

/// `GET /filters/{id}`
pub async fn get_filter(
    State(state): State<Arc<ServerState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ServerResult<impl IntoResponse> {
    let selector = optional_if_match(&headers);
    let blueprint = state
        .services
        .blueprints
        .get(&id, &selector, caller)
        .await
        .map_err(ServerError::read)?;

    let links = LinkBuilder::new(&state.config, &headers);
    Ok(respond(StatusCode::OK, blueprint, &links))
}

/// `PUT /filters/{id}`
pub async fn update_filter(
    State(state): State<Arc<ServerState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<impl IntoResponse> {
    let selector = required_if_match(&headers)?;
    let submit = submitted_flag(&query)?;
    let update: BlueprintUpdate = parse_json(&body)?;

    let blueprint = state
        .services
        .blueprints
        .update(&id, update, submit, &selector, caller)
        .await
        .map_err(ServerError::update_blueprint)?;

    let links = LinkBuilder::new(&state.config, &headers);
    Ok(respond(StatusCode::OK, blueprint, &links))
}
