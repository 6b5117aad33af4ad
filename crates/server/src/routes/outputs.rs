use super::parse_json;
use crate::error::{ServerError, ServerResult};
use crate::links::{LinkBuilder, OutputLinks};
use crate::state::ServerState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::ETAG;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use model::{
    output_etag, DatasetRef, Dimension, Downloads, Event, EventRequest, Output, OutputState,
};
use serde::Serialize;
use service::{Caller, OutputUpdate};
use std::sync::Arc;

/// Filter output as returned to clients.
#[derive(Debug, Serialize)]
pub struct OutputView {
    pub id: String,
    pub filter_id: String,
    pub instance_id: String,
    pub dataset: DatasetRef,
    pub dimensions: Vec<Dimension>,
    pub events: Vec<Event>,
    pub state: OutputState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    pub downloads: Downloads,
    pub last_updated: DateTime<Utc>,
    pub links: OutputLinks,
}

impl OutputView {
    pub fn new(output: Output, links: &LinkBuilder) -> Self {
        let links = links.output(&output);
        Self {
            id: output.id,
            filter_id: output.filter_id,
            instance_id: output.instance_id,
            dataset: output.dataset,
            dimensions: output.dimensions,
            events: output.events,
            state: output.state,
            published: output.published,
            kind: output.kind,
            downloads: output.downloads,
            last_updated: output.last_updated,
            links,
        }
    }
}

fn respond(output: Output, links: &LinkBuilder) -> impl IntoResponse {
    let etag = output_etag(&output);
    ([(ETAG, etag)], Json(OutputView::new(output, links)))
}

/// `GET /filter-outputs/{id}`
pub async fn get_output(
    State(state): State<Arc<ServerState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ServerResult<impl IntoResponse> {
    let output = state
        .services
        .outputs
        .get(&id, caller)
        .map_err(ServerError::read)?;
    let links = LinkBuilder::new(&state.config, &headers);
    Ok(respond(output, &links))
}

/// `PUT /filter-outputs/{id}`
pub async fn update_output(
    State(state): State<Arc<ServerState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<impl IntoResponse> {
    if !caller.authenticated {
        return Err(ServerError::write(service::ServiceError::Unauthorised));
    }
    let update: OutputUpdate = parse_json(&body)?;
    let output = state
        .services
        .outputs
        .update(&id, &update, caller)
        .map_err(ServerError::write)?;
    let links = LinkBuilder::new(&state.config, &headers);
    Ok(respond(output, &links))
}

/// `POST /filter-outputs/{id}/events`
pub async fn add_event(
    State(state): State<Arc<ServerState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    body: Bytes,
) -> ServerResult<impl IntoResponse> {
    if !caller.authenticated {
        return Err(ServerError::write(service::ServiceError::Unauthorised));
    }
    let event: EventRequest = parse_json(&body)?;
    state
        .services
        .outputs
        .add_event(&id, &event, caller)
        .map_err(ServerError::write)?;
    Ok(StatusCode::CREATED)
}
