use crate::error::ServerError;
use crate::state::ServerState;
use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, HOST};
use axum::http::{HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use model::ETagSelector;
use service::Caller;
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Header carrying the download service's shared secret.
pub const DOWNLOAD_SERVICE_TOKEN_HEADER: &str = "x-download-service-token";

/// Establish who is calling and store a [`Caller`] in the request extensions.
///
/// A bearer token listed in `service_tokens` marks the caller authenticated;
/// the download-service secret additionally unlocks private links. Unknown
/// or missing credentials leave the caller anonymous.
pub async fn identify_caller(
    State(state): State<Arc<ServerState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.strip_prefix("Bearer ").unwrap_or(s).trim());

    let download_token = request
        .headers()
        .get(DOWNLOAD_SERVICE_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());

    let download_service = match (download_token, &state.config.download_service_token) {
        (Some(presented), Some(expected)) if !expected.is_empty() => {
            tokens_equal(presented, expected)
        }
        _ => false,
    };
    let authenticated = download_service
        || bearer.is_some_and(|token| {
            state
                .config
                .service_tokens
                .iter()
                .any(|known| tokens_equal(token, known))
        });

    request.extensions_mut().insert(Caller {
        authenticated,
        download_service,
    });
    next.run(request).await
}

fn tokens_equal(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Request ID injection middleware
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    request.extensions_mut().insert(request_id.clone());

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    response
}

/// Logging middleware
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let request_id = request
        .extensions()
        .get::<String>()
        .cloned()
        .unwrap_or_default();

    tracing::info!(
        method = %method,
        uri = %uri,
        request_id = %request_id,
        "Request started"
    );

    let response = next.run(request).await;
    let duration = start.elapsed();
    let status = response.status();

    metrics::counter!(
        "filter_http_requests_total",
        "method" => method.to_string(),
        "status" => status.as_u16().to_string()
    )
    .increment(1);

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status,
        duration_ms = %duration.as_millis(),
        request_id = %request_id,
        "Request completed"
    );

    response
}

/// Proxy requests for flexible tables to the flexible-table service.
///
/// Detection costs at most one lookup: the catalog for `POST /filters`,
/// the store for everything addressed by id. Any detection failure falls
/// through to the local handlers with the request body intact.
pub async fn forward_flexible(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.enable_flexible_forwarding {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, state.config.max_body_size()).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return ServerError::BadRequest(format!("failed to read request body: {e}"))
                .into_response()
        }
    };

    let flexible = is_flexible(&state, &parts.method, parts.uri.path(), &bytes).await;
    let request = Request::from_parts(parts, Body::from(bytes));
    if !flexible {
        return next.run(request).await;
    }

    match proxy(&state, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn is_flexible(state: &ServerState, method: &Method, path: &str, body: &[u8]) -> bool {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        ["filters"] if method == Method::POST => {
            #[derive(serde::Deserialize)]
            struct DatasetId {
                dataset: DatasetIdInner,
            }
            #[derive(serde::Deserialize)]
            struct DatasetIdInner {
                id: String,
            }
            let Ok(parsed) = serde_json::from_slice::<DatasetId>(body) else {
                return false;
            };
            state
                .catalog
                .get_dataset(&parsed.dataset.id)
                .await
                .map(|d| d.is_flexible())
                .unwrap_or(false)
        }
        ["filters", id, ..] => state
            .store
            .get_filter(id, &ETagSelector::Any)
            .map(|bp| bp.is_flexible())
            .unwrap_or(false),
        ["filter-outputs", id, ..] => state
            .store
            .get_output(id)
            .map(|o| o.is_flexible())
            .unwrap_or(false),
        _ => false,
    }
}

async fn proxy(state: &ServerState, request: Request) -> Result<Response, ServerError> {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!(
        "{}{}",
        state.config.flexible_api_url.trim_end_matches('/'),
        path_and_query
    );
    let body = to_bytes(body, state.config.max_body_size())
        .await
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;

    tracing::info!(method = %parts.method, url = %url, "Forwarding flexible request");

    let mut upstream = state.http.request(parts.method.clone(), &url).body(body);
    for (name, value) in parts.headers.iter() {
        if name != HOST && !is_hop_by_hop(name.as_str()) {
            upstream = upstream.header(name, value);
        }
    }

    let response = upstream
        .send()
        .await
        .map_err(|e| ServerError::Forwarding(e.to_string()))?;

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ServerError::Forwarding(e.to_string()))?;

    let mut proxied = Response::new(Body::from(bytes));
    *proxied.status_mut() = status;
    for (name, value) in headers.iter() {
        if !is_hop_by_hop(name.as_str()) {
            proxied.headers_mut().append(name, value.clone());
        }
    }
    Ok(proxied)
}

fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name,
        "connection" | "transfer-encoding" | "keep-alive" | "content-length"
    )
}
