//! Router-level tests for the HTTP surface: links, paging, caller identity
//! and the ambient middleware.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use catalog::InMemoryCatalog;
use http_body_util::BodyExt;
use model::DatasetRef;
use queue::Envelope;
use serde_json::{json, Value};
use server::{build_router, ServerConfig, ServerState};
use std::sync::Arc;
use std::time::Duration;
use store::FilterStore;
use tokio::sync::mpsc;
use tower::ServiceExt;

fn dataset() -> DatasetRef {
    DatasetRef::new("cpih01", "time-series", 1)
}

fn test_config() -> ServerConfig {
    ServerConfig {
        filter_api_url: "http://filters.local".into(),
        dataset_api_url: "http://datasets.local".into(),
        service_tokens: vec!["svc".into()],
        download_service_token: Some("dl".into()),
        metrics_enabled: false,
        default_limit: 2,
        max_limit: 10,
        ..ServerConfig::default()
    }
}

fn app_with(config: ServerConfig) -> (Router, mpsc::Receiver<Envelope>) {
    let catalog = InMemoryCatalog::new()
        .with_version(&dataset(), "inst-1", true)
        .with_dimension(&dataset(), "aggregate", ["cpih1dim1A0", "cpih1dim1G10100"])
        .with_dimension(&dataset(), "geography", ["K02000001"])
        .with_dimension(&dataset(), "time", ["Jan-20", "Feb-20", "Mar-20"]);
    let (producer, receiver) = queue::channel("filter-submitted", 8, Duration::from_millis(50));
    let state = ServerState::new(
        config,
        Arc::new(FilterStore::in_memory()),
        Arc::new(catalog),
        Arc::new(producer),
    );
    (build_router(Arc::new(state)), receiver)
}

fn app() -> Router {
    app_with(test_config()).0
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, headers, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn create(app: &Router) -> (String, String) {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/filters")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "dataset": {"id": "cpih01", "edition": "time-series", "version": 1},
                "dimensions": [
                    {"name": "aggregate", "options": ["cpih1dim1A0"]},
                    {"name": "geography", "options": []},
                    {"name": "time", "options": ["Jan-20", "Feb-20", "Mar-20"]}
                ]
            })
            .to_string(),
        ))
        .unwrap();
    let (status, headers, body) = send(app, request).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    (
        body["filter_id"].as_str().unwrap().to_string(),
        headers["etag"].to_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn health_is_public() {
    let (status, _, body) = send(&app(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "filter-api");
}

#[tokio::test]
async fn metrics_route_only_when_enabled() {
    let (status, _, _) = send(&app(), get("/metrics")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn request_id_is_echoed_or_generated() {
    let app = app();
    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .unwrap();
    let (_, headers, _) = send(&app, request).await;
    assert_eq!(headers["x-request-id"], "req-42");

    let (_, headers, _) = send(&app, get("/health")).await;
    assert!(!headers["x-request-id"].is_empty());
}

#[tokio::test]
async fn blueprint_body_and_links() {
    let app = app();
    let (id, etag) = create(&app).await;

    let (status, headers, body) = send(&app, get(&format!("/filters/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["etag"], etag.as_str());
    assert_eq!(body["instance_id"], "inst-1");
    assert_eq!(body["published"], true);
    assert_eq!(body["state"], "created");
    assert!(body.get("etag").is_none());
    assert!(body.get("unique_timestamp").is_none());
    assert_eq!(
        body["links"]["self"]["href"],
        format!("http://filters.local/filters/{id}")
    );
    assert_eq!(
        body["links"]["version"]["href"],
        "http://datasets.local/datasets/cpih01/editions/time-series/versions/1"
    );
    assert!(body["links"].get("filter_output").is_none());
}

#[tokio::test]
async fn links_follow_forwarded_host_when_rewriting() {
    let (app, _rx) = app_with(ServerConfig {
        enable_url_rewriting: true,
        ..test_config()
    });
    let (id, _) = create(&app).await;

    let request = Request::builder()
        .uri(format!("/filters/{id}/dimensions/time"))
        .header("x-forwarded-host", "api.example.com")
        .header("x-forwarded-path-prefix", "v1")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "time");
    assert_eq!(
        body["links"]["self"]["href"],
        format!("https://api.example.com/v1/filters/{id}/dimensions/time")
    );
    assert_eq!(
        body["links"]["options"]["href"],
        format!("https://api.example.com/v1/filters/{id}/dimensions/time/options")
    );
}

#[tokio::test]
async fn dimension_listing_is_paged() {
    let app = app();
    let (id, _) = create(&app).await;

    let (status, _, body) = send(&app, get(&format!("/filters/{id}/dimensions"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["limit"], 2);
    assert_eq!(body["total_count"], 3);
    assert_eq!(body["items"][0]["name"], "aggregate");
    assert!(body["items"][0].get("options").is_none());

    let (_, _, body) = send(
        &app,
        get(&format!("/filters/{id}/dimensions/time/options?offset=2&limit=5")),
    )
    .await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["offset"], 2);
    assert_eq!(body["items"][0]["option"], "Mar-20");
    assert_eq!(body["items"][0]["dimension"], "time");
}

#[tokio::test]
async fn add_and_remove_a_dimension() {
    let app = app();
    let (id, etag) = create(&app).await;

    let remove = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/filters/{id}/dimensions/geography"))
        .header("if-match", &etag)
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = send(&app, remove).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let etag = headers["etag"].to_str().unwrap().to_string();

    // An empty body adds the dimension with no options selected.
    let add = Request::builder()
        .method(Method::POST)
        .uri(format!("/filters/{id}/dimensions/geography"))
        .header("if-match", &etag)
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, add).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["options"], json!([]));

    let (status, _, _) = send(&app, get(&format!("/filters/{id}/dimensions/geography"))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn download_token_unlocks_unpublished_outputs() {
    let catalog = Arc::new(
        InMemoryCatalog::new()
            .with_version(&dataset(), "inst-1", false)
            .with_dimension(&dataset(), "time", ["Jan-20"]),
    );
    let (producer, mut submissions) =
        queue::channel("filter-submitted", 8, Duration::from_millis(50));
    let state = ServerState::new(
        test_config(),
        Arc::new(FilterStore::in_memory()),
        catalog,
        Arc::new(producer),
    );
    let app = build_router(Arc::new(state));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/filters?submitted=true")
        .header("authorization", "Bearer svc")
        .body(Body::from(
            json!({
                "dataset": {"id": "cpih01", "edition": "time-series", "version": 1},
                "dimensions": [{"name": "time", "options": ["Jan-20"]}]
            })
            .to_string(),
        ))
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let output_id = submissions.try_recv().unwrap().message.filter_output_id;

    let (status, _, _) = send(&app, get(&format!("/filter-outputs/{output_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = Request::builder()
        .uri(format!("/filter-outputs/{output_id}"))
        .header("x-download-service-token", "dl")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.contains_key("etag"));
    assert_eq!(
        body["links"]["filter_blueprint"]["id"],
        body["filter_id"].clone()
    );
}

/// Upstream flexible-table service that echoes what it received.
async fn spawn_flexible_upstream() -> String {
    use axum::routing::post;

    let upstream = Router::new().route(
        "/filters",
        post(|body: String| async move {
            (StatusCode::ACCEPTED, [("x-upstream", "flexible")], body)
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, upstream).await.unwrap();
    });
    format!("http://{addr}")
}

fn forwarding_app(flexible_api_url: String) -> Router {
    let flexible = DatasetRef::new("census", "2021", 1);
    let catalog = InMemoryCatalog::new()
        .with_dataset("census", model::FLEXIBLE_DATASET_TYPE)
        .with_version(&flexible, "inst-f", true)
        .with_dataset("cpih01", "filterable")
        .with_version(&dataset(), "inst-1", true)
        .with_dimension(&dataset(), "time", ["Jan-20"]);
    let (producer, _) = queue::channel("filter-submitted", 8, Duration::from_millis(50));
    let config = ServerConfig {
        enable_flexible_forwarding: true,
        flexible_api_url,
        ..test_config()
    };
    let state = ServerState::new(
        config,
        Arc::new(FilterStore::in_memory()),
        Arc::new(catalog),
        Arc::new(producer),
    );
    build_router(Arc::new(state))
}

#[tokio::test]
async fn flexible_datasets_are_forwarded_with_their_body() {
    let app = forwarding_app(spawn_flexible_upstream().await);
    let payload = json!({
        "dataset": {"id": "census", "edition": "2021", "version": 1},
        "dimensions": [{"name": "ltla", "options": []}]
    });

    let request = Request::builder()
        .method(Method::POST)
        .uri("/filters")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, headers, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(headers["x-upstream"], "flexible");
    assert_eq!(body, payload);
}

#[tokio::test]
async fn other_datasets_reach_local_handlers_intact() {
    let app = forwarding_app("http://127.0.0.1:9".into());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/filters")
        .body(Body::from(
            json!({
                "dataset": {"id": "cpih01", "edition": "time-series", "version": 1},
                "dimensions": [{"name": "time", "options": ["Jan-20"]}]
            })
            .to_string(),
        ))
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["dimensions"][0]["options"], json!(["Jan-20"]));
}
