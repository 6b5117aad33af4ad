//! End-to-end tests driving the full router: blueprint creation, option
//! edits, patches, submission and output completion.

mod common;

use axum::http::{Method, StatusCode};
use common::{call, create_blueprint, sorted_options};
use filter_api::{DatasetRef, FilterApi};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn create_add_option_and_patch() {
    let api = common::api();
    let app = api.router();

    let (id, e0) = create_blueprint(&app).await;

    let added = call(Method::POST, format!("/filters/{id}/dimensions/age/options/28"))
        .if_match(&e0)
        .send(&app)
        .await;
    assert_eq!(added.status, StatusCode::CREATED);
    assert_eq!(added.body["option"], "28");
    let e1 = added.etag();
    assert_ne!(e0, e1);

    let patched = call(Method::PATCH, format!("/filters/{id}/dimensions/age"))
        .if_match(&e1)
        .json(json!([
            {"op": "remove", "path": "/options/-", "value": ["33"]},
            {"op": "add", "path": "/options/-", "value": ["29"]}
        ]))
        .send(&app)
        .await;
    assert_eq!(patched.status, StatusCode::OK, "{}", patched.body);
    assert_eq!(patched.body[0]["op"], "remove");
    assert_eq!(patched.body[1]["op"], "add");
    assert_eq!(
        patched.headers["content-type"],
        "application/json-patch+json"
    );
    let e3 = patched.etag();

    let options = call(Method::GET, format!("/filters/{id}/dimensions/age/options"))
        .send(&app)
        .await;
    assert_eq!(options.status, StatusCode::OK);
    assert_eq!(sorted_options(&options.body), vec!["27", "28", "29"]);
    assert_eq!(options.etag(), e3);
}

#[tokio::test]
async fn returned_etag_matches_a_fresh_read() {
    let api = common::api();
    let app = api.router();
    let (id, e0) = create_blueprint(&app).await;

    let read = call(Method::GET, format!("/filters/{id}")).send(&app).await;
    assert_eq!(read.status, StatusCode::OK);
    assert_eq!(read.etag(), e0);

    let removed = call(Method::DELETE, format!("/filters/{id}/dimensions/age/options/27"))
        .if_match(&e0)
        .send(&app)
        .await;
    assert_eq!(removed.status, StatusCode::NO_CONTENT);

    let read = call(Method::GET, format!("/filters/{id}")).send(&app).await;
    assert_eq!(read.etag(), removed.etag());
    assert_eq!(read.body["dimensions"][0]["options"], json!(["33"]));
}

#[tokio::test]
async fn bad_patch_path_changes_nothing() {
    let api = common::api();
    let app = api.router();
    let (id, e0) = create_blueprint(&app).await;

    let patched = call(Method::PATCH, format!("/filters/{id}/dimensions/age"))
        .if_match(&e0)
        .json(json!([{"op": "add", "path": "/wrong", "value": ["1"]}]))
        .send(&app)
        .await;
    assert_eq!(patched.status, StatusCode::BAD_REQUEST);
    assert_eq!(patched.error_code(), "INVALID_PATCH");

    let options = call(Method::GET, format!("/filters/{id}/dimensions/age/options"))
        .send(&app)
        .await;
    assert_eq!(sorted_options(&options.body), vec!["27", "33"]);
    assert_eq!(options.etag(), e0);
}

#[tokio::test]
async fn partial_patch_reports_applied_prefix() {
    let api = common::api();
    let app = api.router();
    let (id, e0) = create_blueprint(&app).await;

    let patched = call(Method::PATCH, format!("/filters/{id}/dimensions/age"))
        .if_match(&e0)
        .json(json!([
            {"op": "remove", "path": "/options/-", "value": ["27"]},
            {"op": "add", "path": "/options/-", "value": ["99"]}
        ]))
        .send(&app)
        .await;
    assert_eq!(patched.status, StatusCode::BAD_REQUEST);
    assert_eq!(patched.error_code(), "INCORRECT_DIMENSION_OPTIONS");

    let successful = patched.body["error"]["details"]["successful"]
        .as_array()
        .unwrap();
    assert_eq!(successful.len(), 1);
    assert_eq!(successful[0]["op"], "remove");
    let cause = &patched.body["error"]["details"]["cause"];
    assert_eq!(cause["code"], "INCORRECT_DIMENSION_OPTIONS");
    assert_eq!(cause["details"]["options"], json!(["99"]));

    let etag = patched.etag();
    assert_eq!(patched.body["error"]["details"]["etag"], etag.as_str());

    let options = call(Method::GET, format!("/filters/{id}/dimensions/age/options"))
        .send(&app)
        .await;
    assert_eq!(sorted_options(&options.body), vec!["33"]);
    assert_eq!(options.etag(), etag);
}

#[tokio::test]
async fn submit_on_create_enqueues_one_output() {
    let mut api = common::api();
    let app = api.router();

    let created = call(Method::POST, "/filters?submitted=true")
        .json(json!({
            "dataset": {"id": "d", "edition": "2017", "version": 1},
            "dimensions": [{"name": "sex", "options": ["f"]}]
        }))
        .send(&app)
        .await;
    assert_eq!(created.status, StatusCode::CREATED, "{}", created.body);
    assert_eq!(created.body["state"], "submitted");
    let events = created.body["events"].as_array().unwrap();
    assert!(events.iter().any(|e| e["type"] == "FilterOutputCreated"));

    let output_id = created.body["links"]["filter_output"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let envelope = api.try_next_submission().expect("one submission");
    assert_eq!(envelope.message.filter_output_id, output_id);
    assert!(api.try_next_submission().is_none());

    let output = call(Method::GET, format!("/filter-outputs/{output_id}"))
        .send(&app)
        .await;
    assert_eq!(output.status, StatusCode::OK);
    assert_eq!(output.body["filter_id"], created.body["filter_id"]);
    assert_eq!(output.body["state"], "created");
}

#[tokio::test]
async fn submit_through_update() {
    let mut api = common::api();
    let app = api.router();
    let (id, e0) = create_blueprint(&app).await;

    let submitted = call(Method::PUT, format!("/filters/{id}?submitted=true"))
        .if_match(&e0)
        .json(json!({}))
        .send(&app)
        .await;
    assert_eq!(submitted.status, StatusCode::OK, "{}", submitted.body);
    assert_eq!(submitted.body["state"], "submitted");
    assert!(api.try_next_submission().is_some());

    // A submitted blueprint takes no further edits.
    let again = call(Method::POST, format!("/filters/{id}/dimensions/age/options/28"))
        .if_match(submitted.etag())
        .send(&app)
        .await;
    assert_eq!(again.status, StatusCode::FORBIDDEN);
    assert_eq!(again.error_code(), "ALREADY_SUBMITTED");
}

async fn submitted_output(api: &mut FilterApi) -> String {
    let created = call(Method::POST, "/filters?submitted=true")
        .json(json!({
            "dataset": {"id": "d", "edition": "2017", "version": 1},
            "dimensions": [{"name": "age", "options": ["27"]}]
        }))
        .send(&api.router())
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    api.try_next_submission()
        .expect("submission enqueued")
        .message
        .filter_output_id
}

#[tokio::test]
async fn completing_an_output() {
    let mut api = common::api();
    let output_id = submitted_output(&mut api).await;
    let app = api.router();

    let body = json!({
        "downloads": {
            "csv": {"size": "1", "public": "u1", "private": "p1"},
            "xls": {"skipped": true}
        }
    });
    let updated = call(Method::PUT, format!("/filter-outputs/{output_id}"))
        .authenticated()
        .json(body.clone())
        .send(&app)
        .await;
    assert_eq!(updated.status, StatusCode::OK, "{}", updated.body);

    let read = call(Method::GET, format!("/filter-outputs/{output_id}"))
        .send(&app)
        .await;
    assert_eq!(read.body["state"], "completed");
    let events = read.body["events"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1]["type"], "FilterOutputCompleted");
    assert_eq!(
        read.body["downloads"]["csv"]["href"],
        format!("http://download/downloads/filter-outputs/{output_id}.csv")
    );

    // Second application changes neither state nor events.
    let repeated = call(Method::PUT, format!("/filter-outputs/{output_id}"))
        .authenticated()
        .json(json!({"downloads": {"xls": {"skipped": true}}}))
        .send(&app)
        .await;
    assert_eq!(repeated.status, StatusCode::OK);
    assert_eq!(repeated.body["events"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn private_links_only_reach_the_download_service() {
    let mut api = common::api();
    let output_id = submitted_output(&mut api).await;
    let app = api.router();

    let updated = call(Method::PUT, format!("/filter-outputs/{output_id}"))
        .authenticated()
        .json(json!({"downloads": {"csv": {"public": "u1", "private": "p1"}}}))
        .send(&app)
        .await;
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(updated.body["downloads"]["csv"]["private"], "");

    let anonymous = call(Method::GET, format!("/filter-outputs/{output_id}"))
        .send(&app)
        .await;
    assert_eq!(anonymous.body["downloads"]["csv"]["public"], "");
    assert_eq!(anonymous.body["downloads"]["csv"]["private"], "");

    let download = call(Method::GET, format!("/filter-outputs/{output_id}"))
        .download_service()
        .send(&app)
        .await;
    assert_eq!(download.body["downloads"]["csv"]["public"], "u1");
    assert_eq!(download.body["downloads"]["csv"]["private"], "p1");
}

#[tokio::test]
async fn output_events_are_appended() {
    let mut api = common::api();
    let output_id = submitted_output(&mut api).await;
    let app = api.router();

    let event = call(Method::POST, format!("/filter-outputs/{output_id}/events"))
        .authenticated()
        .json(json!({"type": "FilterOutputQueryStart", "time": "2026-01-02T03:04:05Z"}))
        .send(&app)
        .await;
    assert_eq!(event.status, StatusCode::CREATED);

    let read = call(Method::GET, format!("/filter-outputs/{output_id}"))
        .send(&app)
        .await;
    let events = read.body["events"].as_array().unwrap();
    assert_eq!(events.last().unwrap()["type"], "FilterOutputQueryStart");
}

#[tokio::test]
async fn unpublished_blueprints_are_promoted_once_published() {
    let catalog = Arc::new(common::catalog());
    let api = FilterApi::in_memory(common::config(), catalog.clone());
    let app = api.router();

    let created = call(Method::POST, "/filters")
        .authenticated()
        .json(json!({
            "dataset": {"id": "d", "edition": "2017", "version": 2},
            "dimensions": [{"name": "age", "options": ["27"]}]
        }))
        .send(&app)
        .await;
    assert_eq!(created.status, StatusCode::CREATED, "{}", created.body);
    assert_eq!(created.body["published"], false);
    let id = created.body["filter_id"].as_str().unwrap().to_string();

    let hidden = call(Method::GET, format!("/filters/{id}")).send(&app).await;
    assert_eq!(hidden.status, StatusCode::NOT_FOUND);

    let visible = call(Method::GET, format!("/filters/{id}"))
        .authenticated()
        .send(&app)
        .await;
    assert_eq!(visible.status, StatusCode::OK);

    catalog.put_version(&DatasetRef::new("d", "2017", 2), "inst-2", true);

    let promoted = call(Method::GET, format!("/filters/{id}")).send(&app).await;
    assert_eq!(promoted.status, StatusCode::OK);
    assert_eq!(promoted.body["published"], true);
}

#[tokio::test]
async fn anonymous_create_on_unpublished_version_is_not_found() {
    let api = common::api();
    let app = api.router();

    let created = call(Method::POST, "/filters")
        .json(json!({
            "dataset": {"id": "d", "edition": "2017", "version": 2},
            "dimensions": []
        }))
        .send(&app)
        .await;
    assert_eq!(created.status, StatusCode::NOT_FOUND);
    assert_eq!(created.error_code(), "VERSION_NOT_FOUND");
}
