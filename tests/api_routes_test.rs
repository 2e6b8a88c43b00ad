use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use neuromap::cache::ResponseCache;
use neuromap::config::Config;
use neuromap::database::Database;
use neuromap::images::ImageStore;
use neuromap::locations::LocationService;
use neuromap::tasks::TaskService;
use neuromap::web::{build_router, AppState};

// Helper function to send requests to the app
async fn send_request(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Option<String>, Value) {
    let request_builder = Request::builder().method(method).uri(uri);

    let request = if let Some(body) = body {
        request_builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    } else {
        request_builder.body(Body::empty()).unwrap()
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let location = response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(json!({}))
    };

    (status, location, json)
}

async fn test_app() -> (Router, AppState, std::path::PathBuf) {
    let root = std::env::temp_dir().join(format!("neuromap-it-{}", uuid::Uuid::new_v4()));

    let mut config = Config::default();
    config.database.url = "sqlite::memory:".to_string();
    config.database.max_connections = Some(1);
    config.storage.coactivation_path = root.join("coactivation");
    config.storage.connectivity_path = root.join("fcmri");
    config.storage.decoding_path = root.join("decoding");
    config.storage.scatterplot_path = root.join("scatter");
    config.storage.gene_path = root.join("genes");
    config.storage.voxel_path = root.join("voxel");
    config.tasks.tool_command = "true".to_string();
    config.tasks.wait_timeout_seconds = 2;

    let database = Database::new(&config.database).await.unwrap();
    database.migrate().await.unwrap();

    let store = ImageStore::new(&config.storage);
    store.ensure_storage_dirs().await.unwrap();

    let cache = ResponseCache::new(&config.cache);
    let (tasks, worker) = TaskService::new(&config.tasks, store.clone());
    tokio::spawn(worker.run());

    let locations = LocationService::new(database.clone(), store.clone(), tasks.clone());

    let state = AppState {
        config,
        database,
        cache,
        locations,
        tasks,
        store,
    };
    (build_router(state.clone()), state, root)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _, root) = test_app().await;

    let (status, _, response) = send_request(&app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "healthy");
    assert!(response.get("timestamp").is_some());

    std::fs::remove_dir_all(root).ok();
}

#[tokio::test]
async fn test_noncanonical_coordinates_redirect() {
    let (app, _, root) = test_app().await;

    let (status, location, _) = send_request(
        &app,
        Method::GET,
        "/api/locations/?x=1&y=2&z=3&r=6",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::FOUND);
    // 1 -> 0, 2 stays, 3 -> 4; radius is preserved untouched
    assert_eq!(location.unwrap(), "/api/locations/?x=0&y=2&z=4&r=6");

    std::fs::remove_dir_all(root).ok();
}

#[tokio::test]
async fn test_redirect_preserves_unrelated_parameters() {
    let (app, _, root) = test_app().await;

    let (status, location, _) = send_request(
        &app,
        Method::GET,
        "/api/locations/?x=5&y=5&z=5&r=10&set=terms_20k",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::FOUND);
    let location = location.unwrap();
    assert!(location.contains("x=4") || location.contains("x=6"));
    assert!(location.contains("set=terms_20k"));
    assert!(location.contains("r=10"));

    std::fs::remove_dir_all(root).ok();
}

#[tokio::test]
async fn test_canonical_coordinates_return_location_payload() {
    let (app, _, root) = test_app().await;

    let (status, _, response) = send_request(
        &app,
        Method::GET,
        "/api/locations/?x=0&y=2&z=4",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["data"]["x"], 0);
    assert_eq!(response["data"]["y"], 2);
    assert_eq!(response["data"]["z"], 4);
    // Default radius applies when r is absent
    assert_eq!(response["data"]["r"], 6);
    assert!(response["data"]["studies"].is_array());
    assert!(response["data"]["images"].is_array());

    std::fs::remove_dir_all(root).ok();
}

#[tokio::test]
async fn test_segment_routes_redirect_to_canonical_form() {
    let (app, _, root) = test_app().await;

    let (status, location, _) =
        send_request(&app, Method::GET, "/api/locations/1_2_3/studies/?dt=1", None).await;

    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(location.unwrap(), "/api/locations/0_2_4_6/studies/?dt=1");

    std::fs::remove_dir_all(root).ok();
}

#[tokio::test]
async fn test_malformed_location_segment_is_client_error() {
    let (app, _, root) = test_app().await;

    let (status, _, _) =
        send_request(&app, Method::GET, "/api/locations/not_a_point/studies/", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Malformed query parameters are rejected by the typed extractor
    let (status, _, _) =
        send_request(&app, Method::GET, "/api/locations/?x=a&y=2&z=4", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    std::fs::remove_dir_all(root).ok();
}

#[tokio::test]
async fn test_unknown_resources_are_404() {
    let (app, _, root) = test_app().await;

    let (status, _, _) = send_request(&app, Method::GET, "/api/studies/999999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send_request(&app, Method::GET, "/genes/NOSUCHGENE/decode", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send_request(&app, Method::GET, "/api/images/12345/download", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    std::fs::remove_dir_all(root).ok();
}
