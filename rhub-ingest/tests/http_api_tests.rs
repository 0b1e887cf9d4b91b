// HTTP API tests over the real router with mock connectors
//
// Exercises the two logical interfaces the core exposes: trigger/inspect
// ingestion runs, and query the canonical dataset.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use rhub_common::events::EventBus;
use rhub_ingest::config::IngestConfig;
use rhub_ingest::connectors::ConnectorRegistry;
use rhub_ingest::db;
use rhub_ingest::ingest::IngestOrchestrator;
use rhub_ingest::search::SearchIndex;
use rhub_ingest::types::{ConnectorCaps, FetchError, FetchOutput, RawRecord, SourceConnector};
use rhub_ingest::AppState;

struct ScriptedConnector {
    code: &'static str,
    records: Vec<RawRecord>,
}

#[async_trait]
impl SourceConnector for ScriptedConnector {
    fn source_code(&self) -> &'static str {
        self.code
    }

    fn caps(&self) -> ConnectorCaps {
        ConnectorCaps {
            incremental_fetch: true,
            fetch_by_id: false,
        }
    }

    async fn fetch(&self, _cursor: Option<&str>) -> Result<FetchOutput, FetchError> {
        Ok(FetchOutput {
            records: self.records.clone(),
            next_cursor: "2099-01-01".to_string(),
        })
    }
}

fn cpsc_record(id: &str, name: &str, brand: &str, hazard: &str) -> RawRecord {
    RawRecord::new(
        id,
        serde_json::json!({
            "RecallID": id,
            "Title": name,
            "RecallDate": "2024-01-10",
            "Description": hazard,
            "Products": [{"Name": name, "Type": "Nursery"}],
            "Manufacturers": [{"Name": brand}],
            "Hazards": [{"Name": hazard}]
        }),
    )
}

async fn test_app() -> Router {
    let pool = db::init_memory_pool().await.unwrap();

    let mut registry = ConnectorRegistry::new();
    registry.register(Arc::new(ScriptedConnector {
        code: "cpsc",
        records: vec![
            cpsc_record("24-101", "Baby Monitor", "SafeView", "Burn hazard"),
            cpsc_record("24-102", "Cordless Drill", "PowerMax", "Laceration hazard"),
        ],
    }));

    let search = Arc::new(SearchIndex::new());
    let event_bus = EventBus::new(64);
    let orchestrator = Arc::new(IngestOrchestrator::new(
        pool.clone(),
        Arc::new(registry),
        search.clone(),
        event_bus.clone(),
        IngestConfig::default(),
    ));

    let state = AppState::new(pool, event_bus, search, orchestrator);
    rhub_ingest::build_router(state)
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn get(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

/// Start a run and poll until it reaches a terminal state
async fn run_to_completion(app: &Router) -> serde_json::Value {
    let response = post_json(app, "/ingest/start", serde_json::json!({})).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted = json_body(response).await;
    let run_id = accepted["run_id"].as_str().unwrap().to_string();

    for _ in 0..100 {
        let response = get(app, &format!("/ingest/runs/{}", run_id)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let run = json_body(response).await;
        match run["state"].as_str().unwrap() {
            "PENDING" | "RUNNING" => tokio::time::sleep(Duration::from_millis(20)).await,
            _ => return run,
        }
    }
    panic!("run {} never reached a terminal state", run_id);
}

#[tokio::test]
async fn health_reports_service_state() {
    let app = test_app().await;
    let response = get(&app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["canonical_rows"], 0);
}

#[tokio::test]
async fn start_ingestion_runs_to_completion() {
    let app = test_app().await;
    let run = run_to_completion(&app).await;

    assert_eq!(run["state"], "COMPLETED");
    let outcomes = run["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0]["records_new"], 2);
    assert_eq!(outcomes[0]["succeeded"], true);
}

#[tokio::test]
async fn unknown_source_is_rejected() {
    let app = test_app().await;
    let response = post_json(
        &app,
        "/ingest/start",
        serde_json::json!({"sources": ["no_such_agency"]}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_run_id_is_not_found() {
    let app = test_app().await;
    let response = get(
        &app,
        "/ingest/runs/00000000-0000-0000-0000-000000000000",
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn search_matches_fuzzy_case_insensitive_input() {
    let app = test_app().await;
    run_to_completion(&app).await;

    let response = get(&app, "/search?q=BABY").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;

    assert_eq!(body["count"], 1);
    assert_eq!(body["results"][0]["product_name"], "Baby Monitor");
    assert!(body["results"][0]["similarity"].as_f64().unwrap() > 0.5);
}

#[tokio::test]
async fn search_min_similarity_is_caller_adjustable() {
    let app = test_app().await;
    run_to_completion(&app).await;

    // A permissive floor returns more rows than a strict one
    let permissive = json_body(get(&app, "/search?q=monitor&min_similarity=0.1").await).await;
    let strict = json_body(get(&app, "/search?q=monitor&min_similarity=0.95").await).await;
    assert!(permissive["count"].as_u64().unwrap() >= strict["count"].as_u64().unwrap());
}

#[tokio::test]
async fn risk_recalculation_reports_summary() {
    let app = test_app().await;
    run_to_completion(&app).await;

    let response = post_json(&app, "/risk/recalculate", serde_json::json!({"scope": "all"})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["scanned"], 2);
}
