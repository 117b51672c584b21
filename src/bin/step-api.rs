use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rusqlite::Connection;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use stepcore::config::{load_config, Config};
use stepcore::events::SqliteEventLog;
use stepcore::ledger::SqliteLedger;
use stepcore::lookup::point_to_triangle;
use stepcore::pipeline::Pipeline;
use stepcore::polygon::polygon_of;
use stepcore::scoring::MockAttestationVerifier;
use stepcore::store::{BoundingBox, SqliteTriangleStore, TriangleStore};
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
struct AppState {
    store: Arc<dyn TriangleStore>,
    pipeline: Arc<Pipeline>,
    max_bbox_results: usize,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

fn open_config() -> Config {
    let path = std::env::var("STEP_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    load_config(&path).unwrap_or_default()
}

#[derive(Deserialize)]
struct TriangleAtQuery {
    lat: f64,
    lon: f64,
    #[serde(default = "default_level")]
    level: u8,
}

fn default_level() -> u8 {
    10
}

async fn triangle_at(
    State(state): State<AppState>,
    Query(q): Query<TriangleAtQuery>,
) -> Response {
    let id = match point_to_triangle(q.lat, q.lon, q.level) {
        Ok(id) => id,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let geom = polygon_of(&id);
    let record = state.store.get(&id.encode()).ok().flatten();
    Json(serde_json::json!({
        "id": id.encode(),
        "face": id.face,
        "level": id.level,
        "centroid": geom.centroid,
        "polygon": geom.polygon,
        "triangle": record,
    }))
    .into_response()
}

#[derive(Deserialize)]
struct BboxQuery {
    min_lon: f64,
    min_lat: f64,
    max_lon: f64,
    max_lat: f64,
    #[serde(default = "default_level")]
    level: u8,
    max: Option<usize>,
}

async fn search_bbox(State(state): State<AppState>, Query(q): Query<BboxQuery>) -> Response {
    let bbox = BoundingBox {
        min_lon: q.min_lon,
        min_lat: q.min_lat,
        max_lon: q.max_lon,
        max_lat: q.max_lat,
    };
    let max = q.max.unwrap_or(state.max_bbox_results);
    match state.store.query_bbox(bbox, q.level, max) {
        Ok(triangles) => Json(triangles).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
struct ActiveQuery {
    #[serde(default = "default_level")]
    level: u8,
    max: Option<usize>,
}

async fn active_triangles(State(state): State<AppState>, Query(q): Query<ActiveQuery>) -> Response {
    let max = q.max.unwrap_or(state.max_bbox_results);
    match state.store.query_active(q.level, max) {
        Ok(triangles) => Json(triangles).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn triangle_state(
    State(state): State<AppState>,
    Path(triangle_id): Path<String>,
) -> Response {
    match state.store.get(&triangle_id) {
        Ok(Some(t)) => Json(t).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "triangle not found").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn submit_proof(State(state): State<AppState>, body: String) -> Response {
    let response = state.pipeline.submit(&body, now_ms());
    let status = if response.ok {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(response)).into_response()
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let config = open_config();

    let conn = Connection::open(&config.database.path).expect("failed to open database");
    let store: Arc<dyn TriangleStore> =
        Arc::new(SqliteTriangleStore::open(conn).expect("failed to initialize triangle store"));

    let events_conn = Connection::open(&config.database.path).expect("failed to open database");
    let events = Box::new(SqliteEventLog::open(events_conn).expect("failed to initialize event log"));
    let ledger_conn = Connection::open(&config.database.path).expect("failed to open database");
    let ledger = Box::new(SqliteLedger::open(ledger_conn).expect("failed to initialize ledger"));
    let attestation = Box::new(MockAttestationVerifier);

    let max_bbox_results = config.mesh.max_bbox_results;
    let pipeline = Arc::new(Pipeline::new(config, store.clone(), events, ledger, attestation));

    let state = AppState {
        store,
        pipeline,
        max_bbox_results,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/triangles/at", get(triangle_at))
        .route("/triangles/bbox", get(search_bbox))
        .route("/triangles/active", get(active_triangles))
        .route("/triangles/:id", get(triangle_state))
        .route("/proofs", post(submit_proof))
        .with_state(state)
        .layer(cors);

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind to {}: {}", addr, e));
    log::info!("step-api listening on http://{}", addr);
    if let Err(e) = axum::serve(listener, app).await {
        log::error!("api server error: {}", e);
    }
}
