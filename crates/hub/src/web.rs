use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use rumqttc::AsyncClient;
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::db::Db;
use crate::model::OverrideCommand;
use crate::mqtt::publish_status;
use crate::state::SharedState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Clone)]
struct AppState {
    shared: SharedState,
    db: Db,
    /// Republishes retained status after an override; absent in tests.
    mqtt: Option<AsyncClient>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(shared: SharedState, db: Db, mqtt: Option<AsyncClient>) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/areas/{id}/readings", get(api_readings))
        .route("/api/areas/{id}/sessions", get(api_sessions))
        .route("/api/areas/{id}/alerts", get(api_alerts))
        .route("/api/areas/{id}/override", post(api_override))
        .route("/api/alerts/{id}/resolve", post(api_resolve_alert))
        .with_state(AppState { shared, db, mqtt })
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<i64>,
    #[serde(default)]
    unresolved: bool,
}

impl ListParams {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[derive(Debug, Deserialize)]
struct OverrideBody {
    command: OverrideCommand,
}

fn not_found(what: String) -> Response {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": what }))).into_response()
}

fn internal(e: anyhow::Error) -> Response {
    error!("api: {e:#}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "internal error" })),
    )
        .into_response()
}

async fn area_known(app: &AppState, area_id: &str) -> bool {
    app.shared.read().await.areas.contains_key(area_id)
}

async fn api_status(State(app): State<AppState>) -> impl IntoResponse {
    let st = app.shared.read().await;
    Json(st.to_status())
}

async fn api_readings(
    State(app): State<AppState>,
    Path(area_id): Path<String>,
    Query(params): Query<ListParams>,
) -> Response {
    if !area_known(&app, &area_id).await {
        return not_found(format!("unknown area '{area_id}'"));
    }
    match app.db.list_readings(&area_id, params.limit()).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => internal(e),
    }
}

async fn api_sessions(
    State(app): State<AppState>,
    Path(area_id): Path<String>,
    Query(params): Query<ListParams>,
) -> Response {
    if !area_known(&app, &area_id).await {
        return not_found(format!("unknown area '{area_id}'"));
    }
    match app.db.list_sessions(&area_id, params.limit()).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => internal(e),
    }
}

async fn api_alerts(
    State(app): State<AppState>,
    Path(area_id): Path<String>,
    Query(params): Query<ListParams>,
) -> Response {
    if !area_known(&app, &area_id).await {
        return not_found(format!("unknown area '{area_id}'"));
    }
    match app
        .db
        .list_alerts(&area_id, params.unresolved, params.limit())
        .await
    {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => internal(e),
    }
}

/// Takes effect on the area's next snapshot.
async fn api_override(
    State(app): State<AppState>,
    Path(area_id): Path<String>,
    Json(body): Json<OverrideBody>,
) -> Response {
    let over = body.command.to_override();
    let mut st = app.shared.write().await;
    if !st.set_override(&area_id, over) {
        return not_found(format!("unknown area '{area_id}'"));
    }
    info!(area = %area_id, mode = over.mode(), forced_active = ?over.forced_active, "override set via api");
    if let (Some(client), Some((decision, current))) = (&app.mqtt, st.status_of(&area_id)) {
        publish_status(client, &area_id, &decision, current);
    }
    Json(over).into_response()
}

async fn api_resolve_alert(State(app): State<AppState>, Path(id): Path<i64>) -> Response {
    match app.db.resolve_alert(id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found(format!("no unresolved alert with id {id}")),
        Err(e) => internal(e),
    }
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(shared: SharedState, db: Db, mqtt: AsyncClient) -> anyhow::Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!("web api listening on http://{addr}");

    axum::serve(listener, router(shared, db, Some(mqtt))).await?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
