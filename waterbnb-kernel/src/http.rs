/**
 * API REST WATERBNB - Surface HTTP du kernel
 *
 * Routes :
 * - GET /open?idu=..&idswp=..  demande d'accès (400/403/404/409/200, 503 si annuaire HS)
 * - GET /pools                 piscines connues avec fraîcheur
 * - GET /users                 logins de l'annuaire (debug)
 * - GET /                      état du service
 * - GET /health, /system/health
 *
 * Aucune authentification de l'appelant : le kernel est derrière le proxy du campus.
 */

use crate::access::{AccessController, AccessOutcome, Denial, ACCEPTED_REASON};
use crate::health::{HealthTracker, KernelHealth};
use crate::registry::{to_view, OccupancyRegistry, PoolView};
use crate::store::UserDirectory;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

#[derive(Clone)]
pub struct AppState {
    pub registry: OccupancyRegistry,
    pub access: Arc<AccessController>,
    pub users: Arc<dyn UserDirectory>,
    pub health_tracker: HealthTracker,
    pub stale_after: Duration,
}

#[derive(Debug, Deserialize)]
struct OpenParams {
    idu: Option<String>,
    idswp: Option<String>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/open", get(open_pool))
        .route("/pools", get(list_pools))
        .route("/users", get(list_users))
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .with_state(app_state)
}

// GET /
async fn index(State(app): State<AppState>) -> Json<Value> {
    let pools = app.registry.pool_ids();
    Json(json!({
        "service": "WaterBnB",
        "status": "running",
        "pools_tracked": pools.len(),
        "pools": pools,
    }))
}

// GET /open
async fn open_pool(
    State(app): State<AppState>,
    Query(params): Query<OpenParams>,
) -> (StatusCode, Json<Value>) {
    let outcome = app
        .access
        .authorize(params.idu.as_deref(), params.idswp.as_deref())
        .await;

    match outcome {
        Ok(AccessOutcome::Malformed) => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "status": "denied",
                "reason": "missing parameters",
                "required": ["idu", "idswp"],
            })),
        ),
        Ok(AccessOutcome::Denied(denial)) => {
            let code = match denial {
                Denial::UnknownUser => StatusCode::FORBIDDEN,
                Denial::UnknownPool => StatusCode::NOT_FOUND,
                Denial::PoolOccupied => StatusCode::CONFLICT,
            };
            (code, Json(json!({ "status": "denied", "reason": denial.reason() })))
        }
        Ok(AccessOutcome::Accepted) => (
            StatusCode::OK,
            Json(json!({
                "status": "accepted",
                "reason": ACCEPTED_REASON,
                "user": params.idu,
                "pool": params.idswp,
                "message": "Access granted, enjoy your swim!",
            })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "access request failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "error", "reason": "user directory unavailable" })),
            )
        }
    }
}

// GET /pools
async fn list_pools(State(app): State<AppState>) -> Json<Value> {
    let now = OffsetDateTime::now_utc();
    let pools: HashMap<String, PoolView> = app
        .registry
        .snapshot()
        .iter()
        .map(|p| (p.pool_id.clone(), to_view(p, app.stale_after, now)))
        .collect();
    Json(json!({ "count": pools.len(), "pools": pools }))
}

// GET /users
async fn list_users(State(app): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let users = app.users.list_users().await.map_err(|e| {
        tracing::error!(error = %e, "failed to list users");
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    let logins: Vec<Value> = users.iter().map(|u| json!({ "login": u.login })).collect();
    Ok(Json(json!({ "users": logins })))
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(&app.registry))
}
