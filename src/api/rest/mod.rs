pub mod medicines;
pub mod orders;
pub mod partners;
pub mod users;
pub mod ws;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{FromRequestParts, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::IntoResponse;
use axum::routing::get;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::engine::orders::{OrderStats, stats};
use crate::error::AppError;
use crate::models::user::Requester;
use crate::state::AppState;

pub const USER_HEADER: &str = "x-user-id";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(medicines::router())
        .merge(users::router())
        .merge(orders::router())
        .merge(partners::router())
        .route("/admin/stats", get(admin_stats))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// The caller, resolved from the `x-user-id` header against the user directory.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub Requester);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Forbidden(format!("missing {USER_HEADER} header")))?;

        let user_id = Uuid::parse_str(raw.trim())
            .map_err(|_| AppError::InvalidInput(format!("{USER_HEADER} is not a valid id")))?;

        resolve_requester(state, user_id).map(CurrentUser)
    }
}

pub(crate) fn resolve_requester(state: &AppState, user_id: Uuid) -> Result<Requester, AppError> {
    state.users.requester(user_id).map_err(|err| match err {
        AppError::NotFound(_) => AppError::Forbidden(format!("unknown user {user_id}")),
        other => other,
    })
}

pub(crate) fn require_admin(requester: &Requester) -> Result<(), AppError> {
    if requester.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "this action is reserved for administrators".to_string(),
        ))
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    orders: usize,
    partners: usize,
    medicines: usize,
    scheduled_tasks: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        orders: state.orders.len(),
        partners: state.partners.list().len(),
        medicines: state.catalog.list().len(),
        scheduled_tasks: state.scheduler.pending(),
    })
}

async fn admin_stats(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
) -> Result<Json<OrderStats>, AppError> {
    require_admin(&requester)?;
    Ok(Json(stats(&state)))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
