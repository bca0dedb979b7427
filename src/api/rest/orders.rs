use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::rest::{CurrentUser, require_admin};
use crate::engine::dispatch::{AssignmentMode, assign_partner};
use crate::engine::orders::{self, CreateOrder, find_order};
use crate::engine::progression::{advance, auto_advance, cancel, rate_delivery};
use crate::error::AppError;
use crate::models::order::{Order, OrderStatus, TrackingEntry};
use crate::models::partner::{GeoPoint, PartnerSummary};
use crate::models::user::Requester;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/tracking", get(get_tracking))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/status", patch(update_status))
        .route("/orders/:id/advance", post(advance_order))
        .route("/orders/:id/assign", post(assign_order))
        .route("/orders/:id/rating", post(rate_order))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct RatingRequest {
    pub score: u8,
}

#[derive(Serialize)]
pub struct TrackingResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub delivery_partner: Option<Uuid>,
    pub estimated_delivery_time: Option<chrono::DateTime<chrono::Utc>>,
    pub tracking: Vec<TrackingEntry>,
    pub path: Vec<TrackingEntry>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
    Json(payload): Json<CreateOrder>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let order = orders::create_order(&state, requester.user_id, payload)?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
) -> Json<Vec<Order>> {
    Json(orders::list_orders(&state, &requester))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    orders::get_order(&state, id, &requester).map(Json)
}

async fn get_tracking(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<TrackingResponse>, AppError> {
    let order = orders::get_order(&state, id, &requester)?;
    Ok(Json(TrackingResponse {
        order_id: order.id,
        status: order.status,
        delivery_partner: order.delivery_partner,
        estimated_delivery_time: order.estimated_delivery_time,
        path: order.tracking_path(),
        tracking: order.delivery_tracking,
    }))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    cancel(&state, id, &requester).map(Json)
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, AppError> {
    ensure_can_progress(&state, id, &requester)?;
    let target: OrderStatus = payload.status.parse()?;
    advance(&state, id, target, payload.message, payload.location).map(Json)
}

async fn advance_order(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    ensure_can_progress(&state, id, &requester)?;
    auto_advance(&state, id).map(Json)
}

async fn assign_order(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
    Path(id): Path<Uuid>,
    Json(mode): Json<AssignmentMode>,
) -> Result<Json<Order>, AppError> {
    require_admin(&requester)?;
    assign_partner(&state, id, mode).map(Json)
}

async fn rate_order(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RatingRequest>,
) -> Result<Json<PartnerSummary>, AppError> {
    let partner = rate_delivery(&state, id, &requester, payload.score)?;
    Ok(Json(partner.summary()))
}

/// Admins move any order; a delivery partner only the orders bound to it.
fn ensure_can_progress(state: &AppState, order_id: Uuid, requester: &Requester) -> Result<(), AppError> {
    if requester.is_admin() {
        return Ok(());
    }

    let order = find_order(state, order_id)?;
    let bound_to_requester = match (order.delivery_partner, state.partners.find_by_user(requester.user_id)) {
        (Some(bound), Some(partner)) => bound == partner.id,
        _ => false,
    };
    if bound_to_requester {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "order {order_id} can only be progressed by an administrator or its delivery partner"
        )))
    }
}
