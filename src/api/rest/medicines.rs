use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use uuid::Uuid;

use crate::api::rest::{CurrentUser, require_admin};
use crate::catalog::NewMedicine;
use crate::error::AppError;
use crate::models::medicine::Medicine;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/medicines", post(create_medicine).get(list_medicines))
        .route("/medicines/:id", get(get_medicine).delete(delete_medicine))
}

async fn create_medicine(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
    Json(payload): Json<NewMedicine>,
) -> Result<(StatusCode, Json<Medicine>), AppError> {
    require_admin(&requester)?;
    let medicine = state.catalog.add(payload)?;
    Ok((StatusCode::CREATED, Json(medicine)))
}

async fn list_medicines(State(state): State<Arc<AppState>>) -> Json<Vec<Medicine>> {
    Json(state.catalog.list())
}

async fn get_medicine(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Medicine>, AppError> {
    state.catalog.find_by_id(id).map(Json)
}

async fn delete_medicine(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Medicine>, AppError> {
    require_admin(&requester)?;
    state.catalog.remove(id).map(Json)
}
