use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use tracing::info;

use crate::api::rest::{CurrentUser, require_admin};
use crate::error::AppError;
use crate::identity::{NewUser, SignUp};
use crate::models::user::User;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", post(sign_up))
        .route("/admin/users", post(create_staff_user))
}

// Sign-up stands in for the real account service, so it takes no requester and only
// ever creates customers.
async fn sign_up(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SignUp>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let user = state.users.register(payload.into())?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn create_staff_user(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
    Json(payload): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), AppError> {
    require_admin(&requester)?;
    let user = state.users.register(payload)?;
    info!(user_id = %user.id, role = ?user.role, created_by = %requester.user_id, "account created by administrator");
    Ok((StatusCode::CREATED, Json(user)))
}
