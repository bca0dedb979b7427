use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::rest::{CurrentUser, require_admin};
use crate::engine::tracking::record_location;
use crate::error::AppError;
use crate::models::partner::{GeoPoint, Partner, PartnerProfile};
use crate::models::user::{Requester, UserRole};
use crate::state::AppState;

const DEFAULT_NEARBY_RADIUS_KM: f64 = 10.0;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/partners", post(create_partner).get(list_partners))
        .route("/partners/nearby", get(nearby_partners))
        .route("/partners/:id/location", patch(update_location))
        .route("/partners/:id/availability", patch(update_availability))
        .route("/partners/:id/active", patch(update_active))
        .route("/partners/:id/rating", post(rate_partner))
}

#[derive(Deserialize)]
pub struct CreatePartnerRequest {
    pub user_id: Uuid,
    #[serde(flatten)]
    pub profile: PartnerProfile,
}

#[derive(Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: Option<f64>,
}

#[derive(Serialize)]
pub struct NearbyPartner {
    #[serde(flatten)]
    pub partner: Partner,
    pub distance_km: f64,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

#[derive(Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub is_available: bool,
}

#[derive(Deserialize)]
pub struct UpdateActiveRequest {
    pub is_active: bool,
}

#[derive(Deserialize)]
pub struct RatingRequest {
    pub score: u8,
}

async fn create_partner(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
    Json(payload): Json<CreatePartnerRequest>,
) -> Result<(StatusCode, Json<Partner>), AppError> {
    require_admin(&requester)?;

    let user = state.users.find_by_id(payload.user_id)?;
    if user.role != UserRole::DeliveryPartner {
        return Err(AppError::InvalidInput(format!(
            "user {} is not a delivery partner account",
            user.id
        )));
    }
    let partner = state.partners.create(&user, payload.profile)?;
    Ok((StatusCode::CREATED, Json(partner)))
}

async fn list_partners(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
) -> Result<Json<Vec<Partner>>, AppError> {
    require_admin(&requester)?;
    Ok(Json(state.partners.list()))
}

async fn nearby_partners(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<Vec<NearbyPartner>>, AppError> {
    require_admin(&requester)?;

    let radius_km = query.radius_km.unwrap_or(DEFAULT_NEARBY_RADIUS_KM);
    if !radius_km.is_finite() || radius_km <= 0.0 {
        return Err(AppError::InvalidInput("radius_km must be > 0".to_string()));
    }
    let point = GeoPoint {
        lat: query.lat,
        lng: query.lng,
    };
    if !crate::geo::is_valid_point(&point) {
        return Err(AppError::InvalidInput(
            "location is not a valid coordinate".to_string(),
        ));
    }

    let found = state
        .partners
        .find_nearby(&point, radius_km * 1_000.0, &state.cancel_signal())?
        .into_iter()
        .map(|(partner, distance_km)| NearbyPartner {
            partner,
            distance_km,
        })
        .collect();
    Ok(Json(found))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Partner>, AppError> {
    ensure_self_or_admin(&state, id, &requester)?;
    record_location(&state, id, payload.location).map(Json)
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAvailabilityRequest>,
) -> Result<Json<Partner>, AppError> {
    require_admin(&requester)?;
    state.partners.set_availability(id, payload.is_available).map(Json)
}

async fn update_active(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateActiveRequest>,
) -> Result<Json<Partner>, AppError> {
    require_admin(&requester)?;
    state.partners.set_active(id, payload.is_active).map(Json)
}

async fn rate_partner(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RatingRequest>,
) -> Result<Json<Partner>, AppError> {
    require_admin(&requester)?;
    state.partners.apply_rating_delta(id, payload.score).map(Json)
}

fn ensure_self_or_admin(state: &AppState, partner_id: Uuid, requester: &Requester) -> Result<(), AppError> {
    if requester.is_admin() {
        return Ok(());
    }

    let partner = state.partners.find_by_id(partner_id)?;
    if partner.user_id == requester.user_id {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "only partner {} can report its own location",
            partner.partner_code
        )))
    }
}
