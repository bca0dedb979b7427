use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::is_valid_point;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    #[default]
    Bike,
    Scooter,
    Bicycle,
    Car,
    /// Anything the speed table does not know about.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VehicleInfo {
    #[serde(default)]
    pub vehicle_type: VehicleType,
    #[serde(default)]
    pub vehicle_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partner {
    pub id: Uuid,
    pub partner_code: String,
    pub user_id: Uuid,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub vehicle: VehicleInfo,
    pub current_location: GeoPoint,
    pub location_updated_at: DateTime<Utc>,
    pub is_active: bool,
    pub is_available: bool,
    pub current_orders: Vec<Uuid>,
    pub rating: f64,
    pub total_deliveries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Partner {
    pub fn is_eligible(&self) -> bool {
        self.is_active && self.is_available
    }

    pub fn summary(&self) -> PartnerSummary {
        PartnerSummary {
            id: self.id,
            partner_code: self.partner_code.clone(),
            name: self.name.clone(),
            phone: self.phone.clone(),
            vehicle: self.vehicle.clone(),
            current_location: self.current_location,
            rating: self.rating,
        }
    }
}

/// The slice of a partner that customers get to see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartnerSummary {
    pub id: Uuid,
    pub partner_code: String,
    pub name: String,
    pub phone: String,
    pub vehicle: VehicleInfo,
    pub current_location: GeoPoint,
    pub rating: f64,
}

/// Profile used both for explicit registration and for quick-create during dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartnerProfile {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub vehicle: VehicleInfo,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

impl PartnerProfile {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::InvalidInput("name cannot be empty".to_string()));
        }
        if self.phone.trim().is_empty() {
            return Err(AppError::InvalidInput("phone cannot be empty".to_string()));
        }
        if let Some(point) = &self.location {
            if !is_valid_point(point) {
                return Err(AppError::InvalidInput(
                    "location is not a valid coordinate".to_string(),
                ));
            }
        }
        Ok(())
    }
}
