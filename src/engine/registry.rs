use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::CancelSignal;
use crate::error::AppError;
use crate::geo::{haversine_km, is_valid_point};
use crate::models::partner::{GeoPoint, Partner, PartnerProfile};
use crate::models::user::User;
use crate::observability::metrics::Metrics;

const PARTNER_CODE_PREFIX: &str = "DP";
const PARTNER_CODE_LEN: usize = 6;
const PARTNER_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const DEFAULT_RATING: f64 = 5.0;

pub struct PartnerRegistry {
    partners: DashMap<Uuid, Partner>,
    by_user: DashMap<Uuid, Uuid>,
    by_code: DashMap<String, Uuid>,
    max_concurrent_orders: usize,
    metrics: Metrics,
}

impl PartnerRegistry {
    pub fn new(max_concurrent_orders: usize, metrics: Metrics) -> Self {
        Self {
            partners: DashMap::new(),
            by_user: DashMap::new(),
            by_code: DashMap::new(),
            max_concurrent_orders: max_concurrent_orders.max(1),
            metrics,
        }
    }

    pub fn max_concurrent_orders(&self) -> usize {
        self.max_concurrent_orders
    }

    pub fn create(&self, user: &User, profile: PartnerProfile) -> Result<Partner, AppError> {
        profile.validate()?;
        let location = profile
            .location
            .ok_or_else(|| AppError::InvalidInput("location is required".to_string()))?;

        let slot = match self.by_user.entry(user.id) {
            Entry::Occupied(_) => {
                return Err(AppError::Conflict(format!(
                    "user {} is already registered as a delivery partner",
                    user.id
                )));
            }
            Entry::Vacant(slot) => slot,
        };

        let id = Uuid::new_v4();
        let partner_code = self.claim_code(id);
        let now = Utc::now();
        let partner = Partner {
            id,
            partner_code,
            user_id: user.id,
            name: profile.name.trim().to_string(),
            phone: profile.phone.trim().to_string(),
            email: profile.email,
            vehicle: profile.vehicle,
            current_location: location,
            location_updated_at: now,
            is_active: true,
            is_available: true,
            current_orders: Vec::new(),
            rating: DEFAULT_RATING,
            total_deliveries: 0,
            created_at: now,
            updated_at: now,
        };

        self.partners.insert(id, partner.clone());
        slot.insert(id);

        info!(partner_id = %id, partner_code = %partner.partner_code, "partner registered");
        Ok(partner)
    }

    fn claim_code(&self, partner_id: Uuid) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let suffix: String = (0..PARTNER_CODE_LEN)
                .map(|_| {
                    let idx = rng.gen_range(0..PARTNER_CODE_ALPHABET.len());
                    PARTNER_CODE_ALPHABET[idx] as char
                })
                .collect();
            let code = format!("{PARTNER_CODE_PREFIX}{suffix}");

            if let Entry::Vacant(slot) = self.by_code.entry(code.clone()) {
                slot.insert(partner_id);
                return code;
            }
        }
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Partner, AppError> {
        self.partners
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("partner {id} not found")))
    }

    pub fn find_by_user(&self, user_id: Uuid) -> Option<Partner> {
        let id = *self.by_user.get(&user_id)?;
        self.partners.get(&id).map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<Partner> {
        let mut partners: Vec<Partner> = self
            .partners
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        partners.sort_by(|a, b| a.partner_code.cmp(&b.partner_code));
        partners
    }

    /// Active, available partners within the radius, nearest first, with their distance in km.
    pub fn find_nearby(
        &self,
        point: &GeoPoint,
        max_distance_meters: f64,
        cancel: &CancelSignal,
    ) -> Result<Vec<(Partner, f64)>, AppError> {
        let max_km = max_distance_meters / 1_000.0;
        let mut found = Vec::new();

        for entry in self.partners.iter() {
            if *cancel.borrow() {
                return Err(AppError::UpstreamFailure(
                    "partner search cancelled".to_string(),
                ));
            }

            let partner = entry.value();
            if !partner.is_eligible() || partner.current_orders.len() >= self.max_concurrent_orders
            {
                continue;
            }

            let distance = haversine_km(&partner.current_location, point);
            if distance <= max_km {
                found.push((partner.clone(), distance));
            }
        }

        found.sort_by(|a, b| a.1.total_cmp(&b.1));
        debug!(candidates = found.len(), radius_m = max_distance_meters, "nearby partner search");
        Ok(found)
    }

    pub fn update_location(&self, id: Uuid, point: GeoPoint) -> Result<Partner, AppError> {
        if !is_valid_point(&point) {
            return Err(AppError::InvalidInput(
                "location is not a valid coordinate".to_string(),
            ));
        }

        let mut partner = self.get_mut(id)?;
        let now = Utc::now();
        partner.current_location = point;
        partner.location_updated_at = now;
        partner.updated_at = now;
        Ok(partner.clone())
    }

    pub fn set_availability(&self, id: Uuid, is_available: bool) -> Result<Partner, AppError> {
        let mut partner = self.get_mut(id)?;
        partner.is_available = is_available;
        partner.updated_at = Utc::now();
        Ok(partner.clone())
    }

    pub fn set_active(&self, id: Uuid, is_active: bool) -> Result<Partner, AppError> {
        let mut partner = self.get_mut(id)?;
        partner.is_active = is_active;
        partner.updated_at = Utc::now();
        info!(partner_id = %id, is_active, "partner activity changed");
        Ok(partner.clone())
    }

    /// Folds one score into the running average, under the partner's write guard.
    pub fn apply_rating_delta(&self, id: Uuid, score: u8) -> Result<Partner, AppError> {
        if !(1..=5).contains(&score) {
            return Err(AppError::InvalidInput(format!(
                "rating must be between 1 and 5, got {score}"
            )));
        }

        let mut partner = self.get_mut(id)?;
        let count = partner.total_deliveries as f64;
        let averaged = (partner.rating * count + score as f64) / (count + 1.0);
        partner.rating = ((averaged * 10.0).round() / 10.0).clamp(1.0, 5.0);
        partner.total_deliveries += 1;
        partner.updated_at = Utc::now();
        Ok(partner.clone())
    }

    /// Takes one capacity slot. Re-recording the same order is a no-op.
    pub fn record_order_assigned(&self, id: Uuid, order_id: Uuid) -> Result<Partner, AppError> {
        let mut partner = self.get_mut(id)?;

        if partner.current_orders.contains(&order_id) {
            return Ok(partner.clone());
        }
        if !partner.is_active {
            return Err(AppError::Conflict(format!(
                "partner {} is not active",
                partner.partner_code
            )));
        }
        if !partner.is_available || partner.current_orders.len() >= self.max_concurrent_orders {
            return Err(AppError::Conflict(format!(
                "partner {} cannot take more orders",
                partner.partner_code
            )));
        }

        partner.current_orders.push(order_id);
        self.recompute_availability(&mut partner);
        Ok(partner.clone())
    }

    pub fn record_order_completed(&self, id: Uuid, order_id: Uuid) -> Result<Partner, AppError> {
        let mut partner = self.get_mut(id)?;
        partner.current_orders.retain(|current| *current != order_id);
        self.recompute_availability(&mut partner);
        Ok(partner.clone())
    }

    fn recompute_availability(&self, partner: &mut Partner) {
        partner.is_available = partner.current_orders.len() < self.max_concurrent_orders;
        partner.updated_at = Utc::now();

        let utilization = partner.current_orders.len() as f64 / self.max_concurrent_orders as f64;
        self.metrics
            .partner_utilization
            .with_label_values(&[&partner.partner_code])
            .set(utilization);
    }

    fn get_mut(
        &self,
        id: Uuid,
    ) -> Result<dashmap::mapref::one::RefMut<'_, Uuid, Partner>, AppError> {
        self.partners
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("partner {id} not found")))
    }
}
