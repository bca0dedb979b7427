use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::{estimate_eta_minutes, haversine_km};
use crate::models::partner::{GeoPoint, Partner};
use crate::realtime::{GroupKey, RealtimeEvent};
use crate::state::AppState;

/// Stores a location ping and fans it out: one update per active order the partner holds,
/// one summary to the admin group.
pub fn record_location(
    state: &AppState,
    partner_id: Uuid,
    point: GeoPoint,
) -> Result<Partner, AppError> {
    let partner = state.partners.update_location(partner_id, point)?;

    let mut updates = Vec::new();
    for order_id in &partner.current_orders {
        let Some(order) = state.orders.get(order_id).map(|order| order.clone()) else {
            continue;
        };
        if !order.status.is_active() {
            continue;
        }

        let distance_km = order.drop_point().map(|drop| haversine_km(&point, &drop));
        let eta_minutes =
            distance_km.map(|distance| estimate_eta_minutes(distance, partner.vehicle.vehicle_type));
        updates.push((
            order.id,
            RealtimeEvent::DeliveryLocationUpdate {
                order_id: order.id,
                partner_id,
                location: point,
                distance_km: distance_km.map(|distance| (distance * 100.0).round() / 100.0),
                eta_minutes,
            },
        ));
    }

    let active_orders = updates.len();
    for (order_id, event) in updates {
        state.realtime.publish(GroupKey::Order(order_id), event);
    }
    state.realtime.publish(
        GroupKey::Admin,
        RealtimeEvent::PartnerLocationUpdate {
            partner_id,
            partner_code: partner.partner_code.clone(),
            location: point,
            active_orders,
        },
    );

    debug!(partner_id = %partner_id, active_orders, "location ping recorded");
    Ok(partner)
}
