use std::time::Instant;

use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::lifecycle::{self, TransitionRequest};
use crate::engine::orders::find_order;
use crate::error::AppError;
use crate::models::order::{Order, OrderStatus};
use crate::models::partner::{Partner, PartnerProfile};
use crate::realtime::RealtimeEvent;
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AssignmentMode {
    Manual { partner_id: Uuid },
    Auto,
    /// Provision a backing account and partner record, then assign manually.
    QuickCreate { partner: PartnerProfile },
}

impl AssignmentMode {
    pub fn label(&self) -> &'static str {
        match self {
            AssignmentMode::Manual { .. } => "manual",
            AssignmentMode::Auto => "auto",
            AssignmentMode::QuickCreate { .. } => "quick_create",
        }
    }
}

pub fn assign_partner(
    state: &AppState,
    order_id: Uuid,
    mode: AssignmentMode,
) -> Result<Order, AppError> {
    let label = mode.label();
    let start = Instant::now();

    let result = bind_partner(state, order_id, mode);

    let outcome = if result.is_ok() { "success" } else { "error" };
    state
        .metrics
        .assignment_latency_seconds
        .with_label_values(&[label])
        .observe(start.elapsed().as_secs_f64());
    state
        .metrics
        .assignments_total
        .with_label_values(&[label, outcome])
        .inc();

    if let Err(err) = &result {
        warn!(order_id = %order_id, mode = label, error = %err, "assignment failed");
    }
    result
}

fn bind_partner(state: &AppState, order_id: Uuid, mode: AssignmentMode) -> Result<Order, AppError> {
    let order = find_order(state, order_id)?;
    if let Some(existing) = order.delivery_partner {
        return Err(AppError::Conflict(format!(
            "order {order_id} is already assigned to partner {existing}"
        )));
    }
    if !order.status.can_transition_to(OrderStatus::Assigned) {
        return Err(AppError::InvalidTransition(format!(
            "order {order_id} is {}, partners are assigned once it is {}",
            order.status,
            OrderStatus::Packed
        )));
    }

    let partner = match mode {
        AssignmentMode::Manual { partner_id } => {
            state.partners.record_order_assigned(partner_id, order_id)?
        }
        AssignmentMode::Auto => take_nearest(state, &order)?,
        AssignmentMode::QuickCreate { partner: profile } => {
            let created = quick_create(state, &order, profile)?;
            state.partners.record_order_assigned(created.id, order_id)?
        }
    };

    let request = TransitionRequest {
        target: OrderStatus::Assigned,
        message: Some(format!(
            "Assigned to {} ({})",
            partner.name, partner.partner_code
        )),
        location: Some(partner.current_location),
        bind_partner: Some(partner.id),
    };
    let transition = match lifecycle::commit(state, order_id, request) {
        Ok(transition) => transition,
        Err(err) => {
            release_unbound_slot(state, &partner, order_id);
            return Err(err);
        }
    };

    let event = transition
        .latest_entry()
        .map(|tracking| RealtimeEvent::DeliveryPartnerAssigned {
            order_id,
            partner: partner.summary(),
            tracking,
            estimated_delivery_time: transition.order.estimated_delivery_time,
        });
    lifecycle::announce(state, &transition, event);

    info!(
        order_id = %order_id,
        partner_id = %partner.id,
        partner_code = %partner.partner_code,
        "order assigned"
    );
    Ok(transition.order)
}

/// Provisions the account and partner record. Everything is validated before the account
/// is written, and the account is removed again if the partner record cannot be created.
fn quick_create(
    state: &AppState,
    order: &Order,
    mut profile: PartnerProfile,
) -> Result<Partner, AppError> {
    profile.location = profile.location.or(order.drop_point());
    if profile.location.is_none() {
        return Err(AppError::InvalidInput(format!(
            "partner location is required, order {} has no delivery coordinates",
            order.id
        )));
    }
    profile.validate()?;

    let user = state.users.create_placeholder_account(
        &profile.name,
        &profile.phone,
        profile.email.clone(),
    )?;
    match state.partners.create(&user, profile) {
        Ok(created) => {
            info!(partner_id = %created.id, user_id = %user.id, "partner created during dispatch");
            Ok(created)
        }
        Err(err) => {
            state.users.remove(user.id);
            Err(err)
        }
    }
}

/// Nearest eligible partner around the drop point. Candidates that filled up since the
/// search are skipped.
fn take_nearest(state: &AppState, order: &Order) -> Result<Partner, AppError> {
    let drop_point = order.drop_point().ok_or_else(|| {
        AppError::InvalidInput(format!("order {} has no delivery coordinates", order.id))
    })?;

    let cancel = state.cancel_signal();
    let radius_m = state.config.auto_assign_radius_km * 1_000.0;
    let candidates = state.partners.find_nearby(&drop_point, radius_m, &cancel)?;

    candidates
        .into_iter()
        .find_map(|(candidate, distance_km)| {
            match state.partners.record_order_assigned(candidate.id, order.id) {
                Ok(partner) => {
                    info!(order_id = %order.id, partner_id = %partner.id, distance_km, "nearest partner selected");
                    Some(partner)
                }
                Err(err) => {
                    warn!(partner_id = %candidate.id, error = %err, "candidate no longer eligible");
                    None
                }
            }
        })
        .ok_or(AppError::NoPartnerAvailable)
}

/// Gives back a slot taken for an assignment that lost the race, unless the order did end up
/// bound to this partner.
fn release_unbound_slot(state: &AppState, partner: &Partner, order_id: Uuid) {
    let bound = state
        .orders
        .get(&order_id)
        .and_then(|order| order.delivery_partner);
    if bound == Some(partner.id) {
        return;
    }

    if let Err(err) = state.partners.record_order_completed(partner.id, order_id) {
        error!(partner_id = %partner.id, order_id = %order_id, error = %err, "failed to release partner slot");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{AssignmentMode, assign_partner};
    use crate::engine::test_support::{Fixture, address};
    use crate::error::AppError;
    use crate::models::order::{OrderStatus, ShippingAddress};
    use crate::models::partner::{GeoPoint, PartnerProfile, VehicleInfo, VehicleType};
    use crate::models::user::UserRole;
    use crate::realtime::GroupKey;

    #[test]
    fn manual_assignment_binds_and_takes_a_slot() {
        let fx = Fixture::new();
        let partner = fx.partner("Manual Mia", 53.56, 10.0);
        let order = fx.packed_order();

        let assigned = assign_partner(
            &fx.state,
            order.id,
            AssignmentMode::Manual {
                partner_id: partner.id,
            },
        )
        .unwrap();

        assert_eq!(assigned.status, OrderStatus::Assigned);
        assert_eq!(assigned.delivery_partner, Some(partner.id));
        assert!(assigned.estimated_delivery_time.is_some());
        let entry = assigned.delivery_tracking.last().unwrap();
        assert_eq!(entry.status, OrderStatus::Assigned);
        assert!(entry.message.contains("Manual Mia"));
        assert_eq!(entry.location, Some(partner.current_location));
        assert_eq!(
            fx.state.partners.find_by_id(partner.id).unwrap().current_orders,
            vec![order.id]
        );
    }

    #[test]
    fn manual_assignment_to_unknown_partner_is_not_found() {
        let fx = Fixture::new();
        let order = fx.packed_order();
        let err = assign_partner(
            &fx.state,
            order.id,
            AssignmentMode::Manual {
                partner_id: uuid::Uuid::new_v4(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(
            fx.state.orders.get(&order.id).unwrap().status,
            OrderStatus::Packed
        );
    }

    #[test]
    fn second_assignment_is_a_conflict_and_keeps_the_first_partner() {
        let fx = Fixture::new();
        let first = fx.partner("First", 53.552, 9.994);
        let second = fx.partner("Second", 53.553, 9.995);
        let order = fx.packed_order();

        assign_partner(&fx.state, order.id, AssignmentMode::Manual { partner_id: first.id }).unwrap();
        let err = assign_partner(&fx.state, order.id, AssignmentMode::Manual { partner_id: second.id })
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(
            fx.state.orders.get(&order.id).unwrap().delivery_partner,
            Some(first.id)
        );
        assert!(fx.state.partners.find_by_id(second.id).unwrap().current_orders.is_empty());
    }

    #[test]
    fn assignment_before_packed_is_an_invalid_transition() {
        let fx = Fixture::new();
        let partner = fx.partner("Early", 53.552, 9.994);
        let med = fx.medicine("Cold relief", 4.0, 5);
        let order = fx.order(&[(med, 1)], "cod");

        let err = assign_partner(&fx.state, order.id, AssignmentMode::Manual { partner_id: partner.id })
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
        assert!(fx.state.partners.find_by_id(partner.id).unwrap().current_orders.is_empty());
    }

    #[test]
    fn auto_assignment_picks_the_nearest_partner() {
        let fx = Fixture::new();
        fx.partner("Across town", 53.60, 10.05);
        let nearest = fx.partner("Next door", 53.5513, 9.9939);
        fx.partner("Other city", 52.52, 13.405);
        let order = fx.packed_order();

        let assigned = assign_partner(&fx.state, order.id, AssignmentMode::Auto).unwrap();
        assert_eq!(assigned.delivery_partner, Some(nearest.id));
    }

    #[test]
    fn auto_assignment_skips_full_partners() {
        let fx = Fixture::new();
        let busy = fx.partner("Busy", 53.5512, 9.9938);
        let free = fx.partner("Free", 53.56, 10.0);
        for _ in 0..3 {
            fx.state
                .partners
                .record_order_assigned(busy.id, uuid::Uuid::new_v4())
                .unwrap();
        }
        let order = fx.packed_order();

        let assigned = assign_partner(&fx.state, order.id, AssignmentMode::Auto).unwrap();
        assert_eq!(assigned.delivery_partner, Some(free.id));
    }

    #[test]
    fn auto_assignment_without_candidates_reports_no_partner() {
        let fx = Fixture::new();
        fx.partner("Far away", 48.85, 2.35);
        let order = fx.packed_order();

        let err = assign_partner(&fx.state, order.id, AssignmentMode::Auto).unwrap_err();
        assert_eq!(err, AppError::NoPartnerAvailable);
        assert_eq!(
            fx.state.orders.get(&order.id).unwrap().status,
            OrderStatus::Packed
        );
    }

    #[test]
    fn quick_create_provisions_account_and_partner() {
        let fx = Fixture::new();
        let order = fx.packed_order();

        let assigned = assign_partner(
            &fx.state,
            order.id,
            AssignmentMode::QuickCreate {
                partner: PartnerProfile {
                    name: "Walk-in Wes".to_string(),
                    phone: "+49 170 999".to_string(),
                    email: None,
                    vehicle: VehicleInfo {
                        vehicle_type: VehicleType::Scooter,
                        vehicle_number: Some("HH-WS-12".to_string()),
                    },
                    location: None,
                },
            },
        )
        .unwrap();

        let partner_id = assigned.delivery_partner.unwrap();
        let partner = fx.state.partners.find_by_id(partner_id).unwrap();
        assert_eq!(partner.rating, 5.0);
        assert_eq!(partner.total_deliveries, 0);
        assert_eq!(partner.current_orders, vec![order.id]);
        assert_eq!(partner.current_location, order.drop_point().unwrap());

        let user = fx.state.users.find_by_id(partner.user_id).unwrap();
        assert_eq!(user.role, UserRole::DeliveryPartner);
        assert!(!user.credential.is_empty());
    }

    #[test]
    fn quick_create_without_any_location_writes_nothing_and_can_be_retried() {
        let fx = Fixture::new();
        let order = fx.packed_order_with_address(ShippingAddress {
            location: None,
            ..address()
        });
        let profile = PartnerProfile {
            name: "Rider Rhea".to_string(),
            phone: "+49 170 4242".to_string(),
            email: None,
            vehicle: VehicleInfo::default(),
            location: None,
        };

        let err = assign_partner(
            &fx.state,
            order.id,
            AssignmentMode::QuickCreate {
                partner: profile.clone(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(fx.state.partners.list().is_empty());

        let retried = assign_partner(
            &fx.state,
            order.id,
            AssignmentMode::QuickCreate {
                partner: PartnerProfile {
                    location: Some(GeoPoint {
                        lat: 53.553,
                        lng: 9.992,
                    }),
                    ..profile
                },
            },
        )
        .unwrap();
        assert_eq!(retried.status, OrderStatus::Assigned);
        let partner = fx
            .state
            .partners
            .find_by_id(retried.delivery_partner.unwrap())
            .unwrap();
        assert_eq!(partner.phone, "+49 170 4242");
    }

    #[test]
    fn a_fourth_concurrent_order_is_rejected() {
        let fx = Fixture::new();
        let partner = fx.partner("Capped", 53.552, 9.994);

        for _ in 0..3 {
            let order = fx.packed_order();
            assign_partner(&fx.state, order.id, AssignmentMode::Manual { partner_id: partner.id })
                .unwrap();
        }
        assert!(!fx.state.partners.find_by_id(partner.id).unwrap().is_available);

        let fourth = fx.packed_order();
        let err = assign_partner(&fx.state, fourth.id, AssignmentMode::Manual { partner_id: partner.id })
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(
            fx.state.orders.get(&fourth.id).unwrap().status,
            OrderStatus::Packed
        );
    }

    #[test]
    fn concurrent_assignments_bind_exactly_one_partner() {
        let fx = Arc::new(Fixture::new());
        let order_id = fx.packed_order().id;
        let partners: Vec<_> = (0..8)
            .map(|i| fx.partner(&format!("Racer {i}"), 53.552, 9.994))
            .collect();

        let handles: Vec<_> = partners
            .iter()
            .map(|partner| {
                let fx = Arc::clone(&fx);
                let partner_id = partner.id;
                std::thread::spawn(move || {
                    assign_partner(&fx.state, order_id, AssignmentMode::Manual { partner_id }).is_ok()
                })
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(wins, 1);
        let bound = fx.state.orders.get(&order_id).unwrap().delivery_partner.unwrap();
        for partner in &partners {
            let slots = fx.state.partners.find_by_id(partner.id).unwrap().current_orders;
            if partner.id == bound {
                assert_eq!(slots, vec![order_id]);
            } else {
                assert!(slots.is_empty());
            }
        }
    }

    #[tokio::test]
    async fn assignment_event_goes_to_the_order_group() {
        let fx = Fixture::new();
        let partner = fx.partner("Evented", 53.552, 9.994);
        let order = fx.packed_order();
        let (connection, mut rx) = fx.state.realtime.connect();
        fx.state
            .realtime
            .subscribe(GroupKey::Order(order.id), connection)
            .unwrap();

        assign_partner(&fx.state, order.id, AssignmentMode::Manual { partner_id: partner.id }).unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "deliveryPartnerAssigned");
        let payload = serde_json::to_value(&event).unwrap();
        assert_eq!(payload["data"]["partner"]["name"], "Evented");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn assignment_modes_parse_from_tagged_json() {
        let manual: AssignmentMode = serde_json::from_value(serde_json::json!({
            "mode": "manual",
            "partner_id": "00000000-0000-0000-0000-000000000001"
        }))
        .unwrap();
        assert_eq!(manual.label(), "manual");

        let auto: AssignmentMode = serde_json::from_value(serde_json::json!({ "mode": "auto" })).unwrap();
        assert_eq!(auto.label(), "auto");

        let quick: AssignmentMode = serde_json::from_value(serde_json::json!({
            "mode": "quick_create",
            "partner": { "name": "Q", "phone": "1", "vehicle": { "vehicle_type": "hoverboard" } }
        }))
        .unwrap();
        match quick {
            AssignmentMode::QuickCreate { partner } => {
                assert_eq!(partner.vehicle.vehicle_type, VehicleType::Other);
            }
            other => panic!("unexpected mode {other:?}"),
        }
    }
}
