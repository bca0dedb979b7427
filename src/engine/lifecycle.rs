//! The single write path for order status.
//!
//! [`commit`] applies one transition under the order's write guard, then settles the
//! partner and inventory effects that hang off the new status. [`announce`] fans the result
//! out: the caller picks the payload for the order's watchers, the admin cohort always gets
//! a status delta with fresh counts.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::{Order, OrderStatus, TrackingEntry};
use crate::models::partner::GeoPoint;
use crate::realtime::{GroupKey, RealtimeEvent};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub target: OrderStatus,
    pub message: Option<String>,
    pub location: Option<GeoPoint>,
    /// Bind this partner in the same guarded step. Fails with `Conflict` if one is already bound.
    pub bind_partner: Option<Uuid>,
}

impl TransitionRequest {
    pub fn to(target: OrderStatus) -> Self {
        Self {
            target,
            message: None,
            location: None,
            bind_partner: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub order: Order,
    pub previous: OrderStatus,
}

impl Transition {
    pub fn latest_entry(&self) -> Option<TrackingEntry> {
        self.order.delivery_tracking.last().cloned()
    }
}

pub fn commit(
    state: &AppState,
    order_id: Uuid,
    request: TransitionRequest,
) -> Result<Transition, AppError> {
    let target = request.target;

    let transition = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        let binding = request.bind_partner;
        if let Some(partner_id) = binding {
            if let Some(existing) = order.delivery_partner {
                return Err(AppError::Conflict(format!(
                    "order {order_id} is already assigned to partner {existing}"
                )));
            }
            if !order.status.can_transition_to(target) {
                return Err(AppError::InvalidTransition(format!(
                    "order {order_id} cannot move from {} to {target}",
                    order.status
                )));
            }
            order.delivery_partner = Some(partner_id);
        }

        match order.transition(target, request.message, request.location, Utc::now()) {
            Ok(previous) => Transition {
                order: order.clone(),
                previous,
            },
            Err(err) => {
                if binding.is_some() {
                    order.delivery_partner = None;
                }
                return Err(err);
            }
        }
    };

    state
        .metrics
        .status_transitions_total
        .with_label_values(&[target.as_str()])
        .inc();
    info!(
        order_id = %order_id,
        from = %transition.previous,
        to = %target,
        "order status changed"
    );

    settle(state, &transition);
    Ok(transition)
}

/// Effects owned by other documents. None of these can undo the committed status.
fn settle(state: &AppState, transition: &Transition) {
    let order = &transition.order;

    match order.status {
        OrderStatus::Delivered => {
            if let Some(partner_id) = order.delivery_partner {
                if let Err(err) = state.partners.record_order_completed(partner_id, order.id) {
                    warn!(order_id = %order.id, partner_id = %partner_id, error = %err, "failed to free partner slot");
                }
            }
        }
        OrderStatus::Cancelled => {
            release_stock(state, order);
            if let Some(partner_id) = order.delivery_partner {
                if let Err(err) = state.partners.record_order_completed(partner_id, order.id) {
                    warn!(order_id = %order.id, partner_id = %partner_id, error = %err, "failed to free partner slot");
                }
            }
            let dropped = state.scheduler.cancel_for_order(order.id);
            if dropped > 0 {
                info!(order_id = %order.id, dropped, "cancelled scheduled tasks for order");
            }
        }
        _ => {}
    }
}

fn release_stock(state: &AppState, order: &Order) {
    for item in &order.items {
        if let Err(err) = state.catalog.increment_stock(item.medicine_id, item.quantity) {
            state.metrics.stock_release_failures_total.inc();
            warn!(
                order_id = %order.id,
                medicine_id = %item.medicine_id,
                quantity = item.quantity,
                error = %err,
                "failed to release stock for cancelled order"
            );
        }
    }
}

pub fn tracking_update(transition: &Transition) -> Option<RealtimeEvent> {
    let tracking = transition.latest_entry()?;
    Some(RealtimeEvent::OrderTrackingUpdate {
        order_id: transition.order.id,
        status: transition.order.status,
        tracking,
        estimated_delivery_time: transition.order.estimated_delivery_time,
    })
}

pub fn order_counts(state: &AppState) -> (usize, usize) {
    let total = state.orders.len();
    let active = state
        .orders
        .iter()
        .filter(|entry| entry.value().status.is_active())
        .count();
    (total, active)
}

pub fn announce(state: &AppState, transition: &Transition, order_event: Option<RealtimeEvent>) {
    let order_id = transition.order.id;

    if let Some(event) = order_event {
        state.realtime.publish(GroupKey::Order(order_id), event);
    }

    let (total_orders, active_orders) = order_counts(state);
    state.realtime.publish(
        GroupKey::Admin,
        RealtimeEvent::OrderStatusChanged {
            order_id,
            previous_status: transition.previous,
            status: transition.order.status,
            total_orders,
            active_orders,
        },
    );
}
