use tracing::info;
use uuid::Uuid;

use crate::engine::lifecycle::{self, TransitionRequest};
use crate::engine::orders::find_order;
use crate::error::AppError;
use crate::geo::is_valid_point;
use crate::models::order::{Order, OrderStatus};
use crate::models::partner::{GeoPoint, Partner};
use crate::models::user::Requester;
use crate::state::AppState;

/// Moves an order to an explicitly named status, if that status is the next legal one.
pub fn advance(
    state: &AppState,
    order_id: Uuid,
    target: OrderStatus,
    message: Option<String>,
    location: Option<GeoPoint>,
) -> Result<Order, AppError> {
    if let Some(point) = &location {
        if !is_valid_point(point) {
            return Err(AppError::InvalidInput(
                "location is not a valid coordinate".to_string(),
            ));
        }
    }

    let request = TransitionRequest {
        target,
        message,
        location,
        bind_partner: None,
    };
    let transition = lifecycle::commit(state, order_id, request)?;
    lifecycle::announce(state, &transition, lifecycle::tracking_update(&transition));
    Ok(transition.order)
}

/// One step along the forward table, whatever the current status is.
pub fn auto_advance(state: &AppState, order_id: Uuid) -> Result<Order, AppError> {
    let current = find_order(state, order_id)?.status;
    let next = current
        .next()
        .ok_or_else(|| AppError::TerminalState(order_id.to_string()))?;
    advance(state, order_id, next, None, None)
}

pub fn cancel(state: &AppState, order_id: Uuid, requester: &Requester) -> Result<Order, AppError> {
    let order = find_order(state, order_id)?;
    if order.user_id != requester.user_id && !requester.is_admin() {
        return Err(AppError::Forbidden(format!(
            "only the customer or an administrator can cancel order {order_id}"
        )));
    }
    if order.status != OrderStatus::Pending {
        return Err(AppError::InvalidState(format!(
            "order {order_id} is {}, only pending orders can be cancelled",
            order.status
        )));
    }

    let message = if requester.is_admin() && order.user_id != requester.user_id {
        "Order cancelled by the pharmacy"
    } else {
        "Order cancelled by the customer"
    };
    let request = TransitionRequest::to(OrderStatus::Cancelled).with_message(message);
    let transition = lifecycle::commit(state, order_id, request).map_err(|err| match err {
        AppError::InvalidTransition(msg) => AppError::InvalidState(msg),
        other => other,
    })?;
    lifecycle::announce(state, &transition, lifecycle::tracking_update(&transition));

    info!(order_id = %order_id, requester = %requester.user_id, "order cancelled");
    Ok(transition.order)
}

/// The customer's one rating of a delivered order, folded into the partner's average.
pub fn rate_delivery(
    state: &AppState,
    order_id: Uuid,
    requester: &Requester,
    score: u8,
) -> Result<Partner, AppError> {
    if !(1..=5).contains(&score) {
        return Err(AppError::InvalidInput(format!(
            "rating must be between 1 and 5, got {score}"
        )));
    }

    let partner_id = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if order.user_id != requester.user_id {
            return Err(AppError::Forbidden(format!(
                "only the customer can rate order {order_id}"
            )));
        }
        if order.status != OrderStatus::Delivered {
            return Err(AppError::InvalidState(format!(
                "order {order_id} is {}, only delivered orders can be rated",
                order.status
            )));
        }
        if order.delivery_rating.is_some() {
            return Err(AppError::Conflict(format!("order {order_id} is already rated")));
        }
        let partner_id = order.delivery_partner.ok_or_else(|| {
            AppError::InvalidState(format!("order {order_id} has no delivery partner"))
        })?;

        // claimed here so a concurrent rating sees it; given back below if the partner update fails
        order.delivery_rating = Some(score);
        partner_id
    };

    state
        .partners
        .apply_rating_delta(partner_id, score)
        .inspect_err(|_| {
            if let Some(mut order) = state.orders.get_mut(&order_id) {
                order.delivery_rating = None;
            }
        })
}
