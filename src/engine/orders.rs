use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::lifecycle::{self, Transition, TransitionRequest};
use crate::engine::scheduler::ScheduledJob;
use crate::error::AppError;
use crate::models::order::{
    Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus, ShippingAddress,
};
use crate::models::user::Requester;
use crate::realtime::{GroupKey, RealtimeEvent};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct OrderLine {
    pub medicine_id: Uuid,
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrder {
    pub items: Vec<OrderLine>,
    pub shipping_address: ShippingAddress,
    pub payment_method: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderStats {
    pub total_orders: usize,
    pub active_orders: usize,
    pub by_status: BTreeMap<&'static str, usize>,
    pub partners_total: usize,
    pub partners_active: usize,
    pub partners_available: usize,
    pub scheduled_tasks: usize,
}

pub fn create_order(state: &AppState, user_id: Uuid, request: CreateOrder) -> Result<Order, AppError> {
    let payment_method: PaymentMethod = request.payment_method.parse()?;

    if request.items.is_empty() {
        return Err(AppError::InvalidInput("order has no items".to_string()));
    }
    let lines = request
        .items
        .iter()
        .map(|line| {
            if line.quantity < 1 {
                return Err(AppError::InvalidInput(format!(
                    "quantity for medicine {} must be a positive integer",
                    line.medicine_id
                )));
            }
            let quantity = u32::try_from(line.quantity).map_err(|_| {
                AppError::InvalidInput(format!(
                    "quantity for medicine {} is too large",
                    line.medicine_id
                ))
            })?;
            Ok((line.medicine_id, quantity))
        })
        .collect::<Result<Vec<_>, AppError>>()?;
    request.shipping_address.validate()?;
    state.users.find_by_id(user_id)?;

    let items: Vec<OrderItem> = state
        .catalog
        .reserve(&lines)?
        .into_iter()
        .map(|reservation| OrderItem {
            medicine_id: reservation.medicine_id,
            name: reservation.name,
            unit_price: reservation.unit_price,
            quantity: reservation.quantity,
        })
        .collect();

    let order = Order::new(
        user_id,
        items,
        request.shipping_address,
        payment_method,
        Utc::now(),
    );
    state.orders.insert(order.id, order.clone());

    state
        .metrics
        .orders_created_total
        .with_label_values(&[payment_method.as_str()])
        .inc();

    if payment_method == PaymentMethod::Upi {
        let delay = Duration::milliseconds(state.config.payment_confirmation_delay_ms as i64);
        state
            .scheduler
            .schedule(ScheduledJob::ConfirmPayment { order_id: order.id }, delay);
    }

    state.realtime.publish(
        GroupKey::Admin,
        RealtimeEvent::NewOrder {
            order_id: order.id,
            user_id,
            total_price: order.total_price,
            total_orders: state.orders.len(),
        },
    );

    info!(
        order_id = %order.id,
        user_id = %user_id,
        items = order.items.len(),
        total_price = order.total_price,
        payment_method = payment_method.as_str(),
        "order created"
    );
    Ok(order)
}

/// Records the UPI payment, then confirms the order if it is still `pending`. Payment is
/// recorded even when an administrator already confirmed the order; cancelled orders are
/// left alone.
pub fn confirm_payment(state: &AppState, order_id: Uuid) -> Result<Option<Transition>, AppError> {
    let still_pending = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if order.payment_method != PaymentMethod::Upi
            || order.status == OrderStatus::Cancelled
            || order.is_paid
        {
            debug!(order_id = %order_id, status = %order.status, "payment confirmation skipped");
            return Ok(None);
        }

        let now = Utc::now();
        order.is_paid = true;
        order.paid_at = Some(now);
        order.payment_status = PaymentStatus::Completed;
        order.updated_at = now;
        order.status == OrderStatus::Pending
    };

    if !still_pending {
        info!(order_id = %order_id, "payment recorded for an order already past pending");
        return Ok(None);
    }

    let request =
        TransitionRequest::to(OrderStatus::Confirmed).with_message("Payment received, order confirmed");
    match lifecycle::commit(state, order_id, request) {
        Ok(transition) => {
            lifecycle::announce(state, &transition, lifecycle::tracking_update(&transition));
            info!(order_id = %order_id, "payment confirmed");
            Ok(Some(transition))
        }
        // moved on in between; the payment fields are already recorded
        Err(AppError::InvalidTransition(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

pub fn find_order(state: &AppState, order_id: Uuid) -> Result<Order, AppError> {
    state
        .orders
        .get(&order_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
}

/// Owner, admin, or the partner delivering it.
pub fn ensure_can_view(state: &AppState, order: &Order, requester: &Requester) -> Result<(), AppError> {
    if requester.is_admin() || order.user_id == requester.user_id {
        return Ok(());
    }

    let is_delivering = match (order.delivery_partner, state.partners.find_by_user(requester.user_id)) {
        (Some(bound), Some(partner)) => bound == partner.id,
        _ => false,
    };
    if is_delivering {
        return Ok(());
    }

    Err(AppError::Forbidden(format!(
        "order {} belongs to another customer",
        order.id
    )))
}

pub fn get_order(state: &AppState, order_id: Uuid, requester: &Requester) -> Result<Order, AppError> {
    let order = find_order(state, order_id)?;
    ensure_can_view(state, &order, requester)?;
    Ok(order)
}

/// Newest first. Admins see every order, everyone else their own.
pub fn list_orders(state: &AppState, requester: &Requester) -> Vec<Order> {
    let mut orders: Vec<Order> = state
        .orders
        .iter()
        .filter(|entry| requester.is_admin() || entry.value().user_id == requester.user_id)
        .map(|entry| entry.value().clone())
        .collect();
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    orders
}

pub fn stats(state: &AppState) -> OrderStats {
    let mut by_status: BTreeMap<&'static str, usize> = OrderStatus::ALL
        .iter()
        .map(|status| (status.as_str(), 0))
        .collect();
    for entry in state.orders.iter() {
        *by_status.entry(entry.value().status.as_str()).or_insert(0) += 1;
    }

    let partners = state.partners.list();
    let (total_orders, active_orders) = lifecycle::order_counts(state);

    OrderStats {
        total_orders,
        active_orders,
        by_status,
        partners_total: partners.len(),
        partners_active: partners.iter().filter(|p| p.is_active).count(),
        partners_available: partners.iter().filter(|p| p.is_eligible()).count(),
        scheduled_tasks: state.scheduler.pending(),
    }
}
