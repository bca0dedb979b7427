use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::is_valid_coordinate;
use crate::models::partner::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Packed,
    Assigned,
    PickedUp,
    InTransit,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 10] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Preparing,
        OrderStatus::Packed,
        OrderStatus::Assigned,
        OrderStatus::PickedUp,
        OrderStatus::InTransit,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Packed => "packed",
            OrderStatus::Assigned => "assigned",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::InTransit => "in_transit",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Forward successor, `None` once delivered or cancelled.
    pub fn next(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Pending => Some(OrderStatus::Confirmed),
            OrderStatus::Confirmed => Some(OrderStatus::Preparing),
            OrderStatus::Preparing => Some(OrderStatus::Packed),
            OrderStatus::Packed => Some(OrderStatus::Assigned),
            OrderStatus::Assigned => Some(OrderStatus::PickedUp),
            OrderStatus::PickedUp => Some(OrderStatus::InTransit),
            OrderStatus::InTransit => Some(OrderStatus::OutForDelivery),
            OrderStatus::OutForDelivery => Some(OrderStatus::Delivered),
            OrderStatus::Delivered | OrderStatus::Cancelled => None,
        }
    }

    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        self.next() == Some(target)
            || (*self == OrderStatus::Pending && target == OrderStatus::Cancelled)
    }

    /// Statuses during which the order occupies a slot on its partner.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OrderStatus::Assigned
                | OrderStatus::PickedUp
                | OrderStatus::InTransit
                | OrderStatus::OutForDelivery
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Order placed",
            OrderStatus::Confirmed => "Order confirmed",
            OrderStatus::Preparing => "Pharmacy is preparing your order",
            OrderStatus::Packed => "Order packed and ready for pickup",
            OrderStatus::Assigned => "Delivery partner assigned",
            OrderStatus::PickedUp => "Order picked up by delivery partner",
            OrderStatus::InTransit => "Order is on the way",
            OrderStatus::OutForDelivery => "Order is out for delivery",
            OrderStatus::Delivered => "Order delivered",
            OrderStatus::Cancelled => "Order cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| AppError::InvalidInput(format!("unknown order status: {s}")))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cod,
    Upi,
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cod => "cod",
            PaymentMethod::Upi => "upi",
            PaymentMethod::Card => "card",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cod" => Ok(PaymentMethod::Cod),
            "upi" => Ok(PaymentMethod::Upi),
            "card" => Ok(PaymentMethod::Card),
            other => Err(AppError::InvalidInput(format!(
                "unknown payment method: {other}, expected cod/upi/card"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub medicine_id: Uuid,
    pub name: String,
    pub unit_price: f64,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShippingAddress {
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub phone: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

impl ShippingAddress {
    pub fn validate(&self) -> Result<(), AppError> {
        let required = [
            ("address", &self.address),
            ("city", &self.city),
            ("postal_code", &self.postal_code),
            ("phone", &self.phone),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(AppError::InvalidInput(format!(
                "shipping address field {field} is required"
            )));
        }

        if let Some(point) = &self.location {
            if !is_valid_coordinate(point.lng, point.lat) {
                return Err(AppError::InvalidInput(
                    "shipping location is not a valid coordinate".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackingEntry {
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    pub location: Option<GeoPoint>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<OrderItem>,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub items_price: f64,
    pub tax_price: f64,
    pub shipping_price: f64,
    pub total_price: f64,
    pub status: OrderStatus,
    pub delivery_partner: Option<Uuid>,
    pub delivery_tracking: Vec<TrackingEntry>,
    pub estimated_delivery_time: Option<DateTime<Utc>>,
    pub actual_delivery_time: Option<DateTime<Utc>>,
    pub delivery_rating: Option<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        user_id: Uuid,
        items: Vec<OrderItem>,
        shipping_address: ShippingAddress,
        payment_method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Self {
        let items_price = round_money(
            items
                .iter()
                .map(|item| item.unit_price * item.quantity as f64)
                .sum(),
        );
        let tax_price = 0.0;
        let shipping_price = 0.0;

        let payment_status = match payment_method {
            PaymentMethod::Upi => PaymentStatus::Processing,
            PaymentMethod::Cod | PaymentMethod::Card => PaymentStatus::Pending,
        };

        Self {
            id: Uuid::new_v4(),
            user_id,
            items,
            shipping_address,
            payment_method,
            payment_status,
            is_paid: false,
            paid_at: None,
            items_price,
            tax_price,
            shipping_price,
            total_price: round_money(items_price + tax_price + shipping_price),
            status: OrderStatus::Pending,
            delivery_partner: None,
            delivery_tracking: vec![TrackingEntry {
                status: OrderStatus::Pending,
                timestamp: now,
                location: None,
                message: OrderStatus::Pending.default_message().to_string(),
            }],
            estimated_delivery_time: None,
            actual_delivery_time: None,
            delivery_rating: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the order one legal step and appends the matching tracking entry.
    ///
    /// Nothing is mutated when the step is rejected. Returns the status the order left.
    pub fn transition(
        &mut self,
        target: OrderStatus,
        message: Option<String>,
        location: Option<GeoPoint>,
        now: DateTime<Utc>,
    ) -> Result<OrderStatus, AppError> {
        let previous = self.status;
        if !previous.can_transition_to(target) {
            return Err(AppError::InvalidTransition(format!(
                "order {} cannot move from {previous} to {target}",
                self.id
            )));
        }
        if target == OrderStatus::Assigned && self.delivery_partner.is_none() {
            return Err(AppError::InvalidTransition(format!(
                "order {} needs a delivery partner before it can be assigned",
                self.id
            )));
        }

        self.status = target;
        match target {
            OrderStatus::Confirmed => {
                if self.estimated_delivery_time.is_none() {
                    self.estimated_delivery_time = Some(now + Duration::minutes(30));
                }
            }
            OrderStatus::Assigned => {
                self.estimated_delivery_time = Some(now + Duration::minutes(25));
            }
            OrderStatus::OutForDelivery => {
                self.estimated_delivery_time = Some(now + Duration::minutes(15));
            }
            OrderStatus::Delivered => {
                self.actual_delivery_time = Some(now);
            }
            OrderStatus::Cancelled => {
                if self.is_paid {
                    self.payment_status = PaymentStatus::Refunded;
                }
            }
            _ => {}
        }

        self.delivery_tracking.push(TrackingEntry {
            status: target,
            timestamp: now,
            location,
            message: message
                .filter(|text| !text.trim().is_empty())
                .unwrap_or_else(|| target.default_message().to_string()),
        });
        self.updated_at = now;

        Ok(previous)
    }

    /// Geo-tagged tracking entries, oldest first.
    pub fn tracking_path(&self) -> Vec<TrackingEntry> {
        self.delivery_tracking
            .iter()
            .filter(|entry| entry.location.is_some())
            .cloned()
            .collect()
    }

    pub fn drop_point(&self) -> Option<GeoPoint> {
        self.shipping_address.location
    }
}

pub fn round_money(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus, ShippingAddress};
    use crate::error::AppError;
    use crate::models::partner::GeoPoint;

    fn address() -> ShippingAddress {
        ShippingAddress {
            address: "12 Harbour Road".to_string(),
            city: "Hamburg".to_string(),
            postal_code: "20095".to_string(),
            phone: "+49 40 1234".to_string(),
            location: Some(GeoPoint {
                lat: 53.5511,
                lng: 9.9937,
            }),
        }
    }

    fn order(method: PaymentMethod) -> Order {
        let items = vec![
            OrderItem {
                medicine_id: Uuid::new_v4(),
                name: "Ibuprofen 400mg".to_string(),
                unit_price: 10.0,
                quantity: 2,
            },
            OrderItem {
                medicine_id: Uuid::new_v4(),
                name: "Cetirizine 10mg".to_string(),
                unit_price: 5.0,
                quantity: 1,
            },
        ];
        Order::new(Uuid::new_v4(), items, address(), method, Utc::now())
    }

    #[test]
    fn totals_are_computed_from_snapshots() {
        let order = order(PaymentMethod::Cod);
        assert_eq!(order.items_price, 25.0);
        assert_eq!(order.total_price, 25.0);
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(!order.is_paid);
        assert_eq!(order.delivery_tracking.len(), 1);
    }

    #[test]
    fn upi_orders_start_with_processing_payment() {
        let order = order(PaymentMethod::Upi);
        assert_eq!(order.payment_status, PaymentStatus::Processing);
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[test]
    fn only_the_immediate_successor_is_reachable() {
        for status in OrderStatus::ALL {
            for target in OrderStatus::ALL {
                let expected = status.next() == Some(target)
                    || (status == OrderStatus::Pending && target == OrderStatus::Cancelled);
                assert_eq!(status.can_transition_to(target), expected, "{status} -> {target}");
            }
        }
    }

    #[test]
    fn skipping_ahead_is_rejected_without_mutation() {
        let mut order = order(PaymentMethod::Cod);
        let err = order
            .transition(OrderStatus::Delivered, None, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.delivery_tracking.len(), 1);
    }

    #[test]
    fn each_step_appends_exactly_one_entry_and_replays_are_rejected() {
        let mut order = order(PaymentMethod::Cod);
        order
            .transition(OrderStatus::Confirmed, None, None, Utc::now())
            .unwrap();
        assert_eq!(order.delivery_tracking.len(), 2);
        assert_eq!(order.delivery_tracking[1].status, OrderStatus::Confirmed);
        assert!(order.estimated_delivery_time.is_some());

        let replay = order.transition(OrderStatus::Confirmed, None, None, Utc::now());
        assert!(matches!(replay, Err(AppError::InvalidTransition(_))));
        assert_eq!(order.delivery_tracking.len(), 2);
    }

    #[test]
    fn assigned_requires_a_bound_partner() {
        let mut order = order(PaymentMethod::Cod);
        for status in [
            OrderStatus::Confirmed,
            OrderStatus::Preparing,
            OrderStatus::Packed,
        ] {
            order.transition(status, None, None, Utc::now()).unwrap();
        }

        let err = order
            .transition(OrderStatus::Assigned, None, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));

        order.delivery_partner = Some(Uuid::new_v4());
        order
            .transition(OrderStatus::Assigned, None, None, Utc::now())
            .unwrap();
        assert_eq!(order.status, OrderStatus::Assigned);
    }

    #[test]
    fn delivered_stamps_actual_delivery_time() {
        let mut order = order(PaymentMethod::Cod);
        order.delivery_partner = Some(Uuid::new_v4());
        let mut status = order.status;
        while let Some(next) = status.next() {
            order.transition(next, None, None, Utc::now()).unwrap();
            status = next;
        }
        assert_eq!(order.status, OrderStatus::Delivered);
        assert!(order.actual_delivery_time.is_some());
        assert_eq!(order.delivery_tracking.len(), 9);
    }

    #[test]
    fn cancelling_a_paid_order_refunds_it() {
        let mut order = order(PaymentMethod::Upi);
        order.is_paid = true;
        order.payment_status = PaymentStatus::Completed;
        order
            .transition(OrderStatus::Cancelled, None, None, Utc::now())
            .unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Refunded);
        assert!(order.status.is_terminal());
    }

    #[test]
    fn shipping_address_requires_every_field() {
        let mut bad = address();
        bad.city = "  ".to_string();
        assert!(matches!(bad.validate(), Err(AppError::InvalidInput(_))));

        let mut off_map = address();
        off_map.location = Some(GeoPoint {
            lat: 91.0,
            lng: 0.0,
        });
        assert!(matches!(off_map.validate(), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn tracking_path_keeps_only_geo_tagged_entries() {
        let mut order = order(PaymentMethod::Cod);
        order
            .transition(
                OrderStatus::Confirmed,
                Some("Confirmed at counter".to_string()),
                Some(GeoPoint {
                    lat: 53.55,
                    lng: 9.99,
                }),
                Utc::now(),
            )
            .unwrap();
        let path = order.tracking_path();
        assert_eq!(path.len(), 1);
        assert_eq!(path[0].message, "Confirmed at counter");
    }
}
