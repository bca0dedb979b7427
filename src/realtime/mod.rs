//! Process-wide publish/subscribe for order lifecycle events.
//!
//! Every websocket connection owns a bounded queue. Groups are sets of connection ids, so a
//! publish reaches exactly the connections that joined that group. Publishing never waits: a
//! full queue drops the event for that subscriber and a closed queue is pruned. Nothing is
//! persisted or replayed, late subscribers fetch state instead.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::{OrderStatus, TrackingEntry};
use crate::models::partner::{GeoPoint, PartnerSummary};
use crate::observability::metrics::Metrics;

pub type ConnectionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Admin,
    Order(Uuid),
}

impl GroupKey {
    fn label(&self) -> &'static str {
        match self {
            GroupKey::Admin => "admin",
            GroupKey::Order(_) => "order",
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Admin => f.write_str("admin"),
            GroupKey::Order(id) => write!(f, "order:{id}"),
        }
    }
}

impl FromStr for GroupKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "admin" {
            return Ok(GroupKey::Admin);
        }

        s.strip_prefix("order:")
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .map(GroupKey::Order)
            .ok_or_else(|| AppError::InvalidInput(format!("unknown group: {s}")))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum RealtimeEvent {
    OrderTrackingUpdate {
        order_id: Uuid,
        status: OrderStatus,
        tracking: TrackingEntry,
        estimated_delivery_time: Option<DateTime<Utc>>,
    },
    DeliveryPartnerAssigned {
        order_id: Uuid,
        partner: PartnerSummary,
        tracking: TrackingEntry,
        estimated_delivery_time: Option<DateTime<Utc>>,
    },
    DeliveryLocationUpdate {
        order_id: Uuid,
        partner_id: Uuid,
        location: GeoPoint,
        distance_km: Option<f64>,
        eta_minutes: Option<u32>,
    },
    OrderStatusChanged {
        order_id: Uuid,
        previous_status: OrderStatus,
        status: OrderStatus,
        total_orders: usize,
        active_orders: usize,
    },
    NewOrder {
        order_id: Uuid,
        user_id: Uuid,
        total_price: f64,
        total_orders: usize,
    },
    PartnerLocationUpdate {
        partner_id: Uuid,
        partner_code: String,
        location: GeoPoint,
        active_orders: usize,
    },
}

impl RealtimeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RealtimeEvent::OrderTrackingUpdate { .. } => "orderTrackingUpdate",
            RealtimeEvent::DeliveryPartnerAssigned { .. } => "deliveryPartnerAssigned",
            RealtimeEvent::DeliveryLocationUpdate { .. } => "deliveryLocationUpdate",
            RealtimeEvent::OrderStatusChanged { .. } => "orderStatusChanged",
            RealtimeEvent::NewOrder { .. } => "newOrder",
            RealtimeEvent::PartnerLocationUpdate { .. } => "partnerLocationUpdate",
        }
    }
}

pub struct RealtimeHub {
    buffer_size: usize,
    connections: DashMap<ConnectionId, mpsc::Sender<RealtimeEvent>>,
    groups: DashMap<GroupKey, HashSet<ConnectionId>>,
    metrics: Metrics,
}

impl RealtimeHub {
    pub fn new(buffer_size: usize, metrics: Metrics) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            connections: DashMap::new(),
            groups: DashMap::new(),
            metrics,
        }
    }

    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<RealtimeEvent>) {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        let id = Uuid::new_v4();
        self.connections.insert(id, tx);
        (id, rx)
    }

    pub fn subscribe(&self, group: GroupKey, connection: ConnectionId) -> Result<(), AppError> {
        if !self.connections.contains_key(&connection) {
            return Err(AppError::NotFound(format!("connection {connection} not found")));
        }

        self.groups.entry(group).or_default().insert(connection);
        debug!(group = %group, connection = %connection, "subscribed");
        Ok(())
    }

    pub fn unsubscribe(&self, group: GroupKey, connection: ConnectionId) {
        self.groups.remove_if_mut(&group, |_, members| {
            members.remove(&connection);
            members.is_empty()
        });
    }

    pub fn disconnect(&self, connection: ConnectionId) {
        self.connections.remove(&connection);
        self.groups.retain(|_, members| {
            members.remove(&connection);
            !members.is_empty()
        });
    }

    pub fn subscriber_count(&self, group: GroupKey) -> usize {
        self.groups.get(&group).map(|members| members.len()).unwrap_or(0)
    }

    /// Fire-and-forget. Returns how many subscribers accepted the event.
    pub fn publish(&self, group: GroupKey, event: RealtimeEvent) -> usize {
        let members: Vec<ConnectionId> = match self.groups.get(&group) {
            Some(members) => members.iter().copied().collect(),
            None => {
                debug!(group = %group, event = event.name(), "no subscribers");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for connection in members {
            let Some(tx) = self.connections.get(&connection).map(|entry| entry.value().clone())
            else {
                closed.push(connection);
                continue;
            };

            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        group = %group,
                        connection = %connection,
                        event = event.name(),
                        "subscriber queue full; dropping event"
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(connection),
            }
        }

        for connection in closed {
            self.disconnect(connection);
        }

        self.metrics
            .realtime_events_total
            .with_label_values(&[group.label()])
            .inc();
        delivered
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{GroupKey, RealtimeEvent, RealtimeHub};
    use crate::models::order::OrderStatus;
    use crate::observability::metrics::Metrics;

    fn status_event(order_id: Uuid) -> RealtimeEvent {
        RealtimeEvent::OrderStatusChanged {
            order_id,
            previous_status: OrderStatus::Pending,
            status: OrderStatus::Confirmed,
            total_orders: 1,
            active_orders: 0,
        }
    }

    #[test]
    fn group_keys_round_trip_through_their_wire_form() {
        let id = Uuid::new_v4();
        assert_eq!("admin".parse::<GroupKey>().unwrap(), GroupKey::Admin);
        assert_eq!(
            format!("order:{id}").parse::<GroupKey>().unwrap(),
            GroupKey::Order(id)
        );
        assert!("order:not-a-uuid".parse::<GroupKey>().is_err());
        assert!("everyone".parse::<GroupKey>().is_err());
    }

    #[test]
    fn publishing_without_subscribers_is_a_no_op() {
        let hub = RealtimeHub::new(8, Metrics::new());
        assert_eq!(hub.publish(GroupKey::Admin, status_event(Uuid::new_v4())), 0);
    }

    #[tokio::test]
    async fn events_reach_exactly_the_joined_group() {
        let hub = RealtimeHub::new(8, Metrics::new());
        let watched = Uuid::new_v4();
        let other = Uuid::new_v4();

        let (watcher, mut watcher_rx) = hub.connect();
        let (bystander, mut bystander_rx) = hub.connect();
        hub.subscribe(GroupKey::Order(watched), watcher).unwrap();
        hub.subscribe(GroupKey::Order(other), bystander).unwrap();

        assert_eq!(hub.publish(GroupKey::Order(watched), status_event(watched)), 1);

        let received = watcher_rx.recv().await.unwrap();
        assert_eq!(received.name(), "orderStatusChanged");
        assert!(bystander_rx.try_recv().is_err());
    }

    #[test]
    fn dropped_receivers_are_pruned_on_publish() {
        let hub = RealtimeHub::new(8, Metrics::new());
        let (connection, rx) = hub.connect();
        hub.subscribe(GroupKey::Admin, connection).unwrap();
        drop(rx);

        assert_eq!(hub.publish(GroupKey::Admin, status_event(Uuid::new_v4())), 0);
        assert_eq!(hub.subscriber_count(GroupKey::Admin), 0);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let hub = RealtimeHub::new(1, Metrics::new());
        let (connection, _rx) = hub.connect();
        hub.subscribe(GroupKey::Admin, connection).unwrap();

        assert_eq!(hub.publish(GroupKey::Admin, status_event(Uuid::new_v4())), 1);
        assert_eq!(hub.publish(GroupKey::Admin, status_event(Uuid::new_v4())), 0);
        assert_eq!(hub.subscriber_count(GroupKey::Admin), 1);
    }

    #[test]
    fn unsubscribe_and_disconnect_leave_no_members() {
        let hub = RealtimeHub::new(4, Metrics::new());
        let order = GroupKey::Order(Uuid::new_v4());
        let (a, _rx_a) = hub.connect();
        let (b, _rx_b) = hub.connect();
        hub.subscribe(order, a).unwrap();
        hub.subscribe(order, b).unwrap();
        hub.subscribe(GroupKey::Admin, b).unwrap();

        hub.unsubscribe(order, a);
        assert_eq!(hub.subscriber_count(order), 1);

        hub.disconnect(b);
        assert_eq!(hub.subscriber_count(order), 0);
        assert_eq!(hub.subscriber_count(GroupKey::Admin), 0);
        assert!(hub.subscribe(GroupKey::Admin, b).is_err());
    }
}
