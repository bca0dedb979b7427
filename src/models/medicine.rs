use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Medicine {
    pub id: Uuid,
    pub name: String,
    pub price: f64,
    pub stock: u32,
    pub updated_at: DateTime<Utc>,
}

/// One line of stock taken out of the catalog, with the name and price it had at that moment.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub medicine_id: Uuid,
    pub name: String,
    pub unit_price: f64,
    pub quantity: u32,
}
