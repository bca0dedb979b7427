use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::medicine::{Medicine, Reservation};

#[derive(Debug, Clone, Deserialize)]
pub struct NewMedicine {
    pub name: String,
    pub price: f64,
    pub stock: u32,
}

/// Medicine stock, keyed by id. Stock moves only under the entry's write guard.
#[derive(Default)]
pub struct Catalog {
    medicines: DashMap<Uuid, Medicine>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, new: NewMedicine) -> Result<Medicine, AppError> {
        if new.name.trim().is_empty() {
            return Err(AppError::InvalidInput("name cannot be empty".to_string()));
        }
        if !new.price.is_finite() || new.price < 0.0 {
            return Err(AppError::InvalidInput("price must be >= 0".to_string()));
        }

        let medicine = Medicine {
            id: Uuid::new_v4(),
            name: new.name.trim().to_string(),
            price: new.price,
            stock: new.stock,
            updated_at: Utc::now(),
        };
        self.medicines.insert(medicine.id, medicine.clone());
        Ok(medicine)
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Medicine, AppError> {
        self.medicines
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("medicine {id} not found")))
    }

    pub fn list(&self) -> Vec<Medicine> {
        let mut medicines: Vec<Medicine> = self
            .medicines
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        medicines.sort_by(|a, b| a.name.cmp(&b.name));
        medicines
    }

    pub fn remove(&self, id: Uuid) -> Result<Medicine, AppError> {
        self.medicines
            .remove(&id)
            .map(|(_, medicine)| medicine)
            .ok_or_else(|| AppError::NotFound(format!("medicine {id} not found")))
    }

    /// Compare-and-decrement: succeeds only if the whole quantity is on hand.
    pub fn decrement_stock(&self, id: Uuid, quantity: u32) -> Result<Reservation, AppError> {
        let mut medicine = self
            .medicines
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("medicine {id} not found")))?;

        if medicine.stock < quantity {
            return Err(AppError::InsufficientStock {
                item: medicine.name.clone(),
            });
        }

        medicine.stock -= quantity;
        medicine.updated_at = Utc::now();

        Ok(Reservation {
            medicine_id: id,
            name: medicine.name.clone(),
            unit_price: medicine.price,
            quantity,
        })
    }

    pub fn increment_stock(&self, id: Uuid, quantity: u32) -> Result<u32, AppError> {
        let mut medicine = self
            .medicines
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("medicine {id} not found")))?;

        medicine.stock = medicine.stock.saturating_add(quantity);
        medicine.updated_at = Utc::now();
        Ok(medicine.stock)
    }

    /// Takes every line or none of them. A failing line puts back what was already taken.
    pub fn reserve(&self, lines: &[(Uuid, u32)]) -> Result<Vec<Reservation>, AppError> {
        let mut taken: Vec<Reservation> = Vec::with_capacity(lines.len());

        for (medicine_id, quantity) in lines {
            match self.decrement_stock(*medicine_id, *quantity) {
                Ok(reservation) => taken.push(reservation),
                Err(err) => {
                    self.roll_back(&taken);
                    return Err(err);
                }
            }
        }

        info!(lines = taken.len(), "stock reserved");
        Ok(taken)
    }

    fn roll_back(&self, taken: &[Reservation]) {
        for reservation in taken {
            if let Err(err) = self.increment_stock(reservation.medicine_id, reservation.quantity) {
                warn!(
                    medicine_id = %reservation.medicine_id,
                    quantity = reservation.quantity,
                    error = %err,
                    "failed to roll back reserved stock"
                );
            }
        }
    }
}
