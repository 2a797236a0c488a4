use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Weight assumed for one loaded cylinder slot when a truck has no explicit
/// `capacity_kg`.
pub const DEFAULT_CYLINDER_WEIGHT_KG: f64 = 27.0;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "trucks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub fleet_number: String,
    pub license_plate: Option<String>,
    /// Authoritative physical limit, in cylinder slots.
    pub capacity_cylinders: i32,
    /// Explicit weight limit; derived from `capacity_cylinders` when absent.
    pub capacity_kg: Option<f64>,
    pub active: bool,
    pub fuel_capacity_liters: Option<f64>,
    /// Litres per 100 km.
    pub avg_fuel_consumption: Option<f64>,
    pub next_maintenance_due: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Status is derived from the `active` flag and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TruckStatus {
    Active,
    Inactive,
}

impl Model {
    /// Weight limit of the truck: the explicit `capacity_kg`, or
    /// `capacity_cylinders * cylinder_weight_kg`.
    pub fn effective_capacity_kg(&self, cylinder_weight_kg: f64) -> f64 {
        match self.capacity_kg {
            Some(kg) if kg > 0.0 => kg,
            _ => f64::from(self.capacity_cylinders.max(0)) * cylinder_weight_kg,
        }
    }

    pub fn status(&self) -> TruckStatus {
        if self.active {
            TruckStatus::Active
        } else {
            TruckStatus::Inactive
        }
    }

    /// Builds an active truck with no explicit weight limit.
    pub fn new_active(fleet_number: impl Into<String>, capacity_cylinders: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            fleet_number: fleet_number.into(),
            license_plate: None,
            capacity_cylinders,
            capacity_kg: None,
            active: true,
            fuel_capacity_liters: None,
            avg_fuel_consumption: None,
            next_maintenance_due: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_kg_falls_back_to_cylinder_count() {
        let truck = Model::new_active("T-01", 100);
        assert_eq!(truck.effective_capacity_kg(DEFAULT_CYLINDER_WEIGHT_KG), 2700.0);

        let explicit = Model {
            capacity_kg: Some(1500.0),
            ..truck
        };
        assert_eq!(explicit.effective_capacity_kg(DEFAULT_CYLINDER_WEIGHT_KG), 1500.0);
    }

    #[test]
    fn status_follows_active_flag() {
        let mut truck = Model::new_active("T-02", 10);
        assert_eq!(truck.status(), TruckStatus::Active);
        truck.active = false;
        assert_eq!(truck.status(), TruckStatus::Inactive);
        assert_eq!(truck.status().to_string(), "inactive");
    }
}
