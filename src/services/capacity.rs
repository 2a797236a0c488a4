//! Truck capacity evaluation for a delivery date.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::FleetConfig;
use crate::entities::{truck, truck_allocation, truck_inventory};
use crate::errors::ServiceError;
use crate::store::FleetStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruckCapacity {
    pub truck_id: Uuid,
    pub fleet_number: String,
    pub date: NaiveDate,
    pub total_capacity_kg: f64,
    pub allocated_weight_kg: f64,
    pub available_weight_kg: f64,
    pub utilization_percentage: f64,
    pub orders_count: usize,
    pub is_overallocated: bool,
    pub total_cylinders: i32,
    /// Full plus empty cylinders on board; `None` when inventory was not supplied.
    pub loaded_cylinders: Option<i32>,
    pub available_cylinders: Option<i32>,
    pub reserved_cylinders: Option<i32>,
}

pub(crate) fn utilization_percent(used: f64, total: f64) -> f64 {
    if total > 0.0 {
        used / total * 100.0
    } else if used > 0.0 {
        100.0
    } else {
        0.0
    }
}

/// Evaluates one truck for `date`.
///
/// Only the truck's non-cancelled allocations dated `date` count, so the
/// caller may pass the whole day's allocations for the fleet.
pub fn evaluate_capacity(
    truck: &truck::Model,
    date: NaiveDate,
    allocations: &[truck_allocation::Model],
    inventory: Option<&[truck_inventory::Model]>,
    cylinder_weight_kg: f64,
) -> TruckCapacity {
    let total_capacity_kg = truck.effective_capacity_kg(cylinder_weight_kg);

    let (allocated_weight_kg, orders_count) = allocations
        .iter()
        .filter(|a| a.truck_id == truck.id && a.allocation_date == date)
        .filter(|a| a.counts_against_capacity())
        .fold((0.0, 0usize), |(kg, n), a| (kg + a.estimated_weight_kg, n + 1));

    let available_weight_kg = total_capacity_kg - allocated_weight_kg;

    let on_board = inventory.map(|lines| {
        lines
            .iter()
            .filter(|l| l.truck_id == truck.id)
            .fold((0, 0), |(slots, reserved), l| {
                (slots + l.occupied_slots(), reserved + l.qty_reserved)
            })
    });

    TruckCapacity {
        truck_id: truck.id,
        fleet_number: truck.fleet_number.clone(),
        date,
        total_capacity_kg,
        allocated_weight_kg,
        available_weight_kg,
        utilization_percentage: utilization_percent(allocated_weight_kg, total_capacity_kg),
        orders_count,
        is_overallocated: available_weight_kg < 0.0,
        total_cylinders: truck.capacity_cylinders,
        loaded_cylinders: on_board.map(|(slots, _)| slots),
        available_cylinders: on_board.map(|(slots, _)| truck.capacity_cylinders - slots),
        reserved_cylinders: on_board.map(|(_, reserved)| reserved),
    }
}

#[derive(Clone)]
pub struct CapacityService {
    store: Arc<dyn FleetStore>,
    config: FleetConfig,
}

impl CapacityService {
    pub fn new(store: Arc<dyn FleetStore>, config: FleetConfig) -> Self {
        Self { store, config }
    }

    #[instrument(skip(self))]
    pub async fn calculate_capacity(
        &self,
        truck_id: Uuid,
        date: NaiveDate,
    ) -> Result<TruckCapacity, ServiceError> {
        let truck = self
            .store
            .get_truck(truck_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Truck {} not found", truck_id)))?;

        let allocations = self.store.list_allocations(date).await?;
        let inventory = self.store.get_truck_inventory(truck_id).await?;

        Ok(evaluate_capacity(
            &truck,
            date,
            &allocations,
            Some(inventory.as_slice()),
            self.config.cylinder_weight_kg,
        ))
    }

    /// Capacity of every active truck for `date`, ordered by fleet number.
    #[instrument(skip(self))]
    pub async fn fleet_capacity(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<TruckCapacity>, ServiceError> {
        let trucks = self.store.list_trucks(true).await?;
        let allocations = self.store.list_allocations(date).await?;
        let capacities = self.capacities_for(&trucks, date, &allocations).await?;
        debug!(trucks = capacities.len(), "Evaluated fleet capacity");
        Ok(capacities)
    }

    pub(crate) async fn capacities_for(
        &self,
        trucks: &[truck::Model],
        date: NaiveDate,
        allocations: &[truck_allocation::Model],
    ) -> Result<Vec<TruckCapacity>, ServiceError> {
        let mut inventories: HashMap<Uuid, Vec<truck_inventory::Model>> = HashMap::new();
        for truck in trucks {
            inventories.insert(truck.id, self.store.get_truck_inventory(truck.id).await?);
        }

        Ok(trucks
            .iter()
            .map(|truck| {
                evaluate_capacity(
                    truck,
                    date,
                    allocations,
                    inventories.get(&truck.id).map(Vec::as_slice),
                    self.config.cylinder_weight_kg,
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{truck::DEFAULT_CYLINDER_WEIGHT_KG, AllocationStatus};
    use chrono::Utc;

    fn allocation(
        truck_id: Uuid,
        date: NaiveDate,
        kg: f64,
        status: AllocationStatus,
    ) -> truck_allocation::Model {
        truck_allocation::Model {
            id: Uuid::new_v4(),
            truck_id,
            order_id: Uuid::new_v4(),
            allocation_date: date,
            status,
            estimated_weight_kg: kg,
            stop_sequence: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    #[test]
    fn cancelled_and_other_dates_do_not_count() {
        let truck = truck::Model::new_active("T-10", 100);
        let other_day = day().succ_opt().unwrap();
        let allocations = vec![
            allocation(truck.id, day(), 1000.0, AllocationStatus::Planned),
            allocation(truck.id, day(), 500.0, AllocationStatus::Cancelled),
            allocation(truck.id, other_day, 700.0, AllocationStatus::Planned),
            allocation(Uuid::new_v4(), day(), 900.0, AllocationStatus::Planned),
        ];

        let cap = evaluate_capacity(&truck, day(), &allocations, None, DEFAULT_CYLINDER_WEIGHT_KG);
        assert_eq!(cap.total_capacity_kg, 2700.0);
        assert_eq!(cap.allocated_weight_kg, 1000.0);
        assert_eq!(cap.available_weight_kg, 1700.0);
        assert_eq!(cap.orders_count, 1);
        assert!(!cap.is_overallocated);
        assert_eq!(cap.loaded_cylinders, None);
    }

    #[test]
    fn overallocation_is_flagged() {
        let truck = truck::Model {
            capacity_kg: Some(500.0),
            ..truck::Model::new_active("T-11", 20)
        };
        let allocations = vec![allocation(truck.id, day(), 650.0, AllocationStatus::Loaded)];

        let cap = evaluate_capacity(&truck, day(), &allocations, None, DEFAULT_CYLINDER_WEIGHT_KG);
        assert_eq!(cap.available_weight_kg, -150.0);
        assert!(cap.is_overallocated);
        assert_eq!(cap.utilization_percentage, 130.0);
    }

    #[test]
    fn cylinder_counts_come_from_inventory() {
        let truck = truck::Model::new_active("T-12", 40);
        let mut line = truck_inventory::Model::new(truck.id, Uuid::new_v4(), 12, 5);
        line.qty_reserved = 4;

        let cap = evaluate_capacity(
            &truck,
            day(),
            &[],
            Some(&[line][..]),
            DEFAULT_CYLINDER_WEIGHT_KG,
        );
        assert_eq!(cap.loaded_cylinders, Some(17));
        assert_eq!(cap.available_cylinders, Some(23));
        assert_eq!(cap.reserved_cylinders, Some(4));
        assert_eq!(cap.utilization_percentage, 0.0);
    }

    #[test]
    fn zero_capacity_truck() {
        let truck = truck::Model::new_active("T-00", 0);
        let cap = evaluate_capacity(&truck, day(), &[], None, DEFAULT_CYLINDER_WEIGHT_KG);
        assert_eq!(cap.utilization_percentage, 0.0);
        assert!(!cap.is_overallocated);
    }
}
