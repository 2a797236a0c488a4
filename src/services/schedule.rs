//! Daily fleet schedule and utilization report.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

use super::capacity::{utilization_percent, CapacityService, TruckCapacity};
use crate::config::FleetConfig;
use crate::entities::{truck, truck_allocation, truck_route, TruckStatus};
use crate::errors::ServiceError;
use crate::store::FleetStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruckSchedule {
    pub truck: truck::Model,
    pub status: TruckStatus,
    pub route: Option<truck_route::Model>,
    /// Non-cancelled allocations in stop order.
    pub allocations: Vec<truck_allocation::Model>,
    pub capacity: TruckCapacity,
    pub maintenance_due: bool,
    pub fuel_sufficient: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetUtilization {
    pub total_trucks: usize,
    pub active_trucks: usize,
    pub total_capacity_kg: f64,
    pub allocated_capacity_kg: f64,
    pub overall_utilization: f64,
    pub overallocated_trucks: usize,
    pub maintenance_due_trucks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetSchedule {
    pub date: NaiveDate,
    pub schedules: Vec<TruckSchedule>,
    pub fleet_utilization: FleetUtilization,
}

pub fn maintenance_due(truck: &truck::Model, date: NaiveDate) -> bool {
    truck.next_maintenance_due.is_some_and(|due| due <= date)
}

/// Range on a full tank against the route distance. Unknown figures are
/// assumed sufficient.
pub fn fuel_sufficient(truck: &truck::Model, route: Option<&truck_route::Model>) -> bool {
    let distance = route.and_then(|r| r.total_distance_km);
    match (truck.fuel_capacity_liters, truck.avg_fuel_consumption, distance) {
        // consumption is litres per 100 km
        (Some(tank), Some(per_100km), Some(km)) if per_100km > 0.0 => {
            tank / per_100km * 100.0 >= km
        }
        _ => true,
    }
}

/// Fleet totals; capacity figures cover active trucks only.
pub fn summarize(schedules: &[TruckSchedule]) -> FleetUtilization {
    let active: Vec<&TruckSchedule> = schedules.iter().filter(|s| s.truck.active).collect();
    let total_capacity_kg: f64 = active.iter().map(|s| s.capacity.total_capacity_kg).sum();
    let allocated_capacity_kg: f64 = active.iter().map(|s| s.capacity.allocated_weight_kg).sum();

    FleetUtilization {
        total_trucks: schedules.len(),
        active_trucks: active.len(),
        total_capacity_kg,
        allocated_capacity_kg,
        overall_utilization: utilization_percent(allocated_capacity_kg, total_capacity_kg),
        overallocated_trucks: active.iter().filter(|s| s.capacity.is_overallocated).count(),
        maintenance_due_trucks: active.iter().filter(|s| s.maintenance_due).count(),
    }
}

#[derive(Clone)]
pub struct ScheduleService {
    store: Arc<dyn FleetStore>,
    capacity: CapacityService,
}

impl ScheduleService {
    pub fn new(store: Arc<dyn FleetStore>, config: FleetConfig) -> Self {
        Self {
            capacity: CapacityService::new(store.clone(), config),
            store,
        }
    }

    #[instrument(skip(self))]
    pub async fn generate_schedule(&self, date: NaiveDate) -> Result<FleetSchedule, ServiceError> {
        let trucks = self.store.list_trucks(false).await?;
        let allocations = self.store.list_allocations(date).await?;
        let routes = self.store.list_routes(date).await?;
        let capacities = self
            .capacity
            .capacities_for(&trucks, date, &allocations)
            .await?;

        let schedules: Vec<TruckSchedule> = trucks
            .into_iter()
            .zip(capacities)
            .map(|(truck, capacity)| {
                let route = routes.iter().find(|r| r.truck_id == truck.id).cloned();
                let mut stops: Vec<truck_allocation::Model> = allocations
                    .iter()
                    .filter(|a| a.truck_id == truck.id && a.counts_against_capacity())
                    .cloned()
                    .collect();
                stops.sort_by_key(|a| (a.stop_sequence.unwrap_or(i32::MAX), a.created_at));

                TruckSchedule {
                    status: truck.status(),
                    maintenance_due: maintenance_due(&truck, date),
                    fuel_sufficient: fuel_sufficient(&truck, route.as_ref()),
                    route,
                    allocations: stops,
                    capacity,
                    truck,
                }
            })
            .collect();

        let fleet_utilization = summarize(&schedules);
        Ok(FleetSchedule {
            date,
            schedules,
            fleet_utilization,
        })
    }
}
