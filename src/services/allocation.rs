//! Order to truck allocation.
//!
//! Allocating an order creates the allocation row and then reserves the
//! order's stock on the chosen truck line by line. The two are separate
//! storage operations, so a failed reservation is compensated: earlier
//! reservations are released in reverse order and the allocation row is
//! deleted before the failure is reported.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::capacity::{evaluate_capacity, utilization_percent, CapacityService, TruckCapacity};
use super::reservation::{ReservationOutcome, TruckReservationService};
use super::weight::{derive_stock_movement, OrderWeight, WeightCalculator};
use crate::config::FleetConfig;
use crate::entities::{order_line, truck_allocation, truck_inventory, AllocationStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics::ALLOCATIONS;
use crate::store::{FleetStore, TruckStockAdjustment};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruckRecommendation {
    pub truck_id: Uuid,
    pub fleet_number: String,
    pub available_weight_kg: f64,
    pub remaining_after_kg: f64,
    pub utilization_after: f64,
    /// Post-assignment utilization as a fraction; higher is a tighter fit.
    pub fit_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRecommendations {
    pub order_id: Uuid,
    pub order_weight_kg: f64,
    pub target_date: NaiveDate,
    /// Feasible trucks, best fit first.
    pub recommendations: Vec<TruckRecommendation>,
    /// Every active truck that was considered, feasible or not.
    pub evaluated: Vec<TruckCapacity>,
    pub best_truck: Option<TruckRecommendation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocationValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub exceeds_capacity: bool,
    pub capacity: Option<TruckCapacity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub allocation: truck_allocation::Model,
    pub order_weight: OrderWeight,
    pub reservations: Vec<ReservationOutcome>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub allocation: truck_allocation::Model,
    pub adjusted_lines: Vec<truck_inventory::Model>,
    /// Lines whose stock could not be settled and need manual reconciliation.
    pub warnings: Vec<String>,
}

/// Best-fit ranking: feasible trucks ordered by the capacity they would have
/// left, smallest first, ties broken on truck id.
pub fn rank_trucks(order_weight_kg: f64, capacities: &[TruckCapacity]) -> Vec<TruckRecommendation> {
    let mut ranked: Vec<TruckRecommendation> = capacities
        .iter()
        .filter(|c| c.available_weight_kg >= order_weight_kg)
        .map(|c| {
            let utilization_after =
                utilization_percent(c.allocated_weight_kg + order_weight_kg, c.total_capacity_kg);
            TruckRecommendation {
                truck_id: c.truck_id,
                fleet_number: c.fleet_number.clone(),
                available_weight_kg: c.available_weight_kg,
                remaining_after_kg: c.available_weight_kg - order_weight_kg,
                utilization_after,
                fit_score: (utilization_after / 100.0).clamp(0.0, 1.0),
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        a.remaining_after_kg
            .total_cmp(&b.remaining_after_kg)
            .then_with(|| a.truck_id.cmp(&b.truck_id))
    });
    ranked
}

#[derive(Clone)]
pub struct AllocationService {
    store: Arc<dyn FleetStore>,
    config: FleetConfig,
    capacity: CapacityService,
    weights: WeightCalculator,
    reservations: TruckReservationService,
    events: Option<EventSender>,
}

impl AllocationService {
    pub fn new(
        store: Arc<dyn FleetStore>,
        config: FleetConfig,
        events: Option<EventSender>,
    ) -> Self {
        Self {
            capacity: CapacityService::new(store.clone(), config.clone()),
            weights: WeightCalculator::new(store.clone()),
            reservations: TruckReservationService::new(store.clone(), events.clone()),
            store,
            config,
            events,
        }
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            events.send_or_log(event);
        }
    }

    #[instrument(skip(self))]
    pub async fn find_best_allocation(
        &self,
        order_id: Uuid,
        order_weight_kg: f64,
        target_date: NaiveDate,
    ) -> Result<AllocationRecommendations, ServiceError> {
        let evaluated = self.capacity.fleet_capacity(target_date).await?;
        let recommendations = rank_trucks(order_weight_kg, &evaluated);
        let best_truck = recommendations.first().cloned();

        match &best_truck {
            Some(best) => info!(
                %order_id,
                truck_id = %best.truck_id,
                candidates = recommendations.len(),
                "Best-fit truck found"
            ),
            None => warn!(%order_id, order_weight_kg, "No truck can take the order"),
        }

        Ok(AllocationRecommendations {
            order_id,
            order_weight_kg,
            target_date,
            recommendations,
            evaluated,
            best_truck,
        })
    }

    #[instrument(skip(self))]
    pub async fn validate_allocation(
        &self,
        truck_id: Uuid,
        order_id: Uuid,
        order_weight_kg: f64,
        target_date: NaiveDate,
    ) -> Result<AllocationValidation, ServiceError> {
        let mut validation = AllocationValidation::default();

        let Some(truck) = self.store.get_truck(truck_id).await? else {
            validation.errors.push(format!("Truck {} not found", truck_id));
            return Ok(validation);
        };
        if !truck.active {
            validation
                .errors
                .push(format!("Truck {} is inactive", truck.fleet_number));
        }

        let allocations = self.store.list_allocations(target_date).await?;
        let inventory = self.store.get_truck_inventory(truck_id).await?;
        let capacity = evaluate_capacity(
            &truck,
            target_date,
            &allocations,
            Some(inventory.as_slice()),
            self.config.cylinder_weight_kg,
        );

        let remaining = capacity.available_weight_kg - order_weight_kg;
        if remaining < 0.0 {
            validation.exceeds_capacity = true;
            validation.errors.push(format!(
                "Order weight {:.1} kg exceeds available capacity of truck {} by {:.1} kg",
                order_weight_kg, truck.fleet_number, -remaining
            ));
        } else {
            let utilization_after = utilization_percent(
                capacity.allocated_weight_kg + order_weight_kg,
                capacity.total_capacity_kg,
            );
            if utilization_after > self.config.utilization_warning_percent {
                validation.warnings.push(format!(
                    "Truck {} will be {:.1}% utilized",
                    truck.fleet_number, utilization_after
                ));
            }
        }

        if let Some(existing) = self
            .store
            .find_allocation_for_order(order_id, target_date)
            .await?
        {
            validation.errors.push(format!(
                "Order {} is already allocated to truck {} on {}",
                order_id, existing.truck_id, target_date
            ));
        }

        validation.is_valid = validation.errors.is_empty();
        validation.capacity = Some(capacity);
        Ok(validation)
    }

    /// Allocates an order and reserves its stock, or leaves no trace.
    #[instrument(skip(self))]
    pub async fn allocate_order(
        &self,
        order_id: Uuid,
        truck_id: Option<Uuid>,
        target_date: NaiveDate,
    ) -> Result<AllocationResult, ServiceError> {
        let (order, lines, order_weight) = self.weights.weigh_order(order_id).await?;
        let weight_kg = order_weight.total_weight_kg;

        let truck_id = match truck_id {
            Some(id) => {
                if self.store.get_truck(id).await?.is_none() {
                    return Err(ServiceError::NotFound(format!("Truck {} not found", id)));
                }
                id
            }
            None => self
                .find_best_allocation(order_id, weight_kg, target_date)
                .await?
                .best_truck
                .map(|t| t.truck_id)
                .ok_or_else(|| {
                    ALLOCATIONS.with_label_values(&["rejected"]).inc();
                    ServiceError::CapacityExceeded(format!(
                        "No active truck can take order {} ({:.1} kg) on {}",
                        order.order_number, weight_kg, target_date
                    ))
                })?,
        };

        let validation = self
            .validate_allocation(truck_id, order_id, weight_kg, target_date)
            .await?;
        if !validation.is_valid {
            ALLOCATIONS.with_label_values(&["rejected"]).inc();
            let message = validation.errors.join("; ");
            return Err(if validation.exceeds_capacity {
                ServiceError::CapacityExceeded(message)
            } else {
                ServiceError::ValidationError(message)
            });
        }

        let stop_sequence = self
            .store
            .list_allocations(target_date)
            .await?
            .iter()
            .filter(|a| a.truck_id == truck_id && a.counts_against_capacity())
            .filter_map(|a| a.stop_sequence)
            .max()
            .unwrap_or(0)
            + 1;

        let now = Utc::now();
        let allocation = self
            .store
            .insert_allocation(truck_allocation::Model {
                id: Uuid::new_v4(),
                truck_id,
                order_id,
                allocation_date: target_date,
                status: AllocationStatus::Planned,
                estimated_weight_kg: weight_kg,
                stop_sequence: Some(stop_sequence),
                created_at: now,
                updated_at: now,
            })
            .await?;

        let mut reservations = Vec::new();
        let mut reserved: Vec<(Uuid, i32)> = Vec::new();
        if derive_stock_movement(order.order_type).full_out {
            for line in lines.iter().filter(|l| l.quantity > 0) {
                match self
                    .reservations
                    .reserve_inventory(truck_id, line.product_id, line.quantity, Some(order_id))
                    .await
                {
                    Ok(outcome) => {
                        reserved.push((line.product_id, line.quantity));
                        reservations.push(outcome);
                    }
                    Err(e) => return Err(self.roll_back(&allocation, &reserved, e).await),
                }
            }
        }

        ALLOCATIONS.with_label_values(&["created"]).inc();
        info!(
            allocation_id = %allocation.id,
            %order_id,
            %truck_id,
            weight_kg,
            stop_sequence,
            "Order allocated"
        );
        self.emit(Event::AllocationCreated {
            allocation_id: allocation.id,
            order_id,
            truck_id,
            allocation_date: target_date,
            estimated_weight_kg: weight_kg,
        });

        Ok(AllocationResult {
            allocation,
            order_weight,
            reservations,
            warnings: validation.warnings,
        })
    }

    async fn roll_back(
        &self,
        allocation: &truck_allocation::Model,
        reserved: &[(Uuid, i32)],
        cause: ServiceError,
    ) -> ServiceError {
        warn!(
            allocation_id = %allocation.id,
            error = %cause,
            released = reserved.len(),
            "Reservation failed, rolling back allocation"
        );

        for (product_id, quantity) in reserved.iter().rev() {
            if let Err(e) = self
                .reservations
                .release_reservation(
                    allocation.truck_id,
                    *product_id,
                    *quantity,
                    Some(allocation.order_id),
                )
                .await
            {
                error!(
                    allocation_id = %allocation.id,
                    %product_id,
                    error = %e,
                    "Failed to release reservation during rollback"
                );
            }
        }

        if let Err(e) = self.store.delete_allocation(allocation.id).await {
            error!(allocation_id = %allocation.id, error = %e, "Failed to delete allocation during rollback");
        }

        ALLOCATIONS.with_label_values(&["rolled_back"]).inc();
        let reason = cause.to_string();
        self.emit(Event::AllocationRolledBack {
            order_id: allocation.order_id,
            truck_id: allocation.truck_id,
            reason: reason.clone(),
        });

        ServiceError::AllocationRolledBack {
            order_id: allocation.order_id,
            truck_id: allocation.truck_id,
            reason,
        }
    }

    async fn transition(
        &self,
        allocation_id: Uuid,
        next: AllocationStatus,
    ) -> Result<truck_allocation::Model, ServiceError> {
        let current = self
            .store
            .get_allocation(allocation_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Allocation {} not found", allocation_id))
            })?;

        if !current.status.can_transition_to(next) {
            return Err(ServiceError::InvalidOperation(format!(
                "Allocation {} cannot move from {} to {}",
                allocation_id, current.status, next
            )));
        }

        let updated = self
            .store
            .update_allocation_status(allocation_id, current.status, next)
            .await?;

        info!(%allocation_id, from = %current.status, to = %next, "Allocation status changed");
        self.emit(Event::AllocationStatusChanged {
            allocation_id,
            order_id: updated.order_id,
            old_status: current.status,
            new_status: next,
        });
        Ok(updated)
    }

    async fn order_lines_of(
        &self,
        allocation: &truck_allocation::Model,
    ) -> Result<Option<(crate::entities::OrderType, Vec<order_line::Model>)>, ServiceError> {
        let Some(order) = self.store.get_order(allocation.order_id).await? else {
            warn!(order_id = %allocation.order_id, "Allocated order no longer exists");
            return Ok(None);
        };
        let lines = self.store.get_order_lines(order.id).await?;
        Ok(Some((order.order_type, lines)))
    }

    pub async fn mark_loaded(
        &self,
        allocation_id: Uuid,
    ) -> Result<truck_allocation::Model, ServiceError> {
        self.transition(allocation_id, AllocationStatus::Loaded).await
    }

    /// Cancels the allocation and gives its reserved stock back.
    #[instrument(skip(self))]
    pub async fn cancel_allocation(
        &self,
        allocation_id: Uuid,
    ) -> Result<truck_allocation::Model, ServiceError> {
        let allocation = self
            .transition(allocation_id, AllocationStatus::Cancelled)
            .await?;

        if let Some((order_type, lines)) = self.order_lines_of(&allocation).await? {
            if derive_stock_movement(order_type).full_out {
                for line in lines.iter().filter(|l| l.quantity > 0) {
                    if let Err(e) = self
                        .reservations
                        .release_reservation(
                            allocation.truck_id,
                            line.product_id,
                            line.quantity,
                            Some(allocation.order_id),
                        )
                        .await
                    {
                        warn!(%allocation_id, product_id = %line.product_id, error = %e, "Could not release reservation");
                    }
                }
            }
        }

        ALLOCATIONS.with_label_values(&["cancelled"]).inc();
        Ok(allocation)
    }

    /// Marks the order delivered and settles the truck's stock: reserved
    /// full cylinders leave, returned empties come on board.
    #[instrument(skip(self))]
    pub async fn complete_delivery(
        &self,
        allocation_id: Uuid,
    ) -> Result<DeliveryOutcome, ServiceError> {
        let allocation = self
            .transition(allocation_id, AllocationStatus::Delivered)
            .await?;

        let mut adjusted_lines = Vec::new();
        let mut warnings = Vec::new();

        if let Some((order_type, lines)) = self.order_lines_of(&allocation).await? {
            let movement = derive_stock_movement(order_type);
            for line in lines.iter().filter(|l| l.quantity > 0) {
                let adjustment = TruckStockAdjustment {
                    full: if movement.full_out { -line.quantity } else { 0 },
                    empty: if movement.empty_in { line.quantity } else { 0 },
                    release_reserved: if movement.full_out { line.quantity } else { 0 },
                };
                match self
                    .store
                    .adjust_truck_stock(allocation.truck_id, line.product_id, adjustment)
                    .await
                {
                    Ok(updated) => adjusted_lines.push(updated),
                    Err(e) => {
                        warn!(%allocation_id, product_id = %line.product_id, error = %e, "Delivered stock not settled");
                        warnings.push(format!("Product {}: {}", line.product_id, e));
                    }
                }
            }
        }

        ALLOCATIONS.with_label_values(&["delivered"]).inc();
        Ok(DeliveryOutcome {
            allocation,
            adjusted_lines,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capacity(available: f64, total: f64) -> TruckCapacity {
        TruckCapacity {
            truck_id: Uuid::new_v4(),
            fleet_number: "T".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            total_capacity_kg: total,
            allocated_weight_kg: total - available,
            available_weight_kg: available,
            utilization_percentage: 0.0,
            orders_count: 0,
            is_overallocated: false,
            total_cylinders: 0,
            loaded_cylinders: None,
            available_cylinders: None,
            reserved_cylinders: None,
        }
    }

    #[test]
    fn infeasible_trucks_are_excluded() {
        let small = capacity(500.0, 2700.0);
        let large = capacity(2000.0, 2700.0);

        let ranked = rank_trucks(800.0, &[small, large.clone()]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].truck_id, large.truck_id);
        assert_eq!(ranked[0].remaining_after_kg, 1200.0);
    }

    #[test]
    fn tightest_fit_ranks_first() {
        let loose = capacity(2500.0, 2700.0);
        let tight = capacity(900.0, 2700.0);

        let ranked = rank_trucks(800.0, &[loose, tight.clone()]);
        assert_eq!(ranked[0].truck_id, tight.truck_id);
        assert!(ranked[0].fit_score > ranked[1].fit_score);
    }

    #[test]
    fn equal_fits_break_on_truck_id() {
        let a = capacity(1000.0, 2700.0);
        let b = capacity(1000.0, 2700.0);
        let ranked = rank_trucks(100.0, &[a.clone(), b.clone()]);
        assert_eq!(ranked[0].truck_id, a.truck_id.min(b.truck_id));
    }
}
