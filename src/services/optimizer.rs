//! Greedy batch planning over the fleet.
//!
//! Orders are processed one at a time in a fixed sequence and each is placed
//! on its best-fit truck against the capacity left by the orders placed
//! before it. The optimizer only plans; committing a plan goes through
//! [`AllocationService::allocate_order`](super::allocation::AllocationService::allocate_order).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::allocation::rank_trucks;
use super::capacity::{utilization_percent, CapacityService, TruckCapacity};
use super::weight::WeightCalculator;
use crate::config::FleetConfig;
use crate::errors::ServiceError;
use crate::store::FleetStore;

/// Order in which a batch is fed to the allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSequence {
    /// As requested.
    #[default]
    Arrival,
    /// Heaviest first, which usually packs tighter.
    WeightDesc,
    /// Highest order priority first.
    Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDemand {
    pub order_id: Uuid,
    pub weight_kg: f64,
    pub priority: i32,
    /// Position in the request.
    pub arrival: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizedAllocation {
    pub order_id: Uuid,
    pub truck_id: Uuid,
    pub fleet_number: String,
    pub estimated_weight_kg: f64,
    /// Utilization of the chosen truck after the assignment, as a fraction.
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSummary {
    pub total_orders: usize,
    pub allocated_orders: usize,
    pub fleet_utilization: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationPlan {
    pub optimized_allocations: Vec<OptimizedAllocation>,
    pub unallocated_orders: Vec<Uuid>,
    /// Orders that already hold an allocation for the date; left untouched.
    pub already_allocated: Vec<Uuid>,
    pub optimization_summary: OptimizationSummary,
}

pub fn sequence_orders(demands: &mut [OrderDemand], sequence: OrderSequence) {
    match sequence {
        OrderSequence::Arrival => demands.sort_by_key(|d| d.arrival),
        OrderSequence::WeightDesc => demands.sort_by(|a, b| {
            b.weight_kg
                .total_cmp(&a.weight_kg)
                .then(a.arrival.cmp(&b.arrival))
        }),
        OrderSequence::Priority => {
            demands.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.arrival.cmp(&b.arrival)))
        }
    }
}

/// Plans `demands` onto the fleet described by `capacities`.
pub fn plan_allocations(
    mut demands: Vec<OrderDemand>,
    mut capacities: Vec<TruckCapacity>,
    sequence: OrderSequence,
) -> OptimizationPlan {
    sequence_orders(&mut demands, sequence);

    let mut optimized_allocations = Vec::new();
    let mut unallocated_orders = Vec::new();

    for demand in &demands {
        let Some(best) = rank_trucks(demand.weight_kg, &capacities).into_iter().next() else {
            unallocated_orders.push(demand.order_id);
            continue;
        };

        if let Some(truck) = capacities.iter_mut().find(|c| c.truck_id == best.truck_id) {
            truck.allocated_weight_kg += demand.weight_kg;
            truck.available_weight_kg -= demand.weight_kg;
            truck.orders_count += 1;
            truck.utilization_percentage =
                utilization_percent(truck.allocated_weight_kg, truck.total_capacity_kg);
        }

        optimized_allocations.push(OptimizedAllocation {
            order_id: demand.order_id,
            truck_id: best.truck_id,
            fleet_number: best.fleet_number,
            estimated_weight_kg: demand.weight_kg,
            confidence: best.fit_score,
        });
    }

    let total_kg: f64 = capacities.iter().map(|c| c.total_capacity_kg).sum();
    let allocated_kg: f64 = capacities.iter().map(|c| c.allocated_weight_kg).sum();

    OptimizationPlan {
        optimization_summary: OptimizationSummary {
            total_orders: demands.len(),
            allocated_orders: optimized_allocations.len(),
            fleet_utilization: utilization_percent(allocated_kg, total_kg),
        },
        optimized_allocations,
        unallocated_orders,
        already_allocated: Vec::new(),
    }
}

#[derive(Clone)]
pub struct FleetOptimizer {
    store: Arc<dyn FleetStore>,
    capacity: CapacityService,
    weights: WeightCalculator,
    sequence: OrderSequence,
}

impl FleetOptimizer {
    pub fn new(store: Arc<dyn FleetStore>, config: FleetConfig) -> Self {
        Self {
            capacity: CapacityService::new(store.clone(), config.clone()),
            weights: WeightCalculator::new(store.clone()),
            sequence: config.order_sequence,
            store,
        }
    }

    pub fn with_sequence(mut self, sequence: OrderSequence) -> Self {
        self.sequence = sequence;
        self
    }

    #[instrument(skip(self, order_ids), fields(orders = order_ids.len()))]
    pub async fn optimize_allocations(
        &self,
        order_ids: &[Uuid],
        target_date: NaiveDate,
    ) -> Result<OptimizationPlan, ServiceError> {
        let mut demands = Vec::new();
        let mut missing = Vec::new();
        let mut already_allocated = Vec::new();

        for (arrival, &order_id) in order_ids.iter().enumerate() {
            if self
                .store
                .find_allocation_for_order(order_id, target_date)
                .await?
                .is_some()
            {
                already_allocated.push(order_id);
                continue;
            }

            match self.weights.weigh_order(order_id).await {
                Ok((order, _, weight)) => demands.push(OrderDemand {
                    order_id,
                    weight_kg: weight.total_weight_kg,
                    priority: order.priority,
                    arrival,
                }),
                Err(ServiceError::NotFound(_)) => {
                    warn!(%order_id, "Order not found, leaving it unallocated");
                    missing.push(order_id);
                }
                Err(e) => return Err(e),
            }
        }

        let capacities = self.capacity.fleet_capacity(target_date).await?;
        let mut plan = plan_allocations(demands, capacities, self.sequence);
        plan.unallocated_orders.extend(missing);
        plan.optimization_summary.total_orders = order_ids.len();
        plan.already_allocated = already_allocated;

        info!(
            allocated = plan.optimization_summary.allocated_orders,
            unallocated = plan.unallocated_orders.len(),
            fleet_utilization = plan.optimization_summary.fleet_utilization,
            "Optimization plan ready"
        );
        Ok(plan)
    }
}
