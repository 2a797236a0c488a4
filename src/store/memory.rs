use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{FleetStore, StockTransfer, TruckStockAdjustment};
use crate::entities::{
    inventory_balance, order, order_line, product, truck, truck_allocation, truck_inventory,
    truck_route, warehouse, AllocationStatus,
};
use crate::errors::ServiceError;

#[derive(Debug, Default)]
struct FleetState {
    trucks: HashMap<Uuid, truck::Model>,
    warehouses: HashMap<Uuid, warehouse::Model>,
    products: HashMap<Uuid, product::Model>,
    orders: HashMap<Uuid, order::Model>,
    order_lines: Vec<order_line::Model>,
    allocations: Vec<truck_allocation::Model>,
    routes: Vec<truck_route::Model>,
    truck_inventory: HashMap<(Uuid, Uuid), truck_inventory::Model>,
    balances: HashMap<(Uuid, Uuid), inventory_balance::Model>,
}

/// [`FleetStore`] over process memory. Each operation holds the state lock
/// for its whole duration, which gives the same all-or-nothing behaviour as
/// the conditional statements of the database store.
#[derive(Debug, Default)]
pub struct InMemoryFleetStore {
    state: Mutex<FleetState>,
}

impl InMemoryFleetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_truck(&self, truck: truck::Model) {
        self.state.lock().await.trucks.insert(truck.id, truck);
    }

    pub async fn add_warehouse(&self, warehouse: warehouse::Model) {
        self.state
            .lock()
            .await
            .warehouses
            .insert(warehouse.id, warehouse);
    }

    pub async fn add_product(&self, product: product::Model) {
        self.state.lock().await.products.insert(product.id, product);
    }

    pub async fn add_order(&self, order: order::Model, lines: Vec<order_line::Model>) {
        let mut state = self.state.lock().await;
        state.order_lines.retain(|l| l.order_id != order.id);
        state.order_lines.extend(lines);
        state.orders.insert(order.id, order);
    }

    pub async fn add_route(&self, route: truck_route::Model) {
        self.state.lock().await.routes.push(route);
    }

    pub async fn add_allocation(&self, allocation: truck_allocation::Model) {
        self.state.lock().await.allocations.push(allocation);
    }

    pub async fn set_truck_inventory(&self, line: truck_inventory::Model) {
        self.state
            .lock()
            .await
            .truck_inventory
            .insert((line.truck_id, line.product_id), line);
    }

    pub async fn set_warehouse_balance(&self, balance: inventory_balance::Model) {
        self.state
            .lock()
            .await
            .balances
            .insert((balance.warehouse_id, balance.product_id), balance);
    }
}

fn shortfall(what: &str, have: i32, want: i32, product_id: Uuid) -> ServiceError {
    ServiceError::InsufficientStock(format!(
        "{} has {} of product {} available, {} requested",
        what, have, product_id, want
    ))
}

#[async_trait]
impl FleetStore for InMemoryFleetStore {
    async fn get_truck(&self, truck_id: Uuid) -> Result<Option<truck::Model>, ServiceError> {
        Ok(self.state.lock().await.trucks.get(&truck_id).cloned())
    }

    async fn list_trucks(&self, active_only: bool) -> Result<Vec<truck::Model>, ServiceError> {
        let state = self.state.lock().await;
        let mut trucks: Vec<_> = state
            .trucks
            .values()
            .filter(|t| !active_only || t.active)
            .cloned()
            .collect();
        trucks.sort_by(|a, b| a.fleet_number.cmp(&b.fleet_number).then(a.id.cmp(&b.id)));
        Ok(trucks)
    }

    async fn get_warehouse(
        &self,
        warehouse_id: Uuid,
    ) -> Result<Option<warehouse::Model>, ServiceError> {
        Ok(self.state.lock().await.warehouses.get(&warehouse_id).cloned())
    }

    async fn get_products(&self, ids: Vec<Uuid>) -> Result<Vec<product::Model>, ServiceError> {
        let state = self.state.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.products.get(id).cloned())
            .collect())
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        Ok(self.state.lock().await.orders.get(&order_id).cloned())
    }

    async fn get_order_lines(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_line::Model>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .order_lines
            .iter()
            .filter(|l| l.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn list_allocations(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<truck_allocation::Model>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .allocations
            .iter()
            .filter(|a| a.allocation_date == date)
            .cloned()
            .collect())
    }

    async fn get_allocation(
        &self,
        allocation_id: Uuid,
    ) -> Result<Option<truck_allocation::Model>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .allocations
            .iter()
            .find(|a| a.id == allocation_id)
            .cloned())
    }

    async fn find_allocation_for_order(
        &self,
        order_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<truck_allocation::Model>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .allocations
            .iter()
            .find(|a| {
                a.order_id == order_id && a.allocation_date == date && a.counts_against_capacity()
            })
            .cloned())
    }

    async fn insert_allocation(
        &self,
        allocation: truck_allocation::Model,
    ) -> Result<truck_allocation::Model, ServiceError> {
        let mut state = self.state.lock().await;
        if state.allocations.iter().any(|a| a.id == allocation.id) {
            return Err(ServiceError::ValidationError(format!(
                "Allocation {} already exists",
                allocation.id
            )));
        }
        state.allocations.push(allocation.clone());
        Ok(allocation)
    }

    async fn update_allocation_status(
        &self,
        allocation_id: Uuid,
        expected: AllocationStatus,
        next: AllocationStatus,
    ) -> Result<truck_allocation::Model, ServiceError> {
        let mut state = self.state.lock().await;
        let allocation = state
            .allocations
            .iter_mut()
            .find(|a| a.id == allocation_id)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Allocation {} not found", allocation_id))
            })?;

        if allocation.status != expected {
            return Err(ServiceError::ConcurrentModification(allocation_id));
        }
        allocation.status = next;
        allocation.updated_at = Utc::now();
        Ok(allocation.clone())
    }

    async fn delete_allocation(&self, allocation_id: Uuid) -> Result<(), ServiceError> {
        let mut state = self.state.lock().await;
        let before = state.allocations.len();
        state.allocations.retain(|a| a.id != allocation_id);
        if state.allocations.len() == before {
            return Err(ServiceError::NotFound(format!(
                "Allocation {} not found",
                allocation_id
            )));
        }
        Ok(())
    }

    async fn list_routes(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<truck_route::Model>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .routes
            .iter()
            .filter(|r| r.route_date == date)
            .cloned()
            .collect())
    }

    async fn get_truck_inventory(
        &self,
        truck_id: Uuid,
    ) -> Result<Vec<truck_inventory::Model>, ServiceError> {
        let state = self.state.lock().await;
        let mut lines: Vec<_> = state
            .truck_inventory
            .values()
            .filter(|l| l.truck_id == truck_id)
            .cloned()
            .collect();
        lines.sort_by_key(|l| l.product_id);
        Ok(lines)
    }

    async fn get_truck_inventory_line(
        &self,
        truck_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<truck_inventory::Model>, ServiceError> {
        Ok(self
            .state
            .lock()
            .await
            .truck_inventory
            .get(&(truck_id, product_id))
            .cloned())
    }

    async fn reserve_truck_inventory(
        &self,
        truck_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<truck_inventory::Model, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Reservation quantity must be positive".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        let line = state
            .truck_inventory
            .get_mut(&(truck_id, product_id))
            .ok_or_else(|| shortfall("Truck", 0, quantity, product_id))?;

        if line.qty_available() < quantity {
            return Err(shortfall("Truck", line.qty_available(), quantity, product_id));
        }
        line.qty_reserved += quantity;
        line.updated_at = Utc::now();
        Ok(line.clone())
    }

    async fn release_truck_reservation(
        &self,
        truck_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<truck_inventory::Model, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(
                "Release quantity must not be negative".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        let line = state
            .truck_inventory
            .get_mut(&(truck_id, product_id))
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No inventory of product {} on truck {}",
                    product_id, truck_id
                ))
            })?;

        line.qty_reserved = (line.qty_reserved - quantity).max(0);
        line.updated_at = Utc::now();
        Ok(line.clone())
    }

    async fn adjust_truck_stock(
        &self,
        truck_id: Uuid,
        product_id: Uuid,
        adjustment: TruckStockAdjustment,
    ) -> Result<truck_inventory::Model, ServiceError> {
        let mut state = self.state.lock().await;
        let line = state
            .truck_inventory
            .entry((truck_id, product_id))
            .or_insert_with(|| truck_inventory::Model::new(truck_id, product_id, 0, 0));

        let (full, empty, reserved) = match adjustment.apply(line) {
            Ok(counts) => counts,
            Err(e) => {
                if line.occupied_slots() == 0 && line.qty_reserved == 0 {
                    state.truck_inventory.remove(&(truck_id, product_id));
                }
                return Err(e);
            }
        };
        line.qty_full = full;
        line.qty_empty = empty;
        line.qty_reserved = reserved;
        line.updated_at = Utc::now();
        Ok(line.clone())
    }

    async fn transfer_stock_to_truck(&self, transfer: StockTransfer) -> Result<(), ServiceError> {
        transfer.validate()?;
        let mut state = self.state.lock().await;
        let key = (transfer.warehouse_id, transfer.product_id);

        let balance = state
            .balances
            .get_mut(&key)
            .ok_or_else(|| shortfall("Warehouse", 0, transfer.qty_full, transfer.product_id))?;
        if balance.qty_available() < transfer.qty_full {
            return Err(shortfall(
                "Warehouse",
                balance.qty_available(),
                transfer.qty_full,
                transfer.product_id,
            ));
        }
        if balance.qty_empty < transfer.qty_empty {
            return Err(shortfall(
                "Warehouse (empties)",
                balance.qty_empty,
                transfer.qty_empty,
                transfer.product_id,
            ));
        }
        balance.qty_full -= transfer.qty_full;
        balance.qty_empty -= transfer.qty_empty;
        balance.version += 1;
        balance.updated_at = Utc::now();

        let line = state
            .truck_inventory
            .entry((transfer.truck_id, transfer.product_id))
            .or_insert_with(|| {
                truck_inventory::Model::new(transfer.truck_id, transfer.product_id, 0, 0)
            });
        line.qty_full += transfer.qty_full;
        line.qty_empty += transfer.qty_empty;
        line.updated_at = Utc::now();
        Ok(())
    }

    async fn transfer_stock_from_truck(
        &self,
        transfer: StockTransfer,
    ) -> Result<(), ServiceError> {
        transfer.validate()?;
        let mut state = self.state.lock().await;

        let line = state
            .truck_inventory
            .get_mut(&(transfer.truck_id, transfer.product_id))
            .ok_or_else(|| shortfall("Truck", 0, transfer.qty_full, transfer.product_id))?;
        if line.qty_available() < transfer.qty_full {
            return Err(shortfall(
                "Truck",
                line.qty_available(),
                transfer.qty_full,
                transfer.product_id,
            ));
        }
        if line.qty_empty < transfer.qty_empty {
            return Err(shortfall(
                "Truck (empties)",
                line.qty_empty,
                transfer.qty_empty,
                transfer.product_id,
            ));
        }
        line.qty_full -= transfer.qty_full;
        line.qty_empty -= transfer.qty_empty;
        line.updated_at = Utc::now();

        let balance = state
            .balances
            .entry((transfer.warehouse_id, transfer.product_id))
            .or_insert_with(|| {
                inventory_balance::Model::new(transfer.warehouse_id, transfer.product_id, 0, 0)
            });
        balance.qty_full += transfer.qty_full;
        balance.qty_empty += transfer.qty_empty;
        balance.version += 1;
        balance.updated_at = Utc::now();
        Ok(())
    }

    async fn get_warehouse_balance(
        &self,
        warehouse_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<inventory_balance::Model>, ServiceError> {
        Ok(self
            .state
            .lock()
            .await
            .balances
            .get(&(warehouse_id, product_id))
            .cloned())
    }

    async fn write_warehouse_balance(
        &self,
        expected_version: i32,
        balance: inventory_balance::Model,
    ) -> Result<inventory_balance::Model, ServiceError> {
        let mut state = self.state.lock().await;
        let stored = state
            .balances
            .get_mut(&(balance.warehouse_id, balance.product_id))
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No balance for product {} in warehouse {}",
                    balance.product_id, balance.warehouse_id
                ))
            })?;

        if stored.version != expected_version {
            return Err(ServiceError::ConcurrentModification(stored.id));
        }
        *stored = inventory_balance::Model {
            id: stored.id,
            version: expected_version + 1,
            updated_at: Utc::now(),
            ..balance
        };
        Ok(stored.clone())
    }
}
