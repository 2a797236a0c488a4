//! Storage seam of the fleet engine.
//!
//! Every row the engine touches is reached through [`FleetStore`]. The
//! counters on `truck_inventory` and `inventory_balance` are only mutated by
//! the atomic operations below, never by a read followed by a blind write.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{
    inventory_balance, order, order_line, product, truck, truck_allocation, truck_inventory,
    truck_route, warehouse, AllocationStatus,
};
use crate::errors::ServiceError;

pub mod database;
pub mod memory;

pub use database::SeaOrmFleetStore;
pub use memory::InMemoryFleetStore;

/// One product moving between a warehouse and a truck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransfer {
    pub warehouse_id: Uuid,
    pub truck_id: Uuid,
    pub product_id: Uuid,
    pub qty_full: i32,
    pub qty_empty: i32,
}

impl StockTransfer {
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.qty_full < 0 || self.qty_empty < 0 {
            return Err(ServiceError::ValidationError(format!(
                "Transfer quantities must not be negative (product {})",
                self.product_id
            )));
        }
        if self.qty_full + self.qty_empty == 0 {
            return Err(ServiceError::ValidationError(format!(
                "Transfer of product {} moves nothing",
                self.product_id
            )));
        }
        Ok(())
    }
}

/// Signed change applied to a truck inventory line in one step.
///
/// `release_reserved` lowers `qty_reserved`, floored at zero, in the same
/// write that changes the physical counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruckStockAdjustment {
    pub full: i32,
    pub empty: i32,
    pub release_reserved: i32,
}

impl TruckStockAdjustment {
    /// Applies the adjustment to a line's counters, rejecting any result
    /// that breaks `0 <= qty_reserved <= qty_full` or goes negative.
    pub fn apply(
        &self,
        line: &truck_inventory::Model,
    ) -> Result<(i32, i32, i32), ServiceError> {
        let full = line.qty_full + self.full;
        let empty = line.qty_empty + self.empty;
        let reserved = (line.qty_reserved - self.release_reserved.max(0)).max(0);

        if full < 0 || empty < 0 || reserved > full {
            return Err(ServiceError::InsufficientStock(format!(
                "Truck {} holds {} full / {} empty ({} reserved) of product {}; cannot apply {:+} full / {:+} empty",
                line.truck_id,
                line.qty_full,
                line.qty_empty,
                line.qty_reserved,
                line.product_id,
                self.full,
                self.empty
            )));
        }
        Ok((full, empty, reserved))
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FleetStore: Send + Sync {
    async fn get_truck(&self, truck_id: Uuid) -> Result<Option<truck::Model>, ServiceError>;

    async fn list_trucks(&self, active_only: bool) -> Result<Vec<truck::Model>, ServiceError>;

    async fn get_warehouse(
        &self,
        warehouse_id: Uuid,
    ) -> Result<Option<warehouse::Model>, ServiceError>;

    async fn get_products(&self, ids: Vec<Uuid>) -> Result<Vec<product::Model>, ServiceError>;

    async fn get_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError>;

    async fn get_order_lines(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_line::Model>, ServiceError>;

    /// Every allocation dated `date`, cancelled ones included.
    async fn list_allocations(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<truck_allocation::Model>, ServiceError>;

    async fn get_allocation(
        &self,
        allocation_id: Uuid,
    ) -> Result<Option<truck_allocation::Model>, ServiceError>;

    /// The non-cancelled allocation of `order_id` on `date`, if any.
    async fn find_allocation_for_order(
        &self,
        order_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<truck_allocation::Model>, ServiceError>;

    async fn insert_allocation(
        &self,
        allocation: truck_allocation::Model,
    ) -> Result<truck_allocation::Model, ServiceError>;

    /// Moves an allocation from `expected` to `next`; fails with
    /// `ConcurrentModification` if its status is no longer `expected`.
    async fn update_allocation_status(
        &self,
        allocation_id: Uuid,
        expected: AllocationStatus,
        next: AllocationStatus,
    ) -> Result<truck_allocation::Model, ServiceError>;

    async fn delete_allocation(&self, allocation_id: Uuid) -> Result<(), ServiceError>;

    async fn list_routes(&self, date: NaiveDate)
        -> Result<Vec<truck_route::Model>, ServiceError>;

    async fn get_truck_inventory(
        &self,
        truck_id: Uuid,
    ) -> Result<Vec<truck_inventory::Model>, ServiceError>;

    async fn get_truck_inventory_line(
        &self,
        truck_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<truck_inventory::Model>, ServiceError>;

    /// Adds `quantity` to `qty_reserved` only if `qty_full - qty_reserved >=
    /// quantity` at the moment of the write.
    async fn reserve_truck_inventory(
        &self,
        truck_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<truck_inventory::Model, ServiceError>;

    /// Lowers `qty_reserved` by `quantity`, floored at zero.
    async fn release_truck_reservation(
        &self,
        truck_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<truck_inventory::Model, ServiceError>;

    /// Applies an adjustment to a truck line atomically; a missing line is
    /// created when the adjustment only adds stock.
    async fn adjust_truck_stock(
        &self,
        truck_id: Uuid,
        product_id: Uuid,
        adjustment: TruckStockAdjustment,
    ) -> Result<truck_inventory::Model, ServiceError>;

    /// Warehouse to truck, as one unit of work.
    async fn transfer_stock_to_truck(&self, transfer: StockTransfer) -> Result<(), ServiceError>;

    /// Truck to warehouse, as one unit of work.
    async fn transfer_stock_from_truck(
        &self,
        transfer: StockTransfer,
    ) -> Result<(), ServiceError>;

    async fn get_warehouse_balance(
        &self,
        warehouse_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<inventory_balance::Model>, ServiceError>;

    /// Writes `balance` only if the stored version equals
    /// `expected_version`; the stored version becomes `expected_version + 1`.
    async fn write_warehouse_balance(
        &self,
        expected_version: i32,
        balance: inventory_balance::Model,
    ) -> Result<inventory_balance::Model, ServiceError>;
}
