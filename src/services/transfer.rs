//! Warehouse to truck stock movements.
//!
//! Each item moves through one atomic store operation. A batch is not atomic
//! as a whole: when an item fails the batch stops there, and the items
//! already moved either stay where they are (`Manual`) or are moved back in
//! reverse order (`Reverse`). After a batch the result is re-read from both
//! sides; that check is advisory and never undoes a committed transfer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::capacity::utilization_percent;
use super::loading::{CapacityCheck, LoadItem, LoadingValidator};
use super::weight::{resolve_cylinder, WeightCalculator};
use crate::config::FleetConfig;
use crate::entities::{truck, truck_inventory, TruckStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender, TransferDirection};
use crate::metrics::{TRANSFERS, TRANSFER_FAILURES};
use crate::store::{FleetStore, StockTransfer};

/// What happens to already-moved items when a batch fails part way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationPolicy {
    /// Leave them in place for an operator to reconcile.
    #[default]
    Manual,
    /// Move them back, most recent first.
    Reverse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationItem {
    pub product_id: Uuid,
    pub expected_truck_full: i32,
    pub actual_truck_full: i32,
    pub expected_truck_empty: i32,
    pub actual_truck_empty: i32,
    pub expected_warehouse_full: i32,
    pub actual_warehouse_full: i32,
    pub expected_warehouse_empty: i32,
    pub actual_warehouse_empty: i32,
    pub passed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferVerification {
    pub verified: bool,
    pub items: Vec<VerificationItem>,
    /// Set when the verification reads themselves failed.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadResult {
    pub success: bool,
    pub loading_id: Uuid,
    pub items_transferred: usize,
    pub verification: TransferVerification,
    pub warnings: Vec<String>,
    pub capacity_check: CapacityCheck,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnloadResult {
    pub success: bool,
    pub items_transferred: usize,
    pub verification: TransferVerification,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventorySummary {
    pub product_lines: usize,
    pub total_full: i32,
    pub total_empty: i32,
    pub total_reserved: i32,
    pub total_available: i32,
    pub total_weight_kg: f64,
    pub capacity_cylinders: i32,
    pub cylinder_utilization: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruckInventoryView {
    pub truck: truck::Model,
    pub status: TruckStatus,
    pub inventory: Vec<truck_inventory::Model>,
    pub summary: InventorySummary,
}

/// (full, empty) per product.
type Counts = HashMap<Uuid, (i32, i32)>;

struct Snapshot {
    truck: Counts,
    warehouse: Counts,
}

/// Net change per product on the truck side, in first-seen order.
fn net_truck_deltas(direction: TransferDirection, items: &[LoadItem]) -> Vec<(Uuid, i32, i32)> {
    let sign = match direction {
        TransferDirection::ToTruck => 1,
        TransferDirection::FromTruck => -1,
    };
    let mut deltas: Vec<(Uuid, i32, i32)> = Vec::new();
    for item in items {
        match deltas.iter_mut().find(|(id, _, _)| *id == item.product_id) {
            Some((_, full, empty)) => {
                *full += sign * item.qty_full;
                *empty += sign * item.qty_empty;
            }
            None => deltas.push((item.product_id, sign * item.qty_full, sign * item.qty_empty)),
        }
    }
    deltas
}

#[derive(Clone)]
pub struct InventoryTransferService {
    store: Arc<dyn FleetStore>,
    config: FleetConfig,
    loading: LoadingValidator,
    weights: WeightCalculator,
    events: Option<EventSender>,
}

impl InventoryTransferService {
    pub fn new(
        store: Arc<dyn FleetStore>,
        config: FleetConfig,
        events: Option<EventSender>,
    ) -> Self {
        Self {
            loading: LoadingValidator::new(store.clone(), config.clone()),
            weights: WeightCalculator::new(store.clone()),
            store,
            config,
            events,
        }
    }

    pub fn with_compensation(mut self, policy: CompensationPolicy) -> Self {
        self.config.transfer_compensation = policy;
        self
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            events.send_or_log(event);
        }
    }

    async fn require_truck(&self, truck_id: Uuid) -> Result<truck::Model, ServiceError> {
        self.store
            .get_truck(truck_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Truck {} not found", truck_id)))
    }

    async fn require_warehouse(&self, warehouse_id: Uuid) -> Result<(), ServiceError> {
        match self.store.get_warehouse(warehouse_id).await? {
            Some(_) => Ok(()),
            None => Err(ServiceError::NotFound(format!(
                "Warehouse {} not found",
                warehouse_id
            ))),
        }
    }

    /// Loads `items` from the warehouse onto the truck after the capacity
    /// check has passed.
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn load_inventory(
        &self,
        truck_id: Uuid,
        warehouse_id: Uuid,
        items: &[LoadItem],
    ) -> Result<LoadResult, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::ValidationError("No items to load".into()));
        }
        let truck = self.require_truck(truck_id).await?;
        self.require_warehouse(warehouse_id).await?;

        let validation = self.loading.validate_for(&truck, items).await?;
        if !validation.is_valid {
            let check = &validation.capacity_check;
            let message = validation.errors.join("; ");
            return Err(
                if check.cylinder_overflow > 0 || check.weight_overflow_kg > 0.0 {
                    ServiceError::CapacityExceeded(message)
                } else {
                    ServiceError::ValidationError(message)
                },
            );
        }

        let loading_id = Uuid::new_v4();
        let snapshot = self.snapshot(truck_id, warehouse_id, items).await?;
        let items_transferred = self
            .run_batch(TransferDirection::ToTruck, truck_id, warehouse_id, items)
            .await?;
        let verification = self
            .verify(TransferDirection::ToTruck, truck_id, warehouse_id, items, &snapshot)
            .await;

        info!(
            %loading_id,
            %truck_id,
            %warehouse_id,
            items_transferred,
            verified = verification.verified,
            "Truck loaded"
        );
        self.emit(Event::TruckLoaded {
            loading_id,
            truck_id,
            warehouse_id,
            items_transferred,
        });

        Ok(LoadResult {
            success: true,
            loading_id,
            items_transferred,
            verification,
            warnings: validation.warnings,
            capacity_check: validation.capacity_check,
        })
    }

    /// Returns `items` from the truck to the warehouse.
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn unload_inventory(
        &self,
        truck_id: Uuid,
        warehouse_id: Uuid,
        items: &[LoadItem],
    ) -> Result<UnloadResult, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::ValidationError("No items to unload".into()));
        }
        self.require_truck(truck_id).await?;
        self.require_warehouse(warehouse_id).await?;

        let snapshot = self.snapshot(truck_id, warehouse_id, items).await?;
        let items_transferred = self
            .run_batch(TransferDirection::FromTruck, truck_id, warehouse_id, items)
            .await?;
        let verification = self
            .verify(TransferDirection::FromTruck, truck_id, warehouse_id, items, &snapshot)
            .await;

        info!(%truck_id, %warehouse_id, items_transferred, "Truck unloaded");
        self.emit(Event::TruckUnloaded {
            truck_id,
            warehouse_id,
            items_transferred,
        });

        Ok(UnloadResult {
            success: true,
            items_transferred,
            verification,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_inventory(&self, truck_id: Uuid) -> Result<TruckInventoryView, ServiceError> {
        let truck = self.require_truck(truck_id).await?;
        let inventory = self.store.get_truck_inventory(truck_id).await?;
        let catalog = self
            .weights
            .load_catalog(inventory.iter().map(|l| l.product_id).collect())
            .await?;

        let mut summary = InventorySummary {
            product_lines: inventory.len(),
            capacity_cylinders: truck.capacity_cylinders,
            ..Default::default()
        };
        for line in &inventory {
            summary.total_full += line.qty_full;
            summary.total_empty += line.qty_empty;
            summary.total_reserved += line.qty_reserved;
            summary.total_available += line.qty_available();
            if let Some(product) = catalog.get(&line.product_id) {
                let spec = resolve_cylinder(product, &catalog);
                summary.total_weight_kg += f64::from(line.qty_full) * spec.full_weight_kg()
                    + f64::from(line.qty_empty) * spec.empty_weight_kg();
            }
        }
        summary.cylinder_utilization = utilization_percent(
            f64::from(summary.total_full + summary.total_empty),
            f64::from(truck.capacity_cylinders),
        );

        Ok(TruckInventoryView {
            status: truck.status(),
            truck,
            inventory,
            summary,
        })
    }

    async fn transfer(
        &self,
        direction: TransferDirection,
        transfer: StockTransfer,
    ) -> Result<(), ServiceError> {
        match direction {
            TransferDirection::ToTruck => self.store.transfer_stock_to_truck(transfer).await,
            TransferDirection::FromTruck => self.store.transfer_stock_from_truck(transfer).await,
        }
    }

    /// Moves items one at a time and returns how many moved.
    async fn run_batch(
        &self,
        direction: TransferDirection,
        truck_id: Uuid,
        warehouse_id: Uuid,
        items: &[LoadItem],
    ) -> Result<usize, ServiceError> {
        let transfers: Vec<StockTransfer> = items
            .iter()
            .map(|item| StockTransfer {
                warehouse_id,
                truck_id,
                product_id: item.product_id,
                qty_full: item.qty_full,
                qty_empty: item.qty_empty,
            })
            .collect();
        for transfer in &transfers {
            transfer.validate()?;
        }

        for (index, transfer) in transfers.iter().enumerate() {
            if let Err(e) = self.transfer(direction, *transfer).await {
                TRANSFER_FAILURES
                    .with_label_values(&[direction.as_str()])
                    .inc();
                if index == 0 {
                    return Err(e);
                }

                let compensated = match self.config.transfer_compensation {
                    CompensationPolicy::Manual => false,
                    CompensationPolicy::Reverse => {
                        self.compensate(direction, &transfers[..index]).await
                    }
                };
                error!(
                    direction = direction.as_str(),
                    failed_index = index,
                    product_id = %transfer.product_id,
                    completed = index,
                    compensated,
                    error = %e,
                    "Batch transfer stopped part way"
                );
                return Err(ServiceError::PartialTransfer {
                    failed_index: index,
                    product_id: transfer.product_id,
                    completed: index,
                    compensated,
                    reason: e.to_string(),
                });
            }
            TRANSFERS.with_label_values(&[direction.as_str()]).inc();
        }

        Ok(transfers.len())
    }

    /// Reverses `completed` newest first; true only if every reversal landed.
    async fn compensate(&self, direction: TransferDirection, completed: &[StockTransfer]) -> bool {
        let reverse = direction.reversed();
        let mut all_reversed = true;
        for transfer in completed.iter().rev() {
            match self.transfer(reverse, *transfer).await {
                Ok(()) => TRANSFERS.with_label_values(&[reverse.as_str()]).inc(),
                Err(e) => {
                    all_reversed = false;
                    TRANSFER_FAILURES.with_label_values(&[reverse.as_str()]).inc();
                    error!(product_id = %transfer.product_id, error = %e, "Compensating transfer failed");
                }
            }
        }
        all_reversed
    }

    async fn snapshot(
        &self,
        truck_id: Uuid,
        warehouse_id: Uuid,
        items: &[LoadItem],
    ) -> Result<Snapshot, ServiceError> {
        let mut snapshot = Snapshot {
            truck: Counts::new(),
            warehouse: Counts::new(),
        };
        for item in items {
            if snapshot.truck.contains_key(&item.product_id) {
                continue;
            }
            let (truck_counts, warehouse_counts) =
                self.read_counts(truck_id, warehouse_id, item.product_id).await?;
            snapshot.truck.insert(item.product_id, truck_counts);
            snapshot.warehouse.insert(item.product_id, warehouse_counts);
        }
        Ok(snapshot)
    }

    async fn read_counts(
        &self,
        truck_id: Uuid,
        warehouse_id: Uuid,
        product_id: Uuid,
    ) -> Result<((i32, i32), (i32, i32)), ServiceError> {
        let line = self
            .store
            .get_truck_inventory_line(truck_id, product_id)
            .await?;
        let balance = self
            .store
            .get_warehouse_balance(warehouse_id, product_id)
            .await?;
        Ok((
            line.map(|l| (l.qty_full, l.qty_empty)).unwrap_or((0, 0)),
            balance.map(|b| (b.qty_full, b.qty_empty)).unwrap_or((0, 0)),
        ))
    }

    async fn verify(
        &self,
        direction: TransferDirection,
        truck_id: Uuid,
        warehouse_id: Uuid,
        items: &[LoadItem],
        before: &Snapshot,
    ) -> TransferVerification {
        let delay = self.config.verification_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut verification = TransferVerification {
            verified: true,
            ..Default::default()
        };

        for (product_id, full_delta, empty_delta) in net_truck_deltas(direction, items) {
            let (truck_before, warehouse_before) = (
                before.truck.get(&product_id).copied().unwrap_or((0, 0)),
                before.warehouse.get(&product_id).copied().unwrap_or((0, 0)),
            );
            let (truck_now, warehouse_now) =
                match self.read_counts(truck_id, warehouse_id, product_id).await {
                    Ok(counts) => counts,
                    Err(e) => {
                        warn!(%truck_id, error = %e, "Verification read failed");
                        verification.verified = false;
                        verification.error = Some(e.to_string());
                        return verification;
                    }
                };

            let item = VerificationItem {
                product_id,
                expected_truck_full: truck_before.0 + full_delta,
                actual_truck_full: truck_now.0,
                expected_truck_empty: truck_before.1 + empty_delta,
                actual_truck_empty: truck_now.1,
                expected_warehouse_full: warehouse_before.0 - full_delta,
                actual_warehouse_full: warehouse_now.0,
                expected_warehouse_empty: warehouse_before.1 - empty_delta,
                actual_warehouse_empty: warehouse_now.1,
                passed: false,
            };
            let passed = item.expected_truck_full == item.actual_truck_full
                && item.expected_truck_empty == item.actual_truck_empty
                && item.expected_warehouse_full == item.actual_warehouse_full
                && item.expected_warehouse_empty == item.actual_warehouse_empty;

            if !passed {
                verification.verified = false;
                let detail = format!(
                    "truck {}/{} (expected {}/{}), warehouse {}/{} (expected {}/{})",
                    item.actual_truck_full,
                    item.actual_truck_empty,
                    item.expected_truck_full,
                    item.expected_truck_empty,
                    item.actual_warehouse_full,
                    item.actual_warehouse_empty,
                    item.expected_warehouse_full,
                    item.expected_warehouse_empty
                );
                warn!(%truck_id, %product_id, %detail, "Post-transfer verification mismatch");
                self.emit(Event::VerificationMismatch {
                    truck_id,
                    warehouse_id,
                    product_id,
                    detail,
                });
            }
            verification.items.push(VerificationItem { passed, ..item });
        }

        verification
    }
}
