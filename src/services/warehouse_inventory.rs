//! Warehouse balance movements under optimistic locking.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::concurrency::{OptimisticLock, OptimisticOutcome, Versioned, VersionedStore};
use crate::config::FleetConfig;
use crate::entities::inventory_balance;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::store::FleetStore;

impl Versioned for inventory_balance::Model {
    fn version(&self) -> i32 {
        self.version
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BalanceKey {
    pub warehouse_id: Uuid,
    pub product_id: Uuid,
}

/// Signed change to a warehouse balance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub full: i32,
    pub empty: i32,
    pub reserved: i32,
}

impl BalanceDelta {
    /// The balance after this delta, or a validation error if any counter
    /// would go negative or reserved would exceed full.
    pub fn apply(
        &self,
        balance: &inventory_balance::Model,
    ) -> Result<inventory_balance::Model, ServiceError> {
        let full = balance.qty_full + self.full;
        let empty = balance.qty_empty + self.empty;
        let reserved = balance.qty_reserved + self.reserved;

        if full < 0 || empty < 0 || reserved < 0 || reserved > full {
            return Err(ServiceError::ValidationError(format!(
                "Movement {:+}/{:+}/{:+} on warehouse {} product {} would leave {} full, {} empty, {} reserved",
                self.full,
                self.empty,
                self.reserved,
                balance.warehouse_id,
                balance.product_id,
                full,
                empty,
                reserved
            )));
        }

        Ok(inventory_balance::Model {
            qty_full: full,
            qty_empty: empty,
            qty_reserved: reserved,
            updated_at: Utc::now(),
            ..balance.clone()
        })
    }
}

/// Balances seen through [`VersionedStore`].
pub struct WarehouseBalanceStore {
    store: Arc<dyn FleetStore>,
}

impl WarehouseBalanceStore {
    pub fn new(store: Arc<dyn FleetStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl VersionedStore for WarehouseBalanceStore {
    type Key = BalanceKey;
    type Record = inventory_balance::Model;

    async fn read(&self, key: &BalanceKey) -> Result<inventory_balance::Model, ServiceError> {
        self.store
            .get_warehouse_balance(key.warehouse_id, key.product_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No balance for product {} in warehouse {}",
                    key.product_id, key.warehouse_id
                ))
            })
    }

    async fn write_if_unchanged(
        &self,
        expected_version: i32,
        record: inventory_balance::Model,
    ) -> Result<inventory_balance::Model, ServiceError> {
        self.store
            .write_warehouse_balance(expected_version, record)
            .await
    }
}

#[derive(Clone)]
pub struct WarehouseInventoryService {
    store: Arc<dyn FleetStore>,
    lock: OptimisticLock,
    events: Option<EventSender>,
}

impl WarehouseInventoryService {
    pub fn new(
        store: Arc<dyn FleetStore>,
        config: &FleetConfig,
        events: Option<EventSender>,
    ) -> Self {
        Self {
            store,
            lock: OptimisticLock::from_fleet_config(config),
            events,
        }
    }

    #[instrument(skip(self))]
    pub async fn apply_movement(
        &self,
        warehouse_id: Uuid,
        product_id: Uuid,
        delta: BalanceDelta,
    ) -> Result<OptimisticOutcome<inventory_balance::Model>, ServiceError> {
        let balances = WarehouseBalanceStore::new(self.store.clone());
        let key = BalanceKey {
            warehouse_id,
            product_id,
        };

        let outcome = self
            .lock
            .update(&balances, &key, |current| delta.apply(current))
            .await?;

        info!(
            %warehouse_id,
            %product_id,
            version = outcome.record.version,
            attempts = outcome.attempts,
            "Warehouse balance updated"
        );
        if let Some(events) = &self.events {
            events
                .send_or_log(Event::WarehouseBalanceUpdated {
                    warehouse_id,
                    product_id,
                    version: outcome.record.version,
                    attempts: outcome.attempts,
                });
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryFleetStore;

    #[test]
    fn delta_rejects_reserved_above_full() {
        let balance = inventory_balance::Model::new(Uuid::new_v4(), Uuid::new_v4(), 5, 0);
        let err = BalanceDelta {
            reserved: 6,
            ..Default::default()
        }
        .apply(&balance)
        .unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn movement_bumps_version() {
        let store = Arc::new(InMemoryFleetStore::new());
        let balance = inventory_balance::Model::new(Uuid::new_v4(), Uuid::new_v4(), 20, 3);
        let (warehouse_id, product_id) = (balance.warehouse_id, balance.product_id);
        store.set_warehouse_balance(balance).await;

        let svc = WarehouseInventoryService::new(store, &FleetConfig::default(), None);
        let outcome = svc
            .apply_movement(
                warehouse_id,
                product_id,
                BalanceDelta {
                    full: -4,
                    empty: 4,
                    reserved: 0,
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.record.qty_full, 16);
        assert_eq!(outcome.record.qty_empty, 7);
        assert_eq!(outcome.record.version, 2);
    }

    #[tokio::test]
    async fn missing_balance_is_not_found() {
        let svc = WarehouseInventoryService::new(
            Arc::new(InMemoryFleetStore::new()),
            &FleetConfig::default(),
            None,
        );
        let err = svc
            .apply_movement(Uuid::new_v4(), Uuid::new_v4(), BalanceDelta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
