#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use cylinder_fleet_api::{
    config::FleetConfig,
    entities::{
        inventory_balance, order, order_line, product, truck, truck_allocation, truck_inventory,
        warehouse, AllocationStatus, OrderType,
    },
    events::{Event, EventSender},
    services::{ServiceContainer, ServiceFactory},
    store::{FleetStore, InMemoryFleetStore},
};
use tokio::sync::mpsc;
use uuid::Uuid;

pub fn test_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
}

/// Fleet configuration without the verification pause and with millisecond
/// backoff, so tests do not sleep.
pub fn test_config() -> FleetConfig {
    FleetConfig {
        verification_delay_ms: 0,
        optimistic_backoff_ms: 1,
        ..FleetConfig::default()
    }
}

/// Helper harness wiring every service over an in-memory store.
pub struct TestFleet {
    pub store: Arc<InMemoryFleetStore>,
    pub services: ServiceContainer,
    events: mpsc::Receiver<Event>,
}

impl TestFleet {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: FleetConfig) -> Self {
        let store = Arc::new(InMemoryFleetStore::new());
        let (sender, events) = EventSender::channel(1024);
        let factory = ServiceFactory::new(store.clone(), config, Some(sender));
        Self {
            services: ServiceContainer::new(&factory),
            store,
            events,
        }
    }

    pub fn dyn_store(&self) -> Arc<dyn FleetStore> {
        self.store.clone()
    }

    pub async fn truck(&self, fleet_number: &str, capacity_cylinders: i32) -> truck::Model {
        let truck = truck::Model::new_active(fleet_number, capacity_cylinders);
        self.store.add_truck(truck.clone()).await;
        truck
    }

    pub async fn truck_with_kg(&self, fleet_number: &str, capacity_kg: f64) -> truck::Model {
        let truck = truck::Model {
            capacity_kg: Some(capacity_kg),
            ..truck::Model::new_active(fleet_number, 200)
        };
        self.store.add_truck(truck.clone()).await;
        truck
    }

    pub async fn warehouse(&self, name: &str) -> warehouse::Model {
        let warehouse = warehouse::Model::new(name);
        self.store.add_warehouse(warehouse.clone()).await;
        warehouse
    }

    /// A 25 kg full / 5 kg empty cylinder.
    pub async fn cylinder(&self, sku: &str) -> product::Model {
        let product = product::Model::cylinder(sku, sku, 20.0, 5.0);
        self.store.add_product(product.clone()).await;
        product
    }

    pub async fn stock_truck(
        &self,
        truck_id: Uuid,
        product_id: Uuid,
        full: i32,
        empty: i32,
        reserved: i32,
    ) {
        let mut line = truck_inventory::Model::new(truck_id, product_id, full, empty);
        line.qty_reserved = reserved;
        self.store.set_truck_inventory(line).await;
    }

    pub async fn stock_warehouse(
        &self,
        warehouse_id: Uuid,
        product_id: Uuid,
        full: i32,
        empty: i32,
    ) {
        self.store
            .set_warehouse_balance(inventory_balance::Model::new(
                warehouse_id,
                product_id,
                full,
                empty,
            ))
            .await;
    }

    pub async fn order(&self, order_type: OrderType, lines: &[(Uuid, i32)]) -> order::Model {
        let number = format!("ORD-{}", &Uuid::new_v4().to_string()[..8]);
        let order = order::Model::new(number, order_type);
        let lines = lines
            .iter()
            .map(|(product_id, quantity)| order_line::Model::new(order.id, *product_id, *quantity))
            .collect();
        self.store.add_order(order.clone(), lines).await;
        order
    }

    /// Records an existing allocation of `kg` on `truck_id` for the test date.
    pub async fn booked(&self, truck_id: Uuid, kg: f64) -> truck_allocation::Model {
        let allocation = truck_allocation::Model {
            id: Uuid::new_v4(),
            truck_id,
            order_id: Uuid::new_v4(),
            allocation_date: test_date(),
            status: AllocationStatus::Planned,
            estimated_weight_kg: kg,
            stop_sequence: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.store.add_allocation(allocation.clone()).await;
        allocation
    }

    pub async fn truck_line(
        &self,
        truck_id: Uuid,
        product_id: Uuid,
    ) -> Option<truck_inventory::Model> {
        self.store
            .get_truck_inventory_line(truck_id, product_id)
            .await
            .unwrap()
    }

    pub async fn warehouse_line(
        &self,
        warehouse_id: Uuid,
        product_id: Uuid,
    ) -> Option<inventory_balance::Model> {
        self.store
            .get_warehouse_balance(warehouse_id, product_id)
            .await
            .unwrap()
    }

    /// Events emitted so far, oldest first.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
