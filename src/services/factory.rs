use std::sync::Arc;

use crate::{
    config::FleetConfig,
    events::EventSender,
    services::{
        allocation::AllocationService, capacity::CapacityService, loading::LoadingValidator,
        optimizer::FleetOptimizer, reservation::TruckReservationService,
        schedule::ScheduleService, transfer::InventoryTransferService,
        warehouse_inventory::WarehouseInventoryService, weight::WeightCalculator,
    },
    store::FleetStore,
};

/// Factory for creating service instances with shared dependencies
#[derive(Clone)]
pub struct ServiceFactory {
    store: Arc<dyn FleetStore>,
    config: FleetConfig,
    event_sender: Option<EventSender>,
}

impl ServiceFactory {
    pub fn new(
        store: Arc<dyn FleetStore>,
        config: FleetConfig,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            store,
            config,
            event_sender,
        }
    }

    pub fn weight_calculator(&self) -> WeightCalculator {
        WeightCalculator::new(self.store.clone())
    }

    pub fn capacity_service(&self) -> CapacityService {
        CapacityService::new(self.store.clone(), self.config.clone())
    }

    pub fn loading_validator(&self) -> LoadingValidator {
        LoadingValidator::new(self.store.clone(), self.config.clone())
    }

    pub fn allocation_service(&self) -> AllocationService {
        AllocationService::new(
            self.store.clone(),
            self.config.clone(),
            self.event_sender.clone(),
        )
    }

    pub fn fleet_optimizer(&self) -> FleetOptimizer {
        FleetOptimizer::new(self.store.clone(), self.config.clone())
    }

    pub fn schedule_service(&self) -> ScheduleService {
        ScheduleService::new(self.store.clone(), self.config.clone())
    }

    pub fn transfer_service(&self) -> InventoryTransferService {
        InventoryTransferService::new(
            self.store.clone(),
            self.config.clone(),
            self.event_sender.clone(),
        )
    }

    pub fn reservation_service(&self) -> TruckReservationService {
        TruckReservationService::new(self.store.clone(), self.event_sender.clone())
    }

    pub fn warehouse_inventory_service(&self) -> WarehouseInventoryService {
        WarehouseInventoryService::new(
            self.store.clone(),
            &self.config,
            self.event_sender.clone(),
        )
    }

    /// Gets a reference to the backing store
    pub fn store(&self) -> &Arc<dyn FleetStore> {
        &self.store
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }
}

/// Service container holding all service instances
#[derive(Clone)]
pub struct ServiceContainer {
    pub weights: Arc<WeightCalculator>,
    pub capacity: Arc<CapacityService>,
    pub loading: Arc<LoadingValidator>,
    pub allocation: Arc<AllocationService>,
    pub optimizer: Arc<FleetOptimizer>,
    pub schedule: Arc<ScheduleService>,
    pub transfers: Arc<InventoryTransferService>,
    pub reservations: Arc<TruckReservationService>,
    pub warehouse_inventory: Arc<WarehouseInventoryService>,
}

impl ServiceContainer {
    /// Creates a new service container with all services initialized
    pub fn new(factory: &ServiceFactory) -> Self {
        Self {
            weights: Arc::new(factory.weight_calculator()),
            capacity: Arc::new(factory.capacity_service()),
            loading: Arc::new(factory.loading_validator()),
            allocation: Arc::new(factory.allocation_service()),
            optimizer: Arc::new(factory.fleet_optimizer()),
            schedule: Arc::new(factory.schedule_service()),
            transfers: Arc::new(factory.transfer_service()),
            reservations: Arc::new(factory.reservation_service()),
            warehouse_inventory: Arc::new(factory.warehouse_inventory_service()),
        }
    }
}
