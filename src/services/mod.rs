// Planning
pub mod allocation;
pub mod capacity;
pub mod optimizer;
pub mod schedule;
pub mod weight;

// Stock movement
pub mod loading;
pub mod reservation;
pub mod transfer;
pub mod warehouse_inventory;

// Service factory for dependency injection
pub mod factory;

pub use allocation::AllocationService;
pub use capacity::CapacityService;
pub use factory::{ServiceContainer, ServiceFactory};
pub use loading::LoadingValidator;
pub use optimizer::FleetOptimizer;
pub use reservation::TruckReservationService;
pub use schedule::ScheduleService;
pub use transfer::InventoryTransferService;
pub use warehouse_inventory::WarehouseInventoryService;
pub use weight::WeightCalculator;
