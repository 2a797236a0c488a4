//! Row types of the fleet engine. Each module is a sea-orm entity; the
//! `Model` structs double as the domain records the services work with.

pub mod inventory_balance;
pub mod order;
pub mod order_line;
pub mod product;
pub mod truck;
pub mod truck_allocation;
pub mod truck_inventory;
pub mod truck_route;
pub mod warehouse;

pub use inventory_balance::Model as InventoryBalanceModel;
pub use order::{Model as OrderModel, OrderType};
pub use order_line::Model as OrderLineModel;
pub use product::Model as ProductModel;
pub use truck::{Model as TruckModel, TruckStatus};
pub use truck_allocation::{AllocationStatus, Model as TruckAllocationModel};
pub use truck_inventory::Model as TruckInventoryModel;
pub use truck_route::Model as TruckRouteModel;
pub use warehouse::Model as WarehouseModel;
