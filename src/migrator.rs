use anyhow::Result;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_catalog_tables::Migration),
            Box::new(m20240301_000002_create_fleet_tables::Migration),
            Box::new(m20240301_000003_create_inventory_tables::Migration),
        ]
    }
}

mod m20240301_000001_create_catalog_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Matches entities::product
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::Sku).string().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::CapacityKg).double().null())
                        .col(ColumnDef::new(Products::TareWeightKg).double().null())
                        .col(
                            ColumnDef::new(Products::IsVariant)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Products::ParentProductId).uuid().null())
                        .col(ColumnDef::new(Products::VariantName).string().null())
                        .to_owned(),
                )
                .await?;

            // Matches entities::order
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::OrderNumber).string().not_null())
                        .col(ColumnDef::new(Orders::CustomerId).uuid().null())
                        .col(ColumnDef::new(Orders::OrderType).string_len(20).not_null())
                        .col(ColumnDef::new(Orders::Status).string().not_null())
                        .col(ColumnDef::new(Orders::ScheduledDate).date().null())
                        .col(
                            ColumnDef::new(Orders::Priority)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Matches entities::order_line
            manager
                .create_table(
                    Table::create()
                        .table(OrderLines::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(OrderLines::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(OrderLines::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderLines::ProductId).uuid().not_null())
                        .col(ColumnDef::new(OrderLines::Quantity).integer().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_lines_order_id")
                        .table(OrderLines::Table)
                        .col(OrderLines::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderLines::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Products {
        Table,
        Id,
        Sku,
        Name,
        CapacityKg,
        TareWeightKg,
        IsVariant,
        ParentProductId,
        VariantName,
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        OrderNumber,
        CustomerId,
        OrderType,
        Status,
        ScheduledDate,
        Priority,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum OrderLines {
        Table,
        Id,
        OrderId,
        ProductId,
        Quantity,
    }
}

mod m20240301_000002_create_fleet_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_fleet_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Matches entities::truck
            manager
                .create_table(
                    Table::create()
                        .table(Trucks::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Trucks::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Trucks::FleetNumber).string().not_null())
                        .col(ColumnDef::new(Trucks::LicensePlate).string().null())
                        .col(ColumnDef::new(Trucks::CapacityCylinders).integer().not_null())
                        .col(ColumnDef::new(Trucks::CapacityKg).double().null())
                        .col(
                            ColumnDef::new(Trucks::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(Trucks::FuelCapacityLiters).double().null())
                        .col(ColumnDef::new(Trucks::AvgFuelConsumption).double().null())
                        .col(ColumnDef::new(Trucks::NextMaintenanceDue).date().null())
                        .col(
                            ColumnDef::new(Trucks::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Trucks::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Matches entities::truck_allocation
            manager
                .create_table(
                    Table::create()
                        .table(TruckAllocations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(TruckAllocations::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(TruckAllocations::TruckId).uuid().not_null())
                        .col(ColumnDef::new(TruckAllocations::OrderId).uuid().not_null())
                        .col(ColumnDef::new(TruckAllocations::AllocationDate).date().not_null())
                        .col(
                            ColumnDef::new(TruckAllocations::Status)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TruckAllocations::EstimatedWeightKg)
                                .double()
                                .not_null()
                                .default(0.0),
                        )
                        .col(ColumnDef::new(TruckAllocations::StopSequence).integer().null())
                        .col(
                            ColumnDef::new(TruckAllocations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TruckAllocations::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_truck_allocations_date_truck")
                        .table(TruckAllocations::Table)
                        .col(TruckAllocations::AllocationDate)
                        .col(TruckAllocations::TruckId)
                        .to_owned(),
                )
                .await?;

            // Matches entities::truck_route
            manager
                .create_table(
                    Table::create()
                        .table(TruckRoutes::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(TruckRoutes::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(TruckRoutes::TruckId).uuid().not_null())
                        .col(ColumnDef::new(TruckRoutes::RouteDate).date().not_null())
                        .col(ColumnDef::new(TruckRoutes::TotalDistanceKm).double().null())
                        .col(
                            ColumnDef::new(TruckRoutes::EstimatedDurationHours)
                                .double()
                                .null(),
                        )
                        .col(ColumnDef::new(TruckRoutes::Status).string().not_null())
                        .to_owned(),
                )
                .await?;

            // Matches entities::warehouse
            manager
                .create_table(
                    Table::create()
                        .table(Warehouses::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Warehouses::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Warehouses::Name).string().not_null())
                        .col(
                            ColumnDef::new(Warehouses::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Warehouses::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Warehouses::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(TruckRoutes::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(TruckAllocations::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Trucks::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Trucks {
        Table,
        Id,
        FleetNumber,
        LicensePlate,
        CapacityCylinders,
        CapacityKg,
        Active,
        FuelCapacityLiters,
        AvgFuelConsumption,
        NextMaintenanceDue,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum TruckAllocations {
        Table,
        Id,
        TruckId,
        OrderId,
        AllocationDate,
        Status,
        EstimatedWeightKg,
        StopSequence,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum TruckRoutes {
        Table,
        Id,
        TruckId,
        RouteDate,
        TotalDistanceKm,
        EstimatedDurationHours,
        Status,
    }

    #[derive(DeriveIden)]
    enum Warehouses {
        Table,
        Id,
        Name,
        Active,
        CreatedAt,
    }
}

mod m20240301_000003_create_inventory_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_inventory_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Matches entities::truck_inventory
            manager
                .create_table(
                    Table::create()
                        .table(TruckInventory::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(TruckInventory::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(TruckInventory::TruckId).uuid().not_null())
                        .col(ColumnDef::new(TruckInventory::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(TruckInventory::QtyFull)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(TruckInventory::QtyEmpty)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(TruckInventory::QtyReserved)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(TruckInventory::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_truck_inventory_truck_product")
                        .table(TruckInventory::Table)
                        .col(TruckInventory::TruckId)
                        .col(TruckInventory::ProductId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            // Matches entities::inventory_balance
            manager
                .create_table(
                    Table::create()
                        .table(InventoryBalance::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryBalance::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryBalance::WarehouseId).uuid().not_null())
                        .col(ColumnDef::new(InventoryBalance::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(InventoryBalance::QtyFull)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryBalance::QtyEmpty)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryBalance::QtyReserved)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryBalance::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(InventoryBalance::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_balance_warehouse_product")
                        .table(InventoryBalance::Table)
                        .col(InventoryBalance::WarehouseId)
                        .col(InventoryBalance::ProductId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryBalance::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(TruckInventory::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum TruckInventory {
        Table,
        Id,
        TruckId,
        ProductId,
        QtyFull,
        QtyEmpty,
        QtyReserved,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum InventoryBalance {
        Table,
        Id,
        WarehouseId,
        ProductId,
        QtyFull,
        QtyEmpty,
        QtyReserved,
        Version,
        UpdatedAt,
    }
}

// Database migration CLI runner
pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(4)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true);

    let db = Database::connect(opt).await?;

    info!("Running database migrations");

    match Migrator::up(&db, None).await {
        Ok(_) => {
            info!("Migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}
