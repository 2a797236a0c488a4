use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, QueryFilter, QueryOrder, TransactionError, TransactionTrait,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{FleetStore, StockTransfer, TruckStockAdjustment};
use crate::config::AppConfig;
use crate::entities::{
    inventory_balance, order, order_line, product, truck, truck_allocation, truck_inventory,
    truck_route, warehouse, AllocationStatus,
};
use crate::errors::ServiceError;

/// Compare-and-swap rounds for multi-column truck line updates before the
/// line is reported as contended.
const CAS_ATTEMPTS: u32 = 5;

/// [`FleetStore`] backed by the relational database.
///
/// Counter mutations are single conditional `UPDATE` statements (or a
/// compare-and-swap on the previously read values), and each transfer runs in
/// one database transaction. Every call is bounded by the configured store
/// timeout.
#[derive(Debug, Clone)]
pub struct SeaOrmFleetStore {
    db: Arc<DatabaseConnection>,
    timeout: Duration,
}

impl SeaOrmFleetStore {
    pub fn new(db: Arc<DatabaseConnection>, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    pub fn from_config(db: Arc<DatabaseConnection>, config: &AppConfig) -> Self {
        Self::new(db, config.store_timeout())
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                let ms = self.timeout.as_millis() as u64;
                warn!(operation, timeout_ms = ms, "Store call timed out");
                Err(ServiceError::Timeout(ms))
            }
        }
    }

    pub async fn insert_truck(&self, model: truck::Model) -> Result<(), ServiceError> {
        truck::Entity::insert(model.into_active_model())
            .exec_without_returning(self.connection())
            .await?;
        Ok(())
    }

    pub async fn insert_warehouse(&self, model: warehouse::Model) -> Result<(), ServiceError> {
        warehouse::Entity::insert(model.into_active_model())
            .exec_without_returning(self.connection())
            .await?;
        Ok(())
    }

    pub async fn insert_product(&self, model: product::Model) -> Result<(), ServiceError> {
        product::Entity::insert(model.into_active_model())
            .exec_without_returning(self.connection())
            .await?;
        Ok(())
    }

    pub async fn insert_order(
        &self,
        model: order::Model,
        lines: Vec<order_line::Model>,
    ) -> Result<(), ServiceError> {
        order::Entity::insert(model.into_active_model())
            .exec_without_returning(self.connection())
            .await?;
        if !lines.is_empty() {
            order_line::Entity::insert_many(lines.into_iter().map(|l| l.into_active_model()))
                .exec_without_returning(self.connection())
                .await?;
        }
        Ok(())
    }

    pub async fn insert_route(&self, model: truck_route::Model) -> Result<(), ServiceError> {
        truck_route::Entity::insert(model.into_active_model())
            .exec_without_returning(self.connection())
            .await?;
        Ok(())
    }

    pub async fn insert_truck_inventory(
        &self,
        model: truck_inventory::Model,
    ) -> Result<(), ServiceError> {
        truck_inventory::Entity::insert(model.into_active_model())
            .exec_without_returning(self.connection())
            .await?;
        Ok(())
    }

    pub async fn insert_warehouse_balance(
        &self,
        model: inventory_balance::Model,
    ) -> Result<(), ServiceError> {
        inventory_balance::Entity::insert(model.into_active_model())
            .exec_without_returning(self.connection())
            .await?;
        Ok(())
    }
}

fn flatten_transaction_error(e: TransactionError<ServiceError>) -> ServiceError {
    match e {
        TransactionError::Connection(e) => ServiceError::db_error(e),
        TransactionError::Transaction(e) => e,
    }
}

async fn find_line<C: ConnectionTrait>(
    db: &C,
    truck_id: Uuid,
    product_id: Uuid,
) -> Result<Option<truck_inventory::Model>, ServiceError> {
    Ok(truck_inventory::Entity::find()
        .filter(truck_inventory::Column::TruckId.eq(truck_id))
        .filter(truck_inventory::Column::ProductId.eq(product_id))
        .one(db)
        .await?)
}

async fn find_balance<C: ConnectionTrait>(
    db: &C,
    warehouse_id: Uuid,
    product_id: Uuid,
) -> Result<Option<inventory_balance::Model>, ServiceError> {
    Ok(inventory_balance::Entity::find()
        .filter(inventory_balance::Column::WarehouseId.eq(warehouse_id))
        .filter(inventory_balance::Column::ProductId.eq(product_id))
        .one(db)
        .await?)
}

fn shortfall(what: &str, have: i32, want: i32, product_id: Uuid) -> ServiceError {
    ServiceError::InsufficientStock(format!(
        "{} has {} of product {} available, {} requested",
        what, have, product_id, want
    ))
}

/// Rewrites the counters of a truck line only if they still hold the values
/// they were computed from. Returns `None` when the line does not exist.
async fn cas_truck_line<C, F>(
    db: &C,
    truck_id: Uuid,
    product_id: Uuid,
    compute: F,
) -> Result<Option<truck_inventory::Model>, ServiceError>
where
    C: ConnectionTrait,
    F: Fn(&truck_inventory::Model) -> Result<(i32, i32, i32), ServiceError>,
{
    use truck_inventory::Column;

    let mut last_id = Uuid::nil();
    for attempt in 1..=CAS_ATTEMPTS {
        let Some(line) = find_line(db, truck_id, product_id).await? else {
            return Ok(None);
        };
        last_id = line.id;
        let (full, empty, reserved) = compute(&line)?;
        let now = Utc::now();

        let res = truck_inventory::Entity::update_many()
            .col_expr(Column::QtyFull, Expr::value(full))
            .col_expr(Column::QtyEmpty, Expr::value(empty))
            .col_expr(Column::QtyReserved, Expr::value(reserved))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(line.id))
            .filter(Column::QtyFull.eq(line.qty_full))
            .filter(Column::QtyEmpty.eq(line.qty_empty))
            .filter(Column::QtyReserved.eq(line.qty_reserved))
            .exec(db)
            .await?;

        if res.rows_affected == 1 {
            return Ok(Some(truck_inventory::Model {
                qty_full: full,
                qty_empty: empty,
                qty_reserved: reserved,
                updated_at: now,
                ..line
            }));
        }
        debug!(%truck_id, %product_id, attempt, "Truck line changed underneath, re-reading");
    }

    Err(ServiceError::ConcurrentModification(last_id))
}

async fn debit_warehouse<C: ConnectionTrait>(
    db: &C,
    t: &StockTransfer,
) -> Result<(), ServiceError> {
    use inventory_balance::Column;

    let res = inventory_balance::Entity::update_many()
        .col_expr(Column::QtyFull, Expr::col(Column::QtyFull).sub(t.qty_full))
        .col_expr(Column::QtyEmpty, Expr::col(Column::QtyEmpty).sub(t.qty_empty))
        .col_expr(Column::Version, Expr::col(Column::Version).add(1))
        .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(Column::WarehouseId.eq(t.warehouse_id))
        .filter(Column::ProductId.eq(t.product_id))
        .filter(
            Expr::expr(Expr::col(Column::QtyFull).sub(Expr::col(Column::QtyReserved)))
                .gte(t.qty_full),
        )
        .filter(Column::QtyEmpty.gte(t.qty_empty))
        .exec(db)
        .await?;

    if res.rows_affected == 0 {
        return Err(match find_balance(db, t.warehouse_id, t.product_id).await? {
            None => shortfall("Warehouse", 0, t.qty_full, t.product_id),
            Some(b) if b.qty_available() < t.qty_full => {
                shortfall("Warehouse", b.qty_available(), t.qty_full, t.product_id)
            }
            Some(b) => shortfall("Warehouse (empties)", b.qty_empty, t.qty_empty, t.product_id),
        });
    }
    Ok(())
}

async fn credit_warehouse<C: ConnectionTrait>(
    db: &C,
    t: &StockTransfer,
) -> Result<(), ServiceError> {
    use inventory_balance::Column;

    let res = inventory_balance::Entity::update_many()
        .col_expr(Column::QtyFull, Expr::col(Column::QtyFull).add(t.qty_full))
        .col_expr(Column::QtyEmpty, Expr::col(Column::QtyEmpty).add(t.qty_empty))
        .col_expr(Column::Version, Expr::col(Column::Version).add(1))
        .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(Column::WarehouseId.eq(t.warehouse_id))
        .filter(Column::ProductId.eq(t.product_id))
        .exec(db)
        .await?;

    if res.rows_affected == 0 {
        let balance =
            inventory_balance::Model::new(t.warehouse_id, t.product_id, t.qty_full, t.qty_empty);
        inventory_balance::Entity::insert(balance.into_active_model())
            .exec_without_returning(db)
            .await?;
    }
    Ok(())
}

async fn debit_truck<C: ConnectionTrait>(db: &C, t: &StockTransfer) -> Result<(), ServiceError> {
    use truck_inventory::Column;

    let res = truck_inventory::Entity::update_many()
        .col_expr(Column::QtyFull, Expr::col(Column::QtyFull).sub(t.qty_full))
        .col_expr(Column::QtyEmpty, Expr::col(Column::QtyEmpty).sub(t.qty_empty))
        .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(Column::TruckId.eq(t.truck_id))
        .filter(Column::ProductId.eq(t.product_id))
        .filter(
            Expr::expr(Expr::col(Column::QtyFull).sub(Expr::col(Column::QtyReserved)))
                .gte(t.qty_full),
        )
        .filter(Column::QtyEmpty.gte(t.qty_empty))
        .exec(db)
        .await?;

    if res.rows_affected == 0 {
        return Err(match find_line(db, t.truck_id, t.product_id).await? {
            None => shortfall("Truck", 0, t.qty_full, t.product_id),
            Some(l) if l.qty_available() < t.qty_full => {
                shortfall("Truck", l.qty_available(), t.qty_full, t.product_id)
            }
            Some(l) => shortfall("Truck (empties)", l.qty_empty, t.qty_empty, t.product_id),
        });
    }
    Ok(())
}

async fn credit_truck<C: ConnectionTrait>(db: &C, t: &StockTransfer) -> Result<(), ServiceError> {
    use truck_inventory::Column;

    let res = truck_inventory::Entity::update_many()
        .col_expr(Column::QtyFull, Expr::col(Column::QtyFull).add(t.qty_full))
        .col_expr(Column::QtyEmpty, Expr::col(Column::QtyEmpty).add(t.qty_empty))
        .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(Column::TruckId.eq(t.truck_id))
        .filter(Column::ProductId.eq(t.product_id))
        .exec(db)
        .await?;

    if res.rows_affected == 0 {
        let line = truck_inventory::Model::new(t.truck_id, t.product_id, t.qty_full, t.qty_empty);
        truck_inventory::Entity::insert(line.into_active_model())
            .exec_without_returning(db)
            .await?;
    }
    Ok(())
}

#[async_trait]
impl FleetStore for SeaOrmFleetStore {
    async fn get_truck(&self, truck_id: Uuid) -> Result<Option<truck::Model>, ServiceError> {
        self.bounded("get_truck", async {
            Ok(truck::Entity::find_by_id(truck_id).one(self.connection()).await?)
        })
        .await
    }

    async fn list_trucks(&self, active_only: bool) -> Result<Vec<truck::Model>, ServiceError> {
        self.bounded("list_trucks", async {
            let mut query = truck::Entity::find();
            if active_only {
                query = query.filter(truck::Column::Active.eq(true));
            }
            Ok(query
                .order_by_asc(truck::Column::FleetNumber)
                .order_by_asc(truck::Column::Id)
                .all(self.connection())
                .await?)
        })
        .await
    }

    async fn get_warehouse(
        &self,
        warehouse_id: Uuid,
    ) -> Result<Option<warehouse::Model>, ServiceError> {
        self.bounded("get_warehouse", async {
            Ok(warehouse::Entity::find_by_id(warehouse_id)
                .one(self.connection())
                .await?)
        })
        .await
    }

    async fn get_products(&self, ids: Vec<Uuid>) -> Result<Vec<product::Model>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.bounded("get_products", async {
            Ok(product::Entity::find()
                .filter(product::Column::Id.is_in(ids))
                .all(self.connection())
                .await?)
        })
        .await
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        self.bounded("get_order", async {
            Ok(order::Entity::find_by_id(order_id)
                .one(self.connection())
                .await?)
        })
        .await
    }

    async fn get_order_lines(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_line::Model>, ServiceError> {
        self.bounded("get_order_lines", async {
            Ok(order_line::Entity::find()
                .filter(order_line::Column::OrderId.eq(order_id))
                .all(self.connection())
                .await?)
        })
        .await
    }

    async fn list_allocations(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<truck_allocation::Model>, ServiceError> {
        self.bounded("list_allocations", async {
            Ok(truck_allocation::Entity::find()
                .filter(truck_allocation::Column::AllocationDate.eq(date))
                .order_by_asc(truck_allocation::Column::CreatedAt)
                .all(self.connection())
                .await?)
        })
        .await
    }

    async fn get_allocation(
        &self,
        allocation_id: Uuid,
    ) -> Result<Option<truck_allocation::Model>, ServiceError> {
        self.bounded("get_allocation", async {
            Ok(truck_allocation::Entity::find_by_id(allocation_id)
                .one(self.connection())
                .await?)
        })
        .await
    }

    async fn find_allocation_for_order(
        &self,
        order_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<truck_allocation::Model>, ServiceError> {
        self.bounded("find_allocation_for_order", async {
            Ok(truck_allocation::Entity::find()
                .filter(truck_allocation::Column::OrderId.eq(order_id))
                .filter(truck_allocation::Column::AllocationDate.eq(date))
                .filter(truck_allocation::Column::Status.ne(AllocationStatus::Cancelled))
                .one(self.connection())
                .await?)
        })
        .await
    }

    async fn insert_allocation(
        &self,
        allocation: truck_allocation::Model,
    ) -> Result<truck_allocation::Model, ServiceError> {
        self.bounded("insert_allocation", async {
            truck_allocation::Entity::insert(allocation.clone().into_active_model())
                .exec_without_returning(self.connection())
                .await?;
            Ok(allocation)
        })
        .await
    }

    async fn update_allocation_status(
        &self,
        allocation_id: Uuid,
        expected: AllocationStatus,
        next: AllocationStatus,
    ) -> Result<truck_allocation::Model, ServiceError> {
        use truck_allocation::Column;

        self.bounded("update_allocation_status", async {
            let db = self.connection();
            let res = truck_allocation::Entity::update_many()
                .col_expr(Column::Status, Expr::value(next))
                .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(Column::Id.eq(allocation_id))
                .filter(Column::Status.eq(expected))
                .exec(db)
                .await?;

            let current = truck_allocation::Entity::find_by_id(allocation_id)
                .one(db)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Allocation {} not found", allocation_id))
                })?;

            if res.rows_affected == 0 {
                return Err(ServiceError::ConcurrentModification(allocation_id));
            }
            Ok(current)
        })
        .await
    }

    async fn delete_allocation(&self, allocation_id: Uuid) -> Result<(), ServiceError> {
        self.bounded("delete_allocation", async {
            let res = truck_allocation::Entity::delete_by_id(allocation_id)
                .exec(self.connection())
                .await?;
            if res.rows_affected == 0 {
                return Err(ServiceError::NotFound(format!(
                    "Allocation {} not found",
                    allocation_id
                )));
            }
            Ok(())
        })
        .await
    }

    async fn list_routes(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<truck_route::Model>, ServiceError> {
        self.bounded("list_routes", async {
            Ok(truck_route::Entity::find()
                .filter(truck_route::Column::RouteDate.eq(date))
                .all(self.connection())
                .await?)
        })
        .await
    }

    async fn get_truck_inventory(
        &self,
        truck_id: Uuid,
    ) -> Result<Vec<truck_inventory::Model>, ServiceError> {
        self.bounded("get_truck_inventory", async {
            Ok(truck_inventory::Entity::find()
                .filter(truck_inventory::Column::TruckId.eq(truck_id))
                .order_by_asc(truck_inventory::Column::ProductId)
                .all(self.connection())
                .await?)
        })
        .await
    }

    async fn get_truck_inventory_line(
        &self,
        truck_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<truck_inventory::Model>, ServiceError> {
        self.bounded("get_truck_inventory_line", async {
            find_line(self.connection(), truck_id, product_id).await
        })
        .await
    }

    async fn reserve_truck_inventory(
        &self,
        truck_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<truck_inventory::Model, ServiceError> {
        use truck_inventory::Column;

        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Reservation quantity must be positive".to_string(),
            ));
        }

        self.bounded("reserve_truck_inventory", async {
            let db = self.connection();
            let res = truck_inventory::Entity::update_many()
                .col_expr(Column::QtyReserved, Expr::col(Column::QtyReserved).add(quantity))
                .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(Column::TruckId.eq(truck_id))
                .filter(Column::ProductId.eq(product_id))
                .filter(
                    Expr::expr(Expr::col(Column::QtyFull).sub(Expr::col(Column::QtyReserved)))
                        .gte(quantity),
                )
                .exec(db)
                .await?;

            let line = find_line(db, truck_id, product_id).await?;
            if res.rows_affected == 0 {
                let available = line.map(|l| l.qty_available()).unwrap_or(0);
                return Err(shortfall("Truck", available, quantity, product_id));
            }
            line.ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Truck line for product {} vanished after reservation",
                    product_id
                ))
            })
        })
        .await
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

        self.bounded("release_truck_reservation", async {
            cas_truck_line(self.connection(), truck_id, product_id, |line| {
                Ok((
                    line.qty_full,
                    line.qty_empty,
                    (line.qty_reserved - quantity).max(0),
                ))
            })
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No inventory of product {} on truck {}",
                    product_id, truck_id
                ))
            })
        })
        .await
    }

    async fn adjust_truck_stock(
        &self,
        truck_id: Uuid,
        product_id: Uuid,
        adjustment: TruckStockAdjustment,
    ) -> Result<truck_inventory::Model, ServiceError> {
        self.bounded("adjust_truck_stock", async {
            let db = self.connection();
            if let Some(line) =
                cas_truck_line(db, truck_id, product_id, |line| adjustment.apply(line)).await?
            {
                return Ok(line);
            }

            let blank = truck_inventory::Model::new(truck_id, product_id, 0, 0);
            let (full, empty, _) = adjustment.apply(&blank)?;
            let line = truck_inventory::Model::new(truck_id, product_id, full, empty);
            truck_inventory::Entity::insert(line.clone().into_active_model())
                .exec_without_returning(db)
                .await?;
            Ok(line)
        })
        .await
    }

    async fn transfer_stock_to_truck(&self, transfer: StockTransfer) -> Result<(), ServiceError> {
        transfer.validate()?;
        self.bounded("transfer_stock_to_truck", async {
            self.db
                .transaction::<_, (), ServiceError>(move |txn| {
                    Box::pin(async move {
                        debit_warehouse(txn, &transfer).await?;
                        credit_truck(txn, &transfer).await
                    })
                })
                .await
                .map_err(flatten_transaction_error)
        })
        .await
    }

    async fn transfer_stock_from_truck(
        &self,
        transfer: StockTransfer,
    ) -> Result<(), ServiceError> {
        transfer.validate()?;
        self.bounded("transfer_stock_from_truck", async {
            self.db
                .transaction::<_, (), ServiceError>(move |txn| {
                    Box::pin(async move {
                        debit_truck(txn, &transfer).await?;
                        credit_warehouse(txn, &transfer).await
                    })
                })
                .await
                .map_err(flatten_transaction_error)
        })
        .await
    }

    async fn get_warehouse_balance(
        &self,
        warehouse_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<inventory_balance::Model>, ServiceError> {
        self.bounded("get_warehouse_balance", async {
            find_balance(self.connection(), warehouse_id, product_id).await
        })
        .await
    }

    async fn write_warehouse_balance(
        &self,
        expected_version: i32,
        balance: inventory_balance::Model,
    ) -> Result<inventory_balance::Model, ServiceError> {
        use inventory_balance::Column;

        self.bounded("write_warehouse_balance", async {
            let db = self.connection();
            let now = Utc::now();
            let res = inventory_balance::Entity::update_many()
                .col_expr(Column::QtyFull, Expr::value(balance.qty_full))
                .col_expr(Column::QtyEmpty, Expr::value(balance.qty_empty))
                .col_expr(Column::QtyReserved, Expr::value(balance.qty_reserved))
                .col_expr(Column::Version, Expr::value(expected_version + 1))
                .col_expr(Column::UpdatedAt, Expr::value(now))
                .filter(Column::WarehouseId.eq(balance.warehouse_id))
                .filter(Column::ProductId.eq(balance.product_id))
                .filter(Column::Version.eq(expected_version))
                .exec(db)
                .await?;

            if res.rows_affected == 0 {
                return Err(
                    match find_balance(db, balance.warehouse_id, balance.product_id).await? {
                        Some(stored) => ServiceError::ConcurrentModification(stored.id),
                        None => ServiceError::NotFound(format!(
                            "No balance for product {} in warehouse {}",
                            balance.product_id, balance.warehouse_id
                        )),
                    },
                );
            }

            Ok(inventory_balance::Model {
                version: expected_version + 1,
                updated_at: now,
                ..balance
            })
        })
        .await
    }
}
