use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Stock of one product held in one warehouse.
///
/// `version` is bumped on every write and is the compare token for
/// optimistic updates; `updated_at` records when that happened.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_balance")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub warehouse_id: Uuid,
    pub product_id: Uuid,
    pub qty_full: i32,
    pub qty_empty: i32,
    pub qty_reserved: i32,
    pub version: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn new(warehouse_id: Uuid, product_id: Uuid, qty_full: i32, qty_empty: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            warehouse_id,
            product_id,
            qty_full,
            qty_empty,
            qty_reserved: 0,
            version: 1,
            updated_at: Utc::now(),
        }
    }

    pub fn qty_available(&self) -> i32 {
        self.qty_full - self.qty_reserved
    }
}
