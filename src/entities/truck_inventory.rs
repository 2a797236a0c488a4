use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Cylinders of one product currently on one truck.
///
/// `qty_reserved` never exceeds `qty_full` and no quantity is negative; the
/// stores only mutate these rows through conditional updates that keep that
/// true.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "truck_inventory")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub truck_id: Uuid,
    pub product_id: Uuid,
    pub qty_full: i32,
    pub qty_empty: i32,
    pub qty_reserved: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn new(truck_id: Uuid, product_id: Uuid, qty_full: i32, qty_empty: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            truck_id,
            product_id,
            qty_full,
            qty_empty,
            qty_reserved: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn qty_available(&self) -> i32 {
        self.qty_full - self.qty_reserved
    }

    /// Physical slots taken on the truck, full and empty alike.
    pub fn occupied_slots(&self) -> i32 {
        self.qty_full + self.qty_empty
    }
}
