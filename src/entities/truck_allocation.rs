use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "truck_allocations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub truck_id: Uuid,
    pub order_id: Uuid,
    pub allocation_date: NaiveDate,
    pub status: AllocationStatus,
    pub estimated_weight_kg: f64,
    pub stop_sequence: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    #[sea_orm(string_value = "planned")]
    Planned,
    #[sea_orm(string_value = "loaded")]
    Loaded,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl AllocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStatus::Planned => "planned",
            AllocationStatus::Loaded => "loaded",
            AllocationStatus::Delivered => "delivered",
            AllocationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AllocationStatus::Delivered | AllocationStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: AllocationStatus) -> bool {
        use AllocationStatus::*;
        matches!(
            (self, next),
            (Planned, Loaded) | (Planned, Delivered) | (Planned, Cancelled)
                | (Loaded, Delivered)
                | (Loaded, Cancelled)
        )
    }
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Model {
    /// Allocations that still hold capacity on their truck.
    pub fn counts_against_capacity(&self) -> bool {
        self.status != AllocationStatus::Cancelled
    }
}
