use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Option<Uuid>,
    pub order_type: OrderType,
    pub status: String,
    pub scheduled_date: Option<NaiveDate>,
    /// Higher is more urgent.
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    #[sea_orm(string_value = "delivery")]
    Delivery,
    #[sea_orm(string_value = "refill")]
    Refill,
    #[sea_orm(string_value = "exchange")]
    Exchange,
    #[sea_orm(string_value = "pickup")]
    Pickup,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Delivery => "delivery",
            OrderType::Refill => "refill",
            OrderType::Exchange => "exchange",
            OrderType::Pickup => "pickup",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "delivery" => Some(OrderType::Delivery),
            "refill" => Some(OrderType::Refill),
            "exchange" => Some(OrderType::Exchange),
            "pickup" => Some(OrderType::Pickup),
            _ => None,
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Model {
    pub fn new(order_number: impl Into<String>, order_type: OrderType) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_number: order_number.into(),
            customer_id: None,
            order_type,
            status: "confirmed".to_string(),
            scheduled_date: None,
            priority: 0,
            created_at: Utc::now(),
        }
    }
}
