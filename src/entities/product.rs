use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Cylinder product. Variants are aliases of a parent product and may leave
/// the physical attributes to the parent.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    /// Gas content of a full cylinder.
    pub capacity_kg: Option<f64>,
    /// Weight of the empty cylinder.
    pub tare_weight_kg: Option<f64>,
    pub is_variant: bool,
    pub parent_product_id: Option<Uuid>,
    pub variant_name: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn cylinder(
        sku: impl Into<String>,
        name: impl Into<String>,
        capacity_kg: f64,
        tare_weight_kg: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sku: sku.into(),
            name: name.into(),
            capacity_kg: Some(capacity_kg),
            tare_weight_kg: Some(tare_weight_kg),
            is_variant: false,
            parent_product_id: None,
            variant_name: None,
        }
    }

    /// A variant alias that inherits capacity and tare from `parent`.
    pub fn variant_of(
        parent: &Model,
        sku: impl Into<String>,
        variant_name: impl Into<String>,
    ) -> Self {
        let variant_name = variant_name.into();
        Self {
            id: Uuid::new_v4(),
            sku: sku.into(),
            name: format!("{} ({})", parent.name, variant_name),
            capacity_kg: None,
            tare_weight_kg: None,
            is_variant: true,
            parent_product_id: Some(parent.id),
            variant_name: Some(variant_name),
        }
    }
}
