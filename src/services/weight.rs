//! Order weight estimation.
//!
//! Cylinder weights come from the product catalog. Variant products carry no
//! figures of their own and borrow them from their parent product.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::entities::{order, order_line, product, OrderType};
use crate::errors::ServiceError;
use crate::store::FleetStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineInput {
    pub product_id: Uuid,
    pub quantity: i32,
}

impl From<&order_line::Model> for OrderLineInput {
    fn from(line: &order_line::Model) -> Self {
        Self {
            product_id: line.product_id,
            quantity: line.quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineWeightEstimate {
    pub product_id: Uuid,
    pub quantity: i32,
    pub estimated_weight_kg: f64,
    pub variant_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderWeight {
    pub total_weight_kg: f64,
    pub line_estimates: Vec<LineWeightEstimate>,
    /// Lines whose product is not in the catalog; they add nothing to the total.
    pub skipped_product_ids: Vec<Uuid>,
}

/// Whether an order's cylinders travel full or empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CylinderLoad {
    Full,
    Empty,
}

impl CylinderLoad {
    pub fn for_order_type(order_type: Option<OrderType>) -> Self {
        match order_type {
            Some(OrderType::Pickup) => CylinderLoad::Empty,
            _ => CylinderLoad::Full,
        }
    }
}

/// Per-cylinder figures resolved through the variant chain.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CylinderSpec {
    pub capacity_kg: f64,
    pub tare_weight_kg: f64,
}

impl CylinderSpec {
    pub fn full_weight_kg(&self) -> f64 {
        self.capacity_kg + self.tare_weight_kg
    }

    pub fn empty_weight_kg(&self) -> f64 {
        self.tare_weight_kg
    }

    pub fn weight_kg(&self, load: CylinderLoad) -> f64 {
        match load {
            CylinderLoad::Full => self.full_weight_kg(),
            CylinderLoad::Empty => self.empty_weight_kg(),
        }
    }
}

/// Truck-side stock movement implied by an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    /// Full cylinders leave the truck.
    pub full_out: bool,
    /// Empty cylinders come back onto the truck.
    pub empty_in: bool,
}

pub fn derive_stock_movement(order_type: OrderType) -> StockMovement {
    match order_type {
        OrderType::Delivery => StockMovement {
            full_out: true,
            empty_in: false,
        },
        OrderType::Pickup => StockMovement {
            full_out: false,
            empty_in: true,
        },
        OrderType::Refill | OrderType::Exchange => StockMovement {
            full_out: true,
            empty_in: true,
        },
    }
}

/// Resolves a product's cylinder figures, falling back to the parent
/// product for each figure the variant leaves unset. Missing figures count
/// as zero.
pub fn resolve_cylinder(
    product: &product::Model,
    catalog: &HashMap<Uuid, product::Model>,
) -> CylinderSpec {
    let parent = product
        .parent_product_id
        .filter(|_| product.is_variant)
        .and_then(|id| catalog.get(&id));

    let capacity_kg = product
        .capacity_kg
        .or_else(|| parent.and_then(|p| p.capacity_kg))
        .unwrap_or(0.0);
    let tare_weight_kg = product
        .tare_weight_kg
        .or_else(|| parent.and_then(|p| p.tare_weight_kg))
        .unwrap_or(0.0);

    CylinderSpec {
        capacity_kg,
        tare_weight_kg,
    }
}

/// Pure weight estimate of `lines` against an already loaded catalog.
pub fn estimate_order_weight(
    lines: &[OrderLineInput],
    catalog: &HashMap<Uuid, product::Model>,
    load: CylinderLoad,
) -> OrderWeight {
    let mut weight = OrderWeight::default();

    for line in lines {
        let Some(product) = catalog.get(&line.product_id) else {
            weight.skipped_product_ids.push(line.product_id);
            continue;
        };

        let spec = resolve_cylinder(product, catalog);
        let estimated_weight_kg = f64::from(line.quantity.max(0)) * spec.weight_kg(load);
        weight.total_weight_kg += estimated_weight_kg;
        weight.line_estimates.push(LineWeightEstimate {
            product_id: line.product_id,
            quantity: line.quantity,
            estimated_weight_kg,
            variant_name: product.variant_name.clone(),
        });
    }

    weight
}

#[derive(Clone)]
pub struct WeightCalculator {
    store: Arc<dyn FleetStore>,
}

impl WeightCalculator {
    pub fn new(store: Arc<dyn FleetStore>) -> Self {
        Self { store }
    }

    /// Fetches `product_ids` plus the parents of any variants among them.
    pub async fn load_catalog(
        &self,
        product_ids: Vec<Uuid>,
    ) -> Result<HashMap<Uuid, product::Model>, ServiceError> {
        let mut catalog: HashMap<Uuid, product::Model> = self
            .store
            .get_products(product_ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let missing_parents: Vec<Uuid> = catalog
            .values()
            .filter(|p| p.is_variant)
            .filter_map(|p| p.parent_product_id)
            .filter(|id| !catalog.contains_key(id))
            .collect();

        if !missing_parents.is_empty() {
            debug!(count = missing_parents.len(), "Resolving variant parents");
            for parent in self.store.get_products(missing_parents).await? {
                catalog.insert(parent.id, parent);
            }
        }

        Ok(catalog)
    }

    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn calculate_order_weight(
        &self,
        lines: &[OrderLineInput],
        order_type: Option<OrderType>,
    ) -> Result<OrderWeight, ServiceError> {
        if let Some(line) = lines.iter().find(|l| l.quantity < 0) {
            return Err(ServiceError::ValidationError(format!(
                "Order line for product {} has negative quantity {}",
                line.product_id, line.quantity
            )));
        }

        let mut product_ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
        product_ids.sort();
        product_ids.dedup();

        let catalog = self.load_catalog(product_ids).await?;
        let weight =
            estimate_order_weight(lines, &catalog, CylinderLoad::for_order_type(order_type));

        for product_id in &weight.skipped_product_ids {
            warn!(%product_id, "Skipping order line for unknown product");
        }
        Ok(weight)
    }

    /// Loads an order with its lines and estimates its weight.
    pub async fn weigh_order(
        &self,
        order_id: Uuid,
    ) -> Result<(order::Model, Vec<order_line::Model>, OrderWeight), ServiceError> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let lines = self.store.get_order_lines(order_id).await?;
        let inputs: Vec<OrderLineInput> = lines.iter().map(OrderLineInput::from).collect();
        let weight = self
            .calculate_order_weight(&inputs, Some(order.order_type))
            .await?;
        Ok((order, lines, weight))
    }
}
