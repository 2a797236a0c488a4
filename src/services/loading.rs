//! Loading capacity validation.
//!
//! Cylinder slots and weight are independent limits: a truck may run out of
//! slots before it reaches its weight limit and the other way round. Every
//! load must pass both before stock is moved.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::capacity::utilization_percent;
use super::weight::{resolve_cylinder, WeightCalculator};
use crate::config::FleetConfig;
use crate::entities::{product, truck, truck_inventory};
use crate::errors::ServiceError;
use crate::store::FleetStore;

/// One product line of a load or unload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadItem {
    pub product_id: Uuid,
    pub qty_full: i32,
    pub qty_empty: i32,
}

impl LoadItem {
    /// Slots the item takes; widened so request quantities cannot overflow.
    pub fn cylinders(&self) -> i64 {
        i64::from(self.qty_full) + i64::from(self.qty_empty)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacityCheck {
    pub capacity_cylinders: i64,
    pub current_cylinders: i64,
    pub cylinders_to_add: i64,
    pub total_cylinders_after: i64,
    pub cylinder_overflow: i64,
    pub capacity_kg: f64,
    pub current_weight_kg: f64,
    pub weight_to_add_kg: f64,
    pub total_weight_after_kg: f64,
    pub weight_overflow_kg: f64,
    pub cylinder_utilization_after: f64,
    pub weight_utilization_after: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadingValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub capacity_check: CapacityCheck,
}

fn line_weight(
    product_id: Uuid,
    qty_full: i32,
    qty_empty: i32,
    catalog: &HashMap<Uuid, product::Model>,
) -> Option<f64> {
    let spec = resolve_cylinder(catalog.get(&product_id)?, catalog);
    Some(
        f64::from(qty_full) * spec.full_weight_kg()
            + f64::from(qty_empty) * spec.empty_weight_kg(),
    )
}

/// Checks whether `items` fit on `truck` on top of what it already carries.
///
/// `catalog` must hold every product on board and in `items`, plus the
/// parents of any variants among them.
pub fn validate_loading(
    truck: &truck::Model,
    current: &[truck_inventory::Model],
    items: &[LoadItem],
    catalog: &HashMap<Uuid, product::Model>,
    config: &FleetConfig,
) -> LoadingValidation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let current_cylinders: i64 = current.iter().map(|l| i64::from(l.occupied_slots())).sum();
    let mut current_weight_kg = 0.0;
    for line in current {
        match line_weight(line.product_id, line.qty_full, line.qty_empty, catalog) {
            Some(kg) => current_weight_kg += kg,
            None => warnings.push(format!(
                "Product {} on board is not in the catalog; its weight is not counted",
                line.product_id
            )),
        }
    }

    let mut cylinders_to_add: i64 = 0;
    let mut weight_to_add_kg = 0.0;
    for item in items {
        if item.qty_full < 0 || item.qty_empty < 0 {
            errors.push(format!(
                "Product {} has a negative quantity ({} full, {} empty)",
                item.product_id, item.qty_full, item.qty_empty
            ));
            continue;
        }
        cylinders_to_add += item.cylinders();
        match line_weight(item.product_id, item.qty_full, item.qty_empty, catalog) {
            Some(kg) => weight_to_add_kg += kg,
            None => errors.push(format!("Product {} not found", item.product_id)),
        }
    }

    let capacity_cylinders = i64::from(truck.capacity_cylinders);
    let capacity_kg = truck.effective_capacity_kg(config.cylinder_weight_kg);
    let total_cylinders_after = current_cylinders + cylinders_to_add;
    let total_weight_after_kg = current_weight_kg + weight_to_add_kg;
    let cylinder_overflow = (total_cylinders_after - capacity_cylinders).max(0);
    let weight_overflow_kg = (total_weight_after_kg - capacity_kg).max(0.0);

    if cylinder_overflow > 0 {
        errors.push(format!(
            "Cylinder capacity exceeded by {} ({} after loading, capacity {})",
            cylinder_overflow, total_cylinders_after, capacity_cylinders
        ));
    }
    if weight_overflow_kg > 0.0 {
        errors.push(format!(
            "Weight capacity exceeded by {:.1} kg ({:.1} kg after loading, capacity {:.1} kg)",
            weight_overflow_kg, total_weight_after_kg, capacity_kg
        ));
    }

    let cylinder_utilization_after =
        utilization_percent(total_cylinders_after as f64, capacity_cylinders as f64);
    let weight_utilization_after = utilization_percent(total_weight_after_kg, capacity_kg);
    let threshold = config.utilization_warning_percent;

    if cylinder_overflow == 0 && cylinder_utilization_after > threshold {
        warnings.push(format!(
            "Cylinder utilization will be {:.1}% after loading",
            cylinder_utilization_after
        ));
    }
    if weight_overflow_kg == 0.0 && weight_utilization_after > threshold {
        warnings.push(format!(
            "Weight utilization will be {:.1}% after loading",
            weight_utilization_after
        ));
    }

    LoadingValidation {
        is_valid: errors.is_empty(),
        errors,
        warnings,
        capacity_check: CapacityCheck {
            capacity_cylinders,
            current_cylinders,
            cylinders_to_add,
            total_cylinders_after,
            cylinder_overflow,
            capacity_kg,
            current_weight_kg,
            weight_to_add_kg,
            total_weight_after_kg,
            weight_overflow_kg,
            cylinder_utilization_after,
            weight_utilization_after,
        },
    }
}

#[derive(Clone)]
pub struct LoadingValidator {
    store: Arc<dyn FleetStore>,
    weights: WeightCalculator,
    config: FleetConfig,
}

impl LoadingValidator {
    pub fn new(store: Arc<dyn FleetStore>, config: FleetConfig) -> Self {
        Self {
            weights: WeightCalculator::new(store.clone()),
            store,
            config,
        }
    }

    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn validate_loading_capacity(
        &self,
        truck_id: Uuid,
        items: &[LoadItem],
    ) -> Result<LoadingValidation, ServiceError> {
        let truck = self
            .store
            .get_truck(truck_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Truck {} not found", truck_id)))?;
        self.validate_for(&truck, items).await
    }

    pub(crate) async fn validate_for(
        &self,
        truck: &truck::Model,
        items: &[LoadItem],
    ) -> Result<LoadingValidation, ServiceError> {
        let current = self.store.get_truck_inventory(truck.id).await?;

        let mut product_ids: Vec<Uuid> = current
            .iter()
            .map(|l| l.product_id)
            .chain(items.iter().map(|i| i.product_id))
            .collect();
        product_ids.sort();
        product_ids.dedup();
        let catalog = self.weights.load_catalog(product_ids).await?;

        let validation = validate_loading(truck, &current, items, &catalog, &self.config);
        if !validation.is_valid {
            info!(
                truck_id = %truck.id,
                cylinder_overflow = validation.capacity_check.cylinder_overflow,
                weight_overflow_kg = validation.capacity_check.weight_overflow_kg,
                "Load rejected by capacity check"
            );
        }
        Ok(validation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn fixture() -> (truck::Model, product::Model, HashMap<Uuid, product::Model>) {
        let truck = truck::Model::new_active("T-20", 100);
        let cylinder = product::Model::cylinder("LPG-20", "20kg LPG", 20.0, 5.0);
        let catalog = HashMap::from([(cylinder.id, cylinder.clone())]);
        (truck, cylinder, catalog)
    }

    #[rstest]
    #[case::fits(50, 0, true, 0, 0.0)]
    #[case::exactly_full_slots(100, 0, true, 0, 0.0)]
    #[case::slot_overflow(150, 0, false, 50, 1050.0)]
    #[case::quantities_beyond_i32(
        i32::MAX,
        1,
        false,
        i64::from(i32::MAX) + 1 - 100,
        f64::from(i32::MAX) * 25.0 + 5.0 - 2700.0
    )]
    fn cylinder_loads(
        #[case] qty_full: i32,
        #[case] qty_empty: i32,
        #[case] valid: bool,
        #[case] cylinder_overflow: i64,
        #[case] weight_overflow_kg: f64,
    ) {
        let (truck, cylinder, catalog) = fixture();
        let items = [LoadItem {
            product_id: cylinder.id,
            qty_full,
            qty_empty,
        }];

        let v = validate_loading(&truck, &[], &items, &catalog, &FleetConfig::default());
        assert_eq!(v.is_valid, valid);
        assert_eq!(v.capacity_check.cylinder_overflow, cylinder_overflow);
        assert_eq!(v.capacity_check.weight_overflow_kg, weight_overflow_kg);
        assert_eq!(
            v.capacity_check.weight_to_add_kg,
            f64::from(qty_full) * 25.0 + f64::from(qty_empty) * 5.0
        );
    }

    #[test]
    fn overflow_message_names_exact_amount() {
        let (truck, cylinder, catalog) = fixture();
        let current = [truck_inventory::Model::new(truck.id, cylinder.id, 0, 90)];
        let items = [LoadItem {
            product_id: cylinder.id,
            qty_full: 0,
            qty_empty: 13,
        }];

        let v = validate_loading(&truck, &current, &items, &catalog, &FleetConfig::default());
        assert!(!v.is_valid);
        assert_eq!(v.capacity_check.current_cylinders, 90);
        assert_eq!(v.capacity_check.cylinder_overflow, 3);
        assert!(v.errors[0].contains("exceeded by 3"));
    }

    #[test]
    fn weight_limit_binds_before_slots() {
        let (mut truck, cylinder, catalog) = fixture();
        truck.capacity_kg = Some(1000.0);
        let items = [LoadItem {
            product_id: cylinder.id,
            qty_full: 45,
            qty_empty: 0,
        }];

        let v = validate_loading(&truck, &[], &items, &catalog, &FleetConfig::default());
        assert!(!v.is_valid);
        assert_eq!(v.capacity_check.cylinder_overflow, 0);
        assert_eq!(v.capacity_check.weight_overflow_kg, 125.0);
    }

    #[test]
    fn high_utilization_warns() {
        let (truck, cylinder, catalog) = fixture();
        let items = [LoadItem {
            product_id: cylinder.id,
            qty_full: 0,
            qty_empty: 95,
        }];

        let v = validate_loading(&truck, &[], &items, &catalog, &FleetConfig::default());
        assert!(v.is_valid);
        assert_eq!(v.warnings.len(), 1);
        assert!(v.warnings[0].starts_with("Cylinder utilization"));
    }

    #[test]
    fn unknown_product_is_rejected() {
        let (truck, _, catalog) = fixture();
        let items = [LoadItem {
            product_id: Uuid::new_v4(),
            qty_full: 1,
            qty_empty: 0,
        }];

        let v = validate_loading(&truck, &[], &items, &catalog, &FleetConfig::default());
        assert!(!v.is_valid);
        assert!(v.errors[0].ends_with("not found"));
    }
}
