//! Property-based tests for the fleet engine's capacity, loading and
//! reservation invariants.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use cylinder_fleet_api::{
    config::FleetConfig,
    entities::{product, truck, truck_allocation, truck_inventory, AllocationStatus},
    services::{
        capacity::evaluate_capacity,
        loading::{validate_loading, LoadItem},
        weight::{estimate_order_weight, CylinderLoad, OrderLineInput},
    },
    store::{FleetStore, InMemoryFleetStore},
};
use proptest::prelude::*;
use uuid::Uuid;

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
}

fn status_strategy() -> impl Strategy<Value = AllocationStatus> {
    prop_oneof![
        Just(AllocationStatus::Planned),
        Just(AllocationStatus::Loaded),
        Just(AllocationStatus::Delivered),
        Just(AllocationStatus::Cancelled),
    ]
}

fn allocation(truck_id: Uuid, kg: u32, status: AllocationStatus) -> truck_allocation::Model {
    truck_allocation::Model {
        id: Uuid::new_v4(),
        truck_id,
        order_id: Uuid::new_v4(),
        allocation_date: date(),
        status,
        estimated_weight_kg: f64::from(kg),
        stop_sequence: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[derive(Debug, Clone)]
enum ReservationOp {
    Reserve(i32),
    Release(i32),
}

fn op_strategy() -> impl Strategy<Value = ReservationOp> {
    prop_oneof![
        (1i32..15).prop_map(ReservationOp::Reserve),
        (0i32..15).prop_map(ReservationOp::Release),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

// Property: capacity figures always balance
proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn capacity_figures_balance(
        cylinders in 1i32..200,
        loads in prop::collection::vec((0u32..3000, status_strategy()), 0..12),
    ) {
        let truck = truck::Model::new_active("T-P", cylinders);
        let allocations: Vec<_> = loads
            .iter()
            .map(|(kg, status)| allocation(truck.id, *kg, *status))
            .collect();

        let cap = evaluate_capacity(&truck, date(), &allocations, None, 27.0);

        let expected: u32 = loads
            .iter()
            .filter(|(_, s)| *s != AllocationStatus::Cancelled)
            .map(|(kg, _)| kg)
            .sum();
        prop_assert_eq!(cap.allocated_weight_kg, f64::from(expected));
        prop_assert_eq!(cap.total_capacity_kg, f64::from(cylinders) * 27.0);
        let balance = cap.allocated_weight_kg + cap.available_weight_kg - cap.total_capacity_kg;
        prop_assert!(balance.abs() < 1e-6);
        prop_assert_eq!(cap.is_overallocated, cap.allocated_weight_kg > cap.total_capacity_kg);
        prop_assert!(cap.utilization_percentage >= 0.0);
        prop_assert!(cap.loaded_cylinders.is_none());
    }
}

// Property: the loading check rejects exactly the loads that overflow
proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn loading_rejects_exactly_the_overflow(
        capacity in 1i32..300,
        on_board in 0i32..150,
        adding in 0i32..300,
    ) {
        let truck = truck::Model {
            capacity_kg: Some(1.0e9),
            ..truck::Model::new_active("T-L", capacity)
        };
        let cylinder = product::Model::cylinder("LPG", "LPG", 20.0, 5.0);
        let current = vec![truck_inventory::Model::new(truck.id, cylinder.id, on_board, 0)];
        let items = [LoadItem { product_id: cylinder.id, qty_full: adding, qty_empty: 0 }];
        let catalog = HashMap::from([(cylinder.id, cylinder)]);

        let v = validate_loading(&truck, &current, &items, &catalog, &FleetConfig::default());

        let total = i64::from(on_board + adding);
        let capacity = i64::from(capacity);
        prop_assert_eq!(v.is_valid, total <= capacity);
        prop_assert_eq!(v.capacity_check.total_cylinders_after, total);
        if total > capacity {
            prop_assert_eq!(v.capacity_check.cylinder_overflow, total - capacity);
            let expected = format!("exceeded by {}", total - capacity);
            prop_assert!(v.errors.iter().any(|e| e.contains(&expected)));
        } else {
            prop_assert_eq!(v.capacity_check.cylinder_overflow, 0);
        }
    }
}

// Property: full loads weigh capacity plus tare per cylinder
proptest! {
    #[test]
    fn order_weight_is_additive(quantities in prop::collection::vec(0i32..50, 1..8)) {
        let cylinder = product::Model::cylinder("LPG", "LPG", 20.0, 5.0);
        let lines: Vec<_> = quantities
            .iter()
            .map(|q| OrderLineInput { product_id: cylinder.id, quantity: *q })
            .collect();
        let catalog = HashMap::from([(cylinder.id, cylinder)]);

        let full = estimate_order_weight(&lines, &catalog, CylinderLoad::Full);
        let empty = estimate_order_weight(&lines, &catalog, CylinderLoad::Empty);

        let count: i32 = quantities.iter().sum();
        prop_assert_eq!(full.total_weight_kg, f64::from(count) * 25.0);
        prop_assert_eq!(empty.total_weight_kg, f64::from(count) * 5.0);
        prop_assert!(full.skipped_product_ids.is_empty());
    }
}

// Property: no sequence of reservations drives a line out of bounds
proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn reservations_stay_within_full_stock(
        full in 0i32..40,
        ops in prop::collection::vec(op_strategy(), 1..30),
    ) {
        let rt = runtime();
        let store = InMemoryFleetStore::new();
        let (truck_id, product_id) = (Uuid::new_v4(), Uuid::new_v4());

        let reserved = rt.block_on(async {
            store
                .set_truck_inventory(truck_inventory::Model::new(truck_id, product_id, full, 0))
                .await;

            let mut expected = 0;
            for op in &ops {
                match op {
                    ReservationOp::Reserve(q) => {
                        let accepted = store
                            .reserve_truck_inventory(truck_id, product_id, *q)
                            .await
                            .is_ok();
                        assert_eq!(accepted, expected + q <= full);
                        if accepted {
                            expected += q;
                        }
                    }
                    ReservationOp::Release(q) => {
                        store.release_truck_reservation(truck_id, product_id, *q).await.unwrap();
                        expected = (expected - q).max(0);
                    }
                }
                let line = store
                    .get_truck_inventory_line(truck_id, product_id)
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(line.qty_reserved, expected);
            }
            expected
        });

        prop_assert!(reserved >= 0);
        prop_assert!(reserved <= full);
    }
}

// Property: releasing never goes below zero
proptest! {
    #[test]
    fn release_floors_at_zero(reserved in 0i32..50, release in 0i32..100) {
        let rt = runtime();
        let store = InMemoryFleetStore::new();
        let (truck_id, product_id) = (Uuid::new_v4(), Uuid::new_v4());

        let line = rt.block_on(async {
            let mut line = truck_inventory::Model::new(truck_id, product_id, 50, 0);
            line.qty_reserved = reserved;
            store.set_truck_inventory(line).await;
            store
                .release_truck_reservation(truck_id, product_id, release)
                .await
                .unwrap()
        });

        prop_assert_eq!(line.qty_reserved, (reserved - release).max(0));
        prop_assert_eq!(line.qty_full, 50);
    }
}
