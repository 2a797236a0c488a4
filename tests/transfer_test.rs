mod common;

use assert_matches::assert_matches;
use common::{test_config, TestFleet};
use cylinder_fleet_api::{
    config::FleetConfig,
    entities::TruckStatus,
    errors::ServiceError,
    events::Event,
    services::{loading::LoadItem, transfer::CompensationPolicy},
};
use uuid::Uuid;

fn item(product_id: Uuid, qty_full: i32, qty_empty: i32) -> LoadItem {
    LoadItem {
        product_id,
        qty_full,
        qty_empty,
    }
}

#[tokio::test]
async fn load_then_unload_restores_both_sides() {
    let mut fleet = TestFleet::new();
    let truck = fleet.truck("T-40", 20).await;
    let depot = fleet.warehouse("North Depot").await;
    let cylinder = fleet.cylinder("LPG-20").await;
    fleet.stock_warehouse(depot.id, cylinder.id, 30, 10).await;

    let loaded = fleet
        .services
        .transfers
        .load_inventory(truck.id, depot.id, &[item(cylinder.id, 10, 4)])
        .await
        .unwrap();
    assert!(loaded.success);
    assert_eq!(loaded.items_transferred, 1);
    assert!(loaded.verification.verified);
    assert_eq!(loaded.capacity_check.total_cylinders_after, 14);

    let line = fleet.truck_line(truck.id, cylinder.id).await.unwrap();
    assert_eq!((line.qty_full, line.qty_empty), (10, 4));
    let balance = fleet.warehouse_line(depot.id, cylinder.id).await.unwrap();
    assert_eq!((balance.qty_full, balance.qty_empty), (20, 6));

    let unloaded = fleet
        .services
        .transfers
        .unload_inventory(truck.id, depot.id, &[item(cylinder.id, 10, 4)])
        .await
        .unwrap();
    assert!(unloaded.verification.verified);

    let line = fleet.truck_line(truck.id, cylinder.id).await.unwrap();
    assert_eq!((line.qty_full, line.qty_empty), (0, 0));
    let balance = fleet.warehouse_line(depot.id, cylinder.id).await.unwrap();
    assert_eq!((balance.qty_full, balance.qty_empty), (30, 10));

    let events = fleet.drain_events();
    assert_matches!(events[0], Event::TruckLoaded { items_transferred: 1, .. });
    assert_matches!(events[1], Event::TruckUnloaded { items_transferred: 1, .. });
}

#[tokio::test]
async fn overflowing_load_moves_nothing() {
    let fleet = TestFleet::new();
    let truck = fleet.truck("T-41", 100).await;
    let depot = fleet.warehouse("South Depot").await;
    let cylinder = fleet.cylinder("LPG-20").await;
    fleet.stock_truck(truck.id, cylinder.id, 50, 0, 0).await;
    fleet.stock_warehouse(depot.id, cylinder.id, 100, 0).await;

    let err = fleet
        .services
        .transfers
        .load_inventory(truck.id, depot.id, &[item(cylinder.id, 60, 0)])
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::CapacityExceeded(msg) if msg.contains("exceeded by 10"));

    assert_eq!(fleet.truck_line(truck.id, cylinder.id).await.unwrap().qty_full, 50);
    assert_eq!(fleet.warehouse_line(depot.id, cylinder.id).await.unwrap().qty_full, 100);
}

#[tokio::test]
async fn manual_policy_leaves_completed_items_in_place() {
    let fleet = TestFleet::new();
    let truck = fleet.truck("T-42", 50).await;
    let depot = fleet.warehouse("East Depot").await;
    let stocked = fleet.cylinder("LPG-20").await;
    let short = fleet.cylinder("LPG-20-B").await;
    fleet.stock_warehouse(depot.id, stocked.id, 10, 0).await;
    fleet.stock_warehouse(depot.id, short.id, 2, 0).await;

    let err = fleet
        .services
        .transfers
        .load_inventory(
            truck.id,
            depot.id,
            &[item(stocked.id, 5, 0), item(short.id, 5, 0)],
        )
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::PartialTransfer {
            failed_index: 1,
            completed: 1,
            compensated: false,
            ..
        }
    );

    assert_eq!(fleet.truck_line(truck.id, stocked.id).await.unwrap().qty_full, 5);
    assert_eq!(fleet.warehouse_line(depot.id, stocked.id).await.unwrap().qty_full, 5);
    assert_eq!(fleet.warehouse_line(depot.id, short.id).await.unwrap().qty_full, 2);
}

#[tokio::test]
async fn reverse_policy_moves_completed_items_back() {
    let fleet = TestFleet::with_config(FleetConfig {
        transfer_compensation: CompensationPolicy::Reverse,
        ..test_config()
    });
    let truck = fleet.truck("T-43", 50).await;
    let depot = fleet.warehouse("West Depot").await;
    let stocked = fleet.cylinder("LPG-20").await;
    let short = fleet.cylinder("LPG-20-B").await;
    fleet.stock_warehouse(depot.id, stocked.id, 10, 0).await;
    fleet.stock_warehouse(depot.id, short.id, 2, 0).await;

    let err = fleet
        .services
        .transfers
        .load_inventory(
            truck.id,
            depot.id,
            &[item(stocked.id, 5, 0), item(short.id, 5, 0)],
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PartialTransfer { compensated: true, .. });

    assert_eq!(fleet.truck_line(truck.id, stocked.id).await.unwrap().qty_full, 0);
    assert_eq!(fleet.warehouse_line(depot.id, stocked.id).await.unwrap().qty_full, 10);
}

#[tokio::test]
async fn first_item_failure_returns_the_store_error() {
    let fleet = TestFleet::new();
    let truck = fleet.truck("T-44", 50).await;
    let depot = fleet.warehouse("Depot").await;
    let cylinder = fleet.cylinder("LPG-20").await;

    let err = fleet
        .services
        .transfers
        .unload_inventory(truck.id, depot.id, &[item(cylinder.id, 1, 0)])
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));
}

#[tokio::test]
async fn inventory_view_sums_lines() {
    let fleet = TestFleet::new();
    let truck = fleet.truck("T-45", 40).await;
    let a = fleet.cylinder("LPG-20").await;
    let b = fleet.cylinder("LPG-20-B").await;
    fleet.stock_truck(truck.id, a.id, 10, 2, 3).await;
    fleet.stock_truck(truck.id, b.id, 4, 4, 0).await;

    let view = fleet.services.transfers.get_inventory(truck.id).await.unwrap();

    assert_eq!(view.status, TruckStatus::Active);
    assert_eq!(view.summary.product_lines, 2);
    assert_eq!(view.summary.total_full, 14);
    assert_eq!(view.summary.total_empty, 6);
    assert_eq!(view.summary.total_reserved, 3);
    assert_eq!(view.summary.total_available, 11);
    assert_eq!(view.summary.total_weight_kg, 14.0 * 25.0 + 6.0 * 5.0);
    assert_eq!(view.summary.cylinder_utilization, 50.0);
}

#[tokio::test]
async fn unload_leaves_reserved_cylinders_on_board() {
    let fleet = TestFleet::new();
    let truck = fleet.truck("T-47", 40).await;
    let depot = fleet.warehouse("South Depot").await;
    let cylinder = fleet.cylinder("LPG-20").await;
    fleet.stock_truck(truck.id, cylinder.id, 10, 0, 6).await;
    let transfers = &fleet.services.transfers;

    let err = transfers
        .unload_inventory(truck.id, depot.id, &[item(cylinder.id, 5, 0)])
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    transfers
        .unload_inventory(truck.id, depot.id, &[item(cylinder.id, 4, 0)])
        .await
        .unwrap();
    let line = fleet.truck_line(truck.id, cylinder.id).await.unwrap();
    assert_eq!((line.qty_full, line.qty_reserved), (6, 6));
    let balance = fleet.warehouse_line(depot.id, cylinder.id).await.unwrap();
    assert_eq!(balance.qty_full, 4);
}

#[tokio::test]
async fn unknown_parties_are_not_found() {
    let fleet = TestFleet::new();
    let truck = fleet.truck("T-46", 40).await;
    let cylinder = fleet.cylinder("LPG-20").await;
    let transfers = &fleet.services.transfers;

    let err = transfers
        .load_inventory(truck.id, Uuid::new_v4(), &[item(cylinder.id, 1, 0)])
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let err = transfers.get_inventory(Uuid::new_v4()).await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let err = transfers
        .load_inventory(truck.id, Uuid::new_v4(), &[])
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}
