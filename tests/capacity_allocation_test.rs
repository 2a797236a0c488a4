mod common;

use assert_matches::assert_matches;
use common::{test_date, TestFleet};
use cylinder_fleet_api::{
    entities::{AllocationStatus, OrderType},
    errors::ServiceError,
    events::Event,
    services::optimizer::OrderSequence,
    store::FleetStore,
};

#[tokio::test]
async fn best_fit_excludes_trucks_that_cannot_carry_the_order() {
    let fleet = TestFleet::new();
    let small = fleet.truck_with_kg("T-SMALL", 2700.0).await;
    let large = fleet.truck_with_kg("T-LARGE", 2700.0).await;
    fleet.booked(small.id, 2200.0).await;
    fleet.booked(large.id, 700.0).await;

    let order = fleet.order(OrderType::Delivery, &[]).await;
    let result = fleet
        .services
        .allocation
        .find_best_allocation(order.id, 800.0, test_date())
        .await
        .unwrap();

    assert_eq!(result.evaluated.len(), 2);
    assert_eq!(result.recommendations.len(), 1);
    let best = result.best_truck.unwrap();
    assert_eq!(best.truck_id, large.id);
    assert_eq!(best.available_weight_kg, 2000.0);
}

#[tokio::test]
async fn capacity_reports_kg_and_cylinders() {
    let fleet = TestFleet::new();
    let truck = fleet.truck("T-01", 100).await;
    let cylinder = fleet.cylinder("LPG-20").await;
    fleet.stock_truck(truck.id, cylinder.id, 30, 10, 6).await;
    fleet.booked(truck.id, 675.0).await;

    let cap = fleet
        .services
        .capacity
        .calculate_capacity(truck.id, test_date())
        .await
        .unwrap();

    assert_eq!(cap.total_capacity_kg, 2700.0);
    assert_eq!(cap.available_weight_kg, 2025.0);
    assert_eq!(cap.utilization_percentage, 25.0);
    assert_eq!(cap.loaded_cylinders, Some(40));
    assert_eq!(cap.available_cylinders, Some(60));
    assert_eq!(cap.reserved_cylinders, Some(6));
}

#[tokio::test]
async fn allocating_reserves_every_line_and_numbers_stops() {
    let mut fleet = TestFleet::new();
    let truck = fleet.truck("T-02", 100).await;
    let cylinder = fleet.cylinder("LPG-20").await;
    fleet.stock_truck(truck.id, cylinder.id, 20, 0, 0).await;

    let first = fleet.order(OrderType::Delivery, &[(cylinder.id, 4)]).await;
    let second = fleet.order(OrderType::Refill, &[(cylinder.id, 6)]).await;

    let a = fleet
        .services
        .allocation
        .allocate_order(first.id, None, test_date())
        .await
        .unwrap();
    let b = fleet
        .services
        .allocation
        .allocate_order(second.id, Some(truck.id), test_date())
        .await
        .unwrap();

    assert_eq!(a.allocation.truck_id, truck.id);
    assert_eq!(a.allocation.estimated_weight_kg, 100.0);
    assert_eq!(a.allocation.stop_sequence, Some(1));
    assert_eq!(b.allocation.stop_sequence, Some(2));

    let line = fleet.truck_line(truck.id, cylinder.id).await.unwrap();
    assert_eq!(line.qty_reserved, 10);
    assert_eq!(line.qty_full, 20);

    let events = fleet.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::AllocationCreated { order_id, .. } if *order_id == first.id)));
}

#[tokio::test]
async fn failed_reservation_rolls_the_allocation_back() {
    let mut fleet = TestFleet::new();
    let truck = fleet.truck("T-03", 100).await;
    let plenty = fleet.cylinder("LPG-20").await;
    let scarce = fleet.cylinder("LPG-20-B").await;
    fleet.stock_truck(truck.id, plenty.id, 20, 0, 0).await;
    fleet.stock_truck(truck.id, scarce.id, 1, 0, 0).await;

    let order = fleet
        .order(OrderType::Delivery, &[(plenty.id, 5), (scarce.id, 3)])
        .await;

    let err = fleet
        .services
        .allocation
        .allocate_order(order.id, Some(truck.id), test_date())
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::AllocationRolledBack { order_id, .. } if order_id == order.id
    );

    assert_eq!(fleet.truck_line(truck.id, plenty.id).await.unwrap().qty_reserved, 0);
    assert_eq!(fleet.truck_line(truck.id, scarce.id).await.unwrap().qty_reserved, 0);
    assert!(fleet
        .store
        .find_allocation_for_order(order.id, test_date())
        .await
        .unwrap()
        .is_none());
    assert!(fleet.store.list_allocations(test_date()).await.unwrap().is_empty());

    let events = fleet.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::AllocationRolledBack { .. })));
}

#[tokio::test]
async fn pickup_orders_reserve_nothing() {
    let fleet = TestFleet::new();
    let truck = fleet.truck("T-04", 100).await;
    let cylinder = fleet.cylinder("LPG-20").await;
    let order = fleet.order(OrderType::Pickup, &[(cylinder.id, 8)]).await;

    let result = fleet
        .services
        .allocation
        .allocate_order(order.id, Some(truck.id), test_date())
        .await
        .unwrap();

    assert!(result.reservations.is_empty());
    // empties only: 8 x 5 kg tare
    assert_eq!(result.allocation.estimated_weight_kg, 40.0);
}

#[tokio::test]
async fn cancel_releases_and_delivery_settles_stock() {
    let fleet = TestFleet::new();
    let truck = fleet.truck("T-05", 100).await;
    let cylinder = fleet.cylinder("LPG-20").await;
    fleet.stock_truck(truck.id, cylinder.id, 20, 0, 0).await;

    let cancelled = fleet.order(OrderType::Delivery, &[(cylinder.id, 5)]).await;
    let exchanged = fleet.order(OrderType::Exchange, &[(cylinder.id, 3)]).await;
    let allocation = &fleet.services.allocation;

    let c = allocation
        .allocate_order(cancelled.id, Some(truck.id), test_date())
        .await
        .unwrap();
    let e = allocation
        .allocate_order(exchanged.id, Some(truck.id), test_date())
        .await
        .unwrap();
    assert_eq!(fleet.truck_line(truck.id, cylinder.id).await.unwrap().qty_reserved, 8);

    let c = allocation.cancel_allocation(c.allocation.id).await.unwrap();
    assert_eq!(c.status, AllocationStatus::Cancelled);
    assert_eq!(fleet.truck_line(truck.id, cylinder.id).await.unwrap().qty_reserved, 3);

    allocation.mark_loaded(e.allocation.id).await.unwrap();
    let delivered = allocation.complete_delivery(e.allocation.id).await.unwrap();
    assert!(delivered.warnings.is_empty());
    assert_eq!(delivered.allocation.status, AllocationStatus::Delivered);

    let line = fleet.truck_line(truck.id, cylinder.id).await.unwrap();
    assert_eq!((line.qty_full, line.qty_empty, line.qty_reserved), (17, 3, 0));

    // terminal states do not move again
    let err = allocation.cancel_allocation(e.allocation.id).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn validation_reports_errors_and_warnings() {
    let fleet = TestFleet::new();
    let truck = fleet.truck("T-06", 10).await;
    let cylinder = fleet.cylinder("LPG-20").await;
    fleet.stock_truck(truck.id, cylinder.id, 10, 0, 0).await;
    let order = fleet.order(OrderType::Delivery, &[(cylinder.id, 1)]).await;
    let allocation = &fleet.services.allocation;

    // 250 of 270 kg
    let near_full = allocation
        .validate_allocation(truck.id, order.id, 250.0, test_date())
        .await
        .unwrap();
    assert!(near_full.is_valid);
    assert_eq!(near_full.warnings.len(), 1);

    let too_heavy = allocation
        .validate_allocation(truck.id, order.id, 300.0, test_date())
        .await
        .unwrap();
    assert!(!too_heavy.is_valid);
    assert!(too_heavy.exceeds_capacity);
    assert!(too_heavy.errors[0].contains("by 30.0 kg"));

    allocation
        .allocate_order(order.id, Some(truck.id), test_date())
        .await
        .unwrap();
    let again = allocation
        .validate_allocation(truck.id, order.id, 25.0, test_date())
        .await
        .unwrap();
    assert!(!again.is_valid);
    assert!(again.errors.iter().any(|e| e.contains("already allocated")));

    let err = allocation
        .allocate_order(order.id, Some(truck.id), test_date())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn inactive_and_unknown_trucks_are_refused() {
    let fleet = TestFleet::new();
    let mut parked = cylinder_fleet_api::entities::truck::Model::new_active("T-07", 100);
    parked.active = false;
    fleet.store.add_truck(parked.clone()).await;
    let order = fleet.order(OrderType::Delivery, &[]).await;
    let allocation = &fleet.services.allocation;

    let v = allocation
        .validate_allocation(parked.id, order.id, 10.0, test_date())
        .await
        .unwrap();
    assert!(!v.is_valid);
    assert!(v.errors[0].contains("inactive"));

    let err = allocation
        .allocate_order(order.id, Some(uuid::Uuid::new_v4()), test_date())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    // no active truck at all
    let err = allocation
        .allocate_order(order.id, None, test_date())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::CapacityExceeded(_));
}

#[tokio::test]
async fn optimizer_plans_batches_against_running_capacity() {
    let fleet = TestFleet::new();
    let truck = fleet.truck("T-08", 20).await;
    let cylinder = fleet.cylinder("LPG-20").await;
    fleet.stock_truck(truck.id, cylinder.id, 40, 0, 0).await;

    // 540 kg of truck capacity: 250 + 250 fit, the third does not
    let a = fleet.order(OrderType::Delivery, &[(cylinder.id, 10)]).await;
    let b = fleet.order(OrderType::Delivery, &[(cylinder.id, 10)]).await;
    let c = fleet.order(OrderType::Delivery, &[(cylinder.id, 10)]).await;
    let held = fleet.order(OrderType::Delivery, &[(cylinder.id, 1)]).await;
    fleet
        .services
        .allocation
        .allocate_order(held.id, Some(truck.id), test_date())
        .await
        .unwrap();
    let unknown = uuid::Uuid::new_v4();

    let plan = fleet
        .services
        .optimizer
        .optimize_allocations(&[a.id, b.id, c.id, held.id, unknown], test_date())
        .await
        .unwrap();

    assert_eq!(plan.optimized_allocations.len(), 2);
    assert_eq!(plan.optimized_allocations[0].order_id, a.id);
    assert_eq!(plan.unallocated_orders, vec![c.id, unknown]);
    assert_eq!(plan.already_allocated, vec![held.id]);
    assert_eq!(plan.optimization_summary.total_orders, 5);
    assert_eq!(plan.optimization_summary.allocated_orders, 2);

    // planning leaves the store untouched
    assert_eq!(fleet.store.list_allocations(test_date()).await.unwrap().len(), 1);

    let by_weight = (*fleet.services.optimizer)
        .clone()
        .with_sequence(OrderSequence::WeightDesc)
        .optimize_allocations(&[a.id, b.id], test_date())
        .await
        .unwrap();
    assert_eq!(by_weight.optimization_summary.allocated_orders, 2);
}

#[tokio::test]
async fn schedule_totals_cover_active_trucks() {
    let fleet = TestFleet::new();
    let busy = fleet.truck_with_kg("T-09", 1000.0).await;
    let over = fleet.truck_with_kg("T-10", 500.0).await;
    let mut parked = cylinder_fleet_api::entities::truck::Model::new_active("T-11", 100);
    parked.active = false;
    parked.next_maintenance_due = Some(test_date());
    fleet.store.add_truck(parked).await;
    let mut due = cylinder_fleet_api::entities::truck::Model::new_active("T-12", 10);
    due.next_maintenance_due = test_date().pred_opt();
    fleet.store.add_truck(due).await;

    fleet.booked(busy.id, 400.0).await;
    fleet.booked(over.id, 600.0).await;

    let schedule = fleet
        .services
        .schedule
        .generate_schedule(test_date())
        .await
        .unwrap();
    let totals = &schedule.fleet_utilization;

    assert_eq!(schedule.schedules.len(), 4);
    assert_eq!(totals.total_trucks, 4);
    assert_eq!(totals.active_trucks, 3);
    assert_eq!(totals.total_capacity_kg, 1770.0);
    assert_eq!(totals.allocated_capacity_kg, 1000.0);
    assert_eq!(totals.overallocated_trucks, 1);
    assert_eq!(totals.maintenance_due_trucks, 1);

    let busy_schedule = schedule
        .schedules
        .iter()
        .find(|s| s.truck.id == busy.id)
        .unwrap();
    assert_eq!(busy_schedule.allocations.len(), 1);
    assert!(busy_schedule.fuel_sufficient);
}
