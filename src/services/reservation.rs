//! Soft holds on truck stock.
//!
//! A reservation only moves `qty_reserved`; the physical counts change when
//! the stock is delivered or unloaded.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::truck_inventory;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics::{RESERVATIONS, RESERVATION_FAILURES, RESERVATION_RELEASES};
use crate::store::FleetStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationOutcome {
    pub success: bool,
    pub truck_id: Uuid,
    pub product_id: Uuid,
    pub order_id: Option<Uuid>,
    /// `qty_reserved` on the line after the operation.
    pub quantity_reserved: i32,
    pub available_remaining: i32,
}

impl ReservationOutcome {
    fn from_line(line: &truck_inventory::Model, order_id: Option<Uuid>) -> Self {
        Self {
            success: true,
            truck_id: line.truck_id,
            product_id: line.product_id,
            order_id,
            quantity_reserved: line.qty_reserved,
            available_remaining: line.qty_available(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityCheck {
    pub available: bool,
    pub requested: i32,
    pub available_qty: i32,
    pub reserved_qty: i32,
}

#[derive(Clone)]
pub struct TruckReservationService {
    store: Arc<dyn FleetStore>,
    events: Option<EventSender>,
}

impl TruckReservationService {
    pub fn new(store: Arc<dyn FleetStore>, events: Option<EventSender>) -> Self {
        Self { store, events }
    }

    async fn ensure_truck(&self, truck_id: Uuid) -> Result<(), ServiceError> {
        match self.store.get_truck(truck_id).await? {
            Some(_) => Ok(()),
            None => Err(ServiceError::NotFound(format!("Truck {} not found", truck_id))),
        }
    }

    /// Reserves `quantity` full cylinders, all or nothing.
    #[instrument(skip(self))]
    pub async fn reserve_inventory(
        &self,
        truck_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        order_id: Option<Uuid>,
    ) -> Result<ReservationOutcome, ServiceError> {
        self.ensure_truck(truck_id).await?;

        let line = match self
            .store
            .reserve_truck_inventory(truck_id, product_id, quantity)
            .await
        {
            Ok(line) => line,
            Err(e) => {
                RESERVATION_FAILURES.with_label_values(&[e.kind()]).inc();
                warn!(%truck_id, %product_id, quantity, error = %e, "Reservation refused");
                return Err(e);
            }
        };

        RESERVATIONS.inc();
        info!(
            %truck_id,
            %product_id,
            quantity,
            qty_reserved = line.qty_reserved,
            "Reserved truck inventory"
        );
        if let (Some(events), Some(order_id)) = (&self.events, order_id) {
            events
                .send_or_log(Event::InventoryReserved {
                    truck_id,
                    product_id,
                    order_id,
                    quantity,
                });
        }
        Ok(ReservationOutcome::from_line(&line, order_id))
    }

    /// Releases up to `quantity`; over-release floors at zero.
    #[instrument(skip(self))]
    pub async fn release_reservation(
        &self,
        truck_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        order_id: Option<Uuid>,
    ) -> Result<ReservationOutcome, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(format!(
                "Cannot release a negative quantity ({})",
                quantity
            )));
        }
        self.ensure_truck(truck_id).await?;

        let line = self
            .store
            .release_truck_reservation(truck_id, product_id, quantity)
            .await?;

        RESERVATION_RELEASES.inc();
        info!(
            %truck_id,
            %product_id,
            quantity,
            qty_reserved = line.qty_reserved,
            "Released truck reservation"
        );
        if let (Some(events), Some(order_id)) = (&self.events, order_id) {
            events
                .send_or_log(Event::ReservationReleased {
                    truck_id,
                    product_id,
                    order_id,
                    quantity,
                });
        }
        Ok(ReservationOutcome::from_line(&line, order_id))
    }

    /// Read-only; a product the truck does not carry is simply unavailable.
    #[instrument(skip(self))]
    pub async fn check_availability(
        &self,
        truck_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<AvailabilityCheck, ServiceError> {
        self.ensure_truck(truck_id).await?;

        let line = self
            .store
            .get_truck_inventory_line(truck_id, product_id)
            .await?;
        let (available_qty, reserved_qty) = line
            .map(|l| (l.qty_available(), l.qty_reserved))
            .unwrap_or((0, 0));

        Ok(AvailabilityCheck {
            available: available_qty >= quantity,
            requested: quantity,
            available_qty,
            reserved_qty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::truck;
    use crate::store::InMemoryFleetStore;

    async fn setup(full: i32, reserved: i32) -> (TruckReservationService, Uuid, Uuid) {
        let store = Arc::new(InMemoryFleetStore::new());
        let truck = truck::Model::new_active("T-30", 60);
        let product_id = Uuid::new_v4();
        let mut line = truck_inventory::Model::new(truck.id, product_id, full, 0);
        line.qty_reserved = reserved;
        let truck_id = truck.id;
        store.add_truck(truck).await;
        store.set_truck_inventory(line).await;
        (TruckReservationService::new(store, None), truck_id, product_id)
    }

    #[tokio::test]
    async fn shortfall_leaves_reservation_untouched() {
        let (svc, truck_id, product_id) = setup(10, 8).await;

        let err = svc
            .reserve_inventory(truck_id, product_id, 5, Some(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientStock(_)));

        let check = svc.check_availability(truck_id, product_id, 2).await.unwrap();
        assert!(check.available);
        assert_eq!(check.reserved_qty, 8);
        assert_eq!(check.available_qty, 2);
    }

    #[tokio::test]
    async fn reserve_then_over_release() {
        let (svc, truck_id, product_id) = setup(10, 0).await;

        let reserved = svc
            .reserve_inventory(truck_id, product_id, 4, None)
            .await
            .unwrap();
        assert_eq!(reserved.quantity_reserved, 4);
        assert_eq!(reserved.available_remaining, 6);

        let released = svc
            .release_reservation(truck_id, product_id, 9, None)
            .await
            .unwrap();
        assert_eq!(released.quantity_reserved, 0);
        assert_eq!(released.available_remaining, 10);
    }

    #[tokio::test]
    async fn unknown_truck_is_not_found() {
        let (svc, _, product_id) = setup(1, 0).await;
        let err = svc
            .check_availability(Uuid::new_v4(), product_id, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn product_not_on_board_is_unavailable() {
        let (svc, truck_id, _) = setup(1, 0).await;
        let check = svc
            .check_availability(truck_id, Uuid::new_v4(), 1)
            .await
            .unwrap();
        assert!(!check.available);
        assert_eq!(check.available_qty, 0);
    }
}
