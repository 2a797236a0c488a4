use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::truck_allocation::AllocationStatus;
use crate::errors::ServiceError;

/// Which way stock moved between a warehouse and a truck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    ToTruck,
    FromTruck,
}

impl TransferDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferDirection::ToTruck => "to_truck",
            TransferDirection::FromTruck => "from_truck",
        }
    }

    pub fn reversed(self) -> Self {
        match self {
            TransferDirection::ToTruck => TransferDirection::FromTruck,
            TransferDirection::FromTruck => TransferDirection::ToTruck,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving half of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Queues an event without waiting for room in the channel.
    pub fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(event) => {
                ServiceError::EventError(format!("channel full, dropped {}", event.name()))
            }
            TrySendError::Closed(event) => {
                ServiceError::EventError(format!("channel closed, dropped {}", event.name()))
            }
        })
    }

    /// Sends an event after the underlying change has already committed.
    /// A full or closed channel is logged and the event dropped; the
    /// operation that produced it is never held up.
    pub fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event) {
            warn!(error = %e, "Dropping fleet event");
        }
    }
}

// Events emitted by the fleet engine once a change has been committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    AllocationCreated {
        allocation_id: Uuid,
        order_id: Uuid,
        truck_id: Uuid,
        allocation_date: NaiveDate,
        estimated_weight_kg: f64,
    },
    AllocationRolledBack {
        order_id: Uuid,
        truck_id: Uuid,
        reason: String,
    },
    AllocationStatusChanged {
        allocation_id: Uuid,
        order_id: Uuid,
        old_status: AllocationStatus,
        new_status: AllocationStatus,
    },
    InventoryReserved {
        truck_id: Uuid,
        product_id: Uuid,
        order_id: Uuid,
        quantity: i32,
    },
    ReservationReleased {
        truck_id: Uuid,
        product_id: Uuid,
        order_id: Uuid,
        quantity: i32,
    },
    TruckLoaded {
        loading_id: Uuid,
        truck_id: Uuid,
        warehouse_id: Uuid,
        items_transferred: usize,
    },
    TruckUnloaded {
        truck_id: Uuid,
        warehouse_id: Uuid,
        items_transferred: usize,
    },
    VerificationMismatch {
        truck_id: Uuid,
        warehouse_id: Uuid,
        product_id: Uuid,
        detail: String,
    },
    WarehouseBalanceUpdated {
        warehouse_id: Uuid,
        product_id: Uuid,
        version: i32,
        attempts: u32,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::AllocationCreated { .. } => "allocation_created",
            Event::AllocationRolledBack { .. } => "allocation_rolled_back",
            Event::AllocationStatusChanged { .. } => "allocation_status_changed",
            Event::InventoryReserved { .. } => "inventory_reserved",
            Event::ReservationReleased { .. } => "reservation_released",
            Event::TruckLoaded { .. } => "truck_loaded",
            Event::TruckUnloaded { .. } => "truck_unloaded",
            Event::VerificationMismatch { .. } => "verification_mismatch",
            Event::WarehouseBalanceUpdated { .. } => "warehouse_balance_updated",
        }
    }
}

/// Drains the event channel into the log until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::AllocationRolledBack {
                order_id,
                truck_id,
                reason,
            } => {
                warn!(%order_id, %truck_id, %reason, "Allocation rolled back");
            }
            Event::VerificationMismatch {
                truck_id,
                product_id,
                detail,
                ..
            } => {
                warn!(%truck_id, %product_id, %detail, "Transfer verification mismatch");
            }
            other => {
                info!(event = other.name(), payload = ?other, "Fleet event");
            }
        }
    }

    info!("Event processing loop stopped");
}
