use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::inventory_event::InventoryEventType;
use crate::entities::inventory_lot::{LotStatus, QcStatus};
use crate::errors::ServiceError;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving end that `process_events` drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender
            .send(event)
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))
    }

    /// Publishes an event for a change that has already committed. A closed
    /// channel is logged and otherwise ignored.
    pub async fn publish(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "Dropping domain event");
        }
    }
}

/// Domain events emitted after a successful commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Event {
    InventoryTransactionApplied {
        event_id: Uuid,
        tenant_id: Uuid,
        site_id: Uuid,
        item_id: Uuid,
        event_type: InventoryEventType,
        qty_base: Decimal,
        from_location_id: Option<Uuid>,
        to_location_id: Option<Uuid>,
        lot_id: Option<Uuid>,
    },
    LotStatusChanged {
        lot_id: Uuid,
        tenant_id: Uuid,
        old_status: LotStatus,
        new_status: LotStatus,
    },
    LotQcRecorded {
        lot_id: Uuid,
        tenant_id: Uuid,
        qc_status: QcStatus,
    },
    LotsExpired {
        tenant_id: Uuid,
        as_of: NaiveDate,
        lot_ids: Vec<Uuid>,
    },
    CycleCountCompleted {
        cycle_count_id: Uuid,
        tenant_id: Uuid,
        site_id: Uuid,
        posted_event_ids: Vec<Uuid>,
    },
    BalanceDriftDetected {
        tenant_id: Uuid,
        item_id: Uuid,
        location_id: Uuid,
        balance_qty: Decimal,
        ledger_qty: Decimal,
    },
    AllocationShortfall {
        tenant_id: Uuid,
        site_id: Uuid,
        item_id: Uuid,
        requested: Decimal,
        available: Decimal,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::InventoryTransactionApplied { .. } => "inventory_transaction_applied",
            Event::LotStatusChanged { .. } => "lot_status_changed",
            Event::LotQcRecorded { .. } => "lot_qc_recorded",
            Event::LotsExpired { .. } => "lots_expired",
            Event::CycleCountCompleted { .. } => "cycle_count_completed",
            Event::BalanceDriftDetected { .. } => "balance_drift_detected",
            Event::AllocationShortfall { .. } => "allocation_shortfall",
        }
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::InventoryTransactionApplied {
                event_id,
                item_id,
                event_type,
                qty_base,
                ..
            } => {
                info!(
                    event_id = %event_id,
                    item_id = %item_id,
                    event_type = %event_type,
                    qty_base = %qty_base,
                    "Inventory transaction applied"
                );
            }
            Event::BalanceDriftDetected {
                item_id,
                location_id,
                balance_qty,
                ledger_qty,
                ..
            } => {
                error!(
                    item_id = %item_id,
                    location_id = %location_id,
                    balance_qty = %balance_qty,
                    ledger_qty = %ledger_qty,
                    "Balance diverges from ledger"
                );
            }
            Event::AllocationShortfall {
                item_id,
                requested,
                available,
                ..
            } => {
                warn!(
                    item_id = %item_id,
                    requested = %requested,
                    available = %available,
                    "Allocation shortfall"
                );
            }
            other => {
                info!(event = other.name(), "Received event: {:?}", other);
            }
        }
    }

    info!("Event processing loop stopped");
}
