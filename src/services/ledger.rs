//! Append-only inventory event ledger.

use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::inventory_event::{self, InventoryEventType};
use crate::errors::ServiceError;

/// Optional filters for ledger listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub item_id: Option<Uuid>,
    /// Matches events that touch the location on either side
    pub location_id: Option<Uuid>,
    pub event_type: Option<InventoryEventType>,
    pub reference_id: Option<String>,
}

impl EventFilter {
    fn condition(&self, tenant_id: Uuid) -> Condition {
        let mut condition = Condition::all().add(inventory_event::Column::TenantId.eq(tenant_id));
        if let Some(item_id) = self.item_id {
            condition = condition.add(inventory_event::Column::ItemId.eq(item_id));
        }
        if let Some(location_id) = self.location_id {
            condition = condition.add(touches_location(location_id));
        }
        if let Some(event_type) = self.event_type {
            condition = condition.add(inventory_event::Column::EventType.eq(event_type));
        }
        if let Some(reference_id) = &self.reference_id {
            condition = condition.add(inventory_event::Column::ReferenceId.eq(reference_id.clone()));
        }
        condition
    }
}

fn touches_location(location_id: Uuid) -> Condition {
    Condition::any()
        .add(inventory_event::Column::FromLocationId.eq(location_id))
        .add(inventory_event::Column::ToLocationId.eq(location_id))
}

#[derive(Debug, Clone, Serialize)]
pub struct EventPage {
    pub events: Vec<inventory_event::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

pub struct InventoryLedger {
    db: Arc<DbPool>,
}

impl InventoryLedger {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Inserts one ledger row. Only the transaction engine calls this, inside
    /// the same transaction as the balance update.
    pub(crate) async fn append<C: ConnectionTrait>(
        conn: &C,
        event: inventory_event::ActiveModel,
    ) -> Result<inventory_event::Model, ServiceError> {
        event.insert(conn).await.map_err(ServiceError::db_error)
    }

    /// Events touching (item, location), oldest first.
    pub(crate) async fn events_at<C: ConnectionTrait>(
        conn: &C,
        tenant_id: Uuid,
        item_id: Uuid,
        location_id: Uuid,
    ) -> Result<Vec<inventory_event::Model>, ServiceError> {
        inventory_event::Entity::find()
            .filter(inventory_event::Column::TenantId.eq(tenant_id))
            .filter(inventory_event::Column::ItemId.eq(item_id))
            .filter(touches_location(location_id))
            .order_by_asc(inventory_event::Column::CreatedAt)
            .all(conn)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Sum of signed deltas the ledger records for (item, location).
    pub(crate) async fn net_quantity_in<C: ConnectionTrait>(
        conn: &C,
        tenant_id: Uuid,
        item_id: Uuid,
        location_id: Uuid,
    ) -> Result<Decimal, ServiceError> {
        let events = Self::events_at(conn, tenant_id, item_id, location_id).await?;
        Ok(events
            .iter()
            .map(|event| event.signed_delta_at(location_id))
            .sum())
    }

    /// The event a document posted for (item, location), if any.
    pub(crate) async fn find_posted<C: ConnectionTrait>(
        conn: &C,
        tenant_id: Uuid,
        event_type: InventoryEventType,
        reference_type: &str,
        reference_id: &str,
        item_id: Uuid,
        location_id: Uuid,
    ) -> Result<Option<inventory_event::Model>, ServiceError> {
        inventory_event::Entity::find()
            .filter(inventory_event::Column::TenantId.eq(tenant_id))
            .filter(inventory_event::Column::EventType.eq(event_type))
            .filter(inventory_event::Column::ReferenceType.eq(reference_type))
            .filter(inventory_event::Column::ReferenceId.eq(reference_id))
            .filter(inventory_event::Column::ItemId.eq(item_id))
            .filter(touches_location(location_id))
            .one(conn)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn get_event(
        &self,
        tenant_id: Uuid,
        event_id: Uuid,
    ) -> Result<inventory_event::Model, ServiceError> {
        let event = inventory_event::Entity::find_by_id(event_id)
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Inventory event", event_id))?;
        if event.tenant_id != tenant_id {
            return Err(ServiceError::not_found("Inventory event", event_id));
        }
        Ok(event)
    }

    /// Newest-first page of ledger rows. `page` is 1-based.
    #[instrument(skip(self))]
    pub async fn list_events(
        &self,
        tenant_id: Uuid,
        filter: &EventFilter,
        page: u64,
        per_page: u64,
    ) -> Result<EventPage, ServiceError> {
        let per_page = per_page.clamp(1, 500);
        let page = page.max(1);
        let paginator = inventory_event::Entity::find()
            .filter(filter.condition(tenant_id))
            .order_by_desc(inventory_event::Column::CreatedAt)
            .order_by_desc(inventory_event::Column::Id)
            .paginate(self.db.as_ref(), per_page);

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let events = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(EventPage {
            events,
            total,
            page,
            per_page,
        })
    }

    #[instrument(skip(self))]
    pub async fn net_quantity(
        &self,
        tenant_id: Uuid,
        item_id: Uuid,
        location_id: Uuid,
    ) -> Result<Decimal, ServiceError> {
        Self::net_quantity_in(self.db.as_ref(), tenant_id, item_id, location_id).await
    }
}
