//! Per-location balance projection of the ledger.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::cache::{BalanceCache, BalanceKey};
use crate::db::{supports_row_locks, DbPool};
use crate::entities::inventory_balance;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::ledger::InventoryLedger;

/// Outcome of comparing a balance row with the ledger it is derived from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceVerification {
    pub tenant_id: Uuid,
    pub item_id: Uuid,
    pub location_id: Uuid,
    pub balance_qty: Decimal,
    pub ledger_qty: Decimal,
}

impl BalanceVerification {
    pub fn drift(&self) -> Decimal {
        self.balance_qty - self.ledger_qty
    }

    pub fn in_sync(&self) -> bool {
        self.drift().is_zero()
    }
}

pub struct BalanceStore {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    cache: BalanceCache,
}

impl BalanceStore {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, cache: BalanceCache) -> Self {
        Self {
            db,
            event_sender,
            cache,
        }
    }

    /// Reads the committed balance row for a write. Rows are locked on backends
    /// that support it; elsewhere the versioned update catches lost races.
    pub(crate) async fn fetch_for_update<C: ConnectionTrait>(
        conn: &C,
        tenant_id: Uuid,
        item_id: Uuid,
        location_id: Uuid,
    ) -> Result<Option<inventory_balance::Model>, ServiceError> {
        let mut query = inventory_balance::Entity::find()
            .filter(inventory_balance::Column::TenantId.eq(tenant_id))
            .filter(inventory_balance::Column::ItemId.eq(item_id))
            .filter(inventory_balance::Column::LocationId.eq(location_id));
        if supports_row_locks(conn.get_database_backend()) {
            query = query.lock_exclusive();
        }
        query.one(conn).await.map_err(ServiceError::db_error)
    }

    /// Writes `new_qty` for (item, location). An existing row is updated only if
    /// its version is unchanged since `current` was read; a missing row is
    /// inserted and collides on the unique key if another writer got there first.
    pub(crate) async fn write_balance<C: ConnectionTrait>(
        conn: &C,
        key: BalanceKey,
        site_id: Uuid,
        current: Option<&inventory_balance::Model>,
        new_qty: Decimal,
    ) -> Result<inventory_balance::Model, ServiceError> {
        let now = Utc::now();
        match current {
            Some(row) => {
                let changes = inventory_balance::ActiveModel {
                    qty_base: Set(new_qty),
                    version: Set(row.version + 1),
                    updated_at: Set(now),
                    ..Default::default()
                };
                let result = inventory_balance::Entity::update_many()
                    .set(changes)
                    .filter(inventory_balance::Column::Id.eq(row.id))
                    .filter(inventory_balance::Column::Version.eq(row.version))
                    .exec(conn)
                    .await
                    .map_err(ServiceError::db_error)?;
                if result.rows_affected == 0 {
                    return Err(ServiceError::StorageConflict(format!(
                        "Balance for item {} at location {} changed concurrently",
                        key.item_id, key.location_id
                    )));
                }
                Ok(inventory_balance::Model {
                    qty_base: new_qty,
                    version: row.version + 1,
                    updated_at: now,
                    ..row.clone()
                })
            }
            None => inventory_balance::ActiveModel {
                id: Set(Uuid::new_v4()),
                tenant_id: Set(key.tenant_id),
                site_id: Set(site_id),
                item_id: Set(key.item_id),
                location_id: Set(key.location_id),
                qty_base: Set(new_qty),
                version: Set(1),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(conn)
            .await
            .map_err(ServiceError::db_error),
        }
    }

    #[instrument(skip(self))]
    pub async fn find_balance(
        &self,
        tenant_id: Uuid,
        item_id: Uuid,
        location_id: Uuid,
    ) -> Result<Option<inventory_balance::Model>, ServiceError> {
        inventory_balance::Entity::find()
            .filter(inventory_balance::Column::TenantId.eq(tenant_id))
            .filter(inventory_balance::Column::ItemId.eq(item_id))
            .filter(inventory_balance::Column::LocationId.eq(location_id))
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// On-hand base quantity; zero when the pair has never been transacted.
    /// Served from the read cache when enabled.
    #[instrument(skip(self))]
    pub async fn get_balance(
        &self,
        tenant_id: Uuid,
        item_id: Uuid,
        location_id: Uuid,
    ) -> Result<Decimal, ServiceError> {
        let key = BalanceKey::new(tenant_id, item_id, location_id);
        if let Some(qty) = self.cache.get(&key) {
            return Ok(qty);
        }
        let qty = self
            .find_balance(tenant_id, item_id, location_id)
            .await?
            .map(|row| row.qty_base)
            .unwrap_or(Decimal::ZERO);
        self.cache.put(key, qty);
        Ok(qty)
    }

    #[instrument(skip(self))]
    pub async fn list_site_balances(
        &self,
        tenant_id: Uuid,
        site_id: Uuid,
        item_id: Option<Uuid>,
    ) -> Result<Vec<inventory_balance::Model>, ServiceError> {
        let mut query = inventory_balance::Entity::find()
            .filter(inventory_balance::Column::TenantId.eq(tenant_id))
            .filter(inventory_balance::Column::SiteId.eq(site_id));
        if let Some(item_id) = item_id {
            query = query.filter(inventory_balance::Column::ItemId.eq(item_id));
        }
        query
            .order_by_asc(inventory_balance::Column::ItemId)
            .order_by_asc(inventory_balance::Column::LocationId)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Recomputes (item, location) from the ledger and compares it with the
    /// stored balance. Drift is reported, never repaired here.
    #[instrument(skip(self))]
    pub async fn verify_balance(
        &self,
        tenant_id: Uuid,
        item_id: Uuid,
        location_id: Uuid,
    ) -> Result<BalanceVerification, ServiceError> {
        let balance_qty = self
            .find_balance(tenant_id, item_id, location_id)
            .await?
            .map(|row| row.qty_base)
            .unwrap_or(Decimal::ZERO);
        let ledger_qty =
            InventoryLedger::net_quantity_in(self.db.as_ref(), tenant_id, item_id, location_id)
                .await?;

        let verification = BalanceVerification {
            tenant_id,
            item_id,
            location_id,
            balance_qty,
            ledger_qty,
        };

        if verification.in_sync() {
            info!(
                item_id = %item_id,
                location_id = %location_id,
                qty = %balance_qty,
                "Balance matches ledger"
            );
        } else {
            error!(
                item_id = %item_id,
                location_id = %location_id,
                balance_qty = %balance_qty,
                ledger_qty = %ledger_qty,
                "Balance drift detected"
            );
            self.event_sender
                .publish(Event::BalanceDriftDetected {
                    tenant_id,
                    item_id,
                    location_id,
                    balance_qty,
                    ledger_qty,
                })
                .await;
        }

        Ok(verification)
    }
}
