//! Lot lifecycle.
//!
//! `AVAILABLE <-> QUARANTINE`, then `EXPIRED` or `CONSUMED` (terminal). QC
//! results move `qc_status` on their own axis, except that a FAILED result
//! forces the lot into QUARANTINE. Quantity changes arrive from the
//! transaction engine inside its database transaction; status changes come
//! through [`LotService`].

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::transaction::{begin, finish, retry_on_conflict, RetryPolicy};
use crate::db::{supports_row_locks, DbPool};
use crate::entities::inventory_lot::{self, LotStatus, QcStatus};
use crate::entities::lot_history::{self, LotHistoryEventType};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::audit::Actor;
use crate::services::inventory_transactions::{AdjustDirection, TxnKind};
use crate::services::BatchOutcome;

/// Lot named on an inventory transaction, by id or by number. The dates and
/// supplier are only used when a receipt creates the lot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LotRef {
    pub lot_id: Option<Uuid>,
    pub lot_number: Option<String>,
    pub expiration_date: Option<NaiveDate>,
    pub manufacturing_date: Option<NaiveDate>,
    pub supplier_id: Option<Uuid>,
}

impl LotRef {
    pub fn by_id(lot_id: Uuid) -> Self {
        Self {
            lot_id: Some(lot_id),
            ..Default::default()
        }
    }

    pub fn by_number(lot_number: impl Into<String>) -> Self {
        Self {
            lot_number: Some(lot_number.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lot_id.is_none() && self.lot_number.as_deref().map_or(true, |n| n.trim().is_empty())
    }

    fn describe(&self) -> String {
        match (&self.lot_id, &self.lot_number) {
            (Some(id), _) => id.to_string(),
            (None, Some(number)) => number.clone(),
            (None, None) => "<none>".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LotTransition {
    Quarantine,
    Release,
    Expire,
}

fn is_terminal(status: LotStatus) -> bool {
    matches!(status, LotStatus::Expired | LotStatus::Consumed)
}

/// Next status for a manual transition, or why it is not allowed.
pub fn next_status(
    lot: &inventory_lot::Model,
    transition: LotTransition,
    today: NaiveDate,
) -> Result<LotStatus, ServiceError> {
    let illegal = || {
        ServiceError::InvalidOperation(format!(
            "Cannot {:?} lot {} in status {}",
            transition, lot.lot_number, lot.status
        ))
    };
    match (transition, lot.status) {
        (LotTransition::Quarantine, LotStatus::Available) => Ok(LotStatus::Quarantine),
        (LotTransition::Release, LotStatus::Quarantine) => {
            if lot.qc_status == QcStatus::Failed {
                return Err(ServiceError::InvalidOperation(format!(
                    "Lot {} failed QC and cannot be released",
                    lot.lot_number
                )));
            }
            if lot.is_expired_on(today) {
                return Err(ServiceError::InvalidOperation(format!(
                    "Lot {} is past its expiration date",
                    lot.lot_number
                )));
            }
            Ok(LotStatus::Available)
        }
        (LotTransition::Expire, status) if !is_terminal(status) => Ok(LotStatus::Expired),
        _ => Err(illegal()),
    }
}

/// Applies a QC result: returns the new (qc_status, status).
pub fn apply_qc_result(
    lot: &inventory_lot::Model,
    result: QcStatus,
) -> Result<(QcStatus, LotStatus), ServiceError> {
    if result == QcStatus::Pending {
        return Err(ServiceError::ValidationError(
            "PENDING is not a QC result".to_string(),
        ));
    }
    if is_terminal(lot.status) {
        return Err(ServiceError::InvalidOperation(format!(
            "Lot {} is {} and no longer accepts QC results",
            lot.lot_number, lot.status
        )));
    }
    let status = if result == QcStatus::Failed {
        LotStatus::Quarantine
    } else {
        lot.status
    };
    Ok((result, status))
}

/// Quantity effect of one inventory transaction on a lot.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LotChange {
    pub next: inventory_lot::Model,
    pub history: LotHistoryEventType,
    pub detail: Option<String>,
}

fn ensure_at(lot: &inventory_lot::Model, location_id: Uuid) -> Result<(), ServiceError> {
    if lot.location_id == Some(location_id) {
        Ok(())
    } else {
        Err(ServiceError::ValidationError(format!(
            "Lot {} is not stored at location {}",
            lot.lot_number, location_id
        )))
    }
}

fn ensure_placeable(lot: &inventory_lot::Model, location_id: Uuid) -> Result<(), ServiceError> {
    match lot.location_id {
        Some(current) if current != location_id && lot.qty_available > Decimal::ZERO => {
            Err(ServiceError::ValidationError(format!(
                "Lot {} is stored at location {}; move it before adding stock elsewhere",
                lot.lot_number, current
            )))
        }
        _ => Ok(()),
    }
}

fn decrement(
    lot: &inventory_lot::Model,
    location_id: Uuid,
    qty: Decimal,
) -> Result<inventory_lot::Model, ServiceError> {
    ensure_at(lot, location_id)?;
    if lot.qty_available < qty {
        return Err(ServiceError::InsufficientBalance {
            location_id,
            lot_id: Some(lot.id),
            available: lot.qty_available,
            requested: qty,
        });
    }
    let mut next = lot.clone();
    next.qty_available -= qty;
    if next.qty_available.is_zero() {
        next.status = LotStatus::Consumed;
    }
    Ok(next)
}

fn increment(
    lot: &inventory_lot::Model,
    location_id: Uuid,
    qty: Decimal,
    rules: LotRules,
) -> Result<inventory_lot::Model, ServiceError> {
    if is_terminal(lot.status) {
        return Err(ServiceError::InvalidOperation(format!(
            "Lot {} is {}; stock cannot be added to it",
            lot.lot_number, lot.status
        )));
    }
    // a serial is a unit lot
    if rules.serial_tracked && lot.qty_available > Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "Serial {} is already in stock",
            lot.lot_number
        )));
    }
    ensure_placeable(lot, location_id)?;
    let out_of_range = || ServiceError::ValidationError("Quantity out of range".to_string());
    let mut next = lot.clone();
    next.qty_produced = lot.qty_produced.checked_add(qty).ok_or_else(out_of_range)?;
    next.qty_available = lot.qty_available.checked_add(qty).ok_or_else(out_of_range)?;
    next.location_id = Some(location_id);
    Ok(next)
}

/// Item- and day-dependent inputs to [`apply_to_lot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LotRules {
    pub serial_tracked: bool,
    pub today: NaiveDate,
}

/// Pure lot effect of a transaction of `qty` base units.
pub(crate) fn apply_to_lot(
    lot: &inventory_lot::Model,
    kind: &TxnKind,
    qty: Decimal,
    rules: LotRules,
) -> Result<LotChange, ServiceError> {
    if lot.status == LotStatus::Consumed && !matches!(kind, TxnKind::Receipt { .. }) {
        return Err(ServiceError::InvalidOperation(format!(
            "Lot {} is consumed",
            lot.lot_number
        )));
    }

    let change = match *kind {
        TxnKind::Receipt { to } => LotChange {
            next: increment(lot, to, qty, rules)?,
            history: LotHistoryEventType::Receipt,
            detail: None,
        },
        TxnKind::Issue { from } => {
            if lot.status != LotStatus::Available || lot.qc_status == QcStatus::Failed {
                return Err(ServiceError::InvalidOperation(format!(
                    "Lot {} is {} (QC {}) and cannot be issued",
                    lot.lot_number, lot.status, lot.qc_status
                )));
            }
            if lot.is_expired_on(rules.today) {
                return Err(ServiceError::InvalidOperation(format!(
                    "Lot {} expired on {} and cannot be issued",
                    lot.lot_number,
                    lot.expiration_date.map(|d| d.to_string()).unwrap_or_default()
                )));
            }
            LotChange {
                next: decrement(lot, from, qty)?,
                history: LotHistoryEventType::Issue,
                detail: None,
            }
        }
        TxnKind::Move { from, to } | TxnKind::Transfer { from, to } => {
            if lot.status == LotStatus::Expired {
                return Err(ServiceError::InvalidOperation(format!(
                    "Lot {} is expired",
                    lot.lot_number
                )));
            }
            ensure_at(lot, from)?;
            if qty != lot.qty_available {
                return Err(ServiceError::ValidationError(format!(
                    "Lot {} holds {}; partial lot moves of {} are not supported",
                    lot.lot_number, lot.qty_available, qty
                )));
            }
            let mut next = lot.clone();
            next.location_id = Some(to);
            LotChange {
                next,
                history: LotHistoryEventType::Move,
                detail: Some(format!("{} -> {}", from, to)),
            }
        }
        TxnKind::Adjust {
            location,
            direction,
        }
        | TxnKind::Count {
            location,
            direction,
        } => {
            let history = if matches!(kind, TxnKind::Count { .. }) {
                LotHistoryEventType::Count
            } else {
                LotHistoryEventType::Adjust
            };
            let next = match direction {
                AdjustDirection::Increase => increment(lot, location, qty, rules)?,
                AdjustDirection::Decrease { .. } => decrement(lot, location, qty)?,
            };
            LotChange {
                next,
                history,
                detail: None,
            }
        }
    };
    Ok(change)
}

/// Result of the lot side of an engine transaction.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LotEffect {
    pub lot: inventory_lot::Model,
    pub status_change: Option<(LotStatus, LotStatus)>,
}

pub(crate) struct LotEffectContext<'a> {
    pub tenant_id: Uuid,
    pub item_id: Uuid,
    pub kind: &'a TxnKind,
    pub lot_ref: &'a LotRef,
    pub qty_base: Decimal,
    pub rules: LotRules,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub now: DateTime<Utc>,
}

/// Finds the referenced lot of `item_id`, locking it where supported.
pub(crate) async fn find_lot<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    item_id: Uuid,
    lot_ref: &LotRef,
) -> Result<Option<inventory_lot::Model>, ServiceError> {
    let mut query = inventory_lot::Entity::find();
    query = match (&lot_ref.lot_id, &lot_ref.lot_number) {
        (Some(lot_id), _) => query.filter(inventory_lot::Column::Id.eq(*lot_id)),
        (None, Some(number)) => query
            .filter(inventory_lot::Column::TenantId.eq(tenant_id))
            .filter(inventory_lot::Column::ItemId.eq(item_id))
            .filter(inventory_lot::Column::LotNumber.eq(number.trim())),
        (None, None) => return Ok(None),
    };
    if supports_row_locks(conn.get_database_backend()) {
        query = query.lock_exclusive();
    }
    let lot = query.one(conn).await.map_err(ServiceError::db_error)?;

    if let Some(lot) = &lot {
        if lot.tenant_id != tenant_id {
            return Err(ServiceError::TenantMismatch(format!(
                "Lot {} belongs to another tenant",
                lot.id
            )));
        }
        if lot.item_id != item_id {
            return Err(ServiceError::ValidationError(format!(
                "Lot {} is not a lot of item {}",
                lot.lot_number, item_id
            )));
        }
    }
    Ok(lot)
}

/// Writes `next` over `current` if nobody else has since.
pub(crate) async fn update_lot<C: ConnectionTrait>(
    conn: &C,
    current: &inventory_lot::Model,
    next: &inventory_lot::Model,
    now: DateTime<Utc>,
) -> Result<inventory_lot::Model, ServiceError> {
    let changes = inventory_lot::ActiveModel {
        location_id: Set(next.location_id),
        qty_produced: Set(next.qty_produced),
        qty_available: Set(next.qty_available),
        status: Set(next.status),
        qc_status: Set(next.qc_status),
        quarantine_reason: Set(next.quarantine_reason.clone()),
        version: Set(current.version + 1),
        updated_at: Set(now),
        ..Default::default()
    };
    let result = inventory_lot::Entity::update_many()
        .set(changes)
        .filter(inventory_lot::Column::Id.eq(current.id))
        .filter(inventory_lot::Column::Version.eq(current.version))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;
    if result.rows_affected == 0 {
        return Err(ServiceError::StorageConflict(format!(
            "Lot {} changed concurrently",
            current.lot_number
        )));
    }
    Ok(inventory_lot::Model {
        version: current.version + 1,
        updated_at: now,
        ..next.clone()
    })
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn append_history<C: ConnectionTrait>(
    conn: &C,
    before: &inventory_lot::Model,
    after: &inventory_lot::Model,
    event_type: LotHistoryEventType,
    detail: Option<String>,
    inventory_event_id: Option<Uuid>,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<lot_history::Model, ServiceError> {
    lot_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: Set(after.tenant_id),
        lot_id: Set(after.id),
        event_type: Set(event_type),
        qty_before: Set(before.qty_available),
        qty_after: Set(after.qty_available),
        qty_changed: Set(after.qty_available - before.qty_available),
        detail: Set(detail),
        inventory_event_id: Set(inventory_event_id),
        created_by_user_id: Set(user_id),
        created_at: Set(now),
    }
    .insert(conn)
    .await
    .map_err(ServiceError::db_error)
}

/// Lot side of an engine transaction: creates the lot on first receipt,
/// otherwise applies [`apply_to_lot`] and records history.
pub(crate) async fn apply_lot_effects<C: ConnectionTrait>(
    conn: &C,
    ctx: &LotEffectContext<'_>,
) -> Result<LotEffect, ServiceError> {
    let existing = find_lot(conn, ctx.tenant_id, ctx.item_id, ctx.lot_ref).await?;

    match existing {
        Some(lot) => {
            let change = apply_to_lot(&lot, ctx.kind, ctx.qty_base, ctx.rules)?;
            let saved = update_lot(conn, &lot, &change.next, ctx.now).await?;
            append_history(
                conn,
                &lot,
                &saved,
                change.history,
                change.detail,
                Some(ctx.event_id),
                ctx.user_id,
                ctx.now,
            )
            .await?;
            let status_change = (lot.status != saved.status).then_some((lot.status, saved.status));
            Ok(LotEffect {
                lot: saved,
                status_change,
            })
        }
        None => {
            let (to, lot_number) = match (ctx.kind, &ctx.lot_ref.lot_id, &ctx.lot_ref.lot_number) {
                (TxnKind::Receipt { to }, None, Some(number)) => (*to, number.trim().to_string()),
                _ => {
                    return Err(ServiceError::not_found("Lot", ctx.lot_ref.describe()));
                }
            };
            let created = inventory_lot::ActiveModel {
                id: Set(Uuid::new_v4()),
                tenant_id: Set(ctx.tenant_id),
                item_id: Set(ctx.item_id),
                lot_number: Set(lot_number),
                location_id: Set(Some(to)),
                qty_produced: Set(ctx.qty_base),
                qty_available: Set(ctx.qty_base),
                status: Set(LotStatus::Available),
                qc_status: Set(QcStatus::Pending),
                expiration_date: Set(ctx.lot_ref.expiration_date),
                manufacturing_date: Set(ctx.lot_ref.manufacturing_date),
                supplier_id: Set(ctx.lot_ref.supplier_id),
                quarantine_reason: Set(None),
                received_at: Set(ctx.now),
                version: Set(1),
                created_at: Set(ctx.now),
                updated_at: Set(ctx.now),
            }
            .insert(conn)
            .await
            .map_err(ServiceError::db_error)?;

            let empty = inventory_lot::Model {
                qty_available: Decimal::ZERO,
                ..created.clone()
            };
            append_history(
                conn,
                &empty,
                &created,
                LotHistoryEventType::Receipt,
                Some("lot created".to_string()),
                Some(ctx.event_id),
                ctx.user_id,
                ctx.now,
            )
            .await?;
            Ok(LotEffect {
                lot: created,
                status_change: None,
            })
        }
    }
}

/// New lot state, history kind and detail computed by one status/QC write.
type StatusUpdate = (inventory_lot::Model, LotHistoryEventType, Option<String>);

/// Manual lot status and QC operations.
pub struct LotService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    retry_policy: RetryPolicy,
}

impl LotService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, retry_policy: RetryPolicy) -> Self {
        Self {
            db,
            event_sender,
            retry_policy,
        }
    }

    async fn load_for_update(
        txn: &DatabaseTransaction,
        actor: &Actor,
        lot_id: Uuid,
    ) -> Result<inventory_lot::Model, ServiceError> {
        let mut query = inventory_lot::Entity::find_by_id(lot_id);
        if supports_row_locks(txn.get_database_backend()) {
            query = query.lock_exclusive();
        }
        let lot = query
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Lot", lot_id))?;
        actor.ensure_tenant(lot.tenant_id, "Lot")?;
        Ok(lot)
    }

    #[instrument(skip(self, actor), fields(tenant_id = %actor.tenant_id))]
    pub async fn get_lot(&self, actor: &Actor, lot_id: Uuid) -> Result<inventory_lot::Model, ServiceError> {
        let lot = inventory_lot::Entity::find_by_id(lot_id)
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Lot", lot_id))?;
        actor.ensure_tenant(lot.tenant_id, "Lot")?;
        Ok(lot)
    }

    #[instrument(skip(self, actor), fields(tenant_id = %actor.tenant_id))]
    pub async fn find_by_number(
        &self,
        actor: &Actor,
        item_id: Uuid,
        lot_number: &str,
    ) -> Result<inventory_lot::Model, ServiceError> {
        find_lot(
            self.db.as_ref(),
            actor.tenant_id,
            item_id,
            &LotRef::by_number(lot_number),
        )
        .await?
        .ok_or_else(|| ServiceError::not_found("Lot", lot_number))
    }

    /// One attempt of a status/QC write: lock, compute, update, record.
    async fn write_status(
        &self,
        actor: &Actor,
        lot_id: Uuid,
        compute: &(dyn Fn(&inventory_lot::Model) -> Result<StatusUpdate, ServiceError> + Sync),
    ) -> Result<(inventory_lot::Model, inventory_lot::Model), ServiceError> {
        let txn = begin(&self.db).await?;
        let result = async {
            let lot = Self::load_for_update(&txn, actor, lot_id).await?;
            let (next, history, detail) = compute(&lot)?;
            let now = Utc::now();
            let saved = update_lot(&txn, &lot, &next, now).await?;
            append_history(&txn, &lot, &saved, history, detail, None, actor.user_id, now).await?;
            Ok::<_, ServiceError>((lot, saved))
        }
        .await;
        finish(txn, result).await
    }

    async fn transition(
        &self,
        actor: &Actor,
        lot_id: Uuid,
        transition: LotTransition,
        reason: Option<String>,
    ) -> Result<inventory_lot::Model, ServiceError> {
        let today = Utc::now().date_naive();
        let compute = move |lot: &inventory_lot::Model| -> Result<StatusUpdate, ServiceError> {
            let status = next_status(lot, transition, today)?;
            let mut next = lot.clone();
            next.status = status;
            next.quarantine_reason = match transition {
                LotTransition::Quarantine => reason.clone(),
                LotTransition::Release => None,
                LotTransition::Expire => lot.quarantine_reason.clone(),
            };
            let detail = match &reason {
                Some(reason) => format!("{} -> {}: {}", lot.status, status, reason),
                None => format!("{} -> {}", lot.status, status),
            };
            Ok((next, LotHistoryEventType::StatusChange, Some(detail)))
        };

        let compute = &compute;
        let (before, after) = retry_on_conflict(self.retry_policy, "lot_status_change", |_| {
            self.write_status(actor, lot_id, compute)
        })
        .await?;

        info!(
            lot_id = %lot_id,
            lot_number = %after.lot_number,
            old_status = %before.status,
            new_status = %after.status,
            "Lot status changed"
        );
        self.event_sender
            .publish(Event::LotStatusChanged {
                lot_id,
                tenant_id: after.tenant_id,
                old_status: before.status,
                new_status: after.status,
            })
            .await;
        Ok(after)
    }

    #[instrument(skip(self, actor), fields(tenant_id = %actor.tenant_id))]
    pub async fn quarantine(
        &self,
        actor: &Actor,
        lot_id: Uuid,
        reason: &str,
    ) -> Result<inventory_lot::Model, ServiceError> {
        if reason.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "A quarantine reason is required".to_string(),
            ));
        }
        self.transition(actor, lot_id, LotTransition::Quarantine, Some(reason.trim().to_string()))
            .await
    }

    #[instrument(skip(self, actor), fields(tenant_id = %actor.tenant_id))]
    pub async fn release(&self, actor: &Actor, lot_id: Uuid) -> Result<inventory_lot::Model, ServiceError> {
        self.transition(actor, lot_id, LotTransition::Release, None).await
    }

    #[instrument(skip(self, actor), fields(tenant_id = %actor.tenant_id))]
    pub async fn expire(&self, actor: &Actor, lot_id: Uuid) -> Result<inventory_lot::Model, ServiceError> {
        self.transition(actor, lot_id, LotTransition::Expire, None).await
    }

    #[instrument(skip(self, actor, notes), fields(tenant_id = %actor.tenant_id))]
    pub async fn record_qc_result(
        &self,
        actor: &Actor,
        lot_id: Uuid,
        result: QcStatus,
        notes: Option<String>,
    ) -> Result<inventory_lot::Model, ServiceError> {
        let compute = move |lot: &inventory_lot::Model| -> Result<StatusUpdate, ServiceError> {
            let (qc_status, status) = apply_qc_result(lot, result)?;
            let mut next = lot.clone();
            next.qc_status = qc_status;
            if status != lot.status {
                next.status = status;
                next.quarantine_reason = Some("QC failed".to_string());
            }
            let detail = match &notes {
                Some(notes) => format!("QC {}: {}", qc_status, notes),
                None => format!("QC {}", qc_status),
            };
            Ok((next, LotHistoryEventType::QcResult, Some(detail)))
        };

        let compute = &compute;
        let (before, after) = retry_on_conflict(self.retry_policy, "lot_qc_result", |_| {
            self.write_status(actor, lot_id, compute)
        })
        .await?;

        info!(
            lot_id = %lot_id,
            qc_status = %after.qc_status,
            status = %after.status,
            "QC result recorded"
        );
        self.event_sender
            .publish(Event::LotQcRecorded {
                lot_id,
                tenant_id: after.tenant_id,
                qc_status: after.qc_status,
            })
            .await;
        if before.status != after.status {
            self.event_sender
                .publish(Event::LotStatusChanged {
                    lot_id,
                    tenant_id: after.tenant_id,
                    old_status: before.status,
                    new_status: after.status,
                })
                .await;
        }
        Ok(after)
    }

    /// Expires every non-terminal lot of the tenant whose expiration date is
    /// before `as_of`. Each lot is its own transaction.
    #[instrument(skip(self, actor), fields(tenant_id = %actor.tenant_id))]
    pub async fn expire_due_lots(
        &self,
        actor: &Actor,
        as_of: NaiveDate,
    ) -> Result<BatchOutcome<inventory_lot::Model>, ServiceError> {
        let due = inventory_lot::Entity::find()
            .filter(inventory_lot::Column::TenantId.eq(actor.tenant_id))
            .filter(inventory_lot::Column::ExpirationDate.lt(as_of))
            .filter(
                inventory_lot::Column::Status.is_in([LotStatus::Available, LotStatus::Quarantine]),
            )
            .order_by_asc(inventory_lot::Column::ExpirationDate)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        let mut outcome = BatchOutcome::default();
        for lot in due {
            let result = self.expire(actor, lot.id).await;
            if let Err(err) = &result {
                warn!(lot_id = %lot.id, error = %err, "Failed to expire lot");
            }
            outcome.push(result);
        }

        let expired: Vec<Uuid> = outcome
            .lines
            .iter()
            .filter_map(|line| line.value().map(|lot| lot.id))
            .collect();
        if !expired.is_empty() {
            self.event_sender
                .publish(Event::LotsExpired {
                    tenant_id: actor.tenant_id,
                    as_of,
                    lot_ids: expired,
                })
                .await;
        }
        info!(
            expired = outcome.succeeded(),
            failed = outcome.failed(),
            "Expiry sweep finished"
        );
        Ok(outcome)
    }

    #[instrument(skip(self, actor), fields(tenant_id = %actor.tenant_id))]
    pub async fn history(&self, actor: &Actor, lot_id: Uuid) -> Result<Vec<lot_history::Model>, ServiceError> {
        self.get_lot(actor, lot_id).await?;
        lot_history::Entity::find()
            .filter(lot_history::Column::LotId.eq(lot_id))
            .order_by_asc(lot_history::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }
}
