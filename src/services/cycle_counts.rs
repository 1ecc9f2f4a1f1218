//! Cycle counts.
//!
//! A count snapshots the expected balance of each (item, location) line when
//! it starts. Recording a line freezes its variance. Completing the count
//! posts every non-zero variance to the ledger as a COUNT event through the
//! transaction engine, one line at a time; a line that already has a posted
//! event is never posted again.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::TenantInventoryPolicy;
use crate::db::transaction::{begin, finish};
use crate::db::DbPool;
use crate::entities::cycle_count::{self, CycleCountStatus};
use crate::entities::cycle_count_line::{self, CycleCountLineStatus};
use crate::entities::inventory_event::{self, InventoryEventType};
use crate::entities::{inventory_balance, inventory_location};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::audit::{resolve_reason_code, Actor};
use crate::services::inventory_transactions::{
    AdjustDirection, InventoryTxnCommand, TransactionEngine, TxnKind,
};
use crate::services::ledger::InventoryLedger;
use crate::services::uom::{self, UomNormalizer};
use crate::services::BatchOutcome;

/// `reference_type` of COUNT events posted by a cycle count.
pub const CYCLE_COUNT_REFERENCE: &str = "CYCLE_COUNT";

/// One (item, location) to count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CountLineSpec {
    pub item_id: Uuid,
    pub location_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleCountDetail {
    pub count: cycle_count::Model,
    pub lines: Vec<cycle_count_line::Model>,
}

/// Result of a completion attempt. `posted` has one outcome per line that
/// needed posting; the count is COMPLETED only if all of them succeeded.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionReport {
    pub count: cycle_count::Model,
    pub posted: BatchOutcome<Uuid>,
}

pub fn variance(expected: Decimal, counted: Decimal) -> Decimal {
    counted - expected
}

/// The COUNT transaction that reconciles `variance`, or `None` when the line
/// matched. Decreases carry `reason_code_id`.
pub fn reconciling_kind(
    location_id: Uuid,
    variance: Decimal,
    reason_code_id: Option<Uuid>,
) -> Result<Option<(TxnKind, Decimal)>, ServiceError> {
    if variance.is_zero() {
        return Ok(None);
    }
    let direction = if variance > Decimal::ZERO {
        AdjustDirection::Increase
    } else {
        AdjustDirection::Decrease {
            reason_code_id: reason_code_id.ok_or_else(|| {
                ServiceError::MissingReasonCode(
                    "Negative count variance requires a reason code".to_string(),
                )
            })?,
        }
    };
    Ok(Some((
        TxnKind::Count {
            location: location_id,
            direction,
        },
        variance.abs(),
    )))
}

/// PENDING -> COUNTED. The only transition a line has.
pub fn record_line(
    count: &cycle_count::Model,
    line: &cycle_count_line::Model,
    counted_qty_base: Decimal,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<cycle_count_line::Model, ServiceError> {
    if count.status != CycleCountStatus::InProgress {
        return Err(ServiceError::InvalidOperation(format!(
            "Cycle count {} is {}",
            count.id, count.status
        )));
    }
    if line.status != CycleCountLineStatus::Pending {
        return Err(ServiceError::InvalidOperation(format!(
            "Cycle count line {} is already counted",
            line.id
        )));
    }
    if counted_qty_base < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Counted quantity cannot be negative".to_string(),
        ));
    }
    Ok(cycle_count_line::Model {
        counted_qty_base: Some(counted_qty_base),
        variance_qty_base: Some(variance(line.expected_qty_base, counted_qty_base)),
        status: CycleCountLineStatus::Counted,
        counted_by_user_id: Some(user_id),
        counted_at: Some(now),
        ..line.clone()
    })
}

pub struct CycleCountService {
    db: Arc<DbPool>,
    engine: Arc<TransactionEngine>,
    event_sender: Arc<EventSender>,
}

impl CycleCountService {
    pub fn new(db: Arc<DbPool>, engine: Arc<TransactionEngine>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db,
            engine,
            event_sender,
        }
    }

    /// Opens a count at `site_id` with one PENDING line per requested item and location.
    #[instrument(skip(self, actor, lines), fields(tenant_id = %actor.tenant_id, lines = lines.len()))]
    pub async fn start_count(
        &self,
        actor: &Actor,
        site_id: Uuid,
        lines: &[CountLineSpec],
        notes: Option<String>,
    ) -> Result<CycleCountDetail, ServiceError> {
        actor.ensure_site(site_id)?;
        if lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "A cycle count needs at least one line".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = lines.iter().find(|spec| !seen.insert(**spec)) {
            return Err(ServiceError::ValidationError(format!(
                "Item {} at location {} is listed twice",
                dup.item_id, dup.location_id
            )));
        }

        let db = self.db.as_ref();
        for spec in lines {
            let item = UomNormalizer::load_item(db, actor.tenant_id, spec.item_id).await?;
            if item.requires_lot() {
                return Err(ServiceError::ValidationError(format!(
                    "Item {} is lot-tracked; count its lots individually",
                    item.sku
                )));
            }
            let location = inventory_location::Entity::find_by_id(spec.location_id)
                .one(db)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| ServiceError::not_found("Location", spec.location_id))?;
            actor.ensure_tenant(location.tenant_id, "Location")?;
            if location.site_id != site_id {
                return Err(ServiceError::ValidationError(format!(
                    "Location {} is not in site {}",
                    location.code, site_id
                )));
            }
        }

        let now = Utc::now();
        let txn = begin(db).await?;
        let result = async {
            let count = cycle_count::ActiveModel {
                id: Set(Uuid::new_v4()),
                tenant_id: Set(actor.tenant_id),
                site_id: Set(site_id),
                status: Set(CycleCountStatus::InProgress),
                reason_code_id: Set(None),
                notes: Set(notes),
                created_by_user_id: Set(actor.user_id),
                created_at: Set(now),
                completed_at: Set(None),
                version: Set(1),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?;

            let mut saved = Vec::with_capacity(lines.len());
            for spec in lines {
                let expected = snapshot(&txn, actor.tenant_id, spec).await?;
                let line = cycle_count_line::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cycle_count_id: Set(count.id),
                    tenant_id: Set(actor.tenant_id),
                    item_id: Set(spec.item_id),
                    location_id: Set(spec.location_id),
                    expected_qty_base: Set(expected),
                    counted_qty_base: Set(None),
                    variance_qty_base: Set(None),
                    status: Set(CycleCountLineStatus::Pending),
                    counted_by_user_id: Set(None),
                    counted_at: Set(None),
                    posted_event_id: Set(None),
                    version: Set(1),
                    created_at: Set(now),
                }
                .insert(&txn)
                .await
                .map_err(ServiceError::db_error)?;
                saved.push(line);
            }
            Ok::<_, ServiceError>(CycleCountDetail { count, lines: saved })
        }
        .await;
        let detail = finish(txn, result).await?;

        info!(cycle_count_id = %detail.count.id, "Cycle count started");
        Ok(detail)
    }

    #[instrument(skip(self, actor), fields(tenant_id = %actor.tenant_id))]
    pub async fn get_count(&self, actor: &Actor, count_id: Uuid) -> Result<CycleCountDetail, ServiceError> {
        let db = self.db.as_ref();
        let count = load_count(db, actor, count_id).await?;
        let lines = load_lines(db, count_id).await?;
        Ok(CycleCountDetail { count, lines })
    }

    /// Records the counted quantity of one line, entered in `uom`.
    #[instrument(skip(self, actor), fields(tenant_id = %actor.tenant_id))]
    pub async fn record_count(
        &self,
        actor: &Actor,
        count_id: Uuid,
        line_id: Uuid,
        counted_qty: Decimal,
        uom: &str,
    ) -> Result<cycle_count_line::Model, ServiceError> {
        let db = self.db.as_ref();
        let count = load_count(db, actor, count_id).await?;
        let line = cycle_count_line::Entity::find_by_id(line_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .filter(|line| line.cycle_count_id == count_id)
            .ok_or_else(|| ServiceError::not_found("Cycle count line", line_id))?;

        let item = UomNormalizer::load_item(db, actor.tenant_id, line.item_id).await?;
        let counted_qty_base = if counted_qty.is_zero() {
            Decimal::ZERO
        } else if counted_qty < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Counted quantity cannot be negative".to_string(),
            ));
        } else {
            let graph = UomNormalizer::load_graph(db, &item).await?;
            uom::to_base(&item, &graph, counted_qty, uom)?
        };

        let next = record_line(&count, &line, counted_qty_base, actor.user_id, Utc::now())?;
        let result = cycle_count_line::Entity::update_many()
            .set(cycle_count_line::ActiveModel {
                counted_qty_base: Set(next.counted_qty_base),
                variance_qty_base: Set(next.variance_qty_base),
                status: Set(next.status),
                counted_by_user_id: Set(next.counted_by_user_id),
                counted_at: Set(next.counted_at),
                version: Set(line.version + 1),
                ..Default::default()
            })
            .filter(cycle_count_line::Column::Id.eq(line.id))
            .filter(cycle_count_line::Column::Version.eq(line.version))
            .filter(cycle_count_line::Column::Status.eq(CycleCountLineStatus::Pending))
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::InvalidOperation(format!(
                "Cycle count line {} was counted concurrently",
                line.id
            )));
        }

        info!(
            line_id = %line.id,
            variance = ?next.variance_qty_base,
            "Cycle count line counted"
        );
        Ok(cycle_count_line::Model {
            version: line.version + 1,
            ..next
        })
    }

    /// Posts the variances of a fully counted count and closes it. A reason
    /// code is required when any line counted short.
    #[instrument(skip(self, actor), fields(tenant_id = %actor.tenant_id))]
    pub async fn complete_count(
        &self,
        actor: &Actor,
        policy: TenantInventoryPolicy,
        count_id: Uuid,
        reason_code_id: Option<Uuid>,
    ) -> Result<CompletionReport, ServiceError> {
        let db = self.db.as_ref();
        let count = load_count(db, actor, count_id).await?;
        if count.status != CycleCountStatus::InProgress {
            return Err(ServiceError::InvalidOperation(format!(
                "Cycle count {} is {}",
                count.id, count.status
            )));
        }
        let lines = load_lines(db, count_id).await?;
        if let Some(pending) = lines
            .iter()
            .find(|line| line.status == CycleCountLineStatus::Pending)
        {
            return Err(ServiceError::InvalidOperation(format!(
                "Cycle count line {} has not been counted",
                pending.id
            )));
        }
        let short = lines.iter().any(|line| {
            line.needs_posting()
                && line
                    .variance_qty_base
                    .map_or(false, |variance| variance < Decimal::ZERO)
        });
        match reason_code_id {
            Some(reason_code_id) => {
                resolve_reason_code(db, actor.tenant_id, reason_code_id).await?;
            }
            None if short => {
                return Err(ServiceError::MissingReasonCode(
                    "Completing a count with shortages requires a reason code".to_string(),
                ))
            }
            None => {}
        }

        let mut posted = BatchOutcome::default();
        for line in lines.iter().filter(|line| line.needs_posting()) {
            posted.push(self.post_line(actor, policy, &count, line, reason_code_id).await);
        }

        if !posted.all_succeeded() {
            warn!(
                cycle_count_id = %count.id,
                failed = posted.failed(),
                "Cycle count left in progress; some variances were not posted"
            );
            return Ok(CompletionReport { count, posted });
        }

        let now = Utc::now();
        let result = cycle_count::Entity::update_many()
            .set(cycle_count::ActiveModel {
                status: Set(CycleCountStatus::Completed),
                reason_code_id: Set(reason_code_id),
                completed_at: Set(Some(now)),
                version: Set(count.version + 1),
                ..Default::default()
            })
            .filter(cycle_count::Column::Id.eq(count.id))
            .filter(cycle_count::Column::Version.eq(count.version))
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::StorageConflict(format!(
                "Cycle count {} changed concurrently",
                count.id
            )));
        }
        let count = cycle_count::Model {
            status: CycleCountStatus::Completed,
            reason_code_id,
            completed_at: Some(now),
            version: count.version + 1,
            ..count
        };

        let posted_event_ids: Vec<Uuid> = posted
            .lines
            .iter()
            .filter_map(|outcome| outcome.value().copied())
            .collect();
        info!(
            cycle_count_id = %count.id,
            posted = posted_event_ids.len(),
            "Cycle count completed"
        );
        self.event_sender
            .publish(Event::CycleCountCompleted {
                cycle_count_id: count.id,
                tenant_id: count.tenant_id,
                site_id: count.site_id,
                posted_event_ids,
            })
            .await;

        Ok(CompletionReport { count, posted })
    }

    /// Cancels a count on which nothing has been posted.
    #[instrument(skip(self, actor), fields(tenant_id = %actor.tenant_id))]
    pub async fn cancel_count(&self, actor: &Actor, count_id: Uuid) -> Result<cycle_count::Model, ServiceError> {
        let db = self.db.as_ref();
        let count = load_count(db, actor, count_id).await?;
        if count.status != CycleCountStatus::InProgress {
            return Err(ServiceError::InvalidOperation(format!(
                "Cycle count {} is {}",
                count.id, count.status
            )));
        }
        let lines = load_lines(db, count_id).await?;
        if lines.iter().any(|line| line.posted_event_id.is_some()) {
            return Err(ServiceError::InvalidOperation(format!(
                "Cycle count {} has posted variances",
                count.id
            )));
        }

        let result = cycle_count::Entity::update_many()
            .set(cycle_count::ActiveModel {
                status: Set(CycleCountStatus::Cancelled),
                version: Set(count.version + 1),
                ..Default::default()
            })
            .filter(cycle_count::Column::Id.eq(count.id))
            .filter(cycle_count::Column::Version.eq(count.version))
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::StorageConflict(format!(
                "Cycle count {} changed concurrently",
                count.id
            )));
        }
        info!(cycle_count_id = %count.id, "Cycle count cancelled");
        Ok(cycle_count::Model {
            status: CycleCountStatus::Cancelled,
            version: count.version + 1,
            ..count
        })
    }

    /// Posts one line's variance unless an earlier attempt already did, then
    /// records the event on the line.
    async fn post_line(
        &self,
        actor: &Actor,
        policy: TenantInventoryPolicy,
        count: &cycle_count::Model,
        line: &cycle_count_line::Model,
        reason_code_id: Option<Uuid>,
    ) -> Result<Uuid, ServiceError> {
        let db = self.db.as_ref();
        let reference_id = count.id.to_string();
        let existing = InventoryLedger::find_posted(
            db,
            count.tenant_id,
            InventoryEventType::Count,
            CYCLE_COUNT_REFERENCE,
            &reference_id,
            line.item_id,
            line.location_id,
        )
        .await?;

        let event_id = match existing {
            Some(event) => event.id,
            None => {
                let variance = line.variance_qty_base.unwrap_or(Decimal::ZERO);
                let (kind, qty) = match reconciling_kind(line.location_id, variance, reason_code_id)? {
                    Some(plan) => plan,
                    None => {
                        return Err(ServiceError::InternalError(format!(
                            "Cycle count line {} has nothing to post",
                            line.id
                        )))
                    }
                };
                let item = UomNormalizer::load_item(db, count.tenant_id, line.item_id).await?;
                let mut command = InventoryTxnCommand::new(kind, line.item_id, qty, item.base_uom)
                    .with_reference(CYCLE_COUNT_REFERENCE, reference_id.as_str())
                    .with_notes(format!("cycle count line {}", line.id));
                if let Some(reason_code_id) = reason_code_id {
                    command = command.with_reason(reason_code_id);
                }
                let event: inventory_event::Model = self.engine.apply(actor, policy, &command).await?;
                event.id
            }
        };

        let result = cycle_count_line::Entity::update_many()
            .set(cycle_count_line::ActiveModel {
                posted_event_id: Set(Some(event_id)),
                version: Set(line.version + 1),
                ..Default::default()
            })
            .filter(cycle_count_line::Column::Id.eq(line.id))
            .filter(cycle_count_line::Column::Version.eq(line.version))
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::StorageConflict(format!(
                "Cycle count line {} changed concurrently",
                line.id
            )));
        }
        Ok(event_id)
    }
}

async fn load_count<C: ConnectionTrait>(
    conn: &C,
    actor: &Actor,
    count_id: Uuid,
) -> Result<cycle_count::Model, ServiceError> {
    let count = cycle_count::Entity::find_by_id(count_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found("Cycle count", count_id))?;
    actor.ensure_tenant(count.tenant_id, "Cycle count")?;
    actor.ensure_site(count.site_id)?;
    Ok(count)
}

async fn load_lines<C: ConnectionTrait>(
    conn: &C,
    count_id: Uuid,
) -> Result<Vec<cycle_count_line::Model>, ServiceError> {
    cycle_count_line::Entity::find()
        .filter(cycle_count_line::Column::CycleCountId.eq(count_id))
        .order_by_asc(cycle_count_line::Column::CreatedAt)
        .order_by_asc(cycle_count_line::Column::Id)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

async fn snapshot<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    spec: &CountLineSpec,
) -> Result<Decimal, ServiceError> {
    let balance = inventory_balance::Entity::find()
        .filter(inventory_balance::Column::TenantId.eq(tenant_id))
        .filter(inventory_balance::Column::ItemId.eq(spec.item_id))
        .filter(inventory_balance::Column::LocationId.eq(spec.location_id))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(balance.map_or(Decimal::ZERO, |row| row.qty_base))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn count(status: CycleCountStatus) -> cycle_count::Model {
        cycle_count::Model {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            site_id: Uuid::new_v4(),
            status,
            reason_code_id: None,
            notes: None,
            created_by_user_id: Uuid::new_v4(),
            created_at: Utc::now(),
            completed_at: None,
            version: 1,
        }
    }

    fn line(count: &cycle_count::Model, expected: Decimal) -> cycle_count_line::Model {
        cycle_count_line::Model {
            id: Uuid::new_v4(),
            cycle_count_id: count.id,
            tenant_id: count.tenant_id,
            item_id: Uuid::new_v4(),
            location_id: Uuid::new_v4(),
            expected_qty_base: expected,
            counted_qty_base: None,
            variance_qty_base: None,
            status: CycleCountLineStatus::Pending,
            counted_by_user_id: None,
            counted_at: None,
            posted_event_id: None,
            version: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn recording_freezes_variance() {
        let count = count(CycleCountStatus::InProgress);
        let pending = line(&count, dec!(10));
        let counted = record_line(&count, &pending, dec!(7), Uuid::new_v4(), Utc::now()).unwrap();

        assert_eq!(counted.status, CycleCountLineStatus::Counted);
        assert_eq!(counted.variance_qty_base, Some(dec!(-3)));
        assert!(counted.needs_posting());

        assert_matches!(
            record_line(&count, &counted, dec!(10), Uuid::new_v4(), Utc::now()),
            Err(ServiceError::InvalidOperation(_))
        );
    }

    #[test]
    fn lines_of_closed_counts_cannot_be_recorded() {
        let count = count(CycleCountStatus::Cancelled);
        let pending = line(&count, dec!(1));
        assert_matches!(
            record_line(&count, &pending, dec!(1), Uuid::new_v4(), Utc::now()),
            Err(ServiceError::InvalidOperation(_))
        );
    }

    #[test]
    fn matching_count_needs_no_posting() {
        let count = count(CycleCountStatus::InProgress);
        let pending = line(&count, dec!(4));
        let counted = record_line(&count, &pending, dec!(4), Uuid::new_v4(), Utc::now()).unwrap();
        assert!(!counted.needs_posting());
        assert_eq!(reconciling_kind(counted.location_id, dec!(0), None).unwrap(), None);
    }

    #[test]
    fn shortage_posts_count_decrease_with_reason() {
        let location = Uuid::new_v4();
        let reason = Uuid::new_v4();
        let (kind, qty) = reconciling_kind(location, dec!(-2.5), Some(reason))
            .unwrap()
            .unwrap();
        assert_eq!(qty, dec!(2.5));
        assert_eq!(kind.from_location(), Some(location));
        assert_eq!(kind.decrease_reason(), Some(reason));

        assert_matches!(
            reconciling_kind(location, dec!(-1), None),
            Err(ServiceError::MissingReasonCode(_))
        );
    }

    #[test]
    fn overage_posts_count_increase() {
        let location = Uuid::new_v4();
        let (kind, qty) = reconciling_kind(location, dec!(3), None).unwrap().unwrap();
        assert_eq!(qty, dec!(3));
        assert_eq!(kind.to_location(), Some(location));
        assert_eq!(kind.event_type(), InventoryEventType::Count);
    }
}
