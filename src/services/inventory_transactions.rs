//! Inventory transaction engine.
//!
//! A transaction is validated in full before anything is written: shape,
//! unit conversion, locations, tenant and site membership, reason code and
//! lot rules. The write step then runs in one database transaction: read the
//! current balances, plan the deltas against the tenant policy, apply lot
//! effects, append the ledger row and write the balances. A storage conflict
//! re-runs only the write step, which re-reads every balance it depends on.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{ConnectionTrait, DatabaseTransaction, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::cache::{BalanceCache, BalanceKey};
use crate::config::TenantInventoryPolicy;
use crate::db::transaction::{begin, finish, retry_on_conflict, RetryPolicy};
use crate::db::DbPool;
use crate::entities::inventory_event::{self, InventoryEventType};
use crate::entities::inventory_lot::LotStatus;
use crate::entities::{inventory_balance, inventory_location, item_master};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::audit::{resolve_reason_code, Actor, AuditStamp};
use crate::services::balances::BalanceStore;
use crate::services::ledger::InventoryLedger;
use crate::services::lots::{apply_lot_effects, LotEffectContext, LotRef, LotRules};
use crate::services::uom::{self, UomNormalizer};

/// Direction of an ADJUST or COUNT. A decrease cannot be expressed without a
/// reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustDirection {
    Increase,
    Decrease { reason_code_id: Uuid },
}

/// Transaction type together with the locations it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxnKind {
    Receipt { to: Uuid },
    Issue { from: Uuid },
    Move { from: Uuid, to: Uuid },
    Transfer { from: Uuid, to: Uuid },
    Adjust { location: Uuid, direction: AdjustDirection },
    Count { location: Uuid, direction: AdjustDirection },
}

impl TxnKind {
    pub fn event_type(&self) -> InventoryEventType {
        match self {
            TxnKind::Receipt { .. } => InventoryEventType::Receipt,
            TxnKind::Issue { .. } => InventoryEventType::Issue,
            TxnKind::Move { .. } => InventoryEventType::Move,
            TxnKind::Transfer { .. } => InventoryEventType::Transfer,
            TxnKind::Adjust { .. } => InventoryEventType::Adjust,
            TxnKind::Count { .. } => InventoryEventType::Count,
        }
    }

    /// Ledger `from_location_id`. ADJUST and COUNT decreases debit their location.
    pub fn from_location(&self) -> Option<Uuid> {
        match *self {
            TxnKind::Issue { from }
            | TxnKind::Move { from, .. }
            | TxnKind::Transfer { from, .. } => Some(from),
            TxnKind::Adjust {
                location,
                direction: AdjustDirection::Decrease { .. },
            }
            | TxnKind::Count {
                location,
                direction: AdjustDirection::Decrease { .. },
            } => Some(location),
            _ => None,
        }
    }

    /// Ledger `to_location_id`. ADJUST and COUNT increases credit their location.
    pub fn to_location(&self) -> Option<Uuid> {
        match *self {
            TxnKind::Receipt { to } | TxnKind::Move { to, .. } | TxnKind::Transfer { to, .. } => {
                Some(to)
            }
            TxnKind::Adjust {
                location,
                direction: AdjustDirection::Increase,
            }
            | TxnKind::Count {
                location,
                direction: AdjustDirection::Increase,
            } => Some(location),
            _ => None,
        }
    }

    pub fn locations(&self) -> Vec<Uuid> {
        self.from_location()
            .into_iter()
            .chain(self.to_location())
            .collect()
    }

    /// Signed balance deltas for `qty_base`, source first.
    pub fn deltas(&self, qty_base: Decimal) -> Vec<(Uuid, Decimal)> {
        self.from_location()
            .map(|from| (from, -qty_base))
            .into_iter()
            .chain(self.to_location().map(|to| (to, qty_base)))
            .collect()
    }

    pub fn decrease_reason(&self) -> Option<Uuid> {
        match self {
            TxnKind::Adjust {
                direction: AdjustDirection::Decrease { reason_code_id },
                ..
            }
            | TxnKind::Count {
                direction: AdjustDirection::Decrease { reason_code_id },
                ..
            } => Some(*reason_code_id),
            _ => None,
        }
    }
}

/// Flat direction as it arrives in a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Increase,
    Decrease,
}

/// Request body for applying one inventory transaction.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InventoryTxnRequest {
    pub event_type: InventoryEventType,
    pub item_id: Uuid,
    #[validate(custom = "validate_positive_qty")]
    pub qty: Decimal,
    #[validate(length(min = 1, max = 16))]
    pub uom: String,
    pub from_location_id: Option<Uuid>,
    pub to_location_id: Option<Uuid>,
    pub direction: Option<Direction>,
    pub reason_code_id: Option<Uuid>,
    pub lot_id: Option<Uuid>,
    #[validate(length(min = 1, max = 64))]
    pub lot_number: Option<String>,
    pub expiration_date: Option<NaiveDate>,
    pub manufacturing_date: Option<NaiveDate>,
    pub supplier_id: Option<Uuid>,
    #[validate(length(max = 64))]
    pub reference_type: Option<String>,
    #[validate(length(max = 128))]
    pub reference_id: Option<String>,
    pub workcell_id: Option<String>,
    pub device_id: Option<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

fn validate_positive_qty(qty: &Decimal) -> Result<(), ValidationError> {
    if *qty > Decimal::ZERO {
        Ok(())
    } else {
        let mut err = ValidationError::new("qty");
        err.message = Some("Quantity must be greater than zero".into());
        Err(err)
    }
}

/// A fully typed inventory transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryTxnCommand {
    pub kind: TxnKind,
    pub item_id: Uuid,
    pub qty_entered: Decimal,
    pub uom_entered: String,
    pub lot: Option<LotRef>,
    /// Reason for transactions other than ADJUST/COUNT decreases, which carry
    /// theirs in [`AdjustDirection::Decrease`]
    pub reason_code_id: Option<Uuid>,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub workcell_id: Option<String>,
    pub device_id: Option<String>,
    pub notes: Option<String>,
}

impl InventoryTxnCommand {
    pub fn new(kind: TxnKind, item_id: Uuid, qty_entered: Decimal, uom_entered: impl Into<String>) -> Self {
        Self {
            kind,
            item_id,
            qty_entered,
            uom_entered: uom_entered.into(),
            lot: None,
            reason_code_id: None,
            reference_type: None,
            reference_id: None,
            workcell_id: None,
            device_id: None,
            notes: None,
        }
    }

    pub fn with_lot(mut self, lot: LotRef) -> Self {
        self.lot = Some(lot);
        self
    }

    pub fn with_reason(mut self, reason_code_id: Uuid) -> Self {
        self.reason_code_id = Some(reason_code_id);
        self
    }

    pub fn with_reference(mut self, reference_type: impl Into<String>, reference_id: impl Into<String>) -> Self {
        self.reference_type = Some(reference_type.into());
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn with_station(mut self, workcell_id: Option<String>, device_id: Option<String>) -> Self {
        self.workcell_id = workcell_id;
        self.device_id = device_id;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn event_type(&self) -> InventoryEventType {
        self.kind.event_type()
    }

    /// Reason code recorded on the ledger row.
    pub fn effective_reason(&self) -> Option<Uuid> {
        self.kind.decrease_reason().or(self.reason_code_id)
    }

    fn has_reference(&self) -> bool {
        self.reference_id
            .as_deref()
            .map_or(false, |reference| !reference.trim().is_empty())
    }

    /// Checks that need no storage access.
    pub fn check_shape(&self) -> Result<(), ServiceError> {
        if self.qty_entered <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Quantity must be greater than zero".to_string(),
            ));
        }
        if self.uom_entered.trim().is_empty() {
            return Err(ServiceError::ValidationError("Unit of measure is required".to_string()));
        }
        match self.kind {
            TxnKind::Move { from, to } | TxnKind::Transfer { from, to } if from == to => {
                return Err(ServiceError::ValidationError(format!(
                    "{} source and destination must differ",
                    self.event_type()
                )));
            }
            TxnKind::Issue { .. } if !self.has_reference() && self.reason_code_id.is_none() => {
                return Err(ServiceError::MissingReasonCode(
                    "ISSUE without a document reference requires a reason code".to_string(),
                ));
            }
            _ => {}
        }
        if let Some(lot) = &self.lot {
            if lot.is_empty() {
                return Err(ServiceError::ValidationError(
                    "Lot reference needs a lot id or lot number".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn required(location: Option<Uuid>, event_type: InventoryEventType, field: &str) -> Result<Uuid, ServiceError> {
    location.ok_or_else(|| ServiceError::ValidationError(format!("{} requires {}", event_type, field)))
}

fn forbidden(location: Option<Uuid>, event_type: InventoryEventType, field: &str) -> Result<(), ServiceError> {
    match location {
        Some(_) => Err(ServiceError::ValidationError(format!(
            "{} must not set {}",
            event_type, field
        ))),
        None => Ok(()),
    }
}

impl TryFrom<InventoryTxnRequest> for InventoryTxnCommand {
    type Error = ServiceError;

    fn try_from(request: InventoryTxnRequest) -> Result<Self, Self::Error> {
        request.validate()?;
        let event_type = request.event_type;
        let from = request.from_location_id;
        let to = request.to_location_id;

        let kind = match event_type {
            InventoryEventType::Receipt => {
                forbidden(from, event_type, "from_location_id")?;
                TxnKind::Receipt {
                    to: required(to, event_type, "to_location_id")?,
                }
            }
            InventoryEventType::Issue => {
                forbidden(to, event_type, "to_location_id")?;
                TxnKind::Issue {
                    from: required(from, event_type, "from_location_id")?,
                }
            }
            InventoryEventType::Move | InventoryEventType::Transfer => {
                let from = required(from, event_type, "from_location_id")?;
                let to = required(to, event_type, "to_location_id")?;
                if event_type == InventoryEventType::Move {
                    TxnKind::Move { from, to }
                } else {
                    TxnKind::Transfer { from, to }
                }
            }
            InventoryEventType::Adjust | InventoryEventType::Count => {
                let direction = match request.direction {
                    Some(Direction::Increase) => AdjustDirection::Increase,
                    Some(Direction::Decrease) => AdjustDirection::Decrease {
                        reason_code_id: request.reason_code_id.ok_or_else(|| {
                            ServiceError::MissingReasonCode(format!(
                                "{} decrease requires a reason code",
                                event_type
                            ))
                        })?,
                    },
                    None => {
                        return Err(ServiceError::ValidationError(format!(
                            "{} requires a direction",
                            event_type
                        )))
                    }
                };
                let location = match (from, to) {
                    (Some(location), None) | (None, Some(location)) => location,
                    _ => {
                        return Err(ServiceError::ValidationError(format!(
                            "{} requires exactly one location",
                            event_type
                        )))
                    }
                };
                if event_type == InventoryEventType::Adjust {
                    TxnKind::Adjust { location, direction }
                } else {
                    TxnKind::Count { location, direction }
                }
            }
        };

        let lot = if request.lot_id.is_some() || request.lot_number.is_some() {
            Some(LotRef {
                lot_id: request.lot_id,
                lot_number: request.lot_number,
                expiration_date: request.expiration_date,
                manufacturing_date: request.manufacturing_date,
                supplier_id: request.supplier_id,
            })
        } else {
            None
        };

        let command = InventoryTxnCommand {
            kind,
            item_id: request.item_id,
            qty_entered: request.qty,
            uom_entered: request.uom,
            lot,
            reason_code_id: request.reason_code_id,
            reference_type: request.reference_type,
            reference_id: request.reference_id,
            workcell_id: request.workcell_id,
            device_id: request.device_id,
            notes: request.notes,
        };
        command.check_shape()?;
        Ok(command)
    }
}

/// Balance change planned for one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedDelta {
    pub location_id: Uuid,
    pub current: Decimal,
    pub delta: Decimal,
    pub new_qty: Decimal,
}

/// Plans the balance changes of `kind` for `qty_base` against the balances in
/// `current` (missing locations count as zero). A debit that would leave a
/// location below zero fails unless the policy allows negative inventory.
pub fn plan_deltas(
    kind: &TxnKind,
    qty_base: Decimal,
    current: &HashMap<Uuid, Decimal>,
    policy: TenantInventoryPolicy,
) -> Result<Vec<PlannedDelta>, ServiceError> {
    kind.deltas(qty_base)
        .into_iter()
        .map(|(location_id, delta)| {
            let current = current.get(&location_id).copied().unwrap_or(Decimal::ZERO);
            let new_qty = current
                .checked_add(delta)
                .ok_or_else(|| ServiceError::ValidationError("Quantity out of range".to_string()))?;
            if delta < Decimal::ZERO && new_qty < Decimal::ZERO && !policy.allow_negative_inventory {
                return Err(ServiceError::InsufficientBalance {
                    location_id,
                    lot_id: None,
                    available: current,
                    requested: -delta,
                });
            }
            Ok(PlannedDelta {
                location_id,
                current,
                delta,
                new_qty,
            })
        })
        .collect()
}

/// Everything validated before the write step.
struct PreparedTxn<'a> {
    command: &'a InventoryTxnCommand,
    tenant_id: Uuid,
    site_id: Uuid,
    item: item_master::Model,
    qty_base: Decimal,
    /// location id -> site id
    location_sites: HashMap<Uuid, Uuid>,
    stamp: AuditStamp,
}

/// What a committed write step produced.
struct WriteOutcome {
    event: inventory_event::Model,
    balances: Vec<inventory_balance::Model>,
    lot_status_change: Option<(Uuid, LotStatus, LotStatus)>,
}

pub struct TransactionEngine {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    cache: BalanceCache,
    retry_policy: RetryPolicy,
}

impl TransactionEngine {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        cache: BalanceCache,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            db,
            event_sender,
            cache,
            retry_policy,
        }
    }

    /// Validates and applies a request body.
    pub async fn apply_request(
        &self,
        actor: &Actor,
        policy: TenantInventoryPolicy,
        request: InventoryTxnRequest,
    ) -> Result<inventory_event::Model, ServiceError> {
        let command = InventoryTxnCommand::try_from(request)?;
        self.apply(actor, policy, &command).await
    }

    /// `applyInventoryTxn`: appends one ledger row and updates the affected
    /// balances atomically. Returns the ledger row.
    #[instrument(
        skip(self, actor, command),
        fields(
            tenant_id = %actor.tenant_id,
            event_type = %command.event_type(),
            item_id = %command.item_id
        )
    )]
    pub async fn apply(
        &self,
        actor: &Actor,
        policy: TenantInventoryPolicy,
        command: &InventoryTxnCommand,
    ) -> Result<inventory_event::Model, ServiceError> {
        let prepared = match self.prepare(actor, command).await {
            Ok(prepared) => prepared,
            Err(err) => {
                warn!(error = %err, kind = err.kind(), "Inventory transaction rejected");
                return Err(err);
            }
        };

        let prepared = &prepared;
        let outcome = retry_on_conflict(self.retry_policy, "apply_inventory_txn", |_| {
            self.write_once(prepared, policy)
        })
        .await
        .map_err(|err| {
            warn!(error = %err, kind = err.kind(), "Inventory transaction failed");
            err
        })?;

        for balance in &outcome.balances {
            self.cache.invalidate(&BalanceKey::new(
                balance.tenant_id,
                balance.item_id,
                balance.location_id,
            ));
        }

        let event = outcome.event;
        info!(
            event_id = %event.id,
            qty_base = %event.qty_base,
            from_location_id = ?event.from_location_id,
            to_location_id = ?event.to_location_id,
            lot_id = ?event.lot_id,
            "Inventory transaction applied"
        );

        self.event_sender
            .publish(Event::InventoryTransactionApplied {
                event_id: event.id,
                tenant_id: event.tenant_id,
                site_id: event.site_id,
                item_id: event.item_id,
                event_type: event.event_type,
                qty_base: event.qty_base,
                from_location_id: event.from_location_id,
                to_location_id: event.to_location_id,
                lot_id: event.lot_id,
            })
            .await;
        if let Some((lot_id, old_status, new_status)) = outcome.lot_status_change {
            self.event_sender
                .publish(Event::LotStatusChanged {
                    lot_id,
                    tenant_id: event.tenant_id,
                    old_status,
                    new_status,
                })
                .await;
        }

        Ok(event)
    }

    /// Validation that never writes.
    async fn prepare<'a>(
        &self,
        actor: &Actor,
        command: &'a InventoryTxnCommand,
    ) -> Result<PreparedTxn<'a>, ServiceError> {
        command.check_shape()?;
        let db = self.db.as_ref();

        let item = UomNormalizer::load_item(db, actor.tenant_id, command.item_id).await?;
        let graph = UomNormalizer::load_graph(db, &item).await?;
        let qty_base = uom::to_base(&item, &graph, command.qty_entered, &command.uom_entered)?;

        let mut location_sites = HashMap::new();
        for location_id in command.kind.locations() {
            let location = load_location(db, actor, location_id).await?;
            location_sites.insert(location.id, location.site_id);
        }
        let site_of = |location_id: Uuid| {
            location_sites
                .get(&location_id)
                .copied()
                .ok_or_else(|| ServiceError::not_found("Location", location_id))
        };
        let site_id = match command.kind {
            TxnKind::Move { from, to } => {
                let site_id = site_of(from)?;
                if site_of(to)? != site_id {
                    return Err(ServiceError::ValidationError(
                        "MOVE must stay within one site; use TRANSFER between sites".to_string(),
                    ));
                }
                site_id
            }
            _ => {
                let primary = command
                    .kind
                    .from_location()
                    .or_else(|| command.kind.to_location())
                    .ok_or_else(|| ServiceError::InternalError("transaction without a location".to_string()))?;
                site_of(primary)?
            }
        };

        if let Some(reason_code_id) = command.effective_reason() {
            resolve_reason_code(db, actor.tenant_id, reason_code_id).await?;
        }

        match (&command.lot, item.requires_lot()) {
            (None, true) => {
                return Err(ServiceError::ValidationError(format!(
                    "Item {} is lot-tracked; a lot is required",
                    item.sku
                )))
            }
            (Some(_), false) => {
                return Err(ServiceError::ValidationError(format!(
                    "Item {} is not lot-tracked",
                    item.sku
                )))
            }
            _ => {}
        }
        if item.serial_tracked && qty_base != Decimal::ONE {
            return Err(ServiceError::ValidationError(format!(
                "Item {} is serial-tracked; each serial is one unit",
                item.sku
            )));
        }

        let stamp = AuditStamp::new(actor, command.effective_reason())
            .with_station(command.workcell_id.clone(), command.device_id.clone());

        Ok(PreparedTxn {
            command,
            tenant_id: actor.tenant_id,
            site_id,
            item,
            qty_base,
            location_sites,
            stamp,
        })
    }

    /// One attempt of the atomic write step in its own transaction.
    async fn write_once(
        &self,
        prepared: &PreparedTxn<'_>,
        policy: TenantInventoryPolicy,
    ) -> Result<WriteOutcome, ServiceError> {
        let txn = begin(&self.db).await?;
        let result = Self::write_step(&txn, prepared, policy).await;
        finish(txn, result).await
    }

    async fn write_step(
        txn: &DatabaseTransaction,
        prepared: &PreparedTxn<'_>,
        policy: TenantInventoryPolicy,
    ) -> Result<WriteOutcome, ServiceError> {
        let command = prepared.command;
        let kind = &command.kind;
        let item_id = prepared.item.id;

        let event_id = Uuid::new_v4();
        let now = Utc::now();

        // Lot errors take precedence over balance shortfalls.
        let lot_effect = match &command.lot {
            Some(lot_ref) => Some(
                apply_lot_effects(
                    txn,
                    &LotEffectContext {
                        tenant_id: prepared.tenant_id,
                        item_id,
                        kind,
                        lot_ref,
                        qty_base: prepared.qty_base,
                        rules: LotRules {
                            serial_tracked: prepared.item.serial_tracked,
                            today: now.date_naive(),
                        },
                        event_id,
                        user_id: prepared.stamp.user_id,
                        now,
                    },
                )
                .await?,
            ),
            None => None,
        };

        let mut rows = HashMap::new();
        let mut current = HashMap::new();
        for location_id in kind.locations() {
            let row =
                BalanceStore::fetch_for_update(txn, prepared.tenant_id, item_id, location_id).await?;
            current.insert(location_id, row.as_ref().map_or(Decimal::ZERO, |r| r.qty_base));
            rows.insert(location_id, row);
        }
        let plan = plan_deltas(kind, prepared.qty_base, &current, policy)?;

        let event = InventoryLedger::append(
            txn,
            inventory_event::ActiveModel {
                id: Set(event_id),
                tenant_id: Set(prepared.tenant_id),
                site_id: Set(prepared.site_id),
                event_type: Set(kind.event_type()),
                item_id: Set(item_id),
                from_location_id: Set(kind.from_location()),
                to_location_id: Set(kind.to_location()),
                lot_id: Set(lot_effect.as_ref().map(|effect| effect.lot.id)),
                qty_entered: Set(command.qty_entered),
                uom_entered: Set(command.uom_entered.trim().to_ascii_uppercase()),
                qty_base: Set(prepared.qty_base),
                reference_type: Set(command.reference_type.clone()),
                reference_id: Set(command.reference_id.clone()),
                reason_code_id: Set(prepared.stamp.reason_code_id),
                created_by_user_id: Set(prepared.stamp.user_id),
                workcell_id: Set(prepared.stamp.workcell_id.clone()),
                device_id: Set(prepared.stamp.device_id.clone()),
                notes: Set(command.notes.clone()),
                created_at: Set(now),
            },
        )
        .await?;

        let mut balances = Vec::with_capacity(plan.len());
        for delta in &plan {
            let site_id = prepared
                .location_sites
                .get(&delta.location_id)
                .copied()
                .unwrap_or(prepared.site_id);
            let existing = rows.get(&delta.location_id).and_then(Option::as_ref);
            let saved = BalanceStore::write_balance(
                txn,
                BalanceKey::new(prepared.tenant_id, item_id, delta.location_id),
                site_id,
                existing,
                delta.new_qty,
            )
            .await?;
            balances.push(saved);
        }

        let lot_status_change = lot_effect.and_then(|effect| {
            effect
                .status_change
                .map(|(old, new)| (effect.lot.id, old, new))
        });

        Ok(WriteOutcome {
            event,
            balances,
            lot_status_change,
        })
    }
}

async fn load_location<C: ConnectionTrait>(
    conn: &C,
    actor: &Actor,
    location_id: Uuid,
) -> Result<inventory_location::Model, ServiceError> {
    let location = inventory_location::Entity::find_by_id(location_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found("Location", location_id))?;
    actor.ensure_tenant(location.tenant_id, "Location")?;
    actor.ensure_site(location.site_id)?;
    if !location.active {
        return Err(ServiceError::ValidationError(format!(
            "Location {} is inactive",
            location.code
        )));
    }
    Ok(location)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(event_type: InventoryEventType) -> InventoryTxnRequest {
        InventoryTxnRequest {
            event_type,
            item_id: Uuid::new_v4(),
            qty: dec!(5),
            uom: "EA".into(),
            from_location_id: None,
            to_location_id: None,
            direction: None,
            reason_code_id: None,
            lot_id: None,
            lot_number: None,
            expiration_date: None,
            manufacturing_date: None,
            supplier_id: None,
            reference_type: None,
            reference_id: None,
            workcell_id: None,
            device_id: None,
            notes: None,
        }
    }

    #[test]
    fn receipt_needs_destination_only() {
        let mut req = request(InventoryEventType::Receipt);
        assert!(InventoryTxnCommand::try_from(req.clone()).is_err());

        let to = Uuid::new_v4();
        req.to_location_id = Some(to);
        let cmd = InventoryTxnCommand::try_from(req.clone()).unwrap();
        assert_eq!(cmd.kind, TxnKind::Receipt { to });

        req.from_location_id = Some(Uuid::new_v4());
        assert!(matches!(
            InventoryTxnCommand::try_from(req),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn move_requires_distinct_locations() {
        let a = Uuid::new_v4();
        let mut req = request(InventoryEventType::Move);
        req.from_location_id = Some(a);
        req.to_location_id = Some(a);
        assert!(matches!(
            InventoryTxnCommand::try_from(req),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn adjust_decrease_without_reason_is_missing_reason_code() {
        let mut req = request(InventoryEventType::Adjust);
        req.from_location_id = Some(Uuid::new_v4());
        req.direction = Some(Direction::Decrease);
        assert!(matches!(
            InventoryTxnCommand::try_from(req),
            Err(ServiceError::MissingReasonCode(_))
        ));
    }

    #[test]
    fn decrease_without_reason_wins_over_missing_location() {
        for event_type in [InventoryEventType::Adjust, InventoryEventType::Count] {
            let mut req = request(event_type);
            req.direction = Some(Direction::Decrease);
            assert!(matches!(
                InventoryTxnCommand::try_from(req),
                Err(ServiceError::MissingReasonCode(_))
            ));
        }
    }

    #[test]
    fn adjust_direction_is_encoded_by_location_side() {
        let loc = Uuid::new_v4();
        let reason = Uuid::new_v4();
        let mut req = request(InventoryEventType::Adjust);
        req.to_location_id = Some(loc);
        req.direction = Some(Direction::Decrease);
        req.reason_code_id = Some(reason);
        let cmd = InventoryTxnCommand::try_from(req).unwrap();

        assert_eq!(cmd.kind.from_location(), Some(loc));
        assert_eq!(cmd.kind.to_location(), None);
        assert_eq!(cmd.effective_reason(), Some(reason));
        assert_eq!(cmd.kind.deltas(dec!(3)), vec![(loc, dec!(-3))]);
    }

    #[test]
    fn issue_without_reference_needs_reason() {
        let mut req = request(InventoryEventType::Issue);
        req.from_location_id = Some(Uuid::new_v4());
        assert!(matches!(
            InventoryTxnCommand::try_from(req.clone()),
            Err(ServiceError::MissingReasonCode(_))
        ));
        req.reference_type = Some("PRODUCTION_ORDER".into());
        req.reference_id = Some("PO-1".into());
        assert!(InventoryTxnCommand::try_from(req).is_ok());
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        let mut req = request(InventoryEventType::Receipt);
        req.to_location_id = Some(Uuid::new_v4());
        req.qty = dec!(0);
        assert!(matches!(
            InventoryTxnCommand::try_from(req),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn issue_beyond_balance_fails_under_strict_policy() {
        let a = Uuid::new_v4();
        let current = HashMap::from([(a, dec!(10))]);
        let err = plan_deltas(
            &TxnKind::Issue { from: a },
            dec!(15),
            &current,
            TenantInventoryPolicy::strict(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InsufficientBalance { available, requested, .. }
                if available == dec!(10) && requested == dec!(15)
        ));

        let plan = plan_deltas(
            &TxnKind::Issue { from: a },
            dec!(15),
            &current,
            TenantInventoryPolicy::allowing_negative(),
        )
        .unwrap();
        assert_eq!(plan[0].new_qty, dec!(-5));
    }

    #[test]
    fn move_plans_both_sides() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let current = HashMap::from([(a, dec!(10))]);
        let plan = plan_deltas(
            &TxnKind::Move { from: a, to: b },
            dec!(5),
            &current,
            TenantInventoryPolicy::strict(),
        )
        .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!((plan[0].location_id, plan[0].new_qty), (a, dec!(5)));
        assert_eq!((plan[1].location_id, plan[1].new_qty), (b, dec!(5)));
    }

    #[test]
    fn increases_never_fail_even_from_negative() {
        let a = Uuid::new_v4();
        let current = HashMap::from([(a, dec!(-4))]);
        let plan = plan_deltas(
            &TxnKind::Adjust {
                location: a,
                direction: AdjustDirection::Increase,
            },
            dec!(1),
            &current,
            TenantInventoryPolicy::strict(),
        )
        .unwrap();
        assert_eq!(plan[0].new_qty, dec!(-3));
    }

    #[test]
    fn balance_overflow_is_a_validation_error() {
        let a = Uuid::new_v4();
        let current = HashMap::from([(a, Decimal::MAX)]);
        let err = plan_deltas(
            &TxnKind::Receipt { to: a },
            dec!(1),
            &current,
            TenantInventoryPolicy::strict(),
        )
        .unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }
}
