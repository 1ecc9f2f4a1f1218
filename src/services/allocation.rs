//! Allocation of outbound demand to lots and locations.
//!
//! The result is advisory: nothing here writes. Callers post one ISSUE or
//! TRANSFER per allocated line and the transaction engine re-validates each
//! against the balances current at that moment.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::db::DbPool;
use crate::entities::{inventory_balance, inventory_location, inventory_lot};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::audit::Actor;
use crate::services::uom::UomNormalizer;
use crate::services::BatchOutcome;

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum AllocationStrategy {
    #[default]
    Fifo,
    Lifo,
    Fefo,
}

/// One allocated source: take `quantity` (base units) of `lot_id` at `location_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub lot_id: Option<Uuid>,
    pub lot_number: Option<String>,
    pub location_id: Uuid,
    pub quantity: Decimal,
}

/// Supply that can be drawn from: a lot at its location, or the stock at a
/// location that no lot accounts for.
#[derive(Clone, Debug, PartialEq)]
pub struct SupplyCandidate {
    pub lot_id: Option<Uuid>,
    pub lot_number: Option<String>,
    pub location_id: Uuid,
    pub available: Decimal,
    pub received_at: Option<DateTime<Utc>>,
    pub expiration_date: Option<NaiveDate>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct AllocationRequest {
    pub site_id: Uuid,
    pub item_id: Uuid,
    /// Demand in the item's base unit
    #[validate(custom = "validate_positive")]
    pub quantity: Decimal,
    #[serde(default)]
    pub strategy: AllocationStrategy,
    #[serde(default)]
    pub require_lot_tracking: bool,
    #[serde(default)]
    pub require_serial_tracking: bool,
    /// Restricts supply to one location of the site
    #[serde(default)]
    pub location_id: Option<Uuid>,
}

fn validate_positive(quantity: &Decimal) -> Result<(), ValidationError> {
    if *quantity > Decimal::ZERO {
        Ok(())
    } else {
        let mut err = ValidationError::new("quantity");
        err.message = Some("Quantity must be greater than zero".into());
        Err(err)
    }
}

/// `None` sorts after every `Some`.
fn cmp_nulls_last<T: Ord>(a: &Option<T>, b: &Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Sorts candidates into consumption order. Equal keys fall back to location
/// and then lot id, so the order never depends on how rows were fetched.
pub fn order_candidates(candidates: &mut [SupplyCandidate], strategy: AllocationStrategy) {
    candidates.sort_by(|a, b| {
        let primary = match strategy {
            AllocationStrategy::Fifo => cmp_nulls_last(&a.received_at, &b.received_at),
            AllocationStrategy::Lifo => match (&a.received_at, &b.received_at) {
                (Some(x), Some(y)) => y.cmp(x),
                (x, y) => cmp_nulls_last(x, y),
            },
            AllocationStrategy::Fefo => cmp_nulls_last(&a.expiration_date, &b.expiration_date)
                .then_with(|| cmp_nulls_last(&a.received_at, &b.received_at)),
        };
        primary
            .then_with(|| a.location_id.cmp(&b.location_id))
            .then_with(|| cmp_nulls_last(&a.lot_id, &b.lot_id))
    });
}

/// Greedy allocation of `quantity` over `candidates` under `strategy`.
///
/// Serial-tracked stock is held as unit lots, so serial demand must be a whole
/// number and only whole units are taken from a candidate.
pub fn allocate(
    item_id: Uuid,
    mut candidates: Vec<SupplyCandidate>,
    quantity: Decimal,
    strategy: AllocationStrategy,
    require_lot_tracking: bool,
    require_serial_tracking: bool,
) -> Result<Vec<AllocationLine>, ServiceError> {
    if quantity <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Allocation quantity must be greater than zero".to_string(),
        ));
    }
    if require_serial_tracking && !quantity.fract().is_zero() {
        return Err(ServiceError::ValidationError(format!(
            "Serial-tracked demand must be a whole number of units, got {}",
            quantity
        )));
    }
    let needs_lot = require_lot_tracking || require_serial_tracking;

    candidates.retain(|candidate| {
        candidate.available > Decimal::ZERO && (!needs_lot || candidate.lot_id.is_some())
    });
    order_candidates(&mut candidates, strategy);

    let mut remaining = quantity;
    let mut lines = Vec::new();
    for candidate in &candidates {
        if remaining.is_zero() {
            break;
        }
        let usable = if require_serial_tracking {
            candidate.available.floor()
        } else {
            candidate.available
        };
        let take = usable.min(remaining);
        if take <= Decimal::ZERO {
            continue;
        }
        lines.push(AllocationLine {
            lot_id: candidate.lot_id,
            lot_number: candidate.lot_number.clone(),
            location_id: candidate.location_id,
            quantity: take,
        });
        remaining -= take;
    }

    if remaining > Decimal::ZERO {
        let available = quantity - remaining;
        return Err(ServiceError::InsufficientSupply {
            item_id,
            requested: quantity,
            available,
            partial: lines,
        });
    }
    Ok(lines)
}

/// Builds candidates from the balances and lots at a site. A lot is offered up
/// to the balance at its location; whatever the lots do not cover is offered
/// as unlotted stock.
pub fn build_candidates(
    balances: &[inventory_balance::Model],
    lots: &[inventory_lot::Model],
    today: NaiveDate,
) -> Vec<SupplyCandidate> {
    let mut lots_by_location: HashMap<Uuid, Vec<&inventory_lot::Model>> = HashMap::new();
    for lot in lots {
        if let Some(location_id) = lot.location_id {
            lots_by_location.entry(location_id).or_default().push(lot);
        }
    }

    let mut candidates = Vec::new();
    for balance in balances {
        if balance.qty_base <= Decimal::ZERO {
            continue;
        }
        let here = lots_by_location
            .get(&balance.location_id)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut uncovered = balance.qty_base;
        for lot in here {
            uncovered -= lot.qty_available;
        }

        let mut budget = balance.qty_base;
        for lot in here.iter().filter(|lot| lot.is_allocatable_on(today)) {
            let available = lot.qty_available.min(budget);
            if available <= Decimal::ZERO {
                break;
            }
            budget -= available;
            candidates.push(SupplyCandidate {
                lot_id: Some(lot.id),
                lot_number: Some(lot.lot_number.clone()),
                location_id: balance.location_id,
                available,
                received_at: Some(lot.received_at),
                expiration_date: lot.expiration_date,
            });
        }

        if uncovered > Decimal::ZERO {
            candidates.push(SupplyCandidate {
                lot_id: None,
                lot_number: None,
                location_id: balance.location_id,
                available: uncovered,
                received_at: None,
                expiration_date: None,
            });
        }
    }
    candidates
}

pub struct AllocationService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl AllocationService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Current supply of `item_id` at `site_id` across active locations.
    #[instrument(skip(self))]
    pub async fn candidates_for(
        &self,
        tenant_id: Uuid,
        site_id: Uuid,
        item_id: Uuid,
    ) -> Result<Vec<SupplyCandidate>, ServiceError> {
        let db = self.db.as_ref();

        let active_locations: HashSet<Uuid> = inventory_location::Entity::find()
            .filter(inventory_location::Column::TenantId.eq(tenant_id))
            .filter(inventory_location::Column::SiteId.eq(site_id))
            .filter(inventory_location::Column::Active.eq(true))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|location| location.id)
            .collect();

        let balances: Vec<inventory_balance::Model> = inventory_balance::Entity::find()
            .filter(inventory_balance::Column::TenantId.eq(tenant_id))
            .filter(inventory_balance::Column::SiteId.eq(site_id))
            .filter(inventory_balance::Column::ItemId.eq(item_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .filter(|balance| active_locations.contains(&balance.location_id))
            .collect();

        let location_ids: Vec<Uuid> = balances.iter().map(|b| b.location_id).collect();
        let lots = if location_ids.is_empty() {
            Vec::new()
        } else {
            inventory_lot::Entity::find()
                .filter(inventory_lot::Column::TenantId.eq(tenant_id))
                .filter(inventory_lot::Column::ItemId.eq(item_id))
                .filter(inventory_lot::Column::LocationId.is_in(location_ids))
                .all(db)
                .await
                .map_err(ServiceError::db_error)?
        };

        Ok(build_candidates(&balances, &lots, Utc::now().date_naive()))
    }

    /// `allocate(itemId, siteId, quantity, strategy, requireLot, requireSerial)`.
    /// The item's own tracking flags are always honoured in addition to the
    /// request flags.
    #[instrument(skip(self, actor), fields(tenant_id = %actor.tenant_id))]
    pub async fn allocate(
        &self,
        actor: &Actor,
        request: &AllocationRequest,
    ) -> Result<Vec<AllocationLine>, ServiceError> {
        request.validate()?;
        actor.ensure_site(request.site_id)?;

        let item = UomNormalizer::load_item(self.db.as_ref(), actor.tenant_id, request.item_id)
            .await?;
        let mut candidates = self
            .candidates_for(actor.tenant_id, request.site_id, request.item_id)
            .await?;
        if let Some(location_id) = request.location_id {
            candidates.retain(|candidate| candidate.location_id == location_id);
        }

        let result = allocate(
            request.item_id,
            candidates,
            request.quantity,
            request.strategy,
            request.require_lot_tracking || item.lot_tracked,
            request.require_serial_tracking || item.serial_tracked,
        );

        match &result {
            Ok(lines) => {
                info!(
                    item_id = %request.item_id,
                    site_id = %request.site_id,
                    strategy = %request.strategy,
                    quantity = %request.quantity,
                    lines = lines.len(),
                    "Allocation resolved"
                );
            }
            Err(ServiceError::InsufficientSupply {
                requested,
                available,
                ..
            }) => {
                warn!(
                    item_id = %request.item_id,
                    requested = %requested,
                    available = %available,
                    "Insufficient supply for allocation"
                );
                self.event_sender
                    .publish(Event::AllocationShortfall {
                        tenant_id: actor.tenant_id,
                        site_id: request.site_id,
                        item_id: request.item_id,
                        requested: *requested,
                        available: *available,
                    })
                    .await;
            }
            Err(_) => {}
        }

        result
    }

    /// Resolves each request independently.
    #[instrument(skip(self, actor, requests), fields(lines = requests.len()))]
    pub async fn allocate_many(
        &self,
        actor: &Actor,
        requests: &[AllocationRequest],
    ) -> BatchOutcome<Vec<AllocationLine>> {
        let mut outcome = BatchOutcome::default();
        for request in requests {
            outcome.push(self.allocate(actor, request).await);
        }
        info!(
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            "Batch allocation finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 8, 0, 0).unwrap()
    }

    fn lot(name: &str, available: Decimal, received: u32, expires: Option<NaiveDate>) -> SupplyCandidate {
        SupplyCandidate {
            lot_id: Some(Uuid::new_v4()),
            lot_number: Some(name.to_string()),
            location_id: Uuid::new_v4(),
            available,
            received_at: Some(day(received)),
            expiration_date: expires,
        }
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn lot_numbers(lines: &[AllocationLine]) -> Vec<(&str, Decimal)> {
        lines
            .iter()
            .map(|l| (l.lot_number.as_deref().unwrap_or("-"), l.quantity))
            .collect()
    }

    #[test]
    fn fifo_consumes_oldest_lot_first() {
        let candidates = vec![lot("L2", dec!(50), 5, None), lot("L1", dec!(100), 1, None)];
        let lines = allocate(Uuid::nil(), candidates, dec!(120), AllocationStrategy::Fifo, false, false)
            .unwrap();
        assert_eq!(lot_numbers(&lines), vec![("L1", dec!(100)), ("L2", dec!(20))]);
    }

    #[test]
    fn fifo_shortfall_returns_partial_allocation() {
        let candidates = vec![lot("L1", dec!(100), 1, None), lot("L2", dec!(50), 5, None)];
        let err = allocate(Uuid::nil(), candidates, dec!(200), AllocationStrategy::Fifo, false, false)
            .unwrap_err();
        match err {
            ServiceError::InsufficientSupply {
                requested,
                available,
                partial,
                ..
            } => {
                assert_eq!(requested, dec!(200));
                assert_eq!(available, dec!(150));
                assert_eq!(partial.len(), 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn lifo_takes_newest_first() {
        let candidates = vec![lot("L1", dec!(100), 1, None), lot("L2", dec!(50), 5, None)];
        let lines = allocate(Uuid::nil(), candidates, dec!(60), AllocationStrategy::Lifo, false, false)
            .unwrap();
        assert_eq!(lot_numbers(&lines), vec![("L2", dec!(50)), ("L1", dec!(10))]);
    }

    #[test]
    fn fefo_puts_lots_without_expiry_last() {
        let candidates = vec![
            lot("NOEXP", dec!(10), 1, None),
            lot("LATE", dec!(10), 2, Some(date(6, 1))),
            lot("SOON", dec!(10), 3, Some(date(3, 1))),
        ];
        let lines = allocate(Uuid::nil(), candidates, dec!(25), AllocationStrategy::Fefo, false, false)
            .unwrap();
        assert_eq!(
            lot_numbers(&lines),
            vec![("SOON", dec!(10)), ("LATE", dec!(10)), ("NOEXP", dec!(5))]
        );
    }

    #[test]
    fn identical_keys_break_ties_by_location() {
        let mut a = lot("A", dec!(5), 1, None);
        let mut b = lot("B", dec!(5), 1, None);
        a.location_id = Uuid::from_u128(2);
        b.location_id = Uuid::from_u128(1);
        let lines = allocate(Uuid::nil(), vec![a, b], dec!(5), AllocationStrategy::Fifo, false, false)
            .unwrap();
        assert_eq!(lot_numbers(&lines), vec![("B", dec!(5))]);
    }

    #[test]
    fn lot_requirement_skips_unlotted_stock() {
        let unlotted = SupplyCandidate {
            lot_id: None,
            lot_number: None,
            location_id: Uuid::new_v4(),
            available: dec!(100),
            received_at: None,
            expiration_date: None,
        };
        let candidates = vec![unlotted, lot("L1", dec!(10), 1, None)];
        let err = allocate(Uuid::nil(), candidates, dec!(20), AllocationStrategy::Fifo, true, false)
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InsufficientSupply { available, .. } if available == dec!(10)
        ));
    }

    #[test]
    fn serial_demand_must_be_whole_units() {
        let candidates = vec![lot("SN-1", dec!(1), 1, None), lot("SN-2", dec!(1), 2, None)];
        assert!(matches!(
            allocate(Uuid::nil(), candidates.clone(), dec!(1.5), AllocationStrategy::Fifo, false, true),
            Err(ServiceError::ValidationError(_))
        ));
        let lines =
            allocate(Uuid::nil(), candidates, dec!(2), AllocationStrategy::Fifo, false, true).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.quantity == dec!(1)));
    }

    #[test]
    fn candidates_split_lotted_and_unlotted_stock() {
        let tenant = Uuid::new_v4();
        let item = Uuid::new_v4();
        let location = Uuid::new_v4();
        let today = date(2, 1);
        let balance = inventory_balance::Model {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            site_id: Uuid::new_v4(),
            item_id: item,
            location_id: location,
            qty_base: dec!(30),
            version: 1,
            created_at: day(1),
            updated_at: day(1),
        };
        let make_lot = |number: &str, qty: Decimal, status: inventory_lot::LotStatus| inventory_lot::Model {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            item_id: item,
            lot_number: number.to_string(),
            location_id: Some(location),
            qty_produced: qty,
            qty_available: qty,
            status,
            qc_status: inventory_lot::QcStatus::Passed,
            expiration_date: None,
            manufacturing_date: None,
            supplier_id: None,
            quarantine_reason: None,
            received_at: day(1),
            version: 1,
            created_at: day(1),
            updated_at: day(1),
        };
        let lots = vec![
            make_lot("OK", dec!(10), inventory_lot::LotStatus::Available),
            make_lot("HELD", dec!(5), inventory_lot::LotStatus::Quarantine),
        ];

        let candidates = build_candidates(&[balance], &lots, today);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].lot_number.as_deref(), Some("OK"));
        assert_eq!(candidates[0].available, dec!(10));
        assert_eq!(candidates[1].lot_id, None);
        assert_eq!(candidates[1].available, dec!(15));
    }
}
