//! Backflush: issuing BOM components when production is reported complete.
//!
//! Each component is consumed independently. A component with a fixed source
//! location that is not lot-tracked is issued in one ISSUE; everything else is
//! sourced by the allocator and issued one ISSUE per allocated line. A named
//! source location also bounds the allocator for lot-tracked components.
//! Every ISSUE references the production order.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::config::TenantInventoryPolicy;
use crate::db::DbPool;
use crate::entities::inventory_event;
use crate::errors::ServiceError;
use crate::services::allocation::{AllocationLine, AllocationRequest, AllocationService, AllocationStrategy};
use crate::services::audit::Actor;
use crate::services::inventory_transactions::{InventoryTxnCommand, TransactionEngine, TxnKind};
use crate::services::lots::LotRef;
use crate::services::uom::{UomNormalizer, BASE_QTY_SCALE};
use crate::services::{BatchOutcome, LineOutcome};

pub const PRODUCTION_ORDER_REFERENCE: &str = "PRODUCTION_ORDER";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BackflushComponent {
    pub item_id: Uuid,
    /// Base units consumed per unit produced
    #[validate(custom = "validate_positive")]
    pub qty_per_unit: Decimal,
    pub source_location_id: Option<Uuid>,
    #[serde(default)]
    pub strategy: AllocationStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BackflushRequest {
    pub site_id: Uuid,
    #[validate(length(min = 1, max = 128))]
    pub production_order_id: String,
    #[validate(custom = "validate_positive")]
    pub completed_qty: Decimal,
    #[validate]
    pub components: Vec<BackflushComponent>,
    pub workcell_id: Option<String>,
    pub device_id: Option<String>,
}

fn validate_positive(qty: &Decimal) -> Result<(), ValidationError> {
    if *qty > Decimal::ZERO {
        Ok(())
    } else {
        let mut err = ValidationError::new("qty");
        err.message = Some("Quantity must be greater than zero".into());
        Err(err)
    }
}

/// What one component consumed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentConsumption {
    pub item_id: Uuid,
    pub required_qty_base: Decimal,
    pub events: Vec<inventory_event::Model>,
}

pub fn required_quantity(qty_per_unit: Decimal, completed_qty: Decimal) -> Result<Decimal, ServiceError> {
    let required = qty_per_unit
        .checked_mul(completed_qty)
        .ok_or_else(|| ServiceError::ValidationError("Quantity out of range".to_string()))?
        .round_dp(BASE_QTY_SCALE);
    if required.is_zero() {
        return Err(ServiceError::ValidationError(format!(
            "{} x {} rounds to zero base units",
            qty_per_unit, completed_qty
        )));
    }
    Ok(required.normalize())
}

pub struct BackflushService {
    db: Arc<DbPool>,
    engine: Arc<TransactionEngine>,
    allocation: Arc<AllocationService>,
}

impl BackflushService {
    pub fn new(db: Arc<DbPool>, engine: Arc<TransactionEngine>, allocation: Arc<AllocationService>) -> Self {
        Self {
            db,
            engine,
            allocation,
        }
    }

    /// Consumes every component of `request`, one outcome per component in
    /// input order.
    #[instrument(
        skip(self, actor, request),
        fields(
            tenant_id = %actor.tenant_id,
            production_order_id = %request.production_order_id,
            components = request.components.len()
        )
    )]
    pub async fn backflush(
        &self,
        actor: &Actor,
        policy: TenantInventoryPolicy,
        request: &BackflushRequest,
    ) -> Result<BatchOutcome<ComponentConsumption>, ServiceError> {
        request.validate()?;
        actor.ensure_site(request.site_id)?;

        let mut outcome = BatchOutcome::default();
        for component in &request.components {
            let line = match self.consume(actor, policy, request, component).await {
                Ok(consumption) => LineOutcome::Succeeded(consumption),
                Err((err, posted)) => {
                    warn!(
                        item_id = %component.item_id,
                        error = %err,
                        posted = posted,
                        "Backflush component failed"
                    );
                    let mut failed = LineOutcome::from_error(&err);
                    if posted > 0 {
                        if let LineOutcome::Failed { message, .. } = &mut failed {
                            message.push_str(&format!(" ({} issue(s) already posted)", posted));
                        }
                    }
                    failed
                }
            };
            outcome.lines.push(line);
        }

        info!(
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            "Backflush finished"
        );
        Ok(outcome)
    }

    /// On failure also returns how many ISSUE events were committed first.
    async fn consume(
        &self,
        actor: &Actor,
        policy: TenantInventoryPolicy,
        request: &BackflushRequest,
        component: &BackflushComponent,
    ) -> Result<ComponentConsumption, (ServiceError, usize)> {
        let required =
            required_quantity(component.qty_per_unit, request.completed_qty).map_err(|err| (err, 0))?;
        let item = UomNormalizer::load_item(self.db.as_ref(), actor.tenant_id, component.item_id)
            .await
            .map_err(|err| (err, 0))?;

        let sources: Vec<AllocationLine> = match component.source_location_id {
            Some(location_id) if !item.requires_lot() => vec![AllocationLine {
                lot_id: None,
                lot_number: None,
                location_id,
                quantity: required,
            }],
            _ => self
                .allocation
                .allocate(
                    actor,
                    &AllocationRequest {
                        site_id: request.site_id,
                        item_id: component.item_id,
                        quantity: required,
                        strategy: component.strategy,
                        require_lot_tracking: item.lot_tracked,
                        require_serial_tracking: item.serial_tracked,
                        location_id: component.source_location_id,
                    },
                )
                .await
                .map_err(|err| (err, 0))?,
        };

        let mut events = Vec::with_capacity(sources.len());
        for source in &sources {
            let mut command = InventoryTxnCommand::new(
                TxnKind::Issue {
                    from: source.location_id,
                },
                component.item_id,
                source.quantity,
                item.base_uom.clone(),
            )
            .with_reference(PRODUCTION_ORDER_REFERENCE, request.production_order_id.clone())
            .with_station(request.workcell_id.clone(), request.device_id.clone());
            if let Some(lot_id) = source.lot_id {
                command = command.with_lot(LotRef::by_id(lot_id));
            }
            let event = self
                .engine
                .apply(actor, policy, &command)
                .await
                .map_err(|err| (err, events.len()))?;
            events.push(event);
        }

        Ok(ComponentConsumption {
            item_id: component.item_id,
            required_qty_base: required,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn required_quantity_scales_by_completed() {
        assert_eq!(required_quantity(dec!(2.5), dec!(4)).unwrap(), dec!(10));
        assert!(matches!(
            required_quantity(dec!(0.0000001), dec!(3)),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn oversized_requirements_are_out_of_range() {
        let huge = Decimal::from_i128_with_scale(100_000_000_000_000_000_000, 0);
        assert!(matches!(
            required_quantity(huge, huge),
            Err(ServiceError::ValidationError(message)) if message == "Quantity out of range"
        ));
    }

    #[test]
    fn request_rejects_non_positive_quantities() {
        let request = BackflushRequest {
            site_id: Uuid::new_v4(),
            production_order_id: "PO-7".into(),
            completed_qty: dec!(0),
            components: vec![BackflushComponent {
                item_id: Uuid::new_v4(),
                qty_per_unit: dec!(1),
                source_location_id: None,
                strategy: AllocationStrategy::Fifo,
            }],
            workcell_id: None,
            device_id: None,
        };
        assert!(request.validate().is_err());

        let request = BackflushRequest {
            completed_qty: dec!(5),
            components: vec![BackflushComponent {
                qty_per_unit: dec!(-1),
                ..request.components[0].clone()
            }],
            ..request
        };
        assert!(request.validate().is_err());
    }
}
