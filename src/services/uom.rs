//! Unit-of-measure normalization.
//!
//! Quantities are entered in any unit the tenant has a conversion for and
//! stored in the item's base unit. Conversions form a graph: each row
//! `1 from = factor to` is an edge, its reciprocal is implied unless the
//! reverse is configured explicitly, and a path of any length may be used.

use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{item_master, uom_conversion};
use crate::errors::ServiceError;

/// Decimal places kept on every base quantity.
pub const BASE_QTY_SCALE: u32 = 6;

/// Largest difference tolerated when a quantity is converted to base and back.
pub const ROUND_TRIP_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, BASE_QTY_SCALE);

fn canonical(uom: &str) -> String {
    uom.trim().to_ascii_uppercase()
}

/// Conversion graph for one item: tenant-wide edges overlaid with the item's own.
#[derive(Debug, Clone, Default)]
pub struct UomGraph {
    edges: HashMap<String, Vec<(String, Decimal)>>,
}

impl UomGraph {
    pub fn from_conversions(item_id: Uuid, conversions: &[uom_conversion::Model]) -> Self {
        let mut explicit: HashMap<(String, String), (Decimal, bool)> = HashMap::new();
        for row in conversions {
            if row.factor <= Decimal::ZERO {
                continue;
            }
            let item_specific = match row.item_id {
                Some(id) if id == item_id => true,
                Some(_) => continue,
                None => false,
            };
            let key = (canonical(&row.from_uom), canonical(&row.to_uom));
            match explicit.get(&key) {
                Some((_, true)) if !item_specific => {}
                _ => {
                    explicit.insert(key, (row.factor, item_specific));
                }
            }
        }

        let mut graph = UomGraph::default();
        for ((from, to), (factor, _)) in &explicit {
            graph.add_edge(from, to, *factor);
            if !explicit.contains_key(&(to.clone(), from.clone())) {
                graph.add_edge(to, from, Decimal::ONE / *factor);
            }
        }
        graph
    }

    fn add_edge(&mut self, from: &str, to: &str, factor: Decimal) {
        self.edges
            .entry(from.to_string())
            .or_default()
            .push((to.to_string(), factor));
    }

    /// Multiplier taking one `from` into `to`, following the shortest path.
    pub fn factor(&self, from: &str, to: &str) -> Option<Decimal> {
        let from = canonical(from);
        let to = canonical(to);
        if from == to {
            return Some(Decimal::ONE);
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<(&str, Decimal)> = VecDeque::new();
        visited.insert(from.as_str());
        queue.push_back((from.as_str(), Decimal::ONE));

        while let Some((unit, acc)) = queue.pop_front() {
            for (next, factor) in self.edges.get(unit).into_iter().flatten() {
                if !visited.insert(next.as_str()) {
                    continue;
                }
                let product = acc.checked_mul(*factor)?;
                if *next == to {
                    return Some(product);
                }
                queue.push_back((next.as_str(), product));
            }
        }
        None
    }
}

fn invalid_uom(item: &item_master::Model, uom: &str) -> ServiceError {
    ServiceError::InvalidUom {
        item_id: item.id,
        uom: uom.to_string(),
        base_uom: item.base_uom.clone(),
    }
}

/// Converts an entered quantity into the item's base unit.
pub fn to_base(
    item: &item_master::Model,
    graph: &UomGraph,
    qty_entered: Decimal,
    uom_entered: &str,
) -> Result<Decimal, ServiceError> {
    if qty_entered <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Quantity must be greater than zero".to_string(),
        ));
    }
    let factor = graph
        .factor(uom_entered, &item.base_uom)
        .ok_or_else(|| invalid_uom(item, uom_entered))?;
    let qty_base = qty_entered
        .checked_mul(factor)
        .ok_or_else(|| ServiceError::ValidationError("Quantity out of range".to_string()))?
        .round_dp(BASE_QTY_SCALE);
    if qty_base.is_zero() {
        return Err(ServiceError::ValidationError(format!(
            "{} {} rounds to zero {}",
            qty_entered, uom_entered, item.base_uom
        )));
    }
    Ok(qty_base.normalize())
}

/// Converts a base quantity back into `uom`.
pub fn from_base(
    item: &item_master::Model,
    graph: &UomGraph,
    qty_base: Decimal,
    uom: &str,
) -> Result<Decimal, ServiceError> {
    let factor = graph
        .factor(&item.base_uom, uom)
        .ok_or_else(|| invalid_uom(item, uom))?;
    qty_base
        .checked_mul(factor)
        .map(|qty| qty.round_dp(BASE_QTY_SCALE).normalize())
        .ok_or_else(|| ServiceError::ValidationError("Quantity out of range".to_string()))
}

/// Loads item master data and conversion rows; the conversion itself is pure.
#[derive(Clone)]
pub struct UomNormalizer {
    db: Arc<DbPool>,
}

impl UomNormalizer {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    pub async fn load_graph<C: ConnectionTrait>(
        conn: &C,
        item: &item_master::Model,
    ) -> Result<UomGraph, ServiceError> {
        let rows = uom_conversion::Entity::find()
            .filter(uom_conversion::Column::TenantId.eq(item.tenant_id))
            .filter(
                Condition::any()
                    .add(uom_conversion::Column::ItemId.eq(item.id))
                    .add(uom_conversion::Column::ItemId.is_null()),
            )
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?;
        debug!(item_id = %item.id, edges = rows.len(), "Loaded UOM conversions");
        Ok(UomGraph::from_conversions(item.id, &rows))
    }

    pub async fn load_item<C: ConnectionTrait>(
        conn: &C,
        tenant_id: Uuid,
        item_id: Uuid,
    ) -> Result<item_master::Model, ServiceError> {
        let item = item_master::Entity::find_by_id(item_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Item", item_id))?;
        if item.tenant_id != tenant_id {
            return Err(ServiceError::TenantMismatch(format!(
                "Item {} belongs to another tenant",
                item_id
            )));
        }
        Ok(item)
    }

    /// `normalize(itemId, qtyEntered, uomEntered) -> qtyBase`
    #[instrument(skip(self))]
    pub async fn normalize(
        &self,
        tenant_id: Uuid,
        item_id: Uuid,
        qty_entered: Decimal,
        uom_entered: &str,
    ) -> Result<Decimal, ServiceError> {
        let db = self.db.as_ref();
        let item = Self::load_item(db, tenant_id, item_id).await?;
        let graph = Self::load_graph(db, &item).await?;
        to_base(&item, &graph, qty_entered, uom_entered)
    }

    #[instrument(skip(self))]
    pub async fn denormalize(
        &self,
        tenant_id: Uuid,
        item_id: Uuid,
        qty_base: Decimal,
        uom: &str,
    ) -> Result<Decimal, ServiceError> {
        let db = self.db.as_ref();
        let item = Self::load_item(db, tenant_id, item_id).await?;
        let graph = Self::load_graph(db, &item).await?;
        from_base(&item, &graph, qty_base, uom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn item(base_uom: &str) -> item_master::Model {
        item_master::Model {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            sku: "FABRIC-01".into(),
            description: None,
            base_uom: base_uom.into(),
            lot_tracked: false,
            serial_tracked: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn conversion(item_id: Option<Uuid>, from: &str, to: &str, factor: Decimal) -> uom_conversion::Model {
        uom_conversion::Model {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            item_id,
            from_uom: from.into(),
            to_uom: to.into(),
            factor,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn converts_along_direct_edge() {
        let item = item("EA");
        let graph = UomGraph::from_conversions(
            item.id,
            &[conversion(None, "ROLL", "EA", dec!(50))],
        );
        assert_eq!(to_base(&item, &graph, dec!(2), "ROLL").unwrap(), dec!(100));
        assert_eq!(to_base(&item, &graph, dec!(7), "ea").unwrap(), dec!(7));
    }

    #[test]
    fn converts_through_reverse_and_multi_hop_edges() {
        let item = item("YD");
        let graph = UomGraph::from_conversions(
            item.id,
            &[
                conversion(None, "YD", "FT", dec!(3)),
                conversion(None, "FT", "IN", dec!(12)),
            ],
        );
        assert_eq!(to_base(&item, &graph, dec!(9), "FT").unwrap(), dec!(3));
        assert_eq!(to_base(&item, &graph, dec!(72), "IN").unwrap(), dec!(2));
    }

    #[test]
    fn item_specific_conversion_overrides_tenant_default() {
        let item = item("EA");
        let graph = UomGraph::from_conversions(
            item.id,
            &[
                conversion(Some(item.id), "CASE", "EA", dec!(24)),
                conversion(None, "CASE", "EA", dec!(12)),
                conversion(Some(Uuid::new_v4()), "CASE", "EA", dec!(6)),
            ],
        );
        assert_eq!(to_base(&item, &graph, dec!(1), "CASE").unwrap(), dec!(24));
    }

    #[test]
    fn missing_path_is_invalid_uom() {
        let item = item("EA");
        let graph = UomGraph::from_conversions(
            item.id,
            &[conversion(None, "FT", "YD", dec!(0.333333))],
        );
        let err = to_base(&item, &graph, dec!(1), "FT").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidUom { ref uom, .. } if uom == "FT"));
    }

    #[test]
    fn rejects_non_positive_and_vanishing_quantities() {
        let item = item("EA");
        let graph = UomGraph::from_conversions(
            item.id,
            &[conversion(None, "EA", "MG", dec!(1000000000))],
        );
        assert!(to_base(&item, &graph, dec!(0), "EA").is_err());
        assert!(to_base(&item, &graph, dec!(-3), "EA").is_err());
        assert!(matches!(
            to_base(&item, &graph, dec!(0.0000001), "MG"),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn round_trip_stays_within_tolerance() {
        let item = item("EA");
        let graph = UomGraph::from_conversions(
            item.id,
            &[conversion(None, "DOZ", "EA", dec!(12))],
        );
        let base = to_base(&item, &graph, dec!(1.25), "DOZ").unwrap();
        assert_eq!(base, dec!(15));
        let back = from_base(&item, &graph, base, "DOZ").unwrap();
        assert!((back - dec!(1.25)).abs() <= ROUND_TRIP_TOLERANCE);
    }
}
