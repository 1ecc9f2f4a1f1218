use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Inventory event type. Direction is never carried by the sign of the
/// quantity: it follows from the type together with which of
/// `from_location_id` / `to_location_id` is set.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum InventoryEventType {
    #[sea_orm(string_value = "RECEIPT")]
    Receipt,
    #[sea_orm(string_value = "MOVE")]
    Move,
    #[sea_orm(string_value = "ADJUST")]
    Adjust,
    #[sea_orm(string_value = "ISSUE")]
    Issue,
    #[sea_orm(string_value = "COUNT")]
    Count,
    #[sea_orm(string_value = "TRANSFER")]
    Transfer,
}

/// Append-only ledger row. Created once, never updated or deleted;
/// corrections are new compensating events.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub site_id: Uuid,
    pub event_type: InventoryEventType,
    pub item_id: Uuid,
    pub from_location_id: Option<Uuid>,
    pub to_location_id: Option<Uuid>,
    pub lot_id: Option<Uuid>,
    #[sea_orm(column_type = "Decimal(Some((24, 6)))")]
    pub qty_entered: Decimal,
    pub uom_entered: String,
    #[sea_orm(column_type = "Decimal(Some((24, 6)))")]
    pub qty_base: Decimal,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub reason_code_id: Option<Uuid>,
    pub created_by_user_id: Uuid,
    pub workcell_id: Option<String>,
    pub device_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::item_master::Entity",
        from = "Column::ItemId",
        to = "super::item_master::Column::Id"
    )]
    ItemMaster,
}

impl Related<super::item_master::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ItemMaster.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Signed balance deltas this event contributes, one per touched location.
    pub fn deltas(&self) -> Vec<(Uuid, Decimal)> {
        let mut deltas = Vec::with_capacity(2);
        if let Some(from) = self.from_location_id {
            deltas.push((from, -self.qty_base));
        }
        if let Some(to) = self.to_location_id {
            deltas.push((to, self.qty_base));
        }
        deltas
    }

    /// Signed delta this event contributes to `location_id` (zero if untouched).
    pub fn signed_delta_at(&self, location_id: Uuid) -> Decimal {
        self.deltas()
            .into_iter()
            .filter(|(location, _)| *location == location_id)
            .map(|(_, delta)| delta)
            .sum()
    }
}
