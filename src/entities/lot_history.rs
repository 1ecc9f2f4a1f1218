use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LotHistoryEventType {
    #[sea_orm(string_value = "RECEIPT")]
    Receipt,
    #[sea_orm(string_value = "ISSUE")]
    Issue,
    #[sea_orm(string_value = "MOVE")]
    Move,
    #[sea_orm(string_value = "ADJUST")]
    Adjust,
    #[sea_orm(string_value = "COUNT")]
    Count,
    #[sea_orm(string_value = "STATUS_CHANGE")]
    StatusChange,
    #[sea_orm(string_value = "QC_RESULT")]
    QcResult,
}

/// Append-only audit of a lot's quantity and status changes.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "lot_histories")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub lot_id: Uuid,
    pub event_type: LotHistoryEventType,
    #[sea_orm(column_type = "Decimal(Some((24, 6)))")]
    pub qty_before: Decimal,
    #[sea_orm(column_type = "Decimal(Some((24, 6)))")]
    pub qty_after: Decimal,
    #[sea_orm(column_type = "Decimal(Some((24, 6)))")]
    pub qty_changed: Decimal,
    pub detail: Option<String>,
    pub inventory_event_id: Option<Uuid>,
    pub created_by_user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::inventory_lot::Entity",
        from = "Column::LotId",
        to = "super::inventory_lot::Column::Id"
    )]
    InventoryLot,
}

impl Related<super::inventory_lot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InventoryLot.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
