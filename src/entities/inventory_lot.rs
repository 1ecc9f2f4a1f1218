use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

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
pub enum LotStatus {
    #[sea_orm(string_value = "AVAILABLE")]
    Available,
    #[sea_orm(string_value = "QUARANTINE")]
    Quarantine,
    #[sea_orm(string_value = "EXPIRED")]
    Expired,
    #[sea_orm(string_value = "CONSUMED")]
    Consumed,
}

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
pub enum QcStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "PASSED")]
    Passed,
    #[sea_orm(string_value = "FAILED")]
    Failed,
    #[sea_orm(string_value = "CONDITIONAL")]
    Conditional,
}

/// A lot of one item, identified by (tenant, item, lot_number). The whole lot
/// sits at one location; `qty_available <= qty_produced` always holds.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_lots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub item_id: Uuid,
    pub lot_number: String,
    pub location_id: Option<Uuid>,
    #[sea_orm(column_type = "Decimal(Some((24, 6)))")]
    pub qty_produced: Decimal,
    #[sea_orm(column_type = "Decimal(Some((24, 6)))")]
    pub qty_available: Decimal,
    pub status: LotStatus,
    pub qc_status: QcStatus,
    pub expiration_date: Option<NaiveDate>,
    pub manufacturing_date: Option<NaiveDate>,
    pub supplier_id: Option<Uuid>,
    pub quarantine_reason: Option<String>,
    pub received_at: DateTime<Utc>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::item_master::Entity",
        from = "Column::ItemId",
        to = "super::item_master::Column::Id"
    )]
    ItemMaster,
    #[sea_orm(has_many = "super::lot_history::Entity")]
    LotHistories,
}

impl Related<super::item_master::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ItemMaster.def()
    }
}

impl Related<super::lot_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LotHistories.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_expired_on(&self, day: NaiveDate) -> bool {
        self.expiration_date.map(|exp| exp < day).unwrap_or(false)
    }

    /// Lots that may be picked: available, QC not failed, stock left and not past expiry.
    pub fn is_allocatable_on(&self, day: NaiveDate) -> bool {
        self.status == LotStatus::Available
            && self.qc_status != QcStatus::Failed
            && self.qty_available > Decimal::ZERO
            && !self.is_expired_on(day)
    }
}
