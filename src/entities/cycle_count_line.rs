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
pub enum CycleCountLineStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "COUNTED")]
    Counted,
}

/// One counted (item, location). `expected_qty_base` is the balance snapshot
/// taken when the count started; the variance is frozen once COUNTED.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cycle_count_lines")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub cycle_count_id: Uuid,
    pub tenant_id: Uuid,
    pub item_id: Uuid,
    pub location_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((24, 6)))")]
    pub expected_qty_base: Decimal,
    #[sea_orm(column_type = "Decimal(Some((24, 6)))", nullable)]
    pub counted_qty_base: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((24, 6)))", nullable)]
    pub variance_qty_base: Option<Decimal>,
    pub status: CycleCountLineStatus,
    pub counted_by_user_id: Option<Uuid>,
    pub counted_at: Option<DateTime<Utc>>,
    pub posted_event_id: Option<Uuid>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::cycle_count::Entity",
        from = "Column::CycleCountId",
        to = "super::cycle_count::Column::Id"
    )]
    CycleCount,
}

impl Related<super::cycle_count::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CycleCount.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// A counted line whose variance still has to reach the ledger.
    pub fn needs_posting(&self) -> bool {
        self.status == CycleCountLineStatus::Counted
            && self.posted_event_id.is_none()
            && self
                .variance_qty_base
                .map(|variance| !variance.is_zero())
                .unwrap_or(false)
    }
}
