#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use stateset_inventory_core::{
    config::AppConfig,
    db::{self, DbPool},
    entities::{inventory_event, inventory_location, inventory_lot, item_master, reason_code, uom_conversion},
    events::{Event, EventSender},
    services::lots::LotRef,
    Actor, InventoryServices, InventoryTxnCommand, TenantInventoryPolicy, TxnKind,
};
use tokio::sync::mpsc;
use uuid::Uuid;

/// In-memory SQLite database with the schema applied, one tenant, two sites
/// and an actor allowed everywhere in the tenant.
pub struct TestHarness {
    pub db: Arc<DbPool>,
    pub services: InventoryServices,
    pub events: mpsc::Receiver<Event>,
    pub tenant_id: Uuid,
    pub site_id: Uuid,
    pub other_site_id: Uuid,
    pub actor: Actor,
}

impl TestHarness {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:");
        cfg.auto_migrate = true;
        cfg.engine.retry_backoff_ms = 0;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        let db = Arc::new(pool);

        let (sender, events) = EventSender::channel(4096);
        let services = InventoryServices::new(db.clone(), Arc::new(sender), &cfg);

        let tenant_id = Uuid::new_v4();
        let actor = Actor::new(Uuid::new_v4(), tenant_id, "inventory_manager", Vec::new());

        Self {
            db,
            services,
            events,
            tenant_id,
            site_id: Uuid::new_v4(),
            other_site_id: Uuid::new_v4(),
            actor,
        }
    }

    pub async fn item(&self, sku: &str, base_uom: &str) -> item_master::Model {
        self.tracked_item(sku, base_uom, false, false).await
    }

    pub async fn tracked_item(
        &self,
        sku: &str,
        base_uom: &str,
        lot_tracked: bool,
        serial_tracked: bool,
    ) -> item_master::Model {
        let now = Utc::now();
        item_master::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(self.tenant_id),
            sku: Set(sku.to_string()),
            description: Set(None),
            base_uom: Set(base_uom.to_string()),
            lot_tracked: Set(lot_tracked),
            serial_tracked: Set(serial_tracked),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await
        .expect("insert item")
    }

    pub async fn location(&self, code: &str) -> inventory_location::Model {
        self.location_in(self.site_id, code).await
    }

    pub async fn location_in(&self, site_id: Uuid, code: &str) -> inventory_location::Model {
        inventory_location::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(self.tenant_id),
            site_id: Set(site_id),
            code: Set(code.to_string()),
            name: Set(None),
            active: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(self.db.as_ref())
        .await
        .expect("insert location")
    }

    pub async fn conversion(&self, item_id: Option<Uuid>, from: &str, to: &str, factor: Decimal) {
        uom_conversion::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(self.tenant_id),
            item_id: Set(item_id),
            from_uom: Set(from.to_string()),
            to_uom: Set(to.to_string()),
            factor: Set(factor),
            created_at: Set(Utc::now()),
        }
        .insert(self.db.as_ref())
        .await
        .expect("insert conversion");
    }

    pub async fn reason(&self, code: &str) -> reason_code::Model {
        self.services
            .reason_codes
            .register(&self.actor, code, "test reason")
            .await
            .expect("register reason code")
    }

    pub async fn apply(&self, command: InventoryTxnCommand) -> inventory_event::Model {
        self.services
            .engine
            .apply(&self.actor, TenantInventoryPolicy::strict(), &command)
            .await
            .expect("apply transaction")
    }

    pub async fn receive(&self, item: &item_master::Model, location_id: Uuid, qty: Decimal) -> inventory_event::Model {
        self.apply(
            InventoryTxnCommand::new(TxnKind::Receipt { to: location_id }, item.id, qty, item.base_uom.clone())
                .with_reference("PURCHASE_ORDER", "PO-1"),
        )
        .await
    }

    pub async fn receive_lot(
        &self,
        item: &item_master::Model,
        location_id: Uuid,
        qty: Decimal,
        lot_number: &str,
        expiration_date: Option<NaiveDate>,
    ) -> inventory_lot::Model {
        let lot = LotRef {
            expiration_date,
            ..LotRef::by_number(lot_number)
        };
        let event = self
            .apply(
                InventoryTxnCommand::new(TxnKind::Receipt { to: location_id }, item.id, qty, item.base_uom.clone())
                    .with_lot(lot),
            )
            .await;
        let lot_id = event.lot_id.expect("receipt of a lot records the lot");
        self.lot(lot_id).await
    }

    pub async fn lot(&self, lot_id: Uuid) -> inventory_lot::Model {
        inventory_lot::Entity::find_by_id(lot_id)
            .one(self.db.as_ref())
            .await
            .expect("load lot")
            .expect("lot exists")
    }

    /// Pins a lot's receipt time so FIFO/LIFO ordering does not depend on
    /// clock resolution.
    pub async fn set_received_at(&self, lot_id: Uuid, received_at: DateTime<Utc>) {
        let mut lot: inventory_lot::ActiveModel = self.lot(lot_id).await.into();
        lot.received_at = Set(received_at);
        lot.update(self.db.as_ref())
            .await
            .expect("backdate lot");
    }

    pub async fn balance(&self, item_id: Uuid, location_id: Uuid) -> Decimal {
        self.services
            .balances
            .find_balance(self.tenant_id, item_id, location_id)
            .await
            .expect("load balance")
            .map(|row| row.qty_base)
            .unwrap_or(Decimal::ZERO)
    }

    pub async fn ledger_rows(&self, item_id: Uuid) -> u64 {
        inventory_event::Entity::find()
            .filter(inventory_event::Column::ItemId.eq(item_id))
            .count(self.db.as_ref())
            .await
            .expect("count ledger rows")
    }

    /// Every event published so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}
