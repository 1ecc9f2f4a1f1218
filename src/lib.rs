//! StateSet inventory core
//!
//! Applies typed inventory transactions against an append-only movement
//! ledger and the per-location balances derived from it, tracks lots through
//! their lifecycle, and resolves outbound demand to lots and locations under
//! FIFO, LIFO or FEFO.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;

pub use config::{AppConfig, TenantInventoryPolicy};
pub use errors::{ErrorResponse, ServiceError};
pub use services::audit::Actor;
pub use services::inventory_transactions::{
    AdjustDirection, InventoryTxnCommand, InventoryTxnRequest, TransactionEngine, TxnKind,
};

use std::sync::Arc;

use crate::cache::BalanceCache;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::allocation::AllocationService;
use crate::services::audit::ReasonCodeRegistry;
use crate::services::backflush::BackflushService;
use crate::services::balances::BalanceStore;
use crate::services::cycle_counts::CycleCountService;
use crate::services::ledger::InventoryLedger;
use crate::services::lots::LotService;
use crate::services::uom::UomNormalizer;

/// Every inventory service wired against one pool, event channel and cache.
#[derive(Clone)]
pub struct InventoryServices {
    pub engine: Arc<TransactionEngine>,
    pub balances: Arc<BalanceStore>,
    pub ledger: Arc<InventoryLedger>,
    pub allocation: Arc<AllocationService>,
    pub lots: Arc<LotService>,
    pub cycle_counts: Arc<CycleCountService>,
    pub backflush: Arc<BackflushService>,
    pub uom: Arc<UomNormalizer>,
    pub reason_codes: Arc<ReasonCodeRegistry>,
}

impl InventoryServices {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, config: &AppConfig) -> Self {
        let cache = BalanceCache::new(&config.cache);
        let retry_policy = config.engine.retry_policy();

        let engine = Arc::new(TransactionEngine::new(
            db.clone(),
            event_sender.clone(),
            cache.clone(),
            retry_policy,
        ));
        let allocation = Arc::new(AllocationService::new(db.clone(), event_sender.clone()));

        Self {
            balances: Arc::new(BalanceStore::new(db.clone(), event_sender.clone(), cache)),
            ledger: Arc::new(InventoryLedger::new(db.clone())),
            lots: Arc::new(LotService::new(
                db.clone(),
                event_sender.clone(),
                retry_policy,
            )),
            cycle_counts: Arc::new(CycleCountService::new(
                db.clone(),
                engine.clone(),
                event_sender,
            )),
            backflush: Arc::new(BackflushService::new(
                db.clone(),
                engine.clone(),
                allocation.clone(),
            )),
            uom: Arc::new(UomNormalizer::new(db.clone())),
            reason_codes: Arc::new(ReasonCodeRegistry::new(db)),
            engine,
            allocation,
        }
    }
}
