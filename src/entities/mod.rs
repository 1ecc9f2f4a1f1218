//! sea-orm entities for the inventory core.

pub mod cycle_count;
pub mod cycle_count_line;
pub mod inventory_balance;
pub mod inventory_event;
pub mod inventory_location;
pub mod inventory_lot;
pub mod item_master;
pub mod lot_history;
pub mod reason_code;
pub mod uom_conversion;
