//! Inventory domain module.
//!
//! Business rules for the per-wine stock ledger and the wine catalog entry,
//! implemented purely as deterministic domain logic (no IO, no storage).

pub mod stock;
pub mod transaction;
pub mod wine;

pub use stock::{CheckIn, CheckOut, StockCommand, StockEvent, StockMovement, WineStock};
pub use transaction::{net_quantity, InventoryRecord, Transaction, TransactionType};
pub use wine::{Wine, UNKNOWN_WINE_NAME};
