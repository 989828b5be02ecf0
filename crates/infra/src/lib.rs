//! Infrastructure layer: OCR engines, persistence, ledger orchestration, config.

pub mod cellar;
pub mod config;
pub mod ledger;
pub mod ocr;
pub mod store;

mod integration_tests;

pub use cellar::{CellarError, CellarService, CheckInRequest, LabelScan, WineWithInventory};
pub use config::{CellarConfig, ConfigError, LedgerConfig, LocalOcrConfig, ScanConfig, VisionConfig};
pub use ledger::{InventoryLedger, LedgerError, MovementReceipt, Reconciliation};
pub use ocr::{EngineError, LabelImages, OcrAdapter, ScanError};
pub use store::{
    InMemoryLedgerStore, LedgerCommit, LedgerStore, Pagination, PostgresLedgerStore, StoreError,
    TransactionFilter, TransactionPage,
};
