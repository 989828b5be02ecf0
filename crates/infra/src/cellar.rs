//! Operations exposed to callers: scan, check in, restock, check out, rescan.
//!
//! `CellarService` composes the OCR adapter, the label parser and the
//! inventory ledger. It holds no state of its own.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use winebox_core::WineId;
use winebox_inventory::{InventoryRecord, Wine};
use winebox_label::{DroppedField, LabelParser, ScanResult, WineLabelData};

use crate::config::CellarConfig;
use crate::ledger::{InventoryLedger, LedgerError, MovementReceipt};
use crate::ocr::{LabelImages, OcrAdapter, ScanError};
use crate::store::{LedgerStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CellarError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A scan plus its parsed, validated fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelScan {
    pub scan: ScanResult,
    pub label: WineLabelData,
    pub dropped: Vec<DroppedField>,
}

#[derive(Debug, Clone, Default)]
pub struct CheckInRequest {
    pub images: Option<LabelImages>,
    /// Output of an earlier `scan` call; when set the images are not scanned again.
    pub prescanned: Option<ScanResult>,
    /// Caller-supplied values. Every field present here beats the scan.
    pub manual: WineLabelData,
    pub quantity: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WineWithInventory {
    pub wine: Wine,
    pub inventory: InventoryRecord,
}

pub struct CellarService<S> {
    adapter: OcrAdapter,
    parser: LabelParser,
    ledger: InventoryLedger<S>,
}

impl<S: LedgerStore> CellarService<S> {
    pub fn new(adapter: OcrAdapter, parser: LabelParser, ledger: InventoryLedger<S>) -> Self {
        Self {
            adapter,
            parser,
            ledger,
        }
    }

    /// Production engines over `store`.
    pub fn from_config(config: CellarConfig, store: S) -> Self {
        Self::new(
            OcrAdapter::from_config(config.scan),
            LabelParser::new(),
            InventoryLedger::new(store, config.ledger),
        )
    }

    pub fn ledger(&self) -> &InventoryLedger<S> {
        &self.ledger
    }

    pub async fn scan(&self, images: &LabelImages) -> Result<LabelScan, CellarError> {
        let scan = self.adapter.scan(images).await?;
        Ok(self.parse(scan))
    }

    fn parse(&self, scan: ScanResult) -> LabelScan {
        let outcome = self.parser.parse(&scan);
        if !outcome.dropped.is_empty() {
            info!(dropped = outcome.dropped.len(), "label fields dropped during validation");
        }
        LabelScan {
            scan,
            label: outcome.label,
            dropped: outcome.dropped,
        }
    }

    /// Create a wine from a scan and/or manual fields and check in its first bottles.
    ///
    /// An unavailable scan degrades to an empty label; invalid images do not.
    #[instrument(skip(self, request), fields(quantity = request.quantity), err)]
    pub async fn checkin(&self, request: CheckInRequest) -> Result<WineWithInventory, CellarError> {
        let CheckInRequest {
            images,
            prescanned,
            manual,
            quantity,
            notes,
        } = request;

        let scanned = match (prescanned, images) {
            (Some(scan), _) => Some(self.parse(scan)),
            (None, Some(_)) if manual.name.is_some() => None,
            (None, Some(images)) => match self.scan(&images).await {
                Ok(scan) => Some(scan),
                Err(CellarError::Scan(err @ ScanError::ScanUnavailable { .. })) => {
                    warn!(error = %err, "scan unavailable; checking in with manual fields only");
                    None
                }
                Err(other) => return Err(other),
            },
            (None, None) => None,
        };

        let manual = self.parser.validator().validate(manual).into_label();
        let now = Utc::now();
        let wine = match scanned {
            Some(s) => Wine::new(s.label.overlay(manual), now).with_scan_text(
                s.scan.front_text,
                s.scan.back_text,
                Some(s.scan.engine_used),
            ),
            None => Wine::new(manual, now),
        };

        let receipt = self.ledger.receive(wine.clone(), quantity, notes).await?;
        info!(wine_id = %wine.id, name = wine.display_name(), "wine checked in");
        Ok(WineWithInventory {
            wine,
            inventory: receipt.inventory,
        })
    }

    /// Add bottles to an existing wine.
    pub async fn restock(
        &self,
        wine_id: WineId,
        quantity: i64,
        notes: Option<String>,
    ) -> Result<WineWithInventory, CellarError> {
        let wine = self.load_wine(wine_id).await?;
        let receipt = self.ledger.check_in(wine_id, quantity, notes).await?;
        Ok(self.with_inventory(wine, receipt))
    }

    /// Remove bottles. `InsufficientStock` carries the available quantity.
    pub async fn checkout(
        &self,
        wine_id: WineId,
        quantity: i64,
        notes: Option<String>,
    ) -> Result<WineWithInventory, CellarError> {
        let wine = self.load_wine(wine_id).await?;
        let receipt = self.ledger.check_out(wine_id, quantity, notes).await?;
        Ok(self.with_inventory(wine, receipt))
    }

    /// Refine a wine's fields from a new scan. Quantity is untouched.
    ///
    /// The write is conditional on the wine being unchanged since it was
    /// read; a concurrent refinement is reloaded and the scan applied on top.
    #[instrument(skip(self, images), fields(wine_id = %wine_id.as_uuid()), err)]
    pub async fn rescan(&self, wine_id: WineId, images: &LabelImages) -> Result<Wine, CellarError> {
        self.load_wine(wine_id).await?;
        let scanned = self.scan(images).await?;

        let mut conflicts = 0u32;
        loop {
            let current = self.load_wine(wine_id).await?;
            let expected = current.updated_at;

            // strictly later than what we read, even at storage precision
            let at = Utc::now().max(expected + chrono::Duration::microseconds(1));
            let mut wine = current;
            wine.refine(scanned.label.clone(), at);
            let wine = wine.with_scan_text(
                scanned.scan.front_text.clone(),
                scanned.scan.back_text.clone(),
                Some(scanned.scan.engine_used),
            );

            match self.ledger.store().update_wine(&wine, expected).await {
                Ok(()) => return Ok(wine),
                Err(StoreError::Conflict(msg)) => {
                    conflicts += 1;
                    if conflicts > self.ledger.config().max_conflict_retries {
                        return Err(LedgerError::Conflict(msg).into());
                    }
                    debug!(conflicts, reason = %msg, "wine changed during rescan; reloading");
                    tokio::task::yield_now().await;
                }
                Err(StoreError::NotFound(_)) => {
                    return Err(LedgerError::NotFound(wine_id).into());
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    async fn load_wine(&self, wine_id: WineId) -> Result<Wine, CellarError> {
        self.ledger
            .store()
            .load_wine(wine_id)
            .await?
            .ok_or(CellarError::Ledger(LedgerError::NotFound(wine_id)))
    }

    fn with_inventory(&self, wine: Wine, receipt: MovementReceipt) -> WineWithInventory {
        WineWithInventory {
            wine,
            inventory: receipt.inventory,
        }
    }
}
