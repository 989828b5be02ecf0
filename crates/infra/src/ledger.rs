//! Inventory ledger orchestration.
//!
//! Every movement follows the same pipeline:
//!
//! ```text
//! load inventory row ──> rebuild WineStock ──> handle command (pure)
//!        ^                                            │
//!        │ Conflict (bounded retry)                   v
//!        └──────────────── store.commit(expected_version, record + transaction)
//! ```
//!
//! The precondition (enough stock) is decided against the version that the
//! commit is conditioned on, so two racing check-outs cannot both pass: the
//! loser reloads, re-decides, and is refused with `InsufficientStock`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use winebox_core::{Aggregate, AggregateRoot, DomainError, ExpectedVersion, TransactionId, WineId};
use winebox_inventory::{
    net_quantity, CheckIn, CheckOut, InventoryRecord, StockCommand, Transaction, TransactionType,
    Wine, WineStock,
};
use winebox_label::WineLabelData;

use crate::config::LedgerConfig;
use crate::store::{LedgerCommit, LedgerStore, Pagination, StoreError, TransactionFilter, TransactionPage};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Reports what is available so the caller can adjust the request.
    #[error("insufficient stock for wine {wine_id}: available {available}, requested {requested}")]
    InsufficientStock {
        wine_id: WineId,
        available: i64,
        requested: i64,
    },

    #[error("wine {0} not found")]
    NotFound(WineId),

    /// Concurrent writers kept winning after every retry.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl LedgerError {
    fn domain(wine_id: WineId, err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => LedgerError::Validation(msg),
            DomainError::InvariantViolation(msg) => LedgerError::InvariantViolation(msg),
            DomainError::NotFound => LedgerError::NotFound(wine_id),
            DomainError::Conflict(msg) => LedgerError::Conflict(msg),
            DomainError::InsufficientStock {
                available,
                requested,
            } => LedgerError::InsufficientStock {
                wine_id,
                available,
                requested,
            },
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => LedgerError::Conflict(msg),
            other => LedgerError::Store(other),
        }
    }
}

/// Outcome of one committed movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementReceipt {
    pub inventory: InventoryRecord,
    pub transaction: Transaction,
}

impl MovementReceipt {
    pub fn new_quantity(&self) -> i64 {
        self.inventory.quantity
    }
}

/// Stored quantity next to the quantity implied by the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub wine_id: WineId,
    pub stored: i64,
    pub computed: i64,
    pub transactions: usize,
}

/// Per-wine stock ledger on top of a [`LedgerStore`].
#[derive(Debug, Clone)]
pub struct InventoryLedger<S> {
    store: S,
    config: LedgerConfig,
}

impl<S> InventoryLedger<S> {
    pub fn new(store: S, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }
}

impl<S: LedgerStore> InventoryLedger<S> {
    /// Add bottles. An unknown `wine_id` gets a placeholder catalog entry in
    /// the same commit.
    #[instrument(skip(self, notes), fields(wine_id = %wine_id.as_uuid()), err)]
    pub async fn check_in(
        &self,
        wine_id: WineId,
        quantity: i64,
        notes: Option<String>,
    ) -> Result<MovementReceipt, LedgerError> {
        self.movement(wine_id, TransactionType::CheckIn, quantity, notes, None)
            .await
    }

    /// Create `wine` together with its first check-in.
    #[instrument(skip(self, wine, notes), fields(wine_id = %wine.id.as_uuid()), err)]
    pub async fn receive(
        &self,
        wine: Wine,
        quantity: i64,
        notes: Option<String>,
    ) -> Result<MovementReceipt, LedgerError> {
        self.movement(wine.id, TransactionType::CheckIn, quantity, notes, Some(wine))
            .await
    }

    /// Remove bottles. Never takes stock below zero.
    #[instrument(skip(self, notes), fields(wine_id = %wine_id.as_uuid()), err)]
    pub async fn check_out(
        &self,
        wine_id: WineId,
        quantity: i64,
        notes: Option<String>,
    ) -> Result<MovementReceipt, LedgerError> {
        self.movement(wine_id, TransactionType::CheckOut, quantity, notes, None)
            .await
    }

    /// Current inventory row. Wines without a row report `NotFound`.
    pub async fn inventory(&self, wine_id: WineId) -> Result<InventoryRecord, LedgerError> {
        self.store
            .load_inventory(wine_id)
            .await?
            .ok_or(LedgerError::NotFound(wine_id))
    }

    /// Committed transactions of one wine, in commit order.
    pub async fn history(&self, wine_id: WineId) -> Result<Vec<Transaction>, LedgerError> {
        let history = self.store.load_transactions(wine_id).await?;
        if history.is_empty() && self.store.load_wine(wine_id).await?.is_none() {
            return Err(LedgerError::NotFound(wine_id));
        }
        Ok(history)
    }

    pub async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: Pagination,
    ) -> Result<TransactionPage, LedgerError> {
        Ok(self.store.list_transactions(filter, page).await?)
    }

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.store.get_transaction(id).await?)
    }

    /// Recompute stock from history; a mismatch is an invariant violation.
    #[instrument(skip(self), fields(wine_id = %wine_id.as_uuid()), err)]
    pub async fn reconcile(&self, wine_id: WineId) -> Result<Reconciliation, LedgerError> {
        let record = self.inventory(wine_id).await?;
        let history = self.store.load_transactions(wine_id).await?;
        let report = Reconciliation {
            wine_id,
            stored: record.quantity,
            computed: net_quantity(&history),
            transactions: history.len(),
        };

        if report.stored != report.computed || record.version != history.len() as u64 {
            warn!(
                stored = report.stored,
                computed = report.computed,
                version = record.version,
                transactions = report.transactions,
                "inventory does not match its ledger"
            );
            return Err(LedgerError::InvariantViolation(format!(
                "wine {wine_id}: stored quantity {} (version {}), ledger says {} over {} transactions",
                report.stored, record.version, report.computed, report.transactions
            )));
        }
        Ok(report)
    }

    async fn movement(
        &self,
        wine_id: WineId,
        kind: TransactionType,
        quantity: i64,
        notes: Option<String>,
        new_wine: Option<Wine>,
    ) -> Result<MovementReceipt, LedgerError> {
        self.check_quantity(quantity)?;
        let notes = self.clean_notes(notes)?;
        let transaction_id = TransactionId::new();

        let mut conflicts = 0u32;
        loop {
            let record = self.store.load_inventory(wine_id).await?;
            let stock = record
                .as_ref()
                .map(WineStock::from_record)
                .unwrap_or_else(|| WineStock::empty(wine_id));

            let creates = match kind {
                TransactionType::CheckIn => self.wine_to_create(&stock, new_wine.as_ref()).await?,
                TransactionType::CheckOut => None,
            };

            let occurred_at = Utc::now();
            let command = match kind {
                TransactionType::CheckIn => StockCommand::CheckIn(CheckIn {
                    wine_id,
                    transaction_id,
                    quantity,
                    notes: notes.clone(),
                    occurred_at,
                }),
                TransactionType::CheckOut => StockCommand::CheckOut(CheckOut {
                    wine_id,
                    transaction_id,
                    quantity,
                    notes: notes.clone(),
                    occurred_at,
                }),
            };

            let events = stock.handle(&command).map_err(|e| {
                let err = LedgerError::domain(wine_id, e);
                if let LedgerError::InsufficientStock {
                    available,
                    requested,
                    ..
                } = &err
                {
                    info!(available, requested, "check-out refused");
                }
                err
            })?;
            let [event] = events.as_slice() else {
                return Err(LedgerError::InvariantViolation(format!(
                    "expected one event per movement, got {}",
                    events.len()
                )));
            };

            let mut next = stock.clone();
            next.apply(event);
            let inventory = next.to_record(occurred_at);
            let transaction = event.to_transaction(next.version());
            let expected_version = match stock.persisted_version() {
                Some(v) => ExpectedVersion::Exact(v),
                None => ExpectedVersion::NoStream,
            };

            let commit = LedgerCommit {
                expected_version,
                inventory: inventory.clone(),
                transaction: transaction.clone(),
                new_wine: creates,
            };

            match self.store.commit(commit).await {
                Ok(()) => {
                    info!(
                        kind = %kind,
                        quantity,
                        new_quantity = inventory.quantity,
                        version = inventory.version,
                        "stock movement committed"
                    );
                    return Ok(MovementReceipt {
                        inventory,
                        transaction,
                    });
                }
                Err(StoreError::Conflict(msg)) => {
                    conflicts += 1;
                    if conflicts > self.config.max_conflict_retries {
                        warn!(conflicts, "giving up after repeated conflicts");
                        return Err(LedgerError::Conflict(msg));
                    }
                    debug!(conflicts, reason = %msg, "concurrent update; reloading");
                    tokio::task::yield_now().await;
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    /// Which catalog row, if any, a first check-in must insert.
    async fn wine_to_create(
        &self,
        stock: &WineStock,
        provided: Option<&Wine>,
    ) -> Result<Option<Wine>, LedgerError> {
        let wine_id = stock.wine_id();
        if stock.exists() {
            return match provided {
                Some(_) => Err(LedgerError::Conflict(format!("wine {wine_id} already exists"))),
                None => Ok(None),
            };
        }

        let existing = self.store.load_wine(wine_id).await?;
        match (existing, provided) {
            (Some(_), Some(_)) => Err(LedgerError::Conflict(format!("wine {wine_id} already exists"))),
            (Some(_), None) => Ok(None),
            (None, Some(wine)) => Ok(Some(wine.clone())),
            (None, None) => {
                debug!("unknown wine; creating placeholder entry");
                Ok(Some(Wine::with_id(wine_id, WineLabelData::default(), Utc::now())))
            }
        }
    }

    fn check_quantity(&self, quantity: i64) -> Result<(), LedgerError> {
        let max = self.config.max_quantity_per_movement;
        if quantity <= 0 {
            return Err(LedgerError::Validation("quantity must be positive".to_string()));
        }
        if quantity > max {
            return Err(LedgerError::Validation(format!(
                "quantity {quantity} exceeds the per-movement limit of {max}"
            )));
        }
        Ok(())
    }

    fn clean_notes(&self, notes: Option<String>) -> Result<Option<String>, LedgerError> {
        let Some(notes) = notes else {
            return Ok(None);
        };
        let trimmed = notes.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let len = trimmed.chars().count();
        if len > self.config.max_notes_len {
            return Err(LedgerError::Validation(format!(
                "notes are {len} characters, limit is {}",
                self.config.max_notes_len
            )));
        }
        Ok(Some(trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryLedgerStore;
    use async_trait::async_trait;
    use chrono::DateTime;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn ledger() -> InventoryLedger<InMemoryLedgerStore> {
        InventoryLedger::new(InMemoryLedgerStore::new(), LedgerConfig::default())
    }

    /// Loses the first `remaining` commits to an imaginary concurrent writer.
    struct Contended {
        inner: InMemoryLedgerStore,
        remaining: AtomicU32,
    }

    #[async_trait]
    impl LedgerStore for Contended {
        async fn load_wine(&self, id: WineId) -> Result<Option<Wine>, StoreError> {
            self.inner.load_wine(id).await
        }
        async fn save_wine(&self, wine: &Wine) -> Result<(), StoreError> {
            self.inner.save_wine(wine).await
        }
        async fn update_wine(
            &self,
            wine: &Wine,
            expected_updated_at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner.update_wine(wine, expected_updated_at).await
        }
        async fn load_inventory(&self, wine_id: WineId) -> Result<Option<InventoryRecord>, StoreError> {
            self.inner.load_inventory(wine_id).await
        }
        async fn load_transactions(&self, wine_id: WineId) -> Result<Vec<Transaction>, StoreError> {
            self.inner.load_transactions(wine_id).await
        }
        async fn list_transactions(
            &self,
            filter: &TransactionFilter,
            page: Pagination,
        ) -> Result<TransactionPage, StoreError> {
            self.inner.list_transactions(filter, page).await
        }
        async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
            self.inner.get_transaction(id).await
        }
        async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
            let lost = self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lost {
                return Err(StoreError::Conflict("simulated".to_string()));
            }
            self.inner.commit(commit).await
        }
    }

    fn contended(losses: u32, retries: u32) -> InventoryLedger<Contended> {
        InventoryLedger::new(
            Contended {
                inner: InMemoryLedgerStore::new(),
                remaining: AtomicU32::new(losses),
            },
            LedgerConfig {
                max_conflict_retries: retries,
                ..LedgerConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn first_check_in_creates_placeholder_wine() {
        let ledger = ledger();
        let wine_id = WineId::new();

        let receipt = ledger.check_in(wine_id, 6, Some("  case from auction ".into())).await.unwrap();
        assert_eq!(receipt.new_quantity(), 6);
        assert_eq!(receipt.transaction.sequence, 1);
        assert_eq!(receipt.transaction.notes.as_deref(), Some("case from auction"));

        let wine = ledger.store().load_wine(wine_id).await.unwrap().unwrap();
        assert_eq!(wine.display_name(), winebox_inventory::UNKNOWN_WINE_NAME);
    }

    #[tokio::test]
    async fn check_out_beyond_stock_is_refused_and_changes_nothing() {
        let ledger = ledger();
        let wine_id = WineId::new();
        ledger.check_in(wine_id, 2, None).await.unwrap();

        let err = ledger.check_out(wine_id, 3, None).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientStock {
                wine_id,
                available: 2,
                requested: 3
            }
        );
        assert_eq!(ledger.inventory(wine_id).await.unwrap().quantity, 2);
        assert_eq!(ledger.history(wine_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn check_out_of_unknown_wine_is_not_found() {
        let ledger = ledger();
        let wine_id = WineId::new();
        assert_eq!(
            ledger.check_out(wine_id, 1, None).await.unwrap_err(),
            LedgerError::NotFound(wine_id)
        );
        assert!(ledger.store().load_wine(wine_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn limits_are_enforced_before_touching_the_store() {
        let ledger = ledger();
        let wine_id = WineId::new();
        for bad in [0, -1, 10_001] {
            assert!(matches!(
                ledger.check_in(wine_id, bad, None).await,
                Err(LedgerError::Validation(_))
            ));
        }
        let long = "x".repeat(2_001);
        assert!(matches!(
            ledger.check_in(wine_id, 1, Some(long)).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(ledger.store().load_wine(wine_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn blank_notes_are_stored_as_none() {
        let ledger = ledger();
        let receipt = ledger.check_in(WineId::new(), 1, Some(" \n ".into())).await.unwrap();
        assert_eq!(receipt.transaction.notes, None);
    }

    #[tokio::test]
    async fn receive_creates_named_wine_once() {
        let ledger = ledger();
        let wine = Wine::new(WineLabelData::default(), Utc::now());
        let id = wine.id;

        ledger.receive(wine.clone(), 3, None).await.unwrap();
        assert!(matches!(
            ledger.receive(wine, 1, None).await,
            Err(LedgerError::Conflict(_))
        ));
        assert_eq!(ledger.inventory(id).await.unwrap().quantity, 3);
    }

    #[tokio::test]
    async fn lost_commits_are_retried() {
        let ledger = contended(3, 16);
        let wine_id = WineId::new();
        let receipt = ledger.check_in(wine_id, 4, None).await.unwrap();
        assert_eq!(receipt.new_quantity(), 4);
        assert_eq!(ledger.history(wine_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let ledger = contended(10, 2);
        let wine_id = WineId::new();
        assert!(matches!(
            ledger.check_in(wine_id, 4, None).await,
            Err(LedgerError::Conflict(_))
        ));
        assert!(ledger.store().inner.load_inventory(wine_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reconcile_detects_tampering() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let ledger = InventoryLedger::new(store.clone(), LedgerConfig::default());
        let wine_id = WineId::new();
        ledger.check_in(wine_id, 5, None).await.unwrap();
        ledger.check_out(wine_id, 2, None).await.unwrap();

        let report = ledger.reconcile(wine_id).await.unwrap();
        assert_eq!((report.stored, report.computed, report.transactions), (3, 3, 2));

        // Rewrite the row behind the ledger's back.
        let mut record = store.load_inventory(wine_id).await.unwrap().unwrap();
        record.quantity = 9;
        record.version += 1;
        let tampered = LedgerCommit {
            expected_version: ExpectedVersion::Any,
            transaction: Transaction {
                id: TransactionId::new(),
                wine_id,
                kind: TransactionType::CheckIn,
                quantity: 1,
                notes: None,
                occurred_at: Utc::now(),
                sequence: record.version,
            },
            inventory: record,
            new_wine: None,
        };
        store.commit(tampered).await.unwrap();

        assert!(matches!(
            ledger.reconcile(wine_id).await,
            Err(LedgerError::InvariantViolation(_))
        ));
    }

    #[derive(Debug, Clone)]
    enum Op {
        In(i64),
        Out(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![(1i64..20).prop_map(Op::In), (1i64..20).prop_map(Op::Out)]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 48, .. ProptestConfig::default() })]

        #[test]
        fn stored_quantity_always_equals_ledger_sum(ops in prop::collection::vec(op(), 1..25)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let ledger = ledger();
                let wine_id = WineId::new();
                let mut expected = 0i64;

                for op in ops {
                    match op {
                        Op::In(q) => {
                            ledger.check_in(wine_id, q, None).await.unwrap();
                            expected += q;
                        }
                        Op::Out(q) => match ledger.check_out(wine_id, q, None).await {
                            Ok(_) => expected -= q,
                            Err(LedgerError::InsufficientStock { available, .. }) => {
                                assert_eq!(available, expected);
                                assert!(q > expected);
                            }
                            Err(LedgerError::NotFound(_)) => assert_eq!(expected, 0),
                            Err(other) => panic!("unexpected {other:?}"),
                        },
                    }
                    assert!(expected >= 0);
                }

                if ledger.inventory(wine_id).await.is_ok() {
                    let report = ledger.reconcile(wine_id).await.unwrap();
                    assert_eq!(report.stored, expected);
                }
            });
        }

        #[test]
        fn check_in_then_out_restores_quantity(start in 0i64..50, q in 1i64..50) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (before, after) = rt.block_on(async {
                let ledger = ledger();
                let wine_id = WineId::new();
                if start > 0 {
                    ledger.check_in(wine_id, start, None).await.unwrap();
                }
                ledger.check_in(wine_id, q, None).await.unwrap();
                let after = ledger.check_out(wine_id, q, None).await.unwrap().new_quantity();
                (start, after)
            });
            prop_assert_eq!(before, after);
        }
    }
}
