//! Persistence boundary for wines, inventory and the transaction ledger.
//!
//! `commit` is the only write path for stock. It applies a conditional
//! inventory update and the matching transaction append as one unit, so a
//! stale decision can never overwrite a newer quantity.

mod in_memory;
mod postgres;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::{PostgresLedgerStore, SCHEMA};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use winebox_core::{ExpectedVersion, TransactionId, WineId};
use winebox_inventory::{InventoryRecord, Transaction, TransactionType, Wine};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The inventory row changed since it was read.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Pagination parameters for transaction listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).min(1000),
            offset: offset.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub wine_id: Option<WineId>,
    pub kind: Option<TransactionType>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &Transaction) -> bool {
        self.wine_id.is_none_or(|id| id == tx.wine_id) && self.kind.is_none_or(|k| k == tx.kind)
    }
}

/// One page of transactions, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPage {
    pub transactions: Vec<Transaction>,
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

/// Atomic ledger write.
///
/// `expected_version` guards the inventory row: `NoStream` for a wine's first
/// movement, `Exact(v)` afterwards. `new_wine` is inserted in the same unit
/// when the movement creates the wine.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerCommit {
    pub expected_version: ExpectedVersion,
    pub inventory: InventoryRecord,
    pub transaction: Transaction,
    pub new_wine: Option<Wine>,
}

impl LedgerCommit {
    pub fn wine_id(&self) -> WineId {
        self.inventory.wine_id
    }

    /// Structural checks every backend applies before touching storage.
    pub fn check(&self) -> Result<(), StoreError> {
        let wine_id = self.inventory.wine_id;
        if self.transaction.wine_id != wine_id {
            return Err(StoreError::Backend(
                "transaction and inventory target different wines".to_string(),
            ));
        }
        if self.new_wine.as_ref().is_some_and(|w| w.id != wine_id) {
            return Err(StoreError::Backend(
                "new wine and inventory target different wines".to_string(),
            ));
        }
        if self.transaction.sequence != self.inventory.version {
            return Err(StoreError::Backend(format!(
                "transaction sequence {} does not match inventory version {}",
                self.transaction.sequence, self.inventory.version
            )));
        }
        if self.inventory.quantity < 0 {
            return Err(StoreError::Backend(format!(
                "refusing to store negative quantity {}",
                self.inventory.quantity
            )));
        }
        Ok(())
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load_wine(&self, id: WineId) -> Result<Option<Wine>, StoreError>;

    /// Insert or update catalog fields. Never touches inventory.
    async fn save_wine(&self, wine: &Wine) -> Result<(), StoreError>;

    /// Overwrite an existing wine only if its stored `updated_at` still equals
    /// `expected_updated_at`. Fails with `Conflict` otherwise.
    async fn update_wine(
        &self,
        wine: &Wine,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn load_inventory(&self, wine_id: WineId) -> Result<Option<InventoryRecord>, StoreError>;

    /// A wine's transactions in commit order.
    async fn load_transactions(&self, wine_id: WineId) -> Result<Vec<Transaction>, StoreError>;

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: Pagination,
    ) -> Result<TransactionPage, StoreError>;

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError>;

    /// Fails with `Conflict` when `expected_version` no longer matches.
    async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: LedgerStore + ?Sized> LedgerStore for Arc<T> {
    async fn load_wine(&self, id: WineId) -> Result<Option<Wine>, StoreError> {
        (**self).load_wine(id).await
    }

    async fn save_wine(&self, wine: &Wine) -> Result<(), StoreError> {
        (**self).save_wine(wine).await
    }

    async fn update_wine(
        &self,
        wine: &Wine,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        (**self).update_wine(wine, expected_updated_at).await
    }

    async fn load_inventory(&self, wine_id: WineId) -> Result<Option<InventoryRecord>, StoreError> {
        (**self).load_inventory(wine_id).await
    }

    async fn load_transactions(&self, wine_id: WineId) -> Result<Vec<Transaction>, StoreError> {
        (**self).load_transactions(wine_id).await
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: Pagination,
    ) -> Result<TransactionPage, StoreError> {
        (**self).list_transactions(filter, page).await
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        (**self).get_transaction(id).await
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
        (**self).commit(commit).await
    }
}
