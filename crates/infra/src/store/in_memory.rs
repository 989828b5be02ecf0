use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use winebox_core::{TransactionId, WineId};
use winebox_inventory::{InventoryRecord, Transaction, Wine};

use super::{LedgerCommit, LedgerStore, Pagination, StoreError, TransactionFilter, TransactionPage};

#[derive(Debug, Default)]
struct State {
    wines: HashMap<WineId, Wine>,
    inventory: HashMap<WineId, InventoryRecord>,
    /// Global commit order.
    transactions: Vec<Transaction>,
}

/// In-memory ledger store.
///
/// Intended for tests/dev. Every commit runs its version check and its writes
/// under one write lock, with no await point in between.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<State>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn load_wine(&self, id: WineId) -> Result<Option<Wine>, StoreError> {
        Ok(self.read()?.wines.get(&id).cloned())
    }

    async fn save_wine(&self, wine: &Wine) -> Result<(), StoreError> {
        self.write()?.wines.insert(wine.id, wine.clone());
        Ok(())
    }

    async fn update_wine(
        &self,
        wine: &Wine,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let stored = state
            .wines
            .get_mut(&wine.id)
            .ok_or_else(|| StoreError::NotFound(format!("wine {}", wine.id)))?;
        if stored.updated_at != expected_updated_at {
            return Err(StoreError::Conflict(format!(
                "wine {} changed at {}",
                wine.id, stored.updated_at
            )));
        }
        *stored = wine.clone();
        Ok(())
    }

    async fn load_inventory(&self, wine_id: WineId) -> Result<Option<InventoryRecord>, StoreError> {
        Ok(self.read()?.inventory.get(&wine_id).cloned())
    }

    async fn load_transactions(&self, wine_id: WineId) -> Result<Vec<Transaction>, StoreError> {
        let state = self.read()?;
        let mut history: Vec<Transaction> = state
            .transactions
            .iter()
            .filter(|tx| tx.wine_id == wine_id)
            .cloned()
            .collect();
        history.sort_by_key(|tx| tx.sequence);
        Ok(history)
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: Pagination,
    ) -> Result<TransactionPage, StoreError> {
        let state = self.read()?;
        let matching: Vec<&Transaction> = state
            .transactions
            .iter()
            .rev()
            .filter(|tx| filter.matches(tx))
            .collect();

        let total = matching.len() as u64;
        let transactions: Vec<Transaction> = matching
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect();
        let has_more = u64::from(page.offset) + (transactions.len() as u64) < total;

        Ok(TransactionPage {
            transactions,
            total,
            pagination: page,
            has_more,
        })
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        Ok(self
            .read()?
            .transactions
            .iter()
            .find(|tx| tx.id == id)
            .cloned())
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
        commit.check()?;
        let wine_id = commit.wine_id();

        let mut state = self.write()?;

        let current = state.inventory.get(&wine_id).map(|r| r.version);
        if !commit.expected_version.matches(current) {
            return Err(StoreError::Conflict(format!(
                "expected {:?}, found {current:?}",
                commit.expected_version
            )));
        }
        if let Some(wine) = &commit.new_wine {
            if state.wines.contains_key(&wine.id) {
                return Err(StoreError::Conflict(format!("wine {} already exists", wine.id)));
            }
        } else if !state.wines.contains_key(&wine_id) {
            return Err(StoreError::NotFound(format!("wine {wine_id}")));
        }
        if state.transactions.iter().any(|tx| tx.id == commit.transaction.id) {
            return Err(StoreError::Duplicate(format!(
                "transaction {}",
                commit.transaction.id
            )));
        }
        if let Some(wine) = commit.new_wine {
            state.wines.insert(wine.id, wine);
        }
        state.inventory.insert(wine_id, commit.inventory);
        state.transactions.push(commit.transaction);
        Ok(())
    }
}
