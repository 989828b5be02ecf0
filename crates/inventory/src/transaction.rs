use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use winebox_core::{DomainError, TransactionId, WineId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    CheckIn,
    CheckOut,
}

impl TransactionType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::CheckIn => "CHECK_IN",
            TransactionType::CheckOut => "CHECK_OUT",
        }
    }
}

impl core::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TransactionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "CHECK_IN" => Ok(TransactionType::CheckIn),
            "CHECK_OUT" => Ok(TransactionType::CheckOut),
            other => Err(DomainError::validation(format!(
                "unknown transaction type: {other}"
            ))),
        }
    }
}

/// One committed stock movement. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub wine_id: WineId,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    /// Always positive; the direction is carried by `kind`.
    pub quantity: i64,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
    /// Position in the wine's ledger (1-based, commit order).
    pub sequence: u64,
}

impl Transaction {
    /// Effect on stock: positive for check-ins, negative for check-outs.
    pub fn signed_quantity(&self) -> i64 {
        match self.kind {
            TransactionType::CheckIn => self.quantity,
            TransactionType::CheckOut => -self.quantity,
        }
    }
}

/// Σ CHECK_IN − Σ CHECK_OUT over a wine's history.
pub fn net_quantity<'a>(history: impl IntoIterator<Item = &'a Transaction>) -> i64 {
    history.into_iter().map(Transaction::signed_quantity).sum()
}

/// Current stock of one wine.
///
/// `version` counts committed transactions and is the compare-and-swap token
/// for conditional updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub wine_id: WineId,
    pub quantity: i64,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}
