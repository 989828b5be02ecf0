use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use winebox_core::{Aggregate, AggregateRoot, DomainError, Event, TransactionId, WineId};

use crate::transaction::{InventoryRecord, Transaction, TransactionType};

/// Aggregate root: the stock level of one wine.
///
/// Quantity is never negative and only changes through `StockEvent`s, each of
/// which becomes exactly one ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WineStock {
    wine_id: WineId,
    quantity: i64,
    version: u64,
    created: bool,
}

impl WineStock {
    /// A wine with no inventory row yet (before its first check-in).
    pub fn empty(wine_id: WineId) -> Self {
        Self {
            wine_id,
            quantity: 0,
            version: 0,
            created: false,
        }
    }

    pub fn from_record(record: &InventoryRecord) -> Self {
        Self {
            wine_id: record.wine_id,
            quantity: record.quantity,
            version: record.version,
            created: true,
        }
    }

    /// Rebuild stock from committed history (oldest first).
    pub fn replay<'a>(wine_id: WineId, history: impl IntoIterator<Item = &'a Transaction>) -> Self {
        let mut stock = Self::empty(wine_id);
        for tx in history {
            stock.apply(&StockEvent::from_transaction(tx));
        }
        stock
    }

    pub fn wine_id(&self) -> WineId {
        self.wine_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    /// Persisted version, or `None` if no inventory row exists yet.
    pub fn persisted_version(&self) -> Option<u64> {
        self.created.then_some(self.version)
    }

    pub fn to_record(&self, updated_at: DateTime<Utc>) -> InventoryRecord {
        InventoryRecord {
            wine_id: self.wine_id,
            quantity: self.quantity,
            version: self.version,
            updated_at,
        }
    }
}

impl AggregateRoot for WineStock {
    type Id = WineId;

    fn id(&self) -> &Self::Id {
        &self.wine_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: add bottles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckIn {
    pub wine_id: WineId,
    pub transaction_id: TransactionId,
    pub quantity: i64,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: remove bottles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOut {
    pub wine_id: WineId,
    pub transaction_id: TransactionId,
    pub quantity: i64,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    CheckIn(CheckIn),
    CheckOut(CheckOut),
}

impl StockCommand {
    pub fn wine_id(&self) -> WineId {
        match self {
            StockCommand::CheckIn(c) => c.wine_id,
            StockCommand::CheckOut(c) => c.wine_id,
        }
    }
}

/// Payload shared by both movement events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub wine_id: WineId,
    pub transaction_id: TransactionId,
    pub quantity: i64,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    CheckedIn(StockMovement),
    CheckedOut(StockMovement),
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::CheckedIn(_) => "inventory.wine.checked_in",
            StockEvent::CheckedOut(_) => "inventory.wine.checked_out",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.movement().occurred_at
    }
}

impl StockEvent {
    pub fn movement(&self) -> &StockMovement {
        match self {
            StockEvent::CheckedIn(m) | StockEvent::CheckedOut(m) => m,
        }
    }

    pub fn kind(&self) -> TransactionType {
        match self {
            StockEvent::CheckedIn(_) => TransactionType::CheckIn,
            StockEvent::CheckedOut(_) => TransactionType::CheckOut,
        }
    }

    /// The ledger row recording this event at position `sequence`.
    pub fn to_transaction(&self, sequence: u64) -> Transaction {
        let m = self.movement();
        Transaction {
            id: m.transaction_id,
            wine_id: m.wine_id,
            kind: self.kind(),
            quantity: m.quantity,
            notes: m.notes.clone(),
            occurred_at: m.occurred_at,
            sequence,
        }
    }

    pub fn from_transaction(tx: &Transaction) -> Self {
        let movement = StockMovement {
            wine_id: tx.wine_id,
            transaction_id: tx.id,
            quantity: tx.quantity,
            notes: tx.notes.clone(),
            occurred_at: tx.occurred_at,
        };
        match tx.kind {
            TransactionType::CheckIn => StockEvent::CheckedIn(movement),
            TransactionType::CheckOut => StockEvent::CheckedOut(movement),
        }
    }
}

impl Aggregate for WineStock {
    type Command = StockCommand;
    type Event = StockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockEvent::CheckedIn(m) => {
                self.wine_id = m.wine_id;
                self.quantity += m.quantity;
                self.created = true;
            }
            StockEvent::CheckedOut(m) => {
                self.quantity -= m.quantity;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::CheckIn(cmd) => self.handle_check_in(cmd),
            StockCommand::CheckOut(cmd) => self.handle_check_out(cmd),
        }
    }
}

impl WineStock {
    fn ensure_wine_id(&self, wine_id: WineId) -> Result<(), DomainError> {
        if self.wine_id != wine_id {
            return Err(DomainError::invariant("wine_id mismatch"));
        }
        Ok(())
    }

    fn ensure_positive(quantity: i64) -> Result<(), DomainError> {
        if quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        Ok(())
    }

    fn handle_check_in(&self, cmd: &CheckIn) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_wine_id(cmd.wine_id)?;
        Self::ensure_positive(cmd.quantity)?;

        if self.quantity.checked_add(cmd.quantity).is_none() {
            return Err(DomainError::invariant("stock quantity overflow"));
        }

        Ok(vec![StockEvent::CheckedIn(StockMovement {
            wine_id: cmd.wine_id,
            transaction_id: cmd.transaction_id,
            quantity: cmd.quantity,
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_check_out(&self, cmd: &CheckOut) -> Result<Vec<StockEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_wine_id(cmd.wine_id)?;
        Self::ensure_positive(cmd.quantity)?;

        if cmd.quantity > self.quantity {
            return Err(DomainError::insufficient_stock(self.quantity, cmd.quantity));
        }

        Ok(vec![StockEvent::CheckedOut(StockMovement {
            wine_id: cmd.wine_id,
            transaction_id: cmd.transaction_id,
            quantity: cmd.quantity,
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
