//! Postgres-backed ledger store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Concurrent first check-in or racing sequence number |
//! | Database (unique violation on transaction id) | `23505` | `Duplicate` | Transaction id reused |
//! | Database (foreign key violation) | `23503` | `NotFound` | Movement for a wine that is not in the catalog |
//! | Database (check constraint violation) | `23514` | `Backend` | Negative quantity or non-positive movement |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolClosed | N/A | `Backend` | Connection pool was closed |
//! | RowNotFound | N/A | `NotFound` | Unexpected row not found |
//! | Other | N/A | `Backend` | Network errors, connection failures, etc. |
//!
//! ## Compare-and-swap
//!
//! `commit()` runs in one database transaction. An existing inventory row is
//! only updated `WHERE version = $expected`; zero affected rows means another
//! writer committed first and the whole transaction is rolled back.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::{instrument, Span};
use uuid::Uuid;

use winebox_core::{ExpectedVersion, TransactionId, WineId};
use winebox_inventory::{InventoryRecord, Transaction, TransactionType, Wine};
use winebox_label::{EngineKind, WineLabelData};

use super::{LedgerCommit, LedgerStore, Pagination, StoreError, TransactionFilter, TransactionPage};

/// Tables used by [`PostgresLedgerStore`]. Safe to run repeatedly.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS wines (
    id               UUID PRIMARY KEY,
    name             TEXT,
    label            JSONB NOT NULL,
    front_label_text TEXT NOT NULL DEFAULT '',
    back_label_text  TEXT,
    scan_engine      TEXT CHECK (scan_engine IN ('vision', 'local')),
    created_at       TIMESTAMPTZ NOT NULL,
    updated_at       TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS wine_inventory (
    wine_id    UUID PRIMARY KEY REFERENCES wines (id),
    quantity   BIGINT NOT NULL CHECK (quantity >= 0),
    version    BIGINT NOT NULL CHECK (version > 0),
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS inventory_transactions (
    position         BIGSERIAL,
    id               UUID PRIMARY KEY,
    wine_id          UUID NOT NULL REFERENCES wines (id),
    transaction_type TEXT NOT NULL CHECK (transaction_type IN ('CHECK_IN', 'CHECK_OUT')),
    quantity         BIGINT NOT NULL CHECK (quantity > 0),
    notes            TEXT,
    occurred_at      TIMESTAMPTZ NOT NULL,
    sequence         BIGINT NOT NULL CHECK (sequence > 0),
    CONSTRAINT inventory_transactions_wine_sequence UNIQUE (wine_id, sequence)
);

CREATE INDEX IF NOT EXISTS inventory_transactions_position
    ON inventory_transactions (position DESC);
"#;

const TRANSACTION_PK: &str = "inventory_transactions_pkey";

#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the tables if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self), fields(wine_id = %id.as_uuid()), err)]
    async fn load_wine(&self, id: WineId) -> Result<Option<Wine>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, label, front_label_text, back_label_text, scan_engine, created_at, updated_at
            FROM wines
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_wine", e))?;

        row.map(|r| WineRow::from_row(&r).map_err(|e| map_sqlx_error("load_wine", e)))
            .transpose()?
            .map(Wine::try_from)
            .transpose()
    }

    #[instrument(skip(self, wine), fields(wine_id = %wine.id.as_uuid()), err)]
    async fn save_wine(&self, wine: &Wine) -> Result<(), StoreError> {
        let label = label_json(&wine.label)?;
        sqlx::query(
            r#"
            INSERT INTO wines (id, name, label, front_label_text, back_label_text, scan_engine, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                label = EXCLUDED.label,
                front_label_text = EXCLUDED.front_label_text,
                back_label_text = EXCLUDED.back_label_text,
                scan_engine = EXCLUDED.scan_engine,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(wine.id.as_uuid())
        .bind(wine.label.name_value())
        .bind(label)
        .bind(&wine.front_label_text)
        .bind(wine.back_label_text.as_deref())
        .bind(wine.scan_engine.map(EngineKind::as_str))
        .bind(wine.created_at)
        .bind(wine.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_wine", e))?;
        Ok(())
    }

    #[instrument(skip(self, wine), fields(wine_id = %wine.id.as_uuid()), err)]
    async fn update_wine(
        &self,
        wine: &Wine,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let label = label_json(&wine.label)?;
        let result = sqlx::query(
            r#"
            UPDATE wines SET
                name = $2,
                label = $3,
                front_label_text = $4,
                back_label_text = $5,
                scan_engine = $6,
                updated_at = $7
            WHERE id = $1 AND updated_at = $8
            "#,
        )
        .bind(wine.id.as_uuid())
        .bind(wine.label.name_value())
        .bind(label)
        .bind(&wine.front_label_text)
        .bind(wine.back_label_text.as_deref())
        .bind(wine.scan_engine.map(EngineKind::as_str))
        .bind(wine.updated_at)
        .bind(expected_updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_wine", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let exists = sqlx::query("SELECT 1 FROM wines WHERE id = $1")
            .bind(wine.id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_wine", e))?
            .is_some();
        if exists {
            Err(StoreError::Conflict(format!("wine {} changed since it was read", wine.id)))
        } else {
            Err(StoreError::NotFound(format!("wine {}", wine.id)))
        }
    }

    #[instrument(skip(self), fields(wine_id = %wine_id.as_uuid()), err)]
    async fn load_inventory(&self, wine_id: WineId) -> Result<Option<InventoryRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT wine_id, quantity, version, updated_at
            FROM wine_inventory
            WHERE wine_id = $1
            "#,
        )
        .bind(wine_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_inventory", e))?;

        row.map(|r| InventoryRow::from_row(&r).map_err(|e| map_sqlx_error("load_inventory", e)))
            .transpose()?
            .map(InventoryRecord::try_from)
            .transpose()
    }

    #[instrument(skip(self), fields(wine_id = %wine_id.as_uuid(), rows = tracing::field::Empty), err)]
    async fn load_transactions(&self, wine_id: WineId) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, wine_id, transaction_type, quantity, notes, occurred_at, sequence
            FROM inventory_transactions
            WHERE wine_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(wine_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_transactions", e))?;

        Span::current().record("rows", rows.len());
        rows.iter().map(transaction_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: Pagination,
    ) -> Result<TransactionPage, StoreError> {
        let wine_id = filter.wine_id.map(|id| *id.as_uuid());
        let kind = filter.kind.map(TransactionType::as_str);

        let total: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM inventory_transactions
            WHERE ($1::uuid IS NULL OR wine_id = $1)
              AND ($2::text IS NULL OR transaction_type = $2)
            "#,
        )
        .bind(wine_id)
        .bind(kind)
        .fetch_one(&*self.pool)
        .await
        .and_then(|row| row.try_get("total"))
        .map_err(|e| map_sqlx_error("count_transactions", e))?;

        let rows = sqlx::query(
            r#"
            SELECT id, wine_id, transaction_type, quantity, notes, occurred_at, sequence
            FROM inventory_transactions
            WHERE ($1::uuid IS NULL OR wine_id = $1)
              AND ($2::text IS NULL OR transaction_type = $2)
            ORDER BY position DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(wine_id)
        .bind(kind)
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_transactions", e))?;

        let transactions = rows
            .iter()
            .map(transaction_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let total = total.max(0) as u64;
        let has_more = u64::from(page.offset) + (transactions.len() as u64) < total;

        Ok(TransactionPage {
            transactions,
            total,
            pagination: page,
            has_more,
        })
    }

    #[instrument(skip(self), fields(transaction_id = %id.as_uuid()), err)]
    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, wine_id, transaction_type, quantity, notes, occurred_at, sequence
            FROM inventory_transactions
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_transaction", e))?;

        row.as_ref().map(transaction_from_row).transpose()
    }

    #[instrument(
        skip(self, commit),
        fields(
            wine_id = %commit.wine_id().as_uuid(),
            expected_version = ?commit.expected_version,
            kind = %commit.transaction.kind
        ),
        err
    )]
    async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
        commit.check()?;

        let wine_id = *commit.wine_id().as_uuid();
        let quantity = commit.inventory.quantity;
        let version = to_i64("version", commit.inventory.version)?;
        let sequence = to_i64("sequence", commit.transaction.sequence)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        if let Some(wine) = &commit.new_wine {
            sqlx::query(
                r#"
                INSERT INTO wines (id, name, label, front_label_text, back_label_text, scan_engine, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(wine.id.as_uuid())
            .bind(wine.label.name_value())
            .bind(label_json(&wine.label)?)
            .bind(&wine.front_label_text)
            .bind(wine.back_label_text.as_deref())
            .bind(wine.scan_engine.map(EngineKind::as_str))
            .bind(wine.created_at)
            .bind(wine.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_wine", e))?;
        }

        let affected = match commit.expected_version {
            ExpectedVersion::NoStream => sqlx::query(
                r#"
                INSERT INTO wine_inventory (wine_id, quantity, version, updated_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (wine_id) DO NOTHING
                "#,
            )
            .bind(wine_id)
            .bind(quantity)
            .bind(version)
            .bind(commit.inventory.updated_at)
            .execute(&mut *tx)
            .await,
            ExpectedVersion::Exact(expected) => sqlx::query(
                r#"
                UPDATE wine_inventory
                SET quantity = $2, version = $3, updated_at = $4
                WHERE wine_id = $1 AND version = $5
                "#,
            )
            .bind(wine_id)
            .bind(quantity)
            .bind(version)
            .bind(commit.inventory.updated_at)
            .bind(to_i64("expected_version", expected)?)
            .execute(&mut *tx)
            .await,
            ExpectedVersion::Any => sqlx::query(
                r#"
                INSERT INTO wine_inventory (wine_id, quantity, version, updated_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (wine_id) DO UPDATE SET
                    quantity = EXCLUDED.quantity,
                    version = EXCLUDED.version,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(wine_id)
            .bind(quantity)
            .bind(version)
            .bind(commit.inventory.updated_at)
            .execute(&mut *tx)
            .await,
        }
        .map_err(|e| map_sqlx_error("update_inventory", e))?
        .rows_affected();

        if affected == 0 {
            // Dropping `tx` rolls back the wine insert as well.
            return Err(StoreError::Conflict(format!(
                "inventory for wine {wine_id} is no longer at {:?}",
                commit.expected_version
            )));
        }

        let t = &commit.transaction;
        sqlx::query(
            r#"
            INSERT INTO inventory_transactions (id, wine_id, transaction_type, quantity, notes, occurred_at, sequence)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(t.id.as_uuid())
        .bind(wine_id)
        .bind(t.kind.as_str())
        .bind(t.quantity)
        .bind(t.notes.as_deref())
        .bind(t.occurred_at)
        .bind(sequence)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("append_transaction", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }
}

fn to_i64(what: &str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Serialization(format!("{what} {value} out of range")))
}

fn label_json(label: &WineLabelData) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(label).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") if db_err.constraint() == Some(TRANSACTION_PK) => {
                    StoreError::Duplicate(msg)
                }
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") => StoreError::NotFound(msg),
                Some("23514") => StoreError::Backend(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            StoreError::NotFound(format!("unexpected row not found in {}", operation))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("decode error in {}: {}", operation, err))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Row type for the wines table.
#[derive(Debug)]
struct WineRow {
    id: Uuid,
    label: serde_json::Value,
    front_label_text: String,
    back_label_text: Option<String>,
    scan_engine: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for WineRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(WineRow {
            id: row.try_get("id")?,
            label: row.try_get("label")?,
            front_label_text: row.try_get("front_label_text")?,
            back_label_text: row.try_get("back_label_text")?,
            scan_engine: row.try_get("scan_engine")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<WineRow> for Wine {
    type Error = StoreError;

    fn try_from(row: WineRow) -> Result<Self, Self::Error> {
        let label: WineLabelData = serde_json::from_value(row.label)
            .map_err(|e| StoreError::Serialization(format!("wine label: {e}")))?;
        let scan_engine = match row.scan_engine.as_deref() {
            None => None,
            Some("vision") => Some(EngineKind::Vision),
            Some("local") => Some(EngineKind::Local),
            Some(other) => {
                return Err(StoreError::Serialization(format!("unknown scan engine {other:?}")));
            }
        };
        Ok(Wine {
            id: WineId::from_uuid(row.id),
            label,
            front_label_text: row.front_label_text,
            back_label_text: row.back_label_text,
            scan_engine,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Row type for the wine_inventory table.
#[derive(Debug)]
struct InventoryRow {
    wine_id: Uuid,
    quantity: i64,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for InventoryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(InventoryRow {
            wine_id: row.try_get("wine_id")?,
            quantity: row.try_get("quantity")?,
            version: row.try_get("version")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<InventoryRow> for InventoryRecord {
    type Error = StoreError;

    fn try_from(row: InventoryRow) -> Result<Self, Self::Error> {
        let version = u64::try_from(row.version)
            .map_err(|_| StoreError::Serialization(format!("negative version {}", row.version)))?;
        Ok(InventoryRecord {
            wine_id: WineId::from_uuid(row.wine_id),
            quantity: row.quantity,
            version,
            updated_at: row.updated_at,
        })
    }
}

/// Row type for the inventory_transactions table.
#[derive(Debug)]
struct TransactionRow {
    id: Uuid,
    wine_id: Uuid,
    transaction_type: String,
    quantity: i64,
    notes: Option<String>,
    occurred_at: DateTime<Utc>,
    sequence: i64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for TransactionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TransactionRow {
            id: row.try_get("id")?,
            wine_id: row.try_get("wine_id")?,
            transaction_type: row.try_get("transaction_type")?,
            quantity: row.try_get("quantity")?,
            notes: row.try_get("notes")?,
            occurred_at: row.try_get("occurred_at")?,
            sequence: row.try_get("sequence")?,
        })
    }
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let kind: TransactionType = row
            .transaction_type
            .parse()
            .map_err(|e: winebox_core::DomainError| StoreError::Serialization(e.to_string()))?;
        let sequence = u64::try_from(row.sequence)
            .map_err(|_| StoreError::Serialization(format!("negative sequence {}", row.sequence)))?;
        Ok(Transaction {
            id: TransactionId::from_uuid(row.id),
            wine_id: WineId::from_uuid(row.wine_id),
            kind,
            quantity: row.quantity,
            notes: row.notes,
            occurred_at: row.occurred_at,
            sequence,
        })
    }
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, StoreError> {
    TransactionRow::from_row(row)
        .map_err(|e| map_sqlx_error("decode_transaction", e))
        .and_then(Transaction::try_from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_guards_quantity_and_sequence() {
        assert!(SCHEMA.contains("CHECK (quantity >= 0)"));
        assert!(SCHEMA.contains("UNIQUE (wine_id, sequence)"));
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS wines"));
    }

    #[test]
    fn unknown_transaction_type_is_a_serialization_error() {
        let row = TransactionRow {
            id: Uuid::now_v7(),
            wine_id: Uuid::now_v7(),
            transaction_type: "REFUND".to_string(),
            quantity: 1,
            notes: None,
            occurred_at: Utc::now(),
            sequence: 1,
        };
        assert!(matches!(Transaction::try_from(row), Err(StoreError::Serialization(_))));
    }

    #[test]
    fn rows_convert_to_domain_records() {
        let wine_id = Uuid::now_v7();
        let record = InventoryRecord::try_from(InventoryRow {
            wine_id,
            quantity: 4,
            version: 3,
            updated_at: Utc::now(),
        })
        .unwrap();
        assert_eq!(record.wine_id, WineId::from_uuid(wine_id));
        assert_eq!(record.version, 3);

        let wine = Wine::try_from(WineRow {
            id: wine_id,
            label: serde_json::json!({}),
            front_label_text: "CHATEAU".to_string(),
            back_label_text: None,
            scan_engine: Some("local".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .unwrap();
        assert_eq!(wine.scan_engine, Some(EngineKind::Local));
        assert!(wine.label.is_empty());
    }

    #[test]
    fn pool_closed_maps_to_backend() {
        assert!(matches!(
            map_sqlx_error("load_wine", sqlx::Error::PoolClosed),
            StoreError::Backend(_)
        ));
        assert!(matches!(
            map_sqlx_error("load_wine", sqlx::Error::RowNotFound),
            StoreError::NotFound(_)
        ));
    }
}
