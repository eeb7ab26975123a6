//! Postgres-backed ledger store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | Result |
//! |------------|----------------------|--------|
//! | Database (unique violation) on `withdrawals` | `23505` | `WithdrawOutcome::Duplicate` |
//! | Database (other) | any | `StoreError::Database` |
//! | PoolClosed | N/A | `StoreError::PoolClosed` |
//! | row decode failure | N/A | `StoreError::Corrupt` |
//!
//! ## Withdrawal Atomicity
//!
//! `withdraw()` runs in one transaction that first takes a transaction-scoped
//! advisory lock keyed by the owner, so withdrawals of the same user are
//! serialized while different users proceed in parallel. Under that lock it
//! checks for a duplicate id, recomputes the balance and inserts the row. The
//! primary key on `withdrawals.order_number` still catches duplicate ids raced
//! in by a different owner.
//!
//! ## Thread Safety
//!
//! `PostgresLedgerStore` is `Send + Sync` and cheap to clone. All operations go
//! through the SQLx connection pool, which is the only resource shared between
//! reconciler tasks.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{info, instrument};
use uuid::Uuid;

use loyalty_core::{Balance, Order, OrderNumber, OrderOutcome, OrderStatus, UserId, Withdrawal};

use super::{LedgerStore, OrderInsert, StoreError, WithdrawOutcome};

/// Idempotent schema, applied at startup.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        number      TEXT PRIMARY KEY,
        owner       UUID NOT NULL,
        status      TEXT NOT NULL
                    CHECK (status IN ('NEW', 'PROCESSING', 'PROCESSED', 'INVALID')),
        accrual_sum NUMERIC NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS orders_owner_idx ON orders (owner, created_at)",
    r#"
    CREATE INDEX IF NOT EXISTS orders_unterminated_idx ON orders (created_at)
        WHERE status IN ('NEW', 'PROCESSING')
    "#,
    r#"
    CREATE OR REPLACE VIEW unterminated_orders AS
        SELECT number, created_at FROM orders
        WHERE status IN ('NEW', 'PROCESSING')
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS withdrawals (
        order_number TEXT PRIMARY KEY,
        owner        UUID NOT NULL,
        sum          NUMERIC NOT NULL CHECK (sum > 0),
        created_at   TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS withdrawals_owner_idx ON withdrawals (owner, created_at)",
];

const BALANCE_QUERY: &str = r#"
    SELECT
        COALESCE((SELECT SUM(accrual_sum) FROM orders
                  WHERE owner = $1 AND status = 'PROCESSED'), 0) AS accrued,
        COALESCE((SELECT SUM(sum) FROM withdrawals WHERE owner = $1), 0) AS withdrawn
"#;

/// Connection settings for the Postgres ledger store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_uri: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl StoreConfig {
    pub fn new(database_uri: impl Into<String>) -> Self {
        Self {
            database_uri: database_uri.into(),
            max_connections: 20,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Postgres-backed ledger store.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Wrap an existing pool. The schema is not touched; see [`Self::init_schema`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool and make sure the schema exists.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_uri)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        let store = Self::new(pool);
        store.init_schema().await?;
        info!(max_connections = config.max_connections, "ledger store ready");
        Ok(store)
    }

    /// Apply the idempotent schema.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("init_schema", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self, order), fields(order = %order.number, owner = %order.owner), err)]
    async fn insert_order(&self, order: &Order) -> Result<OrderInsert, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (number, owner, status, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (number) DO NOTHING
            "#,
        )
        .bind(order.number.as_str())
        .bind(order.owner.as_uuid())
        .bind(order.status.as_str())
        .bind(order.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?
        .rows_affected();

        if inserted == 1 {
            return Ok(OrderInsert::Inserted);
        }

        // Rows are never deleted, so the conflicting row is still there.
        let owner: Uuid = sqlx::query_scalar("SELECT owner FROM orders WHERE number = $1")
            .bind(order.number.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("select_order_owner", e))?;

        Ok(OrderInsert::Existing {
            owner: UserId::from_uuid(owner),
        })
    }

    #[instrument(skip(self), fields(order = %number), err)]
    async fn order(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT number, owner, status, accrual_sum, created_at
            FROM orders
            WHERE number = $1
            "#,
        )
        .bind(number.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("select_order", e))?;

        row.map(|r| order_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(owner = %owner), err)]
    async fn orders_for(&self, owner: UserId) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT number, owner, status, accrual_sum, created_at
            FROM orders
            WHERE owner = $1
            ORDER BY created_at ASC, number ASC
            "#,
        )
        .bind(owner.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("select_orders", e))?;

        rows.iter().map(order_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn unterminated_orders(&self) -> Result<Vec<OrderNumber>, StoreError> {
        let numbers: Vec<String> = sqlx::query_scalar(
            "SELECT number FROM unterminated_orders ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("select_unterminated_orders", e))?;

        numbers
            .iter()
            .map(|n| parse_number("select_unterminated_orders", n))
            .collect()
    }

    #[instrument(skip(self), fields(order = %number, status = %status), err)]
    async fn mark_in_flight(
        &self,
        number: &OrderNumber,
        status: OrderStatus,
    ) -> Result<bool, StoreError> {
        if status.is_terminal() {
            return Ok(false);
        }

        let updated = sqlx::query(
            r#"
            UPDATE orders SET status = $2
            WHERE number = $1
              AND status IN ('NEW', 'PROCESSING')
              AND status <> $2
            "#,
        )
        .bind(number.as_str())
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_in_flight", e))?
        .rows_affected();

        Ok(updated == 1)
    }

    #[instrument(skip(self), fields(order = %number), err)]
    async fn complete_order(
        &self,
        number: &OrderNumber,
        outcome: OrderOutcome,
    ) -> Result<bool, StoreError> {
        // The status predicate makes this a single non-terminal -> terminal
        // transition; replays touch zero rows.
        let updated = sqlx::query(
            r#"
            UPDATE orders SET status = $2, accrual_sum = $3
            WHERE number = $1 AND status IN ('NEW', 'PROCESSING')
            "#,
        )
        .bind(number.as_str())
        .bind(outcome.status().as_str())
        .bind(outcome.accrual())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("complete_order", e))?
        .rows_affected();

        Ok(updated == 1)
    }

    #[instrument(skip(self), fields(owner = %owner), err)]
    async fn balance(&self, owner: UserId) -> Result<Balance, StoreError> {
        let row = sqlx::query(BALANCE_QUERY)
            .bind(owner.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("select_balance", e))?;

        balance_from_row(&row)
    }

    #[instrument(
        skip(self, withdrawal),
        fields(owner = %withdrawal.owner, order = %withdrawal.order_number, sum = %withdrawal.sum),
        err
    )]
    async fn withdraw(&self, withdrawal: &Withdrawal) -> Result<WithdrawOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        lock_owner(&mut tx, withdrawal.owner).await?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM withdrawals WHERE order_number = $1)",
        )
        .bind(withdrawal.order_number.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("select_withdrawal", e))?;
        if exists {
            rollback(tx).await?;
            return Ok(WithdrawOutcome::Duplicate);
        }

        let row = sqlx::query(BALANCE_QUERY)
            .bind(withdrawal.owner.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("select_balance", e))?;
        let balance = balance_from_row(&row)?;

        let Some(after) = balance.after_withdrawal(withdrawal.sum) else {
            rollback(tx).await?;
            return Ok(WithdrawOutcome::InsufficientFunds(balance));
        };

        let insert = sqlx::query(
            r#"
            INSERT INTO withdrawals (order_number, owner, sum, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(withdrawal.order_number.as_str())
        .bind(withdrawal.owner.as_uuid())
        .bind(withdrawal.sum)
        .bind(withdrawal.created_at)
        .execute(&mut *tx)
        .await;

        match insert {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                rollback(tx).await?;
                return Ok(WithdrawOutcome::Duplicate);
            }
            Err(e) => return Err(map_sqlx_error("insert_withdrawal", e)),
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(WithdrawOutcome::Recorded(after))
    }

    #[instrument(skip(self), fields(owner = %owner), err)]
    async fn withdrawals_for(&self, owner: UserId) -> Result<Vec<Withdrawal>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT order_number, owner, sum, created_at
            FROM withdrawals
            WHERE owner = $1
            ORDER BY created_at ASC, order_number ASC
            "#,
        )
        .bind(owner.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("select_withdrawals", e))?;

        rows.iter().map(withdrawal_from_row).collect()
    }
}

/// Serialize withdrawals of one owner for the rest of the transaction.
async fn lock_owner(tx: &mut Transaction<'_, Postgres>, owner: UserId) -> Result<(), StoreError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
        .bind(owner.to_string())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_owner", e))?;
    Ok(())
}

async fn rollback(tx: Transaction<'_, Postgres>) -> Result<(), StoreError> {
    tx.rollback()
        .await
        .map_err(|e| map_sqlx_error("rollback", e))
}

fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => StoreError::Database {
            operation,
            message: match db_err.code() {
                Some(code) => format!("{} (code {})", db_err.message(), code),
                None => db_err.message().to_string(),
            },
        },
        sqlx::Error::PoolClosed => StoreError::PoolClosed(operation),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => StoreError::Corrupt {
            operation,
            message: err.to_string(),
        },
        _ => StoreError::Database {
            operation,
            message: err.to_string(),
        },
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

fn parse_number(operation: &'static str, raw: &str) -> Result<OrderNumber, StoreError> {
    OrderNumber::parse(raw).map_err(|e| StoreError::Corrupt {
        operation,
        message: e.to_string(),
    })
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    const OP: &str = "decode_order";
    let decode = |e: sqlx::Error| map_sqlx_error(OP, e);

    let number: String = row.try_get("number").map_err(decode)?;
    let owner: Uuid = row.try_get("owner").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let accrual: Option<Decimal> = row.try_get("accrual_sum").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;

    Ok(Order {
        number: parse_number(OP, &number)?,
        owner: UserId::from_uuid(owner),
        status: OrderStatus::parse(&status).map_err(|e| StoreError::Corrupt {
            operation: OP,
            message: e.to_string(),
        })?,
        accrual,
        created_at,
    })
}

fn withdrawal_from_row(row: &PgRow) -> Result<Withdrawal, StoreError> {
    const OP: &str = "decode_withdrawal";
    let decode = |e: sqlx::Error| map_sqlx_error(OP, e);

    let number: String = row.try_get("order_number").map_err(decode)?;
    let owner: Uuid = row.try_get("owner").map_err(decode)?;
    let sum: Decimal = row.try_get("sum").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;

    Ok(Withdrawal {
        order_number: parse_number(OP, &number)?,
        owner: UserId::from_uuid(owner),
        sum,
        created_at,
    })
}

fn balance_from_row(row: &PgRow) -> Result<Balance, StoreError> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode_balance", e);
    let accrued: Decimal = row.try_get("accrued").map_err(decode)?;
    let withdrawn: Decimal = row.try_get("withdrawn").map_err(decode)?;
    Ok(Balance::from_totals(accrued, withdrawn))
}
