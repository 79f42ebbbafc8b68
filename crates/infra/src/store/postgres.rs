//! Postgres-backed record store.
//!
//! Each aggregate lives in one row: its key, its `version`, and the full record
//! as a JSONB document. Conditional writes are expressed in SQL:
//!
//! | Expectation | Statement | Conflict when |
//! |-------------|-----------|---------------|
//! | `Exact(0)` | `INSERT ... ON CONFLICT DO NOTHING` | no row inserted |
//! | `Exact(v)` | `UPDATE ... WHERE version = v` | no row updated |
//! | `Any` | `INSERT ... ON CONFLICT DO UPDATE` | never |
//!
//! A [`ChangeSet`] is written inside one transaction, which is rolled back on
//! the first conflict.
//!
//! ## Runtime
//!
//! The [`Store`] trait is synchronous. Calls are bridged onto tokio with
//! `Handle::block_on`, so they must come from a thread that is not driving the
//! runtime (for example `tokio::task::spawn_blocking`, or a plain thread when
//! the store was created inside a runtime).

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::instrument;
use uuid::Uuid;

use stockflow_cart::Cart;
use stockflow_catalog::Item;
use stockflow_core::{AggregateRoot, ExpectedVersion, ItemId, OrderId, UserId};
use stockflow_orders::Order;

use super::{ChangeSet, Store, StoreError};

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS catalog_items (
        id UUID PRIMARY KEY,
        version BIGINT NOT NULL CHECK (version > 0),
        doc JSONB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS carts (
        user_id UUID PRIMARY KEY,
        version BIGINT NOT NULL CHECK (version > 0),
        doc JSONB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL,
        version BIGINT NOT NULL CHECK (version > 0),
        doc JSONB NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS orders_user_id_idx ON orders (user_id)",
];

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    runtime: Option<Handle>,
}

impl PostgresStore {
    /// Wrap a connection pool. If called inside a tokio runtime, that runtime
    /// is remembered for calls made later from plain threads.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Create tables and indexes if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(item_id = %item_id), err)]
    pub async fn fetch_item(&self, item_id: ItemId) -> Result<Option<Item>, StoreError> {
        let row = sqlx::query("SELECT doc FROM catalog_items WHERE id = $1")
            .bind(item_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_item", e))?;
        row.map(|r| decode_doc(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn fetch_items(&self) -> Result<Vec<Item>, StoreError> {
        let rows = sqlx::query("SELECT doc FROM catalog_items")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_items", e))?;
        rows.iter().map(decode_doc).collect()
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn fetch_cart(&self, user_id: UserId) -> Result<Option<Cart>, StoreError> {
        let row = sqlx::query("SELECT doc FROM carts WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_cart", e))?;
        row.map(|r| decode_doc(&r)).transpose()
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn fetch_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query("SELECT doc FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_order", e))?;
        row.map(|r| decode_doc(&r)).transpose()
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn fetch_orders(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query("SELECT doc FROM orders WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_orders", e))?;
        rows.iter().map(decode_doc).collect()
    }

    /// Write every staged record in one transaction.
    #[instrument(skip(self, changes), fields(records = changes.len()), err)]
    pub async fn commit_changes(&self, changes: ChangeSet) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut writes = Vec::with_capacity(changes.len());
        for s in changes.items() {
            let key = *s.record.id_typed().as_uuid();
            writes.push(RowWrite::new("catalog_items", "id", key, None, &s.record, s.expected)?);
        }
        for s in changes.carts() {
            let key = *s.record.user_id().as_uuid();
            writes.push(RowWrite::new("carts", "user_id", key, None, &s.record, s.expected)?);
        }
        for s in changes.orders() {
            let key = *s.record.id_typed().as_uuid();
            let owner = s.record.user_id().map(Uuid::from);
            writes.push(RowWrite::new("orders", "id", key, owner, &s.record, s.expected)?);
        }

        for write in writes {
            if let Err(err) = write.execute(&mut tx).await {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(err);
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    fn block_on<F: Future>(&self, fut: F) -> Result<F::Output, StoreError> {
        let handle = Handle::try_current()
            .ok()
            .or_else(|| self.runtime.clone())
            .ok_or_else(|| {
                StoreError::Backend(
                    "PostgresStore requires a tokio runtime; create it inside one or pass with_runtime()"
                        .to_string(),
                )
            })?;
        Ok(handle.block_on(fut))
    }
}

struct RowWrite {
    table: &'static str,
    key_column: &'static str,
    key: Uuid,
    owner: Option<Uuid>,
    version: i64,
    doc: JsonValue,
    expected: ExpectedVersion,
}

impl RowWrite {
    fn new<T>(
        table: &'static str,
        key_column: &'static str,
        key: Uuid,
        owner: Option<Uuid>,
        record: &T,
        expected: ExpectedVersion,
    ) -> Result<Self, StoreError>
    where
        T: AggregateRoot + Serialize,
    {
        let version = i64::try_from(record.version())
            .map_err(|_| StoreError::Backend(format!("{table} version out of range")))?;
        let doc = serde_json::to_value(record)
            .map_err(|e| StoreError::Backend(format!("failed to encode {table} record: {e}")))?;
        Ok(Self {
            table,
            key_column,
            key,
            owner,
            version,
            doc,
            expected,
        })
    }

    async fn execute(self, tx: &mut Transaction<'_, Postgres>) -> Result<(), StoreError> {
        let RowWrite {
            table,
            key_column,
            key,
            owner,
            version,
            doc,
            expected,
        } = self;

        let (owner_column, owner_param) = if owner.is_some() {
            (", user_id", ", $4")
        } else {
            ("", "")
        };

        let result = match expected {
            ExpectedVersion::Exact(0) => {
                let sql = format!(
                    "INSERT INTO {table} ({key_column}, version, doc{owner_column}) \
                     VALUES ($1, $2, $3{owner_param}) ON CONFLICT ({key_column}) DO NOTHING"
                );
                let mut query = sqlx::query(&sql).bind(key).bind(version).bind(doc);
                if let Some(owner) = owner {
                    query = query.bind(owner);
                }
                query.execute(&mut **tx).await
            }
            ExpectedVersion::Exact(current) => {
                let sql = format!(
                    "UPDATE {table} SET version = $2, doc = $3 \
                     WHERE {key_column} = $1 AND version = $4"
                );
                sqlx::query(&sql)
                    .bind(key)
                    .bind(version)
                    .bind(doc)
                    .bind(current as i64)
                    .execute(&mut **tx)
                    .await
            }
            ExpectedVersion::Any => {
                let sql = format!(
                    "INSERT INTO {table} ({key_column}, version, doc{owner_column}) \
                     VALUES ($1, $2, $3{owner_param}) ON CONFLICT ({key_column}) \
                     DO UPDATE SET version = EXCLUDED.version, doc = EXCLUDED.doc"
                );
                let mut query = sqlx::query(&sql).bind(key).bind(version).bind(doc);
                if let Some(owner) = owner {
                    query = query.bind(owner);
                }
                query.execute(&mut **tx).await
            }
        }
        .map_err(|e| map_sqlx_error("write_record", e))?;

        if result.rows_affected() == 0 && expected != ExpectedVersion::Any {
            return Err(StoreError::Conflict(format!(
                "{table} {key}: expected {expected:?}"
            )));
        }
        Ok(())
    }
}

fn decode_doc<T: DeserializeOwned>(row: &sqlx::postgres::PgRow) -> Result<T, StoreError> {
    let Json(record) = row
        .try_get::<Json<T>, _>("doc")
        .map_err(|e| StoreError::Backend(format!("failed to decode record: {e}")))?;
    Ok(record)
}

/// Map SQLx errors to [`StoreError`].
///
/// A unique violation (`23505`) means a concurrent writer created the same
/// record first and is reported as a conflict.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

impl Store for PostgresStore {
    fn load_item(&self, item_id: ItemId) -> Result<Option<Item>, StoreError> {
        self.block_on(self.fetch_item(item_id))?
    }

    fn list_items(&self) -> Result<Vec<Item>, StoreError> {
        self.block_on(self.fetch_items())?
    }

    fn load_cart(&self, user_id: UserId) -> Result<Option<Cart>, StoreError> {
        self.block_on(self.fetch_cart(user_id))?
    }

    fn load_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        self.block_on(self.fetch_order(order_id))?
    }

    fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        self.block_on(self.fetch_orders(user_id))?
    }

    fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        self.block_on(self.commit_changes(changes))?
    }
}
