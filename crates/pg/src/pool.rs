//! Postgres connection pool.
//!
//! [`PgStore`] is the sqlx-backed [`Store`]. Rows are returned as JSON
//! objects: every fetched statement is wrapped as
//! `WITH q AS (<statement>) SELECT to_jsonb(q) ...`, which works for plain
//! selects and for `INSERT/UPDATE ... RETURNING *` alike.

use std::path::Path;

use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row as _, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::config::PgConfig;
use crate::store::{Queryable, Row, Store, StoreTx};
use crate::{PgError, Value};

/// Type alias for the shared Postgres pool used across the whole application.
pub type DbPool = PgPool;

/// Create a new connection pool from discrete connection settings.
///
/// Connects eagerly, so a bad host or credentials fail here.
pub async fn create_pool(config: &PgConfig) -> Result<DbPool, PgError> {
    info!(
        "Connecting to database {}@{}:{}/{} (max_connections={})",
        config.user, config.host, config.port, config.database, config.max_connections
    );
    let options = config
        .connect_options()
        .map_err(|e| PgError::Connection(e.to_string()))?;
    let pool = pool_options(config)
        .connect_with(options)
        .await
        .map_err(lifecycle_error)?;
    Ok(pool)
}

fn pool_options(config: &PgConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
}

/// Apply every pending migration found in `dir` (sqlx `<version>_<name>.sql`
/// layout).
pub async fn run_migrations(pool: &DbPool, dir: &Path) -> Result<(), PgError> {
    info!("Running database migrations from {}", dir.display());
    let migrator = Migrator::new(dir).await?;
    migrator.run(pool).await?;
    Ok(())
}

/// Revert applied migrations down to `target` (0 reverts everything). Only
/// reversible migrations (`.up.sql` with a matching `.down.sql`) can be
/// reverted.
pub async fn undo_migrations(pool: &DbPool, dir: &Path, target: i64) -> Result<(), PgError> {
    info!(
        "Reverting database migrations from {} down to version {target}",
        dir.display()
    );
    let migrator = Migrator::new(dir).await?;
    migrator.undo(pool, target).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct PgStore {
    pool: DbPool,
    log_queries: bool,
}

impl PgStore {
    pub fn new(pool: DbPool, log_queries: bool) -> Self {
        Self { pool, log_queries }
    }

    pub async fn connect(config: &PgConfig) -> Result<Self, PgError> {
        Ok(Self::new(create_pool(config).await?, config.log_queries))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl Queryable for PgStore {
    async fn fetch_all(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, PgError> {
        log_statement(self.log_queries, sql, args);
        let wrapped = wrap_as_json(sql);
        let rows = bind_all(sqlx::query(&wrapped), args)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    async fn fetch_optional(&self, sql: &str, args: &[Value]) -> Result<Option<Row>, PgError> {
        log_statement(self.log_queries, sql, args);
        let wrapped = wrap_as_json(sql);
        let row = bind_all(sqlx::query(&wrapped), args)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<u64, PgError> {
        log_statement(self.log_queries, sql, args);
        let done = bind_all(sqlx::query(sql), args).execute(&self.pool).await?;
        Ok(done.rows_affected())
    }

    async fn batch_execute(&self, sql: &str) -> Result<(), PgError> {
        log_statement(self.log_queries, sql, &[]);
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    fn queryable(&self) -> &dyn Queryable {
        self
    }

    #[instrument(skip(self))]
    async fn begin(&self) -> Result<Box<dyn StoreTx>, PgError> {
        let tx = self.pool.begin().await.map_err(lifecycle_error)?;
        debug!("transaction started");
        Ok(Box::new(PgTx {
            inner: Mutex::new(Some(tx)),
            log_queries: self.log_queries,
        }))
    }

    async fn close(&self) {
        info!("Closing database pool");
        self.pool.close().await;
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// An open sqlx transaction. Dropping it unfinished rolls it back.
pub struct PgTx {
    inner: Mutex<Option<Transaction<'static, Postgres>>>,
    log_queries: bool,
}

#[async_trait]
impl Queryable for PgTx {
    async fn fetch_all(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, PgError> {
        log_statement(self.log_queries, sql, args);
        let wrapped = wrap_as_json(sql);
        let mut guard = self.inner.lock().await;
        let tx = guard.as_mut().ok_or(PgError::TxClosed)?;
        let rows = bind_all(sqlx::query(&wrapped), args)
            .fetch_all(&mut **tx)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    async fn fetch_optional(&self, sql: &str, args: &[Value]) -> Result<Option<Row>, PgError> {
        log_statement(self.log_queries, sql, args);
        let wrapped = wrap_as_json(sql);
        let mut guard = self.inner.lock().await;
        let tx = guard.as_mut().ok_or(PgError::TxClosed)?;
        let row = bind_all(sqlx::query(&wrapped), args)
            .fetch_optional(&mut **tx)
            .await?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<u64, PgError> {
        log_statement(self.log_queries, sql, args);
        let mut guard = self.inner.lock().await;
        let tx = guard.as_mut().ok_or(PgError::TxClosed)?;
        let done = bind_all(sqlx::query(sql), args).execute(&mut **tx).await?;
        Ok(done.rows_affected())
    }

    async fn batch_execute(&self, sql: &str) -> Result<(), PgError> {
        log_statement(self.log_queries, sql, &[]);
        let mut guard = self.inner.lock().await;
        let tx = guard.as_mut().ok_or(PgError::TxClosed)?;
        // One statement per call inside a transaction.
        sqlx::query(sql).execute(&mut **tx).await?;
        Ok(())
    }
}

#[async_trait]
impl StoreTx for PgTx {
    fn queryable(&self) -> &dyn Queryable {
        self
    }

    async fn commit(&self) -> Result<(), PgError> {
        let tx = self.inner.lock().await.take().ok_or(PgError::TxClosed)?;
        tx.commit().await.map_err(lifecycle_error)
    }

    async fn rollback(&self) -> Result<(), PgError> {
        let tx = self.inner.lock().await.take().ok_or(PgError::TxClosed)?;
        tx.rollback().await.map_err(lifecycle_error)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn log_statement(enabled: bool, sql: &str, args: &[Value]) {
    if enabled {
        info!(target: "pg::query", "SQL: {} || ARGS: {:?}", sql, args);
    }
}

fn wrap_as_json(sql: &str) -> String {
    let sql = sql.trim().trim_end_matches(';');
    format!("WITH q AS ({sql}) SELECT to_jsonb(q) AS row FROM q")
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    args: &[Value],
) -> Query<'q, Postgres, PgArguments> {
    for arg in args {
        query = match arg.clone() {
            // Only raw statements get here; builders inline NULL.
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(v),
            Value::Int(v) => query.bind(v),
            Value::BigInt(v) => query.bind(v),
            Value::Float(v) => query.bind(v),
            Value::Text(v) => query.bind(v),
            Value::Uuid(v) => query.bind(v),
            Value::Timestamp(v) => query.bind(v),
            Value::Json(v) => query.bind(v),
            Value::TextArray(v) => query.bind(v),
        };
    }
    query
}

fn decode_row(row: &PgRow) -> Result<Row, PgError> {
    match row.try_get::<serde_json::Value, _>("row")? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(PgError::Other(format!("expected a row object, got {other}"))),
    }
}

/// Begin/commit/rollback failures are connection errors unless the server
/// reported a SQLSTATE (e.g. a deferred constraint failing at commit).
fn lifecycle_error(err: sqlx::Error) -> PgError {
    if matches!(err, sqlx::Error::Database(_)) {
        err.into()
    } else {
        PgError::Connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_are_wrapped_for_json_rows() {
        assert_eq!(
            wrap_as_json("SELECT * FROM \"movies\"; "),
            "WITH q AS (SELECT * FROM \"movies\") SELECT to_jsonb(q) AS row FROM q"
        );
    }

    // Integration tests require a real database
    // Run with: POSTGRES_HOST=... cargo test -p pg -- --ignored

    #[tokio::test]
    #[ignore = "requires database"]
    async fn pool_acquires_connection() {
        let config = PgConfig::from_env().expect("POSTGRES_* settings required");
        let store = PgStore::connect(&config).await.expect("pool creation failed");
        store.ping().await.expect("ping failed");

        let row = store
            .queryable()
            .fetch_one("SELECT $1::int4 AS n, $2::text AS s", &[Value::Int(7), "x".into()])
            .await
            .expect("query failed");
        assert_eq!(row["n"], 7);
        assert_eq!(row["s"], "x");
        store.close().await;
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn closed_transaction_reports_tx_closed() {
        let config = PgConfig::from_env().expect("POSTGRES_* settings required");
        let store = PgStore::connect(&config).await.expect("pool creation failed");
        let tx = store.begin().await.expect("begin failed");
        tx.commit().await.expect("commit failed");
        assert!(matches!(tx.rollback().await, Err(PgError::TxClosed)));
        store.close().await;
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn transaction_batches_and_single_row_reads() {
        let config = PgConfig::from_env().expect("POSTGRES_* settings required");
        let store = PgStore::connect(&config).await.expect("pool creation failed");
        let tx = store.begin().await.expect("begin failed");
        let conn = tx.queryable();

        conn.batch_execute("SET LOCAL deadlock_timeout = '3s'")
            .await
            .expect("batch failed");
        let row = conn
            .fetch_optional("SELECT current_setting('deadlock_timeout') AS t", &[])
            .await
            .expect("query failed")
            .expect("one row");
        assert_eq!(row["t"], "3s");

        let none = conn
            .fetch_optional("SELECT 1 AS n WHERE false", &[])
            .await
            .expect("query failed");
        assert!(none.is_none());

        tx.rollback().await.expect("rollback failed");
        store.close().await;
    }
}
