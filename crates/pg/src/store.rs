//! The store seam.
//!
//! [`Queryable`] is implemented identically by the pool and by an open
//! transaction, so statement-level code never cares which one it runs on.
//! The sqlx implementation lives in [`crate::pool`]; a recording test double
//! lives in [`crate::mock`].

use async_trait::async_trait;

use crate::{PgError, Value};

/// A returned row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[async_trait]
pub trait Queryable: Send + Sync {
    /// Run a statement and collect every returned row.
    async fn fetch_all(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, PgError>;

    /// Run a statement and return its first row, if any.
    async fn fetch_optional(&self, sql: &str, args: &[Value]) -> Result<Option<Row>, PgError> {
        Ok(self.fetch_all(sql, args).await?.into_iter().next())
    }

    /// Run a statement and return its first row, or [`PgError::NotFound`].
    async fn fetch_one(&self, sql: &str, args: &[Value]) -> Result<Row, PgError> {
        self.fetch_optional(sql, args).await?.ok_or(PgError::NotFound)
    }

    /// Run a statement and return the number of affected rows.
    async fn execute(&self, sql: &str, args: &[Value]) -> Result<u64, PgError>;

    /// Run statements without arguments. On the pool this may be several
    /// `;`-separated statements in one round trip; inside a transaction it
    /// is a single statement.
    async fn batch_execute(&self, sql: &str) -> Result<(), PgError>;
}

/// The connection pool side of the seam.
#[async_trait]
pub trait Store: Send + Sync {
    fn queryable(&self) -> &dyn Queryable;

    async fn begin(&self) -> Result<Box<dyn StoreTx>, PgError>;

    async fn ping(&self) -> Result<(), PgError> {
        self.queryable().fetch_one("SELECT 1 AS one", &[]).await.map(|_| ())
    }

    async fn close(&self);
}

/// An open database transaction.
///
/// `commit` and `rollback` close it; any later call returns
/// [`PgError::TxClosed`].
#[async_trait]
pub trait StoreTx: Send + Sync {
    fn queryable(&self) -> &dyn Queryable;

    async fn commit(&self) -> Result<(), PgError>;

    async fn rollback(&self) -> Result<(), PgError>;
}
