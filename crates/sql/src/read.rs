//! Typed read queries over one entity.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use tracing::debug;

use pg::{Db, PgError, Row, Tx, Value};

use crate::expr::{Expr, OrderBy};
use crate::model::Table;
use crate::select::{Select, Source};

/// Start a read over `M`'s table.
pub fn read<M: Table>() -> Read<M> {
    Read::new()
}

/// A `SELECT` bound to entity `M`.
///
/// A query can be marked empty with [`Read::check`]; its terminal operations
/// then answer without touching the store.
pub struct Read<M> {
    query: Select,
    empty: bool,
    _model: PhantomData<fn() -> M>,
}

impl<M> Clone for Read<M> {
    fn clone(&self) -> Self {
        Self {
            query: self.query.clone(),
            empty: self.empty,
            _model: PhantomData,
        }
    }
}

impl<M> std::fmt::Debug for Read<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Read")
            .field("query", &self.query)
            .field("empty", &self.empty)
            .finish()
    }
}

impl<M: Table> Default for Read<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Table> Read<M> {
    pub fn new() -> Self {
        Self {
            query: Select::new().from(M::table_name()),
            empty: false,
            _model: PhantomData,
        }
    }

    /// Mark the query empty when `values` is. Use it before filtering with
    /// `IN (values)` so an empty key set short-circuits.
    pub fn check<T>(mut self, values: &[T]) -> Self {
        self.empty = self.empty || values.is_empty();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    fn map(mut self, f: impl FnOnce(Select) -> Select) -> Self {
        self.query = f(self.query);
        self
    }

    pub fn filter(self, expr: Expr) -> Self {
        self.map(|q| q.filter(expr))
    }

    pub fn select(self, columns: Vec<Expr>) -> Self {
        self.map(|q| q.select(columns))
    }

    /// `SELECT DISTINCT(column)`
    pub fn select_distinct(self, column: &str) -> Self {
        self.select(vec![crate::expr::distinct(column)])
    }

    /// Replace the source, e.g. to alias the entity's own table.
    pub fn from(self, source: impl Into<Source>) -> Self {
        self.map(|q| q.from(source))
    }

    /// Read from `M`'s table under `alias`.
    pub fn alias(self, alias: &str) -> Self {
        self.from(Source::model::<M>(alias))
    }

    pub fn join(self, source: impl Into<Source>, on: Expr) -> Self {
        self.map(|q| q.join(source, on))
    }

    pub fn left_join(self, source: impl Into<Source>, on: Expr) -> Self {
        self.map(|q| q.left_join(source, on))
    }

    pub fn full_join(self, source: impl Into<Source>, on: Expr) -> Self {
        self.map(|q| q.full_join(source, on))
    }

    pub fn group_by(self, exprs: Vec<Expr>) -> Self {
        self.map(|q| q.group_by(exprs))
    }

    pub fn having(self, expr: Expr) -> Self {
        self.map(|q| q.having(expr))
    }

    pub fn order(self, order: Vec<OrderBy>) -> Self {
        self.map(|q| q.order(order))
    }

    pub fn limit(self, limit: u64) -> Self {
        self.map(|q| q.limit(limit))
    }

    pub fn offset(self, offset: u64) -> Self {
        self.map(|q| q.offset(offset))
    }

    pub fn union_all(self, other: Select) -> Self {
        self.map(|q| q.union_all(other))
    }

    /// The underlying builder.
    pub fn raw(self) -> Select {
        self.query
    }

    pub fn to_sql(&self) -> (String, Vec<Value>) {
        self.query.to_sql()
    }

    // -----------------------------------------------------------------------
    // Terminal operations
    // -----------------------------------------------------------------------

    /// Number of rows the query yields.
    pub async fn count(&self, db: &Db, tx: &Tx) -> Result<i64, PgError> {
        if self.empty {
            return Ok(0);
        }
        let (sql, args) = self.to_sql();
        let sql = format!("SELECT COUNT(*) AS count FROM ({sql}) AS q");
        let row = db.client(tx).fetch_one(&sql, &args).await?;
        let count = row
            .get("count")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| PgError::Other("count query returned no integer".into()))?;
        Ok(count)
    }

    /// First row as `M`, or [`PgError::NotFound`].
    pub async fn find_one(&self, db: &Db, tx: &Tx) -> Result<M, PgError>
    where
        M: DeserializeOwned,
    {
        self.fetch_one_as(db, tx).await
    }

    /// Every row as `M`.
    pub async fn find_all(&self, db: &Db, tx: &Tx) -> Result<Vec<M>, PgError>
    where
        M: DeserializeOwned,
    {
        self.fetch_all_as(db, tx).await
    }

    /// First row decoded as any `T`, for queries that select a projection.
    /// Reads at most one row unless the query sets its own limit.
    pub async fn fetch_one_as<T: DeserializeOwned>(&self, db: &Db, tx: &Tx) -> Result<T, PgError> {
        if self.empty {
            return Err(PgError::NotFound);
        }
        let query = match self.query.has_limit() {
            true => self.query.clone(),
            false => self.query.clone().limit(1),
        };
        let (sql, args) = query.to_sql();
        let row = db.client(tx).fetch_one(&sql, &args).await?;
        decode(row)
    }

    /// Every row decoded as any `T`.
    pub async fn fetch_all_as<T: DeserializeOwned>(
        &self,
        db: &Db,
        tx: &Tx,
    ) -> Result<Vec<T>, PgError> {
        if self.empty {
            return Ok(Vec::new());
        }
        let (sql, args) = self.to_sql();
        let rows = db.client(tx).fetch_all(&sql, &args).await?;
        debug!(table = M::table_name(), rows = rows.len(), "read rows");
        rows.into_iter().map(decode).collect()
    }
}

pub(crate) fn decode<T: DeserializeOwned>(row: Row) -> Result<T, PgError> {
    Ok(serde_json::from_value(serde_json::Value::Object(row))?)
}
