//! The data-access context.
//!
//! One [`Db`] is built at startup and handed to everything that talks to the
//! store. It owns the pool (behind the [`Store`] seam) and is the only way to
//! open transactions.

use std::future::Future;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::{Environment, PgConfig};
use crate::pool::PgStore;
use crate::store::{Queryable, Store};
use crate::tx::Tx;
use crate::PgError;

#[derive(Clone)]
pub struct Db {
    store: Arc<dyn Store>,
    environment: Environment,
}

impl Db {
    pub fn new(store: Arc<dyn Store>, environment: Environment) -> Self {
        Self { store, environment }
    }

    /// Open a Postgres pool from `config`.
    pub async fn connect(config: &PgConfig) -> Result<Self, PgError> {
        let store = PgStore::connect(config).await?;
        Ok(Self::new(Arc::new(store), config.environment))
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// A handle with no transaction behind it. Never touches the store.
    pub fn empty_tx(&self) -> Tx {
        Tx::empty()
    }

    /// Begin a new transaction and return its owning handle.
    #[instrument(skip(self))]
    pub async fn new_tx(&self) -> Result<Tx, PgError> {
        let conn = self.store.begin().await?;
        Ok(Tx::owned(conn))
    }

    /// Guarantee a transaction: begin one when `tx` is empty, otherwise
    /// return a scoped view over `tx` that cannot finalize it.
    pub async fn ensure_tx(&self, tx: &Tx) -> Result<Tx, PgError> {
        if tx.is_empty() {
            self.new_tx().await
        } else {
            Ok(tx.scoped())
        }
    }

    /// Where statements for `tx` run: its transaction, or the pool.
    pub fn client<'a>(&'a self, tx: &'a Tx) -> &'a dyn Queryable {
        match tx.queryable() {
            Some(conn) => conn,
            None => self.store.queryable(),
        }
    }

    /// Run `f` inside a transaction ensured from `parent`.
    ///
    /// `f` receives a scoped handle. On `Ok` the ensured handle commits (a
    /// no-op when `parent` already owned a transaction); on `Err` it rolls
    /// back and the error is returned unchanged.
    pub async fn scope<T, E, F, Fut>(&self, parent: &Tx, f: F) -> Result<T, E>
    where
        F: FnOnce(Tx) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<PgError>,
    {
        let tx = self.ensure_tx(parent).await?;
        match f(tx.scoped()).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                tx.rollback_deferred().await;
                Err(err)
            }
        }
    }

    /// Run raw SQL (possibly several statements) on the pool.
    pub async fn run_sql(&self, sql: &str) -> Result<(), PgError> {
        self.store.queryable().batch_execute(sql).await
    }

    /// Put `schema` ahead of `public` on the search path of the current
    /// session.
    pub async fn use_schema(&self, schema: &str) -> Result<(), PgError> {
        info!("Using schema {schema}");
        self.run_sql(&format!(
            "SET search_path TO {}, \"public\"",
            quote_ident(schema)
        ))
        .await
    }

    pub async fn ping(&self) -> Result<(), PgError> {
        self.store.ping().await
    }

    /// Close the pool. Call once at shutdown.
    pub async fn close(&self) {
        self.store.close().await;
    }
}

/// Quote an identifier, splitting on `.` so `t.col` becomes `"t"."col"`.
/// A bare `*` segment is left unquoted.
pub fn quote_ident(ident: &str) -> String {
    ident
        .split('.')
        .map(|part| {
            if part == "*" {
                part.to_owned()
            } else {
                format!("\"{}\"", part.replace('"', "\"\""))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}
