//! `pg` crate: transactional Postgres access.
//!
//! Provides the pool, transaction handles with commit/rollback hooks,
//! transaction-scoped advisory locks and a typed error classifier. Statement
//! building lives in the `sql` crate.

pub mod config;
pub mod db;
pub mod error;
pub mod lock;
pub mod mock;
pub mod pool;
pub mod store;
pub mod tx;
pub mod value;

pub use config::{ConfigError, Environment, PgConfig};
pub use db::{quote_ident, Db};
pub use error::{codes, ErrorKind, PgError};
pub use pool::{DbPool, PgStore};
pub use store::{Queryable, Row, Store, StoreTx};
pub use tx::{Tx, TxRole};
pub use value::Value;

#[cfg(test)]
mod tx_tests;
