//! `sql` crate: statement building and generic record operations.
//!
//! Expressions and statements compile to Postgres SQL with `$n` arguments.
//! Entities opt into operations through the capability traits in [`model`];
//! the operations themselves run through a `pg::Db` and `pg::Tx`.

pub mod compile;
pub mod expr;
pub mod model;
pub mod read;
pub mod select;
pub mod statement;
pub mod write;

pub use expr::{Direction, Expr, OrderBy};
pub use model::{
    Archived, ArchivedAudit, Created, CreatedAudit, Deleted, DeletedAudit, HasSettings,
    PrimaryKey, Settings, Table, Updated, UpdatedAudit,
};
pub use read::{read, Read};
pub use select::{JoinKind, Select, Source};
pub use statement::{Delete, Insert, Record, Update};
pub use write::{
    archive_by_pk, create, hard_delete, soft_delete_by_pk, update, update_by_pk,
    update_by_pk_tracked,
};
