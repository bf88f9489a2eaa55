//! Generic write operations.
//!
//! Every operation that returns rows refreshes the entity in place from
//! `RETURNING *`. The by-primary-key operations only touch live rows
//! (`deleted_at IS NULL`), so acting on a soft-deleted row is
//! [`PgError::NotFound`].

use serde::de::DeserializeOwned;
use tracing::debug;

use pg::{Db, PgError, Tx};

use crate::expr::{col, now, Expr};
use crate::model::{
    ArchivedAudit, DeletedAudit, PrimaryKey, Table, UpdatedAudit, DELETED_AT, PK_COLUMN,
};
use crate::read::decode;
use crate::statement::{Delete, Insert, Record, Update};

/// Insert `record` into `M`'s table and refresh `data` from the new row.
pub async fn create<M>(db: &Db, tx: &Tx, data: &mut M, record: Record) -> Result<(), PgError>
where
    M: Table + DeserializeOwned,
{
    let (sql, args) = Insert::into(M::table_name())
        .values(record)
        .returning_all()
        .to_sql();
    let row = db.client(tx).fetch_one(&sql, &args).await?;
    *data = decode(row)?;
    debug!(table = M::table_name(), "row created");
    Ok(())
}

/// Apply `record` to the rows matching `filter` and refresh `data` from the
/// first updated row. Zero matches is [`PgError::NotFound`].
pub async fn update<M>(
    db: &Db,
    tx: &Tx,
    data: &mut M,
    record: Record,
    filter: Expr,
) -> Result<(), PgError>
where
    M: Table + DeserializeOwned,
{
    let (sql, args) = Update::table(M::table_name())
        .set(record)
        .filter(filter)
        .returning_all()
        .to_sql();
    let row = db.client(tx).fetch_one(&sql, &args).await?;
    *data = decode(row)?;
    Ok(())
}

fn live_row<M: PrimaryKey>(data: &M) -> Expr {
    col(PK_COLUMN)
        .eq(Expr::Value(data.primary_key().into()))
        .and(col(DELETED_AT).is_null())
}

/// Update the live row with `data`'s primary key.
pub async fn update_by_pk<M>(db: &Db, tx: &Tx, data: &mut M, record: Record) -> Result<(), PgError>
where
    M: PrimaryKey + DeserializeOwned,
{
    let filter = live_row(data);
    update(db, tx, data, record, filter).await
}

/// [`update_by_pk`] that also stamps `updated_at = NOW()` and `updated_by`
/// from the entity's audit group.
pub async fn update_by_pk_tracked<M>(
    db: &Db,
    tx: &Tx,
    data: &mut M,
    mut record: Record,
) -> Result<(), PgError>
where
    M: PrimaryKey + UpdatedAudit + DeserializeOwned,
{
    record.insert("updated_at", now());
    record.insert("updated_by", data.updated().updated_by.into());
    update_by_pk(db, tx, data, record).await
}

/// Mark the row deleted, stamping `deleted_by` from the entity.
pub async fn soft_delete_by_pk<M>(db: &Db, tx: &Tx, data: &mut M) -> Result<(), PgError>
where
    M: PrimaryKey + DeletedAudit + DeserializeOwned,
{
    let record = Record::new()
        .set_expr("deleted_at", now())
        .set("deleted_by", data.deleted().deleted_by);
    update_by_pk(db, tx, data, record).await
}

/// Mark the row archived, stamping `archived_by` from the entity.
pub async fn archive_by_pk<M>(db: &Db, tx: &Tx, data: &mut M) -> Result<(), PgError>
where
    M: PrimaryKey + ArchivedAudit + DeserializeOwned,
{
    let record = Record::new()
        .set_expr("archived_at", now())
        .set("archived_by", data.archived().archived_by);
    update_by_pk(db, tx, data, record).await
}

/// Physically delete the rows of `M`'s table matching `filter`. Returns the
/// number of rows removed.
pub async fn hard_delete<M: Table>(db: &Db, tx: &Tx, filter: Expr) -> Result<u64, PgError> {
    let (sql, args) = Delete::from(M::table_name()).filter(filter).to_sql();
    let affected = db.client(tx).execute(&sql, &args).await?;
    debug!(table = M::table_name(), affected, "rows deleted");
    Ok(affected)
}
