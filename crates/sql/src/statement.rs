//! `INSERT`, `UPDATE` and `DELETE` statements.

use std::collections::BTreeMap;

use pg::Value;

use crate::compile::SqlWriter;
use crate::expr::Expr;

/// Column assignments for an insert or update, kept in column order so the
/// generated SQL is stable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record(BTreeMap<String, Expr>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a bound value to `column`.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(column.into(), Expr::Value(value.into()));
        self
    }

    /// Assign an arbitrary expression, e.g. `now()`.
    pub fn set_expr(mut self, column: impl Into<String>, expr: Expr) -> Self {
        self.0.insert(column.into(), expr);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, expr: Expr) {
        self.0.insert(column.into(), expr);
    }

    pub fn get(&self, column: &str) -> Option<&Expr> {
        self.0.get(column)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl<K: Into<String>> FromIterator<(K, Expr)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, Expr)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

// ---------------------------------------------------------------------------
// INSERT
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    table: String,
    record: Record,
    returning: bool,
}

impl Insert {
    pub fn into(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            record: Record::new(),
            returning: false,
        }
    }

    pub fn values(mut self, record: Record) -> Self {
        self.record = record;
        self
    }

    /// Append `RETURNING *`.
    pub fn returning_all(mut self) -> Self {
        self.returning = true;
        self
    }

    /// # Panics
    /// When no column was assigned.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        assert!(
            !self.record.is_empty(),
            "insert into \"{}\" has no columns",
            self.table
        );

        let columns: Vec<&String> = self.record.0.keys().collect();
        let values: Vec<&Expr> = self.record.0.values().collect();

        let mut w = SqlWriter::new();
        w.push("INSERT INTO ");
        w.ident(&self.table);
        w.push(" (");
        w.list(&columns, ", ", |w, column| w.ident(column));
        w.push(") VALUES (");
        w.list(&values, ", ", |w, value| w.expr(value));
        w.push(")");
        if self.returning {
            w.push(" RETURNING *");
        }
        w.finish()
    }
}

// ---------------------------------------------------------------------------
// UPDATE
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    table: String,
    record: Record,
    filter: Option<Expr>,
    returning: bool,
}

impl Update {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            record: Record::new(),
            filter: None,
            returning: false,
        }
    }

    pub fn set(mut self, record: Record) -> Self {
        self.record = record;
        self
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// Append `RETURNING *`.
    pub fn returning_all(mut self) -> Self {
        self.returning = true;
        self
    }

    /// # Panics
    /// When no assignment was made.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        assert!(
            !self.record.is_empty(),
            "update of \"{}\" has no assignments",
            self.table
        );

        let assignments: Vec<(&String, &Expr)> = self.record.0.iter().collect();

        let mut w = SqlWriter::new();
        w.push("UPDATE ");
        w.ident(&self.table);
        w.push(" SET ");
        w.list(&assignments, ", ", |w, (column, value)| {
            w.ident(column);
            w.push(" = ");
            w.expr(value);
        });
        if let Some(filter) = &self.filter {
            w.push(" WHERE ");
            w.expr(filter);
        }
        if self.returning {
            w.push(" RETURNING *");
        }
        w.finish()
    }
}

// ---------------------------------------------------------------------------
// DELETE
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    table: String,
    filter: Option<Expr>,
}

impl Delete {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: None,
        }
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut w = SqlWriter::new();
        w.push("DELETE FROM ");
        w.ident(&self.table);
        if let Some(filter) = &self.filter {
            w.push(" WHERE ");
            w.expr(filter);
        }
        w.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{col, now};

    #[test]
    fn insert_lists_columns_in_order() {
        let (sql, args) = Insert::into("movies")
            .values(Record::new().set("title", "Heat").set("year", 1995))
            .returning_all()
            .to_sql();
        assert_eq!(
            sql,
            "INSERT INTO \"movies\" (\"title\", \"year\") VALUES ($1, $2) RETURNING *"
        );
        assert_eq!(args, vec![Value::from("Heat"), Value::Int(1995)]);
    }

    #[test]
    fn insert_writes_null_inline() {
        let (sql, args) = Insert::into("movies")
            .values(Record::new().set("title", "Heat").set("year", None::<i32>))
            .to_sql();
        assert_eq!(sql, "INSERT INTO \"movies\" (\"title\", \"year\") VALUES ($1, NULL)");
        assert_eq!(args, vec![Value::from("Heat")]);
    }

    #[test]
    fn update_mixes_values_and_expressions() {
        let (sql, args) = Update::table("movies")
            .set(
                Record::new()
                    .set("title", "Heat")
                    .set("rating", None::<f64>)
                    .set_expr("updated_at", now()),
            )
            .filter(col("id").eq(3))
            .filter(col("deleted_at").is_null())
            .returning_all()
            .to_sql();
        assert_eq!(
            sql,
            "UPDATE \"movies\" SET \"rating\" = NULL, \"title\" = $1, \"updated_at\" = NOW() \
             WHERE ((\"id\" = $2) AND (\"deleted_at\" IS NULL)) RETURNING *"
        );
        assert_eq!(args, vec![Value::from("Heat"), Value::Int(3)]);
    }

    #[test]
    fn delete_without_filter_targets_the_table() {
        assert_eq!(Delete::from("movies").to_sql().0, "DELETE FROM \"movies\"");
    }

    #[test]
    #[should_panic(expected = "no columns")]
    fn empty_insert_panics() {
        Insert::into("movies").to_sql();
    }

    #[test]
    #[should_panic(expected = "no assignments")]
    fn empty_update_panics() {
        Update::table("movies").filter(col("id").eq(1)).to_sql();
    }
}
