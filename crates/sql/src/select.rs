//! `SELECT` statements.

use pg::Value;

use crate::compile::SqlWriter;
use crate::expr::{Expr, OrderBy};
use crate::model::Table;

/// A table reference, optionally aliased.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub table: String,
    pub alias: Option<String>,
}

impl Source {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: None,
        }
    }

    pub fn aliased(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: Some(alias.into()),
        }
    }

    /// `M`'s table under `alias`.
    pub fn model<M: Table>(alias: impl Into<String>) -> Self {
        Self::aliased(M::table_name(), alias)
    }

    fn write(&self, w: &mut SqlWriter) {
        w.ident(&self.table);
        if let Some(alias) = &self.alias {
            w.push(" AS ");
            w.ident(alias);
        }
    }
}

impl From<&str> for Source {
    fn from(table: &str) -> Self {
        Self::table(table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Full,
}

impl JoinKind {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Inner => " INNER JOIN ",
            Self::Left => " LEFT JOIN ",
            Self::Full => " FULL JOIN ",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub source: Source,
    pub on: Expr,
}

/// Builder for a `SELECT`. Every method consumes and returns the builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Select {
    from: Option<Source>,
    columns: Vec<Expr>,
    joins: Vec<Join>,
    filters: Vec<Expr>,
    group_by: Vec<Expr>,
    having: Vec<Expr>,
    order: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    unions: Vec<Select>,
}

impl Select {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the source.
    pub fn from(mut self, source: impl Into<Source>) -> Self {
        self.from = Some(source.into());
        self
    }

    /// Replace the selected columns. No columns means `*`.
    pub fn select(mut self, columns: Vec<Expr>) -> Self {
        self.columns = columns;
        self
    }

    pub fn join(self, source: impl Into<Source>, on: Expr) -> Self {
        self.push_join(JoinKind::Inner, source.into(), on)
    }

    pub fn left_join(self, source: impl Into<Source>, on: Expr) -> Self {
        self.push_join(JoinKind::Left, source.into(), on)
    }

    pub fn full_join(self, source: impl Into<Source>, on: Expr) -> Self {
        self.push_join(JoinKind::Full, source.into(), on)
    }

    fn push_join(mut self, kind: JoinKind, source: Source, on: Expr) -> Self {
        self.joins.push(Join { kind, source, on });
        self
    }

    /// Add a predicate. Repeated calls are combined with `AND`.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filters.push(expr);
        self
    }

    pub fn group_by(mut self, exprs: Vec<Expr>) -> Self {
        self.group_by.extend(exprs);
        self
    }

    /// Add a `HAVING` predicate. Repeated calls are combined with `AND`.
    pub fn having(mut self, expr: Expr) -> Self {
        self.having.push(expr);
        self
    }

    pub fn order(mut self, order: Vec<OrderBy>) -> Self {
        self.order.extend(order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn has_limit(&self) -> bool {
        self.limit.is_some()
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Append `UNION ALL (other)`. Ordering, limit and offset set on `self`
    /// apply to the combined result.
    pub fn union_all(mut self, other: Select) -> Self {
        self.unions.push(other);
        self
    }

    /// Compile to SQL and positional arguments.
    ///
    /// # Panics
    /// When no source was set.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut w = SqlWriter::new();
        self.write(&mut w);
        w.finish()
    }

    pub(crate) fn write(&self, w: &mut SqlWriter) {
        self.write_core(w);
        for other in &self.unions {
            w.push(" UNION ALL (");
            other.write(w);
            w.push(")");
        }
        if !self.order.is_empty() {
            w.push(" ORDER BY ");
            w.order_by(&self.order);
        }
        if let Some(limit) = self.limit {
            w.push(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            w.push(&format!(" OFFSET {offset}"));
        }
    }

    fn write_core(&self, w: &mut SqlWriter) {
        let Some(from) = &self.from else {
            panic!("select has no source table");
        };

        w.push("SELECT ");
        if self.columns.is_empty() {
            w.push("*");
        } else {
            w.list(&self.columns, ", ", |w, column| w.expr(column));
        }
        w.push(" FROM ");
        from.write(w);

        for join in &self.joins {
            w.push(join.kind.as_sql());
            join.source.write(w);
            w.push(" ON ");
            w.expr(&join.on);
        }
        if !self.filters.is_empty() {
            w.push(" WHERE ");
            w.expr(&Expr::And(self.filters.clone()));
        }
        if !self.group_by.is_empty() {
            w.push(" GROUP BY ");
            w.list(&self.group_by, ", ", |w, expr| w.expr(expr));
        }
        if !self.having.is_empty() {
            w.push(" HAVING ");
            w.expr(&Expr::And(self.having.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::*;

    #[test]
    fn bare_select_is_star() {
        let (sql, args) = Select::new().from("movies").to_sql();
        assert_eq!(sql, "SELECT * FROM \"movies\"");
        assert!(args.is_empty());
    }

    #[test]
    fn full_clause_order() {
        let (sql, args) = Select::new()
            .from(Source::aliased("movies", "m"))
            .select(vec![col("g.name"), count_all().alias("n")])
            .left_join(Source::aliased("genres", "g"), col("g.id").eq(col("m.genre_id")))
            .filter(col("m.deleted_at").is_null())
            .filter(col("m.year").gte(1990))
            .group_by(vec![col("g.name")])
            .having(count_all().gt(2))
            .order(vec![col("n").desc(), col("g.name").asc()])
            .limit(10)
            .offset(20)
            .to_sql();

        assert_eq!(
            sql,
            "SELECT \"g\".\"name\", COUNT(*) AS \"n\" FROM \"movies\" AS \"m\" \
             LEFT JOIN \"genres\" AS \"g\" ON (\"g\".\"id\" = \"m\".\"genre_id\") \
             WHERE ((\"m\".\"deleted_at\" IS NULL) AND (\"m\".\"year\" >= $1)) \
             GROUP BY \"g\".\"name\" HAVING (COUNT(*) > $2) \
             ORDER BY \"n\" DESC, \"g\".\"name\" ASC LIMIT 10 OFFSET 20"
        );
        assert_eq!(args, vec![Value::Int(1990), Value::Int(2)]);
    }

    #[test]
    fn union_all_keeps_numbering_across_branches() {
        let archived = Select::new()
            .from("archived_movies")
            .filter(col("year").eq(2001));
        let (sql, args) = Select::new()
            .from("movies")
            .filter(col("year").eq(2000))
            .union_all(archived)
            .to_sql();

        assert_eq!(
            sql,
            "SELECT * FROM \"movies\" WHERE (\"year\" = $1) \
             UNION ALL (SELECT * FROM \"archived_movies\" WHERE (\"year\" = $2))"
        );
        assert_eq!(args, vec![Value::Int(2000), Value::Int(2001)]);
    }

    #[test]
    #[should_panic(expected = "no source")]
    fn select_without_source_panics() {
        Select::new().to_sql();
    }
}
