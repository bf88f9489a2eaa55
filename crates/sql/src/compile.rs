//! Rendering expressions into Postgres SQL with positional arguments.

use pg::{quote_ident, Value};

use crate::expr::{Direction, Expr, OrderBy};

/// Accumulates SQL text and the arguments its `$n` placeholders refer to.
#[derive(Debug, Default)]
pub struct SqlWriter {
    sql: String,
    args: Vec<Value>,
}

impl SqlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    pub fn ident(&mut self, ident: &str) {
        self.sql.push_str(&quote_ident(ident));
    }

    /// Bind `value` as the next `$n`. `NULL` is written inline.
    pub fn value(&mut self, value: &Value) {
        if value.is_null() {
            self.sql.push_str("NULL");
            return;
        }
        self.args.push(value.clone());
        self.sql.push('$');
        self.sql.push_str(&self.args.len().to_string());
    }

    pub fn list<T>(&mut self, items: &[T], sep: &str, mut each: impl FnMut(&mut Self, &T)) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.push(sep);
            }
            each(self, item);
        }
    }

    pub fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Ident(name) => self.ident(name),
            Expr::Value(v) => self.value(v),
            Expr::Literal { sql, args } => self.literal(sql, args),
            Expr::Star => self.push("*"),
            Expr::Func { name, args } => {
                self.push(name);
                self.push("(");
                self.list(args, ", ", |w, arg| w.expr(arg));
                self.push(")");
            }
            Expr::Distinct(inner) => {
                self.push("DISTINCT(");
                self.expr(inner);
                self.push(")");
            }
            Expr::Cast { expr, ty } => {
                self.push("CAST(");
                self.expr(expr);
                self.push(" AS ");
                self.push(ty);
                self.push(")");
            }
            Expr::Binary { left, op, right } => {
                self.push("(");
                self.expr(left);
                self.push(" ");
                self.push(op.as_sql());
                self.push(" ");
                self.expr(right);
                self.push(")");
            }
            Expr::In {
                expr,
                list,
                negated,
            } => {
                if list.is_empty() {
                    self.push(if *negated { "TRUE" } else { "FALSE" });
                    return;
                }
                self.push("(");
                self.expr(expr);
                self.push(if *negated { " NOT IN (" } else { " IN (" });
                self.list(list, ", ", |w, item| w.expr(item));
                self.push("))");
            }
            Expr::IsNull { expr, negated } => {
                self.push("(");
                self.expr(expr);
                self.push(if *negated { " IS NOT NULL)" } else { " IS NULL)" });
            }
            Expr::And(list) => self.junction(list, " AND ", "TRUE"),
            Expr::Or(list) => self.junction(list, " OR ", "FALSE"),
            Expr::Not(inner) => {
                self.push("NOT ");
                self.expr(inner);
            }
            Expr::Alias { expr, alias } => {
                self.expr(expr);
                self.push(" AS ");
                self.ident(alias);
            }
        }
    }

    fn junction(&mut self, list: &[Expr], sep: &str, identity: &str) {
        match list {
            [] => self.push(identity),
            [single] => self.expr(single),
            _ => {
                self.push("(");
                self.list(list, sep, |w, item| w.expr(item));
                self.push(")");
            }
        }
    }

    fn literal(&mut self, sql: &str, args: &[Expr]) {
        let mut args = args.iter();
        for ch in sql.chars() {
            if ch == '?' {
                match args.next() {
                    Some(arg) => self.expr(arg),
                    None => panic!("literal `{sql}` has more placeholders than arguments"),
                }
            } else {
                self.sql.push(ch);
            }
        }
        assert!(
            args.next().is_none(),
            "literal `{sql}` has more arguments than placeholders"
        );
    }

    pub fn order_by(&mut self, order: &[OrderBy]) {
        self.list(order, ", ", |w, item| {
            w.expr(&item.expr);
            w.push(match item.direction {
                Direction::Asc => " ASC",
                Direction::Desc => " DESC",
            });
        });
    }

    pub fn finish(self) -> (String, Vec<Value>) {
        (self.sql, self.args)
    }
}

/// Render a standalone expression.
pub fn to_sql(expr: &Expr) -> (String, Vec<Value>) {
    let mut w = SqlWriter::new();
    w.expr(expr);
    w.finish()
}
