//! Expression tree and the free-function constructors used to build it.
//!
//! ```ignore
//! use sql::expr::{col, val};
//!
//! let filter = col("genre").eq("drama").and(col("deleted_at").is_null());
//! ```

use pg::Value;

/// A SQL expression. Values are bound as `$n` arguments when compiled.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A quoted identifier, `t.col` splits into `"t"."col"`.
    Ident(String),
    /// A bound value. `Null` compiles to the literal `NULL`.
    Value(Value),
    /// Raw SQL where each `?` is replaced by the next argument.
    Literal { sql: String, args: Vec<Expr> },
    /// `*`, as in `COUNT(*)`.
    Star,
    Func { name: String, args: Vec<Expr> },
    Distinct(Box<Expr>),
    Cast { expr: Box<Expr>, ty: String },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    IsNull { expr: Box<Expr>, negated: bool },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Alias { expr: Box<Expr>, alias: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    ILike,
    NotILike,
}

impl BinaryOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::ILike => "ILIKE",
            Self::NotILike => "NOT ILIKE",
        }
    }
}

/// Sort direction for `ORDER BY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub direction: Direction,
}

macro_rules! impl_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Expr {
                fn from(v: $ty) -> Self {
                    Self::Value(v.into())
                }
            }
        )*
    };
}

impl_from_value! {
    Value,
    bool,
    i32,
    i64,
    f64,
    String,
    &str,
    uuid::Uuid,
    chrono::DateTime<chrono::Utc>,
    serde_json::Value,
    Vec<String>,
}

impl<T: Into<Value>> From<Option<T>> for Expr {
    fn from(v: Option<T>) -> Self {
        Self::Value(v.into())
    }
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

/// Column or table identifier.
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Ident(name.into())
}

/// Bound value.
pub fn val(v: impl Into<Value>) -> Expr {
    Expr::Value(v.into())
}

/// Raw SQL fragment; every `?` consumes one of `args`.
pub fn lit(sql: impl Into<String>, args: Vec<Expr>) -> Expr {
    Expr::Literal {
        sql: sql.into(),
        args,
    }
}

pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Expr {
    Expr::Func {
        name: name.into(),
        args,
    }
}

pub fn count(expr: Expr) -> Expr {
    func("COUNT", vec![expr])
}

/// `COUNT(*)`
pub fn count_all() -> Expr {
    count(Expr::Star)
}

/// `NOW()`
pub fn now() -> Expr {
    func("NOW", Vec::new())
}

pub fn coalesce(args: Vec<Expr>) -> Expr {
    func("COALESCE", args)
}

/// `COALESCE(SUM(column), empty)`, so an empty set sums to `empty`.
pub fn sum(column: &str, empty: impl Into<Expr>) -> Expr {
    coalesce(vec![func("SUM", vec![col(column)]), empty.into()])
}

pub fn max(expr: Expr) -> Expr {
    func("MAX", vec![expr])
}

/// `DISTINCT "column"`
pub fn distinct(column: &str) -> Expr {
    Expr::Distinct(Box::new(col(column)))
}

/// `CAST(expr AS ty)`
pub fn cast(expr: Expr, ty: impl Into<String>) -> Expr {
    Expr::Cast {
        expr: Box::new(expr),
        ty: ty.into(),
    }
}

/// `("column" ->> key)`
pub fn json_key(column: &str, key: &str) -> Expr {
    lit("(? ->> ?)", vec![col(column), val(key)])
}

/// Conjunction; an empty list is `TRUE`.
pub fn and(exprs: Vec<Expr>) -> Expr {
    Expr::And(exprs)
}

/// Disjunction; an empty list is `FALSE`.
pub fn or(exprs: Vec<Expr>) -> Expr {
    Expr::Or(exprs)
}

pub fn not(expr: Expr) -> Expr {
    Expr::Not(Box::new(expr))
}

// ---------------------------------------------------------------------------
// Combinators
// ---------------------------------------------------------------------------

impl Expr {
    fn binary(self, op: BinaryOp, right: impl Into<Expr>) -> Expr {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(right.into()),
        }
    }

    /// `=`; comparing with a null value becomes `IS NULL`.
    pub fn eq(self, right: impl Into<Expr>) -> Expr {
        match right.into() {
            Expr::Value(Value::Null) => self.is_null(),
            right => self.binary(BinaryOp::Eq, right),
        }
    }

    /// `!=`; comparing with a null value becomes `IS NOT NULL`.
    pub fn neq(self, right: impl Into<Expr>) -> Expr {
        match right.into() {
            Expr::Value(Value::Null) => self.is_not_null(),
            right => self.binary(BinaryOp::Neq, right),
        }
    }

    pub fn gt(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Gt, right)
    }

    pub fn gte(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Gte, right)
    }

    pub fn lt(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Lt, right)
    }

    pub fn lte(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Lte, right)
    }

    pub fn like(self, pattern: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Like, pattern)
    }

    pub fn not_like(self, pattern: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::NotLike, pattern)
    }

    pub fn ilike(self, pattern: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::ILike, pattern)
    }

    pub fn not_ilike(self, pattern: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::NotILike, pattern)
    }

    /// `IN (...)`. An empty list never matches.
    pub fn is_in<I, V>(self, values: I) -> Expr
    where
        I: IntoIterator<Item = V>,
        V: Into<Expr>,
    {
        Expr::In {
            expr: Box::new(self),
            list: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    /// `NOT IN (...)`. An empty list always matches.
    pub fn not_in<I, V>(self, values: I) -> Expr
    where
        I: IntoIterator<Item = V>,
        V: Into<Expr>,
    {
        Expr::In {
            expr: Box::new(self),
            list: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    /// `self AND other`, flattening nested conjunctions.
    pub fn and(self, other: Expr) -> Expr {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            first => Expr::And(vec![first, other]),
        }
    }

    /// `self OR other`, flattening nested disjunctions.
    pub fn or(self, other: Expr) -> Expr {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            first => Expr::Or(vec![first, other]),
        }
    }

    pub fn asc(self) -> OrderBy {
        OrderBy {
            expr: self,
            direction: Direction::Asc,
        }
    }

    pub fn desc(self) -> OrderBy {
        OrderBy {
            expr: self,
            direction: Direction::Desc,
        }
    }

    /// `expr AS "alias"`
    pub fn alias(self, alias: impl Into<String>) -> Expr {
        Expr::Alias {
            expr: Box::new(self),
            alias: alias.into(),
        }
    }
}
