//! Positional statement arguments.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A value bound to a `$n` placeholder.
///
/// The statement builders never bind `Null`; they render it as the literal
/// `NULL` so Postgres can infer the column type. A raw statement that binds
/// `Null` gets a text-typed NULL, so cast its placeholder (`$1::int`) when
/// the target column is not text.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    /// `int4`; the advisory lock functions only accept this width.
    Int(i32),
    BigInt(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
    TextArray(Vec<String>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i32 => Int,
    i64 => BigInt,
    f64 => Float,
    String => Text,
    Uuid => Uuid,
    DateTime<Utc> => Timestamp,
    serde_json::Value => Json,
    Vec<String> => TextArray,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_collapse_to_null() {
        assert_eq!(Value::from(None::<Uuid>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
        assert!(Value::from(None::<i64>).is_null());
    }
}
