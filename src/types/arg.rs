use std::collections::{BTreeMap, HashMap};

use crate::types::SqlValue;

/// A call-time argument handed to a bound method.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Scalar(SqlValue),
    Array(Vec<SqlValue>),
    Map(BTreeMap<String, SqlValue>),
    /// An entity instance, identified by its entity name. Entities are never
    /// flattened into statements; binding one fails at call time.
    Entity(&'static str),
}

impl Arg {
    /// Short name of the argument shape, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Arg::Scalar(_) => "scalar",
            Arg::Array(_) => "array",
            Arg::Map(_) => "map",
            Arg::Entity(_) => "entity",
        }
    }

    /// Wraps a slice of values as an array argument.
    pub fn array<T: Clone + Into<SqlValue>>(values: &[T]) -> Self {
        Arg::Array(values.iter().cloned().map(Into::into).collect())
    }

    /// Builds a map argument from key/value pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<SqlValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        Arg::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

macro_rules! scalar_arg {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Arg {
                fn from(value: $ty) -> Self {
                    Arg::Scalar(value.into())
                }
            }
        )*
    };
}

scalar_arg!(SqlValue, &str, String, &String, char, i32, i64, f64, bool);

impl<T: Into<SqlValue>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        Arg::Scalar(value.into())
    }
}

impl<T: Into<SqlValue>> From<Vec<T>> for Arg {
    fn from(values: Vec<T>) -> Self {
        Arg::Array(values.into_iter().map(Into::into).collect())
    }
}

impl<V: Into<SqlValue>> From<HashMap<String, V>> for Arg {
    fn from(values: HashMap<String, V>) -> Self {
        Arg::Map(values.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<V: Into<SqlValue>> From<BTreeMap<String, V>> for Arg {
    fn from(values: BTreeMap<String, V>) -> Self {
        Arg::Map(values.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

/// Builds a `Vec<Arg>` from a list of expressions convertible into [`Arg`].
///
/// ```
/// use daobind::{args, Arg, SqlValue};
///
/// let args = args!["users", 7, vec![1, 2]];
/// assert_eq!(args[0], Arg::Scalar(SqlValue::from("users")));
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! args {
    () => { ::std::vec::Vec::<$crate::Arg>::new() };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::Arg::from($value)),+]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(Arg::from("a"), Arg::Scalar(SqlValue::Text("a".into())));
        assert_eq!(
            Arg::from(vec![1, 2]),
            Arg::Array(vec![SqlValue::Int32(1), SqlValue::Int32(2)])
        );
        let mut map = HashMap::new();
        map.insert("id".to_string(), 3_i64);
        match Arg::from(map) {
            Arg::Map(m) => assert_eq!(m.get("id"), Some(&SqlValue::Int64(3))),
            other => panic!("Expected map, got {:?}", other),
        }
        assert_eq!(Arg::array(&["x", "y"]).kind_name(), "array");
    }
}
