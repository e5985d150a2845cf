use std::fmt;

/// Represents a scalar statement value in a driver-agnostic way.
/// Values are rendered into statement text with [`SqlValue::to_literal`].
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Char(char),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Bool(bool),
}

impl SqlValue {
    /// Returns true for values rendered inside single quotes.
    pub fn is_textual(&self) -> bool {
        matches!(self, SqlValue::Text(_) | SqlValue::Char(_))
    }

    /// Renders the value as a statement literal.
    /// Textual values are wrapped in single quotes with embedded quotes doubled;
    /// everything else is substituted in its plain textual form. Non-finite
    /// floats render as `NULL`.
    pub fn to_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Text(s) => quote(s),
            SqlValue::Char(c) => quote(c.encode_utf8(&mut [0u8; 4])),
            SqlValue::Int32(i) => i.to_string(),
            SqlValue::Int64(i) => i.to_string(),
            // NaN and infinities have no literal form.
            SqlValue::Float64(f) if !f.is_finite() => "NULL".to_string(),
            SqlValue::Float64(f) => f.to_string(),
            SqlValue::Bool(b) => b.to_string(),
        }
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_literal())
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&String> for SqlValue {
    fn from(value: &String) -> Self {
        SqlValue::Text(value.clone())
    }
}

impl From<char> for SqlValue {
    fn from(value: char) -> Self {
        SqlValue::Char(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int32(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int64(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float64(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_textual_values_are_quoted() {
        assert_eq!(SqlValue::from("users").to_literal(), "'users'");
        assert_eq!(SqlValue::from('x').to_literal(), "'x'");
        assert_eq!(SqlValue::from("O'Brien").to_literal(), "'O''Brien'");
    }

    #[test]
    fn test_other_values_are_bare() {
        assert_eq!(SqlValue::from(7).to_literal(), "7");
        assert_eq!(SqlValue::from(7_i64).to_literal(), "7");
        assert_eq!(SqlValue::from(1.5).to_literal(), "1.5");
        assert_eq!(SqlValue::from(true).to_literal(), "true");
        assert_eq!(SqlValue::from(None::<i32>).to_literal(), "NULL");
    }

    #[test]
    fn test_non_finite_floats_render_null() {
        assert_eq!(SqlValue::from(f64::NAN).to_literal(), "NULL");
        assert_eq!(SqlValue::from(f64::INFINITY).to_literal(), "NULL");
        assert_eq!(SqlValue::from(f64::NEG_INFINITY).to_literal(), "NULL");
        assert_eq!(SqlValue::from(-0.25).to_literal(), "-0.25");
    }
}
