use std::str::FromStr;

use crate::error::{DaoError, Result};

/// Driver-agnostic raw result from a statement.
/// All values are converted to text by the driver; `None` is SQL NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawQueryResult {
    /// Column names in order
    pub columns: Vec<String>,
    /// Rows, where each row is a vector of cell values in column order
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawQueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { columns, rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the number of rows in this result.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if this result contains no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A forward-only cursor over a [`RawQueryResult`].
///
/// The cursor starts before the first row; [`ResultCursor::advance`] must be
/// called before any cell can be read.
#[derive(Debug)]
pub struct ResultCursor {
    result: RawQueryResult,
    position: Option<usize>,
    closed: bool,
}

impl ResultCursor {
    pub fn new(result: RawQueryResult) -> Self {
        Self {
            result,
            position: None,
            closed: false,
        }
    }

    /// Advances to the next row. Returns false once the rows are exhausted.
    pub fn advance(&mut self) -> bool {
        if self.closed {
            return false;
        }
        let next = self.position.map_or(0, |p| p + 1);
        if next < self.result.rows.len() {
            self.position = Some(next);
            true
        } else {
            self.position = Some(self.result.rows.len());
            false
        }
    }

    /// Column names of the underlying result.
    pub fn columns(&self) -> &[String] {
        &self.result.columns
    }

    /// The underlying result, regardless of cursor position.
    pub fn raw(&self) -> &RawQueryResult {
        &self.result
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Releases the cursor. Any further read fails.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// A fresh cursor over a copy of the current row only, positioned
    /// before it.
    pub fn row_cursor(&self) -> Result<ResultCursor> {
        let row = self.current_row()?.to_vec();
        Ok(ResultCursor::new(RawQueryResult::new(
            self.result.columns.clone(),
            vec![row],
        )))
    }

    fn current_row(&self) -> Result<&[Option<String>]> {
        if self.closed {
            return Err(DaoError::Extraction("result cursor was closed".to_string()));
        }
        self.position
            .and_then(|p| self.result.rows.get(p))
            .map(|row| row.as_slice())
            .ok_or_else(|| DaoError::Extraction("result cursor is not on a row".to_string()))
    }

    fn cell(&self, column: &str) -> Result<Option<&str>> {
        let row = self.current_row()?;
        let index = self
            .result
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| DaoError::ColumnNotFound(column.to_string()))?;
        Ok(row.get(index).and_then(|v| v.as_deref()))
    }

    /// Returns true if the named cell of the current row is NULL.
    pub fn is_null(&self, column: &str) -> Result<bool> {
        Ok(self.cell(column)?.is_none())
    }

    fn non_null(&self, column: &str) -> Result<&str> {
        self.cell(column)?
            .ok_or_else(|| DaoError::Extraction(format!("column '{}' is NULL", column)))
    }

    fn parse<T: FromStr>(&self, column: &str, expected: &str) -> Result<T> {
        let text = self.non_null(column)?;
        text.trim().parse().map_err(|_| {
            DaoError::Extraction(format!(
                "column '{}': cannot read '{}' as {}",
                column, text, expected
            ))
        })
    }

    pub fn get_string(&self, column: &str) -> Result<String> {
        self.non_null(column).map(str::to_string)
    }

    pub fn get_i32(&self, column: &str) -> Result<i32> {
        self.parse(column, "i32")
    }

    pub fn get_i64(&self, column: &str) -> Result<i64> {
        self.parse(column, "i64")
    }

    pub fn get_f64(&self, column: &str) -> Result<f64> {
        self.parse(column, "f64")
    }

    /// Reads a boolean, accepting the spellings drivers commonly produce.
    pub fn get_bool(&self, column: &str) -> Result<bool> {
        match self.non_null(column)?.trim() {
            "t" | "true" | "TRUE" | "1" => Ok(true),
            "f" | "false" | "FALSE" | "0" => Ok(false),
            other => Err(DaoError::Extraction(format!(
                "column '{}': cannot read '{}' as bool",
                column, other
            ))),
        }
    }

    pub fn get_char(&self, column: &str) -> Result<char> {
        let text = self.non_null(column)?;
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(DaoError::Extraction(format!(
                "column '{}': cannot read '{}' as char",
                column, text
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> RawQueryResult {
        RawQueryResult::new(
            vec!["id".to_string(), "name".to_string(), "active".to_string()],
            vec![
                vec![Some("1".to_string()), Some("John".to_string()), Some("t".to_string())],
                vec![Some("2".to_string()), None, Some("false".to_string())],
            ],
        )
    }

    #[test]
    fn test_cursor_reads_rows_in_order() {
        let mut cursor = ResultCursor::new(result());
        assert!(cursor.advance());
        assert_eq!(cursor.get_i64("id").unwrap(), 1);
        assert_eq!(cursor.get_string("name").unwrap(), "John");
        assert!(cursor.get_bool("active").unwrap());

        assert!(cursor.advance());
        assert_eq!(cursor.get_i32("id").unwrap(), 2);
        assert!(cursor.is_null("name").unwrap());
        assert!(cursor.get_string("name").is_err());

        assert!(!cursor.advance());
        assert!(!cursor.advance());
    }

    #[test]
    fn test_cursor_requires_position() {
        let cursor = ResultCursor::new(result());
        let err = cursor.get_i64("id").unwrap_err();
        assert!(matches!(err, DaoError::Extraction(_)));
    }

    #[test]
    fn test_cursor_missing_column() {
        let mut cursor = ResultCursor::new(result());
        cursor.advance();
        match cursor.get_string("missing").unwrap_err() {
            DaoError::ColumnNotFound(c) => assert_eq!(c, "missing"),
            other => panic!("Expected ColumnNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_closed_cursor_fails() {
        let mut cursor = ResultCursor::new(result());
        cursor.advance();
        cursor.close();
        assert!(cursor.get_i64("id").is_err());
        assert!(!cursor.advance());
    }

    #[test]
    fn test_parse_failure() {
        let mut cursor = ResultCursor::new(result());
        cursor.advance();
        assert!(cursor.get_i64("name").is_err());
        assert!(cursor.get_char("name").is_err());
    }
}
