use std::sync::Arc;

use tracing::warn;

use crate::error::{DaoError, Result};
use crate::extract::{scalar_leaf, ExtractionFrame, Extractor, ExtractorRegistry, Registration};
use crate::types::{CollectFn, Extracted, ResultCursor, ScalarKind, TypeDesc, TypeKind};

/// Reads the frame's reference column with the accessor matching the
/// reference's declared type.
#[derive(Debug, Default)]
pub struct ScalarExtractor;

impl Extractor for ScalarExtractor {
    fn read(&self, cursor: &mut ResultCursor, frame: &ExtractionFrame) -> Result<Extracted> {
        let reference = frame.reference().ok_or_else(|| {
            DaoError::Extraction("scalar extraction needs a reference column".to_string())
        })?;
        let column = reference.column.as_str();
        // A list-typed reference is read one element at a time.
        let kind = match scalar_leaf(&reference.ty).map(TypeDesc::kind) {
            Some(TypeKind::Scalar(kind)) => *kind,
            _ => {
                return Err(DaoError::Extraction(format!(
                    "column '{}' is declared as {}, not a scalar",
                    column,
                    reference.ty.name()
                )))
            }
        };
        let value: Extracted = match kind {
            ScalarKind::Bool => Box::new(cursor.get_bool(column)?),
            ScalarKind::Int32 => Box::new(cursor.get_i32(column)?),
            ScalarKind::Int64 => Box::new(cursor.get_i64(column)?),
            ScalarKind::Float64 => Box::new(cursor.get_f64(column)?),
            ScalarKind::Char => Box::new(cursor.get_char(column)?),
            ScalarKind::Text => Box::new(cursor.get_string(column)?),
        };
        Ok(value)
    }
}

pub(super) struct ScalarRegistration;

impl Registration for ScalarRegistration {
    fn name(&self) -> &str {
        "scalar"
    }

    fn accepts(&self, ty: &TypeDesc) -> bool {
        ty.is_scalar()
    }

    fn create(&self, _ty: &TypeDesc, _registry: &ExtractorRegistry) -> Result<Arc<dyn Extractor>> {
        Ok(Arc::new(ScalarExtractor))
    }
}

/// Hands back the raw result untouched.
#[derive(Debug, Default)]
pub struct RawExtractor;

impl Extractor for RawExtractor {
    fn read(&self, cursor: &mut ResultCursor, _frame: &ExtractionFrame) -> Result<Extracted> {
        if cursor.is_closed() {
            return Err(DaoError::Extraction("result cursor was closed".to_string()));
        }
        Ok(Box::new(cursor.raw().clone()))
    }

    fn reads_rows(&self) -> bool {
        true
    }
}

pub(super) struct RawRegistration;

impl Registration for RawRegistration {
    fn name(&self) -> &str {
        "raw"
    }

    fn accepts(&self, ty: &TypeDesc) -> bool {
        matches!(ty.kind(), TypeKind::Rows)
    }

    fn create(&self, _ty: &TypeDesc, _registry: &ExtractorRegistry) -> Result<Arc<dyn Extractor>> {
        Ok(Arc::new(RawExtractor))
    }
}

/// Applies an element extractor to every remaining row.
///
/// An element extractor that walks rows itself, such as a nested list, only
/// sees the row its element is built from.
pub struct ListExtractor {
    element: Option<Arc<dyn Extractor>>,
    collect: CollectFn,
}

impl ListExtractor {
    pub fn new(element: Option<Arc<dyn Extractor>>, collect: CollectFn) -> Self {
        Self { element, collect }
    }
}

impl Extractor for ListExtractor {
    fn read(&self, cursor: &mut ResultCursor, frame: &ExtractionFrame) -> Result<Extracted> {
        let Some(element) = &self.element else {
            return (self.collect)(Vec::new());
        };
        let mut items = Vec::new();
        while cursor.advance() {
            let item = if element.reads_rows() {
                let mut row = cursor.row_cursor()?;
                let item = element.read(&mut row, frame);
                row.close();
                item?
            } else {
                element.read(cursor, frame)?
            };
            items.push(item);
        }
        (self.collect)(items)
    }

    fn reads_rows(&self) -> bool {
        true
    }
}

pub(super) struct ListRegistration;

impl Registration for ListRegistration {
    fn name(&self) -> &str {
        "list"
    }

    fn accepts(&self, ty: &TypeDesc) -> bool {
        matches!(ty.kind(), TypeKind::List { .. })
    }

    fn create(&self, ty: &TypeDesc, registry: &ExtractorRegistry) -> Result<Arc<dyn Extractor>> {
        let TypeKind::List { element, collect } = ty.kind() else {
            return Err(DaoError::Configuration(format!(
                "{} is not a list type",
                ty.name()
            )));
        };
        let element_extractor = registry.resolve(element)?;
        if element_extractor.is_none() {
            warn!(
                list = ty.name(),
                element = element.name(),
                "no extractor for list element type, list will always be empty"
            );
        }
        Ok(Arc::new(ListExtractor::new(element_extractor, *collect)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{downcast, ty, RawQueryResult};

    fn cursor(columns: &[&str], rows: &[&[&str]]) -> ResultCursor {
        ResultCursor::new(RawQueryResult::new(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|v| Some(v.to_string())).collect())
                .collect(),
        ))
    }

    #[test]
    fn test_scalar_uses_reference_type() {
        let mut cursor = cursor(&["id", "name"], &[&["7", "Bob"]]);
        cursor.advance();
        let root = ExtractionFrame::new("Api", None);

        let id = ScalarExtractor
            .read(&mut cursor, &root.with_reference("id", ty::of::<i32>().into_desc()))
            .unwrap();
        assert_eq!(downcast::<i32>(id).unwrap(), 7);

        let name = ScalarExtractor
            .read(&mut cursor, &root.with_reference("name", ty::of::<String>().into_desc()))
            .unwrap();
        assert_eq!(downcast::<String>(name).unwrap(), "Bob");
    }

    #[test]
    fn test_scalar_requires_reference() {
        let mut cursor = cursor(&["id"], &[&["7"]]);
        cursor.advance();
        let err = ScalarExtractor
            .read(&mut cursor, &ExtractionFrame::new("Api", None))
            .unwrap_err();
        assert!(matches!(err, DaoError::Extraction(_)));
    }

    #[test]
    fn test_raw_passthrough() {
        let mut cursor = cursor(&["id"], &[&["1"], &["2"]]);
        let expected = cursor.raw().clone();
        let value = RawExtractor
            .read(&mut cursor, &ExtractionFrame::new("Api", None))
            .unwrap();
        assert_eq!(downcast::<RawQueryResult>(value).unwrap(), expected);
    }

    #[test]
    fn test_list_without_element_is_empty() {
        let collect = match ty::of::<Vec<i64>>().desc().kind() {
            TypeKind::List { collect, .. } => *collect,
            _ => unreachable!(),
        };
        let list = ListExtractor::new(None, collect);
        let mut cursor = cursor(&["id"], &[&["1"], &["2"]]);
        let value = list
            .read(&mut cursor, &ExtractionFrame::new("Api", None))
            .unwrap();
        assert!(downcast::<Vec<i64>>(value).unwrap().is_empty());
    }

    #[test]
    fn test_list_with_unresolvable_element_is_empty() {
        struct Unknown;
        let registry = ExtractorRegistry::new();
        let returns = ty::list(ty::opaque::<Unknown>()).into_desc();
        let list = registry.require(&returns).unwrap();
        let mut cursor = cursor(&["id"], &[&["1"]]);
        let value = list
            .read(&mut cursor, &ExtractionFrame::new("Api", None))
            .unwrap();
        assert!(downcast::<Vec<Unknown>>(value).unwrap().is_empty());
    }
}
