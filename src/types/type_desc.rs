use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::marker::PhantomData;

use crate::error::{DaoError, Result};
use crate::extract::{Entity, EntityType};
use crate::types::RawQueryResult;

/// A value produced by an extractor. The concrete type is the one named by
/// the [`TypeDesc`] the extractor was resolved for.
pub type Extracted = Box<dyn Any + Send>;

/// Collects extracted list elements into the concrete `Vec<T>` of a list type.
pub type CollectFn = fn(Vec<Extracted>) -> Result<Extracted>;

/// Scalar shapes readable from a single column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Bool,
    Int32,
    Int64,
    Float64,
    Char,
    Text,
}

/// The shape of a described type, which is what extractor registrations match on.
#[derive(Clone)]
pub enum TypeKind {
    Scalar(ScalarKind),
    /// The raw tabular result itself.
    Rows,
    /// A sequence whose elements are described by `element`.
    List {
        element: Box<TypeDesc>,
        collect: CollectFn,
    },
    /// A type implementing [`Entity`].
    Entity(EntityType),
    /// Any other type; only user registrations can handle these.
    Opaque,
}

/// Runtime description of a return or field type.
#[derive(Clone)]
pub struct TypeDesc {
    name: &'static str,
    type_id: TypeId,
    kind: TypeKind,
}

impl TypeDesc {
    fn new<T: 'static>(kind: TypeKind) -> Self {
        Self {
            name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            kind,
        }
    }

    /// Fully qualified Rust type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    /// Returns true if this describes exactly `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, TypeKind::Scalar(_))
    }

    /// The element type of a list, if this is one.
    pub fn element(&self) -> Option<&TypeDesc> {
        match &self.kind {
            TypeKind::List { element, .. } => Some(element),
            _ => None,
        }
    }

    /// The entity marker of this type, if it carries one.
    pub fn entity(&self) -> Option<&EntityType> {
        match &self.kind {
            TypeKind::Entity(entity) => Some(entity),
            _ => None,
        }
    }
}

impl PartialEq for TypeDesc {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl fmt::Debug for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeDesc").field(&self.name).finish()
    }
}

/// A [`TypeDesc`] tied to the Rust type it describes.
///
/// Constructed through the functions in [`ty`] or [`SqlType::ty`].
pub struct Ty<T> {
    desc: TypeDesc,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Ty<T> {
    fn wrap(desc: TypeDesc) -> Self {
        Self {
            desc,
            _marker: PhantomData,
        }
    }

    pub fn desc(&self) -> &TypeDesc {
        &self.desc
    }

    pub fn into_desc(self) -> TypeDesc {
        self.desc
    }
}

impl<T> Clone for Ty<T> {
    fn clone(&self) -> Self {
        Self::wrap(self.desc.clone())
    }
}

impl<T> fmt::Debug for Ty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.desc.fmt(f)
    }
}

/// Constructors for typed descriptors.
pub mod ty {
    use super::*;

    /// Descriptor of a type with a built-in mapping.
    pub fn of<T: SqlType>() -> Ty<T> {
        T::ty()
    }

    /// Descriptor of an entity type.
    pub fn entity<E: Entity>() -> Ty<E> {
        Ty::wrap(TypeDesc::new::<E>(TypeKind::Entity(EntityType::of::<E>())))
    }

    /// Descriptor of a `Vec` whose elements are described by `element`.
    pub fn list<T: Send + 'static>(element: Ty<T>) -> Ty<Vec<T>> {
        Ty::wrap(TypeDesc::new::<Vec<T>>(TypeKind::List {
            element: Box::new(element.desc),
            collect: collect_vec::<T>,
        }))
    }

    /// Descriptor of the raw tabular result, for direct low-level access.
    pub fn rows() -> Ty<RawQueryResult> {
        Ty::wrap(TypeDesc::new::<RawQueryResult>(TypeKind::Rows))
    }

    /// Descriptor of a type only a user registration knows how to extract.
    pub fn opaque<T: Send + 'static>() -> Ty<T> {
        Ty::wrap(TypeDesc::new::<T>(TypeKind::Opaque))
    }

    pub(crate) fn scalar<T: Send + 'static>(kind: ScalarKind) -> Ty<T> {
        Ty::wrap(TypeDesc::new::<T>(TypeKind::Scalar(kind)))
    }
}

/// Types with a built-in descriptor.
pub trait SqlType: Send + Sized + 'static {
    fn ty() -> Ty<Self>;
}

macro_rules! scalar_type {
    ($($t:ty => $kind:ident),* $(,)?) => {
        $(
            impl SqlType for $t {
                fn ty() -> Ty<Self> {
                    ty::scalar(ScalarKind::$kind)
                }
            }
        )*
    };
}

scalar_type!(
    bool => Bool,
    i32 => Int32,
    i64 => Int64,
    f64 => Float64,
    char => Char,
    String => Text,
);

impl SqlType for RawQueryResult {
    fn ty() -> Ty<Self> {
        ty::rows()
    }
}

impl<T: SqlType> SqlType for Vec<T> {
    fn ty() -> Ty<Self> {
        ty::list(T::ty())
    }
}

fn collect_vec<T: Send + 'static>(items: Vec<Extracted>) -> Result<Extracted> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        out.push(downcast(item)?);
    }
    Ok(Box::new(out))
}

/// Unboxes an extracted value into its concrete type.
pub fn downcast<T: 'static>(value: Extracted) -> Result<T> {
    value.downcast::<T>().map(|v| *v).map_err(|_| {
        DaoError::Extraction(format!("extracted value is not a {}", type_name::<T>()))
    })
}
