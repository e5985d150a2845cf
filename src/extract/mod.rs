//! Conversion of raw results into typed values.
//!
//! An [`ExtractorRegistry`] holds an ordered list of [`Registration`]s. Resolving
//! a [`TypeDesc`] walks that list and asks the first registration that accepts
//! the type to create an [`Extractor`]. Built-ins come first (scalar, raw rows,
//! list, entity), so user registrations only ever see types the built-ins reject.

mod builtin;
mod entity;

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::{DaoError, Result};
use crate::traits::Source;
use crate::types::{Extracted, RawQueryResult, ResultCursor, TypeDesc, TypeKind};

pub use builtin::{ListExtractor, RawExtractor, ScalarExtractor};
pub use entity::{Entity, EntityColumn, EntityColumns, EntityDescriptor, EntityExtractor, EntityType};

/// Converts the current state of a result cursor into a typed value.
pub trait Extractor: Send + Sync {
    fn read(&self, cursor: &mut ResultCursor, frame: &ExtractionFrame) -> Result<Extracted>;

    /// True if the extractor walks the cursor itself. Other extractors are
    /// handed a cursor already positioned on a row.
    fn reads_rows(&self) -> bool {
        false
    }
}

/// The column and declared type a nested extractor should read.
#[derive(Debug, Clone)]
pub struct Reference {
    pub column: String,
    pub ty: TypeDesc,
}

/// Addressing information passed down a chain of extractors.
///
/// Frames are immutable: [`ExtractionFrame::with_reference`] returns a new
/// frame, so a nested read can never change what its caller sees.
#[derive(Clone)]
pub struct ExtractionFrame {
    source: Option<Arc<dyn Source>>,
    api: Arc<str>,
    reference: Option<Reference>,
    entities: Vec<TypeId>,
}

impl ExtractionFrame {
    pub fn new(api: impl Into<Arc<str>>, source: Option<Arc<dyn Source>>) -> Self {
        Self {
            source,
            api: api.into(),
            reference: None,
            entities: Vec::new(),
        }
    }

    /// The source the result came from.
    pub fn source(&self) -> Option<&Arc<dyn Source>> {
        self.source.as_ref()
    }

    /// Name of the interface the call was made through.
    pub fn api(&self) -> &str {
        &self.api
    }

    pub fn reference(&self) -> Option<&Reference> {
        self.reference.as_ref()
    }

    pub fn with_reference(&self, column: impl Into<String>, ty: TypeDesc) -> Self {
        Self {
            source: self.source.clone(),
            api: Arc::clone(&self.api),
            reference: Some(Reference {
                column: column.into(),
                ty,
            }),
            entities: self.entities.clone(),
        }
    }

    /// A frame for reading the fields of an entity of type `entity`.
    pub fn entering(&self, entity: TypeId) -> Self {
        let mut frame = self.clone();
        frame.entities.push(entity);
        frame
    }

    /// True while an entity of type `entity` is being read further up the chain.
    pub fn is_reading(&self, entity: TypeId) -> bool {
        self.entities.contains(&entity)
    }
}

impl fmt::Debug for ExtractionFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionFrame")
            .field("api", &self.api)
            .field("reference", &self.reference)
            .field("depth", &self.entities.len())
            .finish()
    }
}

/// A type-recognizing extractor factory.
pub trait Registration: Send + Sync {
    fn name(&self) -> &str;

    /// Can this registration handle the given shape?
    fn accepts(&self, ty: &TypeDesc) -> bool;

    /// Produces an extractor configured for `ty`. `registry` resolves nested types.
    fn create(&self, ty: &TypeDesc, registry: &ExtractorRegistry) -> Result<Arc<dyn Extractor>>;
}

type AcceptsFn = dyn Fn(&TypeDesc) -> bool + Send + Sync;
type CreateFn = dyn Fn(&TypeDesc, &ExtractorRegistry) -> Result<Arc<dyn Extractor>> + Send + Sync;

/// A [`Registration`] assembled from closures.
pub struct FnRegistration {
    name: String,
    accepts: Box<AcceptsFn>,
    create: Box<CreateFn>,
}

impl FnRegistration {
    pub fn new<A, C>(name: impl Into<String>, accepts: A, create: C) -> Self
    where
        A: Fn(&TypeDesc) -> bool + Send + Sync + 'static,
        C: Fn(&TypeDesc, &ExtractorRegistry) -> Result<Arc<dyn Extractor>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            accepts: Box::new(accepts),
            create: Box::new(create),
        }
    }

    /// Registration for exactly the type `T`, always yielding `extractor`.
    pub fn for_type<T: 'static>(name: impl Into<String>, extractor: Arc<dyn Extractor>) -> Self {
        Self::new(
            name,
            |ty| ty.type_id() == TypeId::of::<T>(),
            move |_, _| Ok(Arc::clone(&extractor)),
        )
    }
}

impl Registration for FnRegistration {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, ty: &TypeDesc) -> bool {
        (self.accepts)(ty)
    }

    fn create(&self, ty: &TypeDesc, registry: &ExtractorRegistry) -> Result<Arc<dyn Extractor>> {
        (self.create)(ty, registry)
    }
}

/// Ordered collection of extractor registrations.
///
/// Reads work on an immutable snapshot; [`register`](Self::register) publishes
/// a new snapshot under a writer lock, so a concurrent resolve sees either the
/// old or the new list, never a partial one. The list only grows.
///
/// Cloning yields another handle to the same registrations.
#[derive(Clone)]
pub struct ExtractorRegistry {
    inner: Arc<RegistryState>,
}

struct RegistryState {
    registrations: ArcSwap<Vec<Arc<dyn Registration>>>,
    write_lock: Mutex<()>,
    entities: RwLock<HashMap<TypeId, Arc<EntityDescriptor>>>,
}

impl ExtractorRegistry {
    /// A registry seeded with the built-in registrations.
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register(builtin::ScalarRegistration);
        registry.register(builtin::RawRegistration);
        registry.register(builtin::ListRegistration);
        registry.register(entity::EntityRegistration);
        registry
    }

    /// A registry without any registrations.
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(RegistryState {
                registrations: ArcSwap::from_pointee(Vec::new()),
                write_lock: Mutex::new(()),
                entities: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Appends a registration. It is consulted after every earlier one.
    pub fn register(&self, registration: impl Registration + 'static) {
        self.register_arc(Arc::new(registration));
    }

    pub fn register_arc(&self, registration: Arc<dyn Registration>) {
        let _guard = self.inner.write_lock.lock();
        let mut next = Vec::clone(&self.inner.registrations.load_full());
        debug!(
            name = registration.name(),
            position = next.len(),
            "registered extractor"
        );
        next.push(registration);
        self.inner.registrations.store(Arc::new(next));
    }

    /// Names of the current registrations, in resolution order.
    pub fn registration_names(&self) -> Vec<String> {
        self.inner
            .registrations
            .load()
            .iter()
            .map(|r| r.name().to_string())
            .collect()
    }

    /// Finds an extractor for `ty`. The first accepting registration wins;
    /// `Ok(None)` means no registration accepts the type.
    pub fn resolve(&self, ty: &TypeDesc) -> Result<Option<Arc<dyn Extractor>>> {
        let snapshot = self.inner.registrations.load_full();
        match snapshot.iter().find(|r| r.accepts(ty)) {
            Some(registration) => registration.create(ty, self).map(Some),
            None => Ok(None),
        }
    }

    /// Like [`resolve`](Self::resolve), failing when nothing accepts the type.
    pub fn require(&self, ty: &TypeDesc) -> Result<Arc<dyn Extractor>> {
        self.resolve(ty)?.ok_or_else(|| {
            DaoError::Configuration(format!("no extractor accepts type {}", ty.name()))
        })
    }

    /// The cached descriptor of an entity type, built on first request.
    pub fn entity_descriptor(&self, entity: &EntityType) -> Result<Arc<EntityDescriptor>> {
        if let Some(descriptor) = self.inner.entities.read().get(&entity.type_id()) {
            return Ok(Arc::clone(descriptor));
        }
        let built = Arc::new(entity.describe()?);
        let mut entities = self.inner.entities.write();
        let descriptor = entities.entry(entity.type_id()).or_insert(built);
        Ok(Arc::clone(descriptor))
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A resolved extractor together with the return type it was resolved for.
/// Services call [`Extraction::apply`] on the rows a select produced.
#[derive(Clone)]
pub struct Extraction {
    extractor: Arc<dyn Extractor>,
    returns: TypeDesc,
    api: Arc<str>,
}

impl Extraction {
    pub fn new(extractor: Arc<dyn Extractor>, returns: TypeDesc, api: impl Into<Arc<str>>) -> Self {
        Self {
            extractor,
            returns,
            api: api.into(),
        }
    }

    pub fn returns(&self) -> &TypeDesc {
        &self.returns
    }

    /// Converts a raw result into the declared return type.
    ///
    /// Scalar returns (and lists of scalars) read the only column of a
    /// single-column result. Extractors that don't walk the cursor themselves
    /// read the first row; an empty result is then an error.
    pub fn apply(
        &self,
        result: RawQueryResult,
        source: Option<Arc<dyn Source>>,
    ) -> Result<Extracted> {
        let mut frame = ExtractionFrame::new(Arc::clone(&self.api), source);
        if let Some(leaf) = scalar_leaf(&self.returns) {
            if let [column] = result.columns.as_slice() {
                frame = frame.with_reference(column.clone(), leaf.clone());
            }
        }

        let mut cursor = ResultCursor::new(result);
        if !self.extractor.reads_rows() && !cursor.advance() {
            return Err(DaoError::UnexpectedRowCount {
                expected: 1,
                actual: 0,
            });
        }
        let value = self.extractor.read(&mut cursor, &frame);
        cursor.close();
        value
    }
}

fn scalar_leaf(ty: &TypeDesc) -> Option<&TypeDesc> {
    match ty.kind() {
        TypeKind::Scalar(_) => Some(ty),
        TypeKind::List { element, .. } => scalar_leaf(element),
        _ => None,
    }
}
