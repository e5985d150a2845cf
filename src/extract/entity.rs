use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{DaoError, Result};
use crate::extract::{ExtractionFrame, Extractor, ExtractorRegistry, Registration};
use crate::types::{Extracted, ResultCursor, SqlType, Ty, TypeDesc};

/// A type whose instances are rebuilt column by column from result rows.
///
/// ```
/// use daobind::extract::{Entity, EntityColumns};
///
/// #[derive(Default)]
/// struct User {
///     id: i64,
///     name: String,
/// }
///
/// impl Entity for User {
///     const NAME: &'static str = "User";
///
///     fn describe(columns: &mut EntityColumns<Self>) {
///         columns
///             .constructor(User::default)
///             .column("id", |u: &mut User, v: i64| u.id = v)
///             .column("name", |u: &mut User, v: String| u.name = v);
///     }
/// }
/// ```
pub trait Entity: Send + Sized + 'static {
    const NAME: &'static str;

    fn describe(columns: &mut EntityColumns<Self>);
}

type Setter = Box<dyn Fn(&mut (dyn Any + Send), Extracted) -> Result<()> + Send + Sync>;
type Constructor = Box<dyn Fn() -> Option<Extracted> + Send + Sync>;

/// One column binding of an entity: the column name, the field's declared
/// type and the setter that assigns an extracted value.
pub struct EntityColumn {
    name: String,
    ty: TypeDesc,
    assign: Setter,
}

impl EntityColumn {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &TypeDesc {
        &self.ty
    }

    fn assign(&self, target: &mut (dyn Any + Send), value: Extracted) -> Result<()> {
        (self.assign)(target, value)
    }
}

impl fmt::Debug for EntityColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityColumn")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .finish()
    }
}

enum Ctor<E> {
    Infallible(fn() -> E),
    Fallible(fn() -> Option<E>),
}

/// Collects the column bindings of an entity type, see [`Entity::describe`].
pub struct EntityColumns<E> {
    constructor: Option<Ctor<E>>,
    columns: Vec<EntityColumn>,
}

impl<E: Entity> EntityColumns<E> {
    fn new() -> Self {
        Self {
            constructor: None,
            columns: Vec::new(),
        }
    }

    /// Zero-argument construction used for every extracted row.
    pub fn constructor(&mut self, construct: fn() -> E) -> &mut Self {
        self.constructor = Some(Ctor::Infallible(construct));
        self
    }

    /// Like [`constructor`](Self::constructor); `None` fails the row being read.
    pub fn try_constructor(&mut self, construct: fn() -> Option<E>) -> &mut Self {
        self.constructor = Some(Ctor::Fallible(construct));
        self
    }

    /// Binds `column` to a field of a built-in type.
    pub fn column<V: SqlType>(&mut self, column: &str, set: fn(&mut E, V)) -> &mut Self {
        self.column_with(column, V::ty(), set)
    }

    /// Binds `column` to a field described by `ty`, e.g. a nested entity or a
    /// type handled by a user registration.
    pub fn column_with<V: Send + 'static>(
        &mut self,
        column: &str,
        ty: Ty<V>,
        set: fn(&mut E, V),
    ) -> &mut Self {
        // First binding of a column name wins.
        if self.columns.iter().any(|c| c.name == column) {
            return self;
        }
        let name = column.to_string();
        let assign: Setter = Box::new(move |target, value| {
            let target = target.downcast_mut::<E>().ok_or_else(|| {
                DaoError::Extraction(format!("instance is not a {}", E::NAME))
            })?;
            let value = value.downcast::<V>().map_err(|_| {
                DaoError::Extraction(format!(
                    "value for {}.{} is not a {}",
                    E::NAME,
                    name,
                    type_name::<V>()
                ))
            })?;
            set(target, *value);
            Ok(())
        });
        self.columns.push(EntityColumn {
            name: column.to_string(),
            ty: ty.into_desc(),
            assign,
        });
        self
    }
}

/// The immutable column-to-setter table of one entity type.
pub struct EntityDescriptor {
    name: &'static str,
    type_id: TypeId,
    construct: Constructor,
    columns: Vec<EntityColumn>,
}

impl EntityDescriptor {
    /// Builds the descriptor of `E`. Fails if `E` declares no constructor.
    pub fn of<E: Entity>() -> Result<Self> {
        let mut builder = EntityColumns::<E>::new();
        E::describe(&mut builder);

        let construct: Constructor = match builder.constructor {
            Some(Ctor::Infallible(f)) => Box::new(move || Some(Box::new(f()) as Extracted)),
            Some(Ctor::Fallible(f)) => Box::new(move || f().map(|e| Box::new(e) as Extracted)),
            None => {
                return Err(DaoError::Configuration(format!(
                    "entity {} has no zero-argument constructor",
                    E::NAME
                )))
            }
        };
        Ok(Self {
            name: E::NAME,
            type_id: TypeId::of::<E>(),
            construct,
            columns: builder.columns,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn columns(&self) -> &[EntityColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&EntityColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn instantiate(&self) -> Result<Extracted> {
        (self.construct)().ok_or_else(|| {
            DaoError::Extraction(format!("could not create {} instance", self.name))
        })
    }
}

impl fmt::Debug for EntityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("name", &self.name)
            .field("columns", &self.columns)
            .finish()
    }
}

/// The entity marker carried by a [`TypeDesc`].
#[derive(Clone, Copy)]
pub struct EntityType {
    name: &'static str,
    type_id: TypeId,
    describe: fn() -> Result<EntityDescriptor>,
}

impl EntityType {
    pub fn of<E: Entity>() -> Self {
        Self {
            name: E::NAME,
            type_id: TypeId::of::<E>(),
            describe: EntityDescriptor::of::<E>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn describe(&self) -> Result<EntityDescriptor> {
        (self.describe)()
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityType").field(&self.name).finish()
    }
}

/// Reads the current row into a fresh entity instance.
///
/// Only columns present in both the result and the descriptor are read;
/// other result columns are ignored and unmatched fields keep the value the
/// constructor gave them. NULL cells are skipped the same way.
///
/// Field extractors are resolved on the first read that needs them, so entity
/// types may refer to themselves or to each other. A field whose entity type
/// is already being read higher up keeps its constructor value.
pub struct EntityExtractor {
    descriptor: Arc<EntityDescriptor>,
    registry: ExtractorRegistry,
    positions: HashMap<String, usize>,
    resolved: RwLock<HashMap<usize, Option<Arc<dyn Extractor>>>>,
}

impl EntityExtractor {
    pub fn new(descriptor: Arc<EntityDescriptor>, registry: &ExtractorRegistry) -> Self {
        let positions = descriptor
            .columns
            .iter()
            .enumerate()
            .map(|(index, column)| (column.name.clone(), index))
            .collect();
        Self {
            descriptor,
            registry: registry.clone(),
            positions,
            resolved: RwLock::new(HashMap::new()),
        }
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    /// The extractor of the field at `index`; `None` if no registration
    /// accepts its type.
    fn field_extractor(&self, index: usize) -> Result<Option<Arc<dyn Extractor>>> {
        if let Some(extractor) = self.resolved.read().get(&index) {
            return Ok(extractor.clone());
        }
        let extractor = self.registry.resolve(&self.descriptor.columns[index].ty)?;
        let mut resolved = self.resolved.write();
        Ok(resolved.entry(index).or_insert(extractor).clone())
    }
}

impl Extractor for EntityExtractor {
    fn read(&self, cursor: &mut ResultCursor, frame: &ExtractionFrame) -> Result<Extracted> {
        if cursor.is_closed() {
            return Err(DaoError::Extraction("result cursor was closed".to_string()));
        }
        let mut instance = self.descriptor.instantiate()?;
        let frame = frame.entering(self.descriptor.type_id);

        let columns = cursor.columns().to_vec();
        for column in &columns {
            let Some(&index) = self.positions.get(column) else {
                continue;
            };
            let binding = &self.descriptor.columns[index];
            if let Some(entity) = binding.ty.entity() {
                if frame.is_reading(entity.type_id()) {
                    continue;
                }
            }
            if cursor.is_null(column)? {
                continue;
            }
            let Some(extractor) = self.field_extractor(index)? else {
                continue;
            };
            let nested = frame.with_reference(column.as_str(), binding.ty.clone());
            let value = if extractor.reads_rows() {
                let mut row = cursor.row_cursor()?;
                let value = extractor.read(&mut row, &nested);
                row.close();
                value?
            } else {
                extractor.read(cursor, &nested)?
            };
            binding.assign(instance.as_mut(), value)?;
        }
        Ok(instance)
    }
}

pub(super) struct EntityRegistration;

impl Registration for EntityRegistration {
    fn name(&self) -> &str {
        "entity"
    }

    fn accepts(&self, ty: &TypeDesc) -> bool {
        ty.entity().is_some()
    }

    fn create(&self, ty: &TypeDesc, registry: &ExtractorRegistry) -> Result<Arc<dyn Extractor>> {
        let entity = ty.entity().ok_or_else(|| {
            DaoError::Configuration(format!("{} is not an entity type", ty.name()))
        })?;
        let descriptor = registry.entity_descriptor(entity)?;
        Ok(Arc::new(EntityExtractor::new(descriptor, registry)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Extraction;
    use crate::types::{downcast, ty, RawQueryResult};

    #[derive(Debug, Default, PartialEq)]
    struct User {
        id: i64,
        name: String,
    }

    impl Entity for User {
        const NAME: &'static str = "User";

        fn describe(columns: &mut EntityColumns<Self>) {
            columns
                .constructor(User::default)
                .column("id", |u: &mut User, v: i64| u.id = v)
                .column("name", |u: &mut User, v: String| u.name = v);
        }
    }

    struct NoConstructor;

    impl Entity for NoConstructor {
        const NAME: &'static str = "NoConstructor";

        fn describe(_columns: &mut EntityColumns<Self>) {}
    }

    struct Refuses;

    impl Entity for Refuses {
        const NAME: &'static str = "Refuses";

        fn describe(columns: &mut EntityColumns<Self>) {
            columns.try_constructor(|| None);
        }
    }

    fn raw(columns: &[&str], rows: &[&[Option<&str>]]) -> RawQueryResult {
        RawQueryResult::new(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|v| v.map(str::to_string)).collect())
                .collect(),
        )
    }

    fn extract<T: 'static>(returns: Ty<T>, result: RawQueryResult) -> Result<T> {
        let registry = ExtractorRegistry::new();
        let returns = returns.into_desc();
        let extraction = Extraction::new(registry.require(&returns)?, returns, "UserStorage");
        downcast(extraction.apply(result, None)?)
    }

    #[test]
    fn test_row_into_entity() {
        let user = extract(
            ty::entity::<User>(),
            raw(&["id", "name"], &[&[Some("1"), Some("Ada")]]),
        )
        .unwrap();
        assert_eq!(
            user,
            User {
                id: 1,
                name: "Ada".to_string()
            }
        );
    }

    #[test]
    fn test_missing_column_keeps_default() {
        let user = extract(ty::entity::<User>(), raw(&["id"], &[&[Some("1")]])).unwrap();
        assert_eq!(user.id, 1);
        assert_eq!(user.name, "");
    }

    #[test]
    fn test_extra_and_null_columns_are_ignored() {
        let user = extract(
            ty::entity::<User>(),
            raw(
                &["email", "id", "name"],
                &[&[Some("ada@example.com"), Some("3"), None]],
            ),
        )
        .unwrap();
        assert_eq!(user.id, 3);
        assert_eq!(user.name, "");
    }

    #[test]
    fn test_list_of_entities() {
        let users = extract(
            ty::list(ty::entity::<User>()),
            raw(
                &["id", "name"],
                &[&[Some("1"), Some("Ada")], &[Some("2"), Some("Bob")]],
            ),
        )
        .unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].name, "Bob");
    }

    #[test]
    fn test_bad_cell_fails_row() {
        let err = extract(
            ty::entity::<User>(),
            raw(&["id"], &[&[Some("not-a-number")]]),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Extraction);
    }

    #[test]
    fn test_missing_constructor_is_configuration_error() {
        let registry = ExtractorRegistry::new();
        let err = registry
            .resolve(ty::entity::<NoConstructor>().desc())
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_failed_construction_is_extraction_error() {
        let err = extract(ty::entity::<Refuses>(), raw(&["id"], &[&[Some("1")]])).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Extraction);
    }

    #[test]
    fn test_descriptor_is_cached() {
        let registry = ExtractorRegistry::new();
        let entity = EntityType::of::<User>();
        let first = registry.entity_descriptor(&entity).unwrap();
        let second = registry.entity_descriptor(&entity).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.columns().len(), 2);
        assert_eq!(first.column("name").unwrap().ty(), ty::of::<String>().desc());
    }

    #[test]
    fn test_duplicate_column_keeps_first() {
        struct Twice {
            a: i64,
        }
        impl Entity for Twice {
            const NAME: &'static str = "Twice";
            fn describe(columns: &mut EntityColumns<Self>) {
                columns
                    .constructor(|| Twice { a: 0 })
                    .column("a", |t: &mut Twice, v: i64| t.a = v)
                    .column("a", |t: &mut Twice, v: i64| t.a = v * 10);
            }
        }
        let twice = extract(ty::entity::<Twice>(), raw(&["a"], &[&[Some("4")]])).unwrap();
        assert_eq!(twice.a, 4);
    }

    #[derive(Debug, Default)]
    struct Node {
        id: i64,
        parent: Option<Box<Node>>,
    }

    impl Entity for Node {
        const NAME: &'static str = "Node";

        fn describe(columns: &mut EntityColumns<Self>) {
            columns
                .constructor(Node::default)
                .column("id", |n: &mut Node, v: i64| n.id = v)
                .column_with("parent", ty::entity::<Node>(), |n: &mut Node, v: Node| {
                    n.parent = Some(Box::new(v))
                });
        }
    }

    #[derive(Debug, Default)]
    struct Order {
        id: i64,
        customer: Option<Customer>,
    }

    #[derive(Debug, Default)]
    struct Customer {
        name: String,
        last_order: Option<Box<Order>>,
    }

    impl Entity for Order {
        const NAME: &'static str = "Order";

        fn describe(columns: &mut EntityColumns<Self>) {
            columns
                .constructor(Order::default)
                .column("id", |o: &mut Order, v: i64| o.id = v)
                .column_with("customer", ty::entity::<Customer>(), |o: &mut Order, v: Customer| {
                    o.customer = Some(v)
                });
        }
    }

    impl Entity for Customer {
        const NAME: &'static str = "Customer";

        fn describe(columns: &mut EntityColumns<Self>) {
            columns
                .constructor(Customer::default)
                .column("name", |c: &mut Customer, v: String| c.name = v)
                .column_with("last_order", ty::entity::<Order>(), |c: &mut Customer, v: Order| {
                    c.last_order = Some(Box::new(v))
                });
        }
    }

    #[test]
    fn test_self_referential_entity() {
        let registry = ExtractorRegistry::new();
        assert!(registry.resolve(ty::entity::<Node>().desc()).unwrap().is_some());

        let node = extract(
            ty::entity::<Node>(),
            raw(&["id", "parent"], &[&[Some("5"), Some("1")]]),
        )
        .unwrap();
        assert_eq!(node.id, 5);
        assert!(node.parent.is_none());
    }

    #[test]
    fn test_mutually_referencing_entities() {
        let order = extract(
            ty::entity::<Order>(),
            raw(
                &["id", "customer", "last_order", "name"],
                &[&[Some("9"), Some("x"), Some("9"), Some("Ada")]],
            ),
        )
        .unwrap();
        assert_eq!(order.id, 9);
        let customer = order.customer.unwrap();
        assert_eq!(customer.name, "Ada");
        assert!(customer.last_order.is_none());
    }

    #[test]
    fn test_list_field_reads_only_its_row() {
        #[derive(Debug, Default)]
        struct Tagged {
            tags: Vec<String>,
        }
        impl Entity for Tagged {
            const NAME: &'static str = "Tagged";
            fn describe(columns: &mut EntityColumns<Self>) {
                columns
                    .constructor(Tagged::default)
                    .column("tags", |t: &mut Tagged, v: Vec<String>| t.tags = v);
            }
        }

        let tagged = extract(
            ty::list(ty::entity::<Tagged>()),
            raw(&["tags"], &[&[Some("red")], &[Some("blue")]]),
        )
        .unwrap();
        assert_eq!(tagged.len(), 2);
        assert_eq!(tagged[0].tags, vec!["red".to_string()]);
        assert_eq!(tagged[1].tags, vec!["blue".to_string()]);
    }
}
