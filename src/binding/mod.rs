//! Statement templates bound to backend verbs.
//!
//! A [`MethodDescriptor`] declares one interface method. The
//! [`BindingBuilder`] turns it into an immutable [`Binding`] which
//! materializes statements from call arguments and executes them.

mod builder;
mod environment;
mod template;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::error::{DaoError, Result};
use crate::extract::Extraction;
use crate::traits::{Service, Validator};
use crate::types::{Arg, Extracted, SqlValue, Ty, TypeDesc};

pub use builder::BindingBuilder;
pub use environment::TemplateEnvironment;
pub use template::Template;

/// Template value that defers to the [`TemplateEnvironment`]; the key is
/// given with [`MethodDescriptor::property`].
pub const ENV: &str = "$sql:env";

/// Parameter tag forcing array expansion.
pub const ARRAY: &str = "$sql:type.array";

/// Parameter tag forcing map expansion.
pub const MAP: &str = "$sql:type.map";

/// The backend operation a method performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Raw,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verb::Select => "select",
            Verb::Insert => "insert",
            Verb::Update => "update",
            Verb::Delete => "delete",
            Verb::Create => "create",
            Verb::Drop => "drop",
            Verb::Raw => "raw",
        };
        f.write_str(name)
    }
}

/// How an argument is substituted into the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Replaces `{name}` with one literal.
    Scalar,
    /// Replaces `{name}` with a comma separated list of literals.
    Array,
    /// Every key fills the placeholder of the same name.
    Map,
    /// Declared for completeness; binding an entity fails at call time.
    Entity,
}

impl ParamKind {
    pub fn name(&self) -> &'static str {
        match self {
            ParamKind::Scalar => "scalar",
            ParamKind::Array => "array",
            ParamKind::Map => "map",
            ParamKind::Entity => "entity",
        }
    }
}

/// Rust argument types with an inferable [`ParamKind`].
pub trait ParamType {
    const KIND: ParamKind;
}

macro_rules! param_type {
    ($kind:ident => $($t:ty),* $(,)?) => {
        $(
            impl ParamType for $t {
                const KIND: ParamKind = ParamKind::$kind;
            }
        )*
    };
}

param_type!(Scalar => SqlValue, &str, String, char, i32, i64, f64, bool);

impl<T: ParamType> ParamType for Option<T> {
    const KIND: ParamKind = T::KIND;
}

impl<T> ParamType for Vec<T> {
    const KIND: ParamKind = ParamKind::Array;
}

impl<T> ParamType for &[T] {
    const KIND: ParamKind = ParamKind::Array;
}

impl<V> ParamType for HashMap<String, V> {
    const KIND: ParamKind = ParamKind::Map;
}

impl<V> ParamType for BTreeMap<String, V> {
    const KIND: ParamKind = ParamKind::Map;
}

/// A declared method parameter. The position in the descriptor's parameter
/// list is the position of the matching call argument.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    name: String,
    kind: ParamKind,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Scalar)
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Array)
    }

    pub fn map(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Map)
    }

    pub fn entity(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Entity)
    }

    /// Derives the kind from the argument's Rust type.
    ///
    /// ```
    /// use daobind::binding::{ParamKind, ParamSpec};
    ///
    /// assert_eq!(ParamSpec::infer::<Vec<i64>>("ids").kind(), ParamKind::Array);
    /// assert_eq!(ParamSpec::infer::<String>("name").kind(), ParamKind::Scalar);
    /// ```
    pub fn infer<T: ParamType>(name: impl Into<String>) -> Self {
        Self::new(name, T::KIND)
    }

    /// Reads a parameter tag: [`ARRAY`] and [`MAP`] select the expansion and
    /// name the parameter `fallback_name`, anything else is a scalar placeholder name.
    pub fn from_tag(tag: &str, fallback_name: impl Into<String>) -> Self {
        match tag {
            ARRAY => Self::array(fallback_name),
            MAP => Self::map(fallback_name),
            name => Self::scalar(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }
}

/// Where a method's statement template comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSource {
    Literal(String),
    /// Key into the [`TemplateEnvironment`].
    Environment(String),
}

/// Declaration of one interface method.
///
/// ```
/// use daobind::binding::{MethodDescriptor, ParamSpec};
/// use daobind::ty;
///
/// let find = MethodDescriptor::select("find_name", "select name from users where id = {id}")
///     .param(ParamSpec::scalar("id"))
///     .returns(ty::of::<String>());
/// assert_eq!(find.name(), "find_name");
/// ```
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    name: String,
    verb: Verb,
    template: TemplateSource,
    property: Option<String>,
    params: Vec<ParamSpec>,
    returns: Option<TypeDesc>,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>, verb: Verb, template: TemplateSource) -> Self {
        Self {
            name: name.into(),
            verb,
            template,
            property: None,
            params: Vec::new(),
            returns: None,
        }
    }

    pub fn select(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self::new(name, Verb::Select, TemplateSource::Literal(template.into()))
    }

    pub fn insert(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self::new(name, Verb::Insert, TemplateSource::Literal(template.into()))
    }

    pub fn update(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self::new(name, Verb::Update, TemplateSource::Literal(template.into()))
    }

    pub fn delete(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self::new(name, Verb::Delete, TemplateSource::Literal(template.into()))
    }

    pub fn create(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self::new(name, Verb::Create, TemplateSource::Literal(template.into()))
    }

    pub fn drop(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self::new(name, Verb::Drop, TemplateSource::Literal(template.into()))
    }

    pub fn raw(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self::new(name, Verb::Raw, TemplateSource::Literal(template.into()))
    }

    /// Environment key used when the template is [`ENV`].
    pub fn property(mut self, key: impl Into<String>) -> Self {
        self.property = Some(key.into());
        self
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn returns<T>(mut self, ty: Ty<T>) -> Self {
        self.returns = Some(ty.into_desc());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn template(&self) -> &TemplateSource {
        &self.template
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn return_type(&self) -> Option<&TypeDesc> {
        self.returns.as_ref()
    }
}

/// The built invocation plan of one method. Immutable and shareable.
pub struct Binding {
    api: Arc<str>,
    method: String,
    verb: Verb,
    template: Template,
    params: Vec<ParamSpec>,
    validator: Option<Arc<dyn Validator>>,
    extraction: Option<Extraction>,
    service: Arc<dyn Service>,
}

impl Binding {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn api(&self) -> &str {
        &self.api
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Produces the concrete statement for `args`.
    ///
    /// Arguments are matched to parameters by position. A placeholder keeps
    /// the first value assigned to it, so a scalar declared before a map wins
    /// over a map key of the same name.
    pub fn materialize(&self, args: &[Arg]) -> Result<String> {
        if args.len() != self.params.len() {
            return Err(DaoError::Arity {
                method: self.method.clone(),
                expected: self.params.len(),
                actual: args.len(),
            });
        }

        let mut values: HashMap<&str, String> = HashMap::new();
        for (param, arg) in self.params.iter().zip(args) {
            match (param.kind, arg) {
                (ParamKind::Entity, _) => {
                    return Err(DaoError::UnsupportedParamKind {
                        method: self.method.clone(),
                        param: param.name.clone(),
                        kind: ParamKind::Entity.name(),
                    })
                }
                (ParamKind::Scalar, Arg::Scalar(value)) => {
                    let name = self.require_placeholder(param)?;
                    values.entry(name).or_insert_with(|| value.to_literal());
                }
                (ParamKind::Array, Arg::Array(items)) => {
                    let name = self.require_placeholder(param)?;
                    values.entry(name).or_insert_with(|| join_literals(items));
                }
                (ParamKind::Map, Arg::Map(entries)) => {
                    for placeholder in self.template.placeholders() {
                        if let Some(value) = entries.get(placeholder) {
                            values
                                .entry(placeholder)
                                .or_insert_with(|| value.to_literal());
                        }
                    }
                }
                (kind, arg) => {
                    return Err(DaoError::ArgumentKind {
                        method: self.method.clone(),
                        param: param.name.clone(),
                        expected: kind.name(),
                        actual: arg.kind_name(),
                    })
                }
            }
        }

        self.template
            .render(&values)
            .map_err(|placeholder| DaoError::UnresolvedPlaceholder {
                method: self.method.clone(),
                placeholder: placeholder.to_string(),
            })
    }

    /// Materializes, validates and runs the statement.
    ///
    /// Select returns the extracted value, raw the [`RawQueryResult`](crate::types::RawQueryResult)
    /// and every other verb the backend's `bool` success flag.
    pub async fn execute(&self, args: &[Arg]) -> Result<Extracted> {
        let sql = self.materialize(args)?;
        trace!(api = %self.api, method = %self.method, verb = %self.verb, sql = %sql, "materialized statement");

        if let Some(validator) = &self.validator {
            if !validator.verify(&sql) {
                warn!(api = %self.api, method = %self.method, "validator rejected statement");
                return Err(DaoError::ValidationRejected {
                    method: self.method.clone(),
                    statement: sql,
                });
            }
        }

        let service = &self.service;
        let value: Extracted = match self.verb {
            Verb::Select => {
                let extraction = self.extraction.as_ref().ok_or_else(|| {
                    DaoError::Configuration(format!("select method '{}' has no extractor", self.method))
                })?;
                return service.select(&sql, extraction).await;
            }
            Verb::Insert => Box::new(service.insert(&sql).await?),
            Verb::Update => Box::new(service.update(&sql).await?),
            Verb::Delete => Box::new(service.delete(&sql).await?),
            Verb::Create => Box::new(service.create(&sql).await?),
            Verb::Drop => Box::new(Service::drop(service.as_ref(), &sql).await?),
            Verb::Raw => Box::new(service.raw(&sql).await?),
        };
        Ok(value)
    }

    fn require_placeholder<'a>(&self, param: &'a ParamSpec) -> Result<&'a str> {
        if self.template.contains(&param.name) {
            Ok(&param.name)
        } else {
            Err(DaoError::MissingPlaceholder {
                method: self.method.clone(),
                placeholder: param.name.clone(),
            })
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("api", &self.api)
            .field("method", &self.method)
            .field("verb", &self.verb)
            .field("template", &self.template.source())
            .field("params", &self.params)
            .field("validated", &self.validator.is_some())
            .finish()
    }
}

/// Empty arrays render `NULL` so `in ({ids})` stays valid.
fn join_literals(items: &[SqlValue]) -> String {
    if items.is_empty() {
        return SqlValue::Null.to_literal();
    }
    items
        .iter()
        .map(SqlValue::to_literal)
        .collect::<Vec<_>>()
        .join(", ")
}
