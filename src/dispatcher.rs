use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::binding::{Binding, BindingBuilder, MethodDescriptor, TemplateEnvironment};
use crate::error::{DaoError, Result};
use crate::extract::ExtractorRegistry;
use crate::traits::{Service, Validator};
use crate::types::{downcast, Arg, Extracted};

/// Method names answered by every dispatcher without a binding.
pub const RESERVED_METHODS: [&str; 2] = ["to_string", "type_name"];

type ValidatorFactory = Arc<dyn Fn() -> Result<Arc<dyn Validator>> + Send + Sync>;

/// A declared data-access interface: a name, the driver type it runs on,
/// its methods and an optional validator shared by all of them.
///
/// ```
/// use daobind::{DaoInterface, MethodDescriptor, ParamSpec, ty};
///
/// let api = DaoInterface::builder("UserStorage", "memory")
///     .method(
///         MethodDescriptor::select("count", "select count(*) from {table}")
///             .param(ParamSpec::scalar("table"))
///             .returns(ty::of::<i64>()),
///     )
///     .build()
///     .unwrap();
/// assert!(api.method("count").is_some());
/// ```
pub struct DaoInterface {
    name: Arc<str>,
    driver_type: String,
    methods: Vec<MethodDescriptor>,
    validator: Option<ValidatorFactory>,
}

impl DaoInterface {
    pub fn builder(name: impl Into<String>, driver_type: impl Into<String>) -> DaoInterfaceBuilder {
        DaoInterfaceBuilder {
            name: name.into(),
            driver_type: driver_type.into(),
            methods: Vec::new(),
            validator: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver_type(&self) -> &str {
        &self.driver_type
    }

    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name() == name)
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    pub fn has_validator(&self) -> bool {
        self.validator.is_some()
    }

    /// Constructs a fresh validator instance, if one is declared.
    pub fn create_validator(&self) -> Result<Option<Arc<dyn Validator>>> {
        let Some(factory) = &self.validator else {
            return Ok(None);
        };
        factory().map(Some).map_err(|e| {
            DaoError::Configuration(format!(
                "{}: could not construct validator: {}",
                self.name, e
            ))
        })
    }
}

impl fmt::Debug for DaoInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaoInterface")
            .field("name", &self.name)
            .field("driver_type", &self.driver_type)
            .field(
                "methods",
                &self.methods.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

pub struct DaoInterfaceBuilder {
    name: String,
    driver_type: String,
    methods: Vec<MethodDescriptor>,
    validator: Option<ValidatorFactory>,
}

impl DaoInterfaceBuilder {
    /// Declares a validator built with `V::default()`.
    pub fn validator<V: Validator + Default + 'static>(mut self) -> Self {
        self.validator = Some(Arc::new(|| Ok(Arc::new(V::default()) as Arc<dyn Validator>)));
        self
    }

    /// Declares a validator built by a fallible constructor.
    pub fn validator_factory(mut self, factory: fn() -> Result<Arc<dyn Validator>>) -> Self {
        self.validator = Some(Arc::new(factory));
        self
    }

    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    pub fn build(self) -> Result<DaoInterface> {
        if self.name.is_empty() {
            return Err(DaoError::Configuration("interface name is empty".to_string()));
        }
        for (i, method) in self.methods.iter().enumerate() {
            if RESERVED_METHODS.contains(&method.name()) {
                return Err(DaoError::Configuration(format!(
                    "{}: method name '{}' is reserved",
                    self.name,
                    method.name()
                )));
            }
            if self.methods[..i].iter().any(|m| m.name() == method.name()) {
                return Err(DaoError::Configuration(format!(
                    "{}: method '{}' declared twice",
                    self.name,
                    method.name()
                )));
            }
        }
        Ok(DaoInterface {
            name: self.name.into(),
            driver_type: self.driver_type,
            methods: self.methods,
            validator: self.validator,
        })
    }
}

/// Routes method calls of one interface to their bindings.
///
/// A binding is built on the first call of its method and cached for the
/// lifetime of the dispatcher. Two tasks missing the cache at once may both
/// build; the first stored binding is the one every caller uses afterwards.
pub struct Dispatcher {
    interface: Arc<DaoInterface>,
    service: Arc<dyn Service>,
    registry: Arc<ExtractorRegistry>,
    environment: Arc<TemplateEnvironment>,
    validator: Option<Arc<dyn Validator>>,
    bindings: RwLock<HashMap<String, Arc<Binding>>>,
}

impl Dispatcher {
    /// A dispatcher with a fresh extractor registry and the global template environment.
    pub fn new(interface: Arc<DaoInterface>, service: Arc<dyn Service>) -> Result<Self> {
        Self::with_context(
            interface,
            service,
            Arc::new(ExtractorRegistry::new()),
            TemplateEnvironment::global(),
        )
    }

    /// Constructs the interface's validator once; every binding shares it.
    pub fn with_context(
        interface: Arc<DaoInterface>,
        service: Arc<dyn Service>,
        registry: Arc<ExtractorRegistry>,
        environment: Arc<TemplateEnvironment>,
    ) -> Result<Self> {
        let validator = interface.create_validator()?;
        Ok(Self {
            interface,
            service,
            registry,
            environment,
            validator,
            bindings: RwLock::new(HashMap::new()),
        })
    }

    pub fn interface(&self) -> &Arc<DaoInterface> {
        &self.interface
    }

    pub fn service(&self) -> &Arc<dyn Service> {
        &self.service
    }

    pub fn registry(&self) -> &Arc<ExtractorRegistry> {
        &self.registry
    }

    /// Number of bindings built so far.
    pub fn cached_bindings(&self) -> usize {
        self.bindings.read().len()
    }

    /// Returns the cached binding of `method`, building it on first use.
    pub fn binding(&self, method: &str) -> Result<Arc<Binding>> {
        if let Some(binding) = self.bindings.read().get(method) {
            return Ok(Arc::clone(binding));
        }

        let descriptor = self
            .interface
            .method(method)
            .ok_or_else(|| DaoError::UnknownMethod(format!("{}::{}", self.interface.name, method)))?;
        let built = Arc::new(self.builder().build(descriptor)?);

        let mut bindings = self.bindings.write();
        let binding = bindings.entry(method.to_string()).or_insert(built);
        Ok(Arc::clone(binding))
    }

    /// Builds every declared binding now, surfacing configuration errors up front.
    pub fn bind_all(&self) -> Result<()> {
        for method in &self.interface.methods {
            self.binding(method.name())?;
        }
        debug!(api = %self.interface.name, count = self.cached_bindings(), "bound all methods");
        Ok(())
    }

    /// Invokes `method` with positional arguments.
    pub async fn invoke(&self, method: &str, args: Vec<Arg>) -> Result<Extracted> {
        if let Some(value) = self.object_method(method, &args)? {
            return Ok(value);
        }
        let binding = self.binding(method)?;
        binding.execute(&args).await
    }

    /// Like [`invoke`](Self::invoke), unboxing the result into `T`.
    pub async fn call<T: 'static>(&self, method: &str, args: Vec<Arg>) -> Result<T> {
        downcast(self.invoke(method, args).await?)
    }

    fn builder(&self) -> BindingBuilder<'_> {
        BindingBuilder::new(
            Arc::clone(&self.interface.name),
            Arc::clone(&self.service),
            &self.registry,
            &self.environment,
        )
        .validator(self.validator.clone())
    }

    fn object_method(&self, method: &str, args: &[Arg]) -> Result<Option<Extracted>> {
        if !RESERVED_METHODS.contains(&method) {
            return Ok(None);
        }
        if !args.is_empty() {
            return Err(DaoError::Arity {
                method: method.to_string(),
                expected: 0,
                actual: args.len(),
            });
        }
        let value = match method {
            "type_name" => self.interface.name.to_string(),
            _ => format!(
                "{}[{}]",
                self.interface.name,
                self.interface.driver_type
            ),
        };
        Ok(Some(Box::new(value)))
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("interface", &self.interface.name)
            .field("bindings", &self.cached_bindings())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::binding::ParamSpec;
    use crate::drivers::InMemoryTestService;
    use crate::error::ErrorKind;
    use crate::types::ty;

    #[derive(Default)]
    struct RejectAll;

    impl Validator for RejectAll {
        fn verify(&self, _sql: &str) -> bool {
            false
        }
    }

    fn interface() -> Arc<DaoInterface> {
        Arc::new(
            DaoInterface::builder("UserStorage", "memory")
                .method(
                    MethodDescriptor::select("count", "select count(*) from {table}")
                        .param(ParamSpec::scalar("table"))
                        .returns(ty::of::<i64>()),
                )
                .method(MethodDescriptor::drop("reset", "drop table users"))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_reserved_and_duplicate_names() {
        let reserved = DaoInterface::builder("Api", "memory")
            .method(MethodDescriptor::raw("to_string", "select 1"))
            .build();
        assert_eq!(reserved.unwrap_err().kind(), ErrorKind::Configuration);

        let twice = DaoInterface::builder("Api", "memory")
            .method(MethodDescriptor::raw("a", "select 1"))
            .method(MethodDescriptor::raw("a", "select 2"))
            .build();
        assert_eq!(twice.unwrap_err().kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_binding_is_cached() {
        let dispatcher =
            Dispatcher::new(interface(), Arc::new(InMemoryTestService::new())).unwrap();
        assert_eq!(dispatcher.cached_bindings(), 0);

        let first = dispatcher.binding("count").unwrap();
        let second = dispatcher.binding("count").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(dispatcher.cached_bindings(), 1);

        dispatcher.bind_all().unwrap();
        assert_eq!(dispatcher.cached_bindings(), 2);
    }

    #[test]
    fn test_unknown_method() {
        let dispatcher =
            Dispatcher::new(interface(), Arc::new(InMemoryTestService::new())).unwrap();
        assert!(matches!(
            dispatcher.binding("missing").unwrap_err(),
            DaoError::UnknownMethod(_)
        ));
    }

    #[test]
    fn test_failing_validator_factory() {
        let api = DaoInterface::builder("Api", "memory")
            .validator_factory(|| Err(DaoError::Configuration("no rules file".into())))
            .build()
            .unwrap();
        let err = Dispatcher::new(Arc::new(api), Arc::new(InMemoryTestService::new())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_object_methods_are_local() {
        let service = Arc::new(InMemoryTestService::new());
        let dispatcher = Dispatcher::new(interface(), service.clone()).unwrap();

        let name: String = dispatcher.call("type_name", args![]).await.unwrap();
        assert_eq!(name, "UserStorage");
        let text: String = dispatcher.call("to_string", args![]).await.unwrap();
        assert_eq!(text, "UserStorage[memory]");

        service.assert_statement_count(0);
        assert_eq!(dispatcher.cached_bindings(), 0);
    }

    #[tokio::test]
    async fn test_validator_rejection_skips_backend() {
        let api = DaoInterface::builder("Api", "memory")
            .validator::<RejectAll>()
            .method(MethodDescriptor::drop("reset", "drop table users"))
            .build()
            .unwrap();
        let service = Arc::new(InMemoryTestService::new());
        let dispatcher = Dispatcher::new(Arc::new(api), service.clone()).unwrap();

        let err = dispatcher.invoke("reset", args![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationRejected);
        service.assert_statement_count(0);
    }

    #[test]
    fn test_concurrent_first_use_shares_one_binding() {
        let dispatcher =
            Dispatcher::new(interface(), Arc::new(InMemoryTestService::new())).unwrap();
        let barrier = std::sync::Barrier::new(8);
        let (barrier, dispatcher) = (&barrier, &dispatcher);

        let bindings: Vec<Arc<Binding>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(move |_| {
                    scope.spawn(move || {
                        barrier.wait();
                        dispatcher.binding("count").unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(bindings.iter().all(|b| Arc::ptr_eq(b, &bindings[0])));
        assert!(Arc::ptr_eq(&bindings[0], &dispatcher.binding("count").unwrap()));
        assert_eq!(dispatcher.cached_bindings(), 1);
    }
}
