use std::sync::Arc;

use tracing::debug;

use crate::binding::TemplateEnvironment;
use crate::config::SourceConfig;
use crate::dispatcher::{DaoInterface, Dispatcher};
use crate::drivers::DriverRegistry;
use crate::error::{DaoError, Result};
use crate::extract::ExtractorRegistry;
use crate::traits::{Service, Source};

/// Main entry point for daobind.
/// Turns interface declarations into dispatchers running on a driver.
///
/// # Example
/// ```ignore
/// let client = DaoClient::new();
/// let config = SourceConfig::new("postgres", "host=localhost dbname=app");
/// let users = client.create(user_storage(), &config).await?;
///
/// let count: i64 = users.call("count", args!["users"]).await?;
/// ```
pub struct DaoClient {
    drivers: Arc<DriverRegistry>,
    registry: Arc<ExtractorRegistry>,
    environment: Arc<TemplateEnvironment>,
}

impl DaoClient {
    /// A client on the global driver registry and template environment, with a
    /// fresh extractor registry shared by every dispatcher it creates.
    pub fn new() -> Self {
        Self {
            drivers: DriverRegistry::global(),
            registry: Arc::new(ExtractorRegistry::new()),
            environment: TemplateEnvironment::global(),
        }
    }

    pub fn with_drivers(mut self, drivers: Arc<DriverRegistry>) -> Self {
        self.drivers = drivers;
        self
    }

    pub fn with_registry(mut self, registry: Arc<ExtractorRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_environment(mut self, environment: Arc<TemplateEnvironment>) -> Self {
        self.environment = environment;
        self
    }

    pub fn drivers(&self) -> &Arc<DriverRegistry> {
        &self.drivers
    }

    /// The extractor registry; user registrations added here apply to every
    /// binding built afterwards.
    pub fn registry(&self) -> &Arc<ExtractorRegistry> {
        &self.registry
    }

    pub fn environment(&self) -> &Arc<TemplateEnvironment> {
        &self.environment
    }

    /// Opens a source from `config` with the interface's driver and binds
    /// the interface to it.
    pub async fn create(
        &self,
        api: impl Into<Arc<DaoInterface>>,
        config: &SourceConfig,
    ) -> Result<Dispatcher> {
        let api = api.into();
        check_driver(&api, &config.driver_type)?;
        let factory = self.drivers.get(api.driver_type())?;
        let source = factory.source(config).await?;
        let service = factory.service(source)?;
        debug!(api = api.name(), source = %config.qualified_name(), "created dispatcher");
        self.create_with_service(api, service)
    }

    /// Binds the interface to an already opened source.
    pub fn create_with_source(
        &self,
        api: impl Into<Arc<DaoInterface>>,
        source: Arc<dyn Source>,
    ) -> Result<Dispatcher> {
        let api = api.into();
        if let Some(config) = source.config() {
            check_driver(&api, &config.driver_type)?;
        }
        let factory = self.drivers.get(api.driver_type())?;
        let service = factory.service(source)?;
        self.create_with_service(api, service)
    }

    /// Binds the interface directly to a service, bypassing driver lookup.
    pub fn create_with_service(
        &self,
        api: impl Into<Arc<DaoInterface>>,
        service: Arc<dyn Service>,
    ) -> Result<Dispatcher> {
        Dispatcher::with_context(
            api.into(),
            service,
            Arc::clone(&self.registry),
            Arc::clone(&self.environment),
        )
    }
}

impl Default for DaoClient {
    fn default() -> Self {
        Self::new()
    }
}

fn check_driver(api: &DaoInterface, driver_type: &str) -> Result<()> {
    if api.driver_type().eq_ignore_ascii_case(driver_type) {
        Ok(())
    } else {
        Err(DaoError::Configuration(format!(
            "{} runs on driver '{}', but the source is configured for '{}'",
            api.name(),
            api.driver_type(),
            driver_type
        )))
    }
}
