use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::RwLock;
use tracing::info;

use crate::drivers::{InMemoryTestDriver, TokioPostgresDriver};
use crate::error::{DaoError, Result};
use crate::traits::DriverFactory;

lazy_static! {
    static ref GLOBAL: Arc<DriverRegistry> = Arc::new(DriverRegistry::with_builtin_drivers());
}

/// Driver factories keyed by their driver type.
#[derive(Default)]
pub struct DriverRegistry {
    factories: RwLock<Vec<Arc<dyn DriverFactory>>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `postgres` and `memory` drivers.
    pub fn with_builtin_drivers() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(TokioPostgresDriver::new()));
        registry.register(Arc::new(InMemoryTestDriver::new()));
        registry
    }

    /// The process-wide registry used by [`DaoClient::new`](crate::DaoClient::new).
    pub fn global() -> Arc<DriverRegistry> {
        Arc::clone(&GLOBAL)
    }

    /// Adds `factory` unless this exact instance is already registered.
    /// Returns true if it was added.
    pub fn register(&self, factory: Arc<dyn DriverFactory>) -> bool {
        let mut factories = self.factories.write();
        if factories.iter().any(|f| Arc::ptr_eq(f, &factory)) {
            return false;
        }
        info!(
            driver_type = factory.driver_type(),
            version = %format!("{}.{}", factory.major_version(), factory.minor_version()),
            "registered driver"
        );
        factories.push(factory);
        true
    }

    /// Removes this exact instance. Returns true if it was registered.
    pub fn deregister(&self, factory: &Arc<dyn DriverFactory>) -> bool {
        let mut factories = self.factories.write();
        let before = factories.len();
        factories.retain(|f| !Arc::ptr_eq(f, factory));
        let removed = factories.len() != before;
        if removed {
            info!(driver_type = factory.driver_type(), "deregistered driver");
        }
        removed
    }

    /// The first factory whose driver type matches, ignoring ASCII case.
    pub fn get(&self, driver_type: &str) -> Result<Arc<dyn DriverFactory>> {
        self.factories
            .read()
            .iter()
            .find(|f| f.driver_type().eq_ignore_ascii_case(driver_type))
            .cloned()
            .ok_or_else(|| DaoError::NoDriver(driver_type.to_string()))
    }

    pub fn factories(&self) -> Vec<Arc<dyn DriverFactory>> {
        self.factories.read().clone()
    }
}
