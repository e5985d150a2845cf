use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::SourceConfig;
use crate::error::Result;
use crate::extract::Extraction;
use crate::types::{Extracted, RawQueryResult};

/// A statement prepared by a [`Source`].
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedStatement {
    pub sql: String,
    /// Result column names, when the backend reports them at prepare time.
    pub columns: Vec<String>,
}

/// A database connection handle.
/// Sources connect lazily: the first operation that needs the connection opens it.
#[async_trait]
pub trait Source: Send + Sync {
    /// The configuration this source was opened from, if any.
    fn config(&self) -> Option<&SourceConfig>;

    /// Returns true once the underlying connection was established.
    fn is_connected(&self) -> bool;

    /// Establishes the connection if it isn't open yet.
    async fn connect(&self) -> Result<()>;

    /// Prepares a statement on the (possibly newly opened) connection.
    async fn prepare(&self, sql: &str) -> Result<PreparedStatement>;

    /// Lets a factory recognise sources it opened itself.
    fn as_any(&self) -> &dyn Any;
}

/// Executes materialized statements, one operation per verb.
#[async_trait]
pub trait Service: Send + Sync {
    fn source(&self) -> Arc<dyn Source>;

    /// Runs a query and converts its result with the given extraction.
    async fn select(&self, sql: &str, extraction: &Extraction) -> Result<Extracted>;

    async fn insert(&self, sql: &str) -> Result<bool>;

    async fn update(&self, sql: &str) -> Result<bool>;

    async fn delete(&self, sql: &str) -> Result<bool> {
        self.update(sql).await
    }

    async fn create(&self, sql: &str) -> Result<bool>;

    async fn drop(&self, sql: &str) -> Result<bool>;

    /// Executes any statement and hands back whatever rows it produced.
    async fn raw(&self, sql: &str) -> Result<RawQueryResult>;
}

/// Trait for database driver implementations.
/// Factories are registered by driver type in a
/// [`DriverRegistry`](crate::drivers::DriverRegistry) and are responsible for:
/// - Opening a [`Source`] from a [`SourceConfig`]
/// - Wrapping a source into a [`Service`]
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// The name interfaces use to select this driver, matched case-insensitively.
    fn driver_type(&self) -> &str;

    fn major_version(&self) -> u32;

    fn minor_version(&self) -> u32;

    async fn source(&self, config: &SourceConfig) -> Result<Arc<dyn Source>>;

    fn service(&self, source: Arc<dyn Source>) -> Result<Arc<dyn Service>>;
}
