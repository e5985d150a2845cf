use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};
use tracing::{debug, error};

use crate::config::{Principal, SourceConfig};
use crate::error::{DaoError, Result};
use crate::extract::Extraction;
use crate::traits::{DriverFactory, PreparedStatement, Service, Source};
use crate::types::{Extracted, RawQueryResult};

/// Driver type of the PostgreSQL backend.
pub const POSTGRES_DRIVER: &str = "postgres";

/// PostgreSQL driver factory using tokio-postgres.
///
/// The source target is a libpq style connection string or URL. The
/// `application_name` and `connect_timeout` (seconds) properties are applied
/// on top of it.
#[derive(Debug, Default)]
pub struct TokioPostgresDriver;

impl TokioPostgresDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DriverFactory for TokioPostgresDriver {
    fn driver_type(&self) -> &str {
        POSTGRES_DRIVER
    }

    fn major_version(&self) -> u32 {
        0
    }

    fn minor_version(&self) -> u32 {
        7
    }

    async fn source(&self, config: &SourceConfig) -> Result<Arc<dyn Source>> {
        Ok(Arc::new(TokioPostgresSource::new(config.clone())?))
    }

    fn service(&self, source: Arc<dyn Source>) -> Result<Arc<dyn Service>> {
        if source.as_any().downcast_ref::<TokioPostgresSource>().is_none() {
            return Err(DaoError::Configuration(
                "postgres driver can only serve postgres sources".to_string(),
            ));
        }
        Ok(Arc::new(TokioPostgresService { source }))
    }
}

/// A lazily connected PostgreSQL client.
///
/// Credentials are applied when connecting and destroyed once the
/// connection is up.
pub struct TokioPostgresSource {
    config: SourceConfig,
    pg_config: Config,
    principal: Mutex<Option<Principal>>,
    client: OnceCell<Client>,
}

impl TokioPostgresSource {
    pub fn new(mut config: SourceConfig) -> Result<Self> {
        let mut pg_config: Config = config.target.parse().map_err(|e| {
            DaoError::Configuration(format!("invalid postgres target '{}': {}", config.target, e))
        })?;
        if let Some(name) = config.property("application_name") {
            pg_config.application_name(name);
        }
        if let Some(timeout) = config.property("connect_timeout") {
            let seconds: u64 = timeout.parse().map_err(|_| {
                DaoError::Configuration(format!("invalid connect_timeout '{}'", timeout))
            })?;
            pg_config.connect_timeout(Duration::from_secs(seconds));
        }
        let principal = config.principal.take();
        Ok(Self {
            config,
            pg_config,
            principal: Mutex::new(principal),
            client: OnceCell::new(),
        })
    }

    /// The connected client, connecting first if needed.
    pub async fn client(&self) -> Result<&Client> {
        self.client.get_or_try_init(|| self.open()).await
    }

    async fn open(&self) -> Result<Client> {
        let mut pg_config = self.pg_config.clone();
        let principal = self.principal.lock().clone();
        if let Some(principal) = &principal {
            pg_config.user(principal.name());
            pg_config.password(principal.password());
        }

        let (client, connection) = pg_config
            .connect(NoTls)
            .await
            .map_err(|e| DaoError::ConnectionFailed(e.to_string()))?;

        // Spawn the connection handler
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });

        if let Some(mut used) = principal {
            used.destroy();
        }
        if let Some(mut stored) = self.principal.lock().take() {
            stored.destroy();
        }
        debug!(source = %self.config.qualified_name(), "connected");
        Ok(client)
    }
}

#[async_trait]
impl Source for TokioPostgresSource {
    fn config(&self) -> Option<&SourceConfig> {
        Some(&self.config)
    }

    fn is_connected(&self) -> bool {
        self.client.get().is_some_and(|c| !c.is_closed())
    }

    async fn connect(&self) -> Result<()> {
        self.client().await.map(|_| ())
    }

    async fn prepare(&self, sql: &str) -> Result<PreparedStatement> {
        let statement = self
            .client()
            .await?
            .prepare(sql)
            .await
            .map_err(|e| DaoError::QueryFailed(e.to_string()))?;
        Ok(PreparedStatement {
            sql: sql.to_string(),
            columns: statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Runs statements over the simple query protocol, so every cell arrives as
/// text and statements need no bound parameters.
pub struct TokioPostgresService {
    source: Arc<dyn Source>,
}

impl TokioPostgresService {
    fn postgres(&self) -> Result<&TokioPostgresSource> {
        self.source
            .as_any()
            .downcast_ref::<TokioPostgresSource>()
            .ok_or_else(|| DaoError::Configuration("source is not a postgres source".to_string()))
    }

    async fn client(&self) -> Result<&Client> {
        self.postgres()?.client().await
    }

    async fn query(&self, sql: &str) -> Result<RawQueryResult> {
        let messages = self
            .client()
            .await?
            .simple_query(sql)
            .await
            .map_err(|e| DaoError::QueryFailed(e.to_string()))?;
        Ok(to_raw_result(messages))
    }

    async fn execute(&self, sql: &str) -> Result<bool> {
        let affected = self
            .client()
            .await?
            .execute(sql, &[])
            .await
            .map_err(|e| DaoError::QueryFailed(e.to_string()))?;
        Ok(affected > 0)
    }

    async fn batch(&self, sql: &str) -> Result<bool> {
        self.client()
            .await?
            .batch_execute(sql)
            .await
            .map_err(|e| DaoError::QueryFailed(e.to_string()))?;
        Ok(true)
    }
}

#[async_trait]
impl Service for TokioPostgresService {
    fn source(&self) -> Arc<dyn Source> {
        Arc::clone(&self.source)
    }

    async fn select(&self, sql: &str, extraction: &Extraction) -> Result<Extracted> {
        let result = self.query(sql).await?;
        extraction.apply(result, Some(self.source()))
    }

    async fn insert(&self, sql: &str) -> Result<bool> {
        self.execute(sql).await
    }

    async fn update(&self, sql: &str) -> Result<bool> {
        self.execute(sql).await
    }

    async fn delete(&self, sql: &str) -> Result<bool> {
        self.execute(sql).await
    }

    async fn create(&self, sql: &str) -> Result<bool> {
        self.batch(sql).await
    }

    async fn drop(&self, sql: &str) -> Result<bool> {
        self.batch(sql).await
    }

    async fn raw(&self, sql: &str) -> Result<RawQueryResult> {
        self.query(sql).await
    }
}

/// Collects the rows of a simple query.
fn to_raw_result(messages: Vec<SimpleQueryMessage>) -> RawQueryResult {
    let mut collector = RowCollector::default();
    for message in messages {
        match message {
            SimpleQueryMessage::RowDescription(columns) => {
                collector.describe(columns.iter().map(|c| c.name().to_string()).collect());
            }
            SimpleQueryMessage::Row(row) => {
                if !collector.is_described() {
                    collector.describe(row.columns().iter().map(|c| c.name().to_string()).collect());
                }
                collector.push((0..row.len()).map(|i| row.get(i).map(str::to_string)).collect());
            }
            _ => {}
        }
    }
    collector.finish()
}

/// Accumulates a result. The first description wins, so a multi-statement
/// query reports the columns of its first result set.
#[derive(Default)]
struct RowCollector {
    columns: Option<Vec<String>>,
    rows: Vec<Vec<Option<String>>>,
}

impl RowCollector {
    fn is_described(&self) -> bool {
        self.columns.is_some()
    }

    fn describe(&mut self, columns: Vec<String>) {
        self.columns.get_or_insert(columns);
    }

    fn push(&mut self, row: Vec<Option<String>>) {
        self.rows.push(row);
    }

    fn finish(self) -> RawQueryResult {
        RawQueryResult::new(self.columns.unwrap_or_default(), self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_takes_principal_out_of_config() {
        let config = SourceConfig::new(POSTGRES_DRIVER, "host=localhost dbname=app")
            .with_property("application_name", "daobind-tests")
            .with_principal(Principal::new("admin", "secret"));
        let source = TokioPostgresSource::new(config).unwrap();

        assert!(source.config().unwrap().principal.is_none());
        assert_eq!(source.pg_config.get_dbname(), Some("app"));
        assert_eq!(source.pg_config.get_application_name(), Some("daobind-tests"));
        assert!(!source.is_connected());
    }

    #[test]
    fn test_invalid_target_is_configuration_error() {
        let config = SourceConfig::new(POSTGRES_DRIVER, "host=localhost port=notaport");
        assert!(matches!(
            TokioPostgresSource::new(config),
            Err(DaoError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_timeout() {
        let config = SourceConfig::new(POSTGRES_DRIVER, "host=localhost")
            .with_property("connect_timeout", "soon");
        assert!(TokioPostgresSource::new(config).is_err());
    }

    #[tokio::test]
    async fn test_factory_rejects_foreign_source() {
        let foreign: Arc<dyn Source> = Arc::new(crate::drivers::InMemoryTestSource::new(None));
        assert!(TokioPostgresDriver::new().service(foreign).is_err());
    }

    #[test]
    fn test_empty_result_keeps_described_columns() {
        let mut collector = RowCollector::default();
        collector.describe(vec!["id".to_string(), "name".to_string()]);
        let result = collector.finish();
        assert!(result.is_empty());
        assert_eq!(result.columns, vec!["id", "name"]);
    }

    #[test]
    fn test_first_description_wins() {
        let mut collector = RowCollector::default();
        collector.describe(vec!["id".to_string()]);
        collector.push(vec![Some("1".to_string())]);
        collector.describe(vec!["other".to_string()]);
        collector.push(vec![None]);
        let result = collector.finish();
        assert_eq!(result.columns, vec!["id"]);
        assert_eq!(result.rows, vec![vec![Some("1".to_string())], vec![None]]);
    }
}
