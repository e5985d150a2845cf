mod registry;
mod tokio_postgres;

pub use self::in_memory_test::{
    InMemoryTestDriver, InMemoryTestResponseBuilder, InMemoryTestService, InMemoryTestSource,
    RecordedStatement, MEMORY_DRIVER,
};
pub use self::registry::DriverRegistry;
pub use self::tokio_postgres::{
    TokioPostgresDriver, TokioPostgresService, TokioPostgresSource, POSTGRES_DRIVER,
};
