//! daobind - Declarative data-access objects bound to pluggable SQL backends
//!
//! An interface is declared once as a table of methods, each with a statement
//! template, its parameters and a return type. A [`Dispatcher`] binds every
//! method lazily on first call, materializes the statement from the call's
//! arguments, runs it on a backend [`Service`] and converts the rows into the
//! declared Rust type.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use daobind::drivers::{InMemoryTestResponseBuilder, InMemoryTestService};
//! use daobind::{args, DaoClient, DaoInterface, MethodDescriptor, ParamSpec, ty};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let api = DaoInterface::builder("UserStorage", "memory")
//!     .method(
//!         MethodDescriptor::select("count", "select count(*) from {table}")
//!             .param(ParamSpec::scalar("table"))
//!             .returns(ty::of::<i64>()),
//!     )
//!     .build()?;
//!
//! let service = Arc::new(InMemoryTestService::new().with_response(
//!     InMemoryTestResponseBuilder::new().columns(&["count"]).row(&["3"]).build(),
//! ));
//! let users = DaoClient::new().create_with_service(api, service.clone())?;
//!
//! let count: i64 = users.call("count", args!["users"]).await?;
//! assert_eq!(count, 3);
//! service.assert_last_statement(daobind::Verb::Select, "select count(*) from 'users'");
//! # Ok::<(), daobind::DaoError>(())
//! # }).unwrap();
//! ```

pub mod binding;
pub mod config;
pub mod dispatcher;
pub mod drivers;
pub mod error;
pub mod extract;
pub mod traits;
pub mod types;

mod client;

// Re-export main types for convenient access
pub use binding::{Binding, MethodDescriptor, ParamKind, ParamSpec, TemplateEnvironment, TemplateSource, Verb};
pub use client::DaoClient;
pub use config::{Principal, SourceConfig};
pub use dispatcher::{DaoInterface, Dispatcher};
pub use error::{DaoError, ErrorKind, Result};
pub use extract::{Entity, EntityColumns, Extractor, ExtractorRegistry, FnRegistration, Registration};
pub use traits::{DriverFactory, Service, Source, Validator};
pub use types::{downcast, ty, Arg, RawQueryResult, ResultCursor, SqlType, SqlValue, Ty, TypeDesc};
