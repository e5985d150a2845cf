mod driver;
mod validator;

pub use driver::{DriverFactory, PreparedStatement, Service, Source};
pub use validator::Validator;
