use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::error::{DaoError, Result};

/// Credentials handed to a backend when it opens a connection.
#[derive(Clone, Deserialize)]
pub struct Principal {
    name: String,
    #[serde(default)]
    password: String,
}

impl Principal {
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Overwrites the password. Backends call this once the credentials were used.
    pub fn destroy(&mut self) {
        // Overwrite in place so the old bytes don't outlive the call.
        let zeroed = "\0".repeat(self.password.len());
        self.password.replace_range(.., &zeroed);
        self.password.clear();
    }

    pub fn is_destroyed(&self) -> bool {
        self.password.is_empty()
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl PartialEq for Principal {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// Configuration a driver factory uses to open a source.
///
/// ```
/// use daobind::SourceConfig;
///
/// let config = SourceConfig::from_json(
///     r#"{ "driver_type": "postgres", "target": "host=localhost dbname=app" }"#,
/// ).unwrap();
/// assert_eq!(config.qualified_name(), "postgres:host=localhost dbname=app");
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceConfig {
    /// Name of the driver this configuration targets, e.g. `postgres`.
    pub driver_type: String,
    /// Driver-specific location: a connection string, a path, a database name.
    pub target: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub principal: Option<Principal>,
}

impl SourceConfig {
    pub fn new(driver_type: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            driver_type: driver_type.into(),
            target: target.into(),
            properties: BTreeMap::new(),
            principal: None,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// `driver_type:target`
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.driver_type, self.target)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| DaoError::Configuration(format!("invalid source config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_with_principal() {
        let config = SourceConfig::from_json(
            r#"{
                "driver_type": "memory",
                "target": "users",
                "properties": { "application_name": "tests" },
                "principal": { "name": "admin", "password": "secret" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.property("application_name"), Some("tests"));
        let principal = config.principal.unwrap();
        assert_eq!(principal.name(), "admin");
        assert_eq!(principal.password(), "secret");
        assert!(!format!("{:?}", principal).contains("secret"));
    }

    #[test]
    fn test_principal_destroy() {
        let mut principal = Principal::new("admin", "secret");
        principal.destroy();
        assert!(principal.is_destroyed());
        assert_eq!(principal.name(), "admin");
    }

    #[test]
    fn test_invalid_json() {
        let err = SourceConfig::from_json("{}").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}
