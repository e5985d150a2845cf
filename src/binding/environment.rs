use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{DaoError, Result};

lazy_static! {
    static ref GLOBAL: Arc<TemplateEnvironment> = Arc::new(TemplateEnvironment::new());
}

/// Named statement templates, looked up by methods declared with
/// [`TemplateSource::Environment`](crate::binding::TemplateSource::Environment).
#[derive(Debug, Default)]
pub struct TemplateEnvironment {
    templates: RwLock<HashMap<String, String>>,
}

impl TemplateEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide table used when no environment is injected.
    pub fn global() -> Arc<TemplateEnvironment> {
        Arc::clone(&GLOBAL)
    }

    /// Parses a JSON object of `key: template` pairs.
    ///
    /// ```
    /// use daobind::binding::TemplateEnvironment;
    ///
    /// let env = TemplateEnvironment::from_json(r#"{"users.all": "select * from users"}"#).unwrap();
    /// assert_eq!(env.get("users.all").as_deref(), Some("select * from users"));
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let templates: HashMap<String, String> = serde_json::from_str(json)
            .map_err(|e| DaoError::Configuration(format!("invalid template table: {}", e)))?;
        Ok(Self {
            templates: RwLock::new(templates),
        })
    }

    /// Replaces the whole table.
    pub fn setup<K, V, I>(&self, templates: I)
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let templates: HashMap<String, String> = templates
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        debug!(count = templates.len(), "template environment loaded");
        *self.templates.write() = templates;
    }

    pub fn set(&self, key: impl Into<String>, template: impl Into<String>) {
        self.templates.write().insert(key.into(), template.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.templates.read().get(key).cloned()
    }

    pub fn clear(&self) {
        self.templates.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_replaces_table() {
        let env = TemplateEnvironment::new();
        env.set("old", "select 0");
        env.setup([("a", "select 1"), ("b", "select 2")]);
        assert_eq!(env.get("a").as_deref(), Some("select 1"));
        assert!(env.get("old").is_none());

        env.clear();
        assert!(env.get("a").is_none());
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        let err = TemplateEnvironment::from_json("[1, 2]").unwrap_err();
        assert!(matches!(err, DaoError::Configuration(_)));
    }
}
