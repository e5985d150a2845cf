use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::binding::{Binding, MethodDescriptor, ParamKind, Template, TemplateEnvironment, TemplateSource, Verb, ENV};
use crate::error::{DaoError, Result};
use crate::extract::{Extraction, ExtractorRegistry};
use crate::traits::{Service, Validator};
use crate::types::RawQueryResult;

/// Builds [`Binding`]s for the methods of one interface.
///
/// All bindings produced by the same builder share its service and
/// validator.
pub struct BindingBuilder<'a> {
    api: Arc<str>,
    service: Arc<dyn Service>,
    registry: &'a ExtractorRegistry,
    environment: &'a TemplateEnvironment,
    validator: Option<Arc<dyn Validator>>,
}

impl<'a> BindingBuilder<'a> {
    pub fn new(
        api: impl Into<Arc<str>>,
        service: Arc<dyn Service>,
        registry: &'a ExtractorRegistry,
        environment: &'a TemplateEnvironment,
    ) -> Self {
        Self {
            api: api.into(),
            service,
            registry,
            environment,
            validator: None,
        }
    }

    pub fn validator(mut self, validator: Option<Arc<dyn Validator>>) -> Self {
        self.validator = validator;
        self
    }

    pub fn build(&self, method: &MethodDescriptor) -> Result<Binding> {
        let source = self.resolve_template(method)?;
        let template = Template::parse(&source);
        self.check_params(method, &template)?;

        let extraction = match method.verb {
            Verb::Select => {
                let returns = method.returns.clone().ok_or_else(|| {
                    self.config_error(method, "select methods must declare a return type")
                })?;
                let extractor = self.registry.require(&returns).map_err(|e| match e {
                    DaoError::Configuration(reason) => self.config_error(method, &reason),
                    other => other,
                })?;
                Some(Extraction::new(extractor, returns, Arc::clone(&self.api)))
            }
            Verb::Raw => {
                self.check_returns::<RawQueryResult>(method)?;
                None
            }
            _ => {
                self.check_returns::<bool>(method)?;
                None
            }
        };

        debug!(
            api = %self.api,
            method = %method.name,
            verb = %method.verb,
            params = method.params.len(),
            "built binding"
        );

        Ok(Binding {
            api: Arc::clone(&self.api),
            method: method.name.clone(),
            verb: method.verb,
            template,
            params: method.params.clone(),
            validator: self.validator.clone(),
            extraction,
            service: Arc::clone(&self.service),
        })
    }

    fn resolve_template(&self, method: &MethodDescriptor) -> Result<String> {
        let key = match &method.template {
            TemplateSource::Literal(literal) if literal == ENV => {
                method.property.as_deref().ok_or_else(|| {
                    self.config_error(method, "environment template without a property key")
                })?
            }
            TemplateSource::Literal(literal) => {
                if literal.trim().is_empty() {
                    return Err(self.config_error(method, "missing statement template"));
                }
                return Ok(literal.clone());
            }
            TemplateSource::Environment(key) => key.as_str(),
        };
        match self.environment.get(key) {
            Some(template) if !template.trim().is_empty() => Ok(template),
            _ => Err(self.config_error(
                method,
                &format!("no template named '{}' in the environment", key),
            )),
        }
    }

    fn check_params(&self, method: &MethodDescriptor, template: &Template) -> Result<()> {
        let mut seen = HashSet::new();
        for param in &method.params {
            if !seen.insert(param.name()) {
                return Err(self.config_error(
                    method,
                    &format!("duplicate parameter '{}'", param.name()),
                ));
            }
        }

        // A map may fill any placeholder, so coverage can only be checked per call.
        if method.params.iter().any(|p| p.kind() == ParamKind::Map) {
            return Ok(());
        }
        match template.placeholders().into_iter().find(|p| !seen.contains(p)) {
            Some(missing) => Err(self.config_error(
                method,
                &format!("no parameter for placeholder {{{}}}", missing),
            )),
            None => Ok(()),
        }
    }

    fn check_returns<T: 'static>(&self, method: &MethodDescriptor) -> Result<()> {
        match &method.returns {
            Some(returns) if !returns.is::<T>() => Err(self.config_error(
                method,
                &format!(
                    "{} methods return {}, not {}",
                    method.verb,
                    std::any::type_name::<T>(),
                    returns.name()
                ),
            )),
            _ => Ok(()),
        }
    }

    fn config_error(&self, method: &MethodDescriptor, reason: &str) -> DaoError {
        DaoError::Configuration(format!("{}::{}: {}", self.api, method.name, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::ParamSpec;
    use crate::drivers::InMemoryTestService;
    use crate::error::ErrorKind;
    use crate::types::ty;

    struct Unknown;

    fn build(method: MethodDescriptor, environment: &TemplateEnvironment) -> Result<Binding> {
        let service: Arc<dyn Service> = Arc::new(InMemoryTestService::new());
        let registry = ExtractorRegistry::new();
        BindingBuilder::new("UserStorage", service, &registry, environment).build(&method)
    }

    fn build_err(method: MethodDescriptor) -> DaoError {
        build(method, &TemplateEnvironment::new()).unwrap_err()
    }

    #[test]
    fn test_environment_template() {
        let env = TemplateEnvironment::new();
        env.set("users.count", "select count(*) from users");

        let by_source = MethodDescriptor::new(
            "count",
            Verb::Select,
            TemplateSource::Environment("users.count".into()),
        )
        .returns(ty::of::<i64>());
        let binding = build(by_source, &env).unwrap();
        assert_eq!(binding.template().source(), "select count(*) from users");

        let by_sentinel = MethodDescriptor::select("count", ENV)
            .property("users.count")
            .returns(ty::of::<i64>());
        assert!(build(by_sentinel, &env).is_ok());
    }

    #[test]
    fn test_missing_templates() {
        let missing_key = MethodDescriptor::new(
            "count",
            Verb::Raw,
            TemplateSource::Environment("nope".into()),
        );
        assert_eq!(build_err(missing_key).kind(), ErrorKind::Configuration);

        let no_property = MethodDescriptor::raw("count", ENV);
        assert_eq!(build_err(no_property).kind(), ErrorKind::Configuration);

        let empty = MethodDescriptor::raw("count", "  ");
        assert_eq!(build_err(empty).kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_uncovered_placeholder() {
        let method = MethodDescriptor::raw("find", "select * from {table} where id = {id}")
            .param(ParamSpec::scalar("table"));
        let err = build_err(method);
        assert!(err.to_string().contains("{id}"), "{}", err);
    }

    #[test]
    fn test_map_param_relaxes_coverage() {
        let method = MethodDescriptor::raw("find", "select * from {table} where id = {id}")
            .param(ParamSpec::map("filter"));
        assert!(build(method, &TemplateEnvironment::new()).is_ok());
    }

    #[test]
    fn test_duplicate_param_names() {
        let method = MethodDescriptor::raw("find", "select {id}")
            .param(ParamSpec::scalar("id"))
            .param(ParamSpec::array("id"));
        assert_eq!(build_err(method).kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_select_return_type_rules() {
        let no_returns = MethodDescriptor::select("all", "select * from users");
        assert_eq!(build_err(no_returns).kind(), ErrorKind::Configuration);

        let unknown = MethodDescriptor::select("all", "select * from users")
            .returns(ty::opaque::<Unknown>());
        let err = build_err(unknown);
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("UserStorage::all"));
    }

    #[test]
    fn test_write_verbs_return_bool() {
        let ok = MethodDescriptor::insert("add", "insert into t values (1)").returns(ty::of::<bool>());
        assert!(build(ok, &TemplateEnvironment::new()).is_ok());

        let wrong = MethodDescriptor::insert("add", "insert into t values (1)").returns(ty::of::<i64>());
        assert_eq!(build_err(wrong).kind(), ErrorKind::Configuration);

        let raw = MethodDescriptor::raw("dump", "select 1").returns(ty::rows());
        assert!(build(raw, &TemplateEnvironment::new()).is_ok());
    }
}
