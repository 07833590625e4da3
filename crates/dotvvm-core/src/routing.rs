//! Route table and page presenters.

use crate::error::{CommandError, ConfigurationError};
use crate::security::AuthorizePolicy;
use crate::types::{TypeRef, TypeRegistry};
use crate::viewmodel::TrackedViewModel;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub type RouteParameters = BTreeMap<String, String>;

/// Result of a command executed by a presenter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Send the view-model changes back to the client.
    Completed,
    Redirect(String),
}

/// Server-side behavior of a page: builds its view model and runs the
/// commands its view binds to.
pub trait PagePresenter: Send + Sync {
    fn init_view_model(&self, parameters: &RouteParameters) -> Result<TrackedViewModel, CommandError>;

    /// `command` is the text of the command binding, e.g. `Save()`.
    fn execute_command(
        &self,
        command: &str,
        args: &[Value],
        view_model: &mut TrackedViewModel,
    ) -> Result<CommandOutcome, CommandError>;
}

/// Presenter for pages without server logic: the view model starts from
/// fixed data (or type defaults) and no commands are supported.
#[derive(Debug, Clone)]
pub struct StaticPresenter {
    type_name: String,
    initial: Value,
}

impl StaticPresenter {
    pub fn new(type_name: impl Into<String>, initial: Value) -> Self {
        Self {
            type_name: type_name.into(),
            initial,
        }
    }

    /// View model filled with defaults of the registered properties, with
    /// `overrides` layered on top.
    pub fn from_registry(registry: &TypeRegistry, type_name: &str, overrides: Option<&Value>) -> Self {
        let mut initial = default_value(registry, &TypeRef::named(type_name), 0);
        if let (Value::Object(base), Some(Value::Object(extra))) = (&mut initial, overrides) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        Self::new(type_name, initial)
    }
}

impl PagePresenter for StaticPresenter {
    fn init_view_model(&self, _parameters: &RouteParameters) -> Result<TrackedViewModel, CommandError> {
        Ok(TrackedViewModel::new(self.type_name.clone(), self.initial.clone()))
    }

    fn execute_command(
        &self,
        command: &str,
        _args: &[Value],
        _view_model: &mut TrackedViewModel,
    ) -> Result<CommandOutcome, CommandError> {
        Err(CommandError::UnknownCommand(command.to_string()))
    }
}

fn default_value(registry: &TypeRegistry, ty: &TypeRef, depth: usize) -> Value {
    match ty {
        TypeRef::String | TypeRef::Nullable(_) | TypeRef::Any => Value::Null,
        TypeRef::Int => Value::from(0),
        TypeRef::Float => Value::from(0.0),
        TypeRef::Bool => Value::Bool(false),
        TypeRef::Collection(_) => Value::Array(Vec::new()),
        TypeRef::Named(_) if depth > 8 => Value::Null,
        TypeRef::Named(_) => match registry.descriptor_of(ty) {
            Some(descriptor) => {
                let mut map = Map::new();
                for property in &descriptor.properties {
                    map.insert(
                        property.name.clone(),
                        default_value(registry, &property.property_type, depth + 1),
                    );
                }
                Value::Object(map)
            }
            None => Value::Null,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum RouteSegment {
    Literal(String),
    Parameter { name: String, optional: bool },
}

fn parse_pattern(name: &str, url: &str) -> Result<Vec<RouteSegment>, ConfigurationError> {
    let invalid = |reason: &str| ConfigurationError::InvalidRoute {
        name: name.to_string(),
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let trimmed = url.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let mut segments = Vec::new();
    for part in trimmed.split('/') {
        if part.is_empty() {
            return Err(invalid("empty segment"));
        }
        if let Some(inner) = part.strip_prefix('{') {
            let inner = inner
                .strip_suffix('}')
                .ok_or_else(|| invalid("unclosed parameter"))?;
            let (param, optional) = match inner.strip_suffix('?') {
                Some(param) => (param, true),
                None => (inner, false),
            };
            if param.is_empty() || !param.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(invalid("invalid parameter name"));
            }
            segments.push(RouteSegment::Parameter {
                name: param.to_string(),
                optional,
            });
        } else if part.contains(['{', '}']) {
            return Err(invalid("parameters must span a whole segment"));
        } else {
            if matches!(segments.last(), Some(RouteSegment::Parameter { optional: true, .. })) {
                return Err(invalid("optional parameters must be at the end"));
            }
            segments.push(RouteSegment::Literal(part.to_string()));
        }
    }
    let mut seen_optional = false;
    for segment in &segments {
        if let RouteSegment::Parameter { optional, .. } = segment {
            if seen_optional && !optional {
                return Err(invalid("optional parameters must be at the end"));
            }
            seen_optional |= optional;
        }
    }
    Ok(segments)
}

/// A page route: url pattern, view, presenter and authorization.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDefinition {
    pub name: String,
    pub url: String,
    pub virtual_path: String,
    pub defaults: RouteParameters,
    pub policies: Vec<AuthorizePolicy>,
    #[serde(skip)]
    pub presenter: Arc<dyn PagePresenter>,
    #[serde(skip)]
    segments: Vec<RouteSegment>,
}

impl RouteDefinition {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        virtual_path: impl Into<String>,
        presenter: Arc<dyn PagePresenter>,
    ) -> Result<Self, ConfigurationError> {
        let name = name.into();
        let url = url.into();
        let segments = parse_pattern(&name, &url)?;
        Ok(Self {
            name,
            url,
            virtual_path: virtual_path.into(),
            defaults: RouteParameters::new(),
            policies: Vec::new(),
            presenter,
            segments,
        })
    }

    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    pub fn with_policy(mut self, policy: AuthorizePolicy) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn segments(&self) -> &[RouteSegment] {
        &self.segments
    }

    /// Parameters when `url` (without leading or trailing slashes) matches.
    pub fn match_url(&self, url: &str) -> Option<RouteParameters> {
        let parts: Vec<&str> = if url.is_empty() {
            Vec::new()
        } else {
            url.split('/').collect()
        };
        if parts.len() > self.segments.len() {
            return None;
        }
        let mut parameters = self.defaults.clone();
        for (i, segment) in self.segments.iter().enumerate() {
            match (segment, parts.get(i)) {
                (RouteSegment::Literal(literal), Some(part)) if literal.eq_ignore_ascii_case(part) => {}
                (RouteSegment::Literal(_), _) => return None,
                (RouteSegment::Parameter { name, .. }, Some(part)) if !part.is_empty() => {
                    parameters.insert(name.clone(), (*part).to_string());
                }
                (RouteSegment::Parameter { optional: true, .. }, None) => {}
                (RouteSegment::Parameter { name, .. }, None) if self.defaults.contains_key(name) => {}
                (RouteSegment::Parameter { .. }, _) => return None,
            }
        }
        Some(parameters)
    }

    /// Url for the given parameters; missing optional parameters are omitted.
    pub fn build_url(&self, parameters: &RouteParameters) -> Option<String> {
        let mut parts = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                RouteSegment::Literal(literal) => parts.push(literal.clone()),
                RouteSegment::Parameter { name, optional } => {
                    match parameters.get(name).or_else(|| self.defaults.get(name)) {
                        Some(value) => parts.push(value.clone()),
                        None if *optional => break,
                        None => return None,
                    }
                }
            }
        }
        Some(parts.join("/"))
    }
}

impl fmt::Debug for RouteDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDefinition")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("virtual_path", &self.virtual_path)
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}

/// Routes in registration order; the first match wins.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct RouteTable {
    routes: Vec<RouteDefinition>,
}

impl RouteTable {
    pub fn add(&mut self, route: RouteDefinition) -> Result<(), ConfigurationError> {
        if self.get(&route.name).is_some() {
            return Err(ConfigurationError::DuplicateRoute(route.name));
        }
        self.routes.push(route);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RouteDefinition> {
        self.routes.iter().find(|r| r.name == name)
    }

    pub fn match_url(&self, url: &str) -> Option<(&RouteDefinition, RouteParameters)> {
        let url = url.trim_matches('/');
        self.routes
            .iter()
            .find_map(|route| route.match_url(url).map(|params| (route, params)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteDefinition> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeDescriptor;
    use serde_json::json;

    fn presenter() -> Arc<dyn PagePresenter> {
        Arc::new(StaticPresenter::new("Page", json!({})))
    }

    fn route(name: &str, url: &str) -> RouteDefinition {
        RouteDefinition::new(name, url, format!("Views/{name}.dothtml"), presenter()).unwrap()
    }

    #[test]
    fn matches_parameters_and_optional_tails() {
        let mut table = RouteTable::default();
        table.add(route("default", "")).unwrap();
        table.add(route("customer", "customers/{id}")).unwrap();
        table.add(route("orders", "orders/{page?}")).unwrap();

        let (r, params) = table.match_url("/Customers/42/").unwrap();
        assert_eq!(r.name, "customer");
        assert_eq!(params.get("id").map(String::as_str), Some("42"));

        let (r, params) = table.match_url("orders").unwrap();
        assert_eq!(r.name, "orders");
        assert!(params.is_empty());
        assert_eq!(table.match_url("orders/3").unwrap().1["page"], "3");

        assert_eq!(table.match_url("").unwrap().0.name, "default");
        assert!(table.match_url("customers").is_none());
        assert!(table.match_url("customers/1/2").is_none());
    }

    #[test]
    fn defaults_fill_missing_parameters() {
        let r = route("list", "list/{page}").with_default("page", "1");
        assert_eq!(r.match_url("list").unwrap()["page"], "1");
        assert_eq!(r.build_url(&RouteParameters::new()).as_deref(), Some("list/1"));
    }

    #[test]
    fn builds_urls() {
        let r = route("orders", "orders/{page?}");
        assert_eq!(r.build_url(&RouteParameters::new()).as_deref(), Some("orders"));
        let params = RouteParameters::from([("page".to_string(), "2".to_string())]);
        assert_eq!(r.build_url(&params).as_deref(), Some("orders/2"));
        assert_eq!(route("c", "customers/{id}").build_url(&RouteParameters::new()), None);
    }

    #[test]
    fn rejects_invalid_patterns_and_duplicate_names() {
        for url in ["a/{b", "a/x{b}", "{a?}/b", "a//b", "{}"] {
            assert!(
                RouteDefinition::new("r", url, "v", presenter()).is_err(),
                "{url} should be rejected"
            );
        }
        let mut table = RouteTable::default();
        table.add(route("a", "a")).unwrap();
        assert!(matches!(
            table.add(route("a", "b")),
            Err(ConfigurationError::DuplicateRoute(_))
        ));
    }

    #[test]
    fn static_presenter_starts_from_type_defaults() {
        let mut registry = TypeRegistry::new();
        registry.register_type(
            TypeDescriptor::new("Page")
                .property("Title", TypeRef::String)
                .property("Count", TypeRef::Int)
                .property("Items", TypeRef::collection_of(TypeRef::String)),
        );
        let presenter = StaticPresenter::from_registry(&registry, "Page", Some(&json!({"Title": "Hi"})));
        let mut vm = presenter.init_view_model(&RouteParameters::new()).unwrap();
        assert_eq!(vm.root(), &json!({"Title": "Hi", "Count": 0, "Items": []}));
        assert_eq!(
            presenter.execute_command("Save()", &[], &mut vm),
            Err(CommandError::UnknownCommand("Save()".into()))
        );
    }
}
