//! Application configuration.
//!
//! A [`DotvvmConfigurationBuilder`] collects types, controls, routes,
//! resources and services, then freezes into a shared, read-only
//! [`DotvvmConfiguration`]. A JSON project file (`dotvvm.json`) can describe
//! the same data for tooling and for presenter-less applications.

use crate::compilation::{DEFAULT_VIEW_CACHE_BYTES, ViewCache, ViewCompiler};
use crate::error::ConfigurationError;
use crate::resources::{ResourceDefinition, ResourceRegistry};
use crate::routing::{PagePresenter, RouteDefinition, RouteParameters, RouteTable, StaticPresenter};
use crate::security::{AuthorizePolicy, PolicyEvaluator, RolePolicyEvaluator};
use crate::startup::cli_file;
use crate::types::{ControlMetadata, TypeDescriptor, TypeRegistry};
use crate::viewmodel::{DefaultViewModelSerializer, ViewModelSerializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::{Any, TypeId, type_name};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_CULTURE: &str = "en-US";
pub const PROJECT_FILE_NAME: &str = "dotvvm.json";
pub const SERIALIZED_CONFIG_FILE_NAME: &str = "dotvvm_serialized_config.json";

/// Typed service registrations shared by the application.
#[derive(Default, Clone)]
pub struct ServiceCollection {
    services: HashMap<TypeId, (&'static str, Arc<dyn Any + Send + Sync>)>,
}

impl ServiceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service`, replacing an earlier registration of `T`.
    pub fn add_singleton<T: Any + Send + Sync>(&mut self, service: T) -> &mut Self {
        self.services
            .insert(TypeId::of::<T>(), (type_name::<T>(), Arc::new(service)));
        self
    }

    /// Registers `service` unless `T` is already registered.
    pub fn try_add_singleton<T: Any + Send + Sync>(&mut self, service: T) -> bool {
        if self.contains::<T>() {
            return false;
        }
        self.add_singleton(service);
        true
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let (_, service) = self.services.get(&TypeId::of::<T>())?;
        service.clone().downcast::<T>().ok()
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.services.values().map(|(n, _)| *n).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ServiceCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.type_names()).finish()
    }
}

/// Serializer registration stored in [`ServiceCollection`].
pub type SharedSerializer = Arc<dyn ViewModelSerializer>;
/// Policy evaluator registration stored in [`ServiceCollection`].
pub type SharedPolicyEvaluator = Arc<dyn PolicyEvaluator>;

/// Route entry of a project file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRoute {
    pub name: String,
    pub url: String,
    pub virtual_path: String,
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
    #[serde(default)]
    pub policies: Vec<AuthorizePolicy>,
    /// Presenter registered under this name; a static presenter otherwise.
    #[serde(default)]
    pub presenter: Option<String>,
    /// Initial data for the static presenter.
    #[serde(default)]
    pub view_model: Option<Value>,
}

/// `dotvvm.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFile {
    #[serde(default)]
    pub application_physical_path: Option<PathBuf>,
    #[serde(default)]
    pub virtual_directory: String,
    #[serde(default)]
    pub default_culture: Option<String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub types: Vec<TypeDescriptor>,
    #[serde(default)]
    pub controls: Vec<ControlMetadata>,
    #[serde(default)]
    pub routes: Vec<ProjectRoute>,
    #[serde(default)]
    pub resources: Vec<ResourceDefinition>,
}

impl ProjectFile {
    /// Reads a project file. A relative application path is resolved against
    /// the file's directory; a missing one defaults to that directory.
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut project: ProjectFile =
            serde_json::from_str(&text).map_err(|source| ConfigurationError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let base = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        project.application_physical_path = Some(match project.application_physical_path.take() {
            Some(p) if p.is_relative() => base.join(p),
            Some(p) => p,
            None => base,
        });
        Ok(project)
    }
}

pub struct DotvvmConfigurationBuilder {
    application_physical_path: PathBuf,
    virtual_directory: String,
    default_culture: String,
    debug: bool,
    registry: TypeRegistry,
    routes: Vec<RouteDefinition>,
    project_routes: Vec<ProjectRoute>,
    presenters: HashMap<String, Arc<dyn PagePresenter>>,
    resources: ResourceRegistry,
    services: ServiceCollection,
    views: HashMap<String, String>,
    view_cache_bytes: usize,
}

impl DotvvmConfigurationBuilder {
    pub fn new(application_physical_path: impl Into<PathBuf>) -> Self {
        Self {
            application_physical_path: application_physical_path.into(),
            virtual_directory: String::new(),
            default_culture: DEFAULT_CULTURE.to_string(),
            debug: false,
            registry: TypeRegistry::new(),
            routes: Vec::new(),
            project_routes: Vec::new(),
            presenters: HashMap::new(),
            resources: ResourceRegistry::default(),
            services: ServiceCollection::new(),
            views: HashMap::new(),
            view_cache_bytes: DEFAULT_VIEW_CACHE_BYTES,
        }
    }

    pub fn application_physical_path(&self) -> &Path {
        &self.application_physical_path
    }

    pub fn set_application_physical_path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.application_physical_path = path.into();
        self
    }

    /// Base path the application is mounted under, e.g. `/app`.
    pub fn virtual_directory(&mut self, virtual_directory: &str) -> &mut Self {
        self.virtual_directory = normalize_virtual_directory(virtual_directory);
        self
    }

    pub fn default_culture(&mut self, culture: impl Into<String>) -> &mut Self {
        self.default_culture = culture.into();
        self
    }

    pub fn debug(&mut self, debug: bool) -> &mut Self {
        self.debug = debug;
        self
    }

    pub fn view_cache_bytes(&mut self, bytes: usize) -> &mut Self {
        self.view_cache_bytes = bytes;
        self
    }

    pub fn register_type(&mut self, descriptor: TypeDescriptor) -> &mut Self {
        self.registry.register_type(descriptor);
        self
    }

    pub fn register_control(&mut self, control: ControlMetadata) -> &mut Self {
        self.registry.register_control(control);
        self
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn add_route(&mut self, route: RouteDefinition) -> &mut Self {
        self.routes.push(route);
        self
    }

    /// Presenter that project-file routes can reference by name.
    pub fn add_presenter(&mut self, name: impl Into<String>, presenter: Arc<dyn PagePresenter>) -> &mut Self {
        self.presenters.insert(name.into(), presenter);
        self
    }

    pub fn add_resource(&mut self, resource: ResourceDefinition) -> &mut Self {
        self.resources.register(resource);
        self
    }

    /// In-memory view source, looked up before the filesystem.
    pub fn add_view(&mut self, virtual_path: impl Into<String>, source: impl Into<String>) -> &mut Self {
        self.views.insert(virtual_path.into(), source.into());
        self
    }

    pub fn services(&mut self) -> &mut ServiceCollection {
        &mut self.services
    }

    pub fn apply_project(&mut self, project: &ProjectFile) -> &mut Self {
        if let Some(path) = &project.application_physical_path {
            self.application_physical_path = path.clone();
        }
        self.virtual_directory(&project.virtual_directory);
        if let Some(culture) = &project.default_culture {
            self.default_culture = culture.clone();
        }
        self.debug = project.debug;
        for descriptor in &project.types {
            self.registry.register_type(descriptor.clone());
        }
        for control in &project.controls {
            self.registry.register_control(control.clone());
        }
        for resource in &project.resources {
            self.resources.register(resource.clone());
        }
        self.project_routes.extend(project.routes.iter().cloned());
        self
    }

    pub fn build(mut self) -> Result<Arc<DotvvmConfiguration>, ConfigurationError> {
        let registry = Arc::new(std::mem::take(&mut self.registry));

        self.services
            .try_add_singleton::<SharedSerializer>(Arc::new(DefaultViewModelSerializer::new(
                registry.clone(),
            )));
        self.services
            .try_add_singleton::<SharedPolicyEvaluator>(Arc::new(RolePolicyEvaluator::new()));
        let serializer = self
            .services
            .get::<SharedSerializer>()
            .map(|s| s.as_ref().clone())
            .unwrap_or_else(|| Arc::new(DefaultViewModelSerializer::new(registry.clone())));
        let policy_evaluator = self
            .services
            .get::<SharedPolicyEvaluator>()
            .map(|e| e.as_ref().clone())
            .unwrap_or_else(|| Arc::new(RolePolicyEvaluator::new()));

        let mut routes = RouteTable::default();
        for route in self.routes {
            routes.add(route)?;
        }
        for entry in &self.project_routes {
            let presenter = match entry.presenter.as_ref().and_then(|n| self.presenters.get(n)) {
                Some(presenter) => presenter.clone(),
                None => Arc::new(StaticPresenter::from_registry(
                    &registry,
                    &view_model_of(&self.views, &self.application_physical_path, &entry.virtual_path)
                        .unwrap_or_default(),
                    entry.view_model.as_ref(),
                )),
            };
            let mut route = RouteDefinition::new(
                entry.name.clone(),
                entry.url.clone(),
                entry.virtual_path.clone(),
                presenter,
            )?;
            route.defaults = entry.defaults.clone();
            route.policies = entry.policies.clone();
            routes.add(route)?;
        }

        let view_compiler = ViewCompiler::new(
            registry.clone(),
            self.application_physical_path.clone(),
            self.views,
            ViewCache::new(self.view_cache_bytes),
        );

        info!(
            routes = routes.len(),
            resources = self.resources.len(),
            services = self.services.len(),
            "dotvvm configuration built"
        );
        Ok(Arc::new(DotvvmConfiguration {
            application_physical_path: self.application_physical_path,
            virtual_directory: self.virtual_directory,
            default_culture: self.default_culture,
            debug: self.debug,
            registry,
            routes,
            resources: self.resources,
            services: self.services,
            view_compiler,
            serializer,
            policy_evaluator,
        }))
    }
}

/// `@viewModel` of a view, read without resolving it.
fn view_model_of(views: &HashMap<String, String>, root: &Path, virtual_path: &str) -> Option<String> {
    let source = match views.get(virtual_path) {
        Some(source) => source.clone(),
        None => std::fs::read_to_string(root.join(virtual_path)).ok()?,
    };
    let parsed = crate::parser::parse_markup(&source).ok()?;
    parsed
        .directives
        .iter()
        .find(|d| d.name.eq_ignore_ascii_case(crate::resolver::VIEW_MODEL_DIRECTIVE))
        .map(|d| d.value.split(',').next().unwrap_or_default().trim().to_string())
}

fn normalize_virtual_directory(virtual_directory: &str) -> String {
    let trimmed = virtual_directory.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Process-wide configuration; read-only once built.
pub struct DotvvmConfiguration {
    pub application_physical_path: PathBuf,
    /// Empty, or `/name` without a trailing slash.
    pub virtual_directory: String,
    pub default_culture: String,
    pub debug: bool,
    pub registry: Arc<TypeRegistry>,
    pub routes: RouteTable,
    pub resources: ResourceRegistry,
    pub services: ServiceCollection,
    pub view_compiler: ViewCompiler,
    pub serializer: Arc<dyn ViewModelSerializer>,
    pub policy_evaluator: Arc<dyn PolicyEvaluator>,
}

impl fmt::Debug for DotvvmConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DotvvmConfiguration")
            .field("application_physical_path", &self.application_physical_path)
            .field("virtual_directory", &self.virtual_directory)
            .field("default_culture", &self.default_culture)
            .field("debug", &self.debug)
            .field("routes", &self.routes)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigurationDump<'a> {
    application_physical_path: &'a Path,
    virtual_directory: &'a str,
    default_culture: &'a str,
    debug: bool,
    routes: &'a RouteTable,
    resources: &'a ResourceRegistry,
    types: Vec<&'a TypeDescriptor>,
    controls: Vec<&'a ControlMetadata>,
    services: Vec<&'static str>,
}

impl DotvvmConfiguration {
    pub fn builder(application_physical_path: impl Into<PathBuf>) -> DotvvmConfigurationBuilder {
        DotvvmConfigurationBuilder::new(application_physical_path)
    }

    /// Builds from a project file with static presenters for every route.
    pub fn from_project(project: &ProjectFile) -> Result<Arc<Self>, ConfigurationError> {
        let mut builder = DotvvmConfigurationBuilder::new(
            project
                .application_physical_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(".")),
        );
        builder.apply_project(project);
        builder.build()
    }

    pub fn find_route(&self, url: &str) -> Option<(&RouteDefinition, RouteParameters)> {
        self.routes.match_url(url)
    }

    /// Serializable description of the configuration for tooling.
    pub fn dump(&self) -> Result<Value, ConfigurationError> {
        let mut types: Vec<&TypeDescriptor> = self.registry.types().collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        let mut controls: Vec<&ControlMetadata> = self.registry.controls().collect();
        controls.sort_by_key(|c| c.full_name());
        let dump = ConfigurationDump {
            application_physical_path: &self.application_physical_path,
            virtual_directory: &self.virtual_directory,
            default_culture: &self.default_culture,
            debug: self.debug,
            routes: &self.routes,
            resources: &self.resources,
            types,
            controls,
            services: self.services.type_names(),
        };
        serde_json::to_value(&dump).map_err(ConfigurationError::Encode)
    }

    /// Writes [`dump`](Self::dump) to `.dotvvm/dotvvm_serialized_config.json`
    /// under the application directory.
    pub fn write_dump(&self) -> Result<PathBuf, ConfigurationError> {
        let path = cli_file(&self.application_physical_path, SERIALIZED_CONFIG_FILE_NAME)?;
        let json = serde_json::to_string_pretty(&self.dump()?).map_err(ConfigurationError::Encode)?;
        std::fs::write(&path, json).map_err(|source| ConfigurationError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "configuration dumped");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeRef;
    use serde_json::json;

    #[test]
    fn services_are_typed_and_try_add_keeps_the_first() {
        #[derive(Debug, PartialEq)]
        struct Greeting(&'static str);

        let mut services = ServiceCollection::new();
        assert!(services.try_add_singleton(Greeting("hello")));
        assert!(!services.try_add_singleton(Greeting("ignored")));
        assert_eq!(services.get::<Greeting>().as_deref(), Some(&Greeting("hello")));
        services.add_singleton(Greeting("replaced"));
        assert_eq!(services.get::<Greeting>().unwrap().0, "replaced");
        assert!(services.get::<String>().is_none());
    }

    #[test]
    fn project_file_builds_routes_with_static_presenters() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("home.dothtml"),
            "@viewModel HomePage\n<h1>{{value: Title}}</h1>",
        )
        .unwrap();
        let project_path = dir.path().join(PROJECT_FILE_NAME);
        std::fs::write(
            &project_path,
            json!({
                "virtualDirectory": "app/",
                "debug": true,
                "types": [{"name": "HomePage", "properties": [{"name": "Title", "type": "string"}]}],
                "routes": [{"name": "home", "url": "", "virtualPath": "home.dothtml", "viewModel": {"Title": "Hi"}}]
            })
            .to_string(),
        )
        .unwrap();

        let project = ProjectFile::load(&project_path).unwrap();
        assert_eq!(project.application_physical_path.as_deref(), Some(dir.path()));
        let config = DotvvmConfiguration::from_project(&project).unwrap();
        assert_eq!(config.virtual_directory, "/app");
        assert_eq!(config.default_culture, DEFAULT_CULTURE);

        let (route, _) = config.find_route("/").unwrap();
        let vm = route.presenter.init_view_model(&RouteParameters::new()).unwrap();
        assert_eq!(vm.type_name(), "HomePage");
        assert_eq!(vm.get_str("Title"), Some(&json!("Hi")));

        let view = config.view_compiler.compile_view(&route.virtual_path).unwrap();
        assert_eq!(view.view_model_type, "HomePage");
    }

    #[test]
    fn dump_lists_routes_types_and_services() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = DotvvmConfiguration::builder(dir.path());
        builder
            .debug(true)
            .register_type(TypeDescriptor::new("Page").property("Title", TypeRef::String))
            .add_route(
                RouteDefinition::new(
                    "home",
                    "",
                    "home.dothtml",
                    Arc::new(StaticPresenter::new("Page", json!({}))),
                )
                .unwrap(),
            );
        let config = builder.build().unwrap();

        let dump = config.dump().unwrap();
        assert_eq!(dump["routes"][0]["name"], "home");
        assert_eq!(dump["types"][0]["name"], "Page");
        assert_eq!(dump["services"].as_array().unwrap().len(), 2);

        let path = config.write_dump().unwrap();
        assert_eq!(path, dir.path().join(".dotvvm").join(SERIALIZED_CONFIG_FILE_NAME));
        let written: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written, dump);
    }

    #[test]
    fn duplicate_route_names_fail_the_build() {
        let presenter: Arc<dyn PagePresenter> = Arc::new(StaticPresenter::new("Page", json!({})));
        let mut builder = DotvvmConfiguration::builder(".");
        builder
            .add_route(RouteDefinition::new("a", "a", "a.dothtml", presenter.clone()).unwrap())
            .add_route(RouteDefinition::new("a", "b", "b.dothtml", presenter).unwrap());
        assert!(matches!(builder.build(), Err(ConfigurationError::DuplicateRoute(_))));
    }
}
