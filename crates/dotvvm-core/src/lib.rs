//! dotvvm core crate.
//!
//! This crate holds everything that does not depend on a host:
//!
//! - `parser` + `binding`: `.dothtml` markup and `{kind: expr}` bindings to
//!   raw syntax trees.
//! - `types` + `data_context` + `resolver`: the control tree resolver, which
//!   turns a raw tree into a typed, immutable [`ResolvedTreeRoot`].
//! - `compilation`: view loading plus the compiled-view cache.
//! - `viewmodel`: tracked view models and the JSON wire protocol.
//! - `config` + `startup` + `routing` + `security` + `resources`: the
//!   read-only application configuration and how tooling discovers it.
//!
//! Compilation is a pure function of (source, registry); the only shared
//! mutable state is the view cache.

pub mod binding;
pub mod compilation;
pub mod config;
pub mod data_context;
pub mod error;
pub mod parser;
pub mod resolver;
pub mod resources;
pub mod routing;
pub mod security;
pub mod startup;
pub mod types;
pub mod viewmodel;

pub use binding::{BindingExpression, BindingKind, Expr, parse_binding, parse_expression};
pub use compilation::{ViewCache, ViewCompiler};
pub use config::{
    DotvvmConfiguration, DotvvmConfigurationBuilder, ProjectFile, ProjectRoute, ServiceCollection,
};
pub use data_context::DataContextStack;
pub use error::{
    BindingParseError, CommandError, CompilationError, ConfigurationError, ParseError,
    ResolveError, SerializationError, StartupError,
};
pub use parser::{DothtmlRoot, Position, parse_markup};
pub use resolver::{
    ControlTreeResolver, Directives, ResolvedBinding, ResolvedControl, ResolvedControlTreeVisitor,
    ResolvedNode, ResolvedTreeRoot,
};
pub use resources::{ResourceDefinition, ResourceLink, ResourceRegistry, ResourceType};
pub use routing::{
    CommandOutcome, PagePresenter, RouteDefinition, RouteParameters, RouteTable, StaticPresenter,
};
pub use security::{
    AuthorizationOutcome, AuthorizePolicy, PolicyEvaluator, Principal, RolePolicyEvaluator,
};
pub use startup::{
    DotvvmStartup, HostingAssembly, cli_file, create_dotvvm_directory, get_configuration,
    get_dotvvm_startup,
};
pub use types::{Direction, TypeDescriptor, TypeRef, TypeRegistry};
pub use viewmodel::{
    DefaultViewModelSerializer, PostbackAction, PostbackRequest, PostbackResponse,
    TrackedViewModel, ViewModelPath, ViewModelSerializer,
};
