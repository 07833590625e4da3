//! Error types for markup compilation, serialization and startup.

use crate::parser::Position;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while tokenizing/parsing `.dothtml` markup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("{position}: unterminated tag <{name}")]
    UnterminatedTag { name: String, position: Position },

    #[error("{position}: unterminated comment")]
    UnterminatedComment { position: Position },

    #[error("{position}: unterminated binding '{{{{' in text")]
    UnterminatedBinding { position: Position },

    #[error("{position}: unterminated attribute value for '{attribute}'")]
    UnterminatedAttribute { attribute: String, position: Position },

    #[error("{position}: closing tag </{found}> does not match <{expected}>")]
    MismatchedClosingTag {
        expected: String,
        found: String,
        position: Position,
    },

    #[error("{position}: unexpected closing tag </{name}>")]
    UnexpectedClosingTag { name: String, position: Position },

    #[error("{position}: element <{element}> is never closed")]
    UnclosedElement { element: String, position: Position },

    #[error("{position}: attribute '{attribute}' is specified more than once on <{element}>")]
    DuplicateAttribute {
        element: String,
        attribute: String,
        position: Position,
    },

    #[error("{position}: invalid directive: {message}")]
    InvalidDirective { message: String, position: Position },

    #[error("{position}: expected {expected}")]
    Expected {
        expected: &'static str,
        position: Position,
    },
}

/// Errors raised while parsing the expression inside `{kind: expression}`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingParseError {
    #[error("binding is not enclosed in braces: '{0}'")]
    NotABinding(String),

    #[error("unknown binding kind '{0}'")]
    UnknownKind(String),

    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unexpected end of binding expression")]
    UnexpectedEnd,

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("unexpected token '{found}', expected {expected}")]
    UnexpectedToken { found: String, expected: &'static str },

    #[error("empty binding expression")]
    Empty,
}

/// Errors raised by the control tree resolver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("directive '@{key}' is specified more than once (previous: '@{previous}')")]
    DuplicateDirective { key: String, previous: String },

    #[error("the view does not declare the @viewModel directive")]
    MissingViewModelDirective,

    #[error("view model type '{0}' is not registered")]
    UnknownViewModelType(String),

    #[error("{position}: control <{prefix}:{name}> is not registered")]
    UnknownControl {
        prefix: String,
        name: String,
        position: Position,
    },

    #[error("{position}: control <{control}> has no property '{property}'")]
    UnknownProperty {
        control: String,
        property: String,
        position: Position,
    },

    #[error("{position}: control <{control}> does not allow content")]
    ContentNotAllowed { control: String, position: Position },

    #[error("{position}: invalid binding '{text}': {source}")]
    Binding {
        text: String,
        position: Position,
        #[source]
        source: BindingParseError,
    },

    #[error("{position}: property '{property}' of <{control}> requires a binding")]
    BindingRequired {
        control: String,
        property: String,
        position: Position,
    },

    #[error("{position}: '{property}' of <{control}> must be a collection, found {found}")]
    NotACollection {
        control: String,
        property: String,
        found: String,
        position: Position,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Errors produced by entry-point discovery and configuration building.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartupError {
    #[error("could not find an implementation of DotvvmStartup in '{assembly}'")]
    MissingStartup { assembly: String },

    #[error("found more than one DotvvmStartup implementation in '{assembly}': {}", quoted(.names))]
    AmbiguousStartup { assembly: String, names: Vec<String> },

    #[error("found more than one implementation of DotvvmServiceConfigurator in '{assembly}': {}", quoted(.names))]
    AmbiguousServiceConfigurator { assembly: String, names: Vec<String> },

    #[error("type '{type_name}' is missing the 'configure_services(&mut ServiceCollection)' method")]
    MissingConfigureServices { type_name: String },

    #[error("failed to create directory {path}: {message}")]
    CliDirectory { path: PathBuf, message: String },
}

fn quoted(names: &[String]) -> String {
    names
        .iter()
        .map(|n| format!("'{n}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn at_suffix(path: &Option<String>) -> String {
    path.as_ref().map(|p| format!(" (at {p})")).unwrap_or_default()
}

/// Errors raised by the view-model serializer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializationError {
    /// Structured rejection of a malformed payload; nothing was applied.
    #[error("[{code}] {message}{}", at_suffix(.path))]
    Validation {
        code: String,
        message: String,
        path: Option<String>,
    },

    #[error("view model type '{0}' is not registered")]
    UnknownType(String),

    #[error("failed to encode view model: {0}")]
    Encode(String),
}

impl SerializationError {
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            code: code.into(),
            message: message.into(),
            path: None,
        }
    }

    pub fn at(self, path: impl Into<String>) -> Self {
        match self {
            Self::Validation { code, message, .. } => Self::Validation {
                code,
                message,
                path: Some(path.into()),
            },
            other => other,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Validation { code, .. } => code,
            Self::UnknownType(_) => "DOTVVM_E_UNKNOWN_TYPE",
            Self::Encode(_) => "DOTVVM_E_ENCODE",
        }
    }
}

/// Errors raised while loading or applying a project file.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("route '{name}' has an invalid url pattern '{url}': {reason}")]
    InvalidRoute {
        name: String,
        url: String,
        reason: String,
    },

    #[error("route '{0}' is registered more than once")]
    DuplicateRoute(String),

    #[error("failed to encode configuration: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Startup(#[from] StartupError),
}

/// Errors raised by [`crate::compilation::ViewCompiler`].
#[derive(Debug, Error)]
pub enum CompilationError {
    #[error("view '{0}' was not found")]
    ViewNotFound(String),

    #[error("failed to read view {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("view '{path}': {source}")]
    Resolve {
        path: String,
        #[source]
        source: ResolveError,
    },
}

/// Failures reported by a page presenter while initializing or executing a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("command '{0}' is not supported by this page")]
    UnknownCommand(String),

    #[error("invalid arguments for '{command}': {message}")]
    InvalidArguments { command: String, message: String },

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}
