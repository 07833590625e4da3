//! dotvvm web crate.
//!
//! Host-facing half of the framework: the request pipeline
//! ([`DotvvmPipeline`]) with its resource, SPA, postback and routing stages,
//! the page writer, and the client runtime. The runtime ships twice: as
//! `dotvvm-runtime.js` for browsers and as the [`client`] module, which
//! implements the same ordering rules against a pluggable transport.

#[cfg(feature = "axum")]
pub mod adapters;
pub mod client;
pub mod context;
pub mod error;
pub mod http;
pub mod middleware;
pub mod page;
pub mod resources;

#[cfg(feature = "axum")]
pub use adapters::axum::{AxumDotvvmAdapter, dotvvm_middleware};
pub use client::{
    ClientHost, ClientState, ClientViewModel, NavigationOutcome, NavigationSequencer, PostbackCounter,
    PostbackGate, PostbackOutcome, PostbackSender,
};
pub use context::DotvvmRequestContext;
pub use error::{DotvvmError, PostbackError};
pub use http::{
    DotvvmHttpContext, DotvvmHttpRequest, Features, HostRequest, HttpResponse, RequestCulture,
    clean_request_url, convert_http_context, is_in_current_virtual_directory, resolve_app_url, virtual_directory,
};
pub use middleware::{Dispatch, DotvvmMiddleware, DotvvmPipeline, PipelineState};
pub use page::{PageWriter, render_page};
pub use resources::{ResourceManager, find_resource};

/// Browser runtime, served as the `dotvvm` resource.
pub const DOTVVM_RUNTIME_JS: &str = include_str!("dotvvm-runtime.js");
