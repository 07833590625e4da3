//! Request pipeline.
//!
//! [`DotvvmPipeline::dispatch`] builds one [`DotvvmRequestContext`] per
//! request and hands it to a fixed list of stages. The first stage that
//! returns a response ends the request; when every stage passes, the request
//! goes back to the host unchanged (apart from the context stored in its
//! features).

mod postback;
mod resource;
mod routing;
mod spa;

pub use postback::PostbackStage;
pub use resource::{RESOURCE_URL_PREFIX, ResourceStage};
pub use routing::RoutingStage;
pub use spa::{SPA_URL_PREFIX, SpaStage};

use crate::context::DotvvmRequestContext;
use crate::error::DotvvmError;
use crate::http::{HostRequest, HttpResponse, convert_http_context};
use async_trait::async_trait;
use dotvvm_core::resources::CLIENT_RUNTIME_RESOURCE;
use dotvvm_core::{DotvvmConfiguration, ResolvedTreeRoot, RouteDefinition, RouteParameters};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// View directive listing extra resources, e.g. `@resource bootstrap, site`.
pub const RESOURCE_DIRECTIVE: &str = "resource";

/// One stage of the pipeline.
#[async_trait]
pub trait DotvvmMiddleware: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(Some(_))` handles the request, `Ok(None)` passes it on.
    async fn handle(&self, context: &DotvvmRequestContext) -> Result<Option<HttpResponse>, DotvvmError>;
}

/// Where a request is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    ContextBuilt,
    Handled(&'static str),
    Dispatched,
}

/// Terminal result of [`DotvvmPipeline::dispatch`].
#[derive(Debug)]
pub enum Dispatch {
    Handled {
        stage: &'static str,
        response: HttpResponse,
    },
    /// No stage handled the request; the host should continue with it.
    Forward(HostRequest),
}

impl Dispatch {
    pub fn state(&self) -> PipelineState {
        match self {
            Self::Handled { stage, .. } => PipelineState::Handled(*stage),
            Self::Forward(_) => PipelineState::Dispatched,
        }
    }
}

pub type ConfigurationDumper = Arc<dyn Fn(&DotvvmConfiguration) + Send + Sync>;

/// Writes the configuration dump for tooling when the application runs in
/// debug mode.
pub fn dump_configuration(configuration: &DotvvmConfiguration) {
    if !configuration.debug {
        return;
    }
    match configuration.write_dump() {
        Ok(path) => info!(path = %path.display(), "configuration written for tooling"),
        Err(err) => warn!(error = %err, "failed to write the configuration dump"),
    }
}

pub struct DotvvmPipeline {
    configuration: Arc<DotvvmConfiguration>,
    stages: Vec<Arc<dyn DotvvmMiddleware>>,
    configuration_dumped: AtomicBool,
    dumper: ConfigurationDumper,
}

impl std::fmt::Debug for DotvvmPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DotvvmPipeline")
            .field("stages", &self.stage_names())
            .field("configuration_dumped", &self.configuration_dumped)
            .finish_non_exhaustive()
    }
}

impl DotvvmPipeline {
    /// Pipeline with the standard stages: resources, SPA, postback, routing.
    pub fn new(configuration: Arc<DotvvmConfiguration>) -> Self {
        Self::with_stages(
            configuration,
            vec![
                Arc::new(ResourceStage),
                Arc::new(SpaStage),
                Arc::new(PostbackStage),
                Arc::new(RoutingStage),
            ],
        )
    }

    pub fn with_stages(configuration: Arc<DotvvmConfiguration>, stages: Vec<Arc<dyn DotvvmMiddleware>>) -> Self {
        Self {
            configuration,
            stages,
            configuration_dumped: AtomicBool::new(false),
            dumper: Arc::new(dump_configuration),
        }
    }

    /// Replaces the action run once on the first request.
    pub fn with_dumper(mut self, dumper: impl Fn(&DotvvmConfiguration) + Send + Sync + 'static) -> Self {
        self.dumper = Arc::new(dumper);
        self
    }

    pub fn configuration(&self) -> &Arc<DotvvmConfiguration> {
        &self.configuration
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn dispatch(&self, mut request: HostRequest) -> Result<Dispatch, DotvvmError> {
        self.dump_configuration_once();

        let http = convert_http_context(&mut request);
        let context = Arc::new(DotvvmRequestContext::new(http, self.configuration.clone()));
        request.features.insert(context.clone());
        let state = transition(PipelineState::Uninitialized, PipelineState::ContextBuilt);

        for stage in &self.stages {
            let handled = stage.handle(&context).await.inspect_err(|err| {
                warn!(stage = stage.name(), error = %err, "pipeline stage failed");
            })?;
            if let Some(response) = handled {
                transition(state, PipelineState::Handled(stage.name()));
                info!(
                    stage = stage.name(),
                    method = %context.http.request.method,
                    path = %context.http.request.path,
                    status = response.status,
                    "request handled"
                );
                return Ok(Dispatch::Handled {
                    stage: stage.name(),
                    response,
                });
            }
        }
        transition(state, PipelineState::Dispatched);
        Ok(Dispatch::Forward(request))
    }

    fn dump_configuration_once(&self) {
        if self
            .configuration_dumped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            (self.dumper)(&self.configuration);
        }
    }
}

fn transition(from: PipelineState, to: PipelineState) -> PipelineState {
    debug!(from = ?from, to = ?to, "pipeline state");
    to
}

/// Route behind `url` with the authorization check applied. `None` means no
/// route matched; `Err` carries the denial response.
pub(crate) fn authorized_route<'c>(
    context: &'c DotvvmRequestContext,
    url: &str,
) -> Option<Result<(&'c RouteDefinition, RouteParameters), HttpResponse>> {
    let (route, parameters) = context.configuration.find_route(url)?;
    Some(match context.authorize(route) {
        Some(denied) => Err(denied),
        None => Ok((route, parameters)),
    })
}

/// Requires the client runtime and the view's `@resource` entries.
pub(crate) fn require_page_resources(
    context: &DotvvmRequestContext,
    view: &ResolvedTreeRoot,
) -> Result<(), DotvvmError> {
    context.require_resource(CLIENT_RUNTIME_RESOURCE)?;
    if let Some(list) = view.directives.get(RESOURCE_DIRECTIVE) {
        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            context.require_resource(name)?;
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use dotvvm_core::types::TypeDescriptor;
    use dotvvm_core::{
        AuthorizePolicy, CommandError, CommandOutcome, DotvvmConfiguration, PagePresenter, RouteDefinition,
        RouteParameters, TrackedViewModel, TypeRef, ViewModelPath,
    };
    use serde_json::{Value, json};
    use std::sync::Arc;

    pub struct CounterPresenter;

    impl PagePresenter for CounterPresenter {
        fn init_view_model(&self, parameters: &RouteParameters) -> Result<TrackedViewModel, CommandError> {
            let start: i64 = parameters.get("start").and_then(|s| s.parse().ok()).unwrap_or(0);
            Ok(TrackedViewModel::new(
                "CounterPage",
                json!({"Title": "Counter", "Count": start, "Step": 1}),
            ))
        }

        fn execute_command(
            &self,
            command: &str,
            args: &[Value],
            view_model: &mut TrackedViewModel,
        ) -> Result<CommandOutcome, CommandError> {
            match command {
                "Increment()" => {
                    let count = view_model.get_str("Count").and_then(Value::as_i64).unwrap_or(0);
                    let step = view_model.get_str("Step").and_then(Value::as_i64).unwrap_or(1);
                    view_model.set(&ViewModelPath::root().property("Count"), json!(count + step))?;
                    Ok(CommandOutcome::Completed)
                }
                "GoTo(Count)" => {
                    let target = args.first().and_then(Value::as_i64).unwrap_or_default();
                    Ok(CommandOutcome::Redirect(format!("/counter/{target}")))
                }
                other => Err(CommandError::UnknownCommand(other.to_string())),
            }
        }
    }

    pub const COUNTER_VIEW: &str = "@viewModel CounterPage\n@resource site\n<html><body>\
        <h1>{{value: Title}}</h1>\
        <dot:Button Text=\"+\" Click=\"{command: Increment()}\" />\
        <dot:Button Text=\"go\" Click=\"{command: GoTo(Count)}\" />\
        </body></html>";

    pub fn configuration(debug: bool, application_path: &std::path::Path) -> Arc<DotvvmConfiguration> {
        let mut builder = DotvvmConfiguration::builder(application_path);
        builder
            .debug(debug)
            .virtual_directory("app")
            .register_type(
                TypeDescriptor::new("CounterPage")
                    .property("Title", TypeRef::String)
                    .property("Count", TypeRef::Int)
                    .property_with_direction("Step", TypeRef::Int, dotvvm_core::Direction::SERVER_TO_CLIENT)
                    .method("Increment", Vec::new())
                    .method("GoTo", vec![TypeRef::Int]),
            )
            .add_resource(dotvvm_core::ResourceDefinition::stylesheet("site", "/site.css"))
            .add_view("counter.dothtml", COUNTER_VIEW)
            .add_route(
                RouteDefinition::new("counter", "counter/{start?}", "counter.dothtml", Arc::new(CounterPresenter))
                    .unwrap(),
            )
            .add_route(
                RouteDefinition::new("admin", "admin", "counter.dothtml", Arc::new(CounterPresenter))
                    .unwrap()
                    .with_policy(AuthorizePolicy::roles("Admin")),
            );
        builder.build().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::configuration;
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Teapot;

    #[async_trait]
    impl DotvvmMiddleware for Teapot {
        fn name(&self) -> &'static str {
            "teapot"
        }

        async fn handle(&self, context: &DotvvmRequestContext) -> Result<Option<HttpResponse>, DotvvmError> {
            Ok(context
                .route_url()
                .filter(|url| url == "tea")
                .map(|_| HttpResponse::status(418, "teapot")))
        }
    }

    struct Failing;

    #[async_trait]
    impl DotvvmMiddleware for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn handle(&self, _context: &DotvvmRequestContext) -> Result<Option<HttpResponse>, DotvvmError> {
            Err(DotvvmError::BadRequest("boom".into()))
        }
    }

    #[tokio::test]
    async fn first_handling_stage_wins_and_the_rest_forward() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = DotvvmPipeline::with_stages(configuration(false, dir.path()), vec![Arc::new(Teapot)]);

        match pipeline.dispatch(HostRequest::get("/app/tea")).await.unwrap() {
            Dispatch::Handled { stage, response } => {
                assert_eq!(stage, "teapot");
                assert_eq!(response.status, 418);
            }
            other => panic!("unexpected {other:?}"),
        }

        let forwarded = pipeline.dispatch(HostRequest::get("/app/coffee")).await.unwrap();
        assert_eq!(forwarded.state(), PipelineState::Dispatched);
        let Dispatch::Forward(request) = forwarded else {
            panic!("expected forward");
        };
        let context = DotvvmRequestContext::current(&request).unwrap();
        assert_eq!(context.route_url().as_deref(), Some("coffee"));
    }

    #[tokio::test]
    async fn stage_errors_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = DotvvmPipeline::with_stages(
            configuration(false, dir.path()),
            vec![Arc::new(Failing), Arc::new(Teapot)],
        );
        let err = pipeline.dispatch(HostRequest::get("/app/tea")).await.unwrap_err();
        assert!(matches!(err, DotvvmError::BadRequest(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn configuration_is_dumped_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let pipeline = Arc::new(
            DotvvmPipeline::new(configuration(true, dir.path())).with_dumper(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let requests = (0..16).map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.dispatch(HostRequest::get("/app/nothing")).await })
        });
        for result in futures::future::join_all(requests).await {
            assert!(matches!(result.unwrap().unwrap(), Dispatch::Forward(_)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn default_dump_writes_the_tooling_file_in_debug_mode() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = DotvvmPipeline::new(configuration(true, dir.path()));
        pipeline.dispatch(HostRequest::get("/app/nothing")).await.unwrap();
        assert!(
            dir.path()
                .join(".dotvvm")
                .join(dotvvm_core::config::SERIALIZED_CONFIG_FILE_NAME)
                .is_file()
        );
        assert_eq!(
            pipeline.stage_names(),
            ["resource", "spa", "postback", "routing"]
        );
    }
}
