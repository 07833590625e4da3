use super::{DotvvmMiddleware, authorized_route, require_page_resources};
use crate::context::DotvvmRequestContext;
use crate::error::DotvvmError;
use crate::http::HttpResponse;
use async_trait::async_trait;
use dotvvm_core::{CommandOutcome, PostbackResponse, ResolvedTreeRoot};
use tracing::{debug, info};

/// Runs command postbacks: `POST <page url>` with a JSON envelope naming the
/// command, its arguments and the client's view-model changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostbackStage;

/// Whether `command` is the expression of a command binding in `view`.
fn is_bound_command(view: &ResolvedTreeRoot, command: &str) -> bool {
    view.bindings()
        .iter()
        .any(|b| b.kind.is_command() && b.expression_text() == command.trim())
}

#[async_trait]
impl DotvvmMiddleware for PostbackStage {
    fn name(&self) -> &'static str {
        "postback"
    }

    async fn handle(&self, context: &DotvvmRequestContext) -> Result<Option<HttpResponse>, DotvvmError> {
        if !context.is_postback() {
            return Ok(None);
        }
        let Some(url) = context.route_url() else {
            return Ok(None);
        };
        let (route, parameters) = match authorized_route(context, &url) {
            None => return Ok(None),
            Some(Err(denied)) => return Ok(Some(denied)),
            Some(Ok(found)) => found,
        };

        let view = context
            .configuration
            .view_compiler
            .compile_view(&route.virtual_path)?;
        let body = context
            .http
            .request
            .body_text()
            .map_err(|e| DotvvmError::BadRequest(format!("postback body is not UTF-8: {e}")))?;
        let serializer = context.serializer();
        let request = serializer.parse_postback_request(body)?;
        if !is_bound_command(&view, &request.command) {
            return Err(DotvvmError::CommandNotInView {
                command: request.command,
                view: route.virtual_path.clone(),
            });
        }

        let mut view_model = route.presenter.init_view_model(&parameters)?;
        let applied = serializer.apply_changes(&request.changes, &mut view_model)?;
        debug!(route = %route.name, applied = applied.len(), "client changes applied");

        let outcome = route
            .presenter
            .execute_command(&request.command, &request.args, &mut view_model)?;
        info!(route = %route.name, command = %request.command, ?outcome, "command executed");

        let response = match outcome {
            CommandOutcome::Completed => {
                require_page_resources(context, &view)?;
                let mut response = serializer.build_postback_response(&view_model, context.required_resources())?;
                response.resource_links = context.resource_links();
                response
            }
            CommandOutcome::Redirect(url) => PostbackResponse::redirect(context.app_url(&url)),
        };
        Ok(Some(HttpResponse::json(serializer.serialize_response(&response)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HostRequest;
    use crate::middleware::test_support::configuration;
    use crate::middleware::{Dispatch, DotvvmPipeline};
    use dotvvm_core::PostbackAction;
    use serde_json::json;

    fn postback(path: &str, body: serde_json::Value) -> HostRequest {
        HostRequest::post(path, body.to_string())
    }

    async fn run(request: HostRequest) -> Result<PostbackResponse, DotvvmError> {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = DotvvmPipeline::new(configuration(false, dir.path()));
        match pipeline.dispatch(request).await? {
            Dispatch::Handled { stage, response } => {
                assert_eq!(stage, "postback");
                assert_eq!(response.status, 200);
                Ok(serde_json::from_str(&response.body).unwrap())
            }
            Dispatch::Forward(_) => panic!("postback was not handled"),
        }
    }

    #[tokio::test]
    async fn command_result_contains_only_the_diff() {
        let response = run(postback(
            "/app/counter",
            json!({
                "command": "Increment()",
                "args": [],
                "$type": "CounterPage",
                "viewModel": {"Title": "Changed", "Count": 10},
                "modified": ["Count"]
            }),
        ))
        .await
        .unwrap();
        assert_eq!(response.action, PostbackAction::SuccessfulCommand);
        assert_eq!(response.view_model_diff, Some(json!({"Count": 11})));
        assert_eq!(response.resources, ["dotvvm", "site"]);
        let site = &response.resource_links[1];
        assert_eq!((site.name.as_str(), site.href.as_str()), ("site", "/site.css"));
        assert_eq!(site.resource_type, dotvvm_core::ResourceType::Stylesheet);
    }

    #[tokio::test]
    async fn redirects_are_passed_to_the_client() {
        let response = run(postback(
            "/app/counter/3",
            json!({"command": "GoTo(Count)", "args": [7], "viewModel": {}, "modified": []}),
        ))
        .await
        .unwrap();
        assert_eq!(response.action, PostbackAction::Redirect);
        assert_eq!(response.url.as_deref(), Some("/app/counter/7"));
    }

    #[tokio::test]
    async fn rejects_commands_missing_from_the_view() {
        let err = run(postback(
            "/app/counter",
            json!({"command": "DeleteEverything()", "viewModel": {}, "modified": []}),
        ))
        .await
        .unwrap_err();
        assert!(matches!(err, DotvvmError::CommandNotInView { .. }));
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn server_only_properties_are_ignored_in_postbacks() {
        let response = run(postback(
            "/app/counter",
            json!({
                "command": "Increment()",
                "viewModel": {"Title": "Renamed", "Count": 1, "Step": 100},
                "modified": ["Step", "Count"]
            }),
        ))
        .await
        .unwrap();
        assert_eq!(response.action, PostbackAction::SuccessfulCommand);
        assert_eq!(response.view_model_diff, Some(json!({"Count": 2})));
    }
}
