use super::{DotvvmMiddleware, authorized_route, require_page_resources};
use crate::context::DotvvmRequestContext;
use crate::error::DotvvmError;
use crate::http::HttpResponse;
use crate::page::render_page;
use async_trait::async_trait;
use dotvvm_core::SerializationError;
use tracing::debug;

/// Renders full pages for `GET` requests matching a route.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingStage;

#[async_trait]
impl DotvvmMiddleware for RoutingStage {
    fn name(&self) -> &'static str {
        "routing"
    }

    async fn handle(&self, context: &DotvvmRequestContext) -> Result<Option<HttpResponse>, DotvvmError> {
        if !context.http.request.is_get() {
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
        require_page_resources(context, &view)?;
        let view_model = route.presenter.init_view_model(&parameters)?;

        let serializer = context.serializer();
        let mut state = serializer.build_navigation_response(&view_model, context.required_resources(), None)?;
        state.resource_links = context.resource_links();
        let state = serde_json::to_value(&state).map_err(|e| SerializationError::Encode(e.to_string()))?;
        debug!(route = %route.name, view = %route.virtual_path, "rendering page");
        Ok(Some(HttpResponse::html(render_page(context, &view, &state))))
    }
}
