use super::DotvvmMiddleware;
use crate::context::DotvvmRequestContext;
use crate::error::DotvvmError;
use crate::http::HttpResponse;
use crate::resources::find_resource;
use async_trait::async_trait;
use dotvvm_core::ResourceType;
use tracing::debug;

/// First path segment of embedded resource urls.
pub const RESOURCE_URL_PREFIX: &str = "dotvvmResource";

/// Serves embedded resources (the client runtime among them) at
/// `<vdir>/dotvvmResource/{name}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceStage;

#[async_trait]
impl DotvvmMiddleware for ResourceStage {
    fn name(&self) -> &'static str {
        "resource"
    }

    async fn handle(&self, context: &DotvvmRequestContext) -> Result<Option<HttpResponse>, DotvvmError> {
        if !context.http.request.is_get() {
            return Ok(None);
        }
        let Some(url) = context.route_url() else {
            return Ok(None);
        };
        let Some(name) = url
            .strip_prefix(RESOURCE_URL_PREFIX)
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            return Ok(None);
        };

        let content = find_resource(&context.configuration.resources, name)
            .and_then(|resource| resource.content.map(|content| (resource.resource_type, content)));
        let Some((resource_type, content)) = content else {
            debug!(resource = %name, "no embedded resource with this name");
            return Ok(Some(HttpResponse::status(404, format!("resource '{name}' not found"))));
        };
        let response = match resource_type {
            ResourceType::Script => HttpResponse::javascript(content),
            ResourceType::Stylesheet => HttpResponse::css(content),
        };
        let cache_control = if context.configuration.debug {
            "no-cache"
        } else {
            "public, max-age=86400"
        };
        Ok(Some(response.with_header("cache-control", cache_control)))
    }
}
