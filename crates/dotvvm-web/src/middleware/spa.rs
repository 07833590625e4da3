use super::{DotvvmMiddleware, authorized_route, require_page_resources};
use crate::context::DotvvmRequestContext;
use crate::error::DotvvmError;
use crate::http::HttpResponse;
use async_trait::async_trait;
use dotvvm_core::PostbackResponse;
use tracing::debug;

/// First path segment of SPA navigation requests.
pub const SPA_URL_PREFIX: &str = "___dotvvm-spa___";

/// Answers `GET <vdir>/___dotvvm-spa___/<path>` with the JSON navigation
/// payload of the page at `<path>`: its full view model and resources.
/// Pages the user may not see answer with a redirect to their full url, so
/// the host's challenge runs on a regular page load.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpaStage;

/// Page url of an SPA request url, without slashes at either end.
pub fn spa_target(url: &str) -> Option<&str> {
    let rest = url.strip_prefix(SPA_URL_PREFIX)?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    Some(rest.trim_matches('/'))
}

#[async_trait]
impl DotvvmMiddleware for SpaStage {
    fn name(&self) -> &'static str {
        "spa"
    }

    async fn handle(&self, context: &DotvvmRequestContext) -> Result<Option<HttpResponse>, DotvvmError> {
        if !context.http.request.is_get() {
            return Ok(None);
        }
        let Some(url) = context.route_url() else {
            return Ok(None);
        };
        let Some(target) = spa_target(&url) else {
            return Ok(None);
        };
        let (route, parameters) = match authorized_route(context, target) {
            None => {
                debug!(url = %target, "SPA navigation to an unknown page");
                return Ok(Some(HttpResponse::status(404, "page not found")));
            }
            Some(Err(denied)) => {
                debug!(url = %target, status = denied.status, "SPA navigation denied, redirecting");
                let response = PostbackResponse::redirect(context.app_url(target));
                return Ok(Some(HttpResponse::json(context.serializer().serialize_response(&response)?)));
            }
            Some(Ok(found)) => found,
        };

        let view = context
            .configuration
            .view_compiler
            .compile_view(&route.virtual_path)?;
        require_page_resources(context, &view)?;
        let view_model = route.presenter.init_view_model(&parameters)?;

        let display_url = format!("{}/{}", context.virtual_directory(), target);
        let serializer = context.serializer();
        let mut response =
            serializer.build_navigation_response(&view_model, context.required_resources(), Some(display_url))?;
        response.resource_links = context.resource_links();
        debug!(route = %route.name, "SPA navigation payload built");
        Ok(Some(HttpResponse::json(serializer.serialize_response(&response)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HostRequest;
    use crate::middleware::test_support::configuration;
    use crate::middleware::{Dispatch, DotvvmPipeline};
    use dotvvm_core::{PostbackAction, Principal};
    use serde_json::json;

    #[test]
    fn extracts_the_page_url() {
        assert_eq!(spa_target("___dotvvm-spa___/counter/5"), Some("counter/5"));
        assert_eq!(spa_target("___dotvvm-spa___"), Some(""));
        assert_eq!(spa_target("___dotvvm-spa___x"), None);
        assert_eq!(spa_target("counter"), None);
    }

    #[tokio::test]
    async fn returns_the_navigation_payload() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = DotvvmPipeline::new(configuration(false, dir.path()));

        let Dispatch::Handled { stage, response } = pipeline
            .dispatch(HostRequest::get("/app/___dotvvm-spa___/counter/5"))
            .await
            .unwrap()
        else {
            panic!("SPA request should be handled");
        };
        assert_eq!(stage, "spa");
        let payload: PostbackResponse = serde_json::from_str(&response.body).unwrap();
        assert_eq!(payload.action, PostbackAction::SuccessfulCommand);
        assert_eq!(payload.resources, ["dotvvm", "site"]);
        let hrefs: Vec<&str> = payload.resource_links.iter().map(|l| l.href.as_str()).collect();
        assert_eq!(hrefs, ["/app/dotvvmResource/dotvvm", "/site.css"]);
        assert_eq!(payload.url.as_deref(), Some("/app/counter/5"));
        assert_eq!(
            payload.view_model,
            Some(json!({"Title": "Counter", "Count": 5, "Step": 1}))
        );
    }

    #[tokio::test]
    async fn unknown_pages_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = DotvvmPipeline::new(configuration(false, dir.path()));

        let Dispatch::Handled { response, .. } = pipeline
            .dispatch(HostRequest::get("/app/___dotvvm-spa___/missing"))
            .await
            .unwrap()
        else {
            panic!("unknown SPA pages are answered");
        };
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn denied_pages_redirect_to_their_full_url() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = DotvvmPipeline::new(configuration(false, dir.path()));

        let anonymous = HostRequest::get("/app/___dotvvm-spa___/admin");
        let signed_in = HostRequest::get("/app/___dotvvm-spa___/admin")
            .with_principal(Principal::authenticated("bob", "Cookies"));
        for request in [anonymous, signed_in] {
            let Dispatch::Handled { stage, response } = pipeline.dispatch(request).await.unwrap() else {
                panic!("denied pages are answered");
            };
            assert_eq!(stage, "spa");
            assert_eq!(response.status, 200);
            assert_eq!(response.header("content-type"), Some("application/json; charset=utf-8"));
            let payload: PostbackResponse = serde_json::from_str(&response.body).unwrap();
            assert_eq!(payload.action, PostbackAction::Redirect);
            assert_eq!(payload.url.as_deref(), Some("/app/admin"));
            assert_eq!(payload.view_model, None);
        }
    }
}
