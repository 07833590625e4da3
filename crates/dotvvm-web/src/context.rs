use crate::error::DotvvmError;
use crate::http::{
    DotvvmHttpContext, HostRequest, HttpResponse, clean_request_url, preferred_language, resolve_app_url,
    virtual_directory,
};
use crate::resources::ResourceManager;
use dotvvm_core::security::authorize;
use dotvvm_core::{
    AuthorizationOutcome, DotvvmConfiguration, Principal, ResourceLink, RouteDefinition, ViewModelSerializer,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Header sent by the client runtime with command postbacks.
pub const POSTBACK_HEADER: &str = "x-dotvvm-postback";
/// Header sent by the client runtime with SPA navigations.
pub const SPA_HEADER: &str = "x-dotvvm-spacontentplaceholder";

/// Everything the stages need about the request in flight. One per request;
/// stored in the request's [`Features`](crate::http::Features).
#[derive(Debug)]
pub struct DotvvmRequestContext {
    pub http: Arc<DotvvmHttpContext>,
    pub configuration: Arc<DotvvmConfiguration>,
    pub culture: String,
    resources: Mutex<ResourceManager>,
}

impl DotvvmRequestContext {
    pub fn new(http: Arc<DotvvmHttpContext>, configuration: Arc<DotvvmConfiguration>) -> Self {
        let culture = http
            .culture
            .clone()
            .or_else(|| http.request.header("accept-language").and_then(preferred_language))
            .unwrap_or_else(|| configuration.default_culture.clone());
        Self {
            http,
            configuration,
            culture,
            resources: Mutex::new(ResourceManager::new()),
        }
    }

    /// Context of a request that already went through the pipeline.
    pub fn current(request: &HostRequest) -> Option<Arc<Self>> {
        request.features.get::<Self>()
    }

    pub fn serializer(&self) -> &dyn ViewModelSerializer {
        self.configuration.serializer.as_ref()
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.http.principal()
    }

    pub fn virtual_directory(&self) -> &str {
        virtual_directory(&self.http, &self.configuration.virtual_directory)
    }

    /// Browser url of an application url, see [`resolve_app_url`].
    pub fn app_url(&self, url: &str) -> String {
        resolve_app_url(self.virtual_directory(), url)
    }

    /// Route url of the request, `None` outside the virtual directory.
    pub fn route_url(&self) -> Option<String> {
        clean_request_url(&self.http, &self.configuration.virtual_directory)
    }

    pub fn is_postback(&self) -> bool {
        let request = &self.http.request;
        request.is_post()
            && (request.header(POSTBACK_HEADER).is_some()
                || request
                    .header("content-type")
                    .is_some_and(|ct| ct.starts_with("application/json")))
    }

    pub fn require_resource(&self, name: &str) -> Result<(), DotvvmError> {
        self.resources.lock().require(&self.configuration.resources, name)
    }

    pub fn required_resources(&self) -> Vec<String> {
        self.resources.lock().required().to_vec()
    }

    pub fn resource_links(&self) -> Vec<ResourceLink> {
        self.resources
            .lock()
            .links(&self.configuration.resources, self.virtual_directory())
    }

    pub fn resource_tags(&self) -> String {
        self.resources
            .lock()
            .render_tags(&self.configuration.resources, self.virtual_directory())
    }

    /// 401/403 response when the route's policies deny the current user.
    pub fn authorize(&self, route: &RouteDefinition) -> Option<HttpResponse> {
        let outcome = authorize(
            self.configuration.policy_evaluator.as_ref(),
            &route.policies,
            self.principal(),
        );
        match outcome {
            AuthorizationOutcome::Allowed => None,
            denied => {
                debug!(route = %route.name, status = denied.status_code(), "route authorization denied");
                let response = HttpResponse::status(denied.status_code(), reason_phrase(denied));
                Some(match denied {
                    AuthorizationOutcome::Challenge => response.with_header("www-authenticate", "Bearer"),
                    _ => response,
                })
            }
        }
    }
}

fn reason_phrase(outcome: AuthorizationOutcome) -> &'static str {
    match outcome {
        AuthorizationOutcome::Allowed => "OK",
        AuthorizationOutcome::Challenge => "Unauthorized",
        AuthorizationOutcome::Forbid => "Forbidden",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{RequestCulture, convert_http_context};
    use dotvvm_core::{AuthorizePolicy, StaticPresenter};
    use serde_json::json;

    fn configuration() -> Arc<DotvvmConfiguration> {
        let mut builder = DotvvmConfiguration::builder(".");
        builder.default_culture("de-DE").virtual_directory("app");
        builder.build().unwrap()
    }

    #[test]
    fn culture_falls_back_to_the_configured_default() {
        let config = configuration();

        let mut plain = HostRequest::get("/app/");
        let ctx = DotvvmRequestContext::new(convert_http_context(&mut plain), config.clone());
        assert_eq!(ctx.culture, "de-DE");

        let mut header = HostRequest::get("/app/").with_header("Accept-Language", "fr-FR,fr;q=0.9");
        let ctx = DotvvmRequestContext::new(convert_http_context(&mut header), config.clone());
        assert_eq!(ctx.culture, "fr-FR");

        let mut feature = HostRequest::get("/app/").with_header("Accept-Language", "fr-FR");
        feature.features.insert(Arc::new(RequestCulture("cs-CZ".into())));
        let ctx = DotvvmRequestContext::new(convert_http_context(&mut feature), config);
        assert_eq!(ctx.culture, "cs-CZ");
    }

    #[test]
    fn authorization_maps_to_401_and_403() {
        let config = configuration();
        let route = RouteDefinition::new(
            "admin",
            "admin",
            "admin.dothtml",
            Arc::new(StaticPresenter::new("Page", json!({}))),
        )
        .unwrap()
        .with_policy(AuthorizePolicy::roles("Admin"));

        let mut anonymous = HostRequest::get("/app/admin");
        let ctx = DotvvmRequestContext::new(convert_http_context(&mut anonymous), config.clone());
        assert_eq!(ctx.authorize(&route).map(|r| r.status), Some(401));
        assert_eq!(ctx.route_url().as_deref(), Some("admin"));

        let mut user = HostRequest::get("/app/admin").with_principal(Principal::authenticated("bob", "Cookies"));
        let ctx = DotvvmRequestContext::new(convert_http_context(&mut user), config.clone());
        assert_eq!(ctx.authorize(&route).map(|r| r.status), Some(403));

        let mut admin = HostRequest::get("/app/admin")
            .with_principal(Principal::authenticated("eve", "Cookies").with_role("Admin"));
        let ctx = DotvvmRequestContext::new(convert_http_context(&mut admin), config);
        assert!(ctx.authorize(&route).is_none());
    }
}
