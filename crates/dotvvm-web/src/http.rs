//! Host-independent view of an HTTP request and response.
//!
//! Hosts translate their request type into a [`HostRequest`]; the pipeline
//! only ever sees the [`DotvvmHttpContext`] built from it by
//! [`convert_http_context`], which is cached in the request's [`Features`].

use dotvvm_core::Principal;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Per-request typed storage shared between the host and the pipeline.
#[derive(Default, Clone)]
pub struct Features {
    items: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Features {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, value: Arc<T>) -> Option<Arc<T>> {
        self.items
            .insert(TypeId::of::<T>(), value)
            .and_then(|old| old.downcast::<T>().ok())
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.items
            .get(&TypeId::of::<T>())
            .and_then(|value| value.clone().downcast::<T>().ok())
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.items.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl fmt::Debug for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Features")
            .field("len", &self.items.len())
            .finish()
    }
}

/// Culture chosen by the host (e.g. from a cookie); wins over `Accept-Language`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestCulture(pub String);

/// Request as handed over by the host.
#[derive(Debug, Clone, Default)]
pub struct HostRequest {
    pub method: String,
    /// Path below `path_base`, starting with `/`.
    pub path: String,
    /// Mount point of the application in the host, e.g. `/app`.
    pub path_base: String,
    /// Raw query string without the leading `?`.
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub features: Features,
}

impl HostRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (path, None),
        };
        Self {
            method: method.into(),
            path,
            query,
            ..Self::default()
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new("POST", path)
            .with_header("content-type", "application/json")
            .with_body(body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_path_base(mut self, path_base: impl Into<String>) -> Self {
        self.path_base = path_base.into();
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.features.insert(Arc::new(principal));
        self
    }
}

/// Request capabilities the framework relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DotvvmHttpRequest {
    pub method: String,
    pub path: String,
    pub path_base: String,
    pub query: BTreeMap<String, String>,
    /// Header names are lowercased.
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    #[serde(skip)]
    pub body: Vec<u8>,
}

impl DotvvmHttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn body_text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }

    pub fn is_post(&self) -> bool {
        self.method.eq_ignore_ascii_case("POST")
    }

    /// Full url path including the mount point.
    pub fn url(&self) -> String {
        format!("{}{}", self.path_base.trim_end_matches('/'), self.path)
    }
}

/// Host-independent wrapper of one request. Built once per request.
#[derive(Debug, Clone)]
pub struct DotvvmHttpContext {
    pub request: DotvvmHttpRequest,
    pub user: Option<Arc<Principal>>,
    pub culture: Option<String>,
}

impl DotvvmHttpContext {
    pub fn principal(&self) -> Option<&Principal> {
        self.user.as_deref()
    }
}

/// Wrapper of `request`, created on first use and reused afterwards, so every
/// lookup during one request observes the same instance.
pub fn convert_http_context(request: &mut HostRequest) -> Arc<DotvvmHttpContext> {
    if let Some(existing) = request.features.get::<DotvvmHttpContext>() {
        return existing;
    }
    let headers = headers_to_map(&request.headers);
    let cookies = headers
        .get("cookie")
        .map(|raw| parse_cookies(raw))
        .unwrap_or_default();
    let context = Arc::new(DotvvmHttpContext {
        request: DotvvmHttpRequest {
            method: request.method.to_ascii_uppercase(),
            path: ensure_leading_slash(&request.path),
            path_base: request.path_base.trim_end_matches('/').to_string(),
            query: request.query.as_deref().map(parse_query).unwrap_or_default(),
            headers,
            cookies,
            body: request.body.clone(),
        },
        user: request.features.get::<Principal>(),
        culture: request.features.get::<RequestCulture>().map(|c| c.0.clone()),
    });
    request.features.insert(context.clone());
    context
}

/// Response produced by a pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, content_type: &str, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body: body.into(),
        }
    }

    pub fn html(body: impl Into<String>) -> Self {
        Self::new(200, "text/html; charset=utf-8", body)
    }

    pub fn json(body: impl Into<String>) -> Self {
        Self::new(200, "application/json; charset=utf-8", body)
    }

    pub fn javascript(body: impl Into<String>) -> Self {
        Self::new(200, "text/javascript; charset=utf-8", body)
    }

    pub fn css(body: impl Into<String>) -> Self {
        Self::new(200, "text/css; charset=utf-8", body)
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::new(status, "text/plain; charset=utf-8", message)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Base path of the application for this request: the host's mount point,
/// or the configured virtual directory.
pub fn virtual_directory<'a>(context: &'a DotvvmHttpContext, configured: &'a str) -> &'a str {
    if context.request.path_base.is_empty() {
        configured
    } else {
        &context.request.path_base
    }
}

/// Whether `url` lies under `virtual_directory`; on success the prefix is
/// removed from `url`, leaving a path that starts with `/`.
pub fn is_in_current_virtual_directory(virtual_directory: &str, url: &mut String) -> bool {
    let base = virtual_directory.trim_end_matches('/');
    if base.is_empty() {
        *url = ensure_leading_slash(url);
        return true;
    }
    let Some(rest) = url.strip_prefix(base) else {
        return false;
    };
    if !rest.is_empty() && !rest.starts_with('/') {
        return false;
    }
    *url = ensure_leading_slash(rest);
    true
}

/// Route url of the request: path without the virtual directory, without
/// leading or trailing slashes.
pub fn clean_request_url(context: &DotvvmHttpContext, configured_virtual_directory: &str) -> Option<String> {
    let mut url = context.request.path.clone();
    // The host already stripped its own mount point from `path`.
    if context.request.path_base.is_empty()
        && !is_in_current_virtual_directory(configured_virtual_directory, &mut url)
    {
        return None;
    }
    Some(url.trim_matches('/').to_string())
}

/// Browser url of an application url. Absolute urls (with a scheme or
/// starting with `//`) are returned as they are; anything else, including
/// `~/`-prefixed urls, is placed under `virtual_directory`.
pub fn resolve_app_url(virtual_directory: &str, url: &str) -> String {
    if url.starts_with("//") || url.contains("://") {
        return url.to_string();
    }
    let path = url.strip_prefix('~').unwrap_or(url);
    format!(
        "{}{}",
        virtual_directory.trim_end_matches('/'),
        ensure_leading_slash(path)
    )
}

fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

pub(crate) fn headers_to_map(headers: &[(String, String)]) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, value) in headers {
        out.entry(name.to_ascii_lowercase())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.clone());
    }
    out
}

pub(crate) fn parse_query(raw: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or_default();
        let value = parts.next().unwrap_or_default();
        if !key.is_empty() {
            out.insert(key.to_string(), value.replace('+', " "));
        }
    }
    out
}

pub(crate) fn parse_cookies(raw: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for item in raw.split(';') {
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next().unwrap_or_default().trim();
        let value = parts.next().unwrap_or_default().trim();
        if !key.is_empty() {
            out.insert(key.to_string(), value.to_string());
        }
    }
    out
}

/// Preferred culture from an `Accept-Language` header, ignoring weights.
pub(crate) fn preferred_language(accept_language: &str) -> Option<String> {
    accept_language
        .split(',')
        .map(|item| item.split(';').next().unwrap_or_default().trim())
        .find(|lang| !lang.is_empty() && *lang != "*")
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_built_once_per_request() {
        let mut request = HostRequest::get("/customers/1?page=2&sort=name+asc")
            .with_header("Cookie", "a=1; b = two")
            .with_header("X-Test", "x");
        let first = convert_http_context(&mut request);
        let second = convert_http_context(&mut request);
        assert!(Arc::ptr_eq(&first, &second));

        assert_eq!(first.request.method, "GET");
        assert_eq!(first.request.path, "/customers/1");
        assert_eq!(first.request.query["sort"], "name asc");
        assert_eq!(first.request.cookies["b"], "two");
        assert_eq!(first.request.header("x-test"), Some("x"));
        assert!(first.user.is_none());

        let mut other = HostRequest::get("/customers/1");
        assert!(!Arc::ptr_eq(&first, &convert_http_context(&mut other)));
    }

    #[test]
    fn principal_and_culture_come_from_features() {
        let mut request = HostRequest::get("/").with_principal(Principal::authenticated("ann", "Cookies"));
        request
            .features
            .insert(Arc::new(RequestCulture("cs-CZ".to_string())));
        let context = convert_http_context(&mut request);
        assert_eq!(context.principal().and_then(|p| p.name.as_deref()), Some("ann"));
        assert_eq!(context.culture.as_deref(), Some("cs-CZ"));
    }

    #[test]
    fn virtual_directory_prefix_is_stripped() {
        let mut url = "/app/customers".to_string();
        assert!(is_in_current_virtual_directory("/app", &mut url));
        assert_eq!(url, "/customers");

        let mut url = "/app".to_string();
        assert!(is_in_current_virtual_directory("/app/", &mut url));
        assert_eq!(url, "/");

        let mut url = "/application".to_string();
        assert!(!is_in_current_virtual_directory("/app", &mut url));
        assert_eq!(url, "/application");

        let mut url = "x".to_string();
        assert!(is_in_current_virtual_directory("", &mut url));
        assert_eq!(url, "/x");
    }

    #[test]
    fn app_urls_are_placed_under_the_virtual_directory() {
        assert_eq!(resolve_app_url("/app", "/counter/7"), "/app/counter/7");
        assert_eq!(resolve_app_url("/app/", "counter"), "/app/counter");
        assert_eq!(resolve_app_url("/app", "~/login"), "/app/login");
        assert_eq!(resolve_app_url("", "/login"), "/login");
        assert_eq!(resolve_app_url("/app", "https://example.com/x"), "https://example.com/x");
        assert_eq!(resolve_app_url("/app", "//cdn.example/x"), "//cdn.example/x");
    }

    #[test]
    fn clean_url_respects_host_mount_point() {
        let mut mounted = HostRequest::get("/customers/").with_path_base("/app");
        let context = convert_http_context(&mut mounted);
        assert_eq!(clean_request_url(&context, "/ignored").as_deref(), Some("customers"));
        assert_eq!(context.request.url(), "/app/customers/");

        let mut plain = HostRequest::get("/app/customers");
        let context = convert_http_context(&mut plain);
        assert_eq!(clean_request_url(&context, "/app").as_deref(), Some("customers"));
        assert_eq!(clean_request_url(&context, "/other"), None);
    }

    #[test]
    fn accept_language_picks_the_first_entry() {
        assert_eq!(preferred_language("cs-CZ,cs;q=0.9,en;q=0.8").as_deref(), Some("cs-CZ"));
        assert_eq!(preferred_language("*"), None);
    }
}
