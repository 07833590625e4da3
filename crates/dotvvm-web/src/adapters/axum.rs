use crate::context::DotvvmRequestContext;
use crate::http::{Features, HostRequest, HttpResponse, RequestCulture};
use crate::middleware::{Dispatch, DotvvmPipeline};
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::{Next, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use dotvvm_core::Principal;
use std::sync::Arc;
use tracing::error;

/// Largest request body read into memory for the pipeline.
pub const DEFAULT_BODY_LIMIT: usize = 4 * 1024 * 1024;

/// Mounts a [`DotvvmPipeline`] in front of an axum router.
///
/// Requests the pipeline does not handle continue to the wrapped router with
/// their body intact and the request context in their extensions.
#[derive(Clone)]
pub struct AxumDotvvmAdapter {
    pipeline: Arc<DotvvmPipeline>,
    path_base: String,
    body_limit: usize,
}

impl AxumDotvvmAdapter {
    pub fn new(pipeline: Arc<DotvvmPipeline>) -> Self {
        Self {
            pipeline,
            path_base: String::new(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    /// Mount point when the router is nested below a prefix.
    pub fn with_path_base(mut self, path_base: impl Into<String>) -> Self {
        self.path_base = path_base.into();
        self
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn pipeline(&self) -> &Arc<DotvvmPipeline> {
        &self.pipeline
    }

    /// Wraps `router`: the pipeline runs first, `router` sees what it forwards.
    pub fn attach(self, router: Router) -> Router {
        router.layer(from_fn_with_state(self, dotvvm_middleware))
    }

    /// Router serving only the pipeline; everything else is a 404.
    pub fn router(self) -> Router {
        self.attach(Router::new().fallback(|| async { StatusCode::NOT_FOUND }))
    }
}

pub async fn dotvvm_middleware(State(adapter): State<AxumDotvvmAdapter>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();
    let body = match to_bytes(body, adapter.body_limit).await {
        Ok(bytes) => bytes,
        Err(err) => return (StatusCode::PAYLOAD_TOO_LARGE, err.to_string()).into_response(),
    };

    let mut features = Features::new();
    if let Some(principal) = parts.extensions.get::<Principal>() {
        features.insert(Arc::new(principal.clone()));
    }
    if let Some(culture) = parts.extensions.get::<RequestCulture>() {
        features.insert(Arc::new(culture.clone()));
    }
    let host = HostRequest {
        method: parts.method.as_str().to_string(),
        path: parts.uri.path().to_string(),
        path_base: adapter.path_base.clone(),
        query: parts.uri.query().map(str::to_string),
        headers: header_pairs(&parts.headers),
        body: body.to_vec(),
        features,
    };

    match adapter.pipeline.dispatch(host).await {
        Ok(Dispatch::Handled { response, .. }) => into_axum(response),
        Ok(Dispatch::Forward(host)) => {
            if let Some(context) = host.features.get::<DotvvmRequestContext>() {
                parts.extensions.insert(context);
            }
            next.run(Request::from_parts(parts, Body::from(host.body))).await
        }
        Err(err) => {
            let status = err.status_code();
            error!(status, path = %parts.uri.path(), error = %err, "dotvvm request failed");
            let message = if status >= 500 && !adapter.pipeline.configuration().debug {
                "internal server error".to_string()
            } else {
                err.to_string()
            };
            (StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR), message).into_response()
        }
    }
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .collect()
}

fn into_axum(response: HttpResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut out = (status, response.body).into_response();
    for (name, value) in &response.headers {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            out.headers_mut().insert(name, value);
        }
    }
    out
}
