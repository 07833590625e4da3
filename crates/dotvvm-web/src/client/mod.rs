//! Client side of the postback protocol.
//!
//! The browser runtime (`dotvvm-runtime.js`) and this module implement the
//! same state machine; this one runs against any [`ClientHost`], which makes
//! the ordering rules testable without a browser.
//!
//! All requests draw a number from one [`PostbackCounter`]. A response whose
//! number is lower than the last started request is stale and dropped on
//! arrival. The [`PostbackGate`] blocks command postbacks while an SPA
//! navigation is running; only the newest navigation opens it again.

mod navigation;
mod postback;
mod viewmodel;

pub use navigation::{NavigationOutcome, NavigationSequencer};
pub use postback::{PostbackOutcome, PostbackSender};
pub use viewmodel::ClientViewModel;

use crate::error::PostbackError;
use async_trait::async_trait;
use dotvvm_core::PostbackResponse;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Transport and page integration used by the client runtime.
#[async_trait]
pub trait ClientHost: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<PostbackResponse, PostbackError>;

    async fn post_json(&self, url: &str, body: Value) -> Result<PostbackResponse, PostbackError>;

    /// Loads the named resources; resolves once all are available.
    async fn load_resources(&self, resources: &[String]) -> Result<(), PostbackError>;

    /// Called with the display url right before a navigation response is applied.
    fn page_navigating(&self, _url: &str) {}

    async fn handle_redirect(&self, url: &str) -> Result<(), PostbackError>;
}

/// Global request counter. The first request gets 0.
#[derive(Debug, Default)]
pub struct PostbackCounter {
    next: AtomicI64,
}

impl PostbackCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> i64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Number the next request will get.
    pub fn peek(&self) -> i64 {
        self.next.load(Ordering::SeqCst)
    }
}

/// Whether command postbacks may start. Enabling and disabling are idempotent.
#[derive(Debug)]
pub struct PostbackGate {
    enabled: AtomicBool,
}

impl Default for PostbackGate {
    fn default() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }
}

impl PostbackGate {
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaNavigatingArgs {
    pub url: String,
    pub cancel: bool,
}

type NavigatingHandler = Arc<dyn Fn(&mut SpaNavigatingArgs) + Send + Sync>;
type NavigatedHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// `spaNavigating` (cancelable) and `spaNavigated` subscriptions.
#[derive(Default)]
pub struct ClientEvents {
    spa_navigating: Mutex<Vec<NavigatingHandler>>,
    spa_navigated: Mutex<Vec<NavigatedHandler>>,
}

impl std::fmt::Debug for ClientEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientEvents")
            .field("spa_navigating", &self.spa_navigating.lock().len())
            .field("spa_navigated", &self.spa_navigated.lock().len())
            .finish()
    }
}

impl ClientEvents {
    pub fn on_spa_navigating(&self, handler: impl Fn(&mut SpaNavigatingArgs) + Send + Sync + 'static) {
        self.spa_navigating.lock().push(Arc::new(handler));
    }

    pub fn on_spa_navigated(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.spa_navigated.lock().push(Arc::new(handler));
    }

    /// Runs every handler; returns `true` when one of them canceled.
    pub fn raise_spa_navigating(&self, url: &str) -> bool {
        let handlers = self.spa_navigating.lock().clone();
        let mut args = SpaNavigatingArgs {
            url: url.to_string(),
            cancel: false,
        };
        for handler in handlers {
            handler(&mut args);
        }
        args.cancel
    }

    pub fn raise_spa_navigated(&self, url: &str) {
        let handlers = self.spa_navigated.lock().clone();
        for handler in handlers {
            handler(url);
        }
    }
}

/// State shared by the navigation sequencer and the postback sender of one page.
#[derive(Debug)]
pub struct ClientState {
    pub counter: PostbackCounter,
    pub gate: PostbackGate,
    pub events: ClientEvents,
    last_started: AtomicI64,
    spa_ready: AtomicBool,
    current_url: Mutex<String>,
    view_model: Mutex<ClientViewModel>,
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new(ClientViewModel::default(), "/")
    }
}

impl ClientState {
    pub fn new(view_model: ClientViewModel, current_url: impl Into<String>) -> Self {
        Self {
            counter: PostbackCounter::new(),
            gate: PostbackGate::default(),
            events: ClientEvents::default(),
            last_started: AtomicI64::new(-1),
            spa_ready: AtomicBool::new(false),
            current_url: Mutex::new(current_url.into()),
            view_model: Mutex::new(view_model),
        }
    }

    /// Page state as embedded in `window.__DOTVVM__` by the page writer.
    pub fn from_bootstrap(bootstrap: &Value, current_url: impl Into<String>) -> Result<Self, PostbackError> {
        let state: PostbackResponse = serde_json::from_value(bootstrap.get("state").cloned().unwrap_or_default())
            .map_err(|e| PostbackError::InvalidResponse(e.to_string()))?;
        let view_model = state
            .view_model
            .ok_or_else(|| PostbackError::InvalidResponse("bootstrap state has no view model".into()))?;
        Ok(Self::new(
            ClientViewModel::new(state.type_name, view_model),
            current_url,
        ))
    }

    /// Draws the next number and records it as the last started request.
    pub(crate) fn begin(&self) -> i64 {
        let started = self.counter.next();
        self.last_started.fetch_max(started, Ordering::SeqCst);
        started
    }

    pub fn last_started(&self) -> i64 {
        self.last_started.load(Ordering::SeqCst)
    }

    pub(crate) fn is_superseded(&self, started: i64) -> bool {
        started < self.last_started()
    }

    pub fn is_spa_ready(&self) -> bool {
        self.spa_ready.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_spa_ready(&self) {
        self.spa_ready.store(true, Ordering::SeqCst);
    }

    pub fn current_url(&self) -> String {
        self.current_url.lock().clone()
    }

    pub(crate) fn set_current_url(&self, url: &str) {
        *self.current_url.lock() = url.to_string();
    }

    pub fn view_model(&self) -> ClientViewModel {
        self.view_model.lock().clone()
    }

    pub fn with_view_model<R>(&self, f: impl FnOnce(&mut ClientViewModel) -> R) -> R {
        f(&mut self.view_model.lock())
    }
}
