use super::{ClientHost, ClientState};
use crate::error::PostbackError;
use crate::middleware::SPA_URL_PREFIX;
use dotvvm_core::{PostbackAction, PostbackResponse};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// The new page state was applied; `url` is the display url.
    Navigated { url: String },
    /// The server redirected and the host's redirect handler ran.
    Redirected { url: String },
    /// A newer navigation started before the response arrived; nothing happened.
    Superseded,
}

/// Runs SPA navigations. When navigations overlap, only the one started last
/// is applied; earlier responses are dropped when they arrive.
pub struct NavigationSequencer {
    state: Arc<ClientState>,
    host: Arc<dyn ClientHost>,
    virtual_directory: String,
}

/// Re-opens the gate when a navigation ends, however it ends, unless a newer
/// one has started in the meantime.
struct GateRelease<'a> {
    state: &'a ClientState,
    started: i64,
}

impl Drop for GateRelease<'_> {
    fn drop(&mut self) {
        if self.state.last_started() == self.started {
            self.state.gate.enable();
        }
    }
}

impl NavigationSequencer {
    pub fn new(state: Arc<ClientState>, host: Arc<dyn ClientHost>, virtual_directory: &str) -> Self {
        Self {
            state,
            host,
            virtual_directory: virtual_directory.trim_end_matches('/').to_string(),
        }
    }

    pub fn state(&self) -> &Arc<ClientState> {
        &self.state
    }

    /// `<vdir>/___dotvvm-spa___/<url>`
    pub fn spa_url(&self, url: &str) -> String {
        format!(
            "{}/{}/{}",
            self.virtual_directory,
            SPA_URL_PREFIX,
            url.trim_start_matches('/')
        )
    }

    fn display_url(&self, url: &str) -> String {
        format!("{}/{}", self.virtual_directory, url.trim_start_matches('/'))
    }

    pub async fn navigate(&self, url: &str) -> Result<NavigationOutcome, PostbackError> {
        let started = self.state.begin();
        self.state.gate.disable();
        let _release = GateRelease {
            state: &self.state,
            started,
        };
        self.navigate_core(started, url).await
    }

    async fn navigate_core(&self, started: i64, url: &str) -> Result<NavigationOutcome, PostbackError> {
        if self.state.events.raise_spa_navigating(url) {
            debug!(url, "SPA navigation canceled by a handler");
            return Err(PostbackError::Event);
        }

        let response = self.host.get_json(&self.spa_url(url)).await?;
        if self.state.is_superseded(started) {
            debug!(
                url,
                started,
                last_started = self.state.last_started(),
                "discarding superseded navigation response"
            );
            return Ok(NavigationOutcome::Superseded);
        }

        let display_url = match (&response.action, &response.url) {
            (PostbackAction::SuccessfulCommand, Some(url)) => url.clone(),
            _ => self.display_url(url),
        };
        self.host.page_navigating(&display_url);
        self.host.load_resources(&response.resources).await?;

        match response.action {
            PostbackAction::SuccessfulCommand => {
                self.apply(response, &display_url)?;
                self.state.events.raise_spa_navigated(&display_url);
                Ok(NavigationOutcome::Navigated { url: display_url })
            }
            PostbackAction::Redirect => {
                let target = response
                    .url
                    .ok_or_else(|| PostbackError::InvalidResponse("redirect without a url".into()))?;
                self.host.handle_redirect(&target).await?;
                Ok(NavigationOutcome::Redirected { url: target })
            }
        }
    }

    fn apply(&self, response: PostbackResponse, display_url: &str) -> Result<(), PostbackError> {
        let view_model = response
            .view_model
            .ok_or_else(|| PostbackError::InvalidResponse("navigation response without a view model".into()))?;
        self.state
            .with_view_model(|vm| vm.replace(response.type_name, view_model));
        self.state.set_current_url(display_url);
        self.state.mark_spa_ready();
        Ok(())
    }
}
