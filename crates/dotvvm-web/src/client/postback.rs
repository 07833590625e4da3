use super::{ClientHost, ClientState};
use crate::error::PostbackError;
use dotvvm_core::PostbackAction;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostbackOutcome {
    /// The server diff was merged into the view model.
    Applied,
    Redirected { url: String },
    /// Another request started after this one; its response was dropped.
    Superseded,
}

/// Sends command postbacks for the current page.
pub struct PostbackSender {
    state: Arc<ClientState>,
    host: Arc<dyn ClientHost>,
}

impl PostbackSender {
    pub fn new(state: Arc<ClientState>, host: Arc<dyn ClientHost>) -> Self {
        Self { state, host }
    }

    pub async fn postback(&self, command: &str, args: Vec<Value>) -> Result<PostbackOutcome, PostbackError> {
        if !self.state.gate.is_enabled() {
            debug!(command, "postback refused while a navigation is running");
            return Err(PostbackError::GateClosed);
        }
        let started = self.state.begin();
        let body = self.state.with_view_model(|vm| vm.postback_body(command, &args));
        let response = self.host.post_json(&self.state.current_url(), body).await?;
        if self.state.is_superseded(started) {
            debug!(command, started, "discarding superseded postback response");
            return Ok(PostbackOutcome::Superseded);
        }

        self.host.load_resources(&response.resources).await?;
        match response.action {
            PostbackAction::SuccessfulCommand => {
                let diff = response
                    .view_model_diff
                    .ok_or_else(|| PostbackError::InvalidResponse("postback response without a diff".into()))?;
                self.state.with_view_model(|vm| {
                    vm.patch(&diff);
                    vm.clear_modified();
                });
                Ok(PostbackOutcome::Applied)
            }
            PostbackAction::Redirect => {
                let url = response
                    .url
                    .ok_or_else(|| PostbackError::InvalidResponse("redirect without a url".into()))?;
                self.host.handle_redirect(&url).await?;
                Ok(PostbackOutcome::Redirected { url })
            }
        }
    }
}
