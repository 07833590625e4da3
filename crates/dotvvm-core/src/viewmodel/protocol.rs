use super::ViewModelPath;
use crate::resources::ResourceLink;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client changes: the client's view-model tree and the paths it changed.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewModelChanges {
    pub type_name: Option<String>,
    pub view_model: Value,
    pub modified: Vec<ViewModelPath>,
}

/// `POST` body of a command postback.
#[derive(Debug, Clone, PartialEq)]
pub struct PostbackRequest {
    /// Text of the command binding, e.g. `Save()`.
    pub command: String,
    pub args: Vec<Value>,
    pub changes: ViewModelChanges,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PostbackAction {
    SuccessfulCommand,
    Redirect,
}

impl PostbackAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuccessfulCommand => "successfulCommand",
            Self::Redirect => "redirect",
        }
    }
}

/// Server response to a postback or SPA navigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostbackResponse {
    pub action: PostbackAction,
    /// Resource names the client must load before applying the update.
    #[serde(default)]
    pub resources: Vec<String>,
    /// Type and href of each entry of `resources`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_links: Vec<ResourceLink>,
    #[serde(rename = "$type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// Full view model (SPA navigation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_model: Option<Value>,
    /// Changed part of the view model (command postback).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_model_diff: Option<Value>,
    /// Target of a redirect, or the display url of an SPA page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl PostbackResponse {
    pub fn redirect(url: impl Into<String>) -> Self {
        Self {
            action: PostbackAction::Redirect,
            resources: Vec::new(),
            resource_links: Vec::new(),
            type_name: None,
            view_model: None,
            view_model_diff: None,
            url: Some(url.into()),
        }
    }

    pub fn successful_command(resources: Vec<String>) -> Self {
        Self {
            action: PostbackAction::SuccessfulCommand,
            resources,
            resource_links: Vec::new(),
            type_name: None,
            view_model: None,
            view_model_diff: None,
            url: None,
        }
    }
}
