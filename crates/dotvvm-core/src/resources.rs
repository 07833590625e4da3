//! Named script and stylesheet resources a page may require.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the embedded client runtime resource.
pub const CLIENT_RUNTIME_RESOURCE: &str = "dotvvm";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceType {
    Script,
    Stylesheet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    /// External url; when absent the resource is served from `/dotvvmResource/{name}`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub integrity: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Inline content served by the resource stage.
    #[serde(skip)]
    pub content: Option<&'static str>,
}

impl ResourceDefinition {
    pub fn script(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type: ResourceType::Script,
            url: Some(url.into()),
            integrity: None,
            dependencies: Vec::new(),
            content: None,
        }
    }

    pub fn stylesheet(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            resource_type: ResourceType::Stylesheet,
            ..Self::script(name, url)
        }
    }

    /// Script whose body is compiled into the binary.
    pub fn embedded_script(name: impl Into<String>, content: &'static str) -> Self {
        Self {
            url: None,
            content: Some(content),
            ..Self::script(name, "")
        }
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn link(&self, virtual_directory: &str) -> ResourceLink {
        ResourceLink {
            name: self.name.clone(),
            resource_type: self.resource_type,
            href: self.href(virtual_directory),
        }
    }

    pub fn href(&self, virtual_directory: &str) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "{}/dotvvmResource/{}",
                virtual_directory.trim_end_matches('/'),
                self.name
            ),
        }
    }
}

/// Where the client loads a resource from, and as what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLink {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub href: String,
}

/// Resources registered in the configuration, by name.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ResourceRegistry {
    resources: BTreeMap<String, ResourceDefinition>,
}

impl ResourceRegistry {
    pub fn register(&mut self, resource: ResourceDefinition) -> Option<ResourceDefinition> {
        self.resources.insert(resource.name.clone(), resource)
    }

    pub fn get(&self, name: &str) -> Option<&ResourceDefinition> {
        self.resources.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_resources_are_served_under_the_virtual_directory() {
        let runtime = ResourceDefinition::embedded_script(CLIENT_RUNTIME_RESOURCE, "/* js */");
        assert_eq!(runtime.href("/app/"), "/app/dotvvmResource/dotvvm");
        assert_eq!(runtime.href(""), "/dotvvmResource/dotvvm");

        let external = ResourceDefinition::stylesheet("bootstrap", "https://cdn.example/b.css");
        assert_eq!(external.href("/app"), "https://cdn.example/b.css");
        assert_eq!(external.resource_type, ResourceType::Stylesheet);
        assert_eq!(
            serde_json::to_value(external.link("/app")).unwrap(),
            serde_json::json!({"name": "bootstrap", "type": "stylesheet", "href": "https://cdn.example/b.css"})
        );
    }

    #[test]
    fn definitions_parse_from_project_json() {
        let def: ResourceDefinition = serde_json::from_value(serde_json::json!({
            "name": "app",
            "type": "script",
            "url": "/js/app.js",
            "dependencies": ["dotvvm"]
        }))
        .unwrap();
        assert_eq!(def.dependencies, vec!["dotvvm".to_string()]);
        assert!(def.content.is_none());
    }
}
