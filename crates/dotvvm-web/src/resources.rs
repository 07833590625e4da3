//! Per-request list of required resources.

use crate::DOTVVM_RUNTIME_JS;
use crate::error::DotvvmError;
use dotvvm_core::resources::CLIENT_RUNTIME_RESOURCE;
use dotvvm_core::{ResourceDefinition, ResourceLink, ResourceRegistry, ResourceType};
use std::borrow::Cow;

/// Looks up `name`, falling back to the embedded client runtime.
pub fn find_resource<'a>(registry: &'a ResourceRegistry, name: &str) -> Option<Cow<'a, ResourceDefinition>> {
    match registry.get(name) {
        Some(resource) => Some(Cow::Borrowed(resource)),
        None if name == CLIENT_RUNTIME_RESOURCE => Some(Cow::Owned(
            ResourceDefinition::embedded_script(CLIENT_RUNTIME_RESOURCE, DOTVVM_RUNTIME_JS),
        )),
        None => None,
    }
}

/// Required resources in load order: dependencies before dependents, each
/// name at most once.
#[derive(Debug, Default, Clone)]
pub struct ResourceManager {
    required: Vec<String>,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(&mut self, registry: &ResourceRegistry, name: &str) -> Result<(), DotvvmError> {
        let mut visiting = Vec::new();
        self.require_inner(registry, name, &mut visiting)
    }

    fn require_inner(
        &mut self,
        registry: &ResourceRegistry,
        name: &str,
        visiting: &mut Vec<String>,
    ) -> Result<(), DotvvmError> {
        if self.is_required(name) {
            return Ok(());
        }
        if visiting.iter().any(|v| v == name) {
            return Err(DotvvmError::ResourceCycle(name.to_string()));
        }
        let resource = find_resource(registry, name)
            .ok_or_else(|| DotvvmError::UnknownResource(name.to_string()))?;
        visiting.push(name.to_string());
        for dependency in &resource.dependencies {
            self.require_inner(registry, dependency, visiting)?;
        }
        visiting.pop();
        self.required.push(name.to_string());
        Ok(())
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    pub fn into_required(self) -> Vec<String> {
        self.required
    }

    /// Type and href of each required resource, in load order.
    pub fn links(&self, registry: &ResourceRegistry, virtual_directory: &str) -> Vec<ResourceLink> {
        self.required
            .iter()
            .filter_map(|name| find_resource(registry, name))
            .map(|resource| resource.link(virtual_directory))
            .collect()
    }

    /// `<link>` and `<script>` tags for a full page, each marked with
    /// `data-dotvvm-resource` so the client runtime knows it is loaded.
    pub fn render_tags(&self, registry: &ResourceRegistry, virtual_directory: &str) -> String {
        let mut out = String::new();
        for name in &self.required {
            let Some(resource) = find_resource(registry, name) else {
                continue;
            };
            let href = escape_attribute(&resource.href(virtual_directory));
            let marker = escape_attribute(name);
            let integrity = resource
                .integrity
                .as_deref()
                .map(|i| format!(" integrity=\"{}\" crossorigin=\"anonymous\"", escape_attribute(i)))
                .unwrap_or_default();
            match resource.resource_type {
                ResourceType::Script => {
                    out.push_str(&format!(
                        "<script src=\"{href}\"{integrity} data-dotvvm-resource=\"{marker}\"></script>\n"
                    ));
                }
                ResourceType::Stylesheet => {
                    out.push_str(&format!(
                        "<link rel=\"stylesheet\" href=\"{href}\"{integrity} data-dotvvm-resource=\"{marker}\" />\n"
                    ));
                }
            }
        }
        out
    }
}

pub(crate) fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ResourceRegistry {
        let mut registry = ResourceRegistry::default();
        registry.register(ResourceDefinition::script("jquery", "https://cdn/jquery.js"));
        registry.register(ResourceDefinition::script("app", "/app.js").depends_on("jquery").depends_on("dotvvm"));
        registry.register(ResourceDefinition::stylesheet("site", "/site.css"));
        registry.register(ResourceDefinition::script("loop-a", "/a.js").depends_on("loop-b"));
        registry.register(ResourceDefinition::script("loop-b", "/b.js").depends_on("loop-a"));
        registry
    }

    #[test]
    fn dependencies_come_first_and_names_are_unique() {
        let registry = registry();
        let mut manager = ResourceManager::new();
        manager.require(&registry, "app").unwrap();
        manager.require(&registry, "jquery").unwrap();
        manager.require(&registry, "site").unwrap();
        assert_eq!(manager.required(), ["jquery", "dotvvm", "app", "site"]);

        let tags = manager.render_tags(&registry, "/vdir");
        assert!(tags.contains("<script src=\"/vdir/dotvvmResource/dotvvm\" data-dotvvm-resource=\"dotvvm\"></script>"));
        assert!(tags.contains("<link rel=\"stylesheet\" href=\"/site.css\" data-dotvvm-resource=\"site\" />"));
        assert!(tags.find("jquery.js").unwrap() < tags.find("app.js").unwrap());
    }

    #[test]
    fn links_carry_type_and_href_in_load_order() {
        let registry = registry();
        let mut manager = ResourceManager::new();
        manager.require(&registry, "site").unwrap();
        manager.require(&registry, "app").unwrap();

        let links = manager.links(&registry, "/vdir");
        let summary: Vec<(&str, ResourceType, &str)> = links
            .iter()
            .map(|l| (l.name.as_str(), l.resource_type, l.href.as_str()))
            .collect();
        assert_eq!(
            summary,
            [
                ("site", ResourceType::Stylesheet, "/site.css"),
                ("jquery", ResourceType::Script, "https://cdn/jquery.js"),
                ("dotvvm", ResourceType::Script, "/vdir/dotvvmResource/dotvvm"),
                ("app", ResourceType::Script, "/app.js"),
            ]
        );
    }

    #[test]
    fn unknown_and_cyclic_resources_fail() {
        let registry = registry();
        let mut manager = ResourceManager::new();
        assert!(matches!(
            manager.require(&registry, "missing"),
            Err(DotvvmError::UnknownResource(name)) if name == "missing"
        ));
        assert!(matches!(
            manager.require(&registry, "loop-a"),
            Err(DotvvmError::ResourceCycle(_))
        ));
        assert!(manager.required().is_empty());
    }
}
