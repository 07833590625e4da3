//! Full-page HTML output.
//!
//! Controls become plain elements annotated with `data-bind` (value
//! bindings) and `data-dotvvm-*` (commands, placeholders, route links)
//! attributes; the client runtime picks them up from there. The serialized
//! view model is embedded as a bootstrap script next to the runtime.

use crate::context::DotvvmRequestContext;
use crate::resources::escape_attribute;
use dotvvm_core::parser::is_void_element;
use dotvvm_core::resolver::{DATA_CONTEXT_PROPERTY, PropertyValue, ResolvedPropertySetter, ResolvedText};
use dotvvm_core::{
    BindingKind, DotvvmConfiguration, ResolvedBinding, ResolvedControl, ResolvedControlTreeVisitor,
    ResolvedTreeRoot, RouteParameters,
};
use serde_json::Value;

/// Writes a resolved view as HTML.
pub struct PageWriter<'a> {
    configuration: &'a DotvvmConfiguration,
    virtual_directory: &'a str,
    out: String,
}

impl<'a> PageWriter<'a> {
    pub fn new(configuration: &'a DotvvmConfiguration, virtual_directory: &'a str) -> Self {
        Self {
            configuration,
            virtual_directory,
            out: String::new(),
        }
    }

    pub fn render(mut self, view: &ResolvedTreeRoot) -> String {
        view.accept(&mut self);
        self.out
    }

    fn write_element(&mut self, control: &ResolvedControl, tag: &str) {
        let mut data_bind = Vec::new();
        let mut extra = Vec::new();
        let mut text = None;

        for setter in &control.properties {
            self.property_to_markup(control, setter, &mut data_bind, &mut extra, &mut text);
        }
        if control.control == "dot:RouteLink" {
            if let Some(href) = self.route_link_href(control) {
                extra.push(("href".to_string(), href));
                extra.push(("data-dotvvm-spa".to_string(), String::new()));
            }
        }
        if control.control.ends_with("ContentPlaceHolder") {
            extra.push(("data-dotvvm-placeholder".to_string(), String::new()));
        }

        self.out.push('<');
        self.out.push_str(tag);
        for setter in &control.attributes {
            match &setter.value {
                PropertyValue::Literal(value) => extra.push((setter.name.clone(), value.clone())),
                PropertyValue::Binding(binding) => push_binding(&mut data_bind, &mut extra, &setter.name, binding),
            }
        }
        for (name, value) in &extra {
            self.out.push(' ');
            self.out.push_str(name);
            if !value.is_empty() || !is_flag_attribute(name) {
                self.out.push_str("=\"");
                self.out.push_str(&escape_attribute(value));
                self.out.push('"');
            }
        }
        if !data_bind.is_empty() {
            self.out.push_str(" data-bind=\"");
            self.out.push_str(&escape_attribute(&data_bind.join(", ")));
            self.out.push('"');
        }

        if is_void_element(tag) {
            self.out.push_str(" />");
            return;
        }
        self.out.push('>');
        if let Some(text) = text {
            self.out.push_str(&escape_text(&text));
        }
        walk_children(self, control);
        self.out.push_str("</");
        self.out.push_str(tag);
        self.out.push('>');
    }

    fn property_to_markup(
        &self,
        control: &ResolvedControl,
        setter: &ResolvedPropertySetter,
        data_bind: &mut Vec<String>,
        extra: &mut Vec<(String, String)>,
        text: &mut Option<String>,
    ) {
        let name = setter.name.as_str();
        match &setter.value {
            PropertyValue::Binding(binding) if name == DATA_CONTEXT_PROPERTY => {
                data_bind.push(format!("with: {}", binding.expression_text()));
            }
            PropertyValue::Binding(binding) if name == "DataSource" => {
                data_bind.push(format!("foreach: {}", binding.expression_text()));
            }
            PropertyValue::Binding(binding) if name == "Text" && control.tag_name.as_deref() == Some("input") => {
                data_bind.push(format!("value: {}", binding.expression_text()));
            }
            PropertyValue::Binding(binding) => push_binding(data_bind, extra, name, binding),
            PropertyValue::Literal(_) if name.starts_with("Param-") || name == "RouteName" => {}
            PropertyValue::Literal(value) if name == "ID" => extra.push(("id".to_string(), value.clone())),
            PropertyValue::Literal(value) if name == "Text" && control.tag_name.as_deref() == Some("input") => {
                extra.push(("value".to_string(), value.clone()));
            }
            PropertyValue::Literal(value) if name == "Text" => *text = Some(value.clone()),
            PropertyValue::Literal(value) => extra.push((name.to_ascii_lowercase(), value.clone())),
        }
    }

    fn route_link_href(&self, control: &ResolvedControl) -> Option<String> {
        let route = self.configuration.routes.get(control.literal("RouteName")?)?;
        let parameters: RouteParameters = control
            .properties
            .iter()
            .filter_map(|p| match (&p.value, p.name.strip_prefix("Param-")) {
                (PropertyValue::Literal(value), Some(key)) => Some((key.to_string(), value.clone())),
                _ => None,
            })
            .collect();
        let url = route.build_url(&parameters)?;
        Some(format!("{}/{}", self.virtual_directory.trim_end_matches('/'), url))
    }
}

fn push_binding(data_bind: &mut Vec<String>, extra: &mut Vec<(String, String)>, name: &str, binding: &ResolvedBinding) {
    if binding.kind.is_command() {
        extra.push((
            format!("data-dotvvm-{}", name.to_ascii_lowercase()),
            binding.expression_text().to_string(),
        ));
    } else {
        data_bind.push(format!("{}: {}", name.to_ascii_lowercase(), binding.expression_text()));
    }
}

fn is_flag_attribute(name: &str) -> bool {
    matches!(name, "data-dotvvm-spa" | "data-dotvvm-placeholder")
}

fn walk_children(writer: &mut PageWriter<'_>, control: &ResolvedControl) {
    for child in &control.children {
        child.accept(writer);
    }
}

impl ResolvedControlTreeVisitor for PageWriter<'_> {
    fn visit_control(&mut self, control: &ResolvedControl) {
        let tag = match (&control.tag_name, control.is_html_generic()) {
            (Some(tag), _) => tag.clone(),
            (None, true) => control.control.clone(),
            // dot:Content and columns render only their children
            (None, false) => {
                walk_children(self, control);
                return;
            }
        };
        self.write_element(control, &tag);
    }

    fn visit_text(&mut self, text: &ResolvedText) {
        self.out.push_str(&text.text);
    }

    fn visit_binding(&mut self, binding: &ResolvedBinding) {
        let kind = match binding.kind {
            BindingKind::Resource => "resource",
            _ => "text",
        };
        self.out.push_str(&format!(
            "<span data-bind=\"{kind}: {}\"></span>",
            escape_attribute(binding.expression_text())
        ));
    }
}

/// Full HTML document for `view` with the bootstrap state and the required
/// resources injected before `</body>`.
pub fn render_page(context: &DotvvmRequestContext, view: &ResolvedTreeRoot, state: &Value) -> String {
    let body = PageWriter::new(&context.configuration, context.virtual_directory()).render(view);
    let bootstrap = serde_json::json!({
        "virtualDirectory": context.virtual_directory(),
        "culture": context.culture,
        "state": state,
    });
    let injection = format!(
        "<script>window.__DOTVVM__ = {};</script>\n{}",
        bootstrap.to_string().replace("</", "<\\/"),
        context.resource_tags()
    );
    inject_before_body_end(&body, &injection)
}

fn inject_before_body_end(html: &str, injection: &str) -> String {
    if let Some(idx) = html.rfind("</body>") {
        let mut out = String::with_capacity(html.len() + injection.len());
        out.push_str(&html[..idx]);
        out.push_str(injection);
        out.push_str(&html[idx..]);
        return out;
    }
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"></head><body>\n{html}\n{injection}</body></html>"
    )
}

fn escape_text(value: &str) -> String {
    value.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
