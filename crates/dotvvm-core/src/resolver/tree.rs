use super::Directives;
use super::visitor::ResolvedControlTreeVisitor;
use crate::binding::{BindingKind, Expr};
use crate::data_context::DataContextStack;
use crate::parser::Position;
use crate::types::TypeRef;
use serde::Serialize;

/// Fully resolved view. Immutable once built; shared through `Arc` by the
/// view cache.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTreeRoot {
    pub directives: Directives,
    pub view_model_type: String,
    pub master_page: Option<String>,
    pub data_context: DataContextStack,
    pub content: Vec<ResolvedNode>,
}

impl ResolvedTreeRoot {
    pub fn accept<V: ResolvedControlTreeVisitor + ?Sized>(&self, visitor: &mut V) {
        visitor.visit_view(self);
    }

    /// Every binding in document order, including bindings on properties.
    pub fn bindings(&self) -> Vec<&ResolvedBinding> {
        let mut out = Vec::new();
        for node in &self.content {
            node.collect_bindings(&mut out);
        }
        out
    }

    /// Placeholder ids declared by `dot:ContentPlaceHolder` / `dot:SpaContentPlaceHolder`.
    pub fn placeholder_ids(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for node in &self.content {
            node.collect_placeholders(&mut out);
        }
        out
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "node", rename_all = "camelCase")]
pub enum ResolvedNode {
    Control(ResolvedControl),
    Text(ResolvedText),
    Binding(ResolvedBinding),
}

impl ResolvedNode {
    pub fn accept<V: ResolvedControlTreeVisitor + ?Sized>(&self, visitor: &mut V) {
        match self {
            Self::Control(control) => visitor.visit_control(control),
            Self::Text(text) => visitor.visit_text(text),
            Self::Binding(binding) => visitor.visit_binding(binding),
        }
    }

    pub fn position(&self) -> Position {
        match self {
            Self::Control(c) => c.position,
            Self::Text(t) => t.position,
            Self::Binding(b) => b.position,
        }
    }

    fn collect_bindings<'a>(&'a self, out: &mut Vec<&'a ResolvedBinding>) {
        match self {
            Self::Binding(b) => out.push(b),
            Self::Text(_) => {}
            Self::Control(c) => {
                for setter in c.properties.iter().chain(&c.attributes) {
                    if let PropertyValue::Binding(b) = &setter.value {
                        out.push(b);
                    }
                }
                for child in &c.children {
                    child.collect_bindings(out);
                }
            }
        }
    }

    fn collect_placeholders<'a>(&'a self, out: &mut Vec<&'a str>) {
        if let Self::Control(c) = self {
            if c.control.ends_with("ContentPlaceHolder") {
                if let Some(id) = c.literal("ID") {
                    out.push(id);
                }
            }
            for child in &c.children {
                child.collect_placeholders(out);
            }
        }
    }
}

/// Control node. `properties` are declared control properties; `attributes`
/// pass through to the rendered HTML element.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedControl {
    /// `dot:Repeater`, or the tag name for plain HTML elements.
    pub control: String,
    pub tag_name: Option<String>,
    pub properties: Vec<ResolvedPropertySetter>,
    pub attributes: Vec<ResolvedPropertySetter>,
    pub children: Vec<ResolvedNode>,
    pub data_context: DataContextStack,
    pub self_closing: bool,
    pub position: Position,
}

impl ResolvedControl {
    pub fn is_html_generic(&self) -> bool {
        !self.control.contains(':')
    }

    pub fn property(&self, name: &str) -> Option<&ResolvedPropertySetter> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn literal(&self, name: &str) -> Option<&str> {
        match &self.property(name)?.value {
            PropertyValue::Literal(value) => Some(value),
            PropertyValue::Binding(_) => None,
        }
    }

    pub fn binding(&self, name: &str) -> Option<&ResolvedBinding> {
        match &self.property(name)?.value {
            PropertyValue::Binding(binding) => Some(binding),
            PropertyValue::Literal(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPropertySetter {
    pub name: String,
    pub value: PropertyValue,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum PropertyValue {
    /// Literal attribute text; `None` in the markup becomes an empty string.
    Literal(String),
    Binding(ResolvedBinding),
}

/// A binding checked for syntax, typed against its data context when possible.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedBinding {
    pub kind: BindingKind,
    pub expression: Expr,
    pub text: String,
    /// `None` when the type could not be inferred; left for the binding compiler.
    pub result_type: Option<TypeRef>,
    pub data_context: DataContextStack,
    pub position: Position,
}

impl ResolvedBinding {
    /// Expression part of [`text`](Self::text): `Save()` for `command: Save()`.
    pub fn expression_text(&self) -> &str {
        self.text
            .split_once(':')
            .map_or(self.text.as_str(), |(_, expression)| expression.trim())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedText {
    pub text: String,
    pub position: Position,
}
