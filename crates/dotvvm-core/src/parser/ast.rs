use super::Position;
use serde::Serialize;

/// Raw syntax tree of one `.dothtml` file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DothtmlRoot {
    pub directives: Vec<DothtmlDirective>,
    pub content: Vec<DothtmlNode>,
}

/// `@name value` line at the top of a view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DothtmlDirective {
    pub name: String,
    pub value: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DothtmlNode {
    Element(DothtmlElement),
    Text(DothtmlText),
    /// `{{value: Expr}}` inside text content.
    Binding(DothtmlBinding),
    Comment(DothtmlComment),
}

impl DothtmlNode {
    pub fn position(&self) -> Position {
        match self {
            Self::Element(e) => e.position,
            Self::Text(t) => t.position,
            Self::Binding(b) => b.position,
            Self::Comment(c) => c.position,
        }
    }

    /// True for text nodes that contain only whitespace.
    pub fn is_whitespace(&self) -> bool {
        matches!(self, Self::Text(t) if t.text.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DothtmlElement {
    pub prefix: Option<String>,
    pub name: String,
    pub attributes: Vec<DothtmlAttribute>,
    pub children: Vec<DothtmlNode>,
    pub self_closing: bool,
    pub position: Position,
}

impl DothtmlElement {
    /// `prefix:Name` or plain `name`.
    pub fn full_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.name),
            None => self.name.clone(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&DothtmlAttribute> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DothtmlAttribute {
    pub name: String,
    pub value: Option<AttributeValue>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "camelCase")]
pub enum AttributeValue {
    Literal(String),
    /// Full binding text including braces, e.g. `{value: Name}`.
    Binding(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DothtmlText {
    pub text: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DothtmlBinding {
    /// Binding text without the outer double braces, e.g. `value: Name`.
    pub text: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DothtmlComment {
    pub text: String,
    pub position: Position,
}
