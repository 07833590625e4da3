//! `.dothtml` markup parser.
//!
//! Turns view source into a raw [`DothtmlRoot`]: leading `@directive` lines,
//! then a tree of elements, text, `{{kind: expr}}` text bindings and comments.
//! Attribute values written as `{kind: expr}` are kept as raw binding text;
//! the resolver parses them later.

mod ast;

pub use ast::{
    AttributeValue, DothtmlAttribute, DothtmlBinding, DothtmlComment, DothtmlDirective,
    DothtmlElement, DothtmlNode, DothtmlRoot, DothtmlText,
};

use crate::error::ParseError;
use serde::Serialize;
use std::fmt;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// 1-based line/column of a node in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

pub fn parse_markup(source: &str) -> Result<DothtmlRoot, ParseError> {
    let mut parser = MarkupParser::new(source);
    let directives = parser.parse_directives()?;
    let content = parser.parse_content()?;
    Ok(DothtmlRoot {
        directives,
        content,
    })
}

pub fn is_void_element(name: &str) -> bool {
    VOID_ELEMENTS.iter().any(|v| v.eq_ignore_ascii_case(name))
}

struct OpenElement {
    element: DothtmlElement,
}

struct MarkupParser<'a> {
    src: &'a str,
    pos: usize,
    line_starts: Vec<usize>,
}

impl<'a> MarkupParser<'a> {
    fn new(src: &'a str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in src.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self {
            src,
            pos: 0,
            line_starts,
        }
    }

    fn position_at(&self, offset: usize) -> Position {
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        let column = self.src[self.line_starts[line_idx]..offset].chars().count() + 1;
        Position {
            line: line_idx + 1,
            column,
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, s: &str) -> bool {
        if self.rest().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn parse_directives(&mut self) -> Result<Vec<DothtmlDirective>, ParseError> {
        let mut directives = Vec::new();
        loop {
            let checkpoint = self.pos;
            self.skip_whitespace();
            if self.peek() != Some('@') {
                self.pos = checkpoint;
                break;
            }
            let position = self.position_at(self.pos);
            self.bump();
            let line_end = self.rest().find('\n').map_or(self.src.len(), |i| self.pos + i);
            let line = self.src[self.pos..line_end].trim();
            self.pos = line_end;

            let (name, value) = line
                .split_once(char::is_whitespace)
                .map_or((line, ""), |(n, v)| (n, v.trim()));
            if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(ParseError::InvalidDirective {
                    message: format!("'@{line}' is not a valid directive name"),
                    position,
                });
            }
            directives.push(DothtmlDirective {
                name: name.to_string(),
                value: value.to_string(),
                position,
            });
        }
        Ok(directives)
    }

    fn parse_content(&mut self) -> Result<Vec<DothtmlNode>, ParseError> {
        let mut root: Vec<DothtmlNode> = Vec::new();
        let mut stack: Vec<OpenElement> = Vec::new();

        while self.pos < self.src.len() {
            let node = if self.rest().starts_with("<!--") {
                Some(self.parse_comment()?)
            } else if self.rest().starts_with("</") {
                let (name, position) = self.parse_closing_tag()?;
                let Some(open) = stack.pop() else {
                    return Err(ParseError::UnexpectedClosingTag { name, position });
                };
                if !open.element.full_name().eq_ignore_ascii_case(&name) {
                    return Err(ParseError::MismatchedClosingTag {
                        expected: open.element.full_name(),
                        found: name,
                        position,
                    });
                }
                Some(DothtmlNode::Element(open.element))
            } else if self.rest().starts_with("<!") || self.rest().starts_with("<?") {
                Some(self.parse_declaration()?)
            } else if self.rest().starts_with('<')
                && self.rest()[1..].starts_with(|c: char| c.is_ascii_alphabetic())
            {
                let element = self.parse_start_tag()?;
                let full_name = element.full_name();
                if element.self_closing || is_void_element(&full_name) {
                    Some(DothtmlNode::Element(element))
                } else if RAW_TEXT_ELEMENTS
                    .iter()
                    .any(|r| r.eq_ignore_ascii_case(&full_name))
                {
                    Some(DothtmlNode::Element(self.parse_raw_text_element(element)?))
                } else {
                    stack.push(OpenElement { element });
                    None
                }
            } else if self.rest().starts_with("{{") {
                Some(self.parse_text_binding()?)
            } else {
                Some(self.parse_text())
            };

            if let Some(node) = node {
                match stack.last_mut() {
                    Some(open) => open.element.children.push(node),
                    None => root.push(node),
                }
            }
        }

        if let Some(open) = stack.pop() {
            return Err(ParseError::UnclosedElement {
                element: open.element.full_name(),
                position: open.element.position,
            });
        }
        Ok(root)
    }

    fn parse_comment(&mut self) -> Result<DothtmlNode, ParseError> {
        let position = self.position_at(self.pos);
        self.pos += "<!--".len();
        let Some(end) = self.rest().find("-->") else {
            return Err(ParseError::UnterminatedComment { position });
        };
        let text = self.rest()[..end].to_string();
        self.pos += end + "-->".len();
        Ok(DothtmlNode::Comment(DothtmlComment { text, position }))
    }

    /// `<!DOCTYPE ...>` and processing instructions are kept verbatim as text.
    fn parse_declaration(&mut self) -> Result<DothtmlNode, ParseError> {
        let position = self.position_at(self.pos);
        let Some(end) = self.rest().find('>') else {
            return Err(ParseError::UnterminatedTag {
                name: "!".to_string(),
                position,
            });
        };
        let text = self.rest()[..=end].to_string();
        self.pos += end + 1;
        Ok(DothtmlNode::Text(DothtmlText { text, position }))
    }

    fn parse_text(&mut self) -> DothtmlNode {
        let position = self.position_at(self.pos);
        let start = self.pos;
        while self.pos < self.src.len() {
            let rest = self.rest();
            if rest.starts_with("{{") {
                break;
            }
            if rest.starts_with('<')
                && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic() || c == '/' || c == '!' || c == '?')
            {
                break;
            }
            self.bump();
        }
        DothtmlNode::Text(DothtmlText {
            text: self.src[start..self.pos].to_string(),
            position,
        })
    }

    fn parse_text_binding(&mut self) -> Result<DothtmlNode, ParseError> {
        let position = self.position_at(self.pos);
        self.pos += "{{".len();
        let Some(end) = self.rest().find("}}") else {
            return Err(ParseError::UnterminatedBinding { position });
        };
        let text = self.rest()[..end].trim().to_string();
        self.pos += end + "}}".len();
        Ok(DothtmlNode::Binding(DothtmlBinding { text, position }))
    }

    fn read_name(&mut self) -> &'a str {
        let src = self.src;
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | ':' | '.' | '@'))
        {
            self.bump();
        }
        &src[start..self.pos]
    }

    fn parse_closing_tag(&mut self) -> Result<(String, Position), ParseError> {
        let position = self.position_at(self.pos);
        self.pos += "</".len();
        let name = self.read_name().to_string();
        self.skip_whitespace();
        if !self.eat(">") {
            return Err(ParseError::UnterminatedTag { name, position });
        }
        Ok((name, position))
    }

    fn parse_start_tag(&mut self) -> Result<DothtmlElement, ParseError> {
        let position = self.position_at(self.pos);
        self.bump();
        let full_name = self.read_name();
        let (prefix, name) = match full_name.split_once(':') {
            Some((p, n)) => (Some(p.to_string()), n.to_string()),
            None => (None, full_name.to_string()),
        };

        let mut attributes: Vec<DothtmlAttribute> = Vec::new();
        let self_closing = loop {
            self.skip_whitespace();
            if self.eat("/>") {
                break true;
            }
            if self.eat(">") {
                break false;
            }
            if self.peek().is_none() {
                return Err(ParseError::UnterminatedTag {
                    name: full_name.to_string(),
                    position,
                });
            }

            let attr_position = self.position_at(self.pos);
            let attr_name = self.read_name().to_string();
            if attr_name.is_empty() {
                return Err(ParseError::Expected {
                    expected: "attribute name",
                    position: attr_position,
                });
            }
            self.skip_whitespace();
            let value = if self.eat("=") {
                self.skip_whitespace();
                Some(self.parse_attribute_value(&attr_name, attr_position)?)
            } else {
                None
            };

            if attributes
                .iter()
                .any(|a| a.name.eq_ignore_ascii_case(&attr_name))
            {
                return Err(ParseError::DuplicateAttribute {
                    element: full_name.to_string(),
                    attribute: attr_name,
                    position: attr_position,
                });
            }
            attributes.push(DothtmlAttribute {
                name: attr_name,
                value,
                position: attr_position,
            });
        };

        Ok(DothtmlElement {
            prefix,
            name,
            attributes,
            children: Vec::new(),
            self_closing,
            position,
        })
    }

    fn parse_attribute_value(
        &mut self,
        attribute: &str,
        position: Position,
    ) -> Result<AttributeValue, ParseError> {
        let raw = match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.bump();
                let Some(end) = self.rest().find(quote) else {
                    return Err(ParseError::UnterminatedAttribute {
                        attribute: attribute.to_string(),
                        position,
                    });
                };
                let value = &self.rest()[..end];
                self.pos += end + 1;
                value
            }
            _ => {
                let src = self.src;
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| !c.is_whitespace() && c != '>' && !self.rest().starts_with("/>"))
                {
                    self.bump();
                }
                &src[start..self.pos]
            }
        };

        let trimmed = raw.trim();
        if trimmed.starts_with('{') && trimmed.ends_with('}') && !trimmed.starts_with("{{") {
            Ok(AttributeValue::Binding(trimmed.to_string()))
        } else {
            Ok(AttributeValue::Literal(raw.to_string()))
        }
    }

    fn parse_raw_text_element(
        &mut self,
        mut element: DothtmlElement,
    ) -> Result<DothtmlElement, ParseError> {
        let close = format!("</{}", element.full_name());
        let lower_rest = self.rest().to_ascii_lowercase();
        let Some(end) = lower_rest.find(&close.to_ascii_lowercase()) else {
            return Err(ParseError::UnclosedElement {
                element: element.full_name(),
                position: element.position,
            });
        };
        let text_position = self.position_at(self.pos);
        let text = self.rest()[..end].to_string();
        self.pos += end;
        if !text.is_empty() {
            element.children.push(DothtmlNode::Text(DothtmlText {
                text,
                position: text_position,
            }));
        }
        self.parse_closing_tag()?;
        Ok(element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(node: &DothtmlNode) -> &DothtmlElement {
        match node {
            DothtmlNode::Element(e) => e,
            other => panic!("expected element, got {other:?}"),
        }
    }

    #[test]
    fn parses_directives_before_markup() {
        let root = parse_markup(
            "@viewModel App.ViewModels.Default\n@masterPage Views/Site.dotmaster\n<p>Hi</p>",
        )
        .unwrap();
        assert_eq!(root.directives.len(), 2);
        assert_eq!(root.directives[0].name, "viewModel");
        assert_eq!(root.directives[0].value, "App.ViewModels.Default");
        assert_eq!(root.directives[1].position, Position { line: 2, column: 1 });
        assert_eq!(element(&root.content[1]).name, "p");
    }

    #[test]
    fn parses_prefixed_controls_and_binding_attributes() {
        let root = parse_markup(
            r#"<dot:Repeater DataSource="{value: Items}"><span>{{value: Name}}</span></dot:Repeater>"#,
        )
        .unwrap();
        let repeater = element(&root.content[0]);
        assert_eq!(repeater.prefix.as_deref(), Some("dot"));
        assert_eq!(repeater.name, "Repeater");
        assert_eq!(
            repeater.attributes[0].value,
            Some(AttributeValue::Binding("{value: Items}".to_string()))
        );
        let span = element(&repeater.children[0]);
        match &span.children[0] {
            DothtmlNode::Binding(b) => assert_eq!(b.text, "value: Name"),
            other => panic!("expected binding, got {other:?}"),
        }
    }

    #[test]
    fn void_and_self_closing_elements_do_not_need_closing_tags() {
        let root = parse_markup(r#"<div><br><input type="text"><dot:TextBox Text="a" /></div>"#)
            .unwrap();
        let div = element(&root.content[0]);
        assert_eq!(div.children.len(), 3);
        assert!(element(&div.children[2]).self_closing);
    }

    #[test]
    fn script_content_is_kept_raw() {
        let root = parse_markup("<script>if (a < b) { x(\"</div>\"); }</script>").unwrap();
        let script = element(&root.content[0]);
        match &script.children[0] {
            DothtmlNode::Text(t) => assert!(t.text.contains("a < b")),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn mismatched_closing_tag_is_rejected() {
        let err = parse_markup("<div><span></div>").unwrap_err();
        assert!(matches!(err, ParseError::MismatchedClosingTag { .. }));
    }

    #[test]
    fn unclosed_element_is_rejected() {
        let err = parse_markup("<div>\n  <p>text").unwrap_err();
        match err {
            ParseError::UnclosedElement { element, position } => {
                assert_eq!(element, "p");
                assert_eq!(position, Position { line: 2, column: 3 });
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn duplicate_attribute_is_rejected_case_insensitively() {
        let err = parse_markup(r#"<a href="x" HREF="y"></a>"#).unwrap_err();
        assert!(matches!(err, ParseError::DuplicateAttribute { .. }));
    }

    #[test]
    fn unterminated_text_binding_is_rejected() {
        let err = parse_markup("<p>{{value: Name</p>").unwrap_err();
        assert!(matches!(err, ParseError::UnterminatedBinding { .. }));
    }

    #[test]
    fn doctype_and_comments_are_preserved() {
        let root = parse_markup("<!DOCTYPE html><!-- note --><html></html>").unwrap();
        assert!(matches!(&root.content[0], DothtmlNode::Text(t) if t.text == "<!DOCTYPE html>"));
        assert!(matches!(&root.content[1], DothtmlNode::Comment(c) if c.text == " note "));
    }
}
