//! Control tree resolver.
//!
//! Walks a raw [`DothtmlRoot`] depth first and produces a [`ResolvedTreeRoot`]:
//! directives are validated, every element is matched against control
//! metadata, bindings are parsed and typed against the data context active
//! at their position. A new data-context frame is pushed only by
//! `DataContext` bindings and by properties that iterate a collection
//! (`DataSource`). Bindings whose type cannot be inferred are kept with
//! `result_type = None`; syntax errors are fatal.

mod directives;
mod tree;
mod visitor;

pub use directives::{BASE_TYPE_DIRECTIVE, Directives, MASTER_PAGE_DIRECTIVE, VIEW_MODEL_DIRECTIVE};
pub use tree::{
    PropertyValue, ResolvedBinding, ResolvedControl, ResolvedNode, ResolvedPropertySetter,
    ResolvedText, ResolvedTreeRoot,
};
pub use visitor::{ResolvedControlTreeVisitor, walk_control, walk_view};

use crate::binding::{BinaryOp, BindingKind, Expr, UnaryOp, parse_binding};
use crate::data_context::DataContextStack;
use crate::error::ResolveError;
use crate::parser::{
    AttributeValue, DothtmlAttribute, DothtmlElement, DothtmlNode, DothtmlRoot, Position,
    parse_markup,
};
use crate::types::{ControlMetadata, DataContextChange, TypeRef, TypeRegistry};
use tracing::debug;

/// Attribute accepted on every element that rebinds its data context.
pub const DATA_CONTEXT_PROPERTY: &str = "DataContext";

pub struct ControlTreeResolver<'a> {
    registry: &'a TypeRegistry,
}

impl<'a> ControlTreeResolver<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Self { registry }
    }

    /// Parses and resolves view source in one step.
    pub fn resolve_source(&self, source: &str) -> Result<ResolvedTreeRoot, ResolveError> {
        let root = parse_markup(source)?;
        self.resolve(&root)
    }

    pub fn resolve(&self, root: &DothtmlRoot) -> Result<ResolvedTreeRoot, ResolveError> {
        let mut directives = Directives::new();
        for directive in &root.directives {
            directives.insert(directive.name.clone(), directive.value.clone())?;
        }

        let view_model_type = directives
            .get(VIEW_MODEL_DIRECTIVE)
            .map(view_model_type_name)
            .ok_or(ResolveError::MissingViewModelDirective)?;
        if self.registry.get_type(&view_model_type).is_none() {
            return Err(ResolveError::UnknownViewModelType(view_model_type));
        }
        let master_page = directives.get(MASTER_PAGE_DIRECTIVE).map(str::to_string);

        let data_context = DataContextStack::root(TypeRef::named(view_model_type.clone()));
        let content = self.resolve_nodes(&root.content, &data_context)?;

        debug!(
            view_model = %view_model_type,
            nodes = content.len(),
            "resolved control tree"
        );
        Ok(ResolvedTreeRoot {
            directives,
            view_model_type,
            master_page,
            data_context,
            content,
        })
    }

    fn resolve_nodes(
        &self,
        nodes: &[DothtmlNode],
        data_context: &DataContextStack,
    ) -> Result<Vec<ResolvedNode>, ResolveError> {
        let mut resolved = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                DothtmlNode::Comment(_) => {}
                DothtmlNode::Text(text) => resolved.push(ResolvedNode::Text(ResolvedText {
                    text: text.text.clone(),
                    position: text.position,
                })),
                DothtmlNode::Binding(binding) => resolved.push(ResolvedNode::Binding(
                    self.resolve_binding(&binding.text, binding.position, data_context)?,
                )),
                DothtmlNode::Element(element) => resolved.push(ResolvedNode::Control(
                    self.resolve_element(element, data_context)?,
                )),
            }
        }
        Ok(resolved)
    }

    fn resolve_element(
        &self,
        element: &DothtmlElement,
        parent_context: &DataContextStack,
    ) -> Result<ResolvedControl, ResolveError> {
        let generic;
        let metadata = match &element.prefix {
            Some(prefix) => self.registry.get_control(prefix, &element.name).ok_or_else(|| {
                ResolveError::UnknownControl {
                    prefix: prefix.clone(),
                    name: element.name.clone(),
                    position: element.position,
                }
            })?,
            None => {
                generic = ControlMetadata::html_generic(&element.name);
                &generic
            }
        };
        let control_name = metadata.full_name();

        // DataContext is evaluated in the parent scope and rebinds the element itself.
        let mut data_context = parent_context.clone();
        let mut properties = Vec::new();
        if let Some(attribute) = element.attribute(DATA_CONTEXT_PROPERTY) {
            let binding = self.required_binding(attribute, &control_name, parent_context)?;
            data_context = parent_context.push(binding.result_type.clone().unwrap_or(TypeRef::Any));
            properties.push(ResolvedPropertySetter {
                name: DATA_CONTEXT_PROPERTY.to_string(),
                value: PropertyValue::Binding(binding),
            });
        }

        let mut attributes = Vec::new();
        let mut children_context = data_context.clone();
        for attribute in &element.attributes {
            if attribute.name.eq_ignore_ascii_case(DATA_CONTEXT_PROPERTY) {
                continue;
            }
            if metadata.is_html_generic() {
                attributes.push(self.resolve_setter(attribute, &data_context)?);
                continue;
            }
            if let Some(property) = metadata.find_property(&attribute.name) {
                let setter = if property.binding_required {
                    let binding = self.required_binding(attribute, &control_name, &data_context)?;
                    if property.data_context_change == Some(DataContextChange::CollectionElement) {
                        let element_type =
                            collection_element(&binding, &control_name, &property.name)?;
                        children_context = data_context.push(element_type);
                    }
                    ResolvedPropertySetter {
                        name: property.name.clone(),
                        value: PropertyValue::Binding(binding),
                    }
                } else {
                    ResolvedPropertySetter {
                        name: property.name.clone(),
                        value: self.resolve_setter(attribute, &data_context)?.value,
                    }
                };
                properties.push(setter);
            } else if metadata.accepts_group_property(&attribute.name) {
                properties.push(self.resolve_setter(attribute, &data_context)?);
            } else if is_html_attribute_name(&attribute.name) {
                attributes.push(self.resolve_setter(attribute, &data_context)?);
            } else {
                return Err(ResolveError::UnknownProperty {
                    control: control_name,
                    property: attribute.name.clone(),
                    position: attribute.position,
                });
            }
        }

        if !metadata.allows_content && element.children.iter().any(|c| !c.is_whitespace()) {
            return Err(ResolveError::ContentNotAllowed {
                control: control_name,
                position: element.position,
            });
        }
        let children = self.resolve_nodes(&element.children, &children_context)?;

        Ok(ResolvedControl {
            control: control_name,
            tag_name: metadata.tag_name.clone(),
            properties,
            attributes,
            children,
            data_context,
            self_closing: element.self_closing,
            position: element.position,
        })
    }

    fn resolve_setter(
        &self,
        attribute: &DothtmlAttribute,
        data_context: &DataContextStack,
    ) -> Result<ResolvedPropertySetter, ResolveError> {
        let value = match &attribute.value {
            None => PropertyValue::Literal(String::new()),
            Some(AttributeValue::Literal(text)) => PropertyValue::Literal(text.clone()),
            Some(AttributeValue::Binding(text)) => {
                PropertyValue::Binding(self.resolve_binding(text, attribute.position, data_context)?)
            }
        };
        Ok(ResolvedPropertySetter {
            name: attribute.name.clone(),
            value,
        })
    }

    fn required_binding(
        &self,
        attribute: &DothtmlAttribute,
        control: &str,
        data_context: &DataContextStack,
    ) -> Result<ResolvedBinding, ResolveError> {
        match &attribute.value {
            Some(AttributeValue::Binding(text)) => {
                self.resolve_binding(text, attribute.position, data_context)
            }
            _ => Err(ResolveError::BindingRequired {
                control: control.to_string(),
                property: attribute.name.clone(),
                position: attribute.position,
            }),
        }
    }

    fn resolve_binding(
        &self,
        text: &str,
        position: Position,
        data_context: &DataContextStack,
    ) -> Result<ResolvedBinding, ResolveError> {
        let parsed = parse_binding(text).map_err(|source| ResolveError::Binding {
            text: text.to_string(),
            position,
            source,
        })?;
        let result_type = match parsed.kind {
            BindingKind::Resource => Some(TypeRef::String),
            _ => infer_type(&parsed.expression, data_context, self.registry),
        };
        if result_type.is_none() {
            debug!(binding = %parsed.text, %position, "binding type deferred");
        }
        Ok(ResolvedBinding {
            kind: parsed.kind,
            expression: parsed.expression,
            text: parsed.text,
            result_type,
            data_context: data_context.clone(),
            position,
        })
    }
}

/// `@viewModel App.Pages.Home, App` names the type before the comma.
fn view_model_type_name(value: &str) -> String {
    value.split(',').next().unwrap_or(value).trim().to_string()
}

fn is_html_attribute_name(name: &str) -> bool {
    name.contains('-') || name.starts_with(|c: char| c.is_ascii_lowercase())
}

fn collection_element(
    binding: &ResolvedBinding,
    control: &str,
    property: &str,
) -> Result<TypeRef, ResolveError> {
    match &binding.result_type {
        None | Some(TypeRef::Any) => Ok(TypeRef::Any),
        Some(ty) => ty
            .element_type()
            .cloned()
            .ok_or_else(|| ResolveError::NotACollection {
                control: control.to_string(),
                property: property.to_string(),
                found: ty.to_string(),
                position: binding.position,
            }),
    }
}

/// Static type of `expr` in `data_context`, `None` when unknown.
pub fn infer_type(
    expr: &Expr,
    data_context: &DataContextStack,
    registry: &TypeRegistry,
) -> Option<TypeRef> {
    match expr {
        Expr::Null => Some(TypeRef::Any),
        Expr::Bool { .. } => Some(TypeRef::Bool),
        Expr::Number { value } => Some(if value.fract() == 0.0 {
            TypeRef::Int
        } else {
            TypeRef::Float
        }),
        Expr::String { .. } => Some(TypeRef::String),
        Expr::This => Some(data_context.data_type().clone()),
        Expr::Parent { level } => data_context
            .ancestor(*level)
            .map(|frame| frame.data_type().clone()),
        Expr::Root => Some(data_context.root_type().clone()),
        Expr::Identifier { name } => registry.member_type(data_context.data_type(), name),
        Expr::Member { target, name } => {
            let owner = infer_type(target, data_context, registry)?;
            registry.member_type(&owner, name)
        }
        Expr::Call { target, .. } => {
            let (owner, name) = match target.as_ref() {
                Expr::Identifier { name } => (data_context.data_type().clone(), name),
                Expr::Member { target, name } => (infer_type(target, data_context, registry)?, name),
                _ => return None,
            };
            registry.method(&owner, name).map(|m| m.returns.clone())
        }
        Expr::Unary { op, operand } => match op {
            UnaryOp::Not => Some(TypeRef::Bool),
            UnaryOp::Negate => infer_type(operand, data_context, registry),
        },
        Expr::Binary { op, left, right } => match op {
            BinaryOp::And | BinaryOp::Or => Some(TypeRef::Bool),
            op if op.is_comparison() => Some(TypeRef::Bool),
            _ => {
                let left = infer_type(left, data_context, registry)?;
                let right = infer_type(right, data_context, registry)?;
                arithmetic_type(*op, left.strip_nullable(), right.strip_nullable())
            }
        },
    }
}

fn arithmetic_type(op: BinaryOp, left: &TypeRef, right: &TypeRef) -> Option<TypeRef> {
    match (left, right) {
        (TypeRef::String, _) | (_, TypeRef::String) if op == BinaryOp::Add => Some(TypeRef::String),
        (TypeRef::Int, TypeRef::Int) => Some(TypeRef::Int),
        (TypeRef::Int | TypeRef::Float, TypeRef::Int | TypeRef::Float) => Some(TypeRef::Float),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeDescriptor;

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.register_type(
            TypeDescriptor::new("App.CustomersPage")
                .property("Title", TypeRef::String)
                .property(
                    "Customers",
                    TypeRef::collection_of(TypeRef::named("App.Customer")),
                )
                .property("Selected", TypeRef::named("App.Customer"))
                .method("Save", vec![]),
        );
        registry.register_type(
            TypeDescriptor::new("App.Customer")
                .property("Name", TypeRef::String)
                .property("Age", TypeRef::Int),
        );
        registry
    }

    fn resolve(source: &str) -> Result<ResolvedTreeRoot, ResolveError> {
        let registry = registry();
        ControlTreeResolver::new(&registry).resolve_source(source)
    }

    fn first_control(nodes: &[ResolvedNode]) -> &ResolvedControl {
        nodes
            .iter()
            .find_map(|n| match n {
                ResolvedNode::Control(c) => Some(c),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn repeater_pushes_element_scope_for_children() {
        let view = resolve(
            "@viewModel App.CustomersPage\n\
             <dot:Repeater DataSource=\"{value: Customers}\">\
               <span>{{value: Name}} / {{value: _parent.Title}}</span>\
             </dot:Repeater>",
        )
        .unwrap();

        let repeater = first_control(&view.content);
        assert!(repeater.data_context.same_frame(&view.data_context));
        let span = first_control(&repeater.children);
        assert_eq!(span.data_context.depth(), 1);
        assert_eq!(span.data_context.data_type(), &TypeRef::named("App.Customer"));

        let types: Vec<Option<TypeRef>> = view.bindings().iter().map(|b| b.result_type.clone()).collect();
        assert_eq!(
            types,
            vec![
                Some(TypeRef::collection_of(TypeRef::named("App.Customer"))),
                Some(TypeRef::String),
                Some(TypeRef::String),
            ]
        );
    }

    #[test]
    fn plain_elements_inherit_the_parent_frame() {
        let view = resolve("@viewModel App.CustomersPage\n<div><p>{{value: Title}}</p></div>").unwrap();
        let div = first_control(&view.content);
        let p = first_control(&div.children);
        assert!(p.data_context.same_frame(&view.data_context));
    }

    #[test]
    fn data_context_rebinds_the_element_itself() {
        let view = resolve(
            "@viewModel App.CustomersPage\n<div DataContext=\"{value: Selected}\" title=\"{value: Name}\"></div>",
        )
        .unwrap();
        let div = first_control(&view.content);
        assert_eq!(div.data_context.data_type(), &TypeRef::named("App.Customer"));
        let title = view.bindings()[1];
        assert_eq!(title.result_type, Some(TypeRef::String));
    }

    #[test]
    fn unknown_members_are_deferred_not_rejected() {
        let view = resolve("@viewModel App.CustomersPage\n<p>{{value: Missing.Thing}}</p>").unwrap();
        assert_eq!(view.bindings()[0].result_type, None);
    }

    #[test]
    fn duplicate_directives_are_rejected() {
        let err = resolve("@viewModel App.CustomersPage\n@ViewModel App.Customer\n<p></p>").unwrap_err();
        assert!(matches!(err, ResolveError::DuplicateDirective { .. }));
    }

    #[test]
    fn missing_or_unknown_view_model_is_rejected() {
        assert_eq!(resolve("<p></p>").unwrap_err(), ResolveError::MissingViewModelDirective);
        assert_eq!(
            resolve("@viewModel App.Nope, App\n<p></p>").unwrap_err(),
            ResolveError::UnknownViewModelType("App.Nope".into())
        );
    }

    #[test]
    fn unknown_controls_and_properties_are_rejected() {
        let err = resolve("@viewModel App.CustomersPage\n<dot:Nope />").unwrap_err();
        assert!(matches!(err, ResolveError::UnknownControl { ref name, .. } if name == "Nope"));

        let err = resolve("@viewModel App.CustomersPage\n<dot:TextBox Txt=\"{value: Title}\" />").unwrap_err();
        assert!(matches!(err, ResolveError::UnknownProperty { ref property, .. } if property == "Txt"));

        // lowercase attributes pass through as html
        resolve("@viewModel App.CustomersPage\n<dot:TextBox Text=\"{value: Title}\" class=\"wide\" />").unwrap();
    }

    #[test]
    fn binding_syntax_errors_are_fatal() {
        let err = resolve("@viewModel App.CustomersPage\n<p>{{value: Title +}}</p>").unwrap_err();
        assert!(matches!(err, ResolveError::Binding { .. }));
        let err = resolve("@viewModel App.CustomersPage\n<dot:Button Click=\"Save\" />").unwrap_err();
        assert!(matches!(err, ResolveError::BindingRequired { .. }));
    }

    #[test]
    fn non_collection_data_source_is_rejected() {
        let err = resolve(
            "@viewModel App.CustomersPage\n<dot:Repeater DataSource=\"{value: Title}\"></dot:Repeater>",
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::NotACollection { .. }));
    }

    #[test]
    fn visitor_sees_every_binding() {
        struct Counter(usize, usize);
        impl ResolvedControlTreeVisitor for Counter {
            fn visit_control(&mut self, control: &ResolvedControl) {
                self.0 += 1;
                walk_control(self, control);
            }
            fn visit_binding(&mut self, _binding: &ResolvedBinding) {
                self.1 += 1;
            }
        }
        let view = resolve(
            "@viewModel App.CustomersPage\n<div><dot:Button Click=\"{command: Save()}\" Text=\"{value: Title}\" /></div>",
        )
        .unwrap();
        let mut counter = Counter(0, 0);
        view.accept(&mut counter);
        assert_eq!((counter.0, counter.1), (2, 2));
    }
}
