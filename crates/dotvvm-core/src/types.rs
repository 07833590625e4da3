//! View-model type descriptors and control metadata.
//!
//! There is no runtime reflection, so every view-model type and every control
//! a view may reference is registered up front in a [`TypeRegistry`].

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

bitflags! {
    /// Which way a view-model property may travel over the wire.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Direction: u8 {
        const SERVER_TO_CLIENT = 0b01;
        const CLIENT_TO_SERVER = 0b10;
        const BOTH = Self::SERVER_TO_CLIENT.bits() | Self::CLIENT_TO_SERVER.bits();
    }
}

impl Default for Direction {
    fn default() -> Self {
        Self::BOTH
    }
}

impl Direction {
    pub fn name(self) -> &'static str {
        if self == Self::BOTH {
            "both"
        } else if self == Self::SERVER_TO_CLIENT {
            "serverToClient"
        } else if self == Self::CLIENT_TO_SERVER {
            "clientToServer"
        } else {
            "none"
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::empty()),
            "serverToClient" => Ok(Self::SERVER_TO_CLIENT),
            "clientToServer" => Ok(Self::CLIENT_TO_SERVER),
            "both" => Ok(Self::BOTH),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

impl Serialize for Direction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Direction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Reference to a view-model type, written as `string`, `int`, `Customer`,
/// `Customer[]` or `Customer?` in project files.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    String,
    Int,
    Float,
    Bool,
    Named(String),
    Collection(Box<TypeRef>),
    Nullable(Box<TypeRef>),
    Any,
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn collection_of(element: TypeRef) -> Self {
        Self::Collection(Box::new(element))
    }

    /// Element type of a collection, looking through nullability.
    pub fn element_type(&self) -> Option<&TypeRef> {
        match self {
            Self::Collection(inner) => Some(inner),
            Self::Nullable(inner) => inner.element_type(),
            _ => None,
        }
    }

    pub fn strip_nullable(&self) -> &TypeRef {
        match self {
            Self::Nullable(inner) => inner.strip_nullable(),
            other => other,
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self.strip_nullable(),
            Self::String | Self::Int | Self::Float | Self::Bool
        )
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Bool => write!(f, "bool"),
            Self::Named(name) => write!(f, "{name}"),
            Self::Collection(inner) => write!(f, "{inner}[]"),
            Self::Nullable(inner) => write!(f, "{inner}?"),
            Self::Any => write!(f, "any"),
        }
    }
}

impl FromStr for TypeRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty type name".to_string());
        }
        if let Some(inner) = s.strip_suffix("[]") {
            return Ok(Self::collection_of(inner.parse()?));
        }
        if let Some(inner) = s.strip_suffix('?') {
            return Ok(Self::Nullable(Box::new(inner.parse()?)));
        }
        Ok(match s {
            "string" => Self::String,
            "int" | "long" => Self::Int,
            "float" | "double" | "decimal" => Self::Float,
            "bool" => Self::Bool,
            "any" | "object" => Self::Any,
            name => {
                if !name
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
                {
                    return Err(format!("invalid type name '{name}'"));
                }
                Self::Named(name.to_string())
            }
        })
    }
}

impl Serialize for TypeRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TypeRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub property_type: TypeRef,
    #[serde(default)]
    pub direction: Direction,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>, property_type: TypeRef) -> Self {
        Self {
            name: name.into(),
            property_type,
            direction: Direction::BOTH,
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDescriptor {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<TypeRef>,
    #[serde(default = "void_type")]
    pub returns: TypeRef,
}

fn void_type() -> TypeRef {
    TypeRef::Any
}

/// A registered view-model type. Property order is the wire order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDescriptor {
    pub name: String,
    #[serde(default)]
    pub properties: Vec<PropertyDescriptor>,
    #[serde(default)]
    pub methods: Vec<MethodDescriptor>,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn property(mut self, name: impl Into<String>, property_type: TypeRef) -> Self {
        self.properties
            .push(PropertyDescriptor::new(name, property_type));
        self
    }

    pub fn property_with_direction(
        mut self,
        name: impl Into<String>,
        property_type: TypeRef,
        direction: Direction,
    ) -> Self {
        self.properties
            .push(PropertyDescriptor::new(name, property_type).with_direction(direction));
        self
    }

    pub fn method(mut self, name: impl Into<String>, parameters: Vec<TypeRef>) -> Self {
        self.methods.push(MethodDescriptor {
            name: name.into(),
            parameters,
            returns: TypeRef::Any,
        });
        self
    }

    pub fn find_property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn find_method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// How a control property changes the data context of the control's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataContextChange {
    /// Children bind to the element type of the bound collection (`DataSource`).
    CollectionElement,
    /// The control and its children bind to the bound value (`DataContext`).
    PropertyType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPropertyMetadata {
    pub name: String,
    #[serde(rename = "type", default = "any_type")]
    pub property_type: TypeRef,
    #[serde(default)]
    pub binding_required: bool,
    #[serde(default)]
    pub data_context_change: Option<DataContextChange>,
}

fn any_type() -> TypeRef {
    TypeRef::Any
}

impl ControlPropertyMetadata {
    pub fn new(name: impl Into<String>, property_type: TypeRef) -> Self {
        Self {
            name: name.into(),
            property_type,
            binding_required: false,
            data_context_change: None,
        }
    }

    pub fn binding_required(mut self) -> Self {
        self.binding_required = true;
        self
    }

    pub fn changes_data_context(mut self, change: DataContextChange) -> Self {
        self.data_context_change = Some(change);
        self
    }
}

/// Metadata of a `prefix:Name` control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlMetadata {
    pub prefix: String,
    pub name: String,
    #[serde(default)]
    pub properties: Vec<ControlPropertyMetadata>,
    /// Attribute name prefixes accepted as a property group (`Param-`).
    #[serde(default)]
    pub property_groups: Vec<String>,
    #[serde(default = "default_true")]
    pub allows_content: bool,
    /// HTML tag the control renders as; `None` renders only its content.
    #[serde(default)]
    pub tag_name: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ControlMetadata {
    pub fn new(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            name: name.into(),
            properties: vec![ControlPropertyMetadata::new("ID", TypeRef::String)],
            property_groups: Vec::new(),
            allows_content: true,
            tag_name: None,
        }
    }

    /// Metadata for plain HTML elements (`<div>`, `<span>`, ...).
    pub fn html_generic(tag: &str) -> Self {
        let mut metadata = Self::new("", tag);
        metadata.tag_name = Some(tag.to_string());
        metadata
    }

    pub fn with_property(mut self, property: ControlPropertyMetadata) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_property_group(mut self, prefix: impl Into<String>) -> Self {
        self.property_groups.push(prefix.into());
        self
    }

    pub fn without_content(mut self) -> Self {
        self.allows_content = false;
        self
    }

    pub fn rendered_as(mut self, tag: impl Into<String>) -> Self {
        self.tag_name = Some(tag.into());
        self
    }

    pub fn full_name(&self) -> String {
        if self.prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{}:{}", self.prefix, self.name)
        }
    }

    pub fn is_html_generic(&self) -> bool {
        self.prefix.is_empty()
    }

    pub fn find_property(&self, name: &str) -> Option<&ControlPropertyMetadata> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn accepts_group_property(&self, name: &str) -> bool {
        self.property_groups.iter().any(|g| {
            name.len() > g.len() && name[..g.len()].eq_ignore_ascii_case(g)
        })
    }
}

/// Registry of view-model types and controls known to the compiler.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, TypeDescriptor>,
    controls: HashMap<(String, String), ControlMetadata>,
}

impl TypeRegistry {
    /// Empty registry without the builtin `dot:` controls.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new() -> Self {
        let mut registry = Self::default();
        for control in builtin_controls() {
            registry.register_control(control);
        }
        registry
    }

    pub fn register_type(&mut self, descriptor: TypeDescriptor) -> Option<TypeDescriptor> {
        self.types.insert(descriptor.name.clone(), descriptor)
    }

    pub fn register_control(&mut self, control: ControlMetadata) -> Option<ControlMetadata> {
        let key = (
            control.prefix.to_ascii_lowercase(),
            control.name.to_ascii_lowercase(),
        );
        self.controls.insert(key, control)
    }

    pub fn get_type(&self, name: &str) -> Option<&TypeDescriptor> {
        self.types.get(name)
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.values()
    }

    pub fn controls(&self) -> impl Iterator<Item = &ControlMetadata> {
        self.controls.values()
    }

    pub fn get_control(&self, prefix: &str, name: &str) -> Option<&ControlMetadata> {
        self.controls
            .get(&(prefix.to_ascii_lowercase(), name.to_ascii_lowercase()))
    }

    /// Descriptor behind a `Named` type reference.
    pub fn descriptor_of(&self, type_ref: &TypeRef) -> Option<&TypeDescriptor> {
        match type_ref.strip_nullable() {
            TypeRef::Named(name) => self.types.get(name),
            _ => None,
        }
    }

    /// Type of `owner.member`, `None` when it cannot be determined statically.
    pub fn member_type(&self, owner: &TypeRef, member: &str) -> Option<TypeRef> {
        if owner.element_type().is_some() {
            return match member {
                "Count" | "Length" => Some(TypeRef::Int),
                _ => None,
            };
        }
        if matches!(owner.strip_nullable(), TypeRef::String) && member == "Length" {
            return Some(TypeRef::Int);
        }
        self.descriptor_of(owner)?
            .find_property(member)
            .map(|p| p.property_type.clone())
    }

    pub fn method(&self, owner: &TypeRef, name: &str) -> Option<&MethodDescriptor> {
        self.descriptor_of(owner)?.find_method(name)
    }
}

fn builtin_controls() -> Vec<ControlMetadata> {
    use DataContextChange::CollectionElement;

    let data_source = || {
        ControlPropertyMetadata::new("DataSource", TypeRef::Any)
            .binding_required()
            .changes_data_context(CollectionElement)
    };

    vec![
        ControlMetadata::new("dot", "Repeater")
            .with_property(data_source())
            .with_property(ControlPropertyMetadata::new("WrapperTagName", TypeRef::String))
            .rendered_as("div"),
        ControlMetadata::new("dot", "GridView")
            .with_property(data_source())
            .rendered_as("table"),
        ControlMetadata::new("dot", "GridViewTextColumn")
            .with_property(ControlPropertyMetadata::new("HeaderText", TypeRef::String))
            .with_property(ControlPropertyMetadata::new("ValueBinding", TypeRef::Any).binding_required())
            .without_content(),
        ControlMetadata::new("dot", "TextBox")
            .with_property(ControlPropertyMetadata::new("Text", TypeRef::String))
            .with_property(ControlPropertyMetadata::new("Type", TypeRef::String))
            .with_property(ControlPropertyMetadata::new("Enabled", TypeRef::Bool))
            .without_content()
            .rendered_as("input"),
        ControlMetadata::new("dot", "CheckBox")
            .with_property(ControlPropertyMetadata::new("Checked", TypeRef::Bool))
            .with_property(ControlPropertyMetadata::new("Text", TypeRef::String))
            .without_content()
            .rendered_as("input"),
        ControlMetadata::new("dot", "Button")
            .with_property(ControlPropertyMetadata::new("Text", TypeRef::String))
            .with_property(ControlPropertyMetadata::new("Click", TypeRef::Any).binding_required())
            .with_property(ControlPropertyMetadata::new("Enabled", TypeRef::Bool))
            .rendered_as("button"),
        ControlMetadata::new("dot", "LinkButton")
            .with_property(ControlPropertyMetadata::new("Text", TypeRef::String))
            .with_property(ControlPropertyMetadata::new("Click", TypeRef::Any).binding_required())
            .rendered_as("a"),
        ControlMetadata::new("dot", "Literal")
            .with_property(ControlPropertyMetadata::new("Text", TypeRef::String))
            .without_content()
            .rendered_as("span"),
        ControlMetadata::new("dot", "RouteLink")
            .with_property(ControlPropertyMetadata::new("RouteName", TypeRef::String))
            .with_property(ControlPropertyMetadata::new("Text", TypeRef::String))
            .with_property_group("Param-")
            .rendered_as("a"),
        ControlMetadata::new("dot", "Content")
            .with_property(ControlPropertyMetadata::new("ContentPlaceHolderID", TypeRef::String)),
        ControlMetadata::new("dot", "ContentPlaceHolder").rendered_as("div"),
        ControlMetadata::new("dot", "SpaContentPlaceHolder").rendered_as("div"),
    ]
}
