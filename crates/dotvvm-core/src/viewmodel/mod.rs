//! Server-held view models and their JSON wire format.
//!
//! A [`TrackedViewModel`] is the authoritative JSON value tree of one page
//! plus the set of paths changed since the last response. The
//! [`ViewModelSerializer`] turns it into the wire envelope and merges client
//! changes back, touching only the paths the client marked as modified.

mod protocol;
mod serializer;

pub use protocol::{PostbackAction, PostbackRequest, PostbackResponse, ViewModelChanges};
pub use serializer::{DefaultViewModelSerializer, ViewModelSerializer};

use crate::error::SerializationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// One step of a [`ViewModelPath`]; serialized as a JSON string or integer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Property(String),
}

/// Path into a view model, e.g. `Customers[0].Name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewModelPath(pub Vec<PathSegment>);

impl ViewModelPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn property(mut self, name: impl Into<String>) -> Self {
        self.0.push(PathSegment::Property(name.into()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.0.push(PathSegment::Index(index));
        self
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// True when `self` equals `other` or lies above it.
    pub fn is_prefix_of(&self, other: &ViewModelPath) -> bool {
        other.0.starts_with(&self.0)
    }
}

impl fmt::Display for ViewModelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Property(name) if i == 0 => write!(f, "{name}")?,
                PathSegment::Property(name) => write!(f, ".{name}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for ViewModelPath {
    type Err = SerializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SerializationError::validation("DOTVVM_E_PATH", format!("invalid path '{s}'"));
        let mut path = ViewModelPath::root();
        for part in s.split('.') {
            let (name, mut rest) = match part.find('[') {
                Some(i) => (&part[..i], &part[i..]),
                None => (part, ""),
            };
            if name.is_empty() {
                return Err(invalid());
            }
            path = path.property(name);
            while !rest.is_empty() {
                let close = rest.find(']').ok_or_else(invalid)?;
                let index = rest[1..close].parse::<usize>().map_err(|_| invalid())?;
                path = path.index(index);
                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(invalid());
                }
            }
        }
        Ok(path)
    }
}

/// The authoritative view model of one request with change tracking.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedViewModel {
    type_name: String,
    root: Value,
    modified: BTreeSet<ViewModelPath>,
}

impl TrackedViewModel {
    /// `root` should be a JSON object shaped like the registered type.
    pub fn new(type_name: impl Into<String>, root: Value) -> Self {
        Self {
            type_name: type_name.into(),
            root,
            modified: BTreeSet::new(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn get(&self, path: &ViewModelPath) -> Option<&Value> {
        lookup(&self.root, path)
    }

    /// Convenience lookup by `Customers[0].Name`-style path.
    pub fn get_str(&self, path: &str) -> Option<&Value> {
        self.get(&path.parse().ok()?)
    }

    /// Writes `value` at `path` and marks the path as modified.
    pub fn set(&mut self, path: &ViewModelPath, value: Value) -> Result<(), SerializationError> {
        self.write(path, value)?;
        self.modified.insert(path.clone());
        Ok(())
    }

    /// Writes without marking; used when merging client changes.
    pub(crate) fn write(&mut self, path: &ViewModelPath, value: Value) -> Result<(), SerializationError> {
        let Some((last, parent)) = path.0.split_last() else {
            self.root = value;
            return Ok(());
        };
        let parent_path = ViewModelPath(parent.to_vec());
        let container = lookup_mut(&mut self.root, &parent_path).ok_or_else(|| {
            SerializationError::validation("DOTVVM_E_PATH", "parent of the path does not exist")
                .at(path.to_string())
        })?;
        match (container, last) {
            (Value::Object(map), PathSegment::Property(name)) => {
                map.insert(name.clone(), value);
                Ok(())
            }
            (Value::Array(items), PathSegment::Index(index)) if *index < items.len() => {
                items[*index] = value;
                Ok(())
            }
            _ => Err(SerializationError::validation(
                "DOTVVM_E_PATH",
                "path does not address an existing property or element",
            )
            .at(path.to_string())),
        }
    }

    pub fn is_modified(&self, path: &ViewModelPath) -> bool {
        self.modified.contains(path)
    }

    /// Modified paths in a stable order.
    pub fn modified(&self) -> impl Iterator<Item = &ViewModelPath> {
        self.modified.iter()
    }

    pub fn has_changes(&self) -> bool {
        !self.modified.is_empty()
    }

    pub fn clear_modified(&mut self) {
        self.modified.clear();
    }

    pub(crate) fn modified_set(&self) -> &BTreeSet<ViewModelPath> {
        &self.modified
    }
}

pub(crate) fn lookup<'a>(root: &'a Value, path: &ViewModelPath) -> Option<&'a Value> {
    path.0.iter().try_fold(root, |value, segment| match (value, segment) {
        (Value::Object(map), PathSegment::Property(name)) => map.get(name),
        (Value::Array(items), PathSegment::Index(index)) => items.get(*index),
        _ => None,
    })
}

fn lookup_mut<'a>(root: &'a mut Value, path: &ViewModelPath) -> Option<&'a mut Value> {
    path.0.iter().try_fold(root, |value, segment| match (value, segment) {
        (Value::Object(map), PathSegment::Property(name)) => map.get_mut(name),
        (Value::Array(items), PathSegment::Index(index)) => items.get_mut(*index),
        _ => None,
    })
}

/// Empty JSON object, the usual starting point for a view model.
pub fn empty_object() -> Value {
    Value::Object(Map::new())
}
