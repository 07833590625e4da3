use dotvvm_core::viewmodel::PathSegment;
use dotvvm_core::{SerializationError, ViewModelPath};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Client copy of the view model with the paths the user changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientViewModel {
    type_name: Option<String>,
    root: Value,
    modified: BTreeSet<ViewModelPath>,
}

impl ClientViewModel {
    pub fn new(type_name: Option<String>, root: Value) -> Self {
        Self {
            type_name,
            root,
            modified: BTreeSet::new(),
        }
    }

    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn get(&self, path: &ViewModelPath) -> Option<&Value> {
        path.segments()
            .iter()
            .try_fold(&self.root, |value, segment| match (value, segment) {
                (Value::Object(map), PathSegment::Property(name)) => map.get(name),
                (Value::Array(items), PathSegment::Index(index)) => items.get(*index),
                _ => None,
            })
    }

    /// User edit: writes `value` and marks `path` for the next postback.
    pub fn set(&mut self, path: &ViewModelPath, value: Value) -> Result<(), SerializationError> {
        let slot = path
            .segments()
            .iter()
            .try_fold(&mut self.root, |value, segment| match (value, segment) {
                (Value::Object(map), PathSegment::Property(name)) => Some(map.entry(name.clone()).or_insert(Value::Null)),
                (Value::Array(items), PathSegment::Index(index)) => items.get_mut(*index),
                _ => None,
            })
            .ok_or_else(|| {
                SerializationError::validation("DOTVVM_E_PATH", "path does not exist in the view model")
                    .at(path.to_string())
            })?;
        *slot = value;
        self.modified.insert(path.clone());
        Ok(())
    }

    pub fn modified(&self) -> impl Iterator<Item = &ViewModelPath> {
        self.modified.iter()
    }

    pub fn clear_modified(&mut self) {
        self.modified.clear();
    }

    /// Replaces the whole view model (SPA navigation).
    pub fn replace(&mut self, type_name: Option<String>, root: Value) {
        self.type_name = type_name;
        self.root = root;
        self.modified.clear();
    }

    /// Merges a server diff: objects merge key by key, anything else replaces.
    pub fn patch(&mut self, diff: &Value) {
        merge(&mut self.root, diff);
    }

    /// `{"command", "args", "$type", "viewModel", "modified"}` postback body.
    pub fn postback_body(&self, command: &str, args: &[Value]) -> Value {
        let mut body = Map::new();
        body.insert("command".into(), Value::String(command.to_string()));
        body.insert("args".into(), Value::Array(args.to_vec()));
        if let Some(type_name) = &self.type_name {
            body.insert("$type".into(), Value::String(type_name.clone()));
        }
        body.insert("viewModel".into(), self.root.clone());
        body.insert(
            "modified".into(),
            self.modified.iter().map(|p| Value::String(p.to_string())).collect(),
        );
        Value::Object(body)
    }
}

fn merge(target: &mut Value, diff: &Value) {
    match (target, diff) {
        (Value::Object(target), Value::Object(diff)) => {
            for (key, value) in diff {
                merge(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (target, diff) => *target = diff.clone(),
    }
}
