use super::protocol::{PostbackRequest, PostbackResponse, ViewModelChanges};
use super::{PathSegment, TrackedViewModel, ViewModelPath, lookup};
use crate::error::SerializationError;
use crate::types::{Direction, TypeRef, TypeRegistry};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Converts view models to and from the JSON wire format.
pub trait ViewModelSerializer: Send + Sync {
    /// `{"$type", "viewModel", "modified"}` envelope of the whole view model.
    fn serialize(&self, view_model: &TrackedViewModel) -> Result<String, SerializationError>;

    /// Wire form of the view-model tree alone, without the envelope.
    fn serialize_view_model(&self, view_model: &TrackedViewModel) -> Result<Value, SerializationError>;

    /// Validates the shape of an envelope without touching any view model.
    fn parse_changes(&self, payload: &Value) -> Result<ViewModelChanges, SerializationError>;

    /// Merges the marked paths of `changes` into `view_model`. Either every
    /// change is applied or none is. Server-only paths are skipped. Returns
    /// the applied paths.
    fn apply_changes(
        &self,
        changes: &ViewModelChanges,
        view_model: &mut TrackedViewModel,
    ) -> Result<Vec<ViewModelPath>, SerializationError>;

    fn deserialize_changes(
        &self,
        payload: &str,
        view_model: &mut TrackedViewModel,
    ) -> Result<Vec<ViewModelPath>, SerializationError> {
        let payload = parse_json(payload)?;
        let changes = self.parse_changes(&payload)?;
        self.apply_changes(&changes, view_model)
    }

    fn parse_postback_request(&self, body: &str) -> Result<PostbackRequest, SerializationError>;

    /// `successfulCommand` response carrying only what the server changed.
    fn build_postback_response(
        &self,
        view_model: &TrackedViewModel,
        resources: Vec<String>,
    ) -> Result<PostbackResponse, SerializationError>;

    /// `successfulCommand` response carrying the whole view model.
    fn build_navigation_response(
        &self,
        view_model: &TrackedViewModel,
        resources: Vec<String>,
        url: Option<String>,
    ) -> Result<PostbackResponse, SerializationError>;

    fn serialize_response(&self, response: &PostbackResponse) -> Result<String, SerializationError> {
        serde_json::to_string(response).map_err(|e| SerializationError::Encode(e.to_string()))
    }
}

fn parse_json(payload: &str) -> Result<Value, SerializationError> {
    serde_json::from_str(payload)
        .map_err(|e| SerializationError::validation("DOTVVM_E_JSON", format!("invalid JSON: {e}")))
}

fn envelope_error(message: impl Into<String>) -> SerializationError {
    SerializationError::validation("DOTVVM_E_ENVELOPE", message)
}

/// Registry-driven serializer. Object keys follow declared property order.
#[derive(Debug, Clone)]
pub struct DefaultViewModelSerializer {
    registry: Arc<TypeRegistry>,
}

impl DefaultViewModelSerializer {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self { registry }
    }

    fn root_type(&self, view_model: &TrackedViewModel) -> Result<TypeRef, SerializationError> {
        let name = view_model.type_name();
        if self.registry.get_type(name).is_none() {
            return Err(SerializationError::UnknownType(name.to_string()));
        }
        Ok(TypeRef::named(name))
    }

    /// Server-to-client projection of `value`.
    fn outgoing(&self, ty: &TypeRef, value: &Value) -> Value {
        match (ty.strip_nullable(), value) {
            (TypeRef::Named(_), Value::Object(map)) => match self.registry.descriptor_of(ty) {
                Some(descriptor) => {
                    let mut out = Map::new();
                    for property in &descriptor.properties {
                        if !property.direction.contains(Direction::SERVER_TO_CLIENT) {
                            continue;
                        }
                        let v = map.get(&property.name).unwrap_or(&Value::Null);
                        out.insert(property.name.clone(), self.outgoing(&property.property_type, v));
                    }
                    Value::Object(out)
                }
                None => value.clone(),
            },
            (TypeRef::Collection(element), Value::Array(items)) => {
                Value::Array(items.iter().map(|item| self.outgoing(element, item)).collect())
            }
            _ => value.clone(),
        }
    }

    /// Outgoing projection restricted to modified paths; `None` when nothing
    /// under `path` changed.
    fn outgoing_diff(
        &self,
        ty: &TypeRef,
        value: &Value,
        path: &ViewModelPath,
        modified: &BTreeSet<ViewModelPath>,
    ) -> Option<Value> {
        if modified.iter().any(|m| m.is_prefix_of(path)) {
            return Some(self.outgoing(ty, value));
        }
        if !modified.iter().any(|m| path.is_prefix_of(m)) {
            return None;
        }
        match (ty.strip_nullable(), value) {
            (TypeRef::Named(_), Value::Object(map)) => {
                let descriptor = self.registry.descriptor_of(ty)?;
                let mut out = Map::new();
                for property in &descriptor.properties {
                    if !property.direction.contains(Direction::SERVER_TO_CLIENT) {
                        continue;
                    }
                    let child = path.clone().property(property.name.clone());
                    let v = map.get(&property.name).unwrap_or(&Value::Null);
                    if let Some(diff) = self.outgoing_diff(&property.property_type, v, &child, modified) {
                        out.insert(property.name.clone(), diff);
                    }
                }
                (!out.is_empty()).then_some(Value::Object(out))
            }
            // Element changes resend the whole collection.
            _ => Some(self.outgoing(ty, value)),
        }
    }

    /// Type and effective direction of the value at `path`.
    fn resolve_path(
        &self,
        root: &TypeRef,
        path: &ViewModelPath,
    ) -> Result<(TypeRef, Direction), SerializationError> {
        let mut ty = root.clone();
        let mut direction = Direction::BOTH;
        for segment in path.segments() {
            match segment {
                PathSegment::Property(name) => {
                    if matches!(ty.strip_nullable(), TypeRef::Any) {
                        return Ok((TypeRef::Any, direction));
                    }
                    let descriptor = self.registry.descriptor_of(&ty).ok_or_else(|| {
                        SerializationError::validation(
                            "DOTVVM_E_PATH",
                            format!("'{ty}' has no properties"),
                        )
                        .at(path.to_string())
                    })?;
                    let property = descriptor.find_property(name).ok_or_else(|| {
                        SerializationError::validation(
                            "DOTVVM_E_UNKNOWN_PROPERTY",
                            format!("'{}' has no property '{name}'", descriptor.name),
                        )
                        .at(path.to_string())
                    })?;
                    direction &= property.direction;
                    ty = property.property_type.clone();
                }
                PathSegment::Index(_) => {
                    ty = match (ty.element_type(), ty.strip_nullable()) {
                        (Some(element), _) => element.clone(),
                        (None, TypeRef::Any) => TypeRef::Any,
                        _ => {
                            return Err(SerializationError::validation(
                                "DOTVVM_E_PATH",
                                format!("'{ty}' is not a collection"),
                            )
                            .at(path.to_string()));
                        }
                    };
                }
            }
        }
        Ok((ty, direction))
    }

    fn value_matches(&self, ty: &TypeRef, value: &Value) -> bool {
        match ty {
            TypeRef::Any => true,
            TypeRef::Nullable(inner) => value.is_null() || self.value_matches(inner, value),
            TypeRef::String => value.is_string() || value.is_null(),
            TypeRef::Int => value.is_i64() || value.is_u64(),
            TypeRef::Float => value.is_number(),
            TypeRef::Bool => value.is_boolean(),
            TypeRef::Collection(element) => match value {
                Value::Null => true,
                Value::Array(items) => items.iter().all(|item| self.value_matches(element, item)),
                _ => false,
            },
            TypeRef::Named(_) => match value {
                Value::Null => true,
                Value::Object(map) => match self.registry.descriptor_of(ty) {
                    Some(descriptor) => descriptor.properties.iter().all(|p| {
                        map.get(&p.name)
                            .is_none_or(|v| self.value_matches(&p.property_type, v))
                    }),
                    None => true,
                },
                _ => false,
            },
        }
    }

    /// Incoming value with server-only members taken from `existing`.
    fn incoming(&self, ty: &TypeRef, value: &Value, existing: Option<&Value>) -> Value {
        match (ty.strip_nullable(), value) {
            (TypeRef::Named(_), Value::Object(map)) => match self.registry.descriptor_of(ty) {
                Some(descriptor) => {
                    let existing = existing.and_then(Value::as_object);
                    let mut out = Map::new();
                    for property in &descriptor.properties {
                        let current = existing.and_then(|e| e.get(&property.name));
                        let merged = if property.direction.contains(Direction::CLIENT_TO_SERVER) {
                            map.get(&property.name)
                                .map(|v| self.incoming(&property.property_type, v, current))
                                .or_else(|| current.cloned())
                        } else {
                            current.cloned()
                        };
                        out.insert(property.name.clone(), merged.unwrap_or(Value::Null));
                    }
                    Value::Object(out)
                }
                None => value.clone(),
            },
            (TypeRef::Collection(element), Value::Array(items)) => {
                let existing = existing.and_then(Value::as_array);
                Value::Array(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| {
                            self.incoming(element, item, existing.and_then(|e| e.get(i)))
                        })
                        .collect(),
                )
            }
            _ => value.clone(),
        }
    }

    fn modified_paths(&self, value: &Value) -> Result<Vec<ViewModelPath>, SerializationError> {
        let entries = value
            .as_array()
            .ok_or_else(|| envelope_error("'modified' must be an array"))?;
        entries
            .iter()
            .map(|entry| match entry {
                Value::String(text) => text.parse(),
                other => serde_json::from_value::<ViewModelPath>(other.clone()).map_err(|_| {
                    envelope_error(format!("invalid entry in 'modified': {other}"))
                }),
            })
            .collect()
    }
}

impl ViewModelSerializer for DefaultViewModelSerializer {
    fn serialize(&self, view_model: &TrackedViewModel) -> Result<String, SerializationError> {
        let root = self.root_type(view_model)?;
        let modified: Vec<&ViewModelPath> = view_model
            .modified()
            .filter(|path| {
                self.resolve_path(&root, path)
                    .is_ok_and(|(_, d)| d.contains(Direction::SERVER_TO_CLIENT))
            })
            .collect();

        let mut envelope = Map::new();
        envelope.insert("$type".into(), Value::String(view_model.type_name().to_string()));
        envelope.insert("viewModel".into(), self.outgoing(&root, view_model.root()));
        envelope.insert(
            "modified".into(),
            serde_json::to_value(modified).map_err(|e| SerializationError::Encode(e.to_string()))?,
        );
        serde_json::to_string(&Value::Object(envelope))
            .map_err(|e| SerializationError::Encode(e.to_string()))
    }

    fn serialize_view_model(&self, view_model: &TrackedViewModel) -> Result<Value, SerializationError> {
        let root = self.root_type(view_model)?;
        Ok(self.outgoing(&root, view_model.root()))
    }

    fn parse_changes(&self, payload: &Value) -> Result<ViewModelChanges, SerializationError> {
        let object = payload
            .as_object()
            .ok_or_else(|| envelope_error("payload must be a JSON object"))?;
        let type_name = match object.get("$type") {
            None => None,
            Some(Value::String(name)) => Some(name.clone()),
            Some(_) => return Err(envelope_error("'$type' must be a string")),
        };
        let view_model = object
            .get("viewModel")
            .ok_or_else(|| envelope_error("missing 'viewModel'"))?;
        if !view_model.is_object() {
            return Err(envelope_error("'viewModel' must be an object"));
        }
        let modified = object
            .get("modified")
            .ok_or_else(|| envelope_error("missing 'modified'"))?;
        Ok(ViewModelChanges {
            type_name,
            view_model: view_model.clone(),
            modified: self.modified_paths(modified)?,
        })
    }

    fn apply_changes(
        &self,
        changes: &ViewModelChanges,
        view_model: &mut TrackedViewModel,
    ) -> Result<Vec<ViewModelPath>, SerializationError> {
        if let Some(name) = &changes.type_name {
            if name != view_model.type_name() {
                return Err(SerializationError::validation(
                    "DOTVVM_E_TYPE_MISMATCH",
                    format!("expected '{}', got '{name}'", view_model.type_name()),
                ));
            }
        }
        let root = self.root_type(view_model)?;

        let mut staged = view_model.clone();
        let mut applied = Vec::with_capacity(changes.modified.len());
        for path in &changes.modified {
            if path.is_root() {
                return Err(SerializationError::validation(
                    "DOTVVM_E_PATH",
                    "the view-model root cannot be replaced",
                ));
            }
            let (ty, direction) = self.resolve_path(&root, path)?;
            if !direction.contains(Direction::CLIENT_TO_SERVER) {
                debug!(path = %path, "skipping server-only property");
                continue;
            }
            let value = lookup(&changes.view_model, path).ok_or_else(|| {
                SerializationError::validation(
                    "DOTVVM_E_MISSING_VALUE",
                    "path is marked modified but has no value",
                )
                .at(path.to_string())
            })?;
            if !self.value_matches(&ty, value) {
                return Err(SerializationError::validation(
                    "DOTVVM_E_VALUE",
                    format!("value {value} is not a valid '{ty}'"),
                )
                .at(path.to_string()));
            }
            let merged = self.incoming(&ty, value, staged.get(path));
            staged.write(path, merged)?;
            applied.push(path.clone());
        }

        *view_model = staged;
        debug!(
            view_model = %view_model.type_name(),
            applied = applied.len(),
            "merged client changes"
        );
        Ok(applied)
    }

    fn parse_postback_request(&self, body: &str) -> Result<PostbackRequest, SerializationError> {
        let payload = parse_json(body)?;
        let command = payload
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| envelope_error("missing 'command'"))?
            .to_string();
        let args = match payload.get("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(args)) => args.clone(),
            Some(_) => return Err(envelope_error("'args' must be an array")),
        };
        Ok(PostbackRequest {
            command,
            args,
            changes: self.parse_changes(&payload)?,
        })
    }

    fn build_postback_response(
        &self,
        view_model: &TrackedViewModel,
        resources: Vec<String>,
    ) -> Result<PostbackResponse, SerializationError> {
        let root = self.root_type(view_model)?;
        let diff = self.outgoing_diff(
            &root,
            view_model.root(),
            &ViewModelPath::root(),
            view_model.modified_set(),
        );
        let mut response = PostbackResponse::successful_command(resources);
        response.type_name = Some(view_model.type_name().to_string());
        response.view_model_diff = Some(diff.unwrap_or_else(|| Value::Object(Map::new())));
        Ok(response)
    }

    fn build_navigation_response(
        &self,
        view_model: &TrackedViewModel,
        resources: Vec<String>,
        url: Option<String>,
    ) -> Result<PostbackResponse, SerializationError> {
        let mut response = PostbackResponse::successful_command(resources);
        response.type_name = Some(view_model.type_name().to_string());
        response.view_model = Some(self.serialize_view_model(view_model)?);
        response.url = url;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeDescriptor;
    use proptest::prelude::*;
    use serde_json::json;

    fn serializer() -> DefaultViewModelSerializer {
        let mut registry = TypeRegistry::new();
        registry.register_type(
            TypeDescriptor::new("Page")
                .property("Title", TypeRef::String)
                .property("Count", TypeRef::Int)
                .property("Done", TypeRef::Bool)
                .property("Note", TypeRef::String)
                .property_with_direction("Secret", TypeRef::String, Direction::SERVER_TO_CLIENT)
                .property_with_direction("Password", TypeRef::String, Direction::CLIENT_TO_SERVER)
                .property("Items", TypeRef::collection_of(TypeRef::named("Item"))),
        );
        registry.register_type(
            TypeDescriptor::new("Item")
                .property("Name", TypeRef::String)
                .property_with_direction("Id", TypeRef::Int, Direction::SERVER_TO_CLIENT),
        );
        DefaultViewModelSerializer::new(Arc::new(registry))
    }

    fn baseline() -> TrackedViewModel {
        TrackedViewModel::new(
            "Page",
            json!({
                "Items": [{"Id": 1, "Name": "a"}],
                "Title": "hello",
                "Count": 1,
                "Done": false,
                "Note": "n",
                "Secret": "s",
                "Password": "p"
            }),
        )
    }

    fn path(text: &str) -> ViewModelPath {
        text.parse().unwrap()
    }

    #[test]
    fn output_follows_declared_order_and_direction() {
        let s = serializer();
        let text = s.serialize(&baseline()).unwrap();
        assert_eq!(
            text,
            r#"{"$type":"Page","viewModel":{"Title":"hello","Count":1,"Done":false,"Note":"n","Secret":"s","Items":[{"Name":"a","Id":1}]},"modified":[]}"#
        );
    }

    #[test]
    fn output_is_independent_of_modification_order() {
        let s = serializer();
        let mut a = baseline();
        a.set(&path("Title"), json!("x")).unwrap();
        a.set(&path("Count"), json!(2)).unwrap();
        let mut b = baseline();
        b.set(&path("Count"), json!(2)).unwrap();
        b.set(&path("Title"), json!("x")).unwrap();
        assert_eq!(s.serialize(&a).unwrap(), s.serialize(&b).unwrap());
    }

    #[test]
    fn merges_only_marked_fields() {
        let s = serializer();
        let mut vm = baseline();
        let payload = json!({
            "$type": "Page",
            "viewModel": {"Title": "changed", "Count": 99, "Done": true},
            "modified": [["Title"], "Done"]
        });
        let applied = s.deserialize_changes(&payload.to_string(), &mut vm).unwrap();
        assert_eq!(applied, vec![path("Title"), path("Done")]);
        assert_eq!(vm.get_str("Title"), Some(&json!("changed")));
        assert_eq!(vm.get_str("Done"), Some(&json!(true)));
        assert_eq!(vm.get_str("Count"), Some(&json!(1)));
        assert!(!vm.has_changes());
    }

    #[test]
    fn server_only_members_cannot_be_written() {
        let s = serializer();
        let mut vm = baseline();
        let payload = json!({
            "viewModel": {"Secret": "hacked", "Title": "kept"},
            "modified": [["Secret"], ["Title"]]
        });
        let applied = s.deserialize_changes(&payload.to_string(), &mut vm).unwrap();
        assert_eq!(applied, vec![path("Title")]);
        assert_eq!(vm.get_str("Secret"), Some(&json!("s")));
        assert_eq!(vm.get_str("Title"), Some(&json!("kept")));

        // nested server-only members keep their server value
        let payload = json!({
            "viewModel": {"Items": [{"Id": 42, "Name": "b"}]},
            "modified": [["Items"], ["Items", 0, "Id"]]
        });
        s.deserialize_changes(&payload.to_string(), &mut vm).unwrap();
        assert_eq!(vm.get_str("Items[0].Id"), Some(&json!(1)));
        assert_eq!(vm.get_str("Items[0].Name"), Some(&json!("b")));
    }

    #[test]
    fn serialized_changes_to_server_only_members_still_round_trip() {
        let s = serializer();
        let mut server = baseline();
        server.set(&path("Title"), json!("b")).unwrap();
        server.set(&path("Secret"), json!("s2")).unwrap();

        let wire = s.serialize(&server).unwrap();
        let mut copy = baseline();
        let applied = s.deserialize_changes(&wire, &mut copy).unwrap();
        assert_eq!(applied, vec![path("Title")]);
        assert_eq!(copy.get_str("Title"), Some(&json!("b")));
        assert_eq!(copy.get_str("Secret"), Some(&json!("s")));
    }

    #[test]
    fn malformed_payloads_are_rejected_without_partial_application() {
        let s = serializer();
        let mut vm = baseline();
        let before = vm.clone();

        let err = s.deserialize_changes(r#"{"modified": []}"#, &mut vm).unwrap_err();
        assert_eq!(err.code(), "DOTVVM_E_ENVELOPE");
        let err = s.deserialize_changes(r#"{"viewModel": {}}"#, &mut vm).unwrap_err();
        assert_eq!(err.code(), "DOTVVM_E_ENVELOPE");
        let err = s.deserialize_changes("not json", &mut vm).unwrap_err();
        assert_eq!(err.code(), "DOTVVM_E_JSON");

        let payload = json!({
            "viewModel": {"Title": "ok", "Count": "not a number"},
            "modified": [["Title"], ["Count"]]
        });
        let err = s.deserialize_changes(&payload.to_string(), &mut vm).unwrap_err();
        assert_eq!(err.code(), "DOTVVM_E_VALUE");
        assert_eq!(vm, before);

        let payload = json!({"$type": "Other", "viewModel": {}, "modified": []});
        let err = s.deserialize_changes(&payload.to_string(), &mut vm).unwrap_err();
        assert_eq!(err.code(), "DOTVVM_E_TYPE_MISMATCH");
    }

    #[test]
    fn postback_response_contains_only_the_diff() {
        let s = serializer();
        let mut vm = baseline();
        vm.set(&path("Count"), json!(5)).unwrap();
        vm.set(&path("Items[0].Name"), json!("z")).unwrap();
        vm.set(&path("Password"), json!("new")).unwrap();
        let response = s.build_postback_response(&vm, vec!["knockout".into()]).unwrap();
        assert_eq!(
            s.serialize_response(&response).unwrap(),
            r#"{"action":"successfulCommand","resources":["knockout"],"$type":"Page","viewModelDiff":{"Count":5,"Items":[{"Name":"z","Id":1}]}}"#
        );
    }

    #[test]
    fn parses_postback_requests() {
        let s = serializer();
        let request = s
            .parse_postback_request(
                r#"{"command":"Save()","args":[1],"viewModel":{"Title":"t"},"modified":["Title"]}"#,
            )
            .unwrap();
        assert_eq!(request.command, "Save()");
        assert_eq!(request.args, vec![json!(1)]);
        assert_eq!(request.changes.modified, vec![path("Title")]);
        assert_eq!(
            s.parse_postback_request(r#"{"viewModel":{},"modified":[]}"#).unwrap_err().code(),
            "DOTVVM_E_ENVELOPE"
        );
    }

    proptest! {
        #[test]
        fn round_trip_reproduces_exactly_the_modified_fields(
            title in proptest::option::of("[a-z]{0,8}"),
            count in proptest::option::of(any::<i32>()),
            done in proptest::option::of(any::<bool>()),
            note in proptest::option::of("[a-z ]{0,8}"),
            secret in proptest::option::of("[a-z]{1,8}"),
        ) {
            let s = serializer();
            let mut server = baseline();
            if let Some(v) = &title { server.set(&path("Title"), json!(v)).unwrap(); }
            if let Some(v) = count { server.set(&path("Count"), json!(v)).unwrap(); }
            if let Some(v) = done { server.set(&path("Done"), json!(v)).unwrap(); }
            if let Some(v) = &note { server.set(&path("Note"), json!(v)).unwrap(); }
            if let Some(v) = &secret { server.set(&path("Secret"), json!(v)).unwrap(); }

            let wire = s.serialize(&server).unwrap();
            let mut copy = baseline();
            s.deserialize_changes(&wire, &mut copy).unwrap();

            let base = baseline();
            for (field, changed) in [
                ("Title", title.is_some()),
                ("Count", count.is_some()),
                ("Done", done.is_some()),
                ("Note", note.is_some()),
            ] {
                let expected = if changed { server.get_str(field) } else { base.get_str(field) };
                prop_assert_eq!(copy.get_str(field), expected);
            }
            prop_assert_eq!(copy.get_str("Secret"), base.get_str("Secret"));
            prop_assert_eq!(copy.get_str("Items"), base.get_str("Items"));
        }
    }
}
