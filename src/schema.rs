//! Structural schemas for registered resource types.
//!
//! A [`Schema`] is the compiled form of an OpenAPI-style schema node
//! (`type`, `properties`, `items`, `additionalProperties`,
//! `x-kubernetes-preserve-unknown-fields`). The registry uses it to reject
//! rules whose path templates name fields the resource does not have.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

use crate::path::{PathTemplate, TemplateSegment};

/// The `type` of a schema node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SchemaType {
    Object,
    Array,
    String,
    Integer,
    Number,
    Boolean,
    /// No declared type; any value, children unconstrained.
    #[default]
    Any,
}

impl SchemaType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "object" => Some(SchemaType::Object),
            "array" => Some(SchemaType::Array),
            "string" => Some(SchemaType::String),
            "integer" => Some(SchemaType::Integer),
            "number" => Some(SchemaType::Number),
            "boolean" => Some(SchemaType::Boolean),
            _ => None,
        }
    }
}

/// A compiled schema node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schema {
    pub schema_type: SchemaType,
    pub properties: BTreeMap<String, Schema>,
    pub items: Option<Box<Schema>>,
    pub additional_properties: Option<Box<Schema>>,
    pub preserve_unknown_fields: bool,
}

static ANY: Schema = Schema {
    schema_type: SchemaType::Any,
    properties: BTreeMap::new(),
    items: None,
    additional_properties: None,
    preserve_unknown_fields: true,
};

/// Errors raised while compiling a raw schema node.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("schema node at \"{path}\" is not an object")]
    NotAnObject { path: String },
    #[error("unsupported type \"{schema_type}\" at \"{path}\"")]
    UnknownType { path: String, schema_type: String },
}

impl Schema {
    pub fn string() -> Self {
        Self::of(SchemaType::String)
    }

    pub fn integer() -> Self {
        Self::of(SchemaType::Integer)
    }

    pub fn boolean() -> Self {
        Self::of(SchemaType::Boolean)
    }

    /// An object node with the given properties.
    pub fn object<I, S>(properties: I) -> Self
    where
        I: IntoIterator<Item = (S, Schema)>,
        S: Into<String>,
    {
        Self {
            schema_type: SchemaType::Object,
            properties: properties
                .into_iter()
                .map(|(name, schema)| (name.into(), schema))
                .collect(),
            ..Self::default()
        }
    }

    pub fn list(items: Schema) -> Self {
        Self {
            schema_type: SchemaType::Array,
            items: Some(Box::new(items)),
            ..Self::default()
        }
    }

    /// An object whose values all share one schema.
    pub fn map(values: Schema) -> Self {
        Self {
            schema_type: SchemaType::Object,
            additional_properties: Some(Box::new(values)),
            ..Self::default()
        }
    }

    /// A node that accepts any content.
    pub fn any() -> Self {
        ANY.clone()
    }

    fn of(schema_type: SchemaType) -> Self {
        Self {
            schema_type,
            ..Self::default()
        }
    }

    pub fn is_list(&self) -> bool {
        self.schema_type == SchemaType::Array
    }

    /// Compile an OpenAPI-style JSON schema node.
    pub fn from_openapi(node: &serde_json::Value) -> Result<Self, SchemaError> {
        compile_node(node, "")
    }

    /// The schema of a direct child field, if the node declares one.
    pub fn field(&self, name: &str) -> Option<&Schema> {
        if let Some(prop) = self.properties.get(name) {
            return Some(prop);
        }
        if let Some(ref additional) = self.additional_properties {
            return Some(&**additional);
        }
        self.is_open().then_some(&ANY)
    }

    /// The schema of list items, if this node is a list.
    pub fn item(&self) -> Option<&Schema> {
        match self.items {
            Some(ref items) => Some(&**items),
            None => self.is_open().then_some(&ANY),
        }
    }

    /// Resolve a template to the schema of the field it targets.
    pub fn resolve(&self, template: &PathTemplate) -> Option<&Schema> {
        template
            .segments()
            .iter()
            .try_fold(self, |node, segment| match segment {
                TemplateSegment::Field(name) => node.field(name),
                TemplateSegment::Each => node.item(),
            })
    }

    fn is_open(&self) -> bool {
        self.preserve_unknown_fields || self.schema_type == SchemaType::Any
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let node = serde_json::Value::deserialize(deserializer)?;
        Schema::from_openapi(&node).map_err(serde::de::Error::custom)
    }
}

fn compile_node(node: &serde_json::Value, path: &str) -> Result<Schema, SchemaError> {
    let obj = node.as_object().ok_or_else(|| SchemaError::NotAnObject {
        path: path.to_string(),
    })?;

    let declared = match obj.get("type").and_then(|t| t.as_str()) {
        Some(t) => Some(SchemaType::parse(t).ok_or_else(|| SchemaError::UnknownType {
            path: path.to_string(),
            schema_type: t.to_string(),
        })?),
        None => None,
    };

    let mut properties = BTreeMap::new();
    if let Some(props) = obj.get("properties").and_then(|p| p.as_object()) {
        for (name, child) in props {
            let child_path = if path.is_empty() {
                name.clone()
            } else {
                format!("{path}.{name}")
            };
            properties.insert(name.clone(), compile_node(child, &child_path)?);
        }
    }

    let items = match obj.get("items") {
        Some(child) => Some(Box::new(compile_node(child, &format!("{path}[*]"))?)),
        None => None,
    };

    let additional_properties = match obj.get("additionalProperties") {
        Some(child) if child.is_object() => Some(Box::new(compile_node(child, path)?)),
        Some(serde_json::Value::Bool(true)) => Some(Box::new(Schema::any())),
        _ => None,
    };

    let preserve_unknown_fields = obj
        .get("x-kubernetes-preserve-unknown-fields")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let schema_type = declared.unwrap_or(if !properties.is_empty() {
        SchemaType::Object
    } else if items.is_some() {
        SchemaType::Array
    } else {
        SchemaType::Any
    });

    Ok(Schema {
        schema_type,
        properties,
        items,
        additional_properties,
        preserve_unknown_fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn csinode_like() -> Schema {
        Schema::from_openapi(&json!({
            "type": "object",
            "properties": {
                "spec": {
                    "type": "object",
                    "properties": {
                        "drivers": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "name": {"type": "string"},
                                    "nodeID": {"type": "string"}
                                }
                            }
                        }
                    }
                },
                "metadata": {"type": "object", "x-kubernetes-preserve-unknown-fields": true}
            }
        }))
        .unwrap()
    }

    #[test]
    fn resolves_declared_fields() {
        let schema = csinode_like();
        let t = PathTemplate::parse("spec.drivers[*].nodeID").unwrap();
        assert_eq!(schema.resolve(&t).map(|s| s.schema_type), Some(SchemaType::String));
        let list = PathTemplate::parse("spec.drivers").unwrap();
        assert!(schema.resolve(&list).unwrap().is_list());
    }

    #[test]
    fn rejects_unknown_fields() {
        let schema = csinode_like();
        for bad in ["spec.driver", "spec.drivers[*].nodeId", "spec[*]", "status"] {
            let t = PathTemplate::parse(bad).unwrap();
            assert!(schema.resolve(&t).is_none(), "{bad} should not resolve");
        }
    }

    #[test]
    fn preserve_unknown_fields_accepts_anything() {
        let schema = csinode_like();
        let t = PathTemplate::parse("metadata.labels.app").unwrap();
        assert_eq!(schema.resolve(&t).map(|s| s.schema_type), Some(SchemaType::Any));
    }

    #[test]
    fn additional_properties_resolve() {
        let schema = Schema::object([("labels", Schema::map(Schema::string()))]);
        let t = PathTemplate::parse("labels.team").unwrap();
        assert_eq!(schema.resolve(&t).map(|s| s.schema_type), Some(SchemaType::String));
    }

    #[test]
    fn infers_missing_type() {
        let schema = Schema::from_openapi(&json!({"properties": {"a": {}}})).unwrap();
        assert_eq!(schema.schema_type, SchemaType::Object);
        assert_eq!(schema.properties["a"].schema_type, SchemaType::Any);
    }

    #[test]
    fn compile_errors() {
        assert_eq!(
            Schema::from_openapi(&json!({"properties": {"a": {"type": "date"}}})),
            Err(SchemaError::UnknownType {
                path: "a".into(),
                schema_type: "date".into()
            })
        );
        assert!(matches!(
            Schema::from_openapi(&json!([])),
            Err(SchemaError::NotAnObject { .. })
        ));
    }

    #[test]
    fn builders_match_openapi() {
        let built = Schema::object([("handler", Schema::string())]);
        let parsed =
            Schema::from_openapi(&json!({"type": "object", "properties": {"handler": {"type": "string"}}}))
                .unwrap();
        assert_eq!(built, parsed);
    }

    #[test]
    fn deserializes_from_json() {
        let schema: Schema = serde_json::from_value(json!({"type": "array", "items": {"type": "integer"}})).unwrap();
        assert_eq!(schema.item().map(|s| s.schema_type), Some(SchemaType::Integer));
    }
}
