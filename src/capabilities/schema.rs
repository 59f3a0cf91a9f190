//! Declared input schemas for capabilities.
//!
//! An [`InputSchema`] is a flat set of named, typed fields. It serves two
//! purposes: validating a proposed invocation before any handler runs, and
//! describing the capability to the reasoning capability as a JSON Schema
//! object.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DispatchError, DispatchResult};

/// Arguments of a capability invocation.
pub type Arguments = Map<String, Value>;

/// JSON type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    /// JSON Schema `type` keyword.
    pub fn json_type(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }

    /// Whether `value` has this type. Integers are accepted where numbers are.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
        }
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One named field of an input schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
    /// Allowed values for string fields; empty means unrestricted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
}

/// Input schema of a capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    pub fields: Vec<FieldSpec>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required field.
    pub fn required(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        description: impl Into<String>,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            field_type,
            required: true,
            description: description.into(),
            allowed: Vec::new(),
        });
        self
    }

    /// Add an optional field.
    pub fn optional(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        description: impl Into<String>,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            field_type,
            required: false,
            description: description.into(),
            allowed: Vec::new(),
        });
        self
    }

    /// Restrict the most recently added field to a fixed set of strings.
    pub fn one_of(mut self, allowed: &[&str]) -> Self {
        if let Some(last) = self.fields.last_mut() {
            last.allowed = allowed.iter().map(|s| s.to_string()).collect();
        }
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check `args` against the schema.
    ///
    /// Fails on the first missing required field, unknown field, type
    /// mismatch or disallowed value. Nothing is coerced. An explicit `null`
    /// counts as absent.
    pub fn validate(&self, capability: &str, args: &Arguments) -> DispatchResult<()> {
        for field in &self.fields {
            match args.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(DispatchError::schema_violation(
                            capability,
                            &field.name,
                            "is required",
                        ));
                    }
                }
                Some(value) => {
                    if !field.field_type.accepts(value) {
                        return Err(DispatchError::schema_violation(
                            capability,
                            &field.name,
                            format!(
                                "must be of type {}, got {}",
                                field.field_type.json_type(),
                                describe(value)
                            ),
                        ));
                    }
                    if !field.allowed.is_empty() {
                        let ok = value
                            .as_str()
                            .map_or(false, |s| field.allowed.iter().any(|a| a == s));
                        if !ok {
                            return Err(DispatchError::schema_violation(
                                capability,
                                &field.name,
                                format!("must be one of: {}", field.allowed.join(", ")),
                            ));
                        }
                    }
                }
            }
        }

        if let Some(unknown) = args.keys().find(|k| self.field(k).is_none()) {
            return Err(DispatchError::schema_violation(
                capability,
                unknown,
                "is not declared by the capability",
            ));
        }

        Ok(())
    }

    /// JSON Schema object suitable for function-calling tool definitions.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            let mut prop = serde_json::json!({
                "type": field.field_type.json_type(),
                "description": field.description,
            });
            if !field.allowed.is_empty() {
                prop["enum"] = serde_json::json!(field.allowed);
            }
            properties.insert(field.name.clone(), prop);
            if field.required {
                required.push(Value::String(field.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}
