//! Tool input schemas: a small builder and the startup validation pass.

use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("root schema type must be \"object\", got {0}")]
    RootNotObject(String),
    #[error("property {0:?} has no type")]
    MissingType(String),
    #[error("array property {0:?} has no items type")]
    MissingItemsType(String),
}

/// Builder for an object schema.
#[derive(Debug, Default, Clone)]
pub struct InputSchema {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(mut self, name: &str, schema: Value, required: bool) -> Self {
        self.properties.insert(name.to_string(), schema);
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    pub fn string(self, name: &str, description: &str, required: bool) -> Self {
        self.property(name, json!({"type": "string", "description": description}), required)
    }

    pub fn integer(self, name: &str, description: &str, required: bool) -> Self {
        self.property(name, json!({"type": "integer", "description": description}), required)
    }

    pub fn number(self, name: &str, description: &str, required: bool) -> Self {
        self.property(name, json!({"type": "number", "description": description}), required)
    }

    pub fn boolean(self, name: &str, description: &str, required: bool) -> Self {
        self.property(name, json!({"type": "boolean", "description": description}), required)
    }

    pub fn string_array(self, name: &str, description: &str, required: bool) -> Self {
        self.property(
            name,
            json!({"type": "array", "items": {"type": "string"}, "description": description}),
            required,
        )
    }

    pub fn enumeration(self, name: &str, description: &str, values: &[&str], required: bool) -> Self {
        self.property(
            name,
            json!({"type": "string", "enum": values, "description": description}),
            required,
        )
    }

    /// A time accepting RFC3339, unix seconds or `now-1h` style offsets.
    pub fn time(self, name: &str, description: &str, required: bool) -> Self {
        let description = format!(
            "{description}. RFC3339, unix seconds, or relative to now such as \"now\", \"-15m\", \"now-2h\", \"-7d\""
        );
        self.property(name, json!({"type": ["string", "number"], "description": description}), required)
    }

    /// Optional `start` and `end`, defaulting to the last hour.
    pub fn time_range(self) -> Self {
        self.time("start", "Start of the time range (default: one hour before end)", false)
            .time("end", "End of the time range (default: now)", false)
    }

    pub fn page(self, default_size: i64) -> Self {
        self.integer(
            "page_max_size",
            &format!("Maximum number of results per page (default: {default_size})"),
            false,
        )
        .string("page_token", "Token of the page to fetch, from a previous next_page_token", false)
    }

    pub fn limit_offset(self, default_limit: usize) -> Self {
        self.integer("limit", &format!("Maximum number of results (default: {default_limit})"), false)
            .integer("offset", "Number of results to skip (default: 0)", false)
    }

    pub fn build(self) -> Value {
        let mut schema = json!({
            "type": "object",
            "properties": self.properties,
        });
        if !self.required.is_empty() {
            schema["required"] = json!(self.required);
        }
        schema
    }
}

/// Check a tool's input schema.
///
/// Returns `Ok(false)` for a valid root with no properties, which callers
/// only warn about.
pub fn validate(schema: &Value) -> Result<bool, SchemaError> {
    let root_type = schema.get("type").and_then(Value::as_str).unwrap_or("");
    if root_type != "object" {
        return Err(SchemaError::RootNotObject(format!("{:?}", root_type)));
    }
    match schema.get("properties").and_then(Value::as_object) {
        Some(properties) if !properties.is_empty() => {
            validate_properties(properties, "")?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn validate_properties(properties: &Map<String, Value>, prefix: &str) -> Result<(), SchemaError> {
    for (name, property) in properties {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        validate_property(property, &path)?;
    }
    Ok(())
}

fn validate_property(property: &Value, path: &str) -> Result<(), SchemaError> {
    let kind = match property.get("type") {
        Some(Value::Array(kinds)) => kinds.first().and_then(Value::as_str).unwrap_or(""),
        kind => kind.and_then(Value::as_str).unwrap_or(""),
    };
    if kind.is_empty() {
        return Err(SchemaError::MissingType(path.to_string()));
    }
    match kind {
        "array" => {
            let items = property.get("items");
            let items_type = items
                .and_then(|i| i.get("type"))
                .and_then(Value::as_str)
                .unwrap_or("");
            if items_type.is_empty() {
                return Err(SchemaError::MissingItemsType(path.to_string()));
            }
            if let Some(items) = items {
                if items_type == "object" {
                    if let Some(nested) = items.get("properties").and_then(Value::as_object) {
                        validate_properties(nested, &format!("{path}[]"))?;
                    }
                }
            }
        }
        "object" => {
            if let Some(nested) = property.get("properties").and_then(Value::as_object) {
                validate_properties(nested, path)?;
            }
        }
        _ => {}
    }
    Ok(())
}
