//! Declared argument shapes for tools.
//!
//! A [`ParameterSchema`] is a flat list of named, typed parameters. It is
//! rendered as a JSON Schema object for providers and used by the
//! registry to reject malformed arguments before a handler ever runs.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParameterKind {
    fn as_str(&self) -> &'static str {
        match self {
            ParameterKind::String => "string",
            ParameterKind::Number => "number",
            ParameterKind::Integer => "integer",
            ParameterKind::Boolean => "boolean",
            ParameterKind::Object => "object",
            ParameterKind::Array => "array",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParameterKind::String => value.is_string(),
            ParameterKind::Number => value.is_number(),
            ParameterKind::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().map(|v| v.fract() == 0.0).unwrap_or(false)
            }
            ParameterKind::Boolean => value.is_boolean(),
            ParameterKind::Object => value.is_object(),
            ParameterKind::Array => value.is_array(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub kind: ParameterKind,
    pub description: String,
    pub required: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub allow_additional: bool,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(
        mut self,
        name: impl Into<String>,
        kind: ParameterKind,
        description: impl Into<String>,
    ) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
        });
        self
    }

    pub fn optional(
        mut self,
        name: impl Into<String>,
        kind: ParameterKind,
        description: impl Into<String>,
    ) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            kind,
            description: description.into(),
            required: false,
        });
        self
    }

    pub fn allow_additional(mut self) -> Self {
        self.allow_additional = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            properties.insert(
                param.name.clone(),
                json!({ "type": param.kind.as_str(), "description": param.description }),
            );
        }
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": self.allow_additional,
        })
    }

    /// Check `arguments` against the declared parameters. The error is a
    /// human-readable reason suitable for returning to the model.
    pub fn validate(&self, arguments: &Value) -> Result<(), String> {
        let empty = Map::new();
        let fields = match arguments {
            Value::Object(fields) => fields,
            Value::Null if self.parameters.iter().all(|p| !p.required) => &empty,
            other => return Err(format!("expected a JSON object, got `{other}`")),
        };

        for param in &self.parameters {
            match fields.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(format!("missing required field `{}`", param.name));
                }
                None | Some(Value::Null) => {}
                Some(value) if !param.kind.accepts(value) => {
                    return Err(format!(
                        "field `{}` must be {}, got `{value}`",
                        param.name,
                        param.kind.as_str()
                    ));
                }
                Some(_) => {}
            }
        }

        if !self.allow_additional {
            if let Some(unknown) = fields
                .keys()
                .find(|key| !self.parameters.iter().any(|p| &p.name == *key))
            {
                return Err(format!("unexpected field `{unknown}`"));
            }
        }

        Ok(())
    }
}
