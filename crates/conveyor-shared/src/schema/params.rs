//! # Parameter Schema
//!
//! Job definitions declare their parameters as data, not code: a map of
//! field name → [`FieldSpec`]. Validation runs once at submission time and
//! produces the validated map (defaults applied) that becomes the job's
//! durable `parameters`. A validation failure is terminal for the request —
//! no job row is created.
//!
//! Unknown fields in the submitted body are rejected to keep silent schema
//! drift out of the catalog.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

use crate::errors::ConveyorError;

/// Supported field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Integer,
    Float,
    String,
    Boolean,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Boolean => "boolean",
        }
    }
}

/// Declarative constraints for one parameter field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    /// Applied when the field is absent and not required
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Inclusive numeric lower bound (integer and float fields)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive numeric upper bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Enumeration of allowed values (string fields)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
}

impl FieldSpec {
    pub fn integer() -> Self {
        Self::of(FieldType::Integer)
    }

    pub fn float() -> Self {
        Self::of(FieldType::Float)
    }

    pub fn string() -> Self {
        Self::of(FieldType::String)
    }

    pub fn boolean() -> Self {
        Self::of(FieldType::Boolean)
    }

    fn of(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            default: None,
            min: None,
            max: None,
            allowed: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn with_max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn with_allowed<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }
}

/// A job type's declared parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterSchema {
    fields: BTreeMap<String, FieldSpec>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validate a submitted body against this schema.
    ///
    /// Returns the validated map with defaults applied, or the first
    /// violation as `InvalidParameters { field, reason }`.
    pub fn validate(&self, body: &Value) -> Result<Map<String, Value>, ConveyorError> {
        let empty = Map::new();
        let submitted = match body {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(ConveyorError::invalid_parameters(
                    "<body>",
                    format!("expected a JSON object, got {}", json_type_name(other)),
                ))
            }
        };

        // Reject unknown fields before anything else
        for key in submitted.keys() {
            if !self.fields.contains_key(key) {
                return Err(ConveyorError::invalid_parameters(
                    key.clone(),
                    "unknown field",
                ));
            }
        }

        let mut validated = Map::new();
        for (name, spec) in &self.fields {
            match submitted.get(name) {
                Some(value) => {
                    let checked = Self::check_value(name, spec, value)?;
                    validated.insert(name.clone(), checked);
                }
                None if spec.required => {
                    return Err(ConveyorError::invalid_parameters(
                        name.clone(),
                        "required field is missing",
                    ));
                }
                None => {
                    if let Some(default) = &spec.default {
                        validated.insert(name.clone(), default.clone());
                    }
                }
            }
        }
        Ok(validated)
    }

    fn check_value(name: &str, spec: &FieldSpec, value: &Value) -> Result<Value, ConveyorError> {
        match spec.field_type {
            FieldType::Integer => {
                let n = value.as_i64().ok_or_else(|| {
                    ConveyorError::invalid_parameters(name, "expected an integer")
                })?;
                Self::check_range(name, spec, n as f64)?;
                Ok(Value::Number(n.into()))
            }
            FieldType::Float => {
                let n = value
                    .as_f64()
                    .ok_or_else(|| ConveyorError::invalid_parameters(name, "expected a number"))?;
                Self::check_range(name, spec, n)?;
                Ok(Number::from_f64(n).map(Value::Number).ok_or_else(|| {
                    ConveyorError::invalid_parameters(name, "non-finite numbers are not allowed")
                })?)
            }
            FieldType::String => {
                let s = value
                    .as_str()
                    .ok_or_else(|| ConveyorError::invalid_parameters(name, "expected a string"))?;
                if let Some(allowed) = &spec.allowed {
                    if !allowed.iter().any(|a| a == s) {
                        return Err(ConveyorError::invalid_parameters(
                            name,
                            format!("'{s}' is not one of {allowed:?}"),
                        ));
                    }
                }
                Ok(Value::String(s.to_string()))
            }
            FieldType::Boolean => {
                let b = value
                    .as_bool()
                    .ok_or_else(|| ConveyorError::invalid_parameters(name, "expected a boolean"))?;
                Ok(Value::Bool(b))
            }
        }
    }

    fn check_range(name: &str, spec: &FieldSpec, n: f64) -> Result<(), ConveyorError> {
        if let Some(min) = spec.min {
            if n < min {
                return Err(ConveyorError::invalid_parameters(
                    name,
                    format!("{n} is below the minimum {min}"),
                ));
            }
        }
        if let Some(max) = spec.max {
            if n > max {
                return Err(ConveyorError::invalid_parameters(
                    name,
                    format!("{n} is above the maximum {max}"),
                ));
            }
        }
        Ok(())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
