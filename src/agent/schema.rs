//! Tool schema builder: static tool declarations rendered to OpenAI function schemas

use serde_json::{json, Map, Value};
use std::collections::HashSet;

use crate::error::DiscoveryError;

/// Parameter name of the injected knowledge-base handle
pub const DATABASE_PARAM: &str = "database";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    /// List of `[start, end]` pairs of `HH:MM:SS` strings
    TimeRanges,
    /// Filled in by the orchestrator, never shown to the model
    Database,
}

impl ParamType {
    fn json_schema(self) -> Value {
        match self {
            ParamType::String => json!({ "type": "string" }),
            ParamType::Integer => json!({ "type": "integer" }),
            ParamType::TimeRanges => json!({
                "type": "array",
                "items": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": 2,
                    "maxItems": 2
                }
            }),
            ParamType::Database => json!({ "type": "object" }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamType,
    pub description: &'static str,
    pub required: bool,
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: &'static str, kind: ParamType, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &'static str, kind: ParamType, description: &'static str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self.required = false;
        self
    }

    pub fn database() -> Self {
        Self::required(DATABASE_PARAM, ParamType::Database, "Knowledge base of the current video.")
    }

    pub fn is_injected(&self) -> bool {
        self.kind == ParamType::Database
    }
}

/// Declaration of one tool the orchestrator may call
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    pub fn new(name: &'static str, description: impl Into<String>) -> Self {
        Self {
            name,
            description: description.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }

    /// Whether the orchestrator must pass the knowledge base to this tool
    pub fn takes_database(&self) -> bool {
        self.params.iter().any(ParamSpec::is_injected)
    }

    /// Model-facing parameters, injected ones excluded
    pub fn visible_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|p| !p.is_injected())
    }

    /// `{"type": "function", "function": {name, description, parameters}}`
    pub fn function_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in self.visible_params() {
            let mut schema = param.kind.json_schema();
            if let Value::Object(fields) = &mut schema {
                fields.insert("description".to_string(), Value::String(param.description.to_string()));
                if let Some(default) = &param.default {
                    fields.insert("default".to_string(), default.clone());
                }
            }
            properties.insert(param.name.to_string(), schema);
            if param.required {
                required.push(Value::String(param.name.to_string()));
            }
        }

        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }
            }
        })
    }

    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.name.is_empty() || !self.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DiscoveryError::Config(format!("invalid tool name {:?}", self.name)));
        }

        let mut seen = HashSet::new();
        for param in &self.params {
            if !seen.insert(param.name) {
                return Err(DiscoveryError::Config(format!(
                    "tool `{}` declares parameter `{}` twice",
                    self.name, param.name
                )));
            }
            if param.is_injected() != (param.name == DATABASE_PARAM) {
                return Err(DiscoveryError::Config(format!(
                    "tool `{}`: only the `{}` parameter may be injected",
                    self.name, DATABASE_PARAM
                )));
            }
        }
        Ok(())
    }
}
