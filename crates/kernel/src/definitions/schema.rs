//! Optional validation schemas for inputs, results, configs and payloads.

use std::sync::Arc;

use jsonschema::Validator;
use runner_error::{RunnerError, RunnerResult};
use serde_json::Value;

type CustomValidator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

enum SchemaKind {
    Json(Box<Validator>),
    Custom(CustomValidator),
}

/// A validator attached to a task, resource, event or tag.
///
/// Either a compiled JSON Schema or a custom closure; both report failures
/// as plain messages that the kernel wraps into `Validation` errors.
#[derive(Clone)]
pub struct Schema {
    kind: Arc<SchemaKind>,
}

impl Schema {
    /// Compile a JSON Schema document.
    pub fn json(schema: Value) -> RunnerResult<Self> {
        let compiled = jsonschema::validator_for(&schema).map_err(|e| {
            RunnerError::validation("Schema", "(inline)", e.to_string())
        })?;
        Ok(Self { kind: Arc::new(SchemaKind::Json(Box::new(compiled))) })
    }

    /// Wrap a custom validator closure.
    #[must_use]
    pub fn custom(validator: impl Fn(&Value) -> Result<(), String> + Send + Sync + 'static) -> Self {
        Self { kind: Arc::new(SchemaKind::Custom(Arc::new(validator))) }
    }

    /// Validate `value`, returning every failure joined into one message.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        match &*self.kind {
            SchemaKind::Json(compiled) => {
                let messages: Vec<String> =
                    compiled.iter_errors(value).map(|e| e.to_string()).collect();
                if messages.is_empty() { Ok(()) } else { Err(messages.join("; ")) }
            }
            SchemaKind::Custom(validator) => validator(value),
        }
    }
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &*self.kind {
            SchemaKind::Json(_) => "json",
            SchemaKind::Custom(_) => "custom",
        };
        write!(f, "Schema({kind})")
    }
}
