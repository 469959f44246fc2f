//! CEL expression rules.
//!
//! A `cel` rule holds when its expression evaluates to `true` with `self`
//! bound to the targeted value. Expressions that reference `oldSelf` are
//! transition rules: they are evaluated only on update, unless the rule sets
//! `optionalOldSelf`, in which case `oldSelf` is `null` on create.
//!
//! The Kubernetes CEL libraries from `kube-cel` (string extensions, `isURL`,
//! `quantity`, IP and semver helpers, ...) are available to every expression.

use std::collections::HashMap;
use std::sync::Arc;

use cel::objects::{Key, Map};
use cel::{Context, ParseErrors, Program};

use crate::errors::{ErrorType, FieldError};
use crate::path::Path;

/// Reasons a CEL rule may declare.
const ALLOWED_REASONS: [ErrorType; 4] = [
    ErrorType::Invalid,
    ErrorType::Forbidden,
    ErrorType::Required,
    ErrorType::Duplicate,
];

/// Errors raised while compiling a CEL rule.
#[derive(Debug, thiserror::Error)]
pub enum CelError {
    #[error("failed to compile CEL rule \"{expression}\": {source}")]
    Parse {
        expression: String,
        #[source]
        source: ParseErrors,
    },
    #[error("unsupported reason \"{0}\", expected one of FieldValueInvalid, FieldValueForbidden, FieldValueRequired, FieldValueDuplicate")]
    UnknownReason(String),
}

/// A compiled CEL rule.
#[derive(Debug)]
pub struct CompiledCel {
    program: Program,
    expression: String,
    message: Option<String>,
    error_type: ErrorType,
    is_transition_rule: bool,
    optional_old_self: bool,
}

impl CompiledCel {
    pub fn compile(
        expression: &str,
        message: Option<&str>,
        reason: Option<&str>,
        optional_old_self: bool,
    ) -> Result<Self, CelError> {
        let error_type = match reason {
            None => ErrorType::Invalid,
            Some(r) => ErrorType::from_reason(r)
                .filter(|t| ALLOWED_REASONS.contains(t))
                .ok_or_else(|| CelError::UnknownReason(r.to_string()))?,
        };
        let program = Program::compile(expression).map_err(|e| CelError::Parse {
            expression: expression.to_string(),
            source: e,
        })?;
        let is_transition_rule = program.references().has_variable("oldSelf");
        Ok(Self {
            program,
            expression: expression.to_string(),
            message: message.map(str::to_string),
            error_type,
            is_transition_rule,
            optional_old_self,
        })
    }

    pub fn is_transition_rule(&self) -> bool {
        self.is_transition_rule
    }

    /// Evaluate against `value` at `path`, returning the failure if the rule
    /// does not hold.
    pub fn evaluate(
        &self,
        path: &Path,
        value: &serde_json::Value,
        old_value: Option<&serde_json::Value>,
    ) -> Option<FieldError> {
        if self.is_transition_rule && old_value.is_none() && !self.optional_old_self {
            return None;
        }

        let mut ctx = Context::default();
        kube_cel::register_all(&mut ctx);
        ctx.add_variable_from_value("self", json_to_cel(value));
        if let Some(old) = old_value {
            ctx.add_variable_from_value("oldSelf", json_to_cel(old));
        } else if self.optional_old_self {
            ctx.add_variable_from_value("oldSelf", cel::Value::Null);
        }

        match self.program.execute(&ctx) {
            Ok(cel::Value::Bool(true)) => None,
            Ok(cel::Value::Bool(false)) => Some(self.failure(path, value)),
            Ok(other) => Some(FieldError::internal(
                path.clone(),
                format!(
                    "rule \"{}\" did not evaluate to bool, got {:?}",
                    self.expression,
                    other.type_of()
                ),
            )),
            Err(e) => Some(FieldError::internal(
                path.clone(),
                format!("rule evaluation error: {e}"),
            )),
        }
    }

    fn failure(&self, path: &Path, value: &serde_json::Value) -> FieldError {
        let detail = self
            .message
            .clone()
            .unwrap_or_else(|| format!("failed rule: {}", self.expression));
        let err = FieldError::new(self.error_type, path.clone(), detail);
        match self.error_type {
            ErrorType::Invalid | ErrorType::Duplicate => err.with_value(value.clone()),
            _ => err,
        }
    }
}

/// Convert a [`serde_json::Value`] into a [`cel::Value`].
///
/// Numbers become `Int` when they fit in `i64`, then `UInt`, then `Float`.
pub fn json_to_cel(value: &serde_json::Value) -> cel::Value {
    match value {
        serde_json::Value::Null => cel::Value::Null,
        serde_json::Value::Bool(b) => cel::Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                cel::Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                cel::Value::UInt(u)
            } else {
                n.as_f64().map_or(cel::Value::Null, cel::Value::Float)
            }
        }
        serde_json::Value::String(s) => cel::Value::String(Arc::new(s.clone())),
        serde_json::Value::Array(arr) => {
            cel::Value::List(Arc::new(arr.iter().map(json_to_cel).collect()))
        }
        serde_json::Value::Object(obj) => {
            let mut map = HashMap::with_capacity(obj.len());
            for (k, v) in obj {
                map.insert(Key::String(Arc::new(k.clone())), json_to_cel(v));
            }
            cel::Value::Map(Map { map: Arc::new(map) })
        }
    }
}
