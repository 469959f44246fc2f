//! Declarative rule tables.
//!
//! A [`Rule`] binds one check to a path template, optionally scoped to a
//! subset of API versions and operations. Rules are plain data: they can be
//! built in code with the constructors below or deserialized from JSON, e.g.
//!
//! ```json
//! {"path": "handler", "rule": "format", "name": "k8s-short-name"}
//! {"path": "spec.drivers", "rule": "listItemKey", "keyFields": ["name"]}
//! ```
//!
//! Keys a rule kind does not define are rejected when deserializing, so a
//! misspelled option fails the registry build instead of falling back to
//! its default.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::Operation;

/// The check a [`Rule`] performs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "camelCase")]
pub enum RuleKind {
    /// The field must be present and non-zero.
    Required,
    /// On update, the field must keep its previous value.
    Immutable,
    /// The string value must conform to a named format.
    Format { name: String },
    /// On update, the listed child fields of matched list items must not change.
    #[serde(rename_all = "camelCase")]
    ForbiddenOnUpdate {
        fields: Vec<String>,
        #[serde(default)]
        key_fields: Vec<String>,
        /// Error detail; `{field}` is replaced by the changed field's name.
        #[serde(default)]
        detail: Option<String>,
        #[serde(default)]
        forbid_additions: bool,
    },
    /// List items must be unique by the key fields.
    #[serde(rename_all = "camelCase")]
    ListItemKey { key_fields: Vec<String> },
    /// The string value must be at most `max` bytes long.
    MaxLength { max: usize },
    /// A CEL expression over `self` (and `oldSelf` on update) that must hold.
    #[serde(rename_all = "camelCase")]
    Cel {
        expression: String,
        #[serde(default)]
        message: Option<String>,
        /// Error reason, e.g. `FieldValueForbidden`. Defaults to `FieldValueInvalid`.
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        optional_old_self: bool,
    },
}

impl RuleKind {
    /// The origin tag attached to errors of this kind when the rule declares none.
    pub fn default_origin(&self) -> Option<String> {
        match self {
            RuleKind::Format { name } => Some(format!("format={name}")),
            RuleKind::Immutable => Some("immutable".to_string()),
            RuleKind::MaxLength { .. } => Some("maxLength".to_string()),
            RuleKind::Required
            | RuleKind::ForbiddenOnUpdate { .. }
            | RuleKind::ListItemKey { .. }
            | RuleKind::Cel { .. } => None,
        }
    }

    /// Whether the rule can only fire on update.
    pub fn is_update_only(&self) -> bool {
        matches!(
            self,
            RuleKind::Immutable | RuleKind::ForbiddenOnUpdate { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::Required => "required",
            RuleKind::Immutable => "immutable",
            RuleKind::Format { .. } => "format",
            RuleKind::ForbiddenOnUpdate { .. } => "forbiddenOnUpdate",
            RuleKind::ListItemKey { .. } => "listItemKey",
            RuleKind::MaxLength { .. } => "maxLength",
            RuleKind::Cel { .. } => "cel",
        }
    }

    /// Keys a rule of the kind tagged `tag` may carry besides the common ones.
    fn keys(tag: &str) -> Option<&'static [&'static str]> {
        Some(match tag {
            "required" | "immutable" => &[],
            "format" => &["name"],
            "forbiddenOnUpdate" => &["fields", "keyFields", "detail", "forbidAdditions"],
            "listItemKey" => &["keyFields"],
            "maxLength" => &["max"],
            "cel" => &["expression", "message", "reason", "optionalOldSelf"],
            _ => return None,
        })
    }
}

const COMMON_KEYS: &[&str] = &["path", "rule", "versions", "operations", "origin"];

/// One declared rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "Map<String, Value>")]
pub struct Rule {
    /// Path template of the targeted field, e.g. `spec.drivers[*].nodeID`.
    pub path: String,
    #[serde(flatten)]
    pub kind: RuleKind,
    /// API versions the rule applies to; all served versions when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<Vec<String>>,
    /// Operations the rule applies to; create and update when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operations: Option<Vec<Operation>>,
    /// Overrides [`RuleKind::default_origin`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

// `deny_unknown_fields` does not combine with `flatten`, so unknown keys are
// checked on the raw object before the fields are decoded.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleFields {
    path: String,
    #[serde(flatten)]
    kind: RuleKind,
    #[serde(default)]
    versions: Option<Vec<String>>,
    #[serde(default)]
    operations: Option<Vec<Operation>>,
    #[serde(default)]
    origin: Option<String>,
}

impl TryFrom<Map<String, Value>> for Rule {
    type Error = String;

    fn try_from(raw: Map<String, Value>) -> Result<Self, Self::Error> {
        let tag = raw.get("rule").and_then(Value::as_str).unwrap_or_default();
        if let Some(allowed) = RuleKind::keys(tag)
            && let Some(key) = raw
                .keys()
                .find(|k| !COMMON_KEYS.contains(&k.as_str()) && !allowed.contains(&k.as_str()))
        {
            return Err(format!("unknown field `{key}` in {tag} rule"));
        }
        let fields: RuleFields =
            serde_json::from_value(Value::Object(raw)).map_err(|e| e.to_string())?;
        Ok(Rule {
            path: fields.path,
            kind: fields.kind,
            versions: fields.versions,
            operations: fields.operations,
            origin: fields.origin,
        })
    }
}

impl Rule {
    pub fn new(path: impl Into<String>, kind: RuleKind) -> Self {
        Self {
            path: path.into(),
            kind,
            versions: None,
            operations: None,
            origin: None,
        }
    }

    pub fn required(path: impl Into<String>) -> Self {
        Self::new(path, RuleKind::Required)
    }

    pub fn immutable(path: impl Into<String>) -> Self {
        Self::new(path, RuleKind::Immutable)
    }

    pub fn format(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(path, RuleKind::Format { name: name.into() })
    }

    pub fn max_length(path: impl Into<String>, max: usize) -> Self {
        Self::new(path, RuleKind::MaxLength { max })
    }

    pub fn list_item_key<I, S>(path: impl Into<String>, key_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            path,
            RuleKind::ListItemKey {
                key_fields: key_fields.into_iter().map(Into::into).collect(),
            },
        )
    }

    /// Forbid changes to `fields` of list items matched by `key_fields`.
    pub fn forbidden_on_update<I, S, K, T>(path: impl Into<String>, fields: I, key_fields: K) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        K: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::new(
            path,
            RuleKind::ForbiddenOnUpdate {
                fields: fields.into_iter().map(Into::into).collect(),
                key_fields: key_fields.into_iter().map(Into::into).collect(),
                detail: None,
                forbid_additions: false,
            },
        )
    }

    pub fn cel(path: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::new(
            path,
            RuleKind::Cel {
                expression: expression.into(),
                message: None,
                reason: None,
                optional_old_self: false,
            },
        )
    }

    /// Set the error detail of a `forbiddenOnUpdate` rule or the message of a
    /// `cel` rule. Other kinds are left unchanged.
    pub fn with_message(mut self, text: impl Into<String>) -> Self {
        match self.kind {
            RuleKind::ForbiddenOnUpdate { ref mut detail, .. } => *detail = Some(text.into()),
            RuleKind::Cel { ref mut message, .. } => *message = Some(text.into()),
            _ => {}
        }
        self
    }

    /// Set the reason of a `cel` rule.
    pub fn with_reason(mut self, text: impl Into<String>) -> Self {
        if let RuleKind::Cel { ref mut reason, .. } = self.kind {
            *reason = Some(text.into());
        }
        self
    }

    /// Reject list items added on update (`forbiddenOnUpdate` only).
    pub fn forbidding_additions(mut self) -> Self {
        if let RuleKind::ForbiddenOnUpdate {
            ref mut forbid_additions,
            ..
        } = self.kind
        {
            *forbid_additions = true;
        }
        self
    }

    pub fn for_versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.versions = Some(versions.into_iter().map(Into::into).collect());
        self
    }

    pub fn on(mut self, operations: impl IntoIterator<Item = Operation>) -> Self {
        self.operations = Some(operations.into_iter().collect());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// The origin tag errors from this rule carry.
    pub fn origin(&self) -> Option<String> {
        self.origin.clone().or_else(|| self.kind.default_origin())
    }

    /// Whether the rule is active for `version` and `operation`.
    pub fn applies_to(&self, version: &str, operation: Operation) -> bool {
        if operation == Operation::Create && self.kind.is_update_only() {
            return false;
        }
        let version_ok = self
            .versions
            .as_ref()
            .is_none_or(|vs| vs.iter().any(|v| v == version));
        let operation_ok = self
            .operations
            .as_ref()
            .is_none_or(|ops| ops.contains(&operation));
        version_ok && operation_ok
    }
}
