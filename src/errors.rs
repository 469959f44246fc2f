//! Structured validation errors.
//!
//! A [`FieldError`] records one validation failure: what kind of failure it
//! is, the [`Path`] of the offending field, the offending value, a
//! human-readable detail and the origin tag of the rule that produced it.
//! Validators never fail with a Rust error for a violated rule; they return
//! every violation in an [`ErrorList`].

use std::fmt;

use serde::Serialize;

use crate::path::Path;

/// The class of a validation failure, with the Kubernetes reason strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorType {
    NotFound,
    Required,
    Duplicate,
    Invalid,
    NotSupported,
    Forbidden,
    TooLong,
    TooMany,
    Internal,
}

impl ErrorType {
    /// The machine-readable reason, e.g. `FieldValueRequired`.
    pub fn reason(self) -> &'static str {
        match self {
            ErrorType::NotFound => "FieldValueNotFound",
            ErrorType::Required => "FieldValueRequired",
            ErrorType::Duplicate => "FieldValueDuplicate",
            ErrorType::Invalid => "FieldValueInvalid",
            ErrorType::NotSupported => "FieldValueNotSupported",
            ErrorType::Forbidden => "FieldValueForbidden",
            ErrorType::TooLong => "FieldValueTooLong",
            ErrorType::TooMany => "FieldValueTooMany",
            ErrorType::Internal => "InternalError",
        }
    }

    /// Parse a reason string as accepted in rule declarations.
    pub fn from_reason(reason: &str) -> Option<Self> {
        [
            ErrorType::NotFound,
            ErrorType::Required,
            ErrorType::Duplicate,
            ErrorType::Invalid,
            ErrorType::NotSupported,
            ErrorType::Forbidden,
            ErrorType::TooLong,
            ErrorType::TooMany,
            ErrorType::Internal,
        ]
        .into_iter()
        .find(|t| t.reason() == reason)
    }

    /// Whether the rendered error body includes the bad value.
    fn shows_value(self) -> bool {
        !matches!(
            self,
            ErrorType::Required | ErrorType::Forbidden | ErrorType::TooLong | ErrorType::Internal
        )
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorType::NotFound => "Not found",
            ErrorType::Required => "Required value",
            ErrorType::Duplicate => "Duplicate value",
            ErrorType::Invalid => "Invalid value",
            ErrorType::NotSupported => "Unsupported value",
            ErrorType::Forbidden => "Forbidden",
            ErrorType::TooLong => "Too long",
            ErrorType::TooMany => "Too many",
            ErrorType::Internal => "Internal error",
        };
        f.write_str(s)
    }
}

/// A single validation failure.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    /// The class of failure.
    pub error_type: ErrorType,
    /// Location of the offending field.
    pub field: Path,
    /// The offending value; `None` when it is absent or deliberately omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bad_value: Option<serde_json::Value>,
    /// Human-readable explanation; may be empty.
    pub detail: String,
    /// Tag naming the rule that produced this error, e.g. `format=k8s-short-name`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl FieldError {
    /// An error of any type with no bad value and no origin.
    pub fn new(error_type: ErrorType, field: Path, detail: impl Into<String>) -> Self {
        Self {
            error_type,
            field,
            bad_value: None,
            detail: detail.into(),
            origin: None,
        }
    }

    /// A required field is absent or zero.
    pub fn required(field: Path, detail: impl Into<String>) -> Self {
        Self::new(ErrorType::Required, field, detail)
    }

    /// `value` is not acceptable for `field`.
    pub fn invalid(
        field: Path,
        value: impl Into<serde_json::Value>,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(ErrorType::Invalid, field, detail).with_value(value)
    }

    /// A value or change that is not allowed. The value is omitted.
    pub fn forbidden(field: Path, detail: impl Into<String>) -> Self {
        Self::new(ErrorType::Forbidden, field, detail)
    }

    /// A string exceeded `max_bytes`. The value itself is omitted.
    pub fn too_long(field: Path, max_bytes: usize) -> Self {
        Self::new(
            ErrorType::TooLong,
            field,
            format!("must have at most {max_bytes} bytes"),
        )
    }

    /// A failure of the validator itself rather than of the object.
    pub fn internal(field: Path, detail: impl Into<String>) -> Self {
        Self::new(ErrorType::Internal, field, detail)
    }

    /// Attach the offending value.
    pub fn with_value(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.bad_value = Some(value.into());
        self
    }

    /// Attach the origin tag of the producing rule.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// The error text without the field path.
    pub fn body(&self) -> String {
        let mut body = self.error_type.to_string();
        if self.error_type.shows_value() {
            match &self.bad_value {
                Some(serde_json::Value::String(s)) => body.push_str(&format!(": {s:?}")),
                Some(serde_json::Value::Null) | None => body.push_str(": null"),
                Some(other) => body.push_str(&format!(": {other}")),
            }
        }
        if !self.detail.is_empty() {
            body.push_str(": ");
            body.push_str(&self.detail);
        }
        body
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field.is_root() {
            f.write_str(&self.body())
        } else {
            write!(f, "{}: {}", self.field, self.body())
        }
    }
}

impl std::error::Error for FieldError {}

/// An ordered list of [`FieldError`]s.
///
/// Order follows evaluation order and is stable across runs; equivalence
/// checks compare lists as multisets.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ErrorList(Vec<FieldError>);

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: FieldError) {
        self.0.push(error);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldError> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[FieldError] {
        &self.0
    }

    /// Set the origin on every error that has none.
    pub fn with_origin(self, origin: &str) -> Self {
        self.into_iter()
            .map(|e| match e.origin {
                Some(_) => e,
                None => e.with_origin(origin),
            })
            .collect()
    }
}

impl From<Vec<FieldError>> for ErrorList {
    fn from(errors: Vec<FieldError>) -> Self {
        Self(errors)
    }
}

impl FromIterator<FieldError> for ErrorList {
    fn from_iter<I: IntoIterator<Item = FieldError>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<FieldError> for ErrorList {
    fn extend<I: IntoIterator<Item = FieldError>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for ErrorList {
    type Item = FieldError;
    type IntoIter = std::vec::IntoIter<FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ErrorList {
    type Item = &'a FieldError;
    type IntoIter = std::slice::Iter<'a, FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => f.write_str("[]"),
            [only] => write!(f, "{only}"),
            many => {
                f.write_str("[")?;
                for (i, e) in many.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{e}")?;
                }
                f.write_str("]")
            }
        }
    }
}
