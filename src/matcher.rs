//! Error comparison for equivalence checks.
//!
//! An [`ErrorMatcher`] decides which attributes of two [`FieldError`]s must
//! agree for them to count as the same error. A [`NormalizationRule`]
//! rewrites rendered field paths before comparison, so that a field renamed
//! between API versions still lines up with its expected path.

use regex::Regex;

use crate::errors::{ErrorList, FieldError};
use crate::path::Path;

/// How the `detail` text is compared.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DetailMatch {
    #[default]
    Ignore,
    Exact,
    /// The expected detail must occur somewhere in the actual detail.
    Substring,
}

/// Selects the attributes compared between an expected and an actual error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorMatcher {
    by_type: bool,
    by_field: bool,
    by_value: bool,
    by_origin: bool,
    detail: DetailMatch,
}

impl Default for ErrorMatcher {
    /// Type, field and origin.
    fn default() -> Self {
        Self {
            by_type: true,
            by_field: true,
            by_value: false,
            by_origin: true,
            detail: DetailMatch::Ignore,
        }
    }
}

impl ErrorMatcher {
    /// A matcher that compares nothing; enable attributes with the `by_*`
    /// methods.
    pub fn none() -> Self {
        Self {
            by_type: false,
            by_field: false,
            by_value: false,
            by_origin: false,
            detail: DetailMatch::Ignore,
        }
    }

    /// Every attribute, with exact detail text.
    pub fn strict() -> Self {
        Self::default().by_value().by_detail_exact()
    }

    pub fn by_type(mut self) -> Self {
        self.by_type = true;
        self
    }

    pub fn by_field(mut self) -> Self {
        self.by_field = true;
        self
    }

    pub fn by_value(mut self) -> Self {
        self.by_value = true;
        self
    }

    pub fn by_origin(mut self) -> Self {
        self.by_origin = true;
        self
    }

    pub fn by_detail_exact(mut self) -> Self {
        self.detail = DetailMatch::Exact;
        self
    }

    pub fn by_detail_substring(mut self) -> Self {
        self.detail = DetailMatch::Substring;
        self
    }

    pub fn matches(&self, want: &FieldError, got: &FieldError) -> bool {
        self.differences(want, got).is_empty()
    }

    /// Names of the compared attributes on which `got` differs from `want`.
    pub fn differences(&self, want: &FieldError, got: &FieldError) -> Vec<&'static str> {
        let mut diffs = Vec::new();
        if self.by_type && want.error_type != got.error_type {
            diffs.push("type");
        }
        if self.by_field && want.field != got.field {
            diffs.push("field");
        }
        if self.by_value && want.bad_value != got.bad_value {
            diffs.push("value");
        }
        if self.by_origin && want.origin != got.origin {
            diffs.push("origin");
        }
        let detail_ok = match self.detail {
            DetailMatch::Ignore => true,
            DetailMatch::Exact => want.detail == got.detail,
            DetailMatch::Substring => got.detail.contains(&want.detail),
        };
        if !detail_ok {
            diffs.push("detail");
        }
        diffs
    }
}

/// Rewrites rendered field paths matching `pattern`.
///
/// ```
/// use kube_declarative_validation::matcher::NormalizationRule;
/// use kube_declarative_validation::path::Path;
///
/// let rule = NormalizationRule::new(r"^spec\.nodeName$", "spec.node").unwrap();
/// assert_eq!(rule.apply(&Path::from_fields(["spec", "nodeName"])).to_string(), "spec.node");
/// ```
#[derive(Clone, Debug)]
pub struct NormalizationRule {
    pattern: Regex,
    replacement: String,
}

impl NormalizationRule {
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self::from_regex(Regex::new(pattern)?, replacement))
    }

    pub fn from_regex(pattern: Regex, replacement: impl Into<String>) -> Self {
        Self {
            pattern,
            replacement: replacement.into(),
        }
    }

    /// Apply the rule. A rewrite that does not parse back into a path is
    /// discarded and the original path kept.
    pub fn apply(&self, path: &Path) -> Path {
        let rendered = path.to_string();
        let rewritten = self.pattern.replace_all(&rendered, self.replacement.as_str());
        if rewritten == rendered {
            return path.clone();
        }
        match Path::parse(&rewritten) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(
                    path = %rendered,
                    rewritten = %rewritten,
                    error = %e,
                    "path normalization produced an invalid path, keeping the original"
                );
                path.clone()
            }
        }
    }
}

/// Apply `rules` in order to the field path of every error.
pub fn normalize(rules: &[NormalizationRule], errs: &ErrorList) -> ErrorList {
    if rules.is_empty() {
        return errs.clone();
    }
    errs.iter()
        .map(|err| {
            let field = rules.iter().fold(err.field.clone(), |path, rule| rule.apply(&path));
            FieldError { field, ..err.clone() }
        })
        .collect()
}
