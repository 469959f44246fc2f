//! The equivalence oracle.
//!
//! Runs the declarative validator and a hand-written (imperative) validator
//! over the same object, or the same old/new pair, and checks that both
//! produce the expected errors and agree with each other. Comparison is a
//! multiset match under an [`ErrorMatcher`], after both sides have been
//! passed through the configured [`NormalizationRule`]s.
//!
//! ```
//! use kube_declarative_validation::equivalence::Oracle;
//! use kube_declarative_validation::resources::{self, node::RuntimeClass};
//! use kube_declarative_validation::{ErrorList, VersionContext};
//!
//! let registry = resources::registry().unwrap();
//! let oracle = Oracle::new(&registry);
//! let ctx = VersionContext::new("node.k8s.io", "v1", "runtimeclasses");
//! let rc = RuntimeClass::new("sandboxed", "runsc");
//! oracle
//!     .verify_create(&ctx, &rc, resources::node::validate, &ErrorList::new())
//!     .unwrap();
//! ```

use std::fmt;

use serde::Serialize;

use crate::context::{Operation, VersionContext};
use crate::errors::{ErrorList, FieldError};
use crate::matcher::{self, ErrorMatcher, NormalizationRule};
use crate::registry::{Registry, RegistryError, ResourceKey};
use crate::validator::DeclarativeValidator;

/// Why a verification did not pass.
#[derive(Debug, thiserror::Error)]
pub enum EquivalenceError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed to convert object to JSON: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("{}", describe(.0))]
    Diverged(Vec<Divergence>),
}

impl EquivalenceError {
    /// The divergences, if this is a [`Diverged`](Self::Diverged) error.
    pub fn divergences(&self) -> &[Divergence] {
        match self {
            EquivalenceError::Diverged(d) => d,
            _ => &[],
        }
    }
}

fn describe(divergences: &[Divergence]) -> String {
    let mut out = format!("validators diverged in {} context(s)", divergences.len());
    for d in divergences {
        out.push('\n');
        out.push_str(&d.to_string());
    }
    out
}

/// An actual error that lines up with an expected one by path but differs
/// in compared attributes.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Mismatch {
    pub expected: FieldError,
    pub actual: FieldError,
    /// Names of the attributes that differ, e.g. `["type", "origin"]`.
    pub attributes: Vec<&'static str>,
}

/// Difference between an expected and an actual error list.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ErrorDiff {
    /// Expected but not produced.
    pub missing: Vec<FieldError>,
    /// Produced but not expected.
    pub extra: Vec<FieldError>,
    pub mismatched: Vec<Mismatch>,
}

impl ErrorDiff {
    /// Compare `actual` to `expected` as multisets under `matcher`.
    ///
    /// Each expected error consumes at most one matching actual error, and
    /// the pairing is a maximum matching, so a loose matcher (e.g. detail
    /// substrings) cannot leave a pair unmatched that another assignment
    /// would have paired. Leftovers on both sides that share a field path
    /// are reported as mismatches; the rest are missing or extra.
    pub fn compute(matcher: &ErrorMatcher, expected: &ErrorList, actual: &ErrorList) -> Self {
        let candidates: Vec<Vec<usize>> = expected
            .iter()
            .map(|want| {
                actual
                    .iter()
                    .enumerate()
                    .filter(|(_, got)| matcher.matches(want, got))
                    .map(|(i, _)| i)
                    .collect()
            })
            .collect();
        let mut owner = vec![None; actual.len()];
        for e in 0..candidates.len() {
            let mut seen = vec![false; actual.len()];
            augment(e, &candidates, &mut owner, &mut seen);
        }

        let mut paired = vec![false; expected.len()];
        for &e in owner.iter().flatten() {
            paired[e] = true;
        }
        let mut used: Vec<bool> = owner.iter().map(Option::is_some).collect();
        let unmatched = expected
            .iter()
            .zip(paired)
            .filter(|(_, p)| !p)
            .map(|(want, _)| want);

        let mut diff = ErrorDiff::default();
        for want in unmatched {
            let same_field = actual
                .iter()
                .enumerate()
                .position(|(i, got)| !used[i] && got.field == want.field);
            match same_field {
                Some(i) => {
                    used[i] = true;
                    let got = &actual.as_slice()[i];
                    diff.mismatched.push(Mismatch {
                        expected: want.clone(),
                        actual: got.clone(),
                        attributes: matcher.differences(want, got),
                    });
                }
                None => diff.missing.push(want.clone()),
            }
        }
        diff.extra = actual
            .iter()
            .zip(used)
            .filter(|(_, u)| !u)
            .map(|(e, _)| e.clone())
            .collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty() && self.mismatched.is_empty()
    }
}

/// Kuhn's augmenting path step: try to give expected error `e` an actual
/// error, re-seating earlier owners where that frees one up.
fn augment(e: usize, candidates: &[Vec<usize>], owner: &mut [Option<usize>], seen: &mut [bool]) -> bool {
    for &a in &candidates[e] {
        if seen[a] {
            continue;
        }
        seen[a] = true;
        let free = match owner[a] {
            None => true,
            Some(other) => augment(other, candidates, owner, seen),
        };
        if free {
            owner[a] = Some(e);
            return true;
        }
    }
    false
}

fn tagged(err: &FieldError) -> String {
    match err.origin {
        Some(ref origin) => format!("{err} (origin={origin})"),
        None => err.to_string(),
    }
}

impl fmt::Display for ErrorDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for err in &self.missing {
            writeln!(f, "    missing: {}", tagged(err))?;
        }
        for err in &self.extra {
            writeln!(f, "    extra: {}", tagged(err))?;
        }
        for m in &self.mismatched {
            writeln!(
                f,
                "    mismatched {}: expected {}, got {}",
                m.attributes.join("+"),
                tagged(&m.expected),
                tagged(&m.actual)
            )?;
        }
        Ok(())
    }
}

/// Everything that went wrong in one version context.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Divergence {
    pub context: VersionContext,
    /// Declarative output against the expected errors.
    pub declarative: ErrorDiff,
    /// Imperative output against the expected errors.
    pub imperative: ErrorDiff,
    /// Declarative output against imperative output.
    pub cross: ErrorDiff,
}

impl Divergence {
    pub fn is_empty(&self) -> bool {
        self.declarative.is_empty() && self.imperative.is_empty() && self.cross.is_empty()
    }
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.context)?;
        for (label, diff) in [
            ("declarative vs expected", &self.declarative),
            ("imperative vs expected", &self.imperative),
            ("declarative vs imperative", &self.cross),
        ] {
            if !diff.is_empty() {
                writeln!(f, "  {label}:")?;
                write!(f, "{diff}")?;
            }
        }
        Ok(())
    }
}

/// Checks that declarative and imperative validation agree.
#[derive(Clone, Debug)]
pub struct Oracle<'r> {
    validator: DeclarativeValidator<'r>,
    matcher: ErrorMatcher,
    normalizations: Vec<NormalizationRule>,
}

impl<'r> Oracle<'r> {
    /// An oracle comparing error type, field and origin.
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            validator: DeclarativeValidator::new(registry),
            matcher: ErrorMatcher::default(),
            normalizations: Vec::new(),
        }
    }

    pub fn with_matcher(mut self, matcher: ErrorMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Add a path rewrite applied to expected and actual errors alike.
    pub fn with_normalization(mut self, rule: NormalizationRule) -> Self {
        self.normalizations.push(rule);
        self
    }

    pub fn matcher(&self) -> &ErrorMatcher {
        &self.matcher
    }

    /// Verify creation of `object` in the version named by `ctx`.
    pub fn verify_create<T, F>(
        &self,
        ctx: &VersionContext,
        object: &T,
        imperative: F,
        expected: &ErrorList,
    ) -> Result<(), EquivalenceError>
    where
        T: Serialize,
        F: Fn(&VersionContext, &T) -> ErrorList,
    {
        let ctx = ctx.with_operation(Operation::Create);
        into_result(self.check_create(&ctx, object, &imperative, expected)?.into_iter().collect())
    }

    /// Verify the update of `old` to `new` in the version named by `ctx`.
    pub fn verify_update<T, F>(
        &self,
        ctx: &VersionContext,
        new: &T,
        old: &T,
        imperative: F,
        expected: &ErrorList,
    ) -> Result<(), EquivalenceError>
    where
        T: Serialize,
        F: Fn(&VersionContext, &T, &T) -> ErrorList,
    {
        let ctx = ctx.with_operation(Operation::Update);
        into_result(
            self.check_update(&ctx, new, old, &imperative, expected)?
                .into_iter()
                .collect(),
        )
    }

    /// [`verify_create`](Self::verify_create) in every version the resource
    /// serves; the version in `ctx` is ignored. Divergences from all versions
    /// are reported together.
    pub fn verify_create_all_versions<T, F>(
        &self,
        ctx: &VersionContext,
        object: &T,
        imperative: F,
        expected: &ErrorList,
    ) -> Result<(), EquivalenceError>
    where
        T: Serialize,
        F: Fn(&VersionContext, &T) -> ErrorList,
    {
        let mut divergences = Vec::new();
        for version in self.versions(ctx)? {
            let vctx = ctx.with_version(version).with_operation(Operation::Create);
            divergences.extend(self.check_create(&vctx, object, &imperative, expected)?);
        }
        into_result(divergences)
    }

    /// [`verify_update`](Self::verify_update) in every version the resource
    /// serves; the version in `ctx` is ignored.
    pub fn verify_update_all_versions<T, F>(
        &self,
        ctx: &VersionContext,
        new: &T,
        old: &T,
        imperative: F,
        expected: &ErrorList,
    ) -> Result<(), EquivalenceError>
    where
        T: Serialize,
        F: Fn(&VersionContext, &T, &T) -> ErrorList,
    {
        let mut divergences = Vec::new();
        for version in self.versions(ctx)? {
            let vctx = ctx.with_version(version).with_operation(Operation::Update);
            divergences.extend(self.check_update(&vctx, new, old, &imperative, expected)?);
        }
        into_result(divergences)
    }

    fn versions(&self, ctx: &VersionContext) -> Result<Vec<String>, RegistryError> {
        let key = ResourceKey::new(&ctx.api_group, &ctx.resource);
        Ok(self.validator.registry().get(&key)?.versions().to_vec())
    }

    fn check_create<T, F>(
        &self,
        ctx: &VersionContext,
        object: &T,
        imperative: &F,
        expected: &ErrorList,
    ) -> Result<Option<Divergence>, EquivalenceError>
    where
        T: Serialize,
        F: Fn(&VersionContext, &T) -> ErrorList,
    {
        let value = serde_json::to_value(object).map_err(EquivalenceError::Serialize)?;
        let declarative = self.validator.validate_create(ctx, &value)?;
        let imperative = imperative(ctx, object);
        Ok(self.compare(ctx, &declarative, &imperative, expected))
    }

    fn check_update<T, F>(
        &self,
        ctx: &VersionContext,
        new: &T,
        old: &T,
        imperative: &F,
        expected: &ErrorList,
    ) -> Result<Option<Divergence>, EquivalenceError>
    where
        T: Serialize,
        F: Fn(&VersionContext, &T, &T) -> ErrorList,
    {
        let new_value = serde_json::to_value(new).map_err(EquivalenceError::Serialize)?;
        let old_value = serde_json::to_value(old).map_err(EquivalenceError::Serialize)?;
        let declarative = self.validator.validate_update(ctx, &new_value, &old_value)?;
        let imperative = imperative(ctx, new, old);
        Ok(self.compare(ctx, &declarative, &imperative, expected))
    }

    fn compare(
        &self,
        ctx: &VersionContext,
        declarative: &ErrorList,
        imperative: &ErrorList,
        expected: &ErrorList,
    ) -> Option<Divergence> {
        let declarative = matcher::normalize(&self.normalizations, declarative);
        let imperative = matcher::normalize(&self.normalizations, imperative);
        let expected = matcher::normalize(&self.normalizations, expected);

        let divergence = Divergence {
            context: ctx.clone(),
            declarative: ErrorDiff::compute(&self.matcher, &expected, &declarative),
            imperative: ErrorDiff::compute(&self.matcher, &expected, &imperative),
            cross: ErrorDiff::compute(&self.matcher, &imperative, &declarative),
        };
        if divergence.is_empty() {
            tracing::debug!(context = %ctx, errors = expected.len(), "validators agree");
            return None;
        }
        tracing::warn!(context = %ctx, "validators diverged\n{divergence}");
        Some(divergence)
    }
}

fn into_result(divergences: Vec<Divergence>) -> Result<(), EquivalenceError> {
    if divergences.is_empty() {
        Ok(())
    } else {
        Err(EquivalenceError::Diverged(divergences))
    }
}
