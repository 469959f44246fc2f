//! Declarative field validation for Kubernetes-style API objects.
//!
//! Resource types declare their validation as data: a table of [`Rule`]s
//! (required, format, immutable, forbidden-on-update, list keys, max length
//! and CEL expressions) bound to field paths and scoped to API versions and
//! operations. The [`DeclarativeValidator`] evaluates those tables and
//! returns every violation as a [`FieldError`] carrying the exact field path,
//! the error type, the bad value, a detail message and the origin of the rule
//! that produced it.
//!
//! The [`Oracle`] runs the declarative validator next to a hand-written one
//! and confirms both produce the expected errors, across every served API
//! version and for both create and update.
//!
//! # Usage
//!
//! ```rust
//! use kube_declarative_validation::{DeclarativeValidator, VersionContext, resources};
//! use serde_json::json;
//!
//! let registry = resources::registry().unwrap();
//! let validator = DeclarativeValidator::new(&registry);
//! let ctx = VersionContext::new("node.k8s.io", "v1", "runtimeclasses");
//!
//! let errs = validator
//!     .validate_create(&ctx, &json!({"metadata": {"name": "myrc"}, "handler": "asads$asdas"}))
//!     .unwrap();
//! assert_eq!(errs.len(), 1);
//! assert_eq!(errs.as_slice()[0].origin.as_deref(), Some("format=k8s-short-name"));
//! ```

pub mod context;
pub mod equivalence;
pub mod errors;
pub mod evaluators;
pub mod formats;
pub mod listmap;
pub mod matcher;
pub mod path;
pub mod registry;
pub mod resources;
pub mod rules;
pub mod schema;
pub mod validator;

#[cfg(feature = "cel_rules")]
pub mod cel_rules;

pub use context::{Operation, VersionContext};
pub use equivalence::{Divergence, EquivalenceError, ErrorDiff, Oracle};
pub use errors::{ErrorList, ErrorType, FieldError};
pub use matcher::{ErrorMatcher, NormalizationRule};
pub use path::{Path, PathTemplate};
pub use registry::{Registry, RegistryError, ResourceDeclaration};
pub use rules::{Rule, RuleKind};
pub use schema::Schema;
pub use validator::DeclarativeValidator;
