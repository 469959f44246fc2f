//! The declarative validator.
//!
//! Looks up the rule table of the resource named by a [`VersionContext`],
//! keeps the rules active for its version and operation, and evaluates every
//! one of them. Rules never short-circuit each other, so a single pass
//! reports all violations.

use serde_json::Value;

use crate::context::{Operation, VersionContext};
use crate::errors::ErrorList;
use crate::evaluators;
use crate::registry::{Registry, RegistryError};

/// Validates objects against the rules declared in a [`Registry`].
#[derive(Clone, Copy, Debug)]
pub struct DeclarativeValidator<'r> {
    registry: &'r Registry,
}

impl<'r> DeclarativeValidator<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// Validate `object` for creation. The operation in `ctx` is ignored.
    pub fn validate_create(
        &self,
        ctx: &VersionContext,
        object: &Value,
    ) -> Result<ErrorList, RegistryError> {
        self.run(&ctx.with_operation(Operation::Create), object, None)
    }

    /// Validate `new` replacing `old`. The operation in `ctx` is ignored.
    pub fn validate_update(
        &self,
        ctx: &VersionContext,
        new: &Value,
        old: &Value,
    ) -> Result<ErrorList, RegistryError> {
        self.run(&ctx.with_operation(Operation::Update), new, Some(old))
    }

    fn run(
        &self,
        ctx: &VersionContext,
        new: &Value,
        old: Option<&Value>,
    ) -> Result<ErrorList, RegistryError> {
        let resource = self.registry.resolve(ctx)?;
        let mut errs = ErrorList::new();
        let mut evaluated = 0;
        for rule in resource
            .rules()
            .iter()
            .filter(|r| r.rule().applies_to(&ctx.api_version, ctx.operation))
        {
            errs.extend(evaluators::evaluate(rule, ctx, new, old));
            evaluated += 1;
        }
        tracing::debug!(
            context = %ctx,
            rules = evaluated,
            errors = errs.len(),
            "declarative validation finished"
        );
        Ok(errs)
    }
}

/// Validate `object` for creation against `registry`.
pub fn validate_create(
    registry: &Registry,
    ctx: &VersionContext,
    object: &Value,
) -> Result<ErrorList, RegistryError> {
    DeclarativeValidator::new(registry).validate_create(ctx, object)
}

/// Validate the update of `old` to `new` against `registry`.
pub fn validate_update(
    registry: &Registry,
    ctx: &VersionContext,
    new: &Value,
    old: &Value,
) -> Result<ErrorList, RegistryError> {
    DeclarativeValidator::new(registry).validate_update(ctx, new, old)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorType;
    use crate::registry::ResourceDeclaration;
    use crate::rules::Rule;
    use crate::schema::Schema;
    use serde_json::json;

    fn registry() -> Registry {
        Registry::builder()
            .register(ResourceDeclaration {
                group: "node.k8s.io".into(),
                resource: "runtimeclasses".into(),
                kind: "RuntimeClass".into(),
                versions: vec!["v1beta1".into(), "v1".into()],
                schema: Schema::object([
                    ("handler", Schema::string()),
                    ("scheduling", Schema::any()),
                ]),
                rules: vec![
                    Rule::required("handler"),
                    Rule::format("handler", "k8s-short-name"),
                    Rule::immutable("handler"),
                    Rule::required("scheduling")
                        .for_versions(["v1"])
                        .on([Operation::Create]),
                ],
            })
            .build()
            .unwrap()
    }

    fn ctx(version: &str) -> VersionContext {
        VersionContext::new("node.k8s.io", version, "runtimeclasses")
    }

    #[test]
    fn reports_all_violations_in_one_pass() {
        let registry = registry();
        let errs = validate_create(&registry, &ctx("v1"), &json!({"handler": "Bad_Name"})).unwrap();
        let types: Vec<_> = errs.iter().map(|e| (e.error_type, e.field.to_string())).collect();
        assert_eq!(
            types,
            [
                (ErrorType::Invalid, "handler".to_string()),
                (ErrorType::Required, "scheduling".to_string()),
            ]
        );
    }

    #[test]
    fn version_scoped_rules() {
        let registry = registry();
        let obj = json!({"handler": "runc"});
        assert_eq!(validate_create(&registry, &ctx("v1"), &obj).unwrap().len(), 1);
        assert!(validate_create(&registry, &ctx("v1beta1"), &obj).unwrap().is_empty());
    }

    #[test]
    fn operation_scoped_rules() {
        let registry = registry();
        let validator = DeclarativeValidator::new(&registry);
        let old = json!({"handler": "runc"});
        let errs = validator.validate_update(&ctx("v1"), &old, &old).unwrap();
        assert!(errs.is_empty(), "create-only rule leaked into update: {errs}");

        let errs = validator
            .validate_update(&ctx("v1"), &json!({"handler": "gvisor"}), &old)
            .unwrap();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs.as_slice()[0].origin.as_deref(), Some("immutable"));
    }

    #[test]
    fn context_operation_is_overridden() {
        let registry = registry();
        let update_ctx = ctx("v1beta1").with_operation(Operation::Update);
        let errs = validate_create(&registry, &update_ctx, &json!({"handler": "runc"})).unwrap();
        assert!(errs.is_empty());
    }

    #[test]
    fn lookup_errors_surface() {
        let registry = registry();
        let err = validate_create(&registry, &ctx("v2"), &json!({})).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownVersion { .. }));
        let other = VersionContext::new("storage.k8s.io", "v1", "csinodes");
        let err = validate_create(&registry, &other, &json!({})).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownResource(_)));
    }
}
