//! Declarative and hand-written RuntimeClass validation must agree in every
//! served version.

use kube_declarative_validation::resources::{self, node, node::RuntimeClass};
use kube_declarative_validation::{
    ErrorList, ErrorMatcher, FieldError, Oracle, Path, Registry, VersionContext,
};

const INVALID_HANDLER_DETAIL: &str = "a lowercase RFC 1123 label must consist of lower case alphanumeric characters or '-', and must start and end with an alphanumeric character (e.g. 'my-name',  or '123-abc', regex used for validation is '[a-z0-9]([-a-z0-9]*[a-z0-9])?')";

fn registry() -> Registry {
    resources::registry().unwrap()
}

fn ctx(version: &str) -> VersionContext {
    VersionContext::new(node::GROUP, version, node::RESOURCE)
}

fn runtime_class(handler: &str) -> RuntimeClass {
    let mut rc = RuntimeClass::new("myrc", handler);
    rc.metadata.resource_version = Some("1".into());
    rc
}

#[test]
fn valid_handler() {
    let registry = registry();
    let oracle = Oracle::new(&registry).with_matcher(ErrorMatcher::strict());
    for version in node::VERSIONS {
        oracle
            .verify_create(&ctx(version), &runtime_class("test"), node::validate, &ErrorList::new())
            .unwrap();
    }
}

#[test]
fn invalid_handler_dns_label() {
    let registry = registry();
    let oracle = Oracle::new(&registry).with_matcher(ErrorMatcher::strict());
    let expected: ErrorList = vec![
        FieldError::invalid(Path::new("handler"), "asads$asdas", INVALID_HANDLER_DETAIL)
            .with_origin("format=k8s-short-name"),
    ]
    .into();
    oracle
        .verify_create_all_versions(&ctx("v1"), &runtime_class("asads$asdas"), node::validate, &expected)
        .unwrap();
}

#[test]
fn missing_handler() {
    let registry = registry();
    let expected: ErrorList = vec![FieldError::required(Path::new("handler"), "")].into();
    Oracle::new(&registry)
        .verify_create_all_versions(&ctx("v1"), &runtime_class(""), node::validate, &expected)
        .unwrap();
}

#[test]
fn no_op_update() {
    let registry = registry();
    let rc = runtime_class("runc");
    Oracle::new(&registry)
        .with_matcher(ErrorMatcher::strict())
        .verify_update_all_versions(&ctx("v1"), &rc, &rc, node::validate_update, &ErrorList::new())
        .unwrap();
}

#[test]
fn handler_changed_is_immutable() {
    let registry = registry();
    let expected: ErrorList = vec![
        FieldError::invalid(Path::new("handler"), "gvisor", "field is immutable").with_origin("immutable"),
    ]
    .into();
    Oracle::new(&registry)
        .with_matcher(ErrorMatcher::strict())
        .verify_update_all_versions(
            &ctx("v1beta1"),
            &runtime_class("gvisor"),
            &runtime_class("runc"),
            node::validate_update,
            &expected,
        )
        .unwrap();
}

#[test]
fn immutability_does_not_apply_on_create() {
    let registry = registry();
    Oracle::new(&registry)
        .verify_create(&ctx("v1"), &runtime_class("gvisor"), node::validate, &ErrorList::new())
        .unwrap();
}

#[test]
fn wrong_expectation_is_reported() {
    let registry = registry();
    let expected: ErrorList = vec![FieldError::required(Path::new("handler"), "")].into();
    let err = Oracle::new(&registry)
        .verify_create(&ctx("v1"), &runtime_class("test"), node::validate, &expected)
        .unwrap_err();
    let divergence = &err.divergences()[0];
    assert_eq!(divergence.declarative.missing.len(), 1);
    assert_eq!(divergence.imperative.missing.len(), 1);
    assert!(divergence.cross.is_empty());
}
