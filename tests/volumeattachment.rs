#![cfg(feature = "cel_rules")]

//! VolumeAttachment validation, including the CEL rules on `spec.source`.

use kube_declarative_validation::resources::{self, storage, storage::VolumeAttachment};
use kube_declarative_validation::{
    ErrorList, ErrorMatcher, FieldError, Oracle, Path, Registry, VersionContext,
};
use serde_json::json;

const EXACTLY_ONE: &str = "must specify exactly one of inlineVolumeSpec and persistentVolumeName";

fn registry() -> Registry {
    resources::registry().unwrap()
}

fn ctx() -> VersionContext {
    VersionContext::new(storage::GROUP, "v1beta1", storage::VOLUME_ATTACHMENTS)
}

fn valid() -> VolumeAttachment {
    VolumeAttachment::new("valid-volume-attachment", "example.com", "pv-001", "node-1")
}

fn verify(obj: &VolumeAttachment, expected: Vec<FieldError>) {
    let registry = registry();
    let expected: ErrorList = expected.into();
    Oracle::new(&registry)
        .with_matcher(ErrorMatcher::strict())
        .verify_create_all_versions(&ctx(), obj, storage::validate_volume_attachment, &expected)
        .unwrap();
}

#[test]
fn valid_attachment() {
    verify(&valid(), vec![]);
}

#[test]
fn attacher_required() {
    let mut va = valid();
    va.spec.attacher.clear();
    verify(&va, vec![FieldError::required(Path::from_fields(["spec", "attacher"]), "")]);
}

#[test]
fn node_name_required() {
    let mut va = valid();
    va.spec.node_name.clear();
    verify(&va, vec![FieldError::required(Path::from_fields(["spec", "nodeName"]), "")]);
}

#[test]
fn source_needs_one_volume() {
    let mut va = valid();
    va.spec.source.persistent_volume_name = None;
    verify(&va, vec![FieldError::required(Path::from_fields(["spec", "source"]), EXACTLY_ONE)]);
}

#[test]
fn source_rejects_both_volumes() {
    let mut va = valid();
    va.spec.source.inline_volume_spec = Some(json!({"csi": {"driver": "example.com", "volumeHandle": "vol-1"}}));
    verify(&va, vec![FieldError::forbidden(Path::from_fields(["spec", "source"]), EXACTLY_ONE)]);
}

#[test]
fn inline_source_alone_is_valid() {
    let mut va = valid();
    va.spec.source.persistent_volume_name = None;
    va.spec.source.inline_volume_spec = Some(json!({"csi": {"driver": "example.com"}}));
    verify(&va, vec![]);
}

#[test]
fn spec_is_immutable() {
    let registry = registry();
    let old = valid();
    let mut new = valid();
    new.spec.node_name = "node-2".into();
    let expected: ErrorList = vec![
        FieldError::invalid(Path::new("spec"), serde_json::to_value(&new.spec).unwrap(), "field is immutable")
            .with_origin("immutable"),
    ]
    .into();
    Oracle::new(&registry)
        .with_matcher(ErrorMatcher::strict())
        .verify_update_all_versions(&ctx(), &new, &old, storage::validate_volume_attachment_update, &expected)
        .unwrap();
}

#[test]
fn unchanged_update_passes() {
    let registry = registry();
    Oracle::new(&registry)
        .verify_update_all_versions(
            &ctx(),
            &valid(),
            &valid(),
            storage::validate_volume_attachment_update,
            &ErrorList::new(),
        )
        .unwrap();
}
