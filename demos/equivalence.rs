//! Check declarative rules against hand-written validators.
//!
//! Run with: `cargo run --example equivalence`

use kube_declarative_validation::resources::{self, node, storage};
use kube_declarative_validation::{
    DeclarativeValidator, ErrorList, FieldError, Oracle, Path, VersionContext,
};
use serde_json::json;

fn main() {
    let registry = resources::registry().expect("reference resources are well-formed");
    let validator = DeclarativeValidator::new(&registry);

    // Declarative validation on raw JSON
    let ctx = VersionContext::new(node::GROUP, "v1", node::RESOURCE);
    let errors = validator
        .validate_create(&ctx, &json!({"metadata": {"name": "myrc"}, "handler": "asads$asdas"}))
        .expect("runtimeclasses are registered");
    println!("RuntimeClass create: {} errors", errors.len());
    for err in &errors {
        println!("  {err} [origin={}]", err.origin.as_deref().unwrap_or("-"));
    }

    // Update: handler is immutable
    let errors = validator
        .validate_update(&ctx, &json!({"handler": "gvisor"}), &json!({"handler": "runc"}))
        .expect("runtimeclasses are registered");
    println!("\nRuntimeClass update: {errors}");

    // Oracle: both validators, every served version
    let oracle = Oracle::new(&registry);
    let csinodes = VersionContext::new(storage::GROUP, "v1", storage::CSINODES);
    let old = storage::CSINode::new(
        "node-1",
        vec![storage::CSINodeDriver::new("io.kubernetes.storage.csi.driver-1", "node-1")],
    );
    let mut new = old.clone();
    new.spec.drivers[0].node_id = "node-2".into();
    let expected: ErrorList = vec![FieldError::forbidden(
        Path::new("spec").child("drivers").index(0).child("nodeID"),
        "updates to driver nodeID are forbidden",
    )]
    .into();
    match oracle.verify_update_all_versions(&csinodes, &new, &old, storage::validate_csinode_update, &expected) {
        Ok(()) => println!("\nCSINode update: validators agree in {:?}", storage::VERSIONS),
        Err(e) => println!("\nCSINode update: {e}"),
    }

    // A divergence: the expectation forgets the attacher error
    let attachments = VersionContext::new(storage::GROUP, "v1", storage::VOLUME_ATTACHMENTS);
    let mut va = storage::VolumeAttachment::new("va", "", "pv-001", "node-1");
    va.metadata.resource_version = Some("1".into());
    match oracle.verify_create(&attachments, &va, storage::validate_volume_attachment, &ErrorList::new()) {
        Ok(()) => println!("\nVolumeAttachment create: validators agree"),
        Err(e) => println!("\nVolumeAttachment create:\n{e}"),
    }
}
