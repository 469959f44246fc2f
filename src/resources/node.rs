//! `node.k8s.io` resources.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::context::VersionContext;
use crate::errors::{ErrorList, FieldError};
use crate::formats;
use crate::path::Path;
use crate::registry::ResourceDeclaration;
use crate::rules::Rule;
use crate::schema::Schema;

use super::{ObjectMeta, metadata_schema};

pub const GROUP: &str = "node.k8s.io";
pub const RESOURCE: &str = "runtimeclasses";
pub const VERSIONS: [&str; 2] = ["v1", "v1beta1"];

/// A container runtime configuration selectable by pods.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeClass {
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Name of the CRI handler, e.g. `runc`. Immutable.
    #[serde(default)]
    pub handler: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overhead: Option<Overhead>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overhead {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_fixed: BTreeMap<String, String>,
}

impl RuntimeClass {
    pub fn new(name: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            handler: handler.into(),
            overhead: None,
        }
    }
}

pub fn declaration() -> ResourceDeclaration {
    ResourceDeclaration {
        group: GROUP.into(),
        resource: RESOURCE.into(),
        kind: "RuntimeClass".into(),
        versions: VERSIONS.map(String::from).to_vec(),
        schema: Schema::object([
            ("metadata", metadata_schema()),
            ("handler", Schema::string()),
            (
                "overhead",
                Schema::object([("podFixed", Schema::map(Schema::string()))]),
            ),
        ]),
        rules: vec![
            Rule::required("handler"),
            Rule::format("handler", formats::SHORT_NAME),
            Rule::immutable("handler"),
        ],
    }
}

pub fn validate(_ctx: &VersionContext, rc: &RuntimeClass) -> ErrorList {
    let mut errs = ErrorList::new();
    let path = Path::new("handler");
    if rc.handler.is_empty() {
        errs.push(FieldError::required(path, ""));
        return errs;
    }
    for msg in formats::is_dns1123_label(&rc.handler) {
        errs.push(
            FieldError::invalid(path.clone(), rc.handler.as_str(), msg)
                .with_origin(format!("format={}", formats::SHORT_NAME)),
        );
    }
    errs
}

pub fn validate_update(ctx: &VersionContext, new: &RuntimeClass, old: &RuntimeClass) -> ErrorList {
    let mut errs = validate(ctx, new);
    if new.handler != old.handler {
        errs.push(
            FieldError::invalid(Path::new("handler"), new.handler.as_str(), "field is immutable")
                .with_origin("immutable"),
        );
    }
    errs
}
