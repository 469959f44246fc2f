//! `storage.k8s.io` resources: `CSINode` and `VolumeAttachment`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::VersionContext;
use crate::errors::{ErrorList, FieldError};
use crate::formats;
use crate::path::Path;
use crate::registry::ResourceDeclaration;
use crate::rules::Rule;
use crate::schema::Schema;

use super::{ObjectMeta, metadata_schema};

pub const GROUP: &str = "storage.k8s.io";
pub const CSINODES: &str = "csinodes";
pub const VOLUME_ATTACHMENTS: &str = "volumeattachments";
pub const VERSIONS: [&str; 2] = ["v1beta1", "v1"];

/// Maximum length of a driver's node ID.
pub const MAX_NODE_ID_LENGTH: usize = 192;

const DRIVER_UPDATE_DETAIL: &str = "updates to driver {field} are forbidden";
const EXACTLY_ONE_SOURCE: &str = "must specify exactly one of inlineVolumeSpec and persistentVolumeName";

fn versions() -> Vec<String> {
    VERSIONS.map(String::from).to_vec()
}

// CSINode

/// The CSI drivers installed on a node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CSINode {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: CSINodeSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CSINodeSpec {
    #[serde(default)]
    pub drivers: Vec<CSINodeDriver>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CSINodeDriver {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "nodeID")]
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topology_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocatable: Option<VolumeNodeResources>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeNodeResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i32>,
}

impl CSINode {
    pub fn new(name: impl Into<String>, drivers: Vec<CSINodeDriver>) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            spec: CSINodeSpec { drivers },
        }
    }
}

impl CSINodeDriver {
    pub fn new(name: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_id: node_id.into(),
            ..Self::default()
        }
    }
}

pub fn csinode_declaration() -> ResourceDeclaration {
    let driver = Schema::object([
        ("name", Schema::string()),
        ("nodeID", Schema::string()),
        ("topologyKeys", Schema::list(Schema::string())),
        ("allocatable", Schema::object([("count", Schema::integer())])),
    ]);
    ResourceDeclaration {
        group: GROUP.into(),
        resource: CSINODES.into(),
        kind: "CSINode".into(),
        versions: versions(),
        schema: Schema::object([
            ("metadata", metadata_schema()),
            ("spec", Schema::object([("drivers", Schema::list(driver))])),
        ]),
        rules: vec![
            Rule::required("spec.drivers[*].name"),
            Rule::format("spec.drivers[*].name", formats::LONG_NAME),
            Rule::required("spec.drivers[*].nodeID"),
            Rule::max_length("spec.drivers[*].nodeID", MAX_NODE_ID_LENGTH),
            Rule::list_item_key("spec.drivers", ["name"]),
            Rule::forbidden_on_update("spec.drivers", ["name", "nodeID"], ["name"])
                .with_message(DRIVER_UPDATE_DETAIL),
        ],
    }
}

fn drivers_path() -> Path {
    Path::from_fields(["spec", "drivers"])
}

pub fn validate_csinode(_ctx: &VersionContext, node: &CSINode) -> ErrorList {
    let mut errs = ErrorList::new();
    let mut names = HashSet::new();

    for (i, driver) in node.spec.drivers.iter().enumerate() {
        let path = drivers_path().index(i);
        let name_path = path.child("name");
        if driver.name.is_empty() {
            errs.push(FieldError::required(name_path.clone(), ""));
        } else {
            for msg in formats::is_dns1123_subdomain(&driver.name) {
                errs.push(
                    FieldError::invalid(name_path.clone(), driver.name.as_str(), msg)
                        .with_origin(format!("format={}", formats::LONG_NAME)),
                );
            }
        }
        if !names.insert(driver.name.as_str()) {
            errs.push(FieldError::invalid(
                name_path,
                driver.name.as_str(),
                format!("duplicate entries for key [name={}]", Value::from(driver.name.as_str())),
            ));
        }

        let node_id_path = path.child("nodeID");
        if driver.node_id.is_empty() {
            errs.push(FieldError::required(node_id_path, ""));
        } else if driver.node_id.len() > MAX_NODE_ID_LENGTH {
            errs.push(FieldError::too_long(node_id_path, MAX_NODE_ID_LENGTH).with_origin("maxLength"));
        }
    }
    errs
}

/// Pairs each new driver with its old counterpart: by name when names are
/// unique on both sides, otherwise (or when the name changed) by position.
fn pair_drivers(new: &[CSINodeDriver], old: &[CSINodeDriver]) -> Vec<(usize, usize)> {
    fn unique(drivers: &[CSINodeDriver]) -> bool {
        let mut seen = HashSet::new();
        drivers.iter().all(|d| seen.insert(d.name.as_str()))
    }

    let mut partner: Vec<Option<usize>> = vec![None; new.len()];
    let mut taken = vec![false; old.len()];
    if unique(new) && unique(old) {
        for (i, driver) in new.iter().enumerate() {
            if let Some(j) = old.iter().position(|o| o.name == driver.name) {
                partner[i] = Some(j);
                taken[j] = true;
            }
        }
    }
    partner
        .into_iter()
        .enumerate()
        .filter_map(|(i, p)| match p {
            Some(j) => Some((i, j)),
            None if i < old.len() && !taken[i] => {
                taken[i] = true;
                Some((i, i))
            }
            None => None,
        })
        .collect()
}

pub fn validate_csinode_update(ctx: &VersionContext, new: &CSINode, old: &CSINode) -> ErrorList {
    let mut errs = validate_csinode(ctx, new);
    let (new_drivers, old_drivers) = (&new.spec.drivers, &old.spec.drivers);
    for (i, j) in pair_drivers(new_drivers, old_drivers) {
        let path = drivers_path().index(i);
        let (after, before) = (&new_drivers[i], &old_drivers[j]);
        if after.name != before.name {
            errs.push(FieldError::forbidden(
                path.child("name"),
                DRIVER_UPDATE_DETAIL.replace("{field}", "name"),
            ));
        }
        if after.node_id != before.node_id {
            errs.push(FieldError::forbidden(
                path.child("nodeID"),
                DRIVER_UPDATE_DETAIL.replace("{field}", "nodeID"),
            ));
        }
    }
    errs
}

// VolumeAttachment

/// A request to attach a volume to a node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAttachment {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: VolumeAttachmentSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAttachmentSpec {
    #[serde(default)]
    pub attacher: String,
    #[serde(default)]
    pub source: VolumeAttachmentSource,
    #[serde(default)]
    pub node_name: String,
}

/// Exactly one of the two fields must be set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAttachmentSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_name: Option<String>,
    /// An inline persistent volume spec, kept opaque.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_volume_spec: Option<Value>,
}

impl VolumeAttachment {
    /// An attachment of persistent volume `pv_name`.
    pub fn new(
        name: impl Into<String>,
        attacher: impl Into<String>,
        pv_name: impl Into<String>,
        node_name: impl Into<String>,
    ) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            spec: VolumeAttachmentSpec {
                attacher: attacher.into(),
                source: VolumeAttachmentSource {
                    persistent_volume_name: Some(pv_name.into()),
                    inline_volume_spec: None,
                },
                node_name: node_name.into(),
            },
        }
    }
}

/// Requires the `cel_rules` feature to be registered.
pub fn volume_attachment_declaration() -> ResourceDeclaration {
    ResourceDeclaration {
        group: GROUP.into(),
        resource: VOLUME_ATTACHMENTS.into(),
        kind: "VolumeAttachment".into(),
        versions: versions(),
        schema: Schema::object([
            ("metadata", metadata_schema()),
            (
                "spec",
                Schema::object([
                    ("attacher", Schema::string()),
                    ("nodeName", Schema::string()),
                    (
                        "source",
                        Schema::object([
                            ("persistentVolumeName", Schema::string()),
                            ("inlineVolumeSpec", Schema::any()),
                        ]),
                    ),
                ]),
            ),
        ]),
        rules: vec![
            Rule::required("spec.attacher"),
            Rule::required("spec.nodeName"),
            Rule::cel(
                "spec.source",
                "has(self.persistentVolumeName) || has(self.inlineVolumeSpec)",
            )
            .with_message(EXACTLY_ONE_SOURCE)
            .with_reason("FieldValueRequired"),
            Rule::cel(
                "spec.source",
                "!(has(self.persistentVolumeName) && has(self.inlineVolumeSpec))",
            )
            .with_message(EXACTLY_ONE_SOURCE)
            .with_reason("FieldValueForbidden"),
            Rule::immutable("spec"),
        ],
    }
}

pub fn validate_volume_attachment(_ctx: &VersionContext, va: &VolumeAttachment) -> ErrorList {
    let mut errs = ErrorList::new();
    let spec = Path::new("spec");
    if va.spec.attacher.is_empty() {
        errs.push(FieldError::required(spec.child("attacher"), ""));
    }
    if va.spec.node_name.is_empty() {
        errs.push(FieldError::required(spec.child("nodeName"), ""));
    }
    let source = &va.spec.source;
    match (source.persistent_volume_name.is_some(), source.inline_volume_spec.is_some()) {
        (false, false) => errs.push(FieldError::required(spec.child("source"), EXACTLY_ONE_SOURCE)),
        (true, true) => errs.push(FieldError::forbidden(spec.child("source"), EXACTLY_ONE_SOURCE)),
        _ => {}
    }
    errs
}

pub fn validate_volume_attachment_update(
    ctx: &VersionContext,
    new: &VolumeAttachment,
    old: &VolumeAttachment,
) -> ErrorList {
    let mut errs = validate_volume_attachment(ctx, new);
    if new.spec != old.spec {
        errs.push(immutable_error(Path::new("spec"), &new.spec));
    }
    errs
}

/// The immutability error for a changed field, or an internal error when the
/// new value cannot be reported.
fn immutable_error<T: Serialize>(field: Path, value: &T) -> FieldError {
    match serde_json::to_value(value) {
        Ok(value) => FieldError::invalid(field, value, "field is immutable").with_origin("immutable"),
        Err(err) => FieldError::internal(field, format!("failed to convert value to JSON: {err}")),
    }
}
