//! Reference resource types.
//!
//! Each resource comes as a typed serde struct, its [`ResourceDeclaration`]
//! (schema plus declarative rules) and hand-written `validate` /
//! `validate_update` functions that the equivalence oracle checks the
//! declarative rules against.

pub mod node;
pub mod storage;

use serde::{Deserialize, Serialize};

use crate::registry::{Registry, RegistryError, ResourceDeclaration};
use crate::schema::Schema;

/// The subset of object metadata the reference resources use.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_version: None,
        }
    }
}

/// Schema of `metadata`; fields beyond `name` and `resourceVersion` are kept.
pub(crate) fn metadata_schema() -> Schema {
    Schema {
        preserve_unknown_fields: true,
        ..Schema::object([
            ("name", Schema::string()),
            ("resourceVersion", Schema::string()),
        ])
    }
}

/// Declarations of every reference resource.
///
/// `VolumeAttachment` relies on CEL rules and is only included with the
/// `cel_rules` feature.
pub fn declarations() -> Vec<ResourceDeclaration> {
    vec![
        node::declaration(),
        storage::csinode_declaration(),
        #[cfg(feature = "cel_rules")]
        storage::volume_attachment_declaration(),
    ]
}

/// A registry holding every reference resource.
pub fn registry() -> Result<Registry, RegistryError> {
    declarations()
        .into_iter()
        .fold(Registry::builder(), |builder, d| builder.register(d))
        .build()
}
