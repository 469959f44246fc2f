//! The resource type registry.
//!
//! Maps each resource (API group + resource name) to its schema, served
//! versions and compiled rule table. A [`Registry`] is built once, with every
//! declaration checked up front, and is read-only afterwards; callers pass it
//! by reference to the declarative validator and the equivalence oracle.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

use crate::context::VersionContext;
use crate::formats::{self, NamedFormat};
use crate::path::{PathTemplate, TemplateError};
use crate::rules::{Rule, RuleKind};
use crate::schema::Schema;

#[cfg(feature = "cel_rules")]
use crate::cel_rules::{CelError, CompiledCel};

/// Everything declared about one resource type.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceDeclaration {
    #[serde(default)]
    pub group: String,
    /// Plural resource name, e.g. `csinodes`.
    pub resource: String,
    pub kind: String,
    /// Served API versions.
    pub versions: Vec<String>,
    pub schema: Schema,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Identifies a resource type independently of version.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub group: String,
    pub resource: String,
}

impl ResourceKey {
    pub fn new(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.resource)
        } else {
            write!(f, "{}/{}", self.group, self.resource)
        }
    }
}

/// Configuration and lookup failures.
///
/// Every variant except [`UnknownResource`](Self::UnknownResource) and
/// [`UnknownVersion`](Self::UnknownVersion) is raised while building the
/// registry and indicates a malformed declaration.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("resource {0} is registered twice")]
    DuplicateResource(ResourceKey),
    #[error("resource {0} declares no versions")]
    NoVersions(ResourceKey),
    #[error("{resource}: invalid path \"{path}\": {source}")]
    Template {
        resource: ResourceKey,
        path: String,
        #[source]
        source: TemplateError,
    },
    #[error("{resource}: rule path \"{path}\" does not exist in the schema")]
    UnknownField { resource: ResourceKey, path: String },
    #[error("{resource}: unknown format \"{name}\" at \"{path}\"")]
    UnknownFormat {
        resource: ResourceKey,
        path: String,
        name: String,
    },
    #[error("{resource}: rule at \"{path}\" names version {version}, which is not served")]
    UnservedVersion {
        resource: ResourceKey,
        path: String,
        version: String,
    },
    #[error("{resource}: rule at \"{path}\" declares an empty {scope} list")]
    EmptyScope {
        resource: ResourceKey,
        path: String,
        scope: &'static str,
    },
    #[error("{resource}: {rule} rule at \"{path}\" must target a list")]
    NotAList {
        resource: ResourceKey,
        path: String,
        rule: &'static str,
    },
    #[error("{resource}: {rule} rule at \"{path}\" declares no fields")]
    NoFields {
        resource: ResourceKey,
        path: String,
        rule: &'static str,
    },
    #[error("{resource}: list items at \"{path}\" have no field \"{field}\"")]
    UnknownItemField {
        resource: ResourceKey,
        path: String,
        field: String,
    },
    #[error("{resource}: forbiddenOnUpdate at \"{path}\" is keyed by {key_fields:?} but no listItemKey rule declares that key")]
    MissingListKey {
        resource: ResourceKey,
        path: String,
        key_fields: Vec<String>,
    },
    #[cfg(feature = "cel_rules")]
    #[error("{resource}: cel rule at \"{path}\": {source}")]
    Cel {
        resource: ResourceKey,
        path: String,
        #[source]
        source: CelError,
    },
    #[error("{resource}: cel rule at \"{path}\" requires the cel_rules feature")]
    CelDisabled { resource: ResourceKey, path: String },
    #[error("invalid registry configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("no rules registered for resource {0}")]
    UnknownResource(ResourceKey),
    #[error("resource {resource} does not serve version {version}")]
    UnknownVersion {
        resource: ResourceKey,
        version: String,
    },
}

/// The executable form of a [`RuleKind`].
#[derive(Debug)]
pub(crate) enum Check {
    Required,
    Immutable,
    Format(NamedFormat),
    ForbiddenOnUpdate {
        fields: Vec<String>,
        key_fields: Vec<String>,
        detail: String,
        forbid_additions: bool,
    },
    ListItemKey {
        key_fields: Vec<String>,
    },
    MaxLength(usize),
    #[cfg(feature = "cel_rules")]
    Cel(Box<CompiledCel>),
}

/// A rule with its template parsed and its check resolved.
#[derive(Debug)]
pub struct CompiledRule {
    rule: Rule,
    template: PathTemplate,
    origin: Option<String>,
    pub(crate) check: Check,
}

impl CompiledRule {
    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    pub fn template(&self) -> &PathTemplate {
        &self.template
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }
}

/// The compiled declaration of one resource type.
#[derive(Debug)]
pub struct ResourceRules {
    key: ResourceKey,
    kind: String,
    versions: Vec<String>,
    schema: Schema,
    rules: Vec<CompiledRule>,
}

impl ResourceRules {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn serves(&self, version: &str) -> bool {
        self.versions.iter().any(|v| v == version)
    }
}

/// Read-only mapping from resource type to its declared rules.
#[derive(Debug, Default)]
pub struct Registry {
    resources: HashMap<ResourceKey, ResourceRules>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Build a registry from a JSON array of [`ResourceDeclaration`]s.
    pub fn from_json(config: &str) -> Result<Self, RegistryError> {
        let declarations: Vec<ResourceDeclaration> = serde_json::from_str(config)?;
        declarations
            .into_iter()
            .fold(Self::builder(), RegistryBuilder::register)
            .build()
    }

    pub fn get(&self, key: &ResourceKey) -> Result<&ResourceRules, RegistryError> {
        self.resources
            .get(key)
            .ok_or_else(|| RegistryError::UnknownResource(key.clone()))
    }

    /// The rule table for the resource named by `ctx`, after checking that the
    /// requested version is served.
    pub fn resolve(&self, ctx: &VersionContext) -> Result<&ResourceRules, RegistryError> {
        let resources = self.get(&ResourceKey::new(&ctx.api_group, &ctx.resource))?;
        if !resources.serves(&ctx.api_version) {
            return Err(RegistryError::UnknownVersion {
                resource: resources.key.clone(),
                version: ctx.api_version.clone(),
            });
        }
        Ok(resources)
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceRules> {
        self.resources.values()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

// A built registry is shared by reference across threads.
const _: fn() = || {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Registry>();
    assert_send_sync::<CompiledRule>();
};

/// Collects declarations and compiles them into a [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    declarations: Vec<ResourceDeclaration>,
}

impl RegistryBuilder {
    pub fn register(mut self, declaration: ResourceDeclaration) -> Self {
        self.declarations.push(declaration);
        self
    }

    /// Check and compile every declaration. The first malformed rule aborts
    /// the build.
    pub fn build(self) -> Result<Registry, RegistryError> {
        let mut resources = HashMap::with_capacity(self.declarations.len());
        for declaration in self.declarations {
            let compiled = compile_declaration(declaration)?;
            let key = compiled.key.clone();
            if resources.contains_key(&key) {
                return Err(RegistryError::DuplicateResource(key));
            }
            tracing::debug!(
                resource = %key,
                kind = %compiled.kind,
                versions = ?compiled.versions,
                rules = compiled.rules.len(),
                "registered declarative rules"
            );
            resources.insert(key, compiled);
        }
        Ok(Registry { resources })
    }
}

fn compile_declaration(declaration: ResourceDeclaration) -> Result<ResourceRules, RegistryError> {
    let key = ResourceKey::new(declaration.group, declaration.resource);
    if declaration.versions.is_empty() {
        return Err(RegistryError::NoVersions(key));
    }

    let rules = declaration
        .rules
        .iter()
        .map(|rule| {
            compile_rule(
                &key,
                &declaration.versions,
                &declaration.schema,
                &declaration.rules,
                rule,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ResourceRules {
        key,
        kind: declaration.kind,
        versions: declaration.versions,
        schema: declaration.schema,
        rules,
    })
}

fn compile_rule(
    key: &ResourceKey,
    versions: &[String],
    schema: &Schema,
    siblings: &[Rule],
    rule: &Rule,
) -> Result<CompiledRule, RegistryError> {
    let template = PathTemplate::parse(&rule.path).map_err(|source| RegistryError::Template {
        resource: key.clone(),
        path: rule.path.clone(),
        source,
    })?;
    let target = schema
        .resolve(&template)
        .ok_or_else(|| RegistryError::UnknownField {
            resource: key.clone(),
            path: rule.path.clone(),
        })?;

    let empty_scope = [
        ("versions", rule.versions.as_ref().is_some_and(Vec::is_empty)),
        ("operations", rule.operations.as_ref().is_some_and(Vec::is_empty)),
    ];
    if let Some((scope, _)) = empty_scope.into_iter().find(|(_, empty)| *empty) {
        return Err(RegistryError::EmptyScope {
            resource: key.clone(),
            path: rule.path.clone(),
            scope,
        });
    }

    if let Some(unserved) = rule
        .versions
        .iter()
        .flatten()
        .find(|v| !versions.contains(*v))
    {
        return Err(RegistryError::UnservedVersion {
            resource: key.clone(),
            path: rule.path.clone(),
            version: unserved.clone(),
        });
    }

    let list_items = |kind: &'static str, names: &[&[String]]| -> Result<(), RegistryError> {
        let items = target
            .is_list()
            .then(|| target.item())
            .flatten()
            .ok_or_else(|| RegistryError::NotAList {
                resource: key.clone(),
                path: rule.path.clone(),
                rule: kind,
            })?;
        if names[0].is_empty() {
            return Err(RegistryError::NoFields {
                resource: key.clone(),
                path: rule.path.clone(),
                rule: kind,
            });
        }
        match names.iter().flat_map(|n| n.iter()).find(|f| items.field(f).is_none()) {
            Some(field) => Err(RegistryError::UnknownItemField {
                resource: key.clone(),
                path: rule.path.clone(),
                field: field.clone(),
            }),
            None => Ok(()),
        }
    };

    let check = match &rule.kind {
        RuleKind::Required => Check::Required,
        RuleKind::Immutable => Check::Immutable,
        RuleKind::Format { name } => {
            Check::Format(formats::lookup(name).ok_or_else(|| RegistryError::UnknownFormat {
                resource: key.clone(),
                path: rule.path.clone(),
                name: name.clone(),
            })?)
        }
        RuleKind::MaxLength { max } => Check::MaxLength(*max),
        RuleKind::ListItemKey { key_fields } => {
            list_items(rule.kind.name(), &[key_fields.as_slice()])?;
            Check::ListItemKey {
                key_fields: key_fields.clone(),
            }
        }
        RuleKind::ForbiddenOnUpdate {
            fields,
            key_fields,
            detail,
            forbid_additions,
        } => {
            list_items(rule.kind.name(), &[fields.as_slice(), key_fields.as_slice()])?;
            if !key_fields.is_empty() && !declares_list_key(siblings, &rule.path, key_fields) {
                return Err(RegistryError::MissingListKey {
                    resource: key.clone(),
                    path: rule.path.clone(),
                    key_fields: key_fields.clone(),
                });
            }
            Check::ForbiddenOnUpdate {
                fields: fields.clone(),
                key_fields: key_fields.clone(),
                detail: detail
                    .clone()
                    .unwrap_or_else(|| "updates to {field} are forbidden".to_string()),
                forbid_additions: *forbid_additions,
            }
        }
        #[cfg(feature = "cel_rules")]
        RuleKind::Cel {
            expression,
            message,
            reason,
            optional_old_self,
        } => {
            let compiled = CompiledCel::compile(
                expression,
                message.as_deref(),
                reason.as_deref(),
                *optional_old_self,
            )
            .map_err(|source| RegistryError::Cel {
                resource: key.clone(),
                path: rule.path.clone(),
                source,
            })?;
            Check::Cel(Box::new(compiled))
        }
        #[cfg(not(feature = "cel_rules"))]
        RuleKind::Cel { .. } => {
            return Err(RegistryError::CelDisabled {
                resource: key.clone(),
                path: rule.path.clone(),
            });
        }
    };

    Ok(CompiledRule {
        origin: rule.origin(),
        rule: rule.clone(),
        template,
        check,
    })
}

fn declares_list_key(rules: &[Rule], path: &str, key_fields: &[String]) -> bool {
    let mut wanted = key_fields.to_vec();
    wanted.sort();
    rules.iter().any(|r| match &r.kind {
        RuleKind::ListItemKey { key_fields } if r.path == path => {
            let mut declared = key_fields.clone();
            declared.sort();
            declared == wanted
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Operation;
    use serde_json::json;

    fn driver_schema() -> Schema {
        Schema::object([(
            "spec",
            Schema::object([(
                "drivers",
                Schema::list(Schema::object([
                    ("name", Schema::string()),
                    ("nodeID", Schema::string()),
                ])),
            )]),
        )])
    }

    fn declaration(rules: Vec<Rule>) -> ResourceDeclaration {
        ResourceDeclaration {
            group: "storage.k8s.io".into(),
            resource: "csinodes".into(),
            kind: "CSINode".into(),
            versions: vec!["v1beta1".into(), "v1".into()],
            schema: driver_schema(),
            rules,
        }
    }

    fn build(rules: Vec<Rule>) -> Result<Registry, RegistryError> {
        Registry::builder().register(declaration(rules)).build()
    }

    #[test]
    fn builds_valid_declaration() {
        let registry = build(vec![
            Rule::required("spec.drivers[*].name"),
            Rule::list_item_key("spec.drivers", ["name"]),
            Rule::forbidden_on_update("spec.drivers", ["name", "nodeID"], ["name"]),
        ])
        .unwrap();
        let ctx = VersionContext::new("storage.k8s.io", "v1", "csinodes");
        let rules = registry.resolve(&ctx).unwrap();
        assert_eq!(rules.kind(), "CSINode");
        assert_eq!(rules.rules().len(), 3);
    }

    #[test]
    fn lookup_misses() {
        let registry = build(vec![]).unwrap();
        let ctx = VersionContext::new("storage.k8s.io", "v2", "csinodes");
        assert!(matches!(
            registry.resolve(&ctx),
            Err(RegistryError::UnknownVersion { .. })
        ));
        let other = VersionContext::new("node.k8s.io", "v1", "runtimeclasses");
        assert!(matches!(
            registry.resolve(&other),
            Err(RegistryError::UnknownResource(_))
        ));
    }

    #[test]
    fn rejects_unknown_field() {
        let err = build(vec![Rule::required("spec.drivers[*].nodeId")]).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownField { .. }));
        assert_eq!(
            err.to_string(),
            "storage.k8s.io/csinodes: rule path \"spec.drivers[*].nodeId\" does not exist in the schema"
        );
    }

    #[test]
    fn rejects_bad_template() {
        let err = build(vec![Rule::required("spec.drivers[0].name")]).unwrap_err();
        assert!(matches!(err, RegistryError::Template { .. }));
    }

    #[test]
    fn rejects_unknown_format() {
        let err = build(vec![Rule::format("spec.drivers[*].name", "k8s-tiny-name")]).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownFormat { .. }));
    }

    #[test]
    fn rejects_unserved_version() {
        let err = build(vec![Rule::required("spec").for_versions(["v2"])]).unwrap_err();
        assert!(matches!(err, RegistryError::UnservedVersion { .. }));
    }

    #[test]
    fn rejects_empty_scopes() {
        let err = build(vec![Rule::required("spec").for_versions(Vec::<String>::new())]).unwrap_err();
        assert!(matches!(err, RegistryError::EmptyScope { scope: "versions", .. }));
        let err = build(vec![Rule::required("spec").on([])]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "storage.k8s.io/csinodes: rule at \"spec\" declares an empty operations list"
        );
    }

    #[test]
    fn list_rules_need_a_list() {
        let err = build(vec![Rule::list_item_key("spec", ["name"])]).unwrap_err();
        assert!(matches!(err, RegistryError::NotAList { .. }));
        let err = build(vec![Rule::list_item_key("spec.drivers", ["driver"])]).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownItemField { .. }));
        let err = build(vec![Rule::list_item_key("spec.drivers", Vec::<String>::new())]).unwrap_err();
        assert!(matches!(err, RegistryError::NoFields { .. }));
    }

    #[test]
    fn keyed_forbidden_on_update_requires_list_key() {
        let err = build(vec![Rule::forbidden_on_update(
            "spec.drivers",
            ["nodeID"],
            ["name"],
        )])
        .unwrap_err();
        assert!(matches!(err, RegistryError::MissingListKey { .. }));

        // Positional matching needs no key rule.
        build(vec![Rule::forbidden_on_update(
            "spec.drivers",
            ["nodeID"],
            Vec::<String>::new(),
        )])
        .unwrap();
    }

    #[test]
    fn rejects_duplicates_and_versionless() {
        let err = Registry::builder()
            .register(declaration(vec![]))
            .register(declaration(vec![]))
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateResource(_)));

        let mut decl = declaration(vec![]);
        decl.versions.clear();
        let err = Registry::builder().register(decl).build().unwrap_err();
        assert!(matches!(err, RegistryError::NoVersions(_)));
    }

    #[test]
    #[cfg(feature = "cel_rules")]
    fn rejects_bad_cel() {
        let err = build(vec![Rule::cel("spec", "self.drivers.size() >")]).unwrap_err();
        assert!(matches!(err, RegistryError::Cel { .. }));
    }

    #[test]
    fn origin_resolved_at_compile_time() {
        let registry = build(vec![
            Rule::format("spec.drivers[*].name", "k8s-long-name"),
            Rule::immutable("spec").on([Operation::Update]).with_origin("spec-immutable"),
        ])
        .unwrap();
        let ctx = VersionContext::new("storage.k8s.io", "v1", "csinodes");
        let rules = registry.resolve(&ctx).unwrap().rules();
        assert_eq!(rules[0].origin(), Some("format=k8s-long-name"));
        assert_eq!(rules[1].origin(), Some("spec-immutable"));
    }

    #[test]
    fn from_json_config() {
        let config = json!([{
            "group": "storage.k8s.io",
            "resource": "csinodes",
            "kind": "CSINode",
            "versions": ["v1"],
            "schema": {
                "type": "object",
                "properties": {
                    "spec": {
                        "type": "object",
                        "properties": {
                            "drivers": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {"name": {"type": "string"}}
                                }
                            }
                        }
                    }
                }
            },
            "rules": [
                {"path": "spec.drivers[*].name", "rule": "required"},
                {"path": "spec.drivers", "rule": "listItemKey", "keyFields": ["name"]}
            ]
        }]);
        let registry = Registry::from_json(&config.to_string()).unwrap();
        assert_eq!(registry.len(), 1);

        let err = Registry::from_json("{not json").unwrap_err();
        assert!(matches!(err, RegistryError::Config(_)));
    }
}
