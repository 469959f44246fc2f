//! Rule evaluators.
//!
//! [`evaluate`] runs one compiled rule against a new object and, for updates,
//! its stored predecessor. Evaluators are independent: each reports every
//! violation it finds and never depends on another rule having passed.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::context::{Operation, VersionContext};
use crate::errors::{ErrorList, FieldError};
use crate::formats::NamedFormat;
use crate::listmap::{self, KeyedList};
use crate::path::{Path, PathTemplate, Resolved};
use crate::registry::{Check, CompiledRule};

const ADDITION_DETAIL: &str = "may not add items on update";

/// Evaluate `rule` for the operation in `ctx`.
///
/// Update-only checks are no-ops unless `ctx` is an update and `old` is given.
pub fn evaluate(
    rule: &CompiledRule,
    ctx: &VersionContext,
    new: &Value,
    old: Option<&Value>,
) -> ErrorList {
    let template = rule.template();
    let old = old.filter(|_| ctx.operation == Operation::Update);
    let errs: ErrorList = match &rule.check {
        Check::Required => required(template, new),
        Check::Format(format) => format_errors(template, *format, new),
        Check::MaxLength(max) => max_length(template, *max, new),
        Check::ListItemKey { key_fields } => duplicate_keys(template, key_fields, new),
        Check::Immutable => match old {
            Some(old) => immutable(template, new, old),
            None => ErrorList::new(),
        },
        Check::ForbiddenOnUpdate {
            fields,
            key_fields,
            detail,
            forbid_additions,
        } => match old {
            Some(old) => {
                let policy = ItemPolicy {
                    fields,
                    key_fields,
                    detail,
                    forbid_additions: *forbid_additions,
                };
                forbidden_on_update(template, &policy, new, old)
            }
            None => ErrorList::new(),
        },
        #[cfg(feature = "cel_rules")]
        Check::Cel(cel) => {
            let old_values = old.map(|o| values_by_path(template, o)).unwrap_or_default();
            template
                .resolve(new)
                .into_iter()
                .filter_map(|r| {
                    let value = r.value.filter(|v| !v.is_null())?;
                    let old_value = old_values.get(&r.path).copied().flatten();
                    cel.evaluate(&r.path, value, old_value)
                })
                .collect()
        }
    };

    match rule.origin() {
        Some(origin) => errs.with_origin(origin),
        None => errs,
    }
}

/// Whether `value` is the zero value of its JSON type.
pub fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

fn required(template: &PathTemplate, new: &Value) -> ErrorList {
    template
        .resolve(new)
        .into_iter()
        .filter(|r| r.value.is_none_or(is_zero))
        .map(|r| FieldError::required(r.path, ""))
        .collect()
}

/// Non-empty strings only; absence is the business of `required`.
fn present_strings<'a>(template: &PathTemplate, new: &'a Value) -> Vec<(Path, &'a str)> {
    template
        .resolve(new)
        .into_iter()
        .filter_map(|r| match r.value {
            Some(Value::String(s)) if !s.is_empty() => Some((r.path, s.as_str())),
            _ => None,
        })
        .collect()
}

fn format_errors(template: &PathTemplate, format: NamedFormat, new: &Value) -> ErrorList {
    present_strings(template, new)
        .into_iter()
        .flat_map(|(path, s)| {
            format
                .validate(s)
                .into_iter()
                .map(move |msg| FieldError::invalid(path.clone(), s, msg))
        })
        .collect()
}

fn max_length(template: &PathTemplate, max: usize, new: &Value) -> ErrorList {
    present_strings(template, new)
        .into_iter()
        .filter(|(_, s)| s.len() > max)
        .map(|(path, _)| FieldError::too_long(path, max))
        .collect()
}

fn duplicate_keys(template: &PathTemplate, key_fields: &[String], new: &Value) -> ErrorList {
    let mut errs = ErrorList::new();
    for list in template.resolve(new) {
        let Some(items) = list.value.and_then(Value::as_array) else {
            continue;
        };
        let Err(duplicates) = listmap::index_by_key(items, key_fields) else {
            continue;
        };
        for dup in duplicates {
            let item_path = list.path.index(dup.index);
            let path = match key_fields {
                [single] => item_path.child(single.as_str()),
                _ => item_path,
            };
            errs.push(FieldError::invalid(
                path,
                dup.key.value(),
                format!("duplicate entries for key {}", dup.key),
            ));
        }
    }
    errs
}

fn values_by_path<'a>(template: &PathTemplate, obj: &'a Value) -> HashMap<Path, Option<&'a Value>> {
    template
        .resolve(obj)
        .into_iter()
        .map(|Resolved { path, value }| (path, value))
        .collect()
}

/// Absent and explicit null compare equal.
fn same(a: Option<&Value>, b: Option<&Value>) -> bool {
    a.filter(|v| !v.is_null()) == b.filter(|v| !v.is_null())
}

fn immutable(template: &PathTemplate, new: &Value, old: &Value) -> ErrorList {
    let mut errs = ErrorList::new();
    let old_resolved = template.resolve(old);
    let old_values: HashMap<&Path, Option<&Value>> =
        old_resolved.iter().map(|r| (&r.path, r.value)).collect();
    let mut seen = HashSet::new();

    for r in template.resolve(new) {
        let before = old_values.get(&r.path).copied().flatten();
        if !same(before, r.value) {
            let after = r.value.cloned().unwrap_or(Value::Null);
            errs.push(FieldError::invalid(r.path.clone(), after, "field is immutable"));
        }
        seen.insert(r.path);
    }
    // Locations that disappeared together with their parent.
    for r in &old_resolved {
        if !seen.contains(&r.path) && !same(r.value, None) {
            errs.push(FieldError::invalid(r.path.clone(), Value::Null, "field is immutable"));
        }
    }
    errs
}

struct ItemPolicy<'a> {
    fields: &'a [String],
    key_fields: &'a [String],
    detail: &'a str,
    forbid_additions: bool,
}

/// New/old index pairs of a keyed list plus the indices of added items.
#[derive(Debug, Default, PartialEq)]
struct ItemMatch {
    pairs: Vec<(usize, usize)>,
    added: Vec<usize>,
}

/// Pair new items with old ones: first by key, then an unmatched new item is
/// paired with the unmatched old item at the same position, which treats an
/// in-place key change as an update of that item. Whatever remains is added.
fn match_items(new_items: &[Value], old_items: &[Value], key_fields: &[String]) -> ItemMatch {
    let mut old_for_new: Vec<Option<usize>> = vec![None; new_items.len()];
    let mut old_taken = vec![false; old_items.len()];

    if !key_fields.is_empty()
        && let (Ok(new_keyed), Ok(old_keyed)) = (
            listmap::index_by_key(new_items, key_fields),
            listmap::index_by_key(old_items, key_fields),
        )
    {
        pair_by_key(&new_keyed, &old_keyed, &mut old_for_new, &mut old_taken);
    }

    let mut result = ItemMatch::default();
    for (ni, slot) in old_for_new.iter_mut().enumerate() {
        if slot.is_none() && ni < old_items.len() && !old_taken[ni] {
            *slot = Some(ni);
            old_taken[ni] = true;
        }
        match slot {
            Some(oi) => result.pairs.push((ni, *oi)),
            None => result.added.push(ni),
        }
    }
    result
}

fn pair_by_key(
    new_keyed: &KeyedList<'_>,
    old_keyed: &KeyedList<'_>,
    old_for_new: &mut [Option<usize>],
    old_taken: &mut [bool],
) {
    for (ni, slot) in old_for_new.iter_mut().enumerate() {
        if let Some(key) = new_keyed.key_at(ni)
            && let Some((oi, _)) = old_keyed.get(key)
        {
            *slot = Some(oi);
            old_taken[oi] = true;
        }
    }
}

fn forbidden_on_update(
    template: &PathTemplate,
    policy: &ItemPolicy<'_>,
    new: &Value,
    old: &Value,
) -> ErrorList {
    let mut errs = ErrorList::new();
    let old_lists = values_by_path(template, old);

    for list in template.resolve(new) {
        let Some(new_items) = list.value.and_then(Value::as_array) else {
            continue;
        };
        let old_items = old_lists
            .get(&list.path)
            .copied()
            .flatten()
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let matched = match_items(new_items, old_items, policy.key_fields);
        for (ni, oi) in matched.pairs {
            for field in policy.fields {
                let after = new_items[ni].get(field);
                let before = old_items[oi].get(field);
                if !same(before, after) {
                    errs.push(FieldError::forbidden(
                        list.path.index(ni).child(field.as_str()),
                        policy.detail.replace("{field}", field),
                    ));
                }
            }
        }
        if policy.forbid_additions {
            for ni in matched.added {
                errs.push(FieldError::forbidden(list.path.index(ni), ADDITION_DETAIL));
            }
        }
    }
    errs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorType;
    use crate::registry::{Registry, ResourceDeclaration};
    use crate::rules::Rule;
    use crate::schema::Schema;
    use serde_json::json;

    fn registry(rules: Vec<Rule>) -> Registry {
        let schema = Schema::object([
            ("handler", Schema::string()),
            ("count", Schema::integer()),
            (
                "spec",
                Schema::object([
                    (
                        "drivers",
                        Schema::list(Schema::object([
                            ("name", Schema::string()),
                            ("nodeID", Schema::string()),
                        ])),
                    ),
                    ("attacher", Schema::string()),
                ]),
            ),
        ]);
        Registry::builder()
            .register(ResourceDeclaration {
                group: "test.k8s.io".into(),
                resource: "widgets".into(),
                kind: "Widget".into(),
                versions: vec!["v1".into()],
                schema,
                rules,
            })
            .build()
            .unwrap()
    }

    fn run(rule: Rule, new: Value, old: Option<Value>) -> ErrorList {
        let registry = registry(vec![
            rule,
            Rule::list_item_key("spec.drivers", ["name"]),
        ]);
        let ctx = VersionContext::new("test.k8s.io", "v1", "widgets");
        let ctx = match old {
            Some(_) => ctx.with_operation(Operation::Update),
            None => ctx,
        };
        let resource = registry.resolve(&ctx).unwrap();
        evaluate(&resource.rules()[0], &ctx, &new, old.as_ref())
    }

    fn paths(errs: &ErrorList) -> Vec<String> {
        errs.iter().map(|e| e.field.to_string()).collect()
    }

    #[test]
    fn zero_values() {
        for zero in [json!(null), json!(""), json!(false), json!(0), json!(0.0), json!([]), json!({})] {
            assert!(is_zero(&zero), "{zero} should be zero");
        }
        for set in [json!("x"), json!(true), json!(1), json!([0]), json!({"a": null})] {
            assert!(!is_zero(&set), "{set} should not be zero");
        }
    }

    #[test]
    fn required_reports_absent_and_empty() {
        let errs = run(Rule::required("spec.attacher"), json!({"spec": {}}), None);
        assert_eq!(paths(&errs), ["spec.attacher"]);
        assert_eq!(errs.as_slice()[0].error_type, ErrorType::Required);
        assert_eq!(errs.as_slice()[0].origin, None);

        let errs = run(Rule::required("spec.attacher"), json!({"spec": {"attacher": ""}}), None);
        assert_eq!(errs.len(), 1);

        let errs = run(Rule::required("spec.attacher"), json!({"spec": {"attacher": "x"}}), None);
        assert!(errs.is_empty());
    }

    #[test]
    fn required_per_list_item() {
        let obj = json!({"spec": {"drivers": [
            {"name": "a", "nodeID": "n"},
            {"name": "b", "nodeID": ""}
        ]}});
        let errs = run(Rule::required("spec.drivers[*].nodeID"), obj, None);
        assert_eq!(paths(&errs), ["spec.drivers[1].nodeID"]);
    }

    #[test]
    fn format_reports_each_message_with_origin() {
        let errs = run(Rule::format("handler", "k8s-short-name"), json!({"handler": "asads$asdas"}), None);
        assert_eq!(errs.len(), 1);
        let err = &errs.as_slice()[0];
        assert_eq!(err.error_type, ErrorType::Invalid);
        assert_eq!(err.origin.as_deref(), Some("format=k8s-short-name"));
        assert_eq!(err.bad_value, Some(json!("asads$asdas")));
    }

    #[test]
    fn format_skips_absent_and_empty() {
        assert!(run(Rule::format("handler", "k8s-short-name"), json!({}), None).is_empty());
        assert!(run(Rule::format("handler", "k8s-short-name"), json!({"handler": ""}), None).is_empty());
    }

    #[test]
    fn max_length_reports_too_long() {
        let errs = run(Rule::max_length("handler", 3), json!({"handler": "abcd"}), None);
        assert_eq!(errs.as_slice()[0].error_type, ErrorType::TooLong);
        assert_eq!(errs.as_slice()[0].origin.as_deref(), Some("maxLength"));
        assert!(run(Rule::max_length("handler", 4), json!({"handler": "abcd"}), None).is_empty());
    }

    #[test]
    fn immutable_only_on_change() {
        let rule = || Rule::immutable("handler");
        assert!(run(rule(), json!({"handler": "runc"}), None).is_empty());
        assert!(run(rule(), json!({"handler": "runc"}), Some(json!({"handler": "runc"}))).is_empty());

        let errs = run(rule(), json!({"handler": "gvisor"}), Some(json!({"handler": "runc"})));
        assert_eq!(errs.len(), 1);
        let err = &errs.as_slice()[0];
        assert_eq!(err.detail, "field is immutable");
        assert_eq!(err.origin.as_deref(), Some("immutable"));
        assert_eq!(err.bad_value, Some(json!("gvisor")));
    }

    #[test]
    fn immutable_detects_set_and_clear() {
        let errs = run(Rule::immutable("handler"), json!({}), Some(json!({"handler": "runc"})));
        assert_eq!(errs.as_slice()[0].bad_value, Some(Value::Null));
        let errs = run(Rule::immutable("handler"), json!({"handler": "runc"}), Some(json!({})));
        assert_eq!(errs.len(), 1);
        let errs = run(Rule::immutable("spec.attacher"), json!({}), Some(json!({"spec": {"attacher": "a"}})));
        assert_eq!(paths(&errs), ["spec.attacher"]);
    }

    #[test]
    fn immutable_nested_object() {
        let old = json!({"spec": {"attacher": "a"}});
        let new = json!({"spec": {"attacher": "b"}});
        let errs = run(Rule::immutable("spec"), new.clone(), Some(old));
        assert_eq!(errs.as_slice()[0].bad_value, Some(json!({"attacher": "b"})));
    }

    fn drivers(list: Value) -> Value {
        json!({"spec": {"drivers": list}})
    }

    fn forbid() -> Rule {
        Rule::forbidden_on_update("spec.drivers", ["name", "nodeID"], ["name"])
            .with_message("updates to driver {field} are forbidden")
    }

    #[test]
    fn forbidden_key_match_reports_changed_field() {
        let old = drivers(json!([{"name": "d1", "nodeID": "node-1"}]));
        let new = drivers(json!([{"name": "d1", "nodeID": "node-2"}]));
        let errs = run(forbid(), new, Some(old));
        assert_eq!(paths(&errs), ["spec.drivers[0].nodeID"]);
        assert_eq!(errs.as_slice()[0].error_type, ErrorType::Forbidden);
        assert_eq!(errs.as_slice()[0].detail, "updates to driver nodeID are forbidden");
    }

    #[test]
    fn forbidden_in_place_key_change() {
        let old = drivers(json!([{"name": "d1", "nodeID": "node-1"}]));
        let new = drivers(json!([{"name": "other", "nodeID": "node-1"}]));
        let errs = run(forbid(), new, Some(old));
        assert_eq!(paths(&errs), ["spec.drivers[0].name"]);
        assert_eq!(errs.as_slice()[0].detail, "updates to driver name are forbidden");
    }

    #[test]
    fn forbidden_matches_reordered_items_by_key() {
        let old = drivers(json!([{"name": "a", "nodeID": "1"}, {"name": "b", "nodeID": "2"}]));
        let new = drivers(json!([{"name": "b", "nodeID": "2"}, {"name": "a", "nodeID": "9"}]));
        let errs = run(forbid(), new, Some(old));
        assert_eq!(paths(&errs), ["spec.drivers[1].nodeID"]);
    }

    #[test]
    fn forbidden_allows_additions_by_default() {
        let old = drivers(json!([{"name": "a", "nodeID": "1"}]));
        let new = drivers(json!([{"name": "a", "nodeID": "1"}, {"name": "b", "nodeID": "2"}]));
        assert!(run(forbid(), new.clone(), Some(old.clone())).is_empty());

        let errs = run(forbid().forbidding_additions(), new, Some(old));
        assert_eq!(paths(&errs), ["spec.drivers[1]"]);
        assert_eq!(errs.as_slice()[0].detail, ADDITION_DETAIL);
    }

    #[test]
    fn forbidden_ignores_removals_and_create() {
        let old = drivers(json!([{"name": "a", "nodeID": "1"}, {"name": "b", "nodeID": "2"}]));
        let new = drivers(json!([{"name": "b", "nodeID": "2"}]));
        assert!(run(forbid(), new.clone(), Some(old)).is_empty());
        assert!(run(forbid(), new, None).is_empty());
    }

    #[test]
    fn forbidden_default_detail() {
        let rule = Rule::forbidden_on_update("spec.drivers", ["nodeID"], Vec::<String>::new());
        let old = drivers(json!([{"name": "a", "nodeID": "1"}]));
        let new = drivers(json!([{"name": "a", "nodeID": "2"}]));
        let errs = run(rule, new, Some(old));
        assert_eq!(errs.as_slice()[0].detail, "updates to nodeID are forbidden");
    }

    #[test]
    fn duplicate_keys_reported_as_invalid() {
        let obj = drivers(json!([
            {"name": "a", "nodeID": "1"},
            {"name": "a", "nodeID": "2"}
        ]));
        let errs = run(Rule::list_item_key("spec.drivers", ["name"]), obj, None);
        assert_eq!(paths(&errs), ["spec.drivers[1].name"]);
        let err = &errs.as_slice()[0];
        assert_eq!(err.error_type, ErrorType::Invalid);
        assert_eq!(err.bad_value, Some(json!("a")));
        assert_eq!(err.detail, "duplicate entries for key [name=\"a\"]");
    }

    #[test]
    fn duplicates_fall_back_to_positional_matching() {
        let old = drivers(json!([{"name": "a", "nodeID": "1"}, {"name": "a", "nodeID": "2"}]));
        let new = drivers(json!([{"name": "a", "nodeID": "1"}, {"name": "a", "nodeID": "3"}]));
        let errs = run(forbid(), new, Some(old));
        assert_eq!(paths(&errs), ["spec.drivers[1].nodeID"]);
    }

    #[test]
    fn match_items_pairs() {
        let keys = vec!["name".to_string()];
        let old = [json!({"name": "a"}), json!({"name": "b"})];
        let new = [json!({"name": "b"}), json!({"name": "c"}), json!({"name": "d"})];
        let m = match_items(&new, &old, &keys);
        // old[1] is taken by "b", so "c" has no positional partner.
        assert_eq!(m.pairs, vec![(0, 1)]);
        assert_eq!(m.added, vec![1, 2]);
    }

    #[test]
    #[cfg(feature = "cel_rules")]
    fn cel_rule_on_present_value() {
        let rule = Rule::cel("spec", "has(self.attacher)")
            .with_reason("FieldValueRequired")
            .with_message("attacher must be set");
        let errs = run(rule.clone(), json!({"spec": {"drivers": []}}), None);
        assert_eq!(errs.as_slice()[0].error_type, ErrorType::Required);
        assert_eq!(errs.as_slice()[0].detail, "attacher must be set");
        assert!(run(rule, json!({}), None).is_empty());
    }

    #[test]
    #[cfg(feature = "cel_rules")]
    fn cel_transition_rule_sees_old_value() {
        let rule = Rule::cel("count", "self >= oldSelf").with_message("may not decrease");
        assert!(run(rule.clone(), json!({"count": 1}), None).is_empty());
        let errs = run(rule, json!({"count": 1}), Some(json!({"count": 2})));
        assert_eq!(paths(&errs), ["count"]);
    }
}
