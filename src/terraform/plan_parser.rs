//! Extract drifted resources from `terraform show -json` output.

use crate::terraform::model::{truncate_snippet, ChangeAction, ResourceChange, MAX_DIFF_SNIPPET_CHARS};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Structured plan is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Resource change entry has an empty address")]
    EmptyAddress,

    #[error("Resource change '{address}' has no change block")]
    MissingChange { address: String },

    #[error("Resource change '{address}' has unsupported actions {actions:?}")]
    UnsupportedActions {
        address: String,
        actions: Vec<String>,
    },
}

impl From<serde_json::Error> for ParseError {
    fn from(error: serde_json::Error) -> Self {
        ParseError::InvalidJson(error.to_string())
    }
}

/// Terraform plan JSON output structure
#[derive(Debug, Deserialize)]
struct TerraformPlanJson {
    #[allow(dead_code)]
    format_version: Option<String>,
    #[allow(dead_code)]
    terraform_version: Option<String>,
    resource_changes: Option<Vec<PlanResourceChange>>,
}

#[derive(Debug, Deserialize)]
struct PlanResourceChange {
    address: String,
    module_address: Option<String>,
    mode: Option<String>,
    #[serde(rename = "type")]
    resource_type: String,
    name: Option<String>,
    change: Option<PlanChange>,
}

#[derive(Debug, Deserialize)]
struct PlanChange {
    actions: Vec<String>,
    before: Option<Value>,
    after: Option<Value>,
    after_unknown: Option<Value>,
    before_sensitive: Option<Value>,
    after_sensitive: Option<Value>,
}

/// Parse a structured plan into the ordered list of drifted resources.
///
/// Entries whose actions are exactly `no-op` (or `read`, for data sources)
/// are dropped. `[delete, create]` in either order becomes `Replace`.
pub fn parse(structured_plan: &str) -> Result<Vec<ResourceChange>, ParseError> {
    let plan: TerraformPlanJson = serde_json::from_str(structured_plan)?;
    let mut changes = Vec::new();

    for entry in plan.resource_changes.unwrap_or_default() {
        if entry.address.trim().is_empty() {
            return Err(ParseError::EmptyAddress);
        }
        if entry.mode.as_deref() == Some("data") {
            continue;
        }

        let change = entry.change.ok_or_else(|| ParseError::MissingChange {
            address: entry.address.clone(),
        })?;

        let action = match normalize_actions(&change.actions) {
            Ok(Some(action)) => action,
            Ok(None) => continue,
            Err(()) => {
                return Err(ParseError::UnsupportedActions {
                    address: entry.address,
                    actions: change.actions,
                })
            }
        };

        let diff_snippet = truncate_snippet(&change_summary(&change, action), MAX_DIFF_SNIPPET_CHARS);
        let resource_id = change
            .before
            .as_ref()
            .and_then(extract_resource_id)
            .or_else(|| change.after.as_ref().and_then(extract_resource_id));
        let resource_name = entry
            .name
            .unwrap_or_else(|| name_from_address(&entry.address).to_string());

        changes.push(ResourceChange {
            address: entry.address,
            resource_type: entry.resource_type,
            resource_name,
            module_address: entry.module_address,
            action,
            before: change.before.filter(|v| !v.is_null()),
            after: change.after.filter(|v| !v.is_null()),
            resource_id,
            diff_snippet,
        });
    }

    Ok(changes)
}

/// Collapse a Terraform action list into a single action. `Ok(None)` means
/// the entry is not a change.
fn normalize_actions(actions: &[String]) -> Result<Option<ChangeAction>, ()> {
    let actions: Vec<&str> = actions.iter().map(String::as_str).collect();
    match actions.as_slice() {
        [] | ["no-op"] | ["read"] => Ok(None),
        ["create"] => Ok(Some(ChangeAction::Create)),
        ["update"] => Ok(Some(ChangeAction::Update)),
        ["delete"] => Ok(Some(ChangeAction::Delete)),
        ["delete", "create"] | ["create", "delete"] => Ok(Some(ChangeAction::Replace)),
        _ => Err(()),
    }
}

/// Human-readable per-attribute change list
fn change_summary(change: &PlanChange, action: ChangeAction) -> String {
    let fallback = format!("Action: {}", action.label());

    let (Some(Value::Object(before)), Some(Value::Object(after))) = (&change.before, &change.after)
    else {
        return fallback;
    };

    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    let mut lines = Vec::new();

    for key in keys {
        let old = before.get(key.as_str());
        let new = after.get(key.as_str());
        let unknown = change
            .after_unknown
            .as_ref()
            .and_then(|u| u.get(key.as_str()))
            .is_some_and(is_flagged);
        let sensitive = [change.before_sensitive.as_ref(), change.after_sensitive.as_ref()]
            .into_iter()
            .flatten()
            .any(|flags| flags.get(key.as_str()).is_some_and(is_flagged));

        if unknown {
            lines.push(format!("{}: {} → (known after apply)", key, render_value(old)));
        } else if old != new {
            if sensitive {
                lines.push(format!("{}: (sensitive value)", key));
            } else {
                lines.push(format!("{}: {} → {}", key, render_value(old), render_value(new)));
            }
        }
    }

    if lines.is_empty() {
        fallback
    } else {
        lines.join("\n")
    }
}

/// Sensitivity and unknown markers are `true`, or nested structures
/// containing `true` somewhere.
fn is_flagged(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Array(items) => items.iter().any(is_flagged),
        Value::Object(map) => map.values().any(is_flagged),
        _ => false,
    }
}

fn render_value(value: Option<&Value>) -> String {
    match value {
        None => "[not set]".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) => "null".to_string(),
        Some(other) => other.to_string(),
    }
}

fn extract_resource_id(attributes: &Value) -> Option<String> {
    ["id", "arn"].iter().find_map(|key| {
        attributes
            .get(*key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// `module.net.aws_vpc.main[0]` -> `main[0]`
fn name_from_address(address: &str) -> &str {
    address.rsplit('.').next().unwrap_or(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn plan(entries: Value) -> String {
        json!({
            "format_version": "1.2",
            "terraform_version": "1.7.5",
            "resource_changes": entries
        })
        .to_string()
    }

    #[test]
    fn test_normalize_actions() {
        let s = |v: &[&str]| v.iter().map(|a| a.to_string()).collect::<Vec<_>>();
        assert_eq!(normalize_actions(&s(&["no-op"])), Ok(None));
        assert_eq!(normalize_actions(&s(&["read"])), Ok(None));
        assert_eq!(
            normalize_actions(&s(&["create"])),
            Ok(Some(ChangeAction::Create))
        );
        assert_eq!(
            normalize_actions(&s(&["delete", "create"])),
            Ok(Some(ChangeAction::Replace))
        );
        assert_eq!(
            normalize_actions(&s(&["create", "delete"])),
            Ok(Some(ChangeAction::Replace))
        );
        assert!(normalize_actions(&s(&["update", "delete"])).is_err());
    }

    #[test]
    fn test_no_op_entries_are_filtered() {
        let doc = plan(json!([
            {"address": "aws_vpc.main", "type": "aws_vpc", "name": "main",
             "change": {"actions": ["no-op"], "before": {"id": "vpc-1"}, "after": {"id": "vpc-1"}}},
            {"address": "aws_subnet.a", "type": "aws_subnet", "name": "a",
             "change": {"actions": ["no-op"], "before": {}, "after": {}}}
        ]));
        assert!(parse(&doc).unwrap().is_empty());
    }

    #[test]
    fn test_missing_resource_changes_is_empty() {
        assert!(parse(r#"{"format_version": "1.2"}"#).unwrap().is_empty());
    }

    #[test]
    fn test_update_with_diff() {
        let doc = plan(json!([
            {"address": "aws_instance.web", "type": "aws_instance", "name": "web",
             "change": {
                "actions": ["update"],
                "before": {"id": "i-0abc", "instance_type": "t3.micro", "tags": {"Env": "dev"}},
                "after": {"id": "i-0abc", "instance_type": "t3.large", "tags": {"Env": "dev"}}
             }}
        ]));
        let changes = parse(&doc).unwrap();
        assert_eq!(changes.len(), 1);
        let change = &changes[0];
        assert_eq!(change.address, "aws_instance.web");
        assert_eq!(change.resource_type, "aws_instance");
        assert_eq!(change.resource_name, "web");
        assert_eq!(change.action, ChangeAction::Update);
        assert_eq!(change.resource_id.as_deref(), Some("i-0abc"));
        assert_eq!(change.diff_snippet, "instance_type: t3.micro → t3.large");
    }

    #[test]
    fn test_replace_is_normalized() {
        let doc = plan(json!([
            {"address": "module.net.aws_route_table.private[0]", "module_address": "module.net",
             "type": "aws_route_table", "name": "private", "index": 0,
             "change": {"actions": ["delete", "create"], "before": {"id": "rtb-1"}, "after": null}}
        ]));
        let changes = parse(&doc).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::Replace);
        assert_eq!(changes[0].module_address.as_deref(), Some("module.net"));
        assert_eq!(changes[0].diff_snippet, "Action: replace");
        assert_eq!(changes[0].after, None);
    }

    #[test]
    fn test_create_and_delete_use_action_summary() {
        let doc = plan(json!([
            {"address": "aws_eip.nat", "type": "aws_eip", "name": "nat",
             "change": {"actions": ["create"], "before": null, "after": {"domain": "vpc"},
                        "after_unknown": {"id": true}}},
            {"address": "aws_security_group.old", "type": "aws_security_group", "name": "old",
             "change": {"actions": ["delete"], "before": {"id": "sg-1"}, "after": null}}
        ]));
        let changes = parse(&doc).unwrap();
        assert_eq!(changes[0].diff_snippet, "Action: create");
        assert_eq!(changes[0].resource_id, None);
        assert_eq!(changes[1].diff_snippet, "Action: delete");
        assert_eq!(changes[1].resource_id.as_deref(), Some("sg-1"));
    }

    #[test]
    fn test_sensitive_and_unknown_values_are_masked() {
        let doc = plan(json!([
            {"address": "aws_db_instance.main", "type": "aws_db_instance", "name": "main",
             "change": {
                "actions": ["update"],
                "before": {"id": "db-1", "password": "old-secret", "endpoint": "db.local"},
                "after": {"id": "db-1", "password": "new-secret", "endpoint": null},
                "after_unknown": {"endpoint": true},
                "before_sensitive": {"password": true},
                "after_sensitive": {"password": true}
             }}
        ]));
        let changes = parse(&doc).unwrap();
        let snippet = &changes[0].diff_snippet;
        assert!(snippet.contains("endpoint: db.local → (known after apply)"));
        assert!(snippet.contains("password: (sensitive value)"));
        assert!(!snippet.contains("secret"));
    }

    #[test]
    fn test_long_diff_is_truncated() {
        let before: serde_json::Map<String, Value> = (0..100)
            .map(|i| (format!("attribute_{:03}", i), json!("before-value")))
            .collect();
        let after: serde_json::Map<String, Value> = (0..100)
            .map(|i| (format!("attribute_{:03}", i), json!("after-value")))
            .collect();
        let doc = plan(json!([
            {"address": "aws_launch_template.app", "type": "aws_launch_template", "name": "app",
             "change": {"actions": ["update"], "before": before, "after": after}}
        ]));
        let changes = parse(&doc).unwrap();
        assert_eq!(changes[0].diff_snippet.chars().count(), MAX_DIFF_SNIPPET_CHARS);
        assert!(changes[0].diff_snippet.ends_with('…'));
    }

    #[test]
    fn test_data_sources_are_skipped() {
        let doc = plan(json!([
            {"address": "data.aws_ami.ubuntu", "mode": "data", "type": "aws_ami", "name": "ubuntu",
             "change": {"actions": ["read"], "before": null, "after": {}}}
        ]));
        assert!(parse(&doc).unwrap().is_empty());
    }

    #[test]
    fn test_plan_order_is_preserved() {
        let doc = plan(json!([
            {"address": "aws_vpc.b", "type": "aws_vpc", "name": "b", "change": {"actions": ["delete"]}},
            {"address": "aws_vpc.a", "type": "aws_vpc", "name": "a", "change": {"actions": ["create"]}}
        ]));
        let addresses: Vec<_> = parse(&doc).unwrap().into_iter().map(|c| c.address).collect();
        assert_eq!(addresses, vec!["aws_vpc.b", "aws_vpc.a"]);
    }

    #[test]
    fn test_malformed_plans_fail() {
        assert!(matches!(parse("not json"), Err(ParseError::InvalidJson(_))));
        assert!(matches!(
            parse(r#"{"resource_changes": "nope"}"#),
            Err(ParseError::InvalidJson(_))
        ));
        assert_eq!(
            parse(&plan(json!([{"address": "aws_vpc.a", "type": "aws_vpc"}]))),
            Err(ParseError::MissingChange {
                address: "aws_vpc.a".to_string()
            })
        );
        assert_eq!(
            parse(&plan(json!([{"address": "", "type": "aws_vpc", "change": {"actions": ["create"]}}]))),
            Err(ParseError::EmptyAddress)
        );
        assert!(matches!(
            parse(&plan(json!([{"address": "aws_vpc.a", "type": "aws_vpc", "change": {"actions": ["forget"]}}]))),
            Err(ParseError::UnsupportedActions { .. })
        ));
    }

    #[test]
    fn test_name_from_address() {
        assert_eq!(name_from_address("module.net.aws_vpc.main"), "main");
        assert_eq!(name_from_address("aws_vpc.main[0]"), "main[0]");
    }
}
