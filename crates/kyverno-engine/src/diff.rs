//! Patch trails from document diffs
//!
//! Strategies that rewrite the whole document report what they changed as a
//! diff between the input and the output. Server-owned fields are filtered out
//! so the trail only carries what the rule actually meant to change.

use serde_json::Value;

use crate::config::PatchTrailConfig;
use crate::patch::{Operation, RawOp};

/// Diff `before` against `after` and keep the ops a patch trail should report
pub fn diff(before: &Value, after: &Value, config: &PatchTrailConfig) -> Vec<RawOp> {
    let ops: Vec<RawOp> = json_patch::diff(before, after)
        .0
        .iter()
        .filter_map(RawOp::from_patch_operation)
        .filter(|op| keep(op, config))
        .collect();
    sort_removals(ops)
}

fn keep(op: &RawOp, config: &PatchTrailConfig) -> bool {
    let Ok(tokens) = op.tokens() else {
        // whole-document replacement
        return true;
    };

    if tokens.first().map(String::as_str) == Some("status") {
        return false;
    }

    for (idx, token) in tokens.iter().enumerate() {
        match token.as_str() {
            "labels" | "annotations" => return true,
            "metadata" => {
                return match tokens.get(idx + 1) {
                    None => true,
                    Some(field) => config.kept_metadata_fields.iter().any(|k| k == field),
                }
            }
            _ => {}
        }
    }
    true
}

/// Reorder consecutive index removals on one list to highest index first
fn sort_removals(mut ops: Vec<RawOp>) -> Vec<RawOp> {
    let mut start = 0;
    while start < ops.len() {
        let Some(parent) = removal_parent(&ops[start]) else {
            start += 1;
            continue;
        };

        let mut end = start + 1;
        while end < ops.len() && removal_parent(&ops[end]).as_deref() == Some(parent.as_str()) {
            end += 1;
        }

        ops[start..end].sort_by_key(|op| std::cmp::Reverse(removal_index(op)));
        start = end;
    }
    ops
}

fn removal_parent(op: &RawOp) -> Option<String> {
    if op.op != Operation::Remove {
        return None;
    }
    let (parent, last) = op.path.rsplit_once('/')?;
    last.parse::<usize>().ok()?;
    Some(parent.to_string())
}

fn removal_index(op: &RawOp) -> usize {
    op.path
        .rsplit_once('/')
        .and_then(|(_, last)| last.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn trail(before: Value, after: Value) -> Vec<RawOp> {
        diff(&before, &after, &PatchTrailConfig::default())
    }

    #[rstest]
    #[case::root_metadata("/metadata", true)]
    #[case::name("/metadata/name", true)]
    #[case::namespace("/metadata/namespace", true)]
    #[case::labels("/metadata/labels", true)]
    #[case::annotation("/metadata/annotations/owner", true)]
    #[case::nested_name("/spec/template/metadata/name", true)]
    #[case::timestamp("/metadata/creationTimestamp", false)]
    #[case::nested_timestamp("/spec/template/metadata/creationTimestamp", false)]
    #[case::resource_version("/metadata/resourceVersion", false)]
    #[case::status("/status", false)]
    #[case::status_field("/status/phase", false)]
    #[case::label_named_status("/metadata/labels/status", true)]
    #[case::label_named_metadata("/metadata/labels/metadata", true)]
    #[case::spec("/spec", true)]
    #[case::kind("/kind", true)]
    fn test_trail_filter(#[case] path: &str, #[case] kept: bool) {
        let op = RawOp::remove(path);
        assert_eq!(keep(&op, &PatchTrailConfig::default()), kept, "{path}");
    }

    #[test]
    fn test_configured_metadata_fields() {
        let config = PatchTrailConfig {
            kept_metadata_fields: vec!["finalizers".to_string()],
        };
        assert!(keep(&RawOp::remove("/metadata/finalizers/0"), &config));
        assert!(!keep(&RawOp::remove("/metadata/labels"), &config));
    }

    #[test]
    fn test_diff_drops_server_fields() {
        let ops = trail(
            json!({"metadata": {"name": "a"}, "status": {"phase": "Pending"}}),
            json!({
                "metadata": {"name": "a", "uid": "123", "labels": {"x": "y"}},
                "status": {"phase": "Running"}
            }),
        );
        assert_eq!(ops, vec![RawOp::add("/metadata/labels", json!({"x": "y"}))]);
    }

    #[test]
    fn test_identical_documents_have_empty_trail() {
        let doc = json!({"spec": {"replicas": 2}});
        assert!(trail(doc.clone(), doc).is_empty());
    }

    #[rstest]
    #[case::single_add(vec!["+/a"], vec!["+/a"])]
    #[case::add_then_remove(vec!["+/a", "-/a"], vec!["+/a", "-/a"])]
    #[case::remove_then_add(vec!["-/a/0", "+/a/0"], vec!["-/a/0", "+/a/0"])]
    #[case::one_list(vec!["-/a/0", "-/a/1", "-/a/2"], vec!["-/a/2", "-/a/1", "-/a/0"])]
    #[case::two_lists(vec!["-/a/0", "-/b/0"], vec!["-/a/0", "-/b/0"])]
    #[case::middle_run(
        vec!["-/a/0", "-/b/0", "-/b/1", "-/c/0"],
        vec!["-/a/0", "-/b/1", "-/b/0", "-/c/0"]
    )]
    #[case::interrupted_run(
        vec!["-/a/0", "-/b/0", "+/b/c/0", "-/b/1", "-/c/0"],
        vec!["-/a/0", "-/b/0", "+/b/c/0", "-/b/1", "-/c/0"]
    )]
    fn test_sort_removals(#[case] input: Vec<&str>, #[case] expected: Vec<&str>) {
        let to_ops = |paths: Vec<&str>| -> Vec<RawOp> {
            paths
                .into_iter()
                .map(|p| match p.split_at(1) {
                    ("-", path) => RawOp::remove(path),
                    (_, path) => RawOp::add(path, json!({})),
                })
                .collect()
        };
        assert_eq!(sort_removals(to_ops(input)), to_ops(expected));
    }
}
