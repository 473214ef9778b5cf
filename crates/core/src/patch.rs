//! Partial updates: RFC 6902 JSON Patch and RFC 7396 JSON Merge Patch.
//!
//! Both dialects are pure functions over `serde_json::Value`. The input tree
//! is never modified; a patched copy is returned, so a failed JSON Patch
//! leaves nothing behind.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FhirError;
use crate::pointer::{JsonPointer, parse_index};

pub const JSON_PATCH_CONTENT_TYPE: &str = "application/json-patch+json";
pub const MERGE_PATCH_CONTENT_TYPE: &str = "application/merge-patch+json";

/// Patch document format, resolved once from the request Content-Type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchDialect {
    JsonPatch,
    MergePatch,
}

impl PatchDialect {
    /// Resolve a Content-Type header value. Media-type parameters are ignored.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type.split(';').next().unwrap_or_default().trim();
        if mime.eq_ignore_ascii_case(JSON_PATCH_CONTENT_TYPE) {
            Some(PatchDialect::JsonPatch)
        } else if mime.eq_ignore_ascii_case(MERGE_PATCH_CONTENT_TYPE) {
            Some(PatchDialect::MergePatch)
        } else {
            None
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            PatchDialect::JsonPatch => JSON_PATCH_CONTENT_TYPE,
            PatchDialect::MergePatch => MERGE_PATCH_CONTENT_TYPE,
        }
    }
}

/// A single JSON Patch operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Move { from: String, path: String },
    Copy { from: String, path: String },
    Test { path: String, value: Value },
}

/// Parse a JSON Patch document. Elements are parsed one by one so that a
/// malformed element is reported with its index.
pub fn parse_json_patch(document: &Value) -> Result<Vec<PatchOperation>, FhirError> {
    let Value::Array(items) = document else {
        return Err(FhirError::malformed_patch(
            None,
            "JSON Patch document must be an array of operations",
        ));
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            PatchOperation::deserialize(item)
                .map_err(|e| FhirError::malformed_patch(Some(index), e.to_string()))
        })
        .collect()
}

/// Apply JSON Patch operations in order. All-or-nothing.
pub fn apply_json_patch(tree: &Value, ops: &[PatchOperation]) -> Result<Value, FhirError> {
    let mut doc = tree.clone();
    for (index, op) in ops.iter().enumerate() {
        apply_operation(&mut doc, op, index)?;
    }
    Ok(doc)
}

/// Apply an RFC 7396 merge patch.
///
/// `null` deletes, objects merge recursively, everything else (arrays
/// included) replaces the target value.
pub fn apply_merge_patch(tree: &Value, patch: &Value) -> Value {
    let Value::Object(patch_map) = patch else {
        return patch.clone();
    };

    let mut result = match tree {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    for (key, patch_value) in patch_map {
        if patch_value.is_null() {
            result.remove(key);
        } else {
            let merged = apply_merge_patch(result.get(key).unwrap_or(&Value::Null), patch_value);
            result.insert(key.clone(), merged);
        }
    }

    Value::Object(result)
}

/// Single entry point for PATCH: dispatch on dialect and check the result
/// is still shaped like the input resource.
pub fn apply_patch(
    tree: &Value,
    dialect: PatchDialect,
    document: &Value,
) -> Result<Value, FhirError> {
    let patched = match dialect {
        PatchDialect::JsonPatch => {
            let ops = parse_json_patch(document)?;
            apply_json_patch(tree, &ops)?
        }
        PatchDialect::MergePatch => apply_merge_patch(tree, document),
    };

    if tree.is_object() && !patched.is_object() {
        return Err(FhirError::type_mismatch(
            None,
            "patched resource must remain a JSON object",
        ));
    }
    Ok(patched)
}

/// Structural equality as defined for the JSON Patch `test` operation:
/// numbers compare by value, object member order is irrelevant.
pub fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i == j,
            _ => match (x.as_u64(), y.as_u64()) {
                (Some(i), Some(j)) => i == j,
                _ => x.as_f64() == y.as_f64(),
            },
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| json_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| json_equal(v, w)))
        }
        _ => a == b,
    }
}

fn apply_operation(doc: &mut Value, op: &PatchOperation, index: usize) -> Result<(), FhirError> {
    match op {
        PatchOperation::Add { path, value } => {
            let path = pointer(path, index)?;
            add(doc, &path, value.clone(), index)
        }
        PatchOperation::Remove { path } => {
            let path = pointer(path, index)?;
            remove(doc, &path, index).map(drop)
        }
        PatchOperation::Replace { path, value } => {
            let path = pointer(path, index)?;
            let target = resolve_mut(doc, &path, index)?;
            *target = value.clone();
            Ok(())
        }
        PatchOperation::Move { from, path } => {
            let from = pointer(from, index)?;
            let path = pointer(path, index)?;
            if from == path {
                return resolve(doc, &from, index).map(drop);
            }
            if from.is_proper_prefix_of(&path) {
                return Err(FhirError::malformed_patch(
                    Some(index),
                    format!("cannot move {} into its own child {}", from, path),
                ));
            }
            let value = remove(doc, &from, index)?;
            add(doc, &path, value, index)
        }
        PatchOperation::Copy { from, path } => {
            let from = pointer(from, index)?;
            let path = pointer(path, index)?;
            let value = resolve(doc, &from, index)?.clone();
            add(doc, &path, value, index)
        }
        PatchOperation::Test { path, value } => {
            let path = pointer(path, index)?;
            let actual = resolve(doc, &path, index)?;
            if json_equal(actual, value) {
                Ok(())
            } else {
                Err(FhirError::TestFailed {
                    index,
                    path: path.to_string(),
                })
            }
        }
    }
}

fn pointer(raw: &str, index: usize) -> Result<JsonPointer, FhirError> {
    JsonPointer::parse(raw).map_err(|msg| FhirError::malformed_patch(Some(index), msg))
}

fn path_not_found(index: usize, path: &JsonPointer) -> FhirError {
    FhirError::PathNotFound {
        index,
        path: path.to_string(),
    }
}

fn scalar_parent(index: usize, path: &JsonPointer) -> FhirError {
    FhirError::type_mismatch(
        Some(index),
        format!("{} traverses a value that is neither object nor array", path),
    )
}

fn resolve<'a>(doc: &'a Value, path: &JsonPointer, index: usize) -> Result<&'a Value, FhirError> {
    path.tokens().iter().try_fold(doc, |target, token| match target {
        Value::Object(map) => map.get(token).ok_or_else(|| path_not_found(index, path)),
        Value::Array(items) => parse_index(token)
            .and_then(|i| items.get(i))
            .ok_or_else(|| path_not_found(index, path)),
        _ => Err(scalar_parent(index, path)),
    })
}

fn resolve_mut<'a>(
    doc: &'a mut Value,
    path: &JsonPointer,
    index: usize,
) -> Result<&'a mut Value, FhirError> {
    resolve_tokens_mut(doc, path.tokens(), path, index)
}

fn resolve_tokens_mut<'a>(
    doc: &'a mut Value,
    tokens: &[String],
    path: &JsonPointer,
    index: usize,
) -> Result<&'a mut Value, FhirError> {
    tokens.iter().try_fold(doc, |target, token| match target {
        Value::Object(map) => map.get_mut(token).ok_or_else(|| path_not_found(index, path)),
        Value::Array(items) => parse_index(token)
            .and_then(move |i| items.get_mut(i))
            .ok_or_else(|| path_not_found(index, path)),
        _ => Err(scalar_parent(index, path)),
    })
}

fn add(doc: &mut Value, path: &JsonPointer, value: Value, index: usize) -> Result<(), FhirError> {
    let Some((parent_tokens, last)) = path.split_last() else {
        *doc = value;
        return Ok(());
    };

    match resolve_tokens_mut(doc, parent_tokens, path, index)? {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            if last == "-" {
                items.push(value);
                return Ok(());
            }
            let position = parse_index(last)
                .filter(|i| *i <= items.len())
                .ok_or_else(|| path_not_found(index, path))?;
            items.insert(position, value);
            Ok(())
        }
        _ => Err(scalar_parent(index, path)),
    }
}

fn remove(doc: &mut Value, path: &JsonPointer, index: usize) -> Result<Value, FhirError> {
    let Some((parent_tokens, last)) = path.split_last() else {
        return Err(FhirError::malformed_patch(
            Some(index),
            "cannot remove the document root",
        ));
    };

    match resolve_tokens_mut(doc, parent_tokens, path, index)? {
        Value::Object(map) => map.remove(last).ok_or_else(|| path_not_found(index, path)),
        Value::Array(items) => {
            let position = parse_index(last)
                .filter(|i| *i < items.len())
                .ok_or_else(|| path_not_found(index, path))?;
            Ok(items.remove(position))
        }
        _ => Err(scalar_parent(index, path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ops(doc: Value) -> Vec<PatchOperation> {
        parse_json_patch(&doc).unwrap()
    }

    #[test]
    fn test_then_replace() {
        let tree = json!({"a": {"b": 1}});
        let patch = ops(json!([
            {"op": "test", "path": "/a/b", "value": 1},
            {"op": "replace", "path": "/a/b", "value": 2}
        ]));

        assert_eq!(apply_json_patch(&tree, &patch).unwrap(), json!({"a": {"b": 2}}));
    }

    #[test]
    fn failed_test_leaves_tree_unchanged() {
        let tree = json!({"a": {"b": 1}});
        let patch = ops(json!([
            {"op": "replace", "path": "/a/b", "value": 5},
            {"op": "test", "path": "/a/b", "value": 99},
            {"op": "replace", "path": "/a/b", "value": 2}
        ]));

        let err = apply_json_patch(&tree, &patch).unwrap_err();
        assert_eq!(
            err,
            FhirError::TestFailed {
                index: 1,
                path: "/a/b".into()
            }
        );
        assert_eq!(tree, json!({"a": {"b": 1}}));
    }

    #[test]
    fn empty_patches_are_identity() {
        let tree = json!({"resourceType": "Flag", "status": "active", "code": [1, 2]});
        assert_eq!(apply_json_patch(&tree, &[]).unwrap(), tree);
        assert_eq!(apply_merge_patch(&tree, &json!({})), tree);
    }

    #[test]
    fn add_to_objects_and_arrays() {
        let tree = json!({"list": ["a", "c"]});
        let patch = ops(json!([
            {"op": "add", "path": "/list/1", "value": "b"},
            {"op": "add", "path": "/list/-", "value": "d"},
            {"op": "add", "path": "/list/4", "value": "e"},
            {"op": "add", "path": "/name", "value": {"given": []}},
            {"op": "add", "path": "/name/given/-", "value": "Ann"}
        ]));

        assert_eq!(
            apply_json_patch(&tree, &patch).unwrap(),
            json!({"list": ["a", "b", "c", "d", "e"], "name": {"given": ["Ann"]}})
        );
    }

    #[test]
    fn add_past_end_of_array_fails() {
        let tree = json!({"list": ["a"]});
        let patch = ops(json!([{"op": "add", "path": "/list/3", "value": "x"}]));
        assert!(matches!(
            apply_json_patch(&tree, &patch),
            Err(FhirError::PathNotFound { index: 0, .. })
        ));
    }

    #[test]
    fn add_at_root_replaces_document() {
        let patch = ops(json!([{"op": "add", "path": "", "value": {"x": 1}}]));
        assert_eq!(apply_json_patch(&json!([1]), &patch).unwrap(), json!({"x": 1}));
    }

    #[test]
    fn remove_and_replace_require_existing_target() {
        let tree = json!({"a": 1, "arr": [1, 2]});

        let patch = ops(json!([{"op": "remove", "path": "/arr/0"}]));
        assert_eq!(apply_json_patch(&tree, &patch).unwrap(), json!({"a": 1, "arr": [2]}));

        let patch = ops(json!([
            {"op": "remove", "path": "/a"},
            {"op": "remove", "path": "/missing"}
        ]));
        assert_eq!(
            apply_json_patch(&tree, &patch).unwrap_err(),
            FhirError::PathNotFound {
                index: 1,
                path: "/missing".into()
            }
        );

        let patch = ops(json!([{"op": "replace", "path": "/arr/2", "value": 0}]));
        assert!(matches!(
            apply_json_patch(&tree, &patch),
            Err(FhirError::PathNotFound { index: 0, .. })
        ));
    }

    #[test]
    fn move_and_copy() {
        let tree = json!({"foo": {"bar": "baz", "waldo": "fred"}, "qux": {"corge": "grault"}});
        let patch = ops(json!([
            {"op": "move", "from": "/foo/waldo", "path": "/qux/thud"},
            {"op": "copy", "from": "/qux", "path": "/copied"}
        ]));

        assert_eq!(
            apply_json_patch(&tree, &patch).unwrap(),
            json!({
                "foo": {"bar": "baz"},
                "qux": {"corge": "grault", "thud": "fred"},
                "copied": {"corge": "grault", "thud": "fred"}
            })
        );
    }

    #[test]
    fn move_within_array() {
        let tree = json!({"foo": ["all", "grass", "cows", "eat"]});
        let patch = ops(json!([{"op": "move", "from": "/foo/1", "path": "/foo/3"}]));
        assert_eq!(
            apply_json_patch(&tree, &patch).unwrap(),
            json!({"foo": ["all", "cows", "eat", "grass"]})
        );
    }

    #[test]
    fn move_into_own_child_is_rejected() {
        let tree = json!({"a": {"b": {}}});
        let patch = ops(json!([{"op": "move", "from": "/a", "path": "/a/b/c"}]));
        assert!(matches!(
            apply_json_patch(&tree, &patch),
            Err(FhirError::MalformedPatch { index: Some(0), .. })
        ));
    }

    #[test]
    fn test_uses_structural_equality() {
        let tree = json!({"n": 1, "obj": {"x": [1, {"y": true}], "z": null}});
        let patch = ops(json!([
            {"op": "test", "path": "/n", "value": 1.0},
            {"op": "test", "path": "/obj", "value": {"z": null, "x": [1, {"y": true}]}}
        ]));
        assert!(apply_json_patch(&tree, &patch).is_ok());

        let patch = ops(json!([{"op": "test", "path": "/obj/x", "value": [{"y": true}, 1]}]));
        assert!(matches!(
            apply_json_patch(&tree, &patch),
            Err(FhirError::TestFailed { index: 0, .. })
        ));
    }

    #[test]
    fn escaped_pointer_tokens() {
        let tree = json!({"a/b": 1, "m~n": 2});
        let patch = ops(json!([
            {"op": "replace", "path": "/a~1b", "value": 10},
            {"op": "remove", "path": "/m~0n"}
        ]));
        assert_eq!(apply_json_patch(&tree, &patch).unwrap(), json!({"a/b": 10}));
    }

    #[test]
    fn traversing_a_scalar_is_a_type_mismatch() {
        let tree = json!({"status": "active"});
        let patch = ops(json!([{"op": "add", "path": "/status/code", "value": "x"}]));
        assert!(matches!(
            apply_json_patch(&tree, &patch),
            Err(FhirError::TypeMismatch { index: Some(0), .. })
        ));
    }

    #[test]
    fn malformed_documents_name_the_element() {
        assert!(matches!(
            parse_json_patch(&json!({"op": "add"})),
            Err(FhirError::MalformedPatch { index: None, .. })
        ));
        assert!(matches!(
            parse_json_patch(&json!([
                {"op": "remove", "path": "/a"},
                {"op": "frobnicate", "path": "/a"}
            ])),
            Err(FhirError::MalformedPatch { index: Some(1), .. })
        ));
        assert!(matches!(
            parse_json_patch(&json!([{"op": "add", "path": "/a"}])),
            Err(FhirError::MalformedPatch { index: Some(0), .. })
        ));

        let patch = ops(json!([{"op": "remove", "path": "no-slash"}]));
        assert!(matches!(
            apply_json_patch(&json!({}), &patch),
            Err(FhirError::MalformedPatch { index: Some(0), .. })
        ));
    }

    #[test]
    fn merge_patch_deletes_and_adds() {
        let tree = json!({"a": 1, "b": 2});
        let patch = json!({"b": null, "c": 3});
        assert_eq!(apply_merge_patch(&tree, &patch), json!({"a": 1, "c": 3}));
    }

    #[test]
    fn merge_patch_recurses_and_replaces_arrays() {
        let tree = json!({
            "code": {"text": "old", "coding": [{"code": "a"}, {"code": "b"}]},
            "note": [{"text": "n1"}]
        });
        let patch = json!({
            "code": {"text": null, "coding": [{"code": "c"}]},
            "subject": {"reference": "Patient/1", "display": null}
        });

        assert_eq!(
            apply_merge_patch(&tree, &patch),
            json!({
                "code": {"coding": [{"code": "c"}]},
                "note": [{"text": "n1"}],
                "subject": {"reference": "Patient/1"}
            })
        );
    }

    #[test]
    fn merge_patch_is_idempotent_without_arrays() {
        let tree = json!({"status": "active", "meta": {"tag": "x"}, "gone": 1});
        let patch = json!({
            "status": "resolved",
            "meta": {"tag": null, "source": "s"},
            "gone": null
        });

        let once = apply_merge_patch(&tree, &patch);
        let twice = apply_merge_patch(&once, &patch);
        assert_eq!(once, twice);
    }

    #[test]
    fn dialect_from_content_type() {
        assert_eq!(
            PatchDialect::from_content_type("application/json-patch+json"),
            Some(PatchDialect::JsonPatch)
        );
        assert_eq!(
            PatchDialect::from_content_type("application/merge-patch+json; charset=utf-8"),
            Some(PatchDialect::MergePatch)
        );
        assert_eq!(
            PatchDialect::from_content_type("application/fhir+json"),
            None
        );
        assert_eq!(PatchDialect::from_content_type(""), None);
    }

    #[test]
    fn apply_patch_keeps_resources_as_objects() {
        let tree = json!({"resourceType": "Device"});
        let err = apply_patch(&tree, PatchDialect::MergePatch, &json!("replaced")).unwrap_err();
        assert!(matches!(err, FhirError::TypeMismatch { index: None, .. }));

        let patched = apply_patch(
            &tree,
            PatchDialect::JsonPatch,
            &json!([{"op": "add", "path": "/status", "value": "active"}]),
        )
        .unwrap();
        assert_eq!(patched, json!({"resourceType": "Device", "status": "active"}));
    }
}
