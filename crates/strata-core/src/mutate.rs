// ── Default mutate function ──
//
// Folds an `Action` onto a JSON value. The bucket layer uses this (or a
// caller-supplied `Mutate`) to project pending writes onto fetched data,
// and `MemoryEndpoint` uses it to commit deployed actions.

use serde_json::{Map, Value};

use crate::action::{Action, ActionKind};
use crate::config::nested_segment;
use crate::error::CoreError;

/// Apply `action` to `current`, returning the new value.
///
/// - `UPDATE` with an id merges into the array item carrying that id;
///   with a path it sets the field; otherwise objects are shallow-merged
///   and anything else is replaced.
/// - `CREATE` appends to an array (`null` counts as empty).
/// - `DELETE` removes the array item with the id, or the field at path.
pub fn apply(current: &Value, action: &Action) -> Result<Value, CoreError> {
    let payload = &action.payload;
    match action.kind {
        ActionKind::Noop => Ok(current.clone()),

        ActionKind::Update => {
            if let Some(id) = payload.id.as_deref() {
                let mut items = expect_array(current, action)?;
                let item = items
                    .iter_mut()
                    .find(|item| item_id(item).as_deref() == Some(id))
                    .ok_or_else(|| invalid(action, format!("no item with id '{id}'")))?;
                match payload.path.as_deref() {
                    Some(path) => set_path(item, path, payload.value.clone()),
                    None => merge(item, payload.value.clone()),
                }
                Ok(Value::Array(items))
            } else if let Some(path) = payload.path.as_deref() {
                let mut next = current.clone();
                set_path(&mut next, path, payload.value.clone());
                Ok(next)
            } else {
                let mut next = current.clone();
                merge(&mut next, payload.value.clone());
                Ok(next)
            }
        }

        ActionKind::Create => {
            let mut items = expect_array(current, action)?;
            let mut value = payload.value.clone();
            if let (Some(id), Value::Object(fields)) = (payload.id.as_deref(), &mut value) {
                fields
                    .entry("id")
                    .or_insert_with(|| Value::String(id.to_owned()));
            }
            items.push(value);
            Ok(Value::Array(items))
        }

        ActionKind::Delete => {
            if let Some(id) = payload.id.as_deref() {
                let mut items = expect_array(current, action)?;
                let before = items.len();
                items.retain(|item| item_id(item).as_deref() != Some(id));
                if items.len() == before {
                    return Err(invalid(action, format!("no item with id '{id}'")));
                }
                Ok(Value::Array(items))
            } else if let Some(path) = payload.path.as_deref() {
                let mut next = current.clone();
                remove_path(&mut next, path);
                Ok(next)
            } else {
                Err(invalid(action, "delete needs an id or a path".into()))
            }
        }
    }
}

/// Fold several actions in order.
pub fn apply_all<'a>(
    current: &Value,
    actions: impl IntoIterator<Item = &'a Action>,
) -> Result<Value, CoreError> {
    actions
        .into_iter()
        .try_fold(current.clone(), |acc, action| apply(&acc, action))
}

/// Fold a domain's pending `actions` onto the value served for `key`.
///
/// Actions are readdressed to their domain first. A nested key only sees
/// the actions targeting its item; they are folded through a one-item
/// array, so a deleted item projects to `null`.
pub fn project(key: &str, base: &Value, actions: &[Action]) -> Result<Value, CoreError> {
    let targeted: Vec<Action> = actions
        .iter()
        .filter(|action| action.applies_to(key))
        .map(Action::to_domain)
        .collect();
    let Some(id) = nested_segment(key) else {
        return apply_all(base, &targeted);
    };
    if targeted.is_empty() {
        return Ok(base.clone());
    }

    let mut item = base.clone();
    let id_added = match &mut item {
        Value::Object(fields) if !fields.contains_key("id") => {
            fields.insert("id".to_owned(), Value::String(id.to_owned()));
            true
        }
        _ => false,
    };
    let seed = if item.is_null() {
        Value::Array(Vec::new())
    } else {
        Value::Array(vec![item])
    };

    let folded = apply_all(&seed, &targeted)?;
    let mut projected = folded
        .as_array()
        .and_then(|items| items.iter().find(|i| item_id(i).as_deref() == Some(id)))
        .cloned()
        .unwrap_or(Value::Null);
    if let (true, Value::Object(fields)) = (id_added, &mut projected) {
        fields.remove("id");
    }
    Ok(projected)
}

/// Extract the `id` field of an item as a string (numbers are stringified).
pub fn item_id(item: &Value) -> Option<String> {
    match item.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn expect_array(current: &Value, action: &Action) -> Result<Vec<Value>, CoreError> {
    match current {
        Value::Array(items) => Ok(items.clone()),
        Value::Null => Ok(Vec::new()),
        other => Err(invalid(
            action,
            format!("expected an array, found {}", type_name(other)),
        )),
    }
}

fn merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(fields), Value::Object(patch)) => fields.extend(patch),
        (target, patch) => *target = patch,
    }
}

fn set_path(target: &mut Value, path: &str, value: Value) {
    let mut cursor = target;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }
        let Value::Object(fields) = cursor else {
            return;
        };
        if segments.peek().is_none() {
            fields.insert(segment.to_owned(), value);
            return;
        }
        cursor = fields.entry(segment).or_insert(Value::Null);
    }
}

fn remove_path(target: &mut Value, path: &str) {
    let (parent, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (Some(parent), leaf),
        None => (None, path),
    };
    let container = match parent {
        Some(parent) => parent
            .split('.')
            .try_fold(target, |cursor, segment| cursor.get_mut(segment)),
        None => Some(target),
    };
    if let Some(Value::Object(fields)) = container {
        fields.remove(leaf);
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn invalid(action: &Action, reason: String) -> CoreError {
    CoreError::InvalidAction {
        kind: action.kind.to_string(),
        key: action.payload.key.clone(),
        reason,
    }
}
