//! Node merge rules shared by every store implementation.

use serde_json::{Map, Value};

use crate::{NodePath, BACKREF_FIELD, IDENTITY_FIELD};

/// Key of the per-field state map inside the identity tag.
const STATE_FIELD: &str = ">";

/// Apply a put to the current value of a node.
///
/// Objects merge field by field into the existing node, and the result
/// carries an identity tag (`_`: soul plus per-field write state) and a
/// back-reference tag (`#`: soul). Any metadata in `incoming` is ignored.
/// Scalars replace the node outright.
pub fn merge_put(existing: Option<Value>, path: &NodePath, incoming: Value, state: i64) -> Value {
    let Value::Object(fields) = incoming else {
        return incoming;
    };

    let mut node = match existing {
        Some(Value::Object(obj)) => obj,
        _ => Map::new(),
    };

    let mut states = node
        .get(IDENTITY_FIELD)
        .and_then(|meta| meta.get(STATE_FIELD))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    for (key, value) in fields {
        if key == IDENTITY_FIELD || key == BACKREF_FIELD {
            continue;
        }
        states.insert(key.clone(), Value::from(state));
        node.insert(key, value);
    }

    let soul = path.soul();
    let mut meta = Map::new();
    meta.insert(BACKREF_FIELD.to_string(), Value::from(soul.clone()));
    meta.insert(STATE_FIELD.to_string(), Value::Object(states));
    node.insert(IDENTITY_FIELD.to_string(), Value::Object(meta));
    node.insert(BACKREF_FIELD.to_string(), Value::from(soul));

    Value::Object(node)
}
