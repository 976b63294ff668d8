//! Read-side helpers for values observed through a store subscription.

use serde_json::Value;

/// Identity tag attached by the store (carries the soul and field states).
pub const IDENTITY_FIELD: &str = "_";

/// Back-reference tag attached by the store (the node's soul).
pub const BACKREF_FIELD: &str = "#";

/// Fields of a [`TestRecord`](crate::TestRecord); a delivered object must
/// carry at least one of them to be accepted.
pub const EXPECTED_FIELDS: [&str; 3] = ["message", "timestamp", "username"];

/// Return a shallow copy of `value` without store bookkeeping fields.
///
/// Non-object values are returned unchanged.
pub fn strip_metadata(value: &Value) -> Value {
    match value {
        Value::Object(obj) => {
            let mut copy = obj.clone();
            copy.remove(IDENTITY_FIELD);
            copy.remove(BACKREF_FIELD);
            Value::Object(copy)
        }
        other => other.clone(),
    }
}

/// Whether a delivered value settles a pending read.
///
/// Null never qualifies and neither do arrays, which cannot carry fields.
/// Other scalars always do. Objects qualify when they contain at least one
/// of [`EXPECTED_FIELDS`].
pub fn is_qualifying(value: &Value) -> bool {
    match value {
        Value::Null | Value::Array(_) => false,
        Value::Object(obj) => EXPECTED_FIELDS.iter().any(|f| obj.contains_key(*f)),
        _ => true,
    }
}
