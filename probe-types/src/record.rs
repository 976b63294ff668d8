//! The record written and read back by the sync probe.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{WireError, BACKREF_FIELD, IDENTITY_FIELD};

/// A record created fresh for every probe run.
///
/// Written once, never mutated and never deleted; it may outlive the run in
/// a persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRecord {
    /// Free-form message.
    pub message: String,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// The user that wrote the record.
    pub username: String,
}

impl TestRecord {
    /// Message written by the default harness run.
    pub const DEFAULT_MESSAGE: &'static str = "Hello from Shogun Core + Holster!";

    /// Create a record stamped with the current time.
    pub fn new(message: &str, username: &str) -> Self {
        Self::with_timestamp(message, current_millis(), username)
    }

    /// Create a record with an explicit timestamp.
    pub fn with_timestamp(message: &str, timestamp: i64, username: &str) -> Self {
        Self {
            message: message.to_string(),
            timestamp,
            username: username.to_string(),
        }
    }

    /// Convert to the JSON value handed to the store.
    pub fn to_value(&self) -> Result<Value, WireError> {
        serde_json::to_value(self).map_err(WireError::Serialization)
    }

    /// Parse a record from a store value. Extra fields are ignored.
    pub fn from_value(value: &Value) -> Result<Self, WireError> {
        serde_json::from_value(value.clone()).map_err(WireError::Deserialization)
    }

    /// Check a read result against this record.
    ///
    /// The value must be an object carrying exactly this record's
    /// `message`, `timestamp` and `username`, with no metadata fields.
    pub fn matches(&self, value: &Value) -> bool {
        let Some(obj) = value.as_object() else {
            return false;
        };
        if obj.contains_key(IDENTITY_FIELD) || obj.contains_key(BACKREF_FIELD) {
            return false;
        }
        obj.get("message").and_then(Value::as_str) == Some(self.message.as_str())
            && obj.get("timestamp").and_then(Value::as_i64) == Some(self.timestamp)
            && obj.get("username").and_then(Value::as_str) == Some(self.username.as_str())
    }
}

fn current_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scenario() -> TestRecord {
        TestRecord::with_timestamp(TestRecord::DEFAULT_MESSAGE, 1_700_000_000_000, "testuser_123")
    }

    #[test]
    fn to_value_has_expected_shape() {
        let value = scenario().to_value().unwrap();
        assert_eq!(
            value,
            json!({
                "message": "Hello from Shogun Core + Holster!",
                "timestamp": 1_700_000_000_000i64,
                "username": "testuser_123",
            })
        );
    }

    #[test]
    fn new_stamps_current_time() {
        let record = TestRecord::new("hi", "alice");
        assert!(record.timestamp > 1_700_000_000_000);
    }

    #[test]
    fn matches_ignores_key_order() {
        let value = json!({
            "username": "testuser_123",
            "timestamp": 1_700_000_000_000i64,
            "message": "Hello from Shogun Core + Holster!",
        });
        assert!(scenario().matches(&value));
    }

    #[test]
    fn matches_rejects_metadata() {
        let value = json!({
            "_": { "#": "test/data" },
            "message": "Hello from Shogun Core + Holster!",
            "timestamp": 1_700_000_000_000i64,
            "username": "testuser_123",
        });
        assert!(!scenario().matches(&value));
    }

    #[test]
    fn matches_rejects_different_values() {
        let value = json!({
            "message": "Hello from Shogun Core + Holster!",
            "timestamp": 1_700_000_000_001i64,
            "username": "testuser_123",
        });
        assert!(!scenario().matches(&value));
        assert!(!scenario().matches(&json!("scalar")));
    }

    #[test]
    fn from_value_ignores_extra_fields() {
        let value = json!({
            "#": "test/data",
            "message": "m",
            "timestamp": 5,
            "username": "u",
        });
        let record = TestRecord::from_value(&value).unwrap();
        assert_eq!(record, TestRecord::with_timestamp("m", 5, "u"));
    }
}
