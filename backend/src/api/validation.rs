//! Shared input validation helpers.
//!
//! Centralizes payload rules used by the task-run create and update handlers
//! so that server-owned fields are protected in one place.

use serde_json::Value;

use crate::error::{AppError, Result};

/// Task-run fields only the server may set.
pub const RESERVED_KEYS: [&str; 3] = ["id", "created", "finish_time"];

/// Reject payloads that try to set a reserved field.
pub fn forbidden_attributes(data: &Value) -> Result<()> {
    if let Some(obj) = data.as_object() {
        if obj.keys().any(|key| RESERVED_KEYS.contains(&key.as_str())) {
            return Err(AppError::BadRequest("Reserved keys in payload".to_string()));
        }
    }
    Ok(())
}

/// Parse a request body as a JSON object.
pub fn parse_object(body: &[u8]) -> Result<Value> {
    let data: Value = serde_json::from_slice(body)?;
    if !data.is_object() {
        return Err(AppError::BadRequest(
            "Payload must be a JSON object".to_string(),
        ));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -----------------------------------------------------------------------
    // Reserved keys
    // -----------------------------------------------------------------------

    #[test]
    fn test_allows_regular_payload() {
        assert!(forbidden_attributes(&json!({"project_id": 1, "task_id": 2, "info": {}})).is_ok());
    }

    #[test]
    fn test_rejects_id() {
        assert!(forbidden_attributes(&json!({"id": 5, "task_id": 2})).is_err());
    }

    #[test]
    fn test_rejects_created() {
        assert!(forbidden_attributes(&json!({"created": "2026-01-01"})).is_err());
    }

    #[test]
    fn test_rejects_finish_time() {
        assert!(forbidden_attributes(&json!({"finish_time": "2026-01-01"})).is_err());
    }

    #[test]
    fn test_nested_reserved_name_is_fine() {
        assert!(forbidden_attributes(&json!({"info": {"id": 1, "created": "x"}})).is_ok());
    }

    #[test]
    fn test_error_message() {
        let err = forbidden_attributes(&json!({"id": 1})).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "Reserved keys in payload"));
    }

    // -----------------------------------------------------------------------
    // Body parsing
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_object_accepts_object() {
        assert!(parse_object(br#"{"a": 1}"#).is_ok());
    }

    #[test]
    fn test_parse_object_rejects_array() {
        assert!(matches!(
            parse_object(b"[1, 2]"),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_parse_object_rejects_malformed() {
        assert!(matches!(parse_object(b"{nope"), Err(AppError::Json(_))));
    }
}
