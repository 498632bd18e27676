//! Validation helpers for DTOs.

use serde_json::Value;
use validator::ValidationError;

const MAX_NAME_LENGTH: usize = 64;

/// Validates a player or group display name: non-blank, at most 64 characters, no control characters.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        let mut err = ValidationError::new("name_blank");
        err.message = Some("Name must not be blank".into());
        return Err(err);
    }

    let length = name.chars().count();
    if length > MAX_NAME_LENGTH {
        let mut err = ValidationError::new("name_length");
        err.message = Some(
            format!("Name must be at most {MAX_NAME_LENGTH} characters (got {length})").into(),
        );
        return Err(err);
    }

    if name.chars().any(char::is_control) {
        let mut err = ValidationError::new("name_format");
        err.message = Some("Name must not contain control characters".into());
        return Err(err);
    }

    Ok(())
}

/// Synchronized values must be a JSON object so members can merge keys.
pub fn validate_values_payload(values: &Value) -> Result<(), ValidationError> {
    if values.is_object() {
        Ok(())
    } else {
        let mut err = ValidationError::new("values_object");
        err.message = Some("Values must be a JSON object".into());
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn display_name_accepts_ordinary_names() {
        assert!(validate_display_name("Alpha").is_ok());
        assert!(validate_display_name("Les Énigmes").is_ok());
    }

    #[test]
    fn display_name_rejects_blank_long_and_control() {
        assert!(validate_display_name("").is_err());
        assert!(validate_display_name("   ").is_err());
        assert!(validate_display_name(&"x".repeat(65)).is_err());
        assert!(validate_display_name("bad\nname").is_err());
    }

    #[test]
    fn values_must_be_objects() {
        assert!(validate_values_payload(&json!({"door": "open"})).is_ok());
        assert!(validate_values_payload(&json!([1, 2])).is_err());
        assert!(validate_values_payload(&json!("text")).is_err());
    }
}
