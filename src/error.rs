use crate::records::FieldErrors;
use serde_json::json;
use std::fmt;

/// Domain failure carrying the IPC error code it maps onto.
#[derive(Debug, Clone, PartialEq)]
pub struct DeskError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl DeskError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn db_query(e: impl fmt::Display) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn db_update(e: impl fmt::Display) -> Self {
        Self::new("db_update_failed", e.to_string())
    }

    pub fn validation(fields: FieldErrors) -> Self {
        Self {
            code: "validation_failed",
            message: format!("{} field(s) need attention", fields.len()),
            details: Some(json!({ "fields": fields })),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_fields() {
        let mut fields = FieldErrors::new();
        fields.insert("section".into(), "required".into());
        let e = DeskError::validation(fields);
        assert_eq!(e.code, "validation_failed");
        assert_eq!(e.message, "1 field(s) need attention");
        assert_eq!(e.details, Some(json!({ "fields": { "section": "required" } })));

        let e = DeskError::db_update("disk full").with_details(json!({ "key": "A2" }));
        assert_eq!(e.code, "db_update_failed");
        assert_eq!(e.message, "disk full");
    }
}
