use std::collections::BTreeMap;
use thiserror::Error;

/// One message per offending field, first violation wins.
pub type FieldErrors = BTreeMap<&'static str, String>;

#[derive(Debug, Error)]
#[error("operation `{op}` failed: {message}")]
pub struct MarketError {
    op: &'static str,
    message: String,
    kind: MarketErrorKind,
    fields: Option<FieldErrors>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketErrorKind {
    /// Field-scoped input problem, detected locally before any network call.
    Validation,
    /// Caller lacks the role or does not own the record.
    Permission,
    NotFound,
    /// Duplicate account, or a state transition the record cannot make.
    Conflict,
    /// Image count or file size limit exceeded, detected locally.
    Capacity,
    /// Network or remote-service failure, surfaced without retry.
    Transport,
}

impl MarketError {
    pub fn validation(op: &'static str, fields: FieldErrors) -> Self {
        let message = fields
            .iter()
            .next()
            .map(|(field, msg)| format!("{field}: {msg}"))
            .unwrap_or_else(|| "invalid input".to_string());
        Self {
            op,
            message,
            kind: MarketErrorKind::Validation,
            fields: Some(fields),
        }
    }

    pub fn invalid_field(op: &'static str, field: &'static str, message: impl Into<String>) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(field, message.into());
        Self::validation(op, fields)
    }

    pub fn permission(op: &'static str, message: impl Into<String>) -> Self {
        Self::plain(op, message, MarketErrorKind::Permission)
    }

    pub fn not_found(op: &'static str, message: impl Into<String>) -> Self {
        Self::plain(op, message, MarketErrorKind::NotFound)
    }

    pub fn conflict(op: &'static str, message: impl Into<String>) -> Self {
        Self::plain(op, message, MarketErrorKind::Conflict)
    }

    pub fn capacity(op: &'static str, message: impl Into<String>) -> Self {
        Self::plain(op, message, MarketErrorKind::Capacity)
    }

    pub fn transport(op: &'static str, message: impl Into<String>) -> Self {
        Self::plain(op, message, MarketErrorKind::Transport)
    }

    fn plain(op: &'static str, message: impl Into<String>, kind: MarketErrorKind) -> Self {
        Self {
            op,
            message: message.into(),
            kind,
            fields: None,
        }
    }

    pub fn op(&self) -> &'static str {
        self.op
    }

    pub fn kind(&self) -> MarketErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }

    pub fn fields(&self) -> Option<&FieldErrors> {
        self.fields.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_carries_first_field_message() {
        let mut fields = FieldErrors::new();
        fields.insert("price", "Price must be greater than 0".to_string());
        fields.insert("title", "Title must be at least 3 characters".to_string());
        let err = MarketError::validation("create_listing", fields);
        assert_eq!(err.kind(), MarketErrorKind::Validation);
        assert_eq!(err.fields().map(BTreeMap::len), Some(2));
        // BTreeMap order puts `price` first; the summary names one field.
        assert!(err.detail().contains("price"));
    }

    #[test]
    fn plain_errors_have_no_fields() {
        let err = MarketError::permission("delete_listing", "not the listing owner");
        assert_eq!(err.kind(), MarketErrorKind::Permission);
        assert!(err.fields().is_none());
        assert_eq!(err.op(), "delete_listing");
    }
}
