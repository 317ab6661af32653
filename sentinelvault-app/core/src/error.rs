use thiserror::Error;

/// Errors surfaced by the vault core.
///
/// The variants follow the failure taxonomy the UI layer branches on:
/// validation problems never reach the remote store, auth and sync failures
/// leave state untouched, and store failures leave prior data intact.
#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Auth(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SentinelError {
    /// Stable code for programmatic handling by the presentation layer.
    pub fn code(&self) -> &'static str {
        match self {
            SentinelError::Validation(_) => "VALIDATION_ERROR",
            SentinelError::Auth(_) => "AUTH_ERROR",
            SentinelError::Permission(_) => "PERMISSION_ERROR",
            SentinelError::Sync(_) => "SYNC_ERROR",
            SentinelError::NotFound(_) => "NOT_FOUND",
            SentinelError::Store(_) => "STORE_ERROR",
            SentinelError::Serialization(_) => "SERIALIZATION_ERROR",
            SentinelError::Io(_) => "IO_ERROR",
        }
    }

    /// Text for a user-facing notification, without the category prefix.
    pub fn user_message(&self) -> String {
        match self {
            SentinelError::Validation(m) | SentinelError::Auth(m) | SentinelError::Store(m) => {
                m.clone()
            }
            other => other.to_string(),
        }
    }
}

// ============================================================================
// Serialization for the presentation layer
// ============================================================================

impl serde::Serialize for SentinelError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("SentinelError", 2)?;
        state.serialize_field("code", self.code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

pub type Result<T> = std::result::Result<T, SentinelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serializes_code_and_message() {
        let err = SentinelError::Permission("admin role required".into());
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("PERMISSION_ERROR"));
        assert!(json.contains("admin role required"));
    }

    #[test]
    fn test_user_message_drops_prefix() {
        let err = SentinelError::Store("An error occurred during verification.".into());
        assert_eq!(err.user_message(), "An error occurred during verification.");
        assert_eq!(
            SentinelError::Sync("down".into()).user_message(),
            "Sync error: down"
        );
    }

    #[test]
    fn test_validation_message_is_verbatim() {
        let err = SentinelError::Validation("PIN must be 4 digits.".into());
        assert_eq!(err.to_string(), "PIN must be 4 digits.");
    }
}
