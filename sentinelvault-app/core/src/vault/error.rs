//! Unlock-specific error types.
//!
//! The three ways an unlock attempt fails are kept distinct so the UI can
//! tell the user what to do next: fix the input, set a PIN first, or retry.

use thiserror::Error;

use crate::error::SentinelError;

/// Errors that can occur while verifying a candidate PIN.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnlockError {
    /// The candidate is not exactly four digits.
    /// Rejected locally, the store is never consulted.
    #[error("PIN must be 4 digits.")]
    MalformedPin,

    /// The principal has no PIN yet.
    /// User needs to set one from the profile before unlocking.
    #[error("Vault PIN is not set. Please set one in the Profile page.")]
    PinNotSet,

    /// The candidate does not match the stored PIN.
    #[error("Incorrect PIN.")]
    IncorrectPin,
}

/// Result type alias for unlock operations.
pub type UnlockResult<T> = std::result::Result<T, UnlockError>;

// ============================================================================
// Conversions to main error type
// ============================================================================

impl From<UnlockError> for SentinelError {
    fn from(err: UnlockError) -> Self {
        match err {
            UnlockError::MalformedPin | UnlockError::PinNotSet => {
                SentinelError::Validation(err.to_string())
            }
            UnlockError::IncorrectPin => SentinelError::Auth(err.to_string()),
        }
    }
}

impl serde::Serialize for UnlockError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("UnlockError", 2)?;

        let code = match self {
            UnlockError::MalformedPin => "MALFORMED_PIN",
            UnlockError::PinNotSet => "PIN_NOT_SET",
            UnlockError::IncorrectPin => "INCORRECT_PIN",
        };

        state.serialize_field("code", code)?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}
