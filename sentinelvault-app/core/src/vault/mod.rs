//! PIN-gated vault access.
//!
//! A principal's credentials are only visible, and only live-synced, while
//! the vault is unlocked. The gate verifies a 4-digit PIN against the
//! principal's stored salted hash (or a legacy plaintext PIN).

pub mod error;
pub mod gate;
pub mod lock;

pub use error::{UnlockError, UnlockResult};
pub use gate::{LockState, PinGate, VERIFICATION_FAILED};
pub use lock::VaultLockController;
