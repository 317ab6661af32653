mod generator;
pub mod pin;
mod strength;

pub use generator::{generate_secret, DEFAULT_SECRET_LENGTH};
pub use pin::{hash_pin, validate_pin_format, verify_legacy_pin, verify_pin, PinHash, PIN_LENGTH};
pub use strength::{score, StrengthScore, StrengthTier};
