//! SentinelVault core: a PIN-gated personal credential vault with live sync,
//! strength scoring and an audited admin surface.
//!
//! The presentation layer is not part of this crate. It drives an
//! [`AccountService`] and drains [`Notification`]s from the channel handed to
//! [`Notifier::channel`].

pub mod admin;
pub mod audit;
pub mod error;
pub mod events;
pub mod security;
pub mod session;
pub mod storage;
pub mod sync;
pub mod vault;

pub use admin::{AdminAggregationEngine, AdminVaultView, BreachCatalog, HealthSnapshot};
pub use audit::{AuditLogEntry, AuditLogger, Severity};
pub use error::{Result, SentinelError};
pub use events::{Notification, NotificationKind, Notifier};
pub use security::{score, StrengthScore, StrengthTier};
pub use session::{AccountService, Session, SignUp};
pub use storage::{DocumentStore, EngineSettings, IdentityProvider, MemoryIdentityProvider, MemoryStore};
pub use sync::{CategoryFilter, CredentialSyncEngine, SyncStatus};
pub use vault::{LockState, VaultLockController};
