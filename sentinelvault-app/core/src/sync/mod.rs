//! Credential synchronization: live mirror, list filtering and owner writes.

mod credentials;
mod engine;
mod filter;

pub use credentials::{CredentialDraft, CredentialEditor, CredentialPatch};
pub use engine::{CredentialSyncEngine, SyncStatus, LOAD_FAILED};
pub use filter::{filter, CategoryFilter, ViewFilter};
