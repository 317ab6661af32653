mod config;
mod identity;
mod memory;
mod models;
mod store;

pub use config::{load_settings, save_settings, EngineSettings, PinKdfSettings};
pub use identity::{AuthAccount, IdentityProvider, MemoryIdentityProvider};
pub use memory::MemoryStore;
pub use models::{Category, Credential, Principal, Role, StoredPin};
pub use store::{
    compare_values, DocPath, Document, DocumentStore, Direction, OrderBy, Query, SnapshotStream,
};
