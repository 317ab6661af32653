//! Administrative surface: fleet health, exposure scanning, user management
//! and the PIN-gated raw credential view.

mod breach;
mod engine;
mod vault_view;

pub use breach::BreachCatalog;
pub use engine::{
    AdminAggregationEngine, ExposedPrincipal, ExposureReport, ExposureType, HealthReport,
    HealthSnapshot, PrincipalRow,
};
pub use vault_view::{AdminVaultView, OwnedCredential};
