use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::events::DEFAULT_DISPLAY_MS;
use crate::security::DEFAULT_SECRET_LENGTH;

/// Argon2id parameters used when a PIN is (re)set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinKdfSettings {
    /// Memory cost in KiB
    pub memory_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for PinKdfSettings {
    fn default() -> Self {
        Self {
            memory_kib: 65536, // 64 MB
            time_cost: 3,
            parallelism: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// How many audit records the admin view reads back.
    pub audit_log_limit: usize,
    pub notification_duration_ms: u64,
    pub long_notification_duration_ms: u64,
    pub pin_kdf: PinKdfSettings,
    /// Mock breach catalog: leaked account emails (compared case-insensitively).
    pub breach_emails: Vec<String>,
    /// Mock breach catalog: leaked secrets (compared exactly).
    pub breach_secrets: Vec<String>,
    pub generated_secret_length: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            audit_log_limit: 10,
            notification_duration_ms: DEFAULT_DISPLAY_MS,
            long_notification_duration_ms: 10_000,
            pin_kdf: PinKdfSettings::default(),
            breach_emails: vec!["test@example.com".to_string()],
            breach_secrets: vec!["password123".to_string()],
            generated_secret_length: DEFAULT_SECRET_LENGTH,
        }
    }
}

pub fn load_settings(path: &Path) -> Result<EngineSettings> {
    if !path.exists() {
        return Ok(EngineSettings::default());
    }

    let content = std::fs::read_to_string(path)?;
    let settings: EngineSettings = serde_json::from_str(&content)?;
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &EngineSettings) -> Result<()> {
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("settings.json")).unwrap();
        assert_eq!(settings.audit_log_limit, 10);
        assert_eq!(settings.notification_duration_ms, 3000);
        assert_eq!(settings.pin_kdf, PinKdfSettings::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = EngineSettings::default();
        settings.audit_log_limit = 25;
        settings.breach_emails.push("leaked@example.org".into());
        save_settings(&path, &settings).unwrap();

        let loaded = load_settings(&path).unwrap();
        assert_eq!(loaded.audit_log_limit, 25);
        assert_eq!(loaded.breach_emails.len(), 2);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "audit_log_limit": 3 }"#).unwrap();

        let loaded = load_settings(&path).unwrap();
        assert_eq!(loaded.audit_log_limit, 3);
        assert_eq!(loaded.generated_secret_length, 14);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(load_settings(&path).is_err());
    }
}
