use std::collections::HashSet;

use crate::storage::EngineSettings;

/// Known-leaked emails and secrets the exposure scan checks against.
///
/// Emails match case-insensitively, secrets exactly.
#[derive(Debug, Clone, Default)]
pub struct BreachCatalog {
    emails: HashSet<String>,
    secrets: HashSet<String>,
}

impl BreachCatalog {
    pub fn new<E, S>(emails: E, secrets: S) -> Self
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        Self {
            emails: emails
                .into_iter()
                .map(|e| e.as_ref().trim().to_lowercase())
                .collect(),
            secrets: secrets.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(&settings.breach_emails, settings.breach_secrets.iter().cloned())
    }

    pub fn email_breached(&self, email: &str) -> bool {
        self.emails.contains(&email.trim().to_lowercase())
    }

    pub fn secret_exposed(&self, secret: &str) -> bool {
        self.secrets.contains(secret)
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty() && self.secrets.is_empty()
    }
}
