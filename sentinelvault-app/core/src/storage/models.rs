use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use tracing::warn;

use super::store::Document;
use crate::error::{Result, SentinelError};
use crate::security::PinHash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Standard,
    Admin,
}

impl Role {
    pub fn from_admin_flag(is_admin: bool) -> Self {
        if is_admin {
            Role::Admin
        } else {
            Role::Standard
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Work,
    Social,
    Finance,
    Entertainment,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Work,
        Category::Social,
        Category::Finance,
        Category::Entertainment,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Work => "work",
            Category::Social => "social",
            Category::Finance => "finance",
            Category::Entertainment => "entertainment",
            Category::Other => "other",
        }
    }

    /// Lenient decode for values already in the store.
    fn from_stored(raw: &str) -> Self {
        raw.parse().unwrap_or_else(|_| {
            warn!("Unknown stored category {:?}, treating as other", raw);
            Category::Other
        })
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "work" => Ok(Category::Work),
            "social" => Ok(Category::Social),
            "finance" => Ok(Category::Finance),
            "entertainment" => Ok(Category::Entertainment),
            "other" => Ok(Category::Other),
            _ => Err(SentinelError::Validation(format!("Invalid category: {}", s))),
        }
    }
}

/// How a principal's vault PIN is stored.
#[derive(Clone, PartialEq, Eq)]
pub enum StoredPin {
    Unset,
    /// Plaintext digits written by older profiles
    Legacy(String),
    Hashed(PinHash),
}

impl StoredPin {
    pub fn is_set(&self) -> bool {
        !matches!(self, StoredPin::Unset)
    }
}

impl std::fmt::Debug for StoredPin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoredPin::Unset => f.write_str("Unset"),
            StoredPin::Legacy(_) => f.write_str("Legacy(..)"),
            StoredPin::Hashed(_) => f.write_str("Hashed(..)"),
        }
    }
}

fn millis_to_time(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

/// Document shape of `users/{uid}`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PrincipalRecord {
    username: String,
    email: String,
    phone: String,
    vault_pin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    vault_pin_hash: Option<PinHash>,
    is_admin: bool,
    is_banned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_updated: Option<i64>,
}

/// An end user of the vault.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub phone: String,
    pub role: Role,
    pub banned: bool,
    pub pin: StoredPin,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Principal {
    /// A freshly registered principal: standard role, not banned, no PIN.
    pub fn new(id: &str, email: &str, display_name: &str, phone: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            email: email.to_string(),
            display_name: display_name.to_string(),
            phone: phone.to_string(),
            role: Role::Standard,
            banned: false,
            pin: StoredPin::Unset,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    pub fn from_document(doc: &Document) -> Result<Self> {
        let record: PrincipalRecord = serde_json::from_value(doc.data.clone())?;

        let pin = match (record.vault_pin_hash, record.vault_pin) {
            (Some(hash), _) => StoredPin::Hashed(hash),
            (None, legacy) if !legacy.is_empty() => StoredPin::Legacy(legacy),
            _ => StoredPin::Unset,
        };

        Ok(Self {
            id: doc.id.clone(),
            email: record.email,
            display_name: record.username,
            phone: record.phone,
            role: Role::from_admin_flag(record.is_admin),
            banned: record.is_banned,
            pin,
            created_at: millis_to_time(record.created_at),
            updated_at: millis_to_time(record.last_updated),
        })
    }

    pub fn to_document_data(&self) -> Result<Value> {
        let (vault_pin, vault_pin_hash) = match &self.pin {
            StoredPin::Unset => (String::new(), None),
            StoredPin::Legacy(pin) => (pin.clone(), None),
            StoredPin::Hashed(hash) => (String::new(), Some(hash.clone())),
        };
        let record = PrincipalRecord {
            username: self.display_name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            vault_pin,
            vault_pin_hash,
            is_admin: self.role.is_admin(),
            is_banned: self.banned,
            created_at: self.created_at.map(|t| t.timestamp_millis()),
            last_updated: self.updated_at.map(|t| t.timestamp_millis()),
        };
        Ok(serde_json::to_value(record)?)
    }

    /// The later of last update and creation.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        match (self.updated_at, self.created_at) {
            (Some(u), Some(c)) => Some(u.max(c)),
            (u, c) => u.or(c),
        }
    }
}

/// Document shape of `users/{uid}/passwords/{id}`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CredentialRecord {
    site: String,
    username: String,
    password: String,
    category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<i64>,
}

/// One stored site login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub id: String,
    pub owner_id: String,
    pub site: String,
    pub username: String,
    pub secret: String,
    pub category: Category,
}

impl Credential {
    pub fn from_document(owner_id: &str, doc: &Document) -> Result<Self> {
        let record: CredentialRecord = serde_json::from_value(doc.data.clone())?;
        Ok(Self {
            id: doc.id.clone(),
            owner_id: owner_id.to_string(),
            site: record.site,
            username: record.username,
            secret: record.password,
            category: Category::from_stored(&record.category),
        })
    }

    /// Document body for a new credential.
    pub fn new_document_data(
        site: &str,
        username: &str,
        secret: &str,
        category: Category,
        now: DateTime<Utc>,
    ) -> Result<Value> {
        let record = CredentialRecord {
            site: site.to_string(),
            username: username.to_string(),
            password: secret.to_string(),
            category: category.as_str().to_string(),
            created_at: Some(now.timestamp_millis()),
        };
        Ok(serde_json::to_value(record)?)
    }
}
