//! PIN gate: the Locked → Verifying → Unlocked state machine.
//!
//! One gate guards one principal's PIN. The owner vault and the admin raw
//! credential view each hold their own gate, so they lock independently.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::{Result, SentinelError};
use crate::security::{validate_pin_format, verify_legacy_pin, verify_pin};
use crate::storage::{DocPath, DocumentStore, Principal, StoredPin};
use crate::vault::UnlockError;

/// Lock state of a gate.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum LockState {
    #[default]
    Locked,
    /// A candidate PIN is being checked against the store
    Verifying,
    Unlocked,
}

impl std::fmt::Display for LockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Locked => write!(f, "Locked"),
            Self::Verifying => write!(f, "Verifying"),
            Self::Unlocked => write!(f, "Unlocked"),
        }
    }
}

/// Message reported when the stored PIN could not be read or checked.
pub const VERIFICATION_FAILED: &str = "An error occurred during verification.";

/// Check `candidate` against what the principal has stored.
async fn check_pin(principal: &Principal, candidate: &str) -> Result<()> {
    let matched = match &principal.pin {
        StoredPin::Unset => return Err(UnlockError::PinNotSet.into()),
        StoredPin::Legacy(stored) => verify_legacy_pin(candidate, stored),
        StoredPin::Hashed(hash) => {
            let hash = hash.clone();
            let candidate = candidate.to_string();
            tokio::task::spawn_blocking(move || verify_pin(&candidate, &hash))
                .await
                .map_err(|e| SentinelError::Store(format!("PIN check task failed: {}", e)))??
        }
    };

    if matched {
        Ok(())
    } else {
        Err(UnlockError::IncorrectPin.into())
    }
}

pub struct PinGate {
    store: Arc<dyn DocumentStore>,
    principal_id: String,
    state: watch::Sender<LockState>,
    /// Serializes transitions so a lock cannot interleave with a verify.
    transition: Mutex<()>,
}

impl PinGate {
    pub fn new(store: Arc<dyn DocumentStore>, principal_id: &str) -> Self {
        let (state, _) = watch::channel(LockState::Locked);
        Self {
            store,
            principal_id: principal_id.to_string(),
            state,
            transition: Mutex::new(()),
        }
    }

    pub fn principal_id(&self) -> &str {
        &self.principal_id
    }

    pub fn state(&self) -> LockState {
        *self.state.borrow()
    }

    pub fn is_unlocked(&self) -> bool {
        self.state() == LockState::Unlocked
    }

    /// Observe state changes.
    pub fn watch(&self) -> watch::Receiver<LockState> {
        self.state.subscribe()
    }

    fn set(&self, next: LockState) {
        self.state.send_replace(next);
    }

    /// Try to unlock with `candidate`.
    ///
    /// Returns `Ok(true)` on a Locked → Unlocked transition and `Ok(false)`
    /// if the gate was already unlocked. Any failure leaves the gate Locked.
    /// Malformed input is rejected before the store is consulted.
    pub async fn unlock(&self, candidate: &str) -> Result<bool> {
        let _guard = self.transition.lock().await;

        if self.state() == LockState::Unlocked {
            debug!("Gate for {} already unlocked", self.principal_id);
            return Ok(false);
        }

        validate_pin_format(candidate)?;
        self.set(LockState::Verifying);

        match self.verify(candidate).await {
            Ok(()) => {
                self.set(LockState::Unlocked);
                info!("Vault unlocked for {}", self.principal_id);
                Ok(true)
            }
            Err(e) => {
                self.set(LockState::Locked);
                debug!("Unlock rejected for {}: {}", self.principal_id, e.code());
                Err(e)
            }
        }
    }

    async fn verify(&self, candidate: &str) -> Result<()> {
        let doc = self
            .store
            .get_document(&DocPath::user(&self.principal_id))
            .await
            .map_err(|e| {
                warn!("Failed to read PIN for {}: {}", self.principal_id, e);
                SentinelError::Store(VERIFICATION_FAILED.into())
            })?;

        let Some(doc) = doc else {
            return Err(UnlockError::PinNotSet.into());
        };
        let principal = Principal::from_document(&doc)?;
        check_pin(&principal, candidate).await
    }

    /// Returns whether the gate was unlocked before the call.
    pub async fn lock(&self) -> bool {
        let _guard = self.transition.lock().await;
        let was_unlocked = self.state() == LockState::Unlocked;
        if was_unlocked {
            self.set(LockState::Locked);
            info!("Vault locked for {}", self.principal_id);
        }
        was_unlocked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::hash_pin;
    use crate::storage::{MemoryStore, PinKdfSettings};
    use serde_json::json;

    async fn store_with_pin(pin: &str) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .set_document(&DocPath::user("u1"), json!({ "email": "a@b.c", "vaultPin": pin }))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_unlock_with_legacy_pin() {
        let store = store_with_pin("1234").await;
        let gate = PinGate::new(store, "u1");

        assert_eq!(gate.state(), LockState::Locked);
        assert!(gate.unlock("1234").await.unwrap());
        assert_eq!(gate.state(), LockState::Unlocked);
    }

    #[tokio::test]
    async fn test_unlock_is_idempotent() {
        let gate = PinGate::new(store_with_pin("1234").await, "u1");
        assert!(gate.unlock("1234").await.unwrap());
        assert!(!gate.unlock("1234").await.unwrap());
        // Already unlocked: even a wrong candidate is a no-op
        assert!(!gate.unlock("0000").await.unwrap());
        assert!(gate.is_unlocked());
    }

    #[tokio::test]
    async fn test_failures_leave_gate_locked() {
        let gate = PinGate::new(store_with_pin("1234").await, "u1");

        let err = gate.unlock("12").await.unwrap_err();
        assert_eq!(err.to_string(), "PIN must be 4 digits.");
        assert_eq!(gate.state(), LockState::Locked);

        let err = gate.unlock("4321").await.unwrap_err();
        assert!(matches!(err, SentinelError::Auth(_)));
        assert_eq!(err.to_string(), "Incorrect PIN.");
        assert_eq!(gate.state(), LockState::Locked);
    }

    #[tokio::test]
    async fn test_pin_not_set() {
        let gate = PinGate::new(store_with_pin("").await, "u1");
        let err = gate.unlock("1234").await.unwrap_err();
        assert!(matches!(err, SentinelError::Validation(_)));
        assert!(err.to_string().contains("not set"));

        let missing = PinGate::new(Arc::new(MemoryStore::new()), "ghost");
        assert!(matches!(
            missing.unlock("1234").await,
            Err(SentinelError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_hashed_pin() {
        let store = Arc::new(MemoryStore::new());
        let kdf = PinKdfSettings {
            memory_kib: 256,
            time_cost: 1,
            parallelism: 1,
        };
        let hash = hash_pin("2468", &kdf).unwrap();
        store
            .set_document(
                &DocPath::user("u1"),
                json!({ "vaultPin": "", "vaultPinHash": serde_json::to_value(&hash).unwrap() }),
            )
            .await
            .unwrap();

        let gate = PinGate::new(store, "u1");
        assert!(gate.unlock("1357").await.is_err());
        assert!(gate.unlock("2468").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_failure_reports_verification_error() {
        let store = store_with_pin("1234").await;
        store.fail_collection(DocPath::users()).await;
        let gate = PinGate::new(store, "u1");

        let err = gate.unlock("1234").await.unwrap_err();
        assert_eq!(err.to_string(), format!("Store error: {}", VERIFICATION_FAILED));
        assert_eq!(gate.state(), LockState::Locked);
    }

    #[tokio::test]
    async fn test_lock_is_idempotent() {
        let gate = PinGate::new(store_with_pin("1234").await, "u1");
        assert!(!gate.lock().await);

        gate.unlock("1234").await.unwrap();
        let mut rx = gate.watch();
        assert!(gate.lock().await);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), LockState::Locked);
        assert!(!gate.lock().await);
    }
}
