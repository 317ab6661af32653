use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map};
use sentinelvault_core::admin::{BreachCatalog, ExposureType};
use sentinelvault_core::audit::Severity;
use sentinelvault_core::storage::{Category, DocPath, DocumentStore, PinKdfSettings};
use sentinelvault_core::sync::CredentialDraft;
use sentinelvault_core::{
    AccountService, EngineSettings, HealthSnapshot, LockState, MemoryIdentityProvider,
    MemoryStore, Notifier, Session, SignUp, SyncStatus,
};

fn service() -> (Arc<MemoryStore>, AccountService) {
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(MemoryIdentityProvider::new());
    let settings = EngineSettings {
        pin_kdf: PinKdfSettings {
            memory_kib: 256,
            time_cost: 1,
            parallelism: 1,
        },
        ..EngineSettings::default()
    };
    let accounts = AccountService::new(store.clone(), identity, Notifier::silent(), settings);
    (store, accounts)
}

fn sign_up_form(name: &str, email: &str) -> SignUp {
    SignUp {
        display_name: name.into(),
        email: email.into(),
        phone: String::new(),
        secret: "correct horse".into(),
        confirm_secret: "correct horse".into(),
    }
}

fn draft(site: &str, secret: &str) -> CredentialDraft {
    CredentialDraft {
        site: site.into(),
        username: "ada".into(),
        secret: secret.into(),
        category: Category::Other,
    }
}

async fn wait_for_cache(session: &Session, n: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while session.vault().credentials().await.len() != n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("sync cache never reached the expected size");
}

#[tokio::test]
async fn owner_unlocks_syncs_scores_and_relocks() {
    let (store, accounts) = service();
    let mut session = accounts.sign_up(&sign_up_form("Ada", "ada@corp.io")).await.unwrap();
    assert!(session.needs_pin_setup());
    accounts.set_pin(&mut session, "1234", "1234").await.unwrap();

    session.vault().unlock("1234").await.unwrap();
    assert_eq!(session.vault().state(), LockState::Unlocked);

    for (site, secret) in [("mail", "abc"), ("bank", "Password1!"), ("work", "xK9#mPq2Lv8r")] {
        session.vault().add_credential(&draft(site, secret)).await.unwrap();
    }
    wait_for_cache(&session, 3).await;
    assert!(matches!(session.vault().sync_status(), SyncStatus::Live { .. }));

    let cached = session.vault().credentials().await;
    let sites: Vec<_> = cached.iter().map(|c| c.site.as_str()).collect();
    assert_eq!(sites, vec!["bank", "mail", "work"]);

    // "Password1!" meets every rule and scores Strong.
    let tally = HealthSnapshot::tally(cached.iter().map(|c| c.secret.as_str()));
    assert_eq!((tally.weak, tally.medium, tally.strong), (1, 0, 2));

    assert!(session.vault().lock().await);
    assert_eq!(session.vault().state(), LockState::Locked);
    assert!(session.vault().credentials().await.is_empty());
    assert_eq!(store.live_subscriptions(), 0);
    assert_eq!(session.vault().sync_status(), SyncStatus::Idle);
}

#[tokio::test]
async fn wrong_pin_never_opens_a_subscription() {
    let (store, accounts) = service();
    let mut session = accounts.sign_up(&sign_up_form("Ada", "ada@corp.io")).await.unwrap();
    accounts.set_pin(&mut session, "1234", "1234").await.unwrap();

    assert!(session.vault().unlock("4321").await.is_err());
    assert!(session.vault().unlock("12").await.is_err());
    assert_eq!(session.vault().state(), LockState::Locked);
    assert_eq!(store.live_subscriptions(), 0);
}

#[tokio::test]
async fn admin_scans_fleet_and_every_action_is_audited() {
    let (store, accounts) = service();

    let mut ada = accounts.sign_up(&sign_up_form("Ada", "ada@corp.io")).await.unwrap();
    accounts.set_pin(&mut ada, "1234", "1234").await.unwrap();
    ada.vault().unlock("1234").await.unwrap();
    for (site, secret) in [("mail", "abc"), ("bank", "password123")] {
        ada.vault().add_credential(&draft(site, secret)).await.unwrap();
    }
    wait_for_cache(&ada, 2).await;
    let ada_id = ada.principal_id().to_string();
    accounts.sign_out(ada).await.unwrap();

    let root = accounts.sign_up(&sign_up_form("Root", "root@corp.io")).await.unwrap();
    let mut promote = Map::new();
    promote.insert("isAdmin".into(), json!(true));
    store
        .update_fields(&DocPath::user(root.principal_id()), promote)
        .await
        .unwrap();
    accounts.sign_out(root).await.unwrap();
    let root = accounts.sign_in("root@corp.io", "correct horse").await.unwrap();

    let admin = accounts.admin_engine(&root).unwrap();
    let report = admin.scan_health().await.unwrap();
    assert_eq!(report.snapshot.total, 2);
    assert_eq!((report.snapshot.weak, report.snapshot.medium), (1, 1));
    assert_eq!(report.principals.len(), 2);

    let exposure = admin
        .scan_exposure(&BreachCatalog::new(Vec::<String>::new(), ["password123"]))
        .await
        .unwrap();
    assert_eq!(exposure.exposed_count, 1);
    assert_eq!(exposure.exposed[0].principal_id, ada_id);
    assert_eq!(exposure.exposed[0].exposure, ExposureType::PasswordExposure);

    admin.set_ban_status(&ada_id, true).await.unwrap();
    assert!(accounts.sign_in("ada@corp.io", "correct horse").await.is_err());

    assert_eq!(admin.purge_all_credentials(&ada_id).await.unwrap(), 2);
    assert_eq!(admin.health().await.total, 0);

    let logs = admin.audit_logs().await.unwrap();
    assert!(logs.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    assert!(logs.iter().all(|e| e.actor_email == "root@corp.io"));
    assert!(logs.iter().any(|e| e.severity == Severity::Danger));
    assert!(logs.iter().any(|e| e.severity == Severity::Security));
}
