use chrono::{Duration, Utc};
use linea_core::{
    fingerprint, AccountUpdate, Admission, NewAccount, SqliteSessionStore,
};
use tempfile::TempDir;

fn setup_store() -> (TempDir, SqliteSessionStore) {
    let dir = TempDir::new().unwrap();
    let store = SqliteSessionStore::builder()
        .path(dir.path().join("sessions.sqlite"))
        .build()
        .unwrap();
    store.initialize().unwrap();
    (dir, store)
}

const UA_TV: &str = "TiviMate/4.7.0 (AndroidTV 11)";
const UA_PHONE: &str = "Mozilla/5.0 (Linux; Android 13) Mobile";
const UA_DESKTOP: &str = "Mozilla/5.0 (Windows NT 10.0) Chrome/120.0";

#[test]
fn device_limit_rejects_only_new_fingerprints() {
    let (_dir, store) = setup_store();
    let account = store
        .create_account(NewAccount::new("bob", "secret123").max_devices(2))
        .unwrap();

    let first = store.admit(&account.id, UA_TV, "10.0.0.1", 2).unwrap();
    assert!(first.allowed());
    let second = store.admit(&account.id, UA_PHONE, "10.0.0.2", 2).unwrap();
    assert!(second.allowed());

    // third distinct fingerprint hits the limit with the counts attached
    match store.admit(&account.id, UA_DESKTOP, "10.0.0.3", 2).unwrap() {
        Admission::LimitExceeded { current, max } => {
            assert_eq!(current, 2);
            assert_eq!(max, 2);
        }
        Admission::Admitted { .. } => panic!("expected limit rejection"),
    }

    // a known fingerprint never counts against the limit
    let again = store.admit(&account.id, UA_TV, "10.0.0.1", 2).unwrap();
    assert!(again.allowed());
    assert_eq!(store.session_count(&account.id).unwrap(), 2);
}

#[test]
fn readmission_refreshes_activity_and_address_fields() {
    let (_dir, store) = setup_store();
    let account = store
        .create_account(NewAccount::new("carol", "secret123"))
        .unwrap();

    let first = match store.admit(&account.id, UA_TV, "10.0.0.1", 2).unwrap() {
        Admission::Admitted { session } => session,
        _ => panic!("expected admission"),
    };
    // same agent, same address, different reported origin fields on refresh
    let refreshed = match store.admit(&account.id, UA_TV, "10.0.0.1", 2).unwrap() {
        Admission::Admitted { session } => session,
        _ => panic!("expected admission"),
    };
    assert_eq!(first.id, refreshed.id);
    assert_eq!(first.fingerprint, refreshed.fingerprint);
    assert!(refreshed.last_activity >= first.last_activity);
}

#[test]
fn sweep_removes_only_idle_sessions() {
    let (dir, store) = setup_store();
    let account = store
        .create_account(NewAccount::new("dave", "secret123").max_devices(5))
        .unwrap();
    store.admit(&account.id, UA_TV, "10.0.0.1", 5).unwrap();
    store.admit(&account.id, UA_PHONE, "10.0.0.2", 5).unwrap();

    // backdate one session beyond the timeout
    let stale = fingerprint(UA_TV, "10.0.0.1");
    let conn = rusqlite::Connection::open(dir.path().join("sessions.sqlite")).unwrap();
    conn.execute(
        "UPDATE device_sessions SET last_activity = ?1 WHERE fingerprint = ?2",
        rusqlite::params![(Utc::now() - Duration::minutes(90)).naive_utc(), stale],
    )
    .unwrap();

    let removed = store.sweep_idle(Duration::minutes(30)).unwrap();
    assert_eq!(removed, 1);
    let devices = store.list_devices(&account.id).unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].fingerprint, fingerprint(UA_PHONE, "10.0.0.2"));
}

#[test]
fn disconnect_and_disconnect_all() {
    let (_dir, store) = setup_store();
    let account = store
        .create_account(NewAccount::new("erin", "secret123").max_devices(5))
        .unwrap();
    store.admit(&account.id, UA_TV, "10.0.0.1", 5).unwrap();
    store.admit(&account.id, UA_PHONE, "10.0.0.2", 5).unwrap();

    assert!(store
        .disconnect(&account.id, &fingerprint(UA_TV, "10.0.0.1"))
        .unwrap());
    assert!(!store.disconnect(&account.id, "deadbeef").unwrap());
    assert_eq!(store.disconnect_all(&account.id).unwrap(), 1);
    assert_eq!(store.session_count(&account.id).unwrap(), 0);
}

#[test]
fn credential_validation_distinguishes_identity_from_standing() {
    let (_dir, store) = setup_store();
    let account = store
        .create_account(NewAccount::new("frank", "secret123").max_devices(3))
        .unwrap();

    let unknown = store.validate_credentials("nobody", "secret123").unwrap();
    assert!(!unknown.valid);
    assert!(!unknown.can_connect);

    let bad_password = store.validate_credentials("frank", "wrong").unwrap();
    assert!(!bad_password.valid);

    let ok = store.validate_credentials("frank", "secret123").unwrap();
    assert!(ok.valid);
    assert!(ok.can_connect);
    assert_eq!(ok.current_devices, 0);
    assert_eq!(ok.max_devices, 3);

    // disabled account: identity valid, connection refused
    store
        .update_account(
            &account.id,
            AccountUpdate {
                active: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
    let disabled = store.validate_credentials("frank", "secret123").unwrap();
    assert!(disabled.valid);
    assert!(!disabled.can_connect);
    assert_eq!(disabled.message, "account disabled");

    // expired account behaves the same way
    store
        .update_account(
            &account.id,
            AccountUpdate {
                active: Some(true),
                expires_at: Some(Utc::now() - Duration::days(1)),
                ..Default::default()
            },
        )
        .unwrap();
    let expired = store.validate_credentials("frank", "secret123").unwrap();
    assert!(expired.valid);
    assert!(!expired.can_connect);
    assert_eq!(expired.message, "account expired");
}

#[test]
fn deleting_an_account_cascades_to_sessions() {
    let (_dir, store) = setup_store();
    let account = store
        .create_account(NewAccount::new("gina", "secret123"))
        .unwrap();
    store.admit(&account.id, UA_TV, "10.0.0.1", 2).unwrap();

    store.delete_account(&account.id).unwrap();
    assert!(store.account_by_username("gina").unwrap().is_none());
    assert_eq!(store.session_count(&account.id).unwrap(), 0);
}

#[test]
fn duplicate_usernames_are_refused() {
    let (_dir, store) = setup_store();
    store
        .create_account(NewAccount::new("henry", "secret123"))
        .unwrap();
    let err = store
        .create_account(NewAccount::new("henry", "other456"))
        .unwrap_err();
    assert!(err.to_string().contains("already exists"));
}
