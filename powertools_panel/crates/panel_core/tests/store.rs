use panel_core::store::{keys, Store, StoreKey};
use serde_json::json;
use std::collections::HashSet;

#[test]
fn key_ids_are_unique_and_resolvable() {
    let ids: HashSet<&str> = StoreKey::ALL.iter().map(|k| k.id()).collect();
    assert_eq!(ids.len(), StoreKey::ALL.len());

    for key in StoreKey::ALL {
        assert_eq!(StoreKey::from_id(key.id()), Some(key));
    }
    assert_eq!(StoreKey::from_id("GENERAL_nope"), None);
    assert_eq!(StoreKey::LimitsInfo.to_string(), "LIMITS_all");
}

#[test]
fn null_reads_back_as_absent_capability() {
    let store = Store::new();
    assert_eq!(store.get(keys::CHARGE_RATE_BATT), None);

    store.set(keys::CHARGE_RATE_BATT, None);
    assert_eq!(store.get(keys::CHARGE_RATE_BATT), Some(None));
    assert!(store.contains(keys::CHARGE_RATE_BATT));

    store.set(keys::CHARGE_RATE_BATT, Some(1500));
    assert_eq!(store.get(keys::CHARGE_RATE_BATT), Some(Some(1500)));
}

#[test]
fn mismatched_shape_reads_as_missing() {
    let store = Store::new();
    store.set_raw(StoreKey::OnlineCpus, json!("eight"));

    assert_eq!(store.get(keys::ONLINE_CPUS), None);
    assert_eq!(store.get_raw(StoreKey::OnlineCpus), Some(json!("eight")));
}

#[test]
fn snapshot_uses_string_ids() {
    let store = Store::new();
    store.set(keys::NAME_GEN, "Main".to_string());
    store.set(keys::SMT_CPU, true);

    let snap = store.snapshot();
    assert_eq!(snap.len(), 2);
    assert_eq!(snap.get("GENERAL_name"), Some(&json!("Main")));
    assert_eq!(snap.get("CPUs_SMT"), Some(&json!(true)));
}

#[tokio::test]
async fn writes_bump_the_version() {
    let store = Store::new();
    let mut rx = store.subscribe();
    assert_eq!(store.version(), 0);

    store.set(keys::PERSISTENT_GEN, false);
    store.set(keys::PERSISTENT_GEN, true);

    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), 2);
    assert_eq!(store.version(), 2);
    assert_eq!(store.get(keys::PERSISTENT_GEN), Some(true));
}
