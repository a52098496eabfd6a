//! Behaviour shared by every `InventoryStore` backend, run against each one

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::{Binding, FipStatus, InventoryStore, ObservedRow, StoreError, UpsertOutcome};

pub fn observed(address: &str, binding: Binding) -> ObservedRow {
    ObservedRow {
        address: address.parse().unwrap(),
        subnet_id: "sub-ext".to_string(),
        network_id: "net-ext".to_string(),
        binding,
    }
}

pub async fn observed_rows(store: &dyn InventoryStore) {
    let t0 = DateTime::from_timestamp(1_760_000_000, 0).unwrap();
    let t1 = t0 + Duration::seconds(60);
    let row = observed("10.0.0.5", Binding::available());

    assert_eq!(store.upsert_observed(&row, None, t0).await.unwrap(), UpsertOutcome::Created);

    // same observation again leaves the row and its timestamp alone
    let expected = Binding::available();
    assert_eq!(
        store.upsert_observed(&row, Some(&expected), t1).await.unwrap(),
        UpsertOutcome::Unchanged
    );
    let stored = store.get(row.address).await.unwrap().unwrap();
    assert_eq!(stored.updated_at, t0);
    assert_eq!(stored.created_at, t0);

    // cloud now shows it bound
    let bound = observed("10.0.0.5", Binding::allocated("proj-a", "vm-1"));
    assert_eq!(
        store.upsert_observed(&bound, Some(&expected), t1).await.unwrap(),
        UpsertOutcome::Updated
    );
    let stored = store.get(row.address).await.unwrap().unwrap();
    assert_eq!(stored.binding(), Binding::allocated("proj-a", "vm-1"));
    assert_eq!(stored.updated_at, t1);
    assert_eq!(stored.created_at, t0);

    // a stale expectation is refused and the row is untouched
    let err = store
        .upsert_observed(&row, Some(&Binding::available()), t1)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }), "unexpected error: {err:?}");
    assert_eq!(
        store.get(row.address).await.unwrap().unwrap().status,
        FipStatus::Allocated
    );

    // inserting over an existing, different row is refused too
    let err = store.upsert_observed(&row, None, t1).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));
}

pub async fn transition_cas(store: &dyn InventoryStore) {
    let now = Utc::now();
    let address = "10.0.0.6".parse().unwrap();
    store
        .upsert_observed(&observed("10.0.0.6", Binding::available()), None, now)
        .await
        .unwrap();

    let reserved = store
        .transition(address, &Binding::available(), &Binding::reserved("proj-a"), None, now)
        .await
        .unwrap();
    assert_eq!(reserved.status, FipStatus::Reserved);
    assert_eq!(reserved.project_id.as_deref(), Some("proj-a"));

    let allocated = store
        .transition(
            address,
            &Binding::reserved("proj-a"),
            &Binding::allocated("proj-a", "vm-1"),
            Some("web-1"),
            now,
        )
        .await
        .unwrap();
    assert_eq!(allocated.vm_name.as_deref(), Some("web-1"));
    assert!(allocated.check_invariants().is_ok());

    // the read binding is stale now
    let err = store
        .transition(address, &Binding::reserved("proj-a"), &Binding::available(), None, now)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));

    let err = store
        .transition("10.9.9.9".parse().unwrap(), &Binding::available(), &Binding::reserved("p"), None, now)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));

    // a reconciliation that moves the VM drops the stale display name
    store
        .upsert_observed(
            &observed("10.0.0.6", Binding::allocated("proj-a", "vm-2")),
            Some(&Binding::allocated("proj-a", "vm-1")),
            now,
        )
        .await
        .unwrap();
    assert_eq!(store.get(address).await.unwrap().unwrap().vm_name, None);
}

pub async fn queries_and_counts(store: &dyn InventoryStore) {
    let now = Utc::now();
    for (address, binding) in [
        ("10.0.0.10", Binding::available()),
        ("10.0.0.9", Binding::reserved("proj-a")),
        ("10.0.0.8", Binding::allocated("proj-a", "vm-1")),
        ("10.0.0.7", Binding::allocated("proj-b", "vm-2")),
        ("10.0.0.11", Binding::available()),
    ] {
        store.upsert_observed(&observed(address, binding), None, now).await.unwrap();
    }

    let all: Vec<String> = store
        .list_all()
        .await
        .unwrap()
        .iter()
        .map(|r| r.address.to_string())
        .collect();
    assert_eq!(all, vec!["10.0.0.7", "10.0.0.8", "10.0.0.9", "10.0.0.10", "10.0.0.11"]);

    assert_eq!(store.list_by_status(FipStatus::Available).await.unwrap().len(), 2);
    assert_eq!(store.list_by_project("proj-a").await.unwrap().len(), 2);
    assert!(store.list_by_project("proj-z").await.unwrap().is_empty());

    let for_vm = store.find_by_vm("vm-2").await.unwrap();
    assert_eq!(for_vm.len(), 1);
    assert_eq!(for_vm[0].address.to_string(), "10.0.0.7");

    let counts = store.count_by_status().await.unwrap();
    assert_eq!(counts[&FipStatus::Available], 2);
    assert_eq!(counts[&FipStatus::Reserved], 1);
    assert_eq!(counts[&FipStatus::Allocated], 2);
    assert_eq!(counts[&FipStatus::Released], 0);
}

pub async fn conditional_delete(store: &dyn InventoryStore) {
    let now = Utc::now();
    let address = "10.0.0.12".parse().unwrap();
    store
        .upsert_observed(&observed("10.0.0.12", Binding::reserved("proj-a")), None, now)
        .await
        .unwrap();

    let err = store.delete_if(address, &Binding::available()).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));
    assert!(store.get(address).await.unwrap().is_some());

    store.delete_if(address, &Binding::reserved("proj-a")).await.unwrap();
    assert!(store.get(address).await.unwrap().is_none());

    let err = store.delete_if(address, &Binding::available()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

pub async fn concurrent_transitions_single_winner(store: Arc<dyn InventoryStore>) {
    let now = Utc::now();
    let address = "10.0.0.20".parse().unwrap();
    store
        .upsert_observed(&observed("10.0.0.20", Binding::available()), None, now)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .transition(address, &Binding::available(), &Binding::reserved(format!("proj-{i}")), None, now)
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(StoreError::Conflict { .. }) => {}
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(store.get(address).await.unwrap().unwrap().status, FipStatus::Reserved);
}
