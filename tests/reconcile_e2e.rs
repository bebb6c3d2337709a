use std::sync::Arc;

use kyrosync::{
    Entity, EntityType, FailureReason, InMemoryStore, InMemoryStoreConfig, OutcomeSummary,
    OutcomeWarning, PersistMode, Reconciler, ReconcilerConfig, StoreClient, StoreOp, Value,
};

fn account(name: &str, industry: &str) -> Entity {
    Entity::new(EntityType::Account, name).with_attribute("Industry", industry)
}

#[test]
fn existing_account_is_updated_in_place() {
    let store = Arc::new(InMemoryStore::new());
    let reconciler = Reconciler::new(store.clone());

    let first = reconciler
        .reconcile(EntityType::Account, vec![account("Acme", "Tech")])
        .unwrap();
    let id = first[0].surrogate_id().unwrap();
    assert!(first[0].is_created());

    let second = reconciler
        .reconcile(EntityType::Account, vec![account("Acme", "Finance")])
        .unwrap();
    assert!(second[0].is_updated());
    assert_eq!(second[0].surrogate_id(), Some(id));

    let stored = store.get(&EntityType::Account, id).unwrap().unwrap();
    assert_eq!(stored.attribute("Industry"), Some(&Value::from("Finance")));
    assert_eq!(store.count(&EntityType::Account).unwrap(), 1);
}

#[test]
fn repeated_pass_creates_nothing_new() {
    let store = Arc::new(InMemoryStore::new());
    let reconciler = Reconciler::new(store.clone());
    let desired = vec![account("Acme", "Tech"), account("Globex", "Energy"), account("Initech", "Software")];

    let first = reconciler.reconcile(EntityType::Account, desired.clone()).unwrap();
    let second = reconciler.reconcile(EntityType::Account, desired).unwrap();

    assert_eq!(OutcomeSummary::of(&first).created, 3);
    let summary = OutcomeSummary::of(&second);
    assert_eq!(summary.created, 0);
    assert_eq!(summary.updated, 3);
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.surrogate_id(), b.surrogate_id());
    }
    assert_eq!(store.count(&EntityType::Account).unwrap(), 3);
}

#[test]
fn duplicate_inputs_collapse_to_last_value() {
    let store = Arc::new(InMemoryStore::new());
    let reconciler = Reconciler::new(store.clone());

    let outcomes = reconciler
        .reconcile(
            EntityType::Account,
            vec![account("A", "first"), account("B", "other"), account("a", "last")],
        )
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].surrogate_id(), outcomes[2].surrogate_id());
    assert_eq!(store.count(&EntityType::Account).unwrap(), 2);

    let id = outcomes[0].surrogate_id().unwrap();
    let stored = store.get(&EntityType::Account, id).unwrap().unwrap();
    assert_eq!(stored.attribute("Industry"), Some(&Value::from("last")));
}

#[test]
fn lookup_is_a_single_call_regardless_of_size() {
    let store = Arc::new(InMemoryStore::new());
    let reconciler = Reconciler::new(store.clone());
    let desired: Vec<Entity> = (0..50).map(|i| account(&format!("Account {i}"), "Tech")).collect();

    reconciler.reconcile(EntityType::Account, desired).unwrap();

    let stats = store.stats().unwrap();
    assert_eq!(stats.finds, 1);
    assert_eq!(stats.creates, 1);
    assert_eq!(stats.updates, 0);
}

#[test]
fn rejected_record_does_not_affect_its_neighbours() {
    let store = Arc::new(InMemoryStore::new());
    store
        .reject_when(EntityType::Account, "Industry", "Banned", "industry not allowed")
        .unwrap();
    let reconciler = Reconciler::new(store.clone());

    let outcomes = reconciler
        .reconcile(
            EntityType::Account,
            vec![account("One", "Tech"), account("Two", "Banned"), account("Three", "Tech")],
        )
        .unwrap();

    assert!(outcomes[0].is_created());
    assert!(matches!(
        outcomes[1].failure(),
        Some(FailureReason::ValidationRejected { field, .. }) if field == "Industry"
    ));
    assert!(outcomes[2].is_created());
    assert_eq!(store.count(&EntityType::Account).unwrap(), 2);
}

#[test]
fn failed_create_batch_leaves_updates_committed() {
    let store = Arc::new(InMemoryStore::new());
    let reconciler = Reconciler::new(store.clone());
    reconciler
        .reconcile(EntityType::Account, vec![account("Acme", "Tech")])
        .unwrap();

    store.fail_next(StoreOp::Create).unwrap();
    let outcomes = reconciler
        .reconcile(
            EntityType::Account,
            vec![account("Acme", "Finance"), account("Globex", "Energy")],
        )
        .unwrap();

    assert!(outcomes[0].is_updated());
    assert!(outcomes[1].failure().unwrap().is_store_unavailable());
    assert_eq!(store.count(&EntityType::Account).unwrap(), 1);
}

#[test]
fn offline_store_fails_the_pass_before_writing() {
    let store = Arc::new(InMemoryStore::new());
    store.set_available(false).unwrap();
    let reconciler = Reconciler::new(store.clone());

    let err = reconciler
        .reconcile(EntityType::Account, vec![account("Acme", "Tech")])
        .unwrap_err();
    assert!(err.is_store_unavailable());
    assert!(err.is_retryable());

    let stats = store.stats().unwrap();
    assert_eq!(stats.finds, 1);
    assert_eq!(stats.writes(), 0);
}

#[test]
fn auto_mode_uses_store_upsert_when_available() {
    let store = Arc::new(InMemoryStore::with_config(InMemoryStoreConfig {
        supports_upsert: true,
        ..InMemoryStoreConfig::default()
    }));
    let reconciler = Reconciler::new(store.clone());
    reconciler
        .reconcile(EntityType::Account, vec![account("Acme", "Tech")])
        .unwrap();

    let outcomes = reconciler
        .reconcile(
            EntityType::Account,
            vec![account("Acme", "Finance"), account("Globex", "Energy")],
        )
        .unwrap();

    assert!(outcomes[0].is_updated());
    assert!(outcomes[1].is_created());
    let stats = store.stats().unwrap();
    assert_eq!(stats.upserts, 2);
    assert_eq!(stats.creates + stats.updates, 0);
}

#[test]
fn forced_split_mode_with_config_file() {
    let config = ReconcilerConfig::from_json(r#"{ "persist_mode": "split", "key_field": "Name" }"#).unwrap();
    assert_eq!(config.persist_mode, PersistMode::Split);

    let store = Arc::new(InMemoryStore::with_config(InMemoryStoreConfig {
        supports_upsert: true,
        ..InMemoryStoreConfig::default()
    }));
    let reconciler = Reconciler::with_config(store.clone(), config).unwrap();
    reconciler
        .reconcile(EntityType::Account, vec![account("Acme", "Tech")])
        .unwrap();

    assert_eq!(store.stats().unwrap().upserts, 0);
    assert_eq!(store.stats().unwrap().creates, 1);
}

#[test]
fn ambiguous_key_updates_first_match_with_warning() {
    let store = Arc::new(InMemoryStore::new());
    let seeded = store
        .create_batch(
            &EntityType::Account,
            vec![Entity::new(EntityType::Account, "Acme"), Entity::new(EntityType::Account, "ACME")],
        )
        .unwrap();
    let first_id = seeded[0].as_ref().unwrap().id;
    let reconciler = Reconciler::new(store.clone());

    let outcomes = reconciler
        .reconcile(EntityType::Account, vec![account("Acme", "Tech")])
        .unwrap();

    assert!(outcomes[0].is_updated());
    assert_eq!(outcomes[0].surrogate_id(), Some(first_id));
    assert!(outcomes[0].is_ambiguous());
    assert_eq!(
        outcomes[0].warnings,
        vec![OutcomeWarning::AmbiguousMatch { candidates: 2 }]
    );
    assert_eq!(store.count(&EntityType::Account).unwrap(), 2);
}

#[test]
fn oversized_batch_is_reported_per_record() {
    let store = Arc::new(InMemoryStore::with_config(InMemoryStoreConfig {
        max_batch_size: Some(2),
        ..InMemoryStoreConfig::default()
    }));
    let reconciler = Reconciler::new(store.clone());

    let outcomes = reconciler
        .reconcile(
            EntityType::Account,
            vec![account("A", "x"), account("B", "x"), account("C", "x")],
        )
        .unwrap();

    assert!(outcomes.iter().all(|o| o.failure().is_some_and(FailureReason::is_store_unavailable)));
    assert_eq!(store.count(&EntityType::Account).unwrap(), 0);
}

#[test]
fn outcomes_serialize_for_reporting() {
    let reconciler = Reconciler::new(Arc::new(InMemoryStore::new()));
    let outcomes = reconciler
        .reconcile(EntityType::Account, vec![account("Acme", "Tech"), account("", "Tech")])
        .unwrap();

    let json = serde_json::to_value(&outcomes).unwrap();
    assert_eq!(json[0]["natural_key"], "Acme");
    assert!(json[0]["kind"]["created"].is_string());
    assert_eq!(json[1]["kind"]["failed"]["type"], "validation_rejected");
}
