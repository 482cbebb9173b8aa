//! Integration tests for the access strategies.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use region_cache::config::{Config, RegionSettings};
use region_cache::factory::{FactoryFlavor, RegionFactory};
use region_cache::region::{CacheDataDescription, TransactionalDataRegion};
use region_cache::strategy::{AccessStrategy, AccessType};
use region_cache::CacheError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Account {
    id: u64,
    owner: String,
    balance: i64,
}

fn account(owner: &str, balance: i64) -> Account {
    Account {
        id: 42,
        owner: owner.to_string(),
        balance,
    }
}

async fn started_factory() -> RegionFactory {
    let factory = RegionFactory::new(Config::default(), FactoryFlavor::PerInstance).unwrap();
    factory.start().await.unwrap();
    factory
}

async fn entity_region(factory: &RegionFactory, lock_timeout_ms: u64, mutable: bool) -> Arc<TransactionalDataRegion> {
    let settings = RegionSettings {
        expiry_in_seconds: Some(60),
        lock_timeout_ms: Some(lock_timeout_ms),
    };
    let description = CacheDataDescription {
        mutable,
        versioned: true,
    };
    factory.build_entity_region("accounts", settings, description).await.unwrap()
}

async fn strategy(factory: &RegionFactory, access_type: AccessType, lock_timeout_ms: u64) -> AccessStrategy<Account> {
    let region = entity_region(factory, lock_timeout_ms, access_type != AccessType::ReadOnly).await;
    factory.create_access_strategy(region, access_type).unwrap()
}

// ─── Construction ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_strategy_rejects_mismatched_access_type() {
    let factory = started_factory().await;
    let region = entity_region(&factory, 60_000, true).await;

    let result = region_cache::strategy::ReadWriteAccess::<Account>::new(region, AccessType::ReadOnly);
    assert!(matches!(result, Err(CacheError::Configuration(_))));
    factory.stop().await.unwrap();
}

#[tokio::test]
async fn test_factory_builds_declared_variant() {
    let factory = started_factory().await;
    for access_type in [
        AccessType::ReadOnly,
        AccessType::ReadWrite,
        AccessType::NonstrictReadWrite,
        AccessType::Transactional,
    ] {
        let strategy = strategy(&factory, access_type, 60_000).await;
        assert_eq!(strategy.access_type(), access_type);
    }
    factory.stop().await.unwrap();
}

// ─── Read-only ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_read_only_second_put_is_violation() {
    let factory = started_factory().await;
    let strategy = strategy(&factory, AccessType::ReadOnly, 60_000).await;

    assert!(strategy.put_from_load("K", account("ann", 1), None, false).await.unwrap());
    assert_eq!(strategy.get("K").await, Some(account("ann", 1)));

    let second = strategy.put_from_load("K", account("ann", 1), None, false).await;
    assert!(matches!(second, Err(CacheError::ReadOnlyViolation { .. })));

    // Minimal puts skip an occupied key instead.
    assert!(!strategy.put_from_load("K", account("ann", 2), None, true).await.unwrap());
    assert_eq!(strategy.get("K").await, Some(account("ann", 1)));
    factory.stop().await.unwrap();
}

#[tokio::test]
async fn test_read_only_update_is_violation() {
    let factory = started_factory().await;
    let strategy = strategy(&factory, AccessType::ReadOnly, 60_000).await;

    let result = strategy.update("K", account("ann", 5), Some(2), Some(1)).await;
    assert!(matches!(result, Err(CacheError::ReadOnlyViolation { .. })));
    factory.stop().await.unwrap();
}

// ─── Nonstrict read/write ───────────────────────────────────────────────────

#[tokio::test]
async fn test_nonstrict_overwrites_on_load_and_evicts_on_write() {
    let factory = started_factory().await;
    let strategy = strategy(&factory, AccessType::NonstrictReadWrite, 60_000).await;

    strategy.put_from_load("K", account("ann", 1), None, false).await.unwrap();
    strategy.put_from_load("K", account("ann", 2), None, false).await.unwrap();
    assert_eq!(strategy.get("K").await, Some(account("ann", 2)));

    assert!(strategy.lock_item("K", None).await.unwrap().is_none());
    assert!(!strategy.update("K", account("ann", 3), None, None).await.unwrap());
    assert_eq!(strategy.get("K").await, None);

    strategy.put_from_load("K", account("ann", 3), None, false).await.unwrap();
    strategy.remove("K").await.unwrap();
    assert_eq!(strategy.get("K").await, None);
    factory.stop().await.unwrap();
}

// ─── Read/write ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_read_write_commit_publishes_new_version() {
    let factory = started_factory().await;
    let strategy = strategy(&factory, AccessType::ReadWrite, 60_000).await;

    strategy.put_from_load("K", account("ann", 1), Some(1), false).await.unwrap();
    let lock = strategy.lock_item("K", Some(1)).await.unwrap();
    assert!(lock.is_some());

    // Locked: readers miss, loads are refused.
    assert_eq!(strategy.get("K").await, None);
    assert!(!strategy.put_from_load("K", account("ann", 1), Some(1), false).await.unwrap());

    assert!(!strategy.update("K", account("ann", 2), Some(2), Some(1)).await.unwrap());
    let published = strategy
        .after_update("K", account("ann", 2), Some(2), Some(1), lock.as_ref())
        .await
        .unwrap();

    assert!(published);
    assert_eq!(strategy.get("K").await, Some(account("ann", 2)));
    factory.stop().await.unwrap();
}

#[tokio::test]
async fn test_read_write_rollback_restores_previous() {
    let factory = started_factory().await;
    let strategy = strategy(&factory, AccessType::ReadWrite, 60_000).await;

    strategy.put_from_load("K", account("ann", 1), Some(1), false).await.unwrap();
    let lock = strategy.lock_item("K", Some(1)).await.unwrap();
    strategy.unlock_item("K", lock.as_ref()).await.unwrap();

    assert_eq!(strategy.get("K").await, Some(account("ann", 1)));
    factory.stop().await.unwrap();
}

#[tokio::test]
async fn test_read_write_lock_ignored_only_after_timeout() {
    let factory = started_factory().await;
    let strategy = strategy(&factory, AccessType::ReadWrite, 300).await;

    strategy.put_from_load("K", account("ann", 1), Some(1), false).await.unwrap();
    let _abandoned = strategy.lock_item("K", Some(1)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(strategy.get("K").await, None);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(strategy.get("K").await, Some(account("ann", 1)));
    factory.stop().await.unwrap();
}

#[tokio::test]
async fn test_read_write_stale_token_commit_rejected() {
    let factory = started_factory().await;
    let strategy = strategy(&factory, AccessType::ReadWrite, 200).await;
    strategy.put_from_load("K", account("ann", 1), Some(1), false).await.unwrap();

    // Writer A locks, then stalls past the lock timeout.
    let lock_a = strategy.lock_item("K", Some(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Writer B takes over the expired lock and commits.
    let lock_b = strategy.lock_item("K", Some(1)).await.unwrap();
    assert_ne!(lock_a, lock_b);
    assert!(strategy
        .after_update("K", account("bob", 2), Some(2), Some(1), lock_b.as_ref())
        .await
        .unwrap());

    // A's late commit carries a dead token.
    assert!(!strategy
        .after_update("K", account("ann", 3), Some(3), Some(1), lock_a.as_ref())
        .await
        .unwrap());
    assert_eq!(strategy.get("K").await, Some(account("bob", 2)));
    factory.stop().await.unwrap();
}

#[tokio::test]
async fn test_read_write_out_of_order_commit_rejected() {
    let factory = started_factory().await;
    let strategy = strategy(&factory, AccessType::ReadWrite, 60_000).await;
    strategy.put_from_load("K", account("ann", 5), Some(5), false).await.unwrap();

    let lock = strategy.lock_item("K", Some(5)).await.unwrap();
    let published = strategy
        .after_update("K", account("ann", 4), Some(4), Some(3), lock.as_ref())
        .await
        .unwrap();

    assert!(!published);
    assert_eq!(strategy.get("K").await, Some(account("ann", 5)));
    factory.stop().await.unwrap();
}

#[tokio::test]
async fn test_read_write_concurrent_lock_never_publishes() {
    let factory = started_factory().await;
    let strategy = strategy(&factory, AccessType::ReadWrite, 60_000).await;
    strategy.put_from_load("K", account("ann", 1), Some(1), false).await.unwrap();

    let first = strategy.lock_item("K", Some(1)).await.unwrap();
    let second = strategy.lock_item("K", Some(1)).await.unwrap();

    assert!(!strategy
        .after_update("K", account("ann", 2), Some(2), Some(1), first.as_ref())
        .await
        .unwrap());
    assert_eq!(strategy.get("K").await, None);

    assert!(!strategy
        .after_update("K", account("ann", 3), Some(3), Some(1), second.as_ref())
        .await
        .unwrap());

    // The last holder emptied the slot; the next load repopulates it.
    assert!(!strategy.region().contains("K").await);
    assert!(strategy.put_from_load("K", account("ann", 3), Some(3), false).await.unwrap());
    assert_eq!(strategy.get("K").await, Some(account("ann", 3)));
    factory.stop().await.unwrap();
}

#[tokio::test]
async fn test_read_write_after_insert_only_when_absent() {
    let factory = started_factory().await;
    let strategy = strategy(&factory, AccessType::ReadWrite, 60_000).await;

    assert!(!strategy.insert("K", account("ann", 1), Some(1)).await.unwrap());
    assert!(strategy.after_insert("K", account("ann", 1), Some(1)).await.unwrap());
    assert!(!strategy.after_insert("K", account("ann", 9), Some(1)).await.unwrap());
    assert_eq!(strategy.get("K").await, Some(account("ann", 1)));
    factory.stop().await.unwrap();
}

#[tokio::test]
async fn test_read_write_racing_writers_leave_one_value() {
    let factory = started_factory().await;
    let strategy = Arc::new(strategy(&factory, AccessType::ReadWrite, 60_000).await);
    strategy.put_from_load("K", account("ann", 0), Some(0), false).await.unwrap();

    let mut tasks = Vec::new();
    for writer in 1..=8i64 {
        let strategy = Arc::clone(&strategy);
        tasks.push(tokio::spawn(async move {
            let lock = strategy.lock_item("K", Some(0)).await.unwrap();
            strategy
                .after_update("K", account("w", writer), Some(writer as u64), Some(0), lock.as_ref())
                .await
                .unwrap()
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Either one writer published cleanly or the shared lock emptied the slot;
    // a torn or locked entry is never left behind.
    match strategy.get("K").await {
        Some(found) => assert_eq!(found.owner, "w"),
        None => assert!(!strategy.region().contains("K").await),
    }
    factory.stop().await.unwrap();
}

#[tokio::test]
async fn test_read_write_delete_leaves_slot_empty() {
    let factory = started_factory().await;
    let strategy = strategy(&factory, AccessType::ReadWrite, 60_000).await;
    strategy.put_from_load("K", account("ann", 1), Some(1), false).await.unwrap();

    let lock = strategy.lock_item("K", Some(1)).await.unwrap();
    strategy.remove("K").await.unwrap();
    strategy.unlock_item("K", lock.as_ref()).await.unwrap();

    assert_eq!(strategy.get("K").await, None);
    assert!(!strategy.region().contains("K").await);

    // Outside a lock, remove evicts straight away.
    strategy.put_from_load("K", account("ann", 2), Some(2), false).await.unwrap();
    strategy.remove("K").await.unwrap();
    assert_eq!(strategy.get("K").await, None);
    factory.stop().await.unwrap();
}

#[tokio::test]
async fn test_read_write_delete_stays_hidden_after_lock_timeout() {
    let factory = started_factory().await;
    let strategy = strategy(&factory, AccessType::ReadWrite, 200).await;
    strategy.put_from_load("K", account("ann", 1), Some(1), false).await.unwrap();

    // The deleting writer never unlocks.
    let _lock = strategy.lock_item("K", Some(1)).await.unwrap();
    strategy.remove("K").await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(strategy.get("K").await, None);
    factory.stop().await.unwrap();
}

// ─── Transactional ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_transactional_commit_applies_staged_value() {
    let factory = started_factory().await;
    let strategy = strategy(&factory, AccessType::Transactional, 60_000).await;
    strategy.put_from_load("K", account("ann", 1), Some(1), false).await.unwrap();

    let lock = strategy.lock_item("K", Some(1)).await.unwrap();
    assert!(strategy.update("K", account("ann", 2), Some(2), Some(1)).await.unwrap());

    // Staged, not visible.
    assert_eq!(strategy.get("K").await, Some(account("ann", 1)));

    assert!(strategy
        .after_update("K", account("ann", 2), Some(2), Some(1), lock.as_ref())
        .await
        .unwrap());
    strategy.unlock_item("K", lock.as_ref()).await.unwrap();
    assert_eq!(strategy.get("K").await, Some(account("ann", 2)));
    factory.stop().await.unwrap();
}

#[tokio::test]
async fn test_transactional_rollback_discards_staged_value() {
    let factory = started_factory().await;
    let strategy = strategy(&factory, AccessType::Transactional, 60_000).await;
    strategy.put_from_load("K", account("ann", 1), Some(1), false).await.unwrap();

    let lock = strategy.lock_item("K", Some(1)).await.unwrap();
    strategy.update("K", account("ann", 2), Some(2), Some(1)).await.unwrap();
    strategy.unlock_item("K", lock.as_ref()).await.unwrap();

    // The commit notification never came; a late one finds nothing staged.
    assert!(!strategy
        .after_update("K", account("ann", 2), Some(2), Some(1), lock.as_ref())
        .await
        .unwrap());
    assert_eq!(strategy.get("K").await, Some(account("ann", 1)));
    factory.stop().await.unwrap();
}

#[tokio::test]
async fn test_transactional_insert_applies_on_commit() {
    let factory = started_factory().await;
    let strategy = strategy(&factory, AccessType::Transactional, 60_000).await;

    assert!(strategy.insert("N", account("new", 0), Some(1)).await.unwrap());
    assert_eq!(strategy.get("N").await, None);

    assert!(strategy.after_insert("N", account("new", 0), Some(1)).await.unwrap());
    assert_eq!(strategy.get("N").await, Some(account("new", 0)));
    factory.stop().await.unwrap();
}

#[tokio::test]
async fn test_transactional_overlapping_transactions_never_publish() {
    let factory = started_factory().await;
    let strategy = strategy(&factory, AccessType::Transactional, 60_000).await;
    strategy.put_from_load("K", account("ann", 1), Some(1), false).await.unwrap();

    let first = strategy.lock_item("K", Some(1)).await.unwrap();
    let second = strategy.lock_item("K", Some(1)).await.unwrap();
    assert_ne!(first, second);
    assert!(!strategy.update("K", account("second", 3), Some(3), Some(1)).await.unwrap());
    assert!(!strategy.update("K", account("first", 2), Some(2), Some(1)).await.unwrap());

    // The first commit evicts rather than publish either transaction's value.
    assert!(!strategy
        .after_update("K", account("second", 3), Some(3), Some(1), second.as_ref())
        .await
        .unwrap());
    assert_eq!(strategy.get("K").await, None);

    // While the other transaction is open, loads stay out.
    assert!(!strategy.put_from_load("K", account("ann", 1), Some(1), false).await.unwrap());

    assert!(!strategy
        .after_update("K", account("first", 2), Some(2), Some(1), first.as_ref())
        .await
        .unwrap());
    strategy.unlock_item("K", second.as_ref()).await.unwrap();
    strategy.unlock_item("K", first.as_ref()).await.unwrap();
    assert_eq!(strategy.get("K").await, None);

    let AccessStrategy::Transactional(access) = &strategy else {
        panic!("expected the transactional variant");
    };
    assert_eq!(access.staged_count(), 0);

    assert!(strategy.put_from_load("K", account("second", 3), Some(3), false).await.unwrap());
    assert_eq!(strategy.get("K").await, Some(account("second", 3)));
    factory.stop().await.unwrap();
}

#[tokio::test]
async fn test_transactional_commit_publishes_committed_value() {
    let factory = started_factory().await;
    let strategy = strategy(&factory, AccessType::Transactional, 60_000).await;
    strategy.put_from_load("K", account("ann", 1), Some(1), false).await.unwrap();

    let lock = strategy.lock_item("K", Some(1)).await.unwrap();
    strategy.update("K", account("draft", 2), Some(2), Some(1)).await.unwrap();
    assert!(strategy
        .after_update("K", account("final", 2), Some(2), Some(1), lock.as_ref())
        .await
        .unwrap());

    assert_eq!(strategy.get("K").await, Some(account("final", 2)));
    factory.stop().await.unwrap();
}

#[tokio::test]
async fn test_transactional_natural_id_batch_lookup() {
    let factory = started_factory().await;
    let region = factory
        .build_natural_id_region("accounts-by-email", RegionSettings::default(), CacheDataDescription::default())
        .await
        .unwrap();
    let strategy: AccessStrategy<u64> = factory
        .create_access_strategy(Arc::clone(&region), AccessType::Transactional)
        .unwrap();

    strategy.put_from_load("ann@example.com", 1, None, false).await.unwrap();
    strategy.put_from_load("bob@example.com", 2, None, false).await.unwrap();

    let AccessStrategy::Transactional(access) = &strategy else {
        panic!("expected the transactional variant");
    };
    let ids = access
        .resolve_many(&["ann@example.com", "nobody@example.com", "bob@example.com"])
        .await
        .unwrap();
    assert_eq!(ids, vec![Some(1), None, Some(2)]);
    factory.stop().await.unwrap();
}
