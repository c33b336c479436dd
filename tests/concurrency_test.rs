mod common;

use std::time::Duration;

use anyhow::Result;
use common::{balance_of, open_admin, open_user, snapshot, test_service_with};
use securepay::application::{AppError, EngineConfig, ErrorKind};
use securepay::domain::TransferRequest;
use securepay::storage::{PoolSettings, Repository};
use tokio::task::JoinSet;

fn contended_config() -> EngineConfig {
    EngineConfig::default().with_max_retries(50)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_debits_never_overdraw() -> Result<()> {
    let (service, _temp) = test_service_with(contended_config()).await?;
    let alice = open_user(&service, "alice").await?;
    let bob = open_user(&service, "bob").await?;
    open_user(&service, "sink").await?;

    // Leave alice with 499.99 so exactly nine 50.00 transfers fit
    service
        .transfer(&alice, TransferRequest::new("sink", "0.01"))
        .await?;
    assert_eq!(balance_of(&service, &alice).await?, 49_999);

    let mut tasks = JoinSet::new();
    for _ in 0..10 {
        let service = service.clone();
        tasks.spawn(async move {
            service
                .transfer(&alice, TransferRequest::new("bob", "50"))
                .await
        });
    }

    let mut committed = 0;
    let mut insufficient = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined? {
            Ok(record) => {
                assert!(record.sender_balance_after >= 0);
                committed += 1;
            }
            Err(AppError::InsufficientFunds { balance, required, .. }) => {
                assert!(balance < required);
                insufficient += 1;
            }
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(committed, 9);
    assert_eq!(insufficient, 1);
    assert_eq!(balance_of(&service, &alice).await?, 4_999);
    assert_eq!(balance_of(&service, &bob).await?, 95_000);

    // Every committed transfer has exactly one SUCCESS audit entry
    let alice_ledger = service.list_transactions(&alice, None).await?;
    assert_eq!(alice_ledger.len(), 10);
    assert_eq!(service.list_audit_entries(&alice, None).await?.len(), 10);

    let report = service.check_integrity().await?;
    assert!(report.is_healthy(), "issues: {:?}", report.issues);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_crossing_transfers_conserve_funds() -> Result<()> {
    let (service, _temp) = test_service_with(contended_config()).await?;
    let users = ["alice", "bob", "carol", "dave"];
    let mut callers = Vec::new();
    for user in users {
        callers.push(open_user(&service, user).await?);
    }
    let admin = open_admin(&service, "root").await?;

    let mut tasks = JoinSet::new();
    for round in 0..5 {
        for (i, caller) in callers.iter().enumerate() {
            let service = service.clone();
            let caller = *caller;
            let receiver = users[(i + 1 + round % 3) % users.len()];
            tasks.spawn(async move {
                service
                    .transfer(&caller, TransferRequest::new(receiver, "12.34"))
                    .await
            });
        }
    }

    let mut committed = 0;
    while let Some(joined) = tasks.join_next().await {
        joined??;
        committed += 1;
    }
    assert_eq!(committed, 20);

    let mut total = 0;
    for caller in &callers {
        let balance = balance_of(&service, caller).await?;
        assert!(balance >= 0);
        total += balance;
    }
    assert_eq!(total, 200_000);

    assert_eq!(service.list_transactions(&admin, None).await?.len(), 20);
    assert_eq!(service.list_audit_entries(&admin, None).await?.len(), 20);
    assert!(service.check_integrity().await?.is_healthy());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_key_debits_once() -> Result<()> {
    let (service, _temp) = test_service_with(contended_config()).await?;
    let alice = open_user(&service, "alice").await?;
    let bob = open_user(&service, "bob").await?;

    let mut tasks = JoinSet::new();
    for _ in 0..4 {
        let service = service.clone();
        tasks.spawn(async move {
            service
                .transfer(
                    &alice,
                    TransferRequest::new("bob", "25").with_idempotency_key("checkout-9"),
                )
                .await
        });
    }

    let mut ids = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        ids.push(joined??.id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    assert_eq!(balance_of(&service, &alice).await?, 47_500);
    assert_eq!(balance_of(&service, &bob).await?, 52_500);
    assert_eq!(service.list_transactions(&alice, None).await?.len(), 1);
    assert_eq!(service.list_audit_entries(&alice, None).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_held_write_lock_exhausts_retries() -> Result<()> {
    let mut config = EngineConfig::default().with_max_retries(3);
    config.pool.busy_timeout = Duration::from_millis(10);
    config.retry_backoff = Duration::from_millis(5);
    let (service, temp) = test_service_with(config).await?;
    let admin = open_admin(&service, "root").await?;
    let alice = open_user(&service, "alice").await?;
    open_user(&service, "bob").await?;

    let before = snapshot(&service, &admin).await?;

    // A second connection takes the write lock and keeps it
    let db_path = temp.path().join("test.db");
    let other = Repository::connect(
        &format!("sqlite:{}", db_path.display()),
        &PoolSettings::default(),
    )
    .await?;
    let mut blocker = other.begin().await?;
    blocker.credit("bob", 1).await?;

    let err = service
        .transfer(&alice, TransferRequest::new("bob", "10"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict { attempts: 3 }), "{:?}", err);
    assert!(err.is_transient());
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // Readers are not blocked by the held lock, and nothing was written
    assert_eq!(snapshot(&service, &admin).await?, before);
    assert_eq!(balance_of(&service, &alice).await?, 50_000);
    drop(blocker);

    Ok(())
}
