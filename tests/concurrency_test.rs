//! Concurrent ledger access tests
//!
//! Many tasks hit the same accounts at once; every committed change must be
//! visible exactly once and no pair of transfers may deadlock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use aconomy::application::LedgerService;
use aconomy::config::RetryPolicy;
use aconomy::storage::BackendKind;
use anyhow::Result;
use tempfile::TempDir;
use tokio::sync::Barrier;

use common::{BACKENDS, id, open_service, test_config, test_service};

/// Upper bound for any single test; a hang means a deadlock.
const DEADLOCK_TIMEOUT: Duration = Duration::from_secs(60);

async fn concurrent_adds(service: Arc<LedgerService>, callers: usize) -> Result<()> {
    let alice = id("alice");
    let before = service.get_balance(&alice).await?;
    let barrier = Arc::new(Barrier::new(callers));

    let mut handles = Vec::with_capacity(callers);
    for _ in 0..callers {
        let service = Arc::clone(&service);
        let barrier = Arc::clone(&barrier);
        let alice = alice.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            service.add(&alice, 1).await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    assert_eq!(
        service.get_balance(&alice).await?,
        before + callers as i64,
        "{} concurrent adds on {}",
        callers,
        service.backend().kind()
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adds_lose_no_updates() -> Result<()> {
    for kind in BACKENDS {
        let (service, _temp) = test_service(kind).await?;
        let service = Arc::new(service);
        for callers in [2, 10, 100] {
            tokio::time::timeout(DEADLOCK_TIMEOUT, concurrent_adds(Arc::clone(&service), callers))
                .await??;
        }
        service.shutdown().await?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_subtracts_never_overdraw() -> Result<()> {
    for kind in BACKENDS {
        let (service, _temp) = test_service(kind).await?;
        let service = Arc::new(service);
        let alice = id("alice");
        service.set(&alice, 50).await?;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let service = Arc::clone(&service);
            let alice = alice.clone();
            handles.push(tokio::spawn(async move { service.subtract(&alice, 5).await }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await?.is_ok() {
                succeeded += 1;
            }
        }

        // Exactly ten 5-unit withdrawals fit into 50.
        assert_eq!(succeeded, 10, "{kind}");
        assert_eq!(service.get_balance(&alice).await?, 0, "{kind}");
        service.shutdown().await?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_transfers_do_not_deadlock() -> Result<()> {
    for kind in BACKENDS {
        let (service, _temp) = test_service(kind).await?;
        let service = Arc::new(service);
        let alice = id("alice");
        let bob = id("bob");
        service.set(&alice, 1_000).await?;
        service.set(&bob, 1_000).await?;

        let mut handles = Vec::new();
        for i in 0..50 {
            let service = Arc::clone(&service);
            let (from, to) = if i % 2 == 0 {
                (alice.clone(), bob.clone())
            } else {
                (bob.clone(), alice.clone())
            };
            handles.push(tokio::spawn(async move {
                service.transfer(&from, &to, 7).await
            }));
        }

        let all = async {
            for handle in handles {
                handle.await??;
            }
            anyhow::Ok(())
        };
        tokio::time::timeout(DEADLOCK_TIMEOUT, all).await??;

        let a = service.get_balance(&alice).await?;
        let b = service.get_balance(&bob).await?;
        assert_eq!(a + b, 2_000, "{kind}: sum invariant");
        // 25 transfers each way cancel out.
        assert_eq!(a, 1_000, "{kind}");
        service.shutdown().await?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transfer_ring_preserves_total() -> Result<()> {
    let (service, _temp) = test_service(BackendKind::Sqlite).await?;
    let service = Arc::new(service);
    let accounts: Vec<_> = (0..5).map(|i| id(&format!("acct-{i}"))).collect();
    for account in &accounts {
        service.set(account, 100).await?;
    }

    let mut handles = Vec::new();
    for round in 0..40 {
        let service = Arc::clone(&service);
        let from = accounts[round % accounts.len()].clone();
        let to = accounts[(round * 3 + 1) % accounts.len()].clone();
        handles.push(tokio::spawn(async move {
            // Some of these are self-transfers or run dry; only the total matters.
            let _ = service.transfer(&from, &to, 30).await;
        }));
    }
    tokio::time::timeout(DEADLOCK_TIMEOUT, async {
        for handle in handles {
            handle.await?;
        }
        anyhow::Ok(())
    })
    .await??;

    let mut total = 0;
    for account in &accounts {
        let balance = service.get_balance(account).await?;
        assert!(balance >= 0);
        total += balance;
    }
    assert_eq!(total, 500);
    Ok(())
}

/// Two ledgers over one SQLite file behave like two server processes: their
/// caches go stale and only the version guard keeps updates from being lost.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_ledgers_share_one_file() -> Result<()> {
    let temp = TempDir::new()?;
    let mut config = test_config(BackendKind::Sqlite);
    config.retry = RetryPolicy {
        max_attempts: 200,
        backoff_ms: 1,
        multiplier: 1,
    };

    let first = Arc::new(open_service(temp.path(), &config).await?);
    let second = Arc::new(open_service(temp.path(), &config).await?);
    let alice = id("alice");
    first.set(&alice, 0).await?;
    // Prime the second cache so it starts out stale once the first writes.
    second.get_balance(&alice).await?;

    let mut handles = Vec::new();
    for i in 0..40 {
        let service = if i % 2 == 0 {
            Arc::clone(&first)
        } else {
            Arc::clone(&second)
        };
        let alice = alice.clone();
        handles.push(tokio::spawn(async move { service.add(&alice, 1).await }));
    }
    tokio::time::timeout(DEADLOCK_TIMEOUT, async {
        for handle in handles {
            handle.await??;
        }
        anyhow::Ok(())
    })
    .await??;

    let reopened = open_service(temp.path(), &config).await?;
    assert_eq!(reopened.get_balance(&alice).await?, 40);
    let record = reopened.account(&alice).await?;
    // One version step for the set, one per add.
    assert_eq!(record.version, 1 + 1 + 40);
    Ok(())
}
