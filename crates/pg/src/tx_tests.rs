//! Transaction lifecycle tests.
//!
//! Everything here runs against `MockStore`, so no Postgres is needed. Live
//! database checks are the `#[ignore]`d tests in `pool.rs`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::mock::{Call, MockStore};
use crate::{PgError, TxRole};

type Log = Arc<Mutex<Vec<&'static str>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn note(log: &Log, entry: &'static str) -> impl FnOnce() -> anyhow::Result<()> + Send + 'static {
    let log = Arc::clone(log);
    move || {
        log.lock().unwrap().push(entry);
        Ok(())
    }
}

// ============================================================
// Roles and scoping
// ============================================================

#[tokio::test]
async fn ensure_open_chain_shares_one_transaction() {
    let store = MockStore::new();
    let db = store.db();

    let owner = db.new_tx().await.expect("begin");
    let a = db.ensure_tx(&owner).await.unwrap();
    let b = db.ensure_tx(&a).await.unwrap();
    let c = db.ensure_tx(&b).await.unwrap();

    assert_eq!(owner.role(), TxRole::Owned);
    for handle in [&a, &b, &c] {
        assert_eq!(handle.role(), TxRole::Scoped);
        assert!(handle.shares_state_with(&owner));
    }
    assert_eq!(store.begins(), 1);

    // Scoped handles cannot finalize.
    c.commit().await.unwrap();
    b.rollback().await.unwrap();
    assert_eq!(store.commits(), 0);
    assert_eq!(store.rollbacks(), 0);
    assert!(!owner.is_finished());

    owner.commit().await.unwrap();
    assert!(a.is_finished());
    assert_eq!(store.commits(), 1);
}

#[tokio::test]
async fn owner_finalizes_once() {
    let store = MockStore::new();
    let db = store.db();

    let tx = db.new_tx().await.unwrap();
    tx.commit().await.unwrap();
    tx.commit().await.unwrap();
    tx.rollback().await.unwrap();
    tx.rollback_deferred().await;

    assert_eq!(store.calls(), vec![Call::Begin, Call::Commit]);
}

#[tokio::test]
async fn empty_rollback_never_touches_the_store() {
    let store = MockStore::new();
    let db = store.db();

    let tx = db.empty_tx();
    assert!(tx.is_empty());
    tx.rollback().await.unwrap();
    tx.commit().await.unwrap();
    tx.rollback_deferred().await;
    assert!(tx.scoped().is_empty());

    assert_eq!(store.round_trips(), 0);
}

#[tokio::test]
async fn empty_tx_statements_run_on_the_pool() {
    let store = MockStore::new();
    let db = store.db();

    let empty = db.empty_tx();
    db.client(&empty).execute("DELETE FROM t", &[]).await.unwrap();

    let tx = db.new_tx().await.unwrap();
    db.client(&tx.scoped()).execute("DELETE FROM t", &[]).await.unwrap();
    tx.commit().await.unwrap();

    let in_tx: Vec<bool> = store
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::Execute { in_tx, .. } => Some(in_tx),
            _ => None,
        })
        .collect();
    assert_eq!(in_tx, vec![false, true]);
}

#[tokio::test]
async fn begin_failure_is_a_connection_error() {
    let store = MockStore::new();
    store.fail_next_begin(PgError::Connection("pool exhausted".into()));

    let err = store.db().new_tx().await.expect_err("begin should fail");
    assert_eq!(err.kind(), crate::ErrorKind::Connection);
}

#[tokio::test]
async fn statements_after_commit_report_tx_closed() {
    let store = MockStore::new();
    let db = store.db();

    let tx = db.new_tx().await.unwrap();
    let scoped = tx.scoped();
    tx.commit().await.unwrap();

    let err = db.client(&scoped).execute("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(err, PgError::TxClosed));
}

// ============================================================
// Hooks
// ============================================================

#[tokio::test]
async fn commit_hooks_run_once_in_registration_order() {
    let store = MockStore::new();
    let db = store.db();
    let seen = log();

    let tx = db.new_tx().await.unwrap();
    let scoped = db.ensure_tx(&tx).await.unwrap();
    tx.on_commit(note(&seen, "first"));
    scoped.on_commit(note(&seen, "second"));
    scoped.scoped().on_commit(note(&seen, "third"));
    tx.on_rollback(note(&seen, "rolled back"));

    tx.commit().await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
}

#[tokio::test]
async fn commit_hooks_never_run_after_rollback() {
    let store = MockStore::new();
    let db = store.db();
    let seen = log();

    let tx = db.new_tx().await.unwrap();
    tx.on_commit(note(&seen, "committed"));
    tx.on_rollback(note(&seen, "rolled back"));
    tx.rollback().await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["rolled back"]);
    assert_eq!(store.commits(), 0);
}

#[tokio::test]
async fn failing_hook_does_not_stop_the_rest() {
    let store = MockStore::new();
    let db = store.db();
    let seen = log();

    let tx = db.new_tx().await.unwrap();
    tx.on_commit(note(&seen, "before"));
    tx.on_commit(|| anyhow::bail!("hook exploded"));
    tx.on_commit(note(&seen, "after"));

    tx.commit().await.expect("hook failure must not fail the commit");
    assert_eq!(*seen.lock().unwrap(), vec!["before", "after"]);
}

#[tokio::test]
async fn failed_commit_skips_commit_hooks() {
    let store = MockStore::new();
    let db = store.db();
    let seen = log();
    store.fail_next_commit(PgError::Connection("connection reset".into()));

    let tx = db.new_tx().await.unwrap();
    tx.on_commit(note(&seen, "committed"));
    assert!(tx.commit().await.is_err());
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_rollback_is_reported_and_skips_rollback_hooks() {
    let store = MockStore::new();
    let db = store.db();
    let seen = log();
    store.fail_next_rollback(PgError::Connection("reset".into()));

    let tx = db.new_tx().await.unwrap();
    tx.on_rollback(note(&seen, "rolled back"));
    let err = tx.rollback().await.unwrap_err();
    assert!(matches!(err, PgError::Connection(ref msg) if msg == "reset"));
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(store.rollbacks(), 1);
}

#[tokio::test]
async fn deferred_rollback_swallows_failures() {
    let store = MockStore::new();
    let db = store.db();
    let seen = log();
    store.fail_next_rollback(PgError::Connection("reset".into()));

    let tx = db.new_tx().await.unwrap();
    tx.on_rollback(note(&seen, "rolled back"));
    tx.rollback_deferred().await;

    assert!(tx.is_finished());
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(store.rollbacks(), 1);
}

#[tokio::test]
async fn hooks_on_empty_handle_are_inert() {
    let store = MockStore::new();
    let db = store.db();
    let seen = log();

    let tx = db.empty_tx();
    tx.on_commit(note(&seen, "committed"));
    tx.on_rollback(note(&seen, "rolled back"));
    tx.commit().await.unwrap();
    tx.rollback().await.unwrap();

    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn dropped_transaction_is_rolled_back() {
    let store = MockStore::new();
    let db = store.db();
    let seen = log();

    {
        let tx = db.new_tx().await.unwrap();
        tx.on_rollback(note(&seen, "rolled back"));
        let _scoped = tx.scoped();
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(store.calls(), vec![Call::Begin, Call::Rollback]);
    assert_eq!(*seen.lock().unwrap(), vec!["rolled back"]);
}

// ============================================================
// Db::scope
// ============================================================

#[tokio::test]
async fn scope_commits_on_ok() {
    let store = MockStore::new();
    let db = store.db();
    let empty = db.empty_tx();

    let n = db
        .scope(&empty, |tx| {
            let db = db.clone();
            async move {
                assert_eq!(tx.role(), TxRole::Scoped);
                db.client(&tx).execute("UPDATE t SET a = 1", &[]).await
            }
        })
        .await
        .unwrap();

    assert_eq!(n, 0);
    assert_eq!(store.begins(), 1);
    assert_eq!(store.commits(), 1);
}

#[tokio::test]
async fn scope_rolls_back_on_err() {
    let store = MockStore::new();
    let db = store.db();
    let seen = log();

    let result: Result<(), PgError> = db
        .scope(&db.empty_tx(), |tx| {
            tx.on_rollback(note(&seen, "rolled back"));
            async move { Err(PgError::NotFound) }
        })
        .await;

    assert!(result.unwrap_err().is_not_found());
    assert_eq!(store.commits(), 0);
    assert_eq!(store.rollbacks(), 1);
    assert_eq!(*seen.lock().unwrap(), vec!["rolled back"]);
}

#[tokio::test]
async fn scope_inside_an_owned_tx_leaves_finalizing_to_the_owner() {
    let store = MockStore::new();
    let db = store.db();

    let owner = db.new_tx().await.unwrap();
    db.scope(&owner, |_tx| async { Ok::<_, PgError>(()) })
        .await
        .unwrap();
    assert_eq!(store.commits(), 0);

    owner.commit().await.unwrap();
    assert_eq!(store.begins(), 1);
    assert_eq!(store.commits(), 1);
}

// ============================================================
// Advisory locks
// ============================================================

#[tokio::test]
async fn lock_on_empty_tx_commits_its_own_transaction() {
    let store = MockStore::new();
    let db = store.db();

    db.lock(&db.empty_tx(), "A", "B").await.unwrap();

    let calls = store.calls();
    assert_eq!(calls.first(), Some(&Call::Begin));
    assert_eq!(calls.last(), Some(&Call::Commit));
    assert!(store
        .statements()
        .iter()
        .any(|sql| sql.contains("deadlock_timeout")));
    let args = calls.iter().find_map(|call| match call {
        Call::Execute { sql, args, in_tx } if sql.contains("pg_advisory_xact_lock") => {
            assert!(*in_tx);
            Some(args.clone())
        }
        _ => None,
    });
    assert_eq!(
        args,
        Some(vec![
            crate::Value::Int(crate::lock::lock_key("A")),
            crate::Value::Int(crate::lock::lock_key("B")),
        ])
    );
}

#[tokio::test]
async fn deadlock_timeout_is_only_set_in_test_environment() {
    let store = MockStore::new();
    let db = store.db_with(crate::Environment::Production);

    db.lock(&db.empty_tx(), "A", "B").await.unwrap();
    assert!(!store
        .statements()
        .iter()
        .any(|sql| sql.contains("deadlock_timeout")));
}

#[tokio::test]
async fn second_locker_waits_for_the_first_transaction() {
    let store = MockStore::new();
    let db = store.db();

    let holder = db.new_tx().await.unwrap();
    db.lock(&holder, "A", "B").await.unwrap();
    assert!(!holder.is_finished(), "a scoped lock must not finalize the caller's tx");

    let contender = {
        let db = db.clone();
        tokio::spawn(async move { db.lock(&db.empty_tx(), "A", "B").await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!contender.is_finished(), "lock acquired while still held");

    holder.commit().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), contender)
        .await
        .expect("contender never acquired the lock")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn lock_failure_rolls_back_the_ensured_transaction() {
    let store = MockStore::new();
    let db = store.db_with(crate::Environment::Development);
    let seen = log();

    // The advisory lock statement is intercepted by the mock, so fail the
    // begin instead and check nothing is left open.
    store.fail_next_begin(PgError::Connection("refused".into()));
    assert!(db.lock(&db.empty_tx(), "A", "B").await.is_err());
    assert_eq!(store.calls(), vec![Call::Begin]);

    let holder = db.new_tx().await.unwrap();
    holder.on_rollback(note(&seen, "rolled back"));
    holder.rollback().await.unwrap();
    // A closed caller tx makes the lock statement fail and nothing is committed.
    let err = db.lock(&holder, "A", "B").await.unwrap_err();
    assert!(matches!(err, PgError::TxClosed));
    assert_eq!(store.commits(), 0);
    assert_eq!(*seen.lock().unwrap(), vec!["rolled back"]);
}
