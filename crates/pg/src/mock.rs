//! `MockStore`: a recording test double for [`Store`].
//!
//! Every statement, begin, commit and rollback is recorded in call order.
//! Statement results are scripted with [`MockStore::push_rows`] and friends
//! and consumed front to back; with nothing scripted a fetch returns no rows
//! and an execute affects zero rows.
//!
//! Advisory locks are modelled: `SELECT pg_advisory_xact_lock($1, $2)` inside
//! a mock transaction blocks while another open mock transaction holds the
//! same key pair, and the lock is released on commit, rollback or drop. Lock
//! statements and batches never consume scripted replies.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use crate::config::Environment;
use crate::db::Db;
use crate::store::{Queryable, Row, Store, StoreTx};
use crate::{PgError, Value};

/// One interaction with the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Fetch {
        sql: String,
        args: Vec<Value>,
        in_tx: bool,
    },
    Execute {
        sql: String,
        args: Vec<Value>,
        in_tx: bool,
    },
    Batch {
        sql: String,
        in_tx: bool,
    },
    Begin,
    Commit,
    Rollback,
}

impl Call {
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Fetch { sql, .. } | Self::Execute { sql, .. } | Self::Batch { sql, .. } => {
                Some(sql)
            }
            Self::Begin | Self::Commit | Self::Rollback => None,
        }
    }
}

/// A scripted statement result.
#[derive(Debug)]
pub enum Reply {
    Rows(Vec<Row>),
    Affected(u64),
    Fail(PgError),
}

type LockKey = (i32, i32);

#[derive(Default)]
struct Inner {
    calls: Mutex<Vec<Call>>,
    replies: Mutex<VecDeque<Reply>>,
    fail_begin: Mutex<Option<PgError>>,
    fail_commit: Mutex<Option<PgError>>,
    fail_rollback: Mutex<Option<PgError>>,
    locks: Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn record(&self, call: Call) {
        guard(&self.calls).push(call);
    }

    fn next_reply(&self) -> Option<Reply> {
        guard(&self.replies).pop_front()
    }

    fn lock_for(&self, key: LockKey) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(guard(&self.locks).entry(key).or_default())
    }

    fn fetch(&self, sql: &str, args: &[Value], in_tx: bool) -> Result<Vec<Row>, PgError> {
        self.record(Call::Fetch {
            sql: sql.to_owned(),
            args: args.to_vec(),
            in_tx,
        });
        match self.next_reply() {
            None | Some(Reply::Affected(_)) => Ok(Vec::new()),
            Some(Reply::Rows(rows)) => Ok(rows),
            Some(Reply::Fail(err)) => Err(err),
        }
    }

    fn execute(&self, sql: &str, args: &[Value], in_tx: bool) -> Result<u64, PgError> {
        self.record(Call::Execute {
            sql: sql.to_owned(),
            args: args.to_vec(),
            in_tx,
        });
        match self.next_reply() {
            None => Ok(0),
            Some(Reply::Affected(n)) => Ok(n),
            Some(Reply::Rows(rows)) => Ok(rows.len() as u64),
            Some(Reply::Fail(err)) => Err(err),
        }
    }
}

fn advisory_key(sql: &str, args: &[Value]) -> Option<LockKey> {
    if !sql.trim_start().starts_with("SELECT pg_advisory_xact_lock") {
        return None;
    }
    match args {
        [Value::Int(k1), Value::Int(k2)] => Some((*k1, *k2)),
        _ => None,
    }
}

/// Recording in-memory store. Clones share the same recording.
#[derive(Clone, Default)]
pub struct MockStore {
    inner: Arc<Inner>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A `Db` over this store in the test environment.
    pub fn db(&self) -> Db {
        self.db_with(Environment::Test)
    }

    pub fn db_with(&self, environment: Environment) -> Db {
        Db::new(Arc::new(self.clone()), environment)
    }

    /// Script the rows returned by the next statement.
    pub fn push_rows(&self, rows: Vec<Row>) {
        guard(&self.inner.replies).push_back(Reply::Rows(rows));
    }

    /// Script rows from JSON objects. Non-object values are skipped.
    pub fn push_json_rows(&self, rows: Vec<serde_json::Value>) {
        let rows = rows
            .into_iter()
            .filter_map(|row| match row {
                serde_json::Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.push_rows(rows);
    }

    /// Script the affected-row count of the next statement.
    pub fn push_affected(&self, n: u64) {
        guard(&self.inner.replies).push_back(Reply::Affected(n));
    }

    /// Make the next statement fail with `err`.
    pub fn push_error(&self, err: PgError) {
        guard(&self.inner.replies).push_back(Reply::Fail(err));
    }

    pub fn fail_next_begin(&self, err: PgError) {
        *guard(&self.inner.fail_begin) = Some(err);
    }

    pub fn fail_next_commit(&self, err: PgError) {
        *guard(&self.inner.fail_commit) = Some(err);
    }

    pub fn fail_next_rollback(&self, err: PgError) {
        *guard(&self.inner.fail_rollback) = Some(err);
    }

    /// Every recorded call, in order.
    pub fn calls(&self) -> Vec<Call> {
        guard(&self.inner.calls).clone()
    }

    /// Total number of store interactions.
    pub fn round_trips(&self) -> usize {
        guard(&self.inner.calls).len()
    }

    /// SQL text of every recorded statement, in order.
    pub fn statements(&self) -> Vec<String> {
        guard(&self.inner.calls)
            .iter()
            .filter_map(|call| call.sql().map(str::to_owned))
            .collect()
    }

    pub fn begins(&self) -> usize {
        self.count(|call| matches!(call, Call::Begin))
    }

    pub fn commits(&self) -> usize {
        self.count(|call| matches!(call, Call::Commit))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|call| matches!(call, Call::Rollback))
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        guard(&self.inner.calls).iter().filter(|call| pred(call)).count()
    }
}

#[async_trait]
impl Queryable for MockStore {
    async fn fetch_all(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, PgError> {
        if let Some(key) = advisory_key(sql, args) {
            self.inner.record(Call::Fetch {
                sql: sql.to_owned(),
                args: args.to_vec(),
                in_tx: false,
            });
            // Session-less: acquire and release straight away.
            drop(self.inner.lock_for(key).lock_owned().await);
            return Ok(Vec::new());
        }
        self.inner.fetch(sql, args, false)
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<u64, PgError> {
        if let Some(key) = advisory_key(sql, args) {
            self.inner.record(Call::Execute {
                sql: sql.to_owned(),
                args: args.to_vec(),
                in_tx: false,
            });
            drop(self.inner.lock_for(key).lock_owned().await);
            return Ok(1);
        }
        self.inner.execute(sql, args, false)
    }

    async fn batch_execute(&self, sql: &str) -> Result<(), PgError> {
        self.inner.record(Call::Batch {
            sql: sql.to_owned(),
            in_tx: false,
        });
        Ok(())
    }
}

#[async_trait]
impl Store for MockStore {
    fn queryable(&self) -> &dyn Queryable {
        self
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, PgError> {
        self.inner.record(Call::Begin);
        if let Some(err) = guard(&self.inner.fail_begin).take() {
            return Err(err);
        }
        Ok(Box::new(MockTx {
            inner: Arc::clone(&self.inner),
            closed: AtomicBool::new(false),
            held: Mutex::new(Vec::new()),
        }))
    }

    async fn ping(&self) -> Result<(), PgError> {
        self.inner.record(Call::Fetch {
            sql: "SELECT 1 AS one".into(),
            args: Vec::new(),
            in_tx: false,
        });
        Ok(())
    }

    async fn close(&self) {}
}

/// An open mock transaction. Holds its advisory locks until it closes.
pub struct MockTx {
    inner: Arc<Inner>,
    closed: AtomicBool,
    held: Mutex<Vec<OwnedMutexGuard<()>>>,
}

impl MockTx {
    fn ensure_open(&self) -> Result<(), PgError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(PgError::TxClosed)
        } else {
            Ok(())
        }
    }

    async fn take_lock(&self, key: LockKey) {
        let lock = self.inner.lock_for(key);
        // Re-entrant within one transaction, like Postgres.
        if let Ok(held) = Arc::clone(&lock).try_lock_owned() {
            guard(&self.held).push(held);
            return;
        }
        if self.holds(&lock) {
            return;
        }
        let held = lock.lock_owned().await;
        guard(&self.held).push(held);
    }

    fn holds(&self, lock: &Arc<tokio::sync::Mutex<()>>) -> bool {
        guard(&self.held)
            .iter()
            .any(|held| Arc::ptr_eq(OwnedMutexGuard::mutex(held), lock))
    }

    fn close(&self) -> Result<(), PgError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(PgError::TxClosed);
        }
        guard(&self.held).clear();
        Ok(())
    }
}

#[async_trait]
impl Queryable for MockTx {
    async fn fetch_all(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, PgError> {
        self.ensure_open()?;
        if let Some(key) = advisory_key(sql, args) {
            self.inner.record(Call::Fetch {
                sql: sql.to_owned(),
                args: args.to_vec(),
                in_tx: true,
            });
            self.take_lock(key).await;
            return Ok(Vec::new());
        }
        self.inner.fetch(sql, args, true)
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<u64, PgError> {
        self.ensure_open()?;
        if let Some(key) = advisory_key(sql, args) {
            self.inner.record(Call::Execute {
                sql: sql.to_owned(),
                args: args.to_vec(),
                in_tx: true,
            });
            self.take_lock(key).await;
            return Ok(1);
        }
        self.inner.execute(sql, args, true)
    }

    async fn batch_execute(&self, sql: &str) -> Result<(), PgError> {
        self.ensure_open()?;
        self.inner.record(Call::Batch {
            sql: sql.to_owned(),
            in_tx: true,
        });
        Ok(())
    }
}

#[async_trait]
impl StoreTx for MockTx {
    fn queryable(&self) -> &dyn Queryable {
        self
    }

    async fn commit(&self) -> Result<(), PgError> {
        self.close()?;
        self.inner.record(Call::Commit);
        match guard(&self.inner.fail_commit).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn rollback(&self) -> Result<(), PgError> {
        self.close()?;
        self.inner.record(Call::Rollback);
        match guard(&self.inner.fail_rollback).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
