//! Transaction handles.
//!
//! A [`Tx`] is a cheap view over one shared transaction state. Three roles
//! exist:
//!
//! - `Empty`: no database transaction; statements run on the pool.
//! - `Owned`: holds a real transaction and is the only handle that can
//!   commit or roll it back.
//! - `Scoped`: shares an owner's transaction and hook lists but can only
//!   append hooks. Its `commit`/`rollback` are no-ops.
//!
//! Hooks registered through any handle land in the same lists and run on the
//! finalizing task right after the store acknowledges. A hook failure is
//! logged and never unwinds the transaction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, warn};

use crate::store::{Queryable, StoreTx};
use crate::PgError;

/// A callback run after commit or after rollback.
pub type Hook = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxRole {
    Empty,
    Owned,
    Scoped,
}

struct TxState {
    conn: Option<Box<dyn StoreTx>>,
    finished: AtomicBool,
    commit_hooks: Mutex<Vec<Hook>>,
    rollback_hooks: Mutex<Vec<Hook>>,
}

impl TxState {
    fn new(conn: Option<Box<dyn StoreTx>>) -> Arc<Self> {
        Arc::new(Self {
            conn,
            finished: AtomicBool::new(false),
            commit_hooks: Mutex::new(Vec::new()),
            rollback_hooks: Mutex::new(Vec::new()),
        })
    }

    fn take_hooks(list: &Mutex<Vec<Hook>>) -> Vec<Hook> {
        std::mem::take(&mut *list.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Drop for TxState {
    // An owned transaction that was never finalized is rolled back here so
    // that early returns and panics still release it and fire rollback hooks.
    fn drop(&mut self) {
        if *self.finished.get_mut() {
            return;
        }
        let Some(conn) = self.conn.take() else {
            return;
        };
        let hooks = std::mem::take(
            self.rollback_hooks
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        warn!("transaction dropped without commit or rollback; rolling back");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match conn.rollback().await {
                        Ok(()) => run_hooks(hooks, "rollback"),
                        Err(PgError::TxClosed) => {}
                        Err(err) => error!("Rollback failed: {err}"),
                    }
                });
            }
            Err(_) => {
                warn!(
                    "no async runtime available; leaving rollback to the driver and skipping {} rollback hook(s)",
                    hooks.len()
                );
            }
        }
    }
}

/// Request-scoped transaction handle. Not meant to be shared across
/// concurrently running tasks; pass [`Tx::scoped`] views down the call chain
/// instead.
pub struct Tx {
    state: Arc<TxState>,
    role: TxRole,
}

impl std::fmt::Debug for Tx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx")
            .field("role", &self.role)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl Default for Tx {
    fn default() -> Self {
        Self::empty()
    }
}

impl Tx {
    /// A handle with no database transaction behind it.
    pub fn empty() -> Self {
        Self {
            state: TxState::new(None),
            role: TxRole::Empty,
        }
    }

    pub(crate) fn owned(conn: Box<dyn StoreTx>) -> Self {
        Self {
            state: TxState::new(Some(conn)),
            role: TxRole::Owned,
        }
    }

    pub fn role(&self) -> TxRole {
        self.role
    }

    pub fn is_empty(&self) -> bool {
        self.role == TxRole::Empty
    }

    /// True once the owner committed or rolled back.
    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::SeqCst)
    }

    /// A handle sharing this transaction and its hook lists that cannot
    /// finalize it. Scoping an empty handle yields another empty handle.
    pub fn scoped(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            role: match self.role {
                TxRole::Empty => TxRole::Empty,
                TxRole::Owned | TxRole::Scoped => TxRole::Scoped,
            },
        }
    }

    /// The transaction to run statements on, or `None` for the pool.
    pub(crate) fn queryable(&self) -> Option<&dyn Queryable> {
        self.state.conn.as_deref().map(|conn| conn.queryable())
    }

    /// Two handles are over the same underlying transaction state.
    pub fn shares_state_with(&self, other: &Tx) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Commit the transaction and run commit hooks in registration order.
    ///
    /// No-op unless this handle is the unfinished owner.
    pub async fn commit(&self) -> Result<(), PgError> {
        let Some(conn) = self.finalizable() else {
            return Ok(());
        };
        if self.state.finished.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        conn.commit().await?;
        debug!("transaction committed");
        run_hooks(TxState::take_hooks(&self.state.commit_hooks), "commit");
        Ok(())
    }

    /// Roll the transaction back and run rollback hooks in registration
    /// order. A transaction that is already closed is treated as rolled back
    /// without running hooks.
    ///
    /// No-op unless this handle is the unfinished owner.
    pub async fn rollback(&self) -> Result<(), PgError> {
        let Some(conn) = self.finalizable() else {
            return Ok(());
        };
        if self.state.finished.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        match conn.rollback().await {
            Ok(()) => {
                debug!("transaction rolled back");
                run_hooks(TxState::take_hooks(&self.state.rollback_hooks), "rollback");
                Ok(())
            }
            Err(PgError::TxClosed) => Ok(()),
            Err(err) => {
                error!("Rollback failed: {err}");
                Err(err)
            }
        }
    }

    /// Roll back and log, never propagate. Call it on every exit path that
    /// did not commit; after a commit it does nothing.
    pub async fn rollback_deferred(&self) {
        if let Err(err) = self.rollback().await {
            error!("deferred rollback failed: {err}");
        }
    }

    /// Register `hook` to run after a successful commit.
    pub fn on_commit<F>(&self, hook: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.push_hook(&self.state.commit_hooks, Box::new(hook));
    }

    /// Register `hook` to run after a rollback.
    pub fn on_rollback<F>(&self, hook: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.push_hook(&self.state.rollback_hooks, Box::new(hook));
    }

    fn push_hook(&self, list: &Mutex<Vec<Hook>>, hook: Hook) {
        if self.is_empty() {
            debug!("hook registered on an empty transaction; it will never run");
        }
        list.lock().unwrap_or_else(PoisonError::into_inner).push(hook);
    }

    fn finalizable(&self) -> Option<&dyn StoreTx> {
        match self.role {
            TxRole::Owned => self.state.conn.as_deref(),
            TxRole::Empty | TxRole::Scoped => None,
        }
    }
}

fn run_hooks(hooks: Vec<Hook>, phase: &'static str) {
    for (index, hook) in hooks.into_iter().enumerate() {
        if let Err(err) = hook() {
            error!(phase, hook = index, "transaction hook failed: {err:#}");
        }
    }
}
