//! # Connection Pool
//!
//! Purpose: Lease a bounded set of reusable connections to concurrent
//! callers, blocking threads or suspending tasks when the pool is full.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep at most `max_size` connections, idle or leased.
//! 2. **Minimal Locking**: One mutex guards the idle set, counters and waiter queue;
//!    connecting and I/O happen outside it.
//! 3. **FIFO Handoff**: A returned connection (or a freed slot) goes straight to the
//!    longest-waiting caller, so waiters are served in arrival order.
//! 4. **RAII Leases**: A `Lease` returns its connection on drop; a broken
//!    connection is closed and its slot handed on.
//!
//! ## Accounting
//! `total` counts every connection that exists or is being built for a caller.
//! `leased` counts the part of `total` currently owned by callers, so
//! `total - leased == idle.len()` whenever the lock is free.

use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::cancel::{self, CancellationToken};
use crate::error::{ClientError, ClientResult};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// A connection type the pool can manage.
pub trait Poolable: Send + 'static {
    /// Cheap liveness probe run before an idle connection is handed out
    /// and before a returned connection is parked. It may absorb transport
    /// bookkeeping (such as TLS session tickets) that arrived while idle.
    fn is_alive(&mut self) -> bool;

    /// Called when the connection is handed to a caller.
    fn on_checkout(&mut self) {}

    /// Called when the connection is parked in the idle set.
    fn on_checkin(&mut self) {}
}

/// Pool sizing.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum total connections (idle + in-use).
    pub max_size: usize,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Idle connections older than this are closed on the next acquire.
    pub idle_timeout: Option<Duration>,
}

/// Point-in-time view of the pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    pub leased: usize,
    pub total: usize,
    pub waiters: usize,
    pub closed: bool,
}

/// What a caller receives from the pool.
enum Grant<C> {
    /// A ready, handshaken connection.
    Connection(C),
    /// Capacity reserved for the caller to build a new connection.
    Slot,
    /// The pool was disposed while waiting.
    Closed,
}

enum Wake<C> {
    Grant(Grant<C>),
    Cancelled,
}

enum WaiterTx<C> {
    Blocking(SyncSender<Wake<C>>),
    Async(oneshot::Sender<Grant<C>>),
}

struct Waiter<C> {
    id: u64,
    tx: WaiterTx<C>,
}

struct IdleEntry<C> {
    conn: C,
    since: Instant,
}

struct PoolState<C> {
    idle: VecDeque<IdleEntry<C>>,
    waiters: VecDeque<Waiter<C>>,
    total: usize,
    leased: usize,
    next_waiter: u64,
    closed: bool,
}

struct PoolInner<C> {
    id: u64,
    config: PoolConfig,
    state: Mutex<PoolState<C>>,
}

enum Checkout<C> {
    Ready(Grant<C>),
    Queued(u64),
}

/// Connection pool handle; clones share the same pool.
pub struct Pool<C: Poolable> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Poolable> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Pool {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Poolable> Pool<C> {
    /// Creates a new connection pool with the provided configuration.
    pub fn new(config: PoolConfig) -> ClientResult<Self> {
        if config.max_size == 0 {
            return Err(ClientError::InvalidConfig("max pool size must be at least 1".into()));
        }
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle.min(config.max_size)),
            waiters: VecDeque::new(),
            total: 0,
            leased: 0,
            next_waiter: 0,
            closed: false,
        };
        Ok(Pool {
            inner: Arc::new(PoolInner {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                config,
                state: Mutex::new(state),
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.lock();
        PoolStatus {
            idle: state.idle.len(),
            leased: state.leased,
            total: state.total,
            waiters: state.waiters.len(),
            closed: state.closed,
        }
    }

    /// Acquires a connection, blocking the calling thread while the pool is full.
    ///
    /// `connect` builds a replacement when the caller is granted free capacity.
    /// A zero `timeout` fails with `PoolExhausted` instead of waiting.
    pub fn acquire_blocking<F>(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
        connect: F,
    ) -> ClientResult<Lease<C>>
    where
        F: FnOnce() -> ClientResult<C>,
    {
        if cancel::is_cancelled(cancel) {
            return Err(ClientError::Cancelled);
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        let (tx, rx) = mpsc::sync_channel(2);
        let hook_tx = tx.clone();

        let grant = match self.inner.checkout(timeout, move || WaiterTx::Blocking(tx))? {
            Checkout::Ready(grant) => grant,
            Checkout::Queued(id) => {
                let _hook = cancel.map(|token| {
                    token.on_cancel(move || {
                        let _ = hook_tx.try_send(Wake::Cancelled);
                    })
                });
                let received = match deadline {
                    Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
                    None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                };
                match received {
                    Ok(Wake::Grant(grant)) => grant,
                    Ok(Wake::Cancelled) => {
                        self.inner.abandon_blocking(id, &rx);
                        return Err(ClientError::Cancelled);
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        self.inner.abandon_blocking(id, &rx);
                        return Err(ClientError::PoolExhausted);
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        self.inner.abandon_blocking(id, &rx);
                        return Err(ClientError::PoolClosed);
                    }
                }
            }
        };

        match grant {
            Grant::Connection(conn) => Ok(Lease::new(self.inner.clone(), conn)),
            Grant::Slot => {
                let slot = SlotGuard::new(self.inner.clone());
                let conn = connect()?;
                Ok(slot.fill(conn))
            }
            Grant::Closed => Err(ClientError::PoolClosed),
        }
    }

    /// Acquires a connection, suspending the calling task while the pool is full.
    ///
    /// Dropping the returned future gives up the place in the queue, or the
    /// reserved slot if a replacement was being built.
    pub async fn acquire<F, Fut>(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
        connect: F,
    ) -> ClientResult<Lease<C>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ClientResult<C>>,
    {
        if cancel::is_cancelled(cancel) {
            return Err(ClientError::Cancelled);
        }
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let (tx, rx) = oneshot::channel();

        let grant = match self.inner.checkout(timeout, move || WaiterTx::Async(tx))? {
            Checkout::Ready(grant) => grant,
            Checkout::Queued(id) => {
                let mut wait = AsyncWait {
                    pool: self.inner.clone(),
                    id,
                    rx: Some(rx),
                };
                wait.wait(deadline, cancel).await?
            }
        };

        match grant {
            Grant::Connection(conn) => Ok(Lease::new(self.inner.clone(), conn)),
            Grant::Slot => {
                let slot = SlotGuard::new(self.inner.clone());
                let conn = tokio::select! {
                    conn = connect() => conn?,
                    _ = cancel::wait_cancelled(cancel) => return Err(ClientError::Cancelled),
                };
                Ok(slot.fill(conn))
            }
            Grant::Closed => Err(ClientError::PoolClosed),
        }
    }

    /// Returns a lease to the pool.
    ///
    /// Healthy, live connections go to the next waiter or the idle set;
    /// anything else is closed and its capacity freed. A lease issued by a
    /// different pool is rejected and returned to its own pool.
    pub fn release(&self, mut lease: Lease<C>, healthy: bool) -> ClientResult<()> {
        if lease.pool.id != self.inner.id {
            return Err(ClientError::ForeignConnection);
        }
        if let Some(conn) = lease.conn.take() {
            self.inner.give_back(conn, healthy);
        }
        Ok(())
    }

    /// Closes idle connections and fails every waiting and future acquire.
    ///
    /// Leased connections are closed when their leases come back.
    pub fn dispose(&self) {
        let (idle, waiters) = {
            let mut state = self.inner.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let idle: Vec<_> = state.idle.drain(..).collect();
            state.total -= idle.len();
            let waiters: Vec<_> = state.waiters.drain(..).collect();
            (idle, waiters)
        };
        debug!(
            pool = self.inner.id,
            idle = idle.len(),
            waiters = waiters.len(),
            "disposing pool"
        );
        drop(idle);
        for waiter in waiters {
            let _ = waiter.send(Grant::Closed);
        }
    }
}

impl<C: Poolable> PoolInner<C> {
    fn lock(&self) -> MutexGuard<'_, PoolState<C>> {
        self.state.lock().expect("pool mutex poisoned")
    }

    /// Takes an idle connection or free capacity, or queues the caller.
    fn checkout<W>(&self, timeout: Option<Duration>, waiter: W) -> ClientResult<Checkout<C>>
    where
        W: FnOnce() -> WaiterTx<C>,
    {
        let mut state = self.lock();
        if state.closed {
            return Err(ClientError::PoolClosed);
        }

        // Most recently returned first; stale or dead entries are dropped here.
        while let Some(mut entry) = state.idle.pop_back() {
            let expired = self
                .config
                .idle_timeout
                .map_or(false, |limit| entry.since.elapsed() >= limit);
            if expired || !entry.conn.is_alive() {
                trace!(pool = self.id, expired, "discarding idle connection");
                state.total -= 1;
                continue;
            }
            state.leased += 1;
            return Ok(Checkout::Ready(Grant::Connection(entry.conn)));
        }

        if state.total < self.config.max_size {
            state.total += 1;
            state.leased += 1;
            return Ok(Checkout::Ready(Grant::Slot));
        }

        if timeout == Some(Duration::ZERO) {
            return Err(ClientError::PoolExhausted);
        }

        let id = state.next_waiter;
        state.next_waiter += 1;
        state.waiters.push_back(Waiter { id, tx: waiter() });
        trace!(pool = self.id, waiter = id, queued = state.waiters.len(), "pool full, waiting");
        Ok(Checkout::Queued(id))
    }

    fn give_back(&self, mut conn: C, healthy: bool) {
        let mut state = self.lock();
        state.leased -= 1;
        if healthy && conn.is_alive() {
            self.recycle(&mut state, conn);
        } else {
            debug!(pool = self.id, "discarding broken connection");
            drop(conn);
            self.free_slot(&mut state);
        }
    }

    /// Parks or hands off a healthy connection that no caller owns.
    fn recycle(&self, state: &mut PoolState<C>, conn: C) {
        if state.closed {
            state.total -= 1;
            return;
        }
        match self.hand_off(state, Grant::Connection(conn)) {
            None => {}
            Some(Grant::Connection(mut conn)) => {
                if state.idle.len() < self.config.max_idle {
                    conn.on_checkin();
                    state.idle.push_back(IdleEntry {
                        conn,
                        since: Instant::now(),
                    });
                } else {
                    state.total -= 1;
                }
            }
            Some(_) => state.total -= 1,
        }
    }

    /// Passes freed capacity to the next waiter, or shrinks the pool.
    fn free_slot(&self, state: &mut PoolState<C>) {
        if state.closed || self.hand_off(state, Grant::Slot).is_some() {
            state.total -= 1;
        }
    }

    /// Offers `grant` to waiters in FIFO order; returns it if nobody took it.
    fn hand_off(&self, state: &mut PoolState<C>, mut grant: Grant<C>) -> Option<Grant<C>> {
        while let Some(waiter) = state.waiters.pop_front() {
            let id = waiter.id;
            match waiter.send(grant) {
                Ok(()) => {
                    trace!(pool = self.id, waiter = id, "handed off to waiter");
                    state.leased += 1;
                    return None;
                }
                Err(returned) => grant = returned,
            }
        }
        Some(grant)
    }

    /// Puts back a grant that reached a waiter who already gave up.
    fn return_grant(&self, state: &mut PoolState<C>, grant: Grant<C>) {
        match grant {
            Grant::Connection(mut conn) => {
                state.leased -= 1;
                if conn.is_alive() {
                    self.recycle(state, conn);
                } else {
                    self.free_slot(state);
                }
            }
            Grant::Slot => {
                state.leased -= 1;
                self.free_slot(state);
            }
            Grant::Closed => {}
        }
    }

    fn abandon_blocking(&self, id: u64, rx: &mpsc::Receiver<Wake<C>>) {
        let mut state = self.lock();
        if remove_waiter(&mut state, id) {
            return;
        }
        // Grants are sent under the lock, so one may already be queued here.
        while let Ok(wake) = rx.try_recv() {
            if let Wake::Grant(grant) = wake {
                self.return_grant(&mut state, grant);
            }
        }
    }

    fn abandon_async(&self, id: u64, mut rx: oneshot::Receiver<Grant<C>>) {
        let mut state = self.lock();
        if remove_waiter(&mut state, id) {
            return;
        }
        if let Ok(grant) = rx.try_recv() {
            self.return_grant(&mut state, grant);
        }
    }
}

fn remove_waiter<C>(state: &mut PoolState<C>, id: u64) -> bool {
    match state.waiters.iter().position(|w| w.id == id) {
        Some(pos) => {
            state.waiters.remove(pos);
            true
        }
        None => false,
    }
}

impl<C> Waiter<C> {
    fn send(self, grant: Grant<C>) -> Result<(), Grant<C>> {
        match self.tx {
            WaiterTx::Blocking(tx) => match tx.try_send(Wake::Grant(grant)) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(wake) | TrySendError::Disconnected(wake)) => match wake {
                    Wake::Grant(grant) => Err(grant),
                    Wake::Cancelled => Err(Grant::Closed),
                },
            },
            WaiterTx::Async(tx) => tx.send(grant),
        }
    }
}

enum WaitOutcome<C> {
    Granted(Grant<C>),
    Closed,
    TimedOut,
    Cancelled,
}

/// Queue position of an async waiter; dropping it leaves the queue cleanly.
struct AsyncWait<C: Poolable> {
    pool: Arc<PoolInner<C>>,
    id: u64,
    rx: Option<oneshot::Receiver<Grant<C>>>,
}

impl<C: Poolable> AsyncWait<C> {
    async fn wait(
        &mut self,
        deadline: Option<tokio::time::Instant>,
        cancel: Option<&CancellationToken>,
    ) -> ClientResult<Grant<C>> {
        let outcome = match self.rx.as_mut() {
            None => WaitOutcome::Closed,
            Some(rx) => tokio::select! {
                received = rx => match received {
                    Ok(grant) => WaitOutcome::Granted(grant),
                    Err(_) => WaitOutcome::Closed,
                },
                _ = sleep_until(deadline) => WaitOutcome::TimedOut,
                _ = cancel::wait_cancelled(cancel) => WaitOutcome::Cancelled,
            },
        };

        match outcome {
            WaitOutcome::Granted(grant) => {
                self.rx = None;
                Ok(grant)
            }
            WaitOutcome::Closed => {
                self.rx = None;
                Err(ClientError::PoolClosed)
            }
            WaitOutcome::TimedOut => {
                self.leave();
                Err(ClientError::PoolExhausted)
            }
            WaitOutcome::Cancelled => {
                self.leave();
                Err(ClientError::Cancelled)
            }
        }
    }

    fn leave(&mut self) {
        if let Some(rx) = self.rx.take() {
            self.pool.abandon_async(self.id, rx);
        }
    }
}

impl<C: Poolable> Drop for AsyncWait<C> {
    fn drop(&mut self) {
        self.leave();
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Capacity reserved while a replacement connection is being built.
struct SlotGuard<C: Poolable> {
    pool: Option<Arc<PoolInner<C>>>,
}

impl<C: Poolable> SlotGuard<C> {
    fn new(pool: Arc<PoolInner<C>>) -> Self {
        SlotGuard { pool: Some(pool) }
    }

    fn fill(mut self, conn: C) -> Lease<C> {
        match self.pool.take() {
            Some(pool) => Lease::new(pool, conn),
            None => unreachable!("slot guard filled twice"),
        }
    }
}

impl<C: Poolable> Drop for SlotGuard<C> {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            let mut state = pool.lock();
            state.leased -= 1;
            pool.free_slot(&mut state);
        }
    }
}

/// RAII wrapper returning a connection to the pool on drop.
///
/// On drop the connection's own liveness decides whether it is parked or
/// discarded; use [`Pool::release`] to state health explicitly.
pub struct Lease<C: Poolable> {
    pool: Arc<PoolInner<C>>,
    conn: Option<C>,
}

impl<C: Poolable> Lease<C> {
    fn new(pool: Arc<PoolInner<C>>, mut conn: C) -> Self {
        conn.on_checkout();
        Lease {
            pool,
            conn: Some(conn),
        }
    }
}

impl<C: Poolable> Deref for Lease<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn.as_ref().expect("connection exists")
    }
}

impl<C: Poolable> DerefMut for Lease<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("connection exists")
    }
}

impl<C: Poolable> Drop for Lease<C> {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let healthy = conn.is_alive();
            self.pool.give_back(conn, healthy);
        }
    }
}
