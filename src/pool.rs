use std::{
    collections::VecDeque,
    hash::Hash,
    sync::{Arc, Weak},
    time::Duration,
};

use ahash::AHashMap;
use rand::seq::SliceRandom;
use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, trace, warn};

use crate::{error::Error, protocol::Protocol, trace::Trace};

/// Bound required of a pool key: cheap to clone, usable as a hash-map key.
/// `EndpointKey` satisfies this; the blanket impl lets any such type stand
/// in, e.g. in tests.
pub trait Key: Clone + Eq + Hash + Send + Sync + 'static {}
impl<T: Clone + Eq + Hash + Send + Sync + 'static> Key for T {}

/// Pool-wide tunables. `limit` and `limit_per_host` both count every
/// connection the pool knows about for a key, idle or leased out, so
/// closing the idle half of the budget is what makes room for new
/// connections, not just busy-connection counts.
#[derive(Debug, Clone)]
pub struct Config {
    /// How long an idle connection may sit before the reaper closes it.
    /// `None` disables the reaper; idle connections live until reused or
    /// force-closed.
    pub idle_timeout: Option<Duration>,
    /// Global cap on total (idle + leased) connections. `None` is
    /// unlimited.
    pub limit: Option<usize>,
    /// Per-key cap on total connections. `0` is unlimited.
    pub limit_per_host: usize,
    /// Every `release` discards instead of pooling, regardless of what
    /// `Protocol::should_close` reports. Mutually exclusive with an
    /// explicit `idle_timeout`; validated at construction.
    pub force_close: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            idle_timeout: Some(Duration::from_secs(15)),
            limit: Some(100),
            limit_per_host: 0,
            force_close: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(limit) = self.limit {
            if limit == 0 {
                return Err(Error::ConfigurationError(
                    "limit must be greater than zero, or None for unlimited".into(),
                ));
            }
        }
        if self.force_close && self.idle_timeout.is_some() {
            return Err(Error::ConfigurationError(
                "force_close cannot be combined with an explicit idle_timeout".into(),
            ));
        }
        Ok(())
    }
}

struct IdleEntry<T> {
    value: T,
    idle_at: Instant,
}

struct PoolInner<T, K> {
    idle: AHashMap<K, Vec<IdleEntry<T>>>,
    waiters: AHashMap<K, VecDeque<oneshot::Sender<()>>>,
    total_per_key: AHashMap<K, usize>,
    total: usize,
    closed: bool,
}

impl<T, K: Key> PoolInner<T, K> {
    fn new() -> Self {
        PoolInner {
            idle: AHashMap::default(),
            waiters: AHashMap::default(),
            total_per_key: AHashMap::default(),
            total: 0,
            closed: false,
        }
    }

    fn reserve(&mut self, key: &K) {
        self.total += 1;
        *self.total_per_key.entry(key.clone()).or_insert(0) += 1;
    }

    fn release_slot(&mut self, key: &K) {
        self.total = self.total.saturating_sub(1);
        if let Some(count) = self.total_per_key.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.total_per_key.remove(key);
            }
        }
    }

    fn has_capacity(&self, config: &Config, key: &K) -> bool {
        if let Some(limit) = config.limit {
            if self.total >= limit {
                return false;
            }
        }
        if config.limit_per_host > 0 {
            let per = self.total_per_key.get(key).copied().unwrap_or(0);
            if per >= config.limit_per_host {
                return false;
            }
        }
        true
    }

    fn key_ready(&self, config: &Config, key: &K) -> bool {
        let idle_nonempty = self.idle.get(key).is_some_and(|v| !v.is_empty());
        idle_nonempty || self.has_capacity(config, key)
    }

    /// Pop the most recently released live connection for `key`, if any.
    /// Expired or dead entries encountered along the way are appended to
    /// `expired` (slot already freed) rather than returned.
    fn pop_idle(&mut self, key: &K, idle_timeout: Option<Duration>, expired: &mut Vec<T>) -> Option<T> {
        let now = Instant::now();
        let stack = self.idle.get_mut(key)?;
        let found = loop {
            let entry = stack.pop()?;
            let too_old = idle_timeout.is_some_and(|timeout| now.checked_duration_since(entry.idle_at).unwrap_or(Duration::ZERO) > timeout);
            if too_old || !entry.value.is_connected() {
                self.release_slot(key);
                expired.push(entry.value);
                continue;
            }
            break entry.value;
        };
        if stack.is_empty() {
            self.idle.remove(key);
        }
        Some(found)
    }

    /// Wake exactly one waiter whose key has either a freshly available
    /// idle connection or open capacity, scanning keys in random order so
    /// no single busy endpoint starves the others.
    fn wake_one(&mut self, config: &Config) {
        let mut candidates: Vec<K> = self
            .waiters
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(k, _)| k.clone())
            .collect();
        candidates.shuffle(&mut rand::thread_rng());
        for key in candidates {
            if !self.key_ready(config, &key) {
                continue;
            }
            let Some(queue) = self.waiters.get_mut(&key) else {
                continue;
            };
            // A waiter's task may have been cancelled already, in which
            // case its receiver is gone and `send` fails; skip past those
            // instead of giving up on the whole key.
            let mut woke = false;
            while let Some(tx) = queue.pop_front() {
                if tx.send(()).is_ok() {
                    woke = true;
                    break;
                }
            }
            if queue.is_empty() {
                self.waiters.remove(&key);
            }
            if woke {
                return;
            }
        }
    }
}

struct Shared<T, K> {
    inner: crate::sync::Mutex<PoolInner<T, K>>,
    config: Config,
}

/// A reservation against `limit`/`limit_per_host` held across an
/// in-flight dial. Consumed by [`Pool::adopt`] once the dial succeeds; if
/// dropped first — a dial or handshake error propagated via `?`, or the
/// acquiring task being cancelled — it releases the slot and wakes a
/// waiter itself, so a failed dial never wedges a key the way a bare
/// counter bump with no release path would (spec §4.1 step 3, §5
/// cancellation).
pub struct Permit<T: Protocol, K: Key> {
    key: K,
    pool: Weak<Shared<T, K>>,
    consumed: bool,
}

impl<T: Protocol, K: Key> Drop for Permit<T, K> {
    fn drop(&mut self) {
        if self.consumed {
            return;
        }
        let Some(shared) = self.pool.upgrade() else {
            return;
        };
        let mut guard = shared.inner.lock();
        guard.release_slot(&self.key);
        guard.wake_one(&shared.config);
    }
}

/// What `acquire` handed back: either a live connection pulled from the
/// idle list, or a [`Permit`] meaning the caller must dial a new one and
/// hand both the permit and the result to [`Pool::adopt`].
pub enum Lease<T: Protocol, K: Key> {
    Reused(T),
    Permit(Permit<T, K>),
}

/// Connection pool keyed by `K`, holding values of type `T: Protocol`.
///
/// Cloning a `Pool` is cheap and shares the same underlying bookkeeping;
/// the background reaper task is tied to the last clone's lifetime via an
/// `Arc`, and is aborted when it is dropped.
pub struct Pool<T: Protocol, K: Key> {
    shared: Arc<Shared<T, K>>,
    reaper: Arc<tokio::task::JoinHandle<()>>,
}

impl<T: Protocol, K: Key> Clone for Pool<T, K> {
    fn clone(&self) -> Self {
        Pool {
            shared: self.shared.clone(),
            reaper: self.reaper.clone(),
        }
    }
}

impl<T: Protocol, K: Key> Pool<T, K> {
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;
        let shared = Arc::new(Shared {
            inner: crate::sync::Mutex::new(PoolInner::new()),
            config,
        });
        let reaper = Arc::new(spawn_reaper(shared.clone()));
        Ok(Pool { shared, reaper })
    }

    /// Acquire a slot for `key`: either an idle connection ready for reuse,
    /// or a bare permit to dial a new one. Waits if the pool is at
    /// capacity for this key or globally.
    pub async fn acquire(&self, key: &K, trace: &Trace) -> Result<Lease<T, K>, Error> {
        let mut queued = false;
        loop {
            let mut expired = Vec::new();
            let outcome = {
                let mut guard = self.shared.inner.lock();
                if guard.closed {
                    return Err(Error::ConnectorClosed);
                }
                // Fairness condition C: a key with a nonempty waiter queue
                // never lets a fresh (or re-looping) acquire take a slot
                // out of turn — only the head waiter being woken may
                // proceed, via its own turn through this same loop.
                let jump_queue = !queued && guard.waiters.get(key).is_some_and(|q| !q.is_empty());
                if jump_queue {
                    None
                } else if let Some(value) = guard.pop_idle(key, self.shared.config.idle_timeout, &mut expired) {
                    guard.wake_one(&self.shared.config);
                    Some(Ok(Lease::Reused(value)))
                } else if guard.has_capacity(&self.shared.config, key) {
                    guard.reserve(key);
                    let permit = Permit {
                        key: key.clone(),
                        pool: Arc::downgrade(&self.shared),
                        consumed: false,
                    };
                    Some(Ok(Lease::Permit(permit)))
                } else {
                    None
                }
            };

            for dead in expired {
                dead.close().await;
            }

            match outcome {
                Some(result) => {
                    if queued {
                        trace.queued_end().await;
                    }
                    if let Ok(Lease::Reused(_)) = &result {
                        trace.reuse_conn().await;
                    }
                    return result;
                }
                None => {
                    let rx = {
                        let mut guard = self.shared.inner.lock();
                        let (tx, rx) = oneshot::channel();
                        guard.waiters.entry(key.clone()).or_default().push_back(tx);
                        rx
                    };
                    if !queued {
                        queued = true;
                        trace.queued_start().await;
                    }
                    trace!("pool at capacity, waiting for a slot");
                    if rx.await.is_err() {
                        warn!("pool waiter dropped without being woken");
                    }
                }
            }
        }
    }

    /// Hand a freshly dialed connection to the pool for bookkeeping,
    /// consuming the [`Permit`] that reserved its slot and wrapping the
    /// connection in a [`Handle`] that releases it back on drop.
    pub fn adopt(&self, mut permit: Permit<T, K>, value: T) -> Handle<T, K> {
        permit.consumed = true;
        Handle {
            value: Some(value),
            key: permit.key.clone(),
            pool: permit.pool.clone(),
            released: false,
            release_callbacks: Vec::new(),
        }
    }

    /// Wrap a `Lease::Reused` connection in a [`Handle`] so it can be
    /// released back to the pool like any other. No reservation to
    /// consume here: reuse never calls `reserve` in the first place, since
    /// `total`/`total_per_key` already counted this connection as live
    /// while it sat idle.
    pub fn adopt_reused(&self, key: K, value: T) -> Handle<T, K> {
        Handle {
            value: Some(value),
            key,
            pool: Arc::downgrade(&self.shared),
            released: false,
            release_callbacks: Vec::new(),
        }
    }

    /// Current number of live connections (idle + leased) for `key`.
    pub fn connections(&self, key: &K) -> usize {
        self.shared.inner.lock().total_per_key.get(key).copied().unwrap_or(0)
    }

    /// Current total number of live connections across all keys.
    pub fn total_connections(&self) -> usize {
        self.shared.inner.lock().total
    }

    /// The tunables this pool was constructed with.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Close every idle connection and mark the pool closed; subsequent
    /// `acquire` calls fail with [`Error::ConnectorClosed`]. In-flight
    /// leased connections are unaffected until released, at which point
    /// they are discarded rather than pooled.
    pub async fn close(&self) {
        let drained = {
            let mut guard = self.shared.inner.lock();
            guard.closed = true;
            let mut drained = Vec::new();
            for (_, stack) in guard.idle.drain() {
                for entry in stack {
                    drained.push(entry.value);
                }
            }
            guard.total_per_key.clear();
            guard.total = 0;
            // Drop every parked waiter's sender so its `acquire` call wakes
            // (with a recv error), loops, and observes `closed`.
            guard.waiters.clear();
            drained
        };
        for value in drained {
            value.close().await;
        }
    }
}

impl<T: Protocol, K: Key> Drop for Pool<T, K> {
    fn drop(&mut self) {
        if Arc::strong_count(&self.reaper) == 1 {
            self.reaper.abort();
        }
    }
}

fn spawn_reaper<T: Protocol, K: Key>(shared: Arc<Shared<T, K>>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let Some(idle_timeout) = shared.config.idle_timeout else {
            return;
        };
        let mut interval = tokio::time::interval(idle_timeout.max(Duration::from_millis(100)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let expired = {
                let mut guard = shared.inner.lock();
                if guard.closed {
                    return;
                }
                let now = Instant::now();
                let mut expired = Vec::new();
                let keys: Vec<K> = guard.idle.keys().cloned().collect();
                for key in keys {
                    let Some(stack) = guard.idle.get_mut(&key) else {
                        continue;
                    };
                    let mut kept = Vec::with_capacity(stack.len());
                    let mut evicted_here = 0usize;
                    for entry in stack.drain(..) {
                        let too_old = now.checked_duration_since(entry.idle_at).unwrap_or(Duration::ZERO) > idle_timeout;
                        if too_old || !entry.value.is_connected() {
                            evicted_here += 1;
                            expired.push(entry.value);
                        } else {
                            kept.push(entry);
                        }
                    }
                    if kept.is_empty() {
                        guard.idle.remove(&key);
                    } else {
                        *stack = kept;
                    }
                    for _ in 0..evicted_here {
                        guard.release_slot(&key);
                    }
                }
                if !expired.is_empty() {
                    debug!(count = expired.len(), "reaper evicted idle connections");
                }
                expired
            };
            if !expired.is_empty() {
                let mut guard = shared.inner.lock();
                guard.wake_one(&shared.config);
                drop(guard);
                for value in expired {
                    value.close().await;
                }
            }
        }
    })
}

/// A leased connection. Dropping it without calling [`Handle::release`]
/// returns the value to the pool as if it were still healthy; callers that
/// know better (e.g. the protocol signaled `should_close`) get the same
/// treatment automatically since `release` consults `Protocol` itself.
pub struct Handle<T: Protocol, K: Key> {
    value: Option<T>,
    key: K,
    pool: Weak<Shared<T, K>>,
    released: bool,
    release_callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

impl<T: Protocol, K: Key> Handle<T, K> {
    pub fn get(&self) -> &T {
        self.value.as_ref().expect("Handle value taken")
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("Handle value taken")
    }

    /// Register a callback that fires exactly once, on whichever of
    /// `release`, `close`, or the eventual `Drop` happens first. A
    /// callback that panics is caught and logged rather than propagated,
    /// so one bad callback can't stop the others from running or stop the
    /// connection itself from being released.
    pub fn add_release_callback<F>(&mut self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.release_callbacks.push(Box::new(callback));
    }

    /// True once this handle has released its connection back to the
    /// pool (via `release`, `close`, or drop), or if the underlying
    /// connection is no longer connected.
    pub fn closed(&self) -> bool {
        self.released || !self.value.as_ref().is_some_and(Protocol::is_connected)
    }

    /// Return the connection to the pool (idle reuse if still healthy,
    /// discarded otherwise). Idempotent; subsequent calls and the eventual
    /// `Drop` are no-ops.
    pub fn release(&mut self) {
        self.release_inner();
    }

    /// Force discard on release regardless of `Protocol::should_close`.
    pub fn close(&mut self) {
        if let Some(value) = self.value.as_ref() {
            value.force_close();
        }
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for callback in self.release_callbacks.drain(..) {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)).is_err() {
                warn!("handle release callback panicked; suppressing");
            }
        }
        let Some(value) = self.value.take() else {
            return;
        };
        let Some(shared) = self.pool.upgrade() else {
            tokio::spawn(async move { value.close().await });
            return;
        };
        release_value(shared, self.key.clone(), value);
    }
}

impl<T: Protocol, K: Key> Drop for Handle<T, K> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

fn release_value<T: Protocol, K: Key>(shared: Arc<Shared<T, K>>, key: K, value: T) {
    let mut to_close = None;
    {
        let mut guard = shared.inner.lock();
        let keep_alive = !guard.closed && !shared.config.force_close && value.is_connected() && !value.should_close();
        if keep_alive {
            guard.idle.entry(key).or_default().push(IdleEntry {
                value,
                idle_at: Instant::now(),
            });
        } else {
            guard.release_slot(&key);
            to_close = Some(value);
        }
        guard.wake_one(&shared.config);
    }
    if let Some(value) = to_close {
        tokio::spawn(async move {
            value.close().await;
        });
    }
}
