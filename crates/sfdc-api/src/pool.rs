//! Session pool with discard support.
//!
//! The pool keeps two sets: `free` sessions ready for reuse and `busy`
//! sessions currently leased out. A session is in exactly one of them, or in
//! neither once discarded. Acquisition never waits: with nothing idle the
//! pool simply creates another session, so its size follows the peak
//! concurrency of its callers.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

/// Creates fresh sessions for a [`SessionPool`].
///
/// Construction must be cheap and must not touch the network; sessions
/// authenticate on first real use.
pub trait SessionFactory: Send + Sync {
    /// Session type handed out by the pool.
    type Session: Send + Sync + 'static;

    /// Create a new, unauthenticated session.
    fn create(&self) -> Self::Session;
}

/// Pool-assigned session identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Raw numeric id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Exclusive right to use one session until it is released or discarded.
pub struct Lease<S> {
    id: SessionId,
    session: Arc<S>,
}

impl<S> Lease<S> {
    /// Identity of the leased session.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Shared handle to the leased session.
    #[must_use]
    pub fn session(&self) -> Arc<S> {
        Arc::clone(&self.session)
    }
}

impl<S> Deref for Lease<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S> fmt::Debug for Lease<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").field("id", &self.id).finish()
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Idle sessions.
    pub free: usize,
    /// Leased sessions.
    pub busy: usize,
    /// Sessions ever created.
    pub created: u64,
    /// Sessions thrown away.
    pub discarded: u64,
}

struct PoolSets<S> {
    free: HashMap<SessionId, Arc<S>>,
    busy: HashMap<SessionId, Arc<S>>,
    discarded: u64,
}

impl<S> Default for PoolSets<S> {
    fn default() -> Self {
        Self {
            free: HashMap::new(),
            busy: HashMap::new(),
            discarded: 0,
        }
    }
}

/// A growable pool of interchangeable sessions.
pub struct SessionPool<F: SessionFactory> {
    factory: F,
    next_id: AtomicU64,
    sets: Mutex<PoolSets<F::Session>>,
}

impl<F: SessionFactory> fmt::Debug for SessionPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPool")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<F: SessionFactory> SessionPool<F> {
    /// Create an empty pool.
    #[must_use]
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            next_id: AtomicU64::new(0),
            sets: Mutex::new(PoolSets::default()),
        }
    }

    /// The session factory.
    #[must_use]
    pub const fn factory(&self) -> &F {
        &self.factory
    }

    /// Lease an idle session, creating one if none is idle. Never blocks on
    /// availability.
    pub fn acquire(&self) -> Lease<F::Session> {
        {
            let mut sets = self.sets.lock();
            let idle = sets.free.keys().next().copied();
            let reused = idle.and_then(|id| sets.free.remove(&id).map(|session| (id, session)));
            if let Some((id, session)) = reused {
                sets.busy.insert(id, Arc::clone(&session));
                drop(sets);
                debug!(session_id = %id, "Reusing idle session");
                return Lease { id, session };
            }
        }

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = Arc::new(self.factory.create());
        self.sets.lock().busy.insert(id, Arc::clone(&session));
        debug!(session_id = %id, "Created session");
        Lease { id, session }
    }

    /// Return a leased session to the idle set.
    ///
    /// Does nothing if the session was discarded in the meantime.
    pub fn release(&self, lease: &Lease<F::Session>) {
        let mut sets = self.sets.lock();
        if let Some(session) = sets.busy.remove(&lease.id) {
            sets.free.insert(lease.id, session);
            drop(sets);
            debug!(session_id = %lease.id, "Released session");
        } else {
            drop(sets);
            debug!(session_id = %lease.id, "Release of a session no longer in the pool ignored");
        }
    }

    /// Remove a session from the pool for good.
    pub fn discard(&self, lease: &Lease<F::Session>) {
        let mut sets = self.sets.lock();
        let removed =
            sets.busy.remove(&lease.id).is_some() | sets.free.remove(&lease.id).is_some();
        if removed {
            sets.discarded += 1;
        }
        drop(sets);
        debug!(session_id = %lease.id, removed, "Discarded session");
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let sets = self.sets.lock();
        PoolStats {
            free: sets.free.len(),
            busy: sets.busy.len(),
            created: self.next_id.load(Ordering::Relaxed),
            discarded: sets.discarded,
        }
    }

    /// Whether the session is currently idle in the pool.
    #[must_use]
    pub fn is_free(&self, id: SessionId) -> bool {
        self.sets.lock().free.contains_key(&id)
    }

    /// Whether the session is currently leased.
    #[must_use]
    pub fn is_busy(&self, id: SessionId) -> bool {
        self.sets.lock().busy.contains_key(&id)
    }

    /// Ids of idle sessions.
    #[must_use]
    pub fn free_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sets.lock().free.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Ids of leased sessions.
    #[must_use]
    pub fn busy_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sets.lock().busy.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
