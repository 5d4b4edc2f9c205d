//! Remote invocation with transparent session-expiry recovery.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::ApiResult;
use crate::pool::{Lease, SessionFactory, SessionPool};

/// A remote operation to run against a leased session.
///
/// Implemented for any `Fn(Arc<S>) -> impl Future<Output = ApiResult<T>>`,
/// so closures work directly. The call is made once per attempt and must be
/// safe to repeat after a session expiry.
pub trait RemoteCall<S>: Send + Sync {
    /// Successful result.
    type Output: Send;
    /// Future returned by one attempt.
    type Future: Future<Output = ApiResult<Self::Output>> + Send;

    /// Start one attempt on `session`.
    fn invoke(&self, session: Arc<S>) -> Self::Future;
}

impl<S, F, Fut, T> RemoteCall<S> for F
where
    F: Fn(Arc<S>) -> Fut + Send + Sync,
    Fut: Future<Output = ApiResult<T>> + Send,
    T: Send,
{
    type Output = T;
    type Future = Fut;

    fn invoke(&self, session: Arc<S>) -> Fut {
        self(session)
    }
}

/// Returns the lease to the pool if an attempt is dropped mid-flight.
struct LeaseGuard<'a, F: SessionFactory> {
    pool: &'a SessionPool<F>,
    lease: Option<Lease<F::Session>>,
}

impl<'a, F: SessionFactory> LeaseGuard<'a, F> {
    const fn new(pool: &'a SessionPool<F>, lease: Lease<F::Session>) -> Self {
        Self {
            pool,
            lease: Some(lease),
        }
    }

    fn release(mut self) {
        if let Some(lease) = self.lease.take() {
            self.pool.release(&lease);
        }
    }

    fn discard(mut self) {
        if let Some(lease) = self.lease.take() {
            self.pool.discard(&lease);
        }
    }
}

impl<F: SessionFactory> Drop for LeaseGuard<'_, F> {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            self.pool.release(&lease);
        }
    }
}

/// Runs remote calls through a [`SessionPool`], retrying on a fresh session
/// whenever the current one reports expiry.
///
/// There is no retry limit. A remote that keeps answering with expiry keeps
/// the invoker looping; every other failure is returned after one attempt.
pub struct RetryingInvoker<F: SessionFactory> {
    pool: Arc<SessionPool<F>>,
    retry_delay: Duration,
}

impl<F: SessionFactory> Clone for RetryingInvoker<F> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            retry_delay: self.retry_delay,
        }
    }
}

impl<F: SessionFactory> std::fmt::Debug for RetryingInvoker<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingInvoker")
            .field("pool", &self.pool)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl<F: SessionFactory> RetryingInvoker<F> {
    /// Create an invoker over a shared pool.
    #[must_use]
    pub const fn new(pool: Arc<SessionPool<F>>) -> Self {
        Self {
            pool,
            retry_delay: Duration::ZERO,
        }
    }

    /// Wait this long before retrying after an expiry.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &Arc<SessionPool<F>> {
        &self.pool
    }

    /// Run `call`, transparently replacing expired sessions.
    ///
    /// # Errors
    /// Returns the first failure that is not a session expiry.
    pub async fn invoke<C>(&self, call: C) -> ApiResult<C::Output>
    where
        C: RemoteCall<F::Session>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let lease = self.pool.acquire();
            let session_id = lease.id();
            let session = lease.session();
            let guard = LeaseGuard::new(&self.pool, lease);

            match call.invoke(session).await {
                Ok(output) => {
                    guard.release();
                    debug!(%session_id, attempt, "Remote call succeeded");
                    return Ok(output);
                }
                Err(err) if err.is_session_expired() => {
                    guard.discard();
                    warn!(%session_id, attempt, error = %err, "Session expired, retrying on another session");
                    if !self.retry_delay.is_zero() {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
                Err(err) => {
                    guard.release();
                    debug!(%session_id, attempt, error = %err, "Remote call failed");
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ApiError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Default)]
    struct Factory;

    #[derive(Debug, Default)]
    struct Session {
        calls: AtomicU32,
    }

    impl SessionFactory for Factory {
        type Session = Session;

        fn create(&self) -> Session {
            Session::default()
        }
    }

    fn invoker() -> RetryingInvoker<Factory> {
        RetryingInvoker::new(Arc::new(SessionPool::new(Factory)))
    }

    fn expired() -> ApiError {
        ApiError::from_status(401, "https://x", "INVALID_SESSION_ID")
    }

    #[tokio::test]
    async fn success_releases_session() {
        let invoker = invoker();
        let value = invoker
            .invoke(|s: Arc<Session>| async move {
                s.calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ApiError>(7)
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        let stats = invoker.pool().stats();
        assert_eq!((stats.free, stats.busy, stats.discarded), (1, 0, 0));
    }

    #[tokio::test]
    async fn expiry_discards_and_retries_on_fresh_session() {
        let invoker = invoker();
        let remaining_failures = Arc::new(AtomicU32::new(2));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let value = invoker
            .invoke({
                let remaining_failures = Arc::clone(&remaining_failures);
                let seen = Arc::clone(&seen);
                move |s: Arc<Session>| {
                    let remaining_failures = Arc::clone(&remaining_failures);
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.lock().push(Arc::as_ptr(&s) as usize);
                        if remaining_failures
                            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                            .is_ok()
                        {
                            Err(expired())
                        } else {
                            Ok("done")
                        }
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "done");
        let stats = invoker.pool().stats();
        assert_eq!(stats.discarded, 2);
        assert_eq!(stats.created, 3);
        assert_eq!((stats.free, stats.busy), (1, 0));
        assert_eq!(seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn other_errors_propagate_without_retry() {
        let invoker = invoker();
        let attempts = Arc::new(AtomicU32::new(0));

        let err = invoker
            .invoke({
                let attempts = Arc::clone(&attempts);
                move |_s: Arc<Session>| {
                    let attempts = Arc::clone(&attempts);
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(ApiError::from_status(404, "https://x/y", "[]"))
                    }
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::ResourceNotFound { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        let stats = invoker.pool().stats();
        assert_eq!((stats.free, stats.busy, stats.discarded), (1, 0, 0));
    }

    #[tokio::test]
    async fn dropped_call_returns_session_to_pool() {
        let invoker = invoker();
        let fut = invoker.invoke(|_s: Arc<Session>| async move {
            std::future::pending::<()>().await;
            Ok::<_, ApiError>(())
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(10), fut).await;

        assert!(timed_out.is_err());
        let stats = invoker.pool().stats();
        assert_eq!((stats.free, stats.busy), (1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_delay_is_applied() {
        let invoker = invoker().with_retry_delay(Duration::from_secs(5));
        let failed = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();

        invoker
            .invoke({
                let failed = Arc::clone(&failed);
                move |_s: Arc<Session>| {
                    let failed = Arc::clone(&failed);
                    async move {
                        if failed.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(expired())
                        } else {
                            Ok(())
                        }
                    }
                }
            })
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
