use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::foundation::config::PoolConfig;
use crate::foundation::error::{CaptureError, CaptureResult};

/// Creates and tears down pooled resources (browser processes).
///
/// Creation and destruction are the only points where the pool blocks on the resource itself.
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    type Resource: Send + 'static;

    async fn create(&self) -> CaptureResult<Self::Resource>;

    async fn destroy(&self, resource: Self::Resource);
}

/// Pool sizing and deadlines.
#[derive(Clone, Debug)]
pub struct PoolOpts {
    /// Resources kept alive even when idle.
    pub min: usize,
    /// Upper bound on resources in existence (idle, leased or being destroyed).
    pub max: usize,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
    pub reap_interval: Duration,
}

impl From<&PoolConfig> for PoolOpts {
    fn from(cfg: &PoolConfig) -> Self {
        Self {
            min: cfg.min,
            max: cfg.max,
            idle_timeout: Duration::from_millis(cfg.idle_timeout_ms),
            acquire_timeout: Duration::from_millis(cfg.acquire_timeout_ms),
            reap_interval: Duration::from_millis(cfg.reap_interval_ms),
        }
    }
}

/// Point-in-time pool occupancy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub leased: usize,
    /// Everything that exists, including resources mid-creation or mid-destruction.
    pub total: usize,
}

struct IdleEntry<R> {
    resource: R,
    since: Instant,
}

struct PoolState<R> {
    // Oldest at the front; leases reuse the most recently released entry.
    idle: VecDeque<IdleEntry<R>>,
    leased: usize,
    total: usize,
    closed: bool,
}

struct PoolInner<F: ResourceFactory> {
    factory: F,
    opts: PoolOpts,
    state: Mutex<PoolState<F::Resource>>,
    // One permit per resource that is leased, being created, or being destroyed.
    permits: Arc<Semaphore>,
}

impl<F: ResourceFactory> PoolInner<F> {
    fn lock(&self) -> MutexGuard<'_, PoolState<F::Resource>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn create_reserved(&self) -> CaptureResult<F::Resource> {
        self.lock().total += 1;
        match self.factory.create().await {
            Ok(r) => Ok(r),
            Err(e) => {
                self.lock().total -= 1;
                Err(e)
            }
        }
    }

    async fn destroy_counted(&self, resource: F::Resource) {
        self.factory.destroy(resource).await;
        let mut st = self.lock();
        st.total = st.total.saturating_sub(1);
    }

    fn return_idle(self: &Arc<Self>, resource: F::Resource) {
        let mut st = self.lock();
        st.leased = st.leased.saturating_sub(1);
        if !st.closed {
            st.idle.push_back(IdleEntry {
                resource,
                since: Instant::now(),
            });
            return;
        }
        drop(st);

        // The pool was shut down while this lease was out.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(self);
                handle.spawn(async move { inner.destroy_counted(resource).await });
            }
            Err(_) => {
                drop(resource);
                let mut st = self.lock();
                st.total = st.total.saturating_sub(1);
            }
        }
    }

    /// Destroy idle resources older than the idle timeout, never dropping below `min`.
    async fn evict_idle(&self) -> usize {
        let mut evicted = 0;
        loop {
            // Hold a permit while destroying so a replacement cannot be created before the
            // process is gone.
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                break;
            };
            let victim = {
                let mut st = self.lock();
                let expired = st
                    .idle
                    .front()
                    .is_some_and(|e| e.since.elapsed() >= self.opts.idle_timeout);
                if st.total > self.opts.min && expired {
                    st.idle.pop_front().map(|e| e.resource)
                } else {
                    None
                }
            };
            let Some(resource) = victim else {
                break;
            };
            self.destroy_counted(resource).await;
            drop(permit);
            evicted += 1;
        }
        if evicted > 0 {
            tracing::debug!(evicted, "evicted idle pool resources");
        }
        evicted
    }
}

/// Bounded lease/release pool with idle eviction.
///
/// Guarantees: at most `max` resources exist at once, a resource is never leased to two callers,
/// and eviction only ever looks at idle resources.
pub struct Pool<F: ResourceFactory> {
    inner: Arc<PoolInner<F>>,
    reaper: JoinHandle<()>,
}

impl<F: ResourceFactory> Pool<F> {
    /// Build a pool and start its idle reaper. Must be called inside a tokio runtime.
    pub fn new(factory: F, opts: PoolOpts) -> CaptureResult<Self> {
        if opts.max == 0 {
            return Err(CaptureError::validation("pool max must be at least 1"));
        }
        if opts.min > opts.max {
            return Err(CaptureError::validation("pool min must be <= max"));
        }
        if opts.reap_interval.is_zero() {
            return Err(CaptureError::validation(
                "pool reap interval must be non-zero",
            ));
        }

        let inner = Arc::new(PoolInner {
            factory,
            permits: Arc::new(Semaphore::new(opts.max)),
            opts,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                leased: 0,
                total: 0,
                closed: false,
            }),
        });
        let reaper = tokio::spawn(reap_loop(
            Arc::downgrade(&inner),
            inner.opts.reap_interval,
        ));
        Ok(Self { inner, reaper })
    }

    pub fn opts(&self) -> &PoolOpts {
        &self.inner.opts
    }

    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    /// Create resources until `min` exist.
    pub async fn warm(&self) -> CaptureResult<()> {
        while self.inner.lock().total < self.inner.opts.min {
            let lease = self.acquire_fresh().await?;
            lease.release();
        }
        Ok(())
    }

    async fn acquire_fresh(&self) -> CaptureResult<Lease<F>> {
        let permit = self.acquire_permit().await?;
        let resource = self.inner.create_reserved().await?;
        self.inner.lock().leased += 1;
        Ok(Lease {
            resource: Some(resource),
            permit: Some(permit),
            inner: Arc::clone(&self.inner),
        })
    }

    async fn acquire_permit(&self) -> CaptureResult<OwnedSemaphorePermit> {
        let timeout = self.inner.opts.acquire_timeout;
        tokio::time::timeout(timeout, Arc::clone(&self.inner.permits).acquire_owned())
            .await
            .map_err(|_| CaptureError::ResourceAcquireTimeout(timeout))?
            .map_err(|_| CaptureError::validation("pool is shut down"))
    }

    /// Lease a resource, reusing an idle one or creating a new one while under `max`.
    ///
    /// Fails with [`CaptureError::ResourceAcquireTimeout`] once the acquire deadline passes.
    pub async fn acquire(&self) -> CaptureResult<Lease<F>> {
        let permit = self.acquire_permit().await?;
        let reused = {
            let mut st = self.inner.lock();
            if st.closed {
                return Err(CaptureError::validation("pool is shut down"));
            }
            st.idle.pop_back().map(|e| e.resource)
        };
        let resource = match reused {
            Some(r) => r,
            None => self.inner.create_reserved().await?,
        };
        self.inner.lock().leased += 1;
        Ok(Lease {
            resource: Some(resource),
            permit: Some(permit),
            inner: Arc::clone(&self.inner),
        })
    }

    /// Return a lease to the idle set. Equivalent to dropping it.
    pub fn release(&self, lease: Lease<F>) {
        lease.release();
    }

    pub fn stats(&self) -> PoolStats {
        let st = self.inner.lock();
        PoolStats {
            idle: st.idle.len(),
            leased: st.leased,
            total: st.total,
        }
    }

    /// Run one eviction pass now instead of waiting for the reaper.
    pub async fn evict_idle(&self) -> usize {
        self.inner.evict_idle().await
    }

    /// Stop handing out resources and destroy everything idle. Outstanding leases are destroyed
    /// when they come back.
    pub async fn shutdown(&self) {
        let idle: Vec<_> = {
            let mut st = self.inner.lock();
            st.closed = true;
            st.idle.drain(..).map(|e| e.resource).collect()
        };
        self.inner.permits.close();
        for resource in idle {
            self.inner.destroy_counted(resource).await;
        }
    }
}

impl<F: ResourceFactory> Drop for Pool<F> {
    fn drop(&mut self) {
        self.reaper.abort();
    }
}

async fn reap_loop<F: ResourceFactory>(inner: Weak<PoolInner<F>>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.evict_idle().await;
    }
}

/// Exclusive ownership of a pooled resource. Dropping the lease releases it.
pub struct Lease<F: ResourceFactory> {
    resource: Option<F::Resource>,
    permit: Option<OwnedSemaphorePermit>,
    inner: Arc<PoolInner<F>>,
}

impl<F: ResourceFactory> Lease<F> {
    pub fn release(mut self) {
        self.return_to_pool();
    }

    /// Destroy the resource instead of returning it, e.g. after the browser crashed.
    pub async fn discard(mut self) {
        if let Some(resource) = self.resource.take() {
            self.inner.lock().leased -= 1;
            self.inner.destroy_counted(resource).await;
        }
        drop(self.permit.take());
    }

    fn return_to_pool(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.inner.return_idle(resource);
        }
        // Release the permit only after the resource is visible as idle.
        drop(self.permit.take());
    }
}

impl<F: ResourceFactory> Deref for Lease<F> {
    type Target = F::Resource;

    fn deref(&self) -> &Self::Target {
        // Only `release`/`discard` take the resource, and both consume the lease.
        self.resource
            .as_ref()
            .unwrap_or_else(|| unreachable!("lease used after release"))
    }
}

impl<F: ResourceFactory> DerefMut for Lease<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource
            .as_mut()
            .unwrap_or_else(|| unreachable!("lease used after release"))
    }
}

impl<F: ResourceFactory> Drop for Lease<F> {
    fn drop(&mut self) {
        self.return_to_pool();
    }
}

#[cfg(test)]
#[path = "../../tests/unit/pool/resource_pool.rs"]
mod tests;
