use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    destroyed: AtomicUsize,
}

#[derive(Clone, Default)]
struct CountingFactory {
    counters: Arc<Counters>,
}

#[async_trait]
impl ResourceFactory for CountingFactory {
    type Resource = usize;

    async fn create(&self) -> CaptureResult<usize> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(self.counters.created.fetch_add(1, Ordering::SeqCst))
    }

    async fn destroy(&self, _resource: usize) {
        self.counters.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

fn opts(min: usize, max: usize) -> PoolOpts {
    PoolOpts {
        min,
        max,
        idle_timeout: Duration::from_millis(500),
        acquire_timeout: Duration::from_secs(5),
        reap_interval: Duration::from_millis(100),
    }
}

#[tokio::test(start_paused = true)]
async fn released_resources_are_reused() {
    let factory = CountingFactory::default();
    let pool = Pool::new(factory.clone(), opts(0, 2)).unwrap();

    let a = pool.acquire().await.unwrap();
    let id = *a;
    pool.release(a);
    let b = pool.acquire().await.unwrap();
    assert_eq!(*b, id);
    assert_eq!(factory.counters.created.load(Ordering::SeqCst), 1);
    assert_eq!(
        pool.stats(),
        PoolStats {
            idle: 0,
            leased: 1,
            total: 1
        }
    );
}

#[tokio::test(start_paused = true)]
async fn never_leases_more_than_max() {
    let factory = CountingFactory::default();
    let pool = Arc::new(Pool::new(factory.clone(), opts(0, 3)).unwrap());
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..12 {
        let pool = Arc::clone(&pool);
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        tasks.push(tokio::spawn(async move {
            let lease = pool.acquire().await.unwrap();
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            pool.release(lease);
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(factory.counters.created.load(Ordering::SeqCst) <= 3);
    assert!(pool.stats().total <= 3);
}

#[tokio::test(start_paused = true)]
async fn excess_callers_time_out() {
    let mut o = opts(0, 1);
    o.acquire_timeout = Duration::from_millis(250);
    let pool = Pool::new(CountingFactory::default(), o).unwrap();

    let held = pool.acquire().await.unwrap();
    let started = Instant::now();
    let err = pool.acquire().await.err().unwrap();
    assert!(matches!(err, CaptureError::ResourceAcquireTimeout(_)));
    assert!(started.elapsed() >= Duration::from_millis(250));
    drop(held);

    // Once released, the next caller gets it.
    assert!(pool.acquire().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn idle_resources_are_evicted_but_leased_ones_are_not() {
    let factory = CountingFactory::default();
    let pool = Pool::new(factory.clone(), opts(0, 2)).unwrap();

    let kept = pool.acquire().await.unwrap();
    let idle = pool.acquire().await.unwrap();
    pool.release(idle);

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(factory.counters.destroyed.load(Ordering::SeqCst), 1);
    let st = pool.stats();
    assert_eq!(st.idle, 0);
    assert_eq!(st.leased, 1);
    assert_eq!(st.total, 1);
    drop(kept);
}

#[tokio::test(start_paused = true)]
async fn warm_pool_keeps_min_alive() {
    let factory = CountingFactory::default();
    let pool = Pool::new(factory.clone(), opts(2, 4)).unwrap();
    pool.warm().await.unwrap();
    assert_eq!(pool.stats().idle, 2);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(pool.evict_idle().await, 0);
    assert_eq!(pool.stats().total, 2);
    assert_eq!(factory.counters.destroyed.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn discarded_leases_are_destroyed() {
    let factory = CountingFactory::default();
    let pool = Pool::new(factory.clone(), opts(0, 1)).unwrap();
    let lease = pool.acquire().await.unwrap();
    lease.discard().await;
    assert_eq!(factory.counters.destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(pool.stats(), PoolStats::default());

    let again = pool.acquire().await.unwrap();
    assert_eq!(*again, 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_destroys_idle_and_rejects_new_leases() {
    let factory = CountingFactory::default();
    let pool = Pool::new(factory.clone(), opts(0, 2)).unwrap();
    let a = pool.acquire().await.unwrap();
    pool.release(a);
    pool.shutdown().await;
    assert_eq!(factory.counters.destroyed.load(Ordering::SeqCst), 1);
    assert!(pool.acquire().await.is_err());
}

#[test]
fn rejects_inverted_bounds() {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async {
        assert!(Pool::new(CountingFactory::default(), opts(3, 2)).is_err());
        assert!(Pool::new(CountingFactory::default(), opts(0, 0)).is_err());
    });
}
