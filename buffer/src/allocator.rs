//! The allocation contract and the process-wide pools.
//!
//! Every pool-backed [crate::ByteBuffer] asks an [Allocator] for its memory and hands it back
//! when the last reference to that memory is released. Two allocators are always reachable:
//!
//! - the shared pool ([shared_pool]), created on first use with [SharedPoolConfig::default]
//! - the transport pool ([transport_pool]), which only exists once
//!   [configure_transport_pool] has been called
//!
//! When a preferred allocator cannot serve a request, [Allocation::from_pool] falls back to the
//! shared pool and then to plain heap memory. Callers never see an allocation failure.

use crate::pool::{SharedPool, SharedPoolConfig, TransportPool, TransportPoolConfig};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// A source of reusable byte regions.
///
/// Implementations must be safe to call from any thread: the last handle on a region may be
/// released far from where the region was taken.
pub trait Allocator: Send + Sync {
    /// Takes a region of at least `size` bytes, or `None` if the request cannot be served.
    ///
    /// `None` is a valid outcome (exhaustion, oversized request) and never a fatal error.
    fn take(&self, size: usize) -> Option<Box<[u8]>>;

    /// Returns a region previously obtained from [Allocator::take].
    fn recycle(&self, region: Box<[u8]>);
}

/// A freshly obtained region paired with the allocator it must be returned to.
///
/// `pool` is `None` when the region is plain heap memory that is simply dropped on release.
pub struct Allocation {
    pub bytes: Box<[u8]>,
    pub pool: Option<Arc<dyn Allocator>>,
}

impl Allocation {
    /// Allocates `size` zeroed bytes from the heap, outside any pool.
    pub fn heap(size: usize) -> Self {
        Self {
            bytes: vec![0u8; size].into_boxed_slice(),
            pool: None,
        }
    }

    /// Takes `size` bytes from `preferred`, falling back to the shared pool and then the heap.
    ///
    /// A region shorter than `size` counts as a refusal and is handed straight back.
    pub fn from_pool(size: usize, preferred: &Arc<dyn Allocator>) -> Self {
        if let Some(bytes) = take_at_least(preferred, size) {
            return Self {
                bytes,
                pool: Some(preferred.clone()),
            };
        }

        let shared: Arc<dyn Allocator> = shared_pool().clone();
        if !std::ptr::addr_eq(Arc::as_ptr(preferred), Arc::as_ptr(&shared)) {
            if let Some(bytes) = take_at_least(&shared, size) {
                debug!(size, "preferred pool could not serve request, using shared pool");
                return Self {
                    bytes,
                    pool: Some(shared),
                };
            }
        }

        warn!(size, "shared pool exhausted, allocating from heap");
        Self::heap(size)
    }
}

fn take_at_least(pool: &Arc<dyn Allocator>, size: usize) -> Option<Box<[u8]>> {
    let bytes = pool.take(size)?;
    if bytes.len() < size {
        warn!(size, len = bytes.len(), "allocator returned a short region");
        pool.recycle(bytes);
        return None;
    }
    Some(bytes)
}

static SHARED_POOL: OnceLock<Arc<SharedPool>> = OnceLock::new();
static TRANSPORT_POOL: OnceLock<Arc<TransportPool>> = OnceLock::new();

/// Returns the process-wide shared pool, creating it on first use.
pub fn shared_pool() -> &'static Arc<SharedPool> {
    SHARED_POOL.get_or_init(|| Arc::new(SharedPool::new(SharedPoolConfig::default())))
}

/// Returns the process-wide transport pool, if it has been configured.
pub fn transport_pool() -> Option<&'static Arc<TransportPool>> {
    TRANSPORT_POOL.get()
}

/// Creates the process-wide transport pool.
///
/// Only the first call (across all threads) installs a pool; every later call is a no-op that
/// leaves the existing pool in place. Returns whether this call installed the pool.
pub fn configure_transport_pool(config: TransportPoolConfig) -> bool {
    let mut installed = false;
    TRANSPORT_POOL.get_or_init(|| {
        installed = true;
        debug!(
            buffer_size = config.buffer_size.get(),
            max_count = config.max_count.get(),
            "configured transport pool"
        );
        Arc::new(TransportPool::new(config))
    });
    installed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Refuses every request.
    struct Empty {
        asked: AtomicUsize,
    }

    impl Allocator for Empty {
        fn take(&self, _: usize) -> Option<Box<[u8]>> {
            self.asked.fetch_add(1, Ordering::Relaxed);
            None
        }

        fn recycle(&self, _: Box<[u8]>) {
            panic!("nothing was taken");
        }
    }

    #[test]
    fn test_preferred_pool_is_used() {
        let shared: Arc<dyn Allocator> = shared_pool().clone();
        let allocation = Allocation::from_pool(64, &shared);
        assert!(allocation.bytes.len() >= 64);
        let pool = allocation.pool.expect("shared pool should serve the request");
        assert!(std::ptr::addr_eq(Arc::as_ptr(&pool), Arc::as_ptr(&shared)));
        pool.recycle(allocation.bytes);
    }

    #[test]
    fn test_exhausted_pool_falls_back_to_shared() {
        let empty = Arc::new(Empty {
            asked: AtomicUsize::new(0),
        });
        let preferred: Arc<dyn Allocator> = empty.clone();
        let allocation = Allocation::from_pool(64, &preferred);

        assert_eq!(empty.asked.load(Ordering::Relaxed), 1);
        let pool = allocation.pool.expect("shared pool should serve the request");
        let shared: Arc<dyn Allocator> = shared_pool().clone();
        assert!(std::ptr::addr_eq(Arc::as_ptr(&pool), Arc::as_ptr(&shared)));
        pool.recycle(allocation.bytes);
    }

    /// Hands out a single byte, whatever was asked for.
    #[derive(Default)]
    struct Short {
        recycled: AtomicUsize,
    }

    impl Allocator for Short {
        fn take(&self, _: usize) -> Option<Box<[u8]>> {
            Some(vec![0u8; 1].into_boxed_slice())
        }

        fn recycle(&self, region: Box<[u8]>) {
            assert_eq!(region.len(), 1);
            self.recycled.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_short_region_is_refused() {
        let short = Arc::new(Short::default());
        let preferred: Arc<dyn Allocator> = short.clone();
        let allocation = Allocation::from_pool(4096, &preferred);

        assert!(allocation.bytes.len() >= 4096);
        assert_eq!(short.recycled.load(Ordering::Relaxed), 1);
        let pool = allocation.pool.expect("shared pool should serve the request");
        assert!(!std::ptr::addr_eq(Arc::as_ptr(&pool), Arc::as_ptr(&preferred)));
        pool.recycle(allocation.bytes);
    }

    #[test]
    fn test_heap_allocation_has_no_pool() {
        let allocation = Allocation::heap(10);
        assert_eq!(allocation.bytes.len(), 10);
        assert!(allocation.pool.is_none());
    }

    #[test]
    fn test_transport_pool_configured_once() {
        let first = TransportPoolConfig {
            buffer_size: NZUsize!(2048),
            max_count: NZUsize!(16),
        };
        let second = TransportPoolConfig {
            buffer_size: NZUsize!(4096),
            max_count: NZUsize!(32),
        };

        let handles: Vec<_> = [first, second]
            .into_iter()
            .map(|config| std::thread::spawn(move || configure_transport_pool(config)))
            .collect();
        let installed = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|installed| *installed)
            .count();
        assert_eq!(installed, 1);

        let pool = transport_pool().expect("transport pool should exist");
        assert!([2048, 4096].contains(&pool.config().buffer_size.get()));
        assert!(!configure_transport_pool(TransportPoolConfig::for_network()));
    }
}
