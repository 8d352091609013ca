//! Pools of reusable byte regions.
//!
//! Two [Allocator]s are provided:
//! - [SharedPool]: power-of-two size classes from `min_size` to `max_size`. Requests larger than
//!   `max_size` are served by a fresh, untracked allocation so callers never hit a size ceiling.
//! - [TransportPool]: a single class of `buffer_size` regions, capped at `max_count` outstanding
//!   regions. Oversized requests and exhaustion are reported by returning `None`.
//!
//! # Thread Safety
//!
//! Both pools are `Send + Sync`. Taking and recycling are lock-free, using atomic counters and a
//! lock-free queue ([crossbeam_queue::ArrayQueue]) per size class.
//!
//! # Size Classes
//!
//! With `min_size = 256` and `max_size = 2048`:
//! - Class 0: 256 bytes
//! - Class 1: 512 bytes
//! - Class 2: 1024 bytes
//! - Class 3: 2048 bytes
//!
//! Requests are rounded up to the next size class, so the region handed out may be larger than
//! requested.

use crate::Allocator;
use crossbeam_queue::ArrayQueue;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::trace;

/// Configuration for a [SharedPool].
#[derive(Debug, Clone)]
pub struct SharedPoolConfig {
    /// Smallest region handed out. Must be a power of two.
    pub min_size: NonZeroUsize,
    /// Largest pooled region. Must be a power of two and >= `min_size`.
    pub max_size: NonZeroUsize,
    /// Maximum number of regions per size class.
    pub max_per_class: NonZeroUsize,
}

impl Default for SharedPoolConfig {
    /// 256 B to 1 MiB regions, 1024 per class.
    fn default() -> Self {
        Self {
            min_size: NZUsize!(256),
            max_size: NZUsize!(1024 * 1024),
            max_per_class: NZUsize!(1024),
        }
    }
}

impl SharedPoolConfig {
    /// Validates the configuration, panicking on invalid values.
    ///
    /// # Panics
    ///
    /// - `min_size` is not a power of two
    /// - `max_size` is not a power of two
    /// - `max_size < min_size`
    pub fn validate(&self) {
        assert!(
            self.min_size.is_power_of_two(),
            "min_size must be a power of two"
        );
        assert!(
            self.max_size.is_power_of_two(),
            "max_size must be a power of two"
        );
        assert!(
            self.max_size >= self.min_size,
            "max_size must be >= min_size"
        );
    }

    /// Returns the number of size classes.
    fn num_classes(&self) -> usize {
        // Classes are: min_size, min_size*2, min_size*4, ..., max_size
        (self.max_size.get() / self.min_size.get()).trailing_zeros() as usize + 1
    }

    /// Returns the size class index for a given size, or `None` if size > max_size.
    fn class_index(&self, size: usize) -> Option<usize> {
        if size > self.max_size.get() {
            return None;
        }
        if size <= self.min_size.get() {
            return Some(0);
        }
        let size_class = size.next_power_of_two();
        Some((size_class / self.min_size.get()).trailing_zeros() as usize)
    }

    /// Returns the region size for a given class index.
    const fn class_size(&self, index: usize) -> usize {
        self.min_size.get() << index
    }
}

/// Configuration for a [TransportPool].
#[derive(Debug, Clone)]
pub struct TransportPoolConfig {
    /// Size of every region in the pool. Larger requests are refused.
    pub buffer_size: NonZeroUsize,
    /// Maximum number of regions outstanding at once.
    pub max_count: NonZeroUsize,
}

impl TransportPoolConfig {
    /// Network I/O preset: 64 KiB regions, 4096 outstanding.
    pub const fn for_network() -> Self {
        Self {
            buffer_size: NZUsize!(64 * 1024),
            max_count: NZUsize!(4096),
        }
    }
}

impl Default for TransportPoolConfig {
    fn default() -> Self {
        Self::for_network()
    }
}

/// Label for pool metrics, identifying the size class.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct SizeClassLabel {
    size_class: u64,
}

/// Metrics for a pool.
#[derive(Default)]
struct PoolMetrics {
    /// Number of regions currently handed out.
    allocated: Family<SizeClassLabel, Gauge>,
    /// Number of regions waiting in the free list.
    available: Family<SizeClassLabel, Gauge>,
    /// Total number of successful takes.
    allocations_total: Family<SizeClassLabel, Counter>,
    /// Total number of failed takes (class exhausted).
    exhausted_total: Family<SizeClassLabel, Counter>,
    /// Total number of requests exceeding the largest class.
    oversized_total: Counter,
}

impl PoolMetrics {
    fn register(&self, registry: &mut Registry) {
        registry.register(
            "allocated",
            "Number of regions currently taken from the pool",
            self.allocated.clone(),
        );
        registry.register(
            "available",
            "Number of regions available in the pool",
            self.available.clone(),
        );
        registry.register(
            "allocations",
            "Total number of regions taken from the pool",
            self.allocations_total.clone(),
        );
        registry.register(
            "exhausted",
            "Total number of takes refused because the size class was exhausted",
            self.exhausted_total.clone(),
        );
        registry.register(
            "oversized",
            "Total number of takes exceeding the largest size class",
            self.oversized_total.clone(),
        );
    }
}

/// Per-size-class state.
///
/// The free list stores `Option<Box<[u8]>>` where:
/// - `Some(region)` = a reusable region
/// - `None` = an available slot for creating a new region
struct SizeClass {
    size: usize,
    freelist: ArrayQueue<Option<Box<[u8]>>>,
    /// Number of regions currently handed out.
    allocated: AtomicUsize,
    label: SizeClassLabel,
}

impl SizeClass {
    fn new(size: usize, max_regions: usize) -> Self {
        let freelist = ArrayQueue::new(max_regions);
        for _ in 0..max_regions {
            let _ = freelist.push(None);
        }
        Self {
            size,
            freelist,
            allocated: AtomicUsize::new(0),
            label: SizeClassLabel {
                size_class: size as u64,
            },
        }
    }

    fn take(&self, metrics: &PoolMetrics) -> Option<Box<[u8]>> {
        let region = match self.freelist.pop() {
            Some(Some(region)) => {
                metrics.available.get_or_create(&self.label).dec();
                region
            }
            Some(None) => vec![0u8; self.size].into_boxed_slice(),
            None => {
                metrics.exhausted_total.get_or_create(&self.label).inc();
                trace!(size_class = self.size, "size class exhausted");
                return None;
            }
        };
        self.allocated.fetch_add(1, Ordering::Relaxed);
        metrics.allocations_total.get_or_create(&self.label).inc();
        metrics.allocated.get_or_create(&self.label).inc();
        Some(region)
    }

    fn recycle(&self, region: Box<[u8]>, metrics: &PoolMetrics) {
        // Regions the class never handed out are dropped.
        if self
            .allocated
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_err()
        {
            return;
        }
        metrics.allocated.get_or_create(&self.label).dec();
        if self.freelist.push(Some(region)).is_ok() {
            metrics.available.get_or_create(&self.label).inc();
        }
        // else: free list full, the region is dropped and deallocated
    }
}

struct SharedPoolInner {
    config: SharedPoolConfig,
    classes: Vec<SizeClass>,
    metrics: PoolMetrics,
}

/// A pool of power-of-two regions with no per-request size ceiling.
///
/// Regions above `max_size` are allocated on demand and dropped when recycled. A request only
/// fails (returns `None`) when its size class has no slot left.
#[derive(Clone)]
pub struct SharedPool {
    inner: Arc<SharedPoolInner>,
}

impl std::fmt::Debug for SharedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedPool")
            .field("config", &self.inner.config)
            .field("num_classes", &self.inner.classes.len())
            .finish()
    }
}

impl SharedPool {
    /// Creates a new pool with the given configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    pub fn new(config: SharedPoolConfig) -> Self {
        config.validate();
        let classes = (0..config.num_classes())
            .map(|i| SizeClass::new(config.class_size(i), config.max_per_class.get()))
            .collect();
        Self {
            inner: Arc::new(SharedPoolInner {
                config,
                classes,
                metrics: PoolMetrics::default(),
            }),
        }
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &SharedPoolConfig {
        &self.inner.config
    }

    /// Returns the number of regions of `size`'s class currently taken from the pool.
    pub fn allocated(&self, size: usize) -> usize {
        self.inner
            .config
            .class_index(size)
            .map_or(0, |i| self.inner.classes[i].allocated.load(Ordering::Relaxed))
    }

    /// Registers the pool's metrics under the `shared_pool` prefix.
    pub fn register(&self, registry: &mut Registry) {
        self.inner
            .metrics
            .register(registry.sub_registry_with_prefix("shared_pool"));
    }
}

impl Allocator for SharedPool {
    fn take(&self, size: usize) -> Option<Box<[u8]>> {
        let inner = &self.inner;
        match inner.config.class_index(size) {
            Some(index) => inner.classes[index].take(&inner.metrics),
            None => {
                inner.metrics.oversized_total.inc();
                trace!(size, "serving oversized request outside size classes");
                Some(vec![0u8; size].into_boxed_slice())
            }
        }
    }

    fn recycle(&self, region: Box<[u8]>) {
        let inner = &self.inner;
        // Only exact class sizes were handed out by a size class.
        let Some(index) = inner.config.class_index(region.len()) else {
            return;
        };
        let class = &inner.classes[index];
        if class.size == region.len() {
            class.recycle(region, &inner.metrics);
        }
    }
}

struct TransportPoolInner {
    config: TransportPoolConfig,
    class: SizeClass,
    metrics: PoolMetrics,
}

/// A capacity-limited pool of fixed-size regions for network I/O.
#[derive(Clone)]
pub struct TransportPool {
    inner: Arc<TransportPoolInner>,
}

impl std::fmt::Debug for TransportPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportPool")
            .field("config", &self.inner.config)
            .finish()
    }
}

impl TransportPool {
    /// Creates a new pool with the given configuration.
    pub fn new(config: TransportPoolConfig) -> Self {
        let class = SizeClass::new(config.buffer_size.get(), config.max_count.get());
        Self {
            inner: Arc::new(TransportPoolInner {
                config,
                class,
                metrics: PoolMetrics::default(),
            }),
        }
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &TransportPoolConfig {
        &self.inner.config
    }

    /// Returns the number of regions currently taken from the pool.
    pub fn allocated(&self) -> usize {
        self.inner.class.allocated.load(Ordering::Relaxed)
    }

    /// Registers the pool's metrics under the `transport_pool` prefix.
    pub fn register(&self, registry: &mut Registry) {
        self.inner
            .metrics
            .register(registry.sub_registry_with_prefix("transport_pool"));
    }
}

impl Allocator for TransportPool {
    fn take(&self, size: usize) -> Option<Box<[u8]>> {
        let inner = &self.inner;
        if size > inner.class.size {
            inner.metrics.oversized_total.inc();
            return None;
        }
        inner.class.take(&inner.metrics)
    }

    fn recycle(&self, region: Box<[u8]>) {
        let inner = &self.inner;
        if region.len() == inner.class.size {
            inner.class.recycle(region, &inner.metrics);
        }
    }
}
