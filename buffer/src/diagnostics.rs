//! Leak diagnostics for pool-backed buffers.
//!
//! When enabled, every pool-backed handle (fresh allocations, slices, hand-offs and decoded
//! fields) records the location that created it in a process-wide registry, and removes itself
//! when dropped. Handles still registered at shutdown (or at the end of a test) were never
//! released:
//!
//! ```
//! use stagebuf_buffer::{diagnostics, ByteBuffer};
//!
//! diagnostics::enable();
//! let buffer = ByteBuffer::allocate(64);
//! drop(buffer);
//! diagnostics::assert_no_leaks();
//! ```
//!
//! Diagnostics are off by default. Enabling them only affects handles created afterwards.

use std::{
    collections::BTreeMap,
    panic::Location,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};
use tracing::warn;

static ENABLED: AtomicBool = AtomicBool::new(false);
static NEXT_ID: AtomicU64 = AtomicU64::new(0);
static LIVE: Mutex<BTreeMap<u64, Outstanding>> = Mutex::new(BTreeMap::new());

/// How a registered handle was created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    /// Fresh allocation from a pool.
    Allocated,
    /// Zero-copy view of an existing region (slice, hand-off or decoded field).
    Sliced,
}

/// A pool-backed handle that has not been released.
#[derive(Clone, Debug)]
pub struct Outstanding {
    pub kind: Kind,
    /// Capacity of the handle's window when it was created.
    pub capacity: usize,
    /// Where the handle was created.
    pub origin: &'static Location<'static>,
}

/// Starts recording pool-backed handles.
pub fn enable() {
    ENABLED.store(true, Ordering::Release);
}

/// Stops recording new handles. Handles already recorded stay registered until dropped.
pub fn disable() {
    ENABLED.store(false, Ordering::Release);
}

/// Returns whether new handles are being recorded.
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Acquire)
}

/// Returns every recorded handle that is still alive, oldest first.
pub fn outstanding() -> Vec<Outstanding> {
    live().values().cloned().collect()
}

/// Logs every outstanding handle and returns how many there are.
pub fn report() -> usize {
    let live = live();
    for entry in live.values() {
        warn!(
            kind = ?entry.kind,
            capacity = entry.capacity,
            origin = %entry.origin,
            "buffer not released"
        );
    }
    live.len()
}

/// Panics if any recorded handle is still alive, listing where each was created.
pub fn assert_no_leaks() {
    let leaks = outstanding();
    if leaks.is_empty() {
        return;
    }
    let origins: Vec<String> = leaks
        .iter()
        .map(|entry| format!("{:?} at {}", entry.kind, entry.origin))
        .collect();
    panic!(
        "{} buffer(s) not released: {}",
        leaks.len(),
        origins.join(", ")
    );
}

fn live() -> MutexGuard<'static, BTreeMap<u64, Outstanding>> {
    LIVE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registration of one live handle, removed on drop.
#[derive(Debug)]
pub(crate) struct Ticket(u64);

impl Ticket {
    /// Registers a handle if diagnostics are enabled.
    pub(crate) fn issue(
        kind: Kind,
        capacity: usize,
        origin: &'static Location<'static>,
    ) -> Option<Self> {
        if !is_enabled() {
            return None;
        }
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        live().insert(
            id,
            Outstanding {
                kind,
                capacity,
                origin,
            },
        );
        Some(Self(id))
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        live().remove(&self.0);
    }
}
