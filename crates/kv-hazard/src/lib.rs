#![expect(unsafe_code, reason = "lock-free slot list and raw hazard pointers require it")]

//! A lock-free hazard-pointer registry.
//!
//! A [`HazardRegistry`] lets any number of reader threads publish "I may currently be
//! dereferencing this pointer" before they traverse into a shared, concurrently-mutated
//! structure, and lets a single reclaiming thread ask "is anyone currently advertising this
//! pointer?" before it frees memory that has already been unlinked.
//!
//! Slots are never freed once allocated; they are pooled and reused by later callers of
//! [`HazardRegistry::acquire`]. This crate has no opinion on what `T` is, or on how the
//! reclaimer decides something is unlinked; it only implements the acquire/remember/release/
//! contains protocol.
//!
//! # The protocol
//!
//! A reader that wants to dereference a candidate pointer `p` which it reached by traversing
//! a concurrently-mutated structure must, before dereferencing `p`:
//! 1. [`remember`](HazardGuard::remember) `p` in its slot (a release store), and
//! 2. re-read whatever produced `p` and confirm it still yields `p`.
//!
//! If the re-read produces something else, the reader must retry from scratch: between its
//! first read and its hazard publish, a writer may have unlinked and reclaimed `p`.
//!
//! A writer that wants to reclaim an unlinked node `p` must, after the unlink has been
//! published (so no *new* traversal can reach `p`):
//! 1. call [`HazardRegistry::contains`]`(p)`, and free `p` only if it returns `false`.
//!
//! This crate does not itself decide when a node is safe to free; that is the caller's
//! responsibility (see the GC sweep in `kv-skiplist`), using `contains` as the single source
//! of truth.

use std::fmt::{self, Debug, Formatter};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};


/// A node in the registry's lock-free, singly-linked list of slots.
///
/// Slots are heap-allocated once and never freed for the life of the registry; they are
/// reclaimed for reuse via `active`, not via deallocation.
struct Slot<T> {
    active:  AtomicBool,
    hazard:  AtomicPtr<T>,
    next:    AtomicPtr<Slot<T>>,
}

impl<T> Slot<T> {
    fn new_active() -> *mut Self {
        Box::into_raw(Box::new(Self {
            active: AtomicBool::new(true),
            hazard: AtomicPtr::new(ptr::null_mut()),
            next:   AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

/// A lock-free registry of hazard-pointer slots, generic over the pointee type `T`.
///
/// `T` is typically a node type of the structure being protected (e.g. a skip-list node).
/// The registry only ever stores and compares raw pointers; it never dereferences them.
pub struct HazardRegistry<T> {
    head: AtomicPtr<Slot<T>>,
}

// Safety: all mutable state inside `Slot` is only ever touched through its atomics, and
// `Slot`s are never moved or freed once allocated, so sharing `&HazardRegistry<T>` across
// threads is sound regardless of whether `T` is `Send`/`Sync` (we never touch a `T` value,
// only pointers to one).
unsafe impl<T> Send for HazardRegistry<T> {}
unsafe impl<T> Sync for HazardRegistry<T> {}

impl<T> Default for HazardRegistry<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HazardRegistry<T> {
    /// Create an empty registry. No slots are allocated until the first [`acquire`](Self::acquire).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Claim a slot for the calling reader, allocating a new one only if every existing slot
    /// is currently active.
    ///
    /// The returned [`HazardGuard`] releases the slot back to the pool when dropped.
    #[must_use]
    pub fn acquire(&self) -> HazardGuard<'_, T> {
        let mut current = self.head.load(Ordering::Acquire);

        while !current.is_null() {
            // Safety: slots are never freed or moved after being linked in.
            let slot = unsafe { &*current };

            if !slot.active.load(Ordering::Acquire)
                && slot
                    .active
                    .compare_exchange_weak(false, true, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                return HazardGuard { registry: self, slot };
            }

            current = slot.next.load(Ordering::Acquire);
        }

        let new_slot = Slot::new_active();
        loop {
            let head = self.head.load(Ordering::Acquire);
            // Safety: `new_slot` was just allocated by this thread and is not yet published.
            unsafe { (*new_slot).next.store(head, Ordering::Relaxed) };

            if self
                .head
                .compare_exchange_weak(head, new_slot, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }

        // Safety: `new_slot` was just linked into the list and is owned exclusively by this guard.
        HazardGuard { registry: self, slot: unsafe { &*new_slot } }
    }

    /// Returns `true` if any currently-active slot advertises exactly `ptr`.
    ///
    /// `ptr` must not be null (callers should never ask whether "no hazard" is hazardous).
    /// False positives are possible under benign races (a slot concurrently releasing); false
    /// negatives are forbidden for any pointer currently between a `remember` and its matching
    /// `release`, provided the caller observed the unlink (release-store) before calling this.
    #[must_use]
    pub fn contains(&self, ptr: *const T) -> bool {
        debug_assert!(!ptr.is_null(), "contains() should never be asked about a null pointer");

        let mut current = self.head.load(Ordering::Acquire);
        while !current.is_null() {
            // Safety: slots are never freed or moved after being linked in.
            let slot = unsafe { &*current };

            if slot.active.load(Ordering::Acquire) {
                let hazard = slot.hazard.load(Ordering::Acquire);
                if ptr::eq(hazard, ptr) {
                    return true;
                }
            }

            current = slot.next.load(Ordering::Acquire);
        }

        false
    }
}

impl<T> Debug for HazardRegistry<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("HazardRegistry").finish_non_exhaustive()
    }
}

/// An acquired hazard slot, held for the duration of one protected traversal.
///
/// Dropping the guard releases the slot back to the registry's pool; a reader should drop it
/// (or call [`release`](Self::release) explicitly) as soon as it is done dereferencing its
/// protected pointer, since an active slot can never be reused by another thread.
pub struct HazardGuard<'registry, T> {
    registry: &'registry HazardRegistry<T>,
    slot:     &'registry Slot<T>,
}

impl<T> HazardGuard<'_, T> {
    /// Publish `ptr` as a pointer this reader may be about to dereference.
    ///
    /// This is a release store: any thread that later observes `ptr` in this slot (via
    /// [`HazardRegistry::contains`], which loads with acquire ordering) is guaranteed to see
    /// every write this thread performed before calling `remember`. Callers must re-validate
    /// (re-read whatever produced `ptr`) after calling this, per the module-level protocol.
    #[inline]
    pub fn remember(&self, ptr: *const T) {
        self.slot.hazard.store(ptr.cast_mut(), Ordering::Release);
    }

    /// Stop advertising any pointer, without releasing the slot back to the pool.
    #[inline]
    pub fn clear(&self) {
        self.slot.hazard.store(ptr::null_mut(), Ordering::Release);
    }

    /// Release the slot back to the registry's pool.
    ///
    /// Equivalent to dropping the guard; provided so callers can release explicitly before the
    /// guard would otherwise go out of scope.
    #[inline]
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Drop for HazardGuard<'_, T> {
    fn drop(&mut self) {
        // The null-store must be visible before `active` flips back to false: otherwise a
        // racing `acquire()` on another thread could reuse this slot and start publishing a
        // new hazard while a concurrent `contains()` still sees the old one, which is harmless,
        // but a *forbidden* interleaving is the other direction: the slot going active for a
        // new hazard before this one is cleared, which could make a since-freed pointer look
        // unprotected. Always clear before deactivating.
        self.slot.hazard.store(ptr::null_mut(), Ordering::Release);
        self.slot.active.store(false, Ordering::Release);
    }
}

impl<T> Debug for HazardGuard<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("HazardGuard").finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn acquire_reuses_released_slots() {
        let registry: HazardRegistry<u32> = HazardRegistry::new();

        let first = registry.acquire();
        drop(first);

        let second = registry.acquire();
        // The registry should not have grown: reacquiring reuses the one released slot.
        // We can't directly count slots, so instead confirm behavior: contains() sees nothing
        // published by `second` until `remember` is called.
        let sentinel = 0xdead_beefu32;
        assert!(!registry.contains(&raw const sentinel));
        second.remember(&raw const sentinel);
        assert!(registry.contains(&raw const sentinel));
    }

    #[test]
    fn contains_is_false_after_release() {
        let registry: HazardRegistry<u32> = HazardRegistry::new();
        let value = 7u32;

        let guard = registry.acquire();
        guard.remember(&raw const value);
        assert!(registry.contains(&raw const value));
        drop(guard);

        assert!(!registry.contains(&raw const value));
    }

    #[test]
    fn concurrent_readers_each_get_a_distinct_slot_when_all_are_active() {
        let registry: Arc<HazardRegistry<usize>> = Arc::new(HazardRegistry::new());
        let seen_simultaneously = Arc::new(AtomicUsize::new(0));
        let values: Arc<[usize; 8]> = Arc::new(std::array::from_fn(|i| i));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let seen = Arc::clone(&seen_simultaneously);
                let values = Arc::clone(&values);
                thread::spawn(move || {
                    let guard = registry.acquire();
                    guard.remember(&raw const values[i]);
                    seen.fetch_add(1, Ordering::SeqCst);
                    // Hold the slot until every thread has published, to force the registry
                    // to grow to (at least) 8 slots rather than letting threads race to reuse.
                    while seen.load(Ordering::SeqCst) < 8 {
                        thread::yield_now();
                    }
                    assert!(registry.contains(&raw const values[i]));
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        for value in values.iter() {
            assert!(!registry.contains(&raw const *value));
        }
    }
}
