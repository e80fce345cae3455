#![expect(unsafe_code, reason = "atomic forward pointers and manual node allocation require it")]

use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::level_rng::MAX_LEVEL;


/// A key type usable in an [`OrderedMap`](crate::OrderedMap).
///
/// `FOOTER` must compare greater than every key a caller ever inserts; the map uses it as a
/// universal right terminator that every level's forward chain ends at.
pub trait SentinelKey: Ord + Copy {
    /// A reserved key, greater than any key a caller legitimately inserts.
    const FOOTER: Self;
}

impl SentinelKey for i32 {
    const FOOTER: Self = i32::MAX;
}

impl SentinelKey for i64 {
    const FOOTER: Self = i64::MAX;
}

impl SentinelKey for u64 {
    const FOOTER: Self = u64::MAX;
}

/// A single skip-list node: an immutable `(key, value)` pair plus a fixed-size array of
/// atomic forward pointers, one per level the node participates in.
///
/// `forward` has exactly `level` entries; a node never gains or loses levels after creation.
/// Entries are read with acquire ordering by readers and written with release ordering by the
/// writer (see [`crate::map`] for the exact protocol).
///
/// `value` is `MaybeUninit` so that [`Node::reclaim_after_take`] can free a node whose value was
/// already moved out by `remove`, without double-dropping it; the header/footer sentinels also
/// never initialize `value` at all, since nothing ever reads it for those nodes (see
/// [`SentinelKey`] and the reserved-footer-key guards in [`crate::map`]).
pub(crate) struct Node<K, V> {
    pub(crate) key:     K,
    pub(crate) value:   MaybeUninit<V>,
    pub(crate) level:   usize,
    forward:             Box<[AtomicPtr<Node<K, V>>]>,
}

impl<K, V> Node<K, V> {
    /// Allocate a new node at the given `level` (which must be in `1..=MAX_LEVEL`), leaking it
    /// as a raw pointer. The caller takes ownership and is responsible for eventually
    /// reconstituting and dropping the `Box` (see [`Node::reclaim`]).
    pub(crate) fn new(key: K, value: V, level: usize) -> *mut Self {
        debug_assert!((1..=MAX_LEVEL).contains(&level), "node level out of range: {level}");

        let forward = (0..level)
            .map(|_| AtomicPtr::new(std::ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Box::into_raw(Box::new(Self { key, value: MaybeUninit::new(value), level, forward }))
    }

    /// Allocate a sentinel node (header or footer) whose value is never initialized and must
    /// never be read.
    pub(crate) fn new_sentinel(key: K, level: usize) -> *mut Self {
        debug_assert!((1..=MAX_LEVEL).contains(&level), "node level out of range: {level}");

        let forward = (0..level)
            .map(|_| AtomicPtr::new(std::ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Box::into_raw(Box::new(Self { key, value: MaybeUninit::uninit(), level, forward }))
    }

    /// Borrow the value, assuming this is not an uninitialized sentinel node.
    ///
    /// # Safety
    /// Must not be called on the header or footer sentinel.
    #[inline]
    pub(crate) unsafe fn value_ref(&self) -> &V {
        unsafe { self.value.assume_init_ref() }
    }

    /// Load the forward pointer at `level` with acquire ordering (the reader-safe read).
    #[inline]
    pub(crate) fn next(&self, level: usize) -> *mut Self {
        self.forward[level].load(Ordering::Acquire)
    }

    /// Load the forward pointer at `level` with relaxed ordering.
    ///
    /// Only ever used by the writer, which has no concurrent writers to race against; readers
    /// must always use [`Node::next`].
    #[inline]
    pub(crate) fn next_relaxed(&self, level: usize) -> *mut Self {
        self.forward[level].load(Ordering::Relaxed)
    }

    /// Publish a new forward pointer at `level` with release ordering, so that any reader which
    /// observes it (via the acquire load in [`Node::next`]) also observes every write the writer
    /// performed before this call — in particular, full initialization of `new_successor`.
    #[inline]
    pub(crate) fn set_next(&self, level: usize, new_successor: *mut Self) {
        self.forward[level].store(new_successor, Ordering::Release);
    }

    /// Initialize a forward pointer at `level` with relaxed ordering.
    ///
    /// Used only while initializing a brand-new node that is not yet reachable by any other
    /// thread; the node as a whole becomes visible only once a predecessor's `set_next`
    /// publishes it with release ordering, which is what readers actually synchronize with.
    #[inline]
    pub(crate) fn init_next_relaxed(&self, level: usize, successor: *mut Self) {
        self.forward[level].store(successor, Ordering::Relaxed);
    }

    /// Reconstitute and drop a node previously leaked by [`Node::new`] or
    /// [`Node::new_sentinel`], including dropping its value.
    ///
    /// # Safety
    /// `ptr` must have been produced by [`Node::new`]/[`Node::new_sentinel`], must not already
    /// have been reclaimed, and must not be reachable from any live traversal or hazard slot.
    /// If `ptr` is a sentinel (its value was never initialized), use [`Node::reclaim_sentinel`]
    /// instead.
    pub(crate) unsafe fn reclaim(ptr: *mut Self) {
        let mut boxed = unsafe { Box::from_raw(ptr) };
        // Safety: the node was created by `Node::new`, so `value` is initialized, and this is
        // the only place it is ever dropped.
        unsafe { boxed.value.assume_init_drop() };
    }

    /// Reconstitute and drop a node whose value was already moved out (by `remove`), without
    /// touching `value` again.
    ///
    /// # Safety
    /// `ptr` must have been produced by [`Node::new`], its value must already have been moved
    /// out via [`Node::value`]'s `assume_init_read`, and the same reclaim preconditions as
    /// [`Node::reclaim`] otherwise apply.
    pub(crate) unsafe fn reclaim_after_take(ptr: *mut Self) {
        drop(unsafe { Box::from_raw(ptr) });
    }

    /// Reconstitute and drop a sentinel node allocated by [`Node::new_sentinel`], whose value
    /// was never initialized.
    ///
    /// # Safety
    /// `ptr` must have been produced by [`Node::new_sentinel`] and the same reclaim
    /// preconditions as [`Node::reclaim`] otherwise apply.
    pub(crate) unsafe fn reclaim_sentinel(ptr: *mut Self) {
        drop(unsafe { Box::from_raw(ptr) });
    }
}
