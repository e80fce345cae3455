#![expect(unsafe_code, reason = "raw-pointer traversal, hazard protocol, and manual reclamation")]

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use kv_hazard::HazardRegistry;

use crate::error::ReservedKeyError;
use crate::level_rng::{LevelRng, MAX_LEVEL};
use crate::node::{Node, SentinelKey};


/// Sweep the lazy-trash list once it holds at least this many unlinked nodes.
///
/// Matches the reference implementation's threshold; chosen empirically there as a balance
/// between sweep overhead and trash-list memory.
pub const GC_THRESHOLD: usize = 50;


/// State shared between every [`OrderedMap`] reader handle and the one [`MapWriter`].
///
/// `header` and `footer` never change after construction (only the nodes *between* them do),
/// so reading them needs no synchronization; the forward pointers inside them are the atomics.
struct Shared<K, V> {
    header:  *mut Node<K, V>,
    footer:  *mut Node<K, V>,
    hazards: HazardRegistry<Node<K, V>>,
}

// Safety: `header` and `footer` are fixed for the lifetime of `Shared`, and all access to the
// nodes reachable from them (including `header`/`footer` themselves) goes through the
// `Node::next`/`set_next` atomics plus the hazard-pointer protocol in `map`/`hazards`. No
// interior value is ever accessed without going through that protocol, aside from the writer's
// exclusively-owned `MapWriter` fields.
unsafe impl<K: Send, V: Send> Send for Shared<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for Shared<K, V> {}

impl<K, V> Drop for Shared<K, V> {
    fn drop(&mut self) {
        // By the time the last handle to `Shared` is dropped, the single-writer/many-reader
        // discipline guarantees no other thread is traversing or mutating the list (the caller
        // is responsible for having joined the writer and drained readers first, per the
        // orderly-shutdown contract). Walk the live level-0 chain and free every node. The
        // header and footer sentinels never had their value initialized; every node strictly
        // between them did and was never taken (only `remove` takes a value, and removed nodes
        // are unlinked, ending up in `lazy_trash` rather than the live chain).
        let header = self.header;
        let footer = self.footer;

        // Safety: `header` is allocated by `Node::new_sentinel` and still linked in.
        let mut current = unsafe { (*header).next_relaxed(0) };
        unsafe { Node::reclaim_sentinel(header) };

        while current != footer {
            // Safety: every node strictly between `header` and `footer` was allocated by
            // `Node::new`, still holds its original value, and has not been reclaimed.
            let next = unsafe { (*current).next_relaxed(0) };
            unsafe { Node::reclaim(current) };
            current = next;
        }

        // Safety: `footer` is allocated by `Node::new_sentinel` and still linked in.
        unsafe { Node::reclaim_sentinel(footer) };
    }
}


/// A reader-side handle to an ordered map.
///
/// `search` never blocks on other operations; it is safe to call from any number of threads
/// concurrently with each other and with a [`MapWriter`] draining writes on its own thread.
/// Clone this handle to share it across reader threads/connections; all clones refer to the
/// same underlying map.
pub struct OrderedMap<K, V> {
    shared: Arc<Shared<K, V>>,
}

impl<K, V> Clone for OrderedMap<K, V> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<K, V> Debug for OrderedMap<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedMap").finish_non_exhaustive()
    }
}

impl<K: SentinelKey, V: Clone> OrderedMap<K, V> {
    /// Look up `key`, returning a clone of its value if present.
    ///
    /// Implements the hazard-pointer acquire/remember/re-validate/release protocol (see
    /// `kv-hazard`): the traversal itself uses relaxed-feeling logic, but every read of a
    /// forward pointer is an acquire load, and the single hazard slot is published before the
    /// candidate node is ever dereferenced.
    #[must_use]
    pub fn search(&self, key: &K) -> Option<V> {
        // The footer key is reserved and never a real entry, even though a footer node always
        // exists internally; reject it before it can ever compare equal to that sentinel.
        if *key == K::FOOTER {
            return None;
        }

        let shared = &*self.shared;
        let guard = shared.hazards.acquire();

        loop {
            // Safety: `header` is always valid for the lifetime of `shared`.
            let header = unsafe { &*shared.header };
            let mut level = header_level(header);
            let mut pred = header;
            let mut candidate;

            loop {
                // Safety: `pred` is reachable from `header` via acquire-ordered loads, so it
                // has not been reclaimed: the writer only reclaims a node after proving (via
                // `contains`) that no hazard slot references it, and unlinking always happens
                // (release-store) before the reclaim check runs.
                let next = pred.next(level);
                let next_ref = if next.is_null() { None } else { Some(unsafe { &*next }) };

                match next_ref {
                    Some(n) if n.key < *key => pred = n,
                    _ => {
                        if level == 0 {
                            candidate = next;
                            break;
                        }
                        level -= 1;
                    },
                }
            }

            guard.remember(candidate);

            // Re-validate: if `pred`'s successor at level 0 is no longer `candidate`, a write
            // raced us between the traversal and the hazard publish, and `candidate` might
            // already be reclaimed. Retry from the top.
            if pred.next(0) == candidate {
                // Safety: `candidate` is protected by `guard` (published above and revalidated),
                // so even if it has been unlinked, the writer will observe the hazard before
                // reclaiming it.
                let found = (!candidate.is_null())
                    .then(|| unsafe { &*candidate })
                    .filter(|n| n.key == *key)
                    // Safety: `n` is not the footer sentinel (its key compared equal to the
                    // caller's `key`, which was rejected above if it were `K::FOOTER`), so its
                    // value is initialized.
                    .map(|n| unsafe { n.value_ref() }.clone());
                return found;
            }
        }
    }
}

fn header_level<K, V>(header: &Node<K, V>) -> usize {
    header.level - 1
}


/// The single mutating handle for an [`OrderedMap`].
///
/// By construction, only one `MapWriter` exists per map (it is not `Clone`), and it is meant
/// to live on exactly one dedicated thread (see `kv-writer`). All of its own fields (`level`,
/// `size`, `lazy_trash`, `rng`) need no synchronization, since nothing else can touch them.
pub struct MapWriter<K, V> {
    shared:     Arc<Shared<K, V>>,
    level:      usize,
    size:       usize,
    lazy_trash: Vec<Trashed<K, V>>,
    rng:        LevelRng,
}

/// A node unlinked from the live chain, awaiting a GC sweep, tagged with whether its value has
/// already been moved out (by `remove`) or is still present (a node displaced by an `insert`
/// update) — the two cases must be reclaimed differently to avoid double-dropping the value.
enum Trashed<K, V> {
    /// Displaced by an update; `value` was never read out and must still be dropped.
    Displaced(*mut Node<K, V>),
    /// Unlinked by `remove`; `value` was already moved out and must not be dropped again.
    Removed(*mut Node<K, V>),
}

impl<K, V> Trashed<K, V> {
    fn ptr(&self) -> *mut Node<K, V> {
        match *self {
            Self::Displaced(ptr) | Self::Removed(ptr) => ptr,
        }
    }

    /// # Safety
    /// See [`Node::reclaim`]/[`Node::reclaim_after_take`]: the node must not be reachable from
    /// any live traversal or hazard slot.
    unsafe fn reclaim(self) {
        match self {
            Self::Displaced(ptr) => unsafe { Node::reclaim(ptr) },
            Self::Removed(ptr) => unsafe { Node::reclaim_after_take(ptr) },
        }
    }
}

impl<K, V> Debug for MapWriter<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapWriter")
            .field("level", &self.level)
            .field("size", &self.size)
            .field("lazy_trash_len", &self.lazy_trash.len())
            .finish_non_exhaustive()
    }
}

impl<K: SentinelKey, V> MapWriter<K, V> {
    /// Build a fresh, empty map and its writer, seeding the level sampler with `seed`.
    ///
    /// Returns the `MapWriter` plus one [`OrderedMap`] reader handle; clone the reader handle
    /// to hand it to more threads/connections.
    #[must_use]
    pub fn new(seed: u32) -> (Self, OrderedMap<K, V>) {
        let footer = Node::new_sentinel(K::FOOTER, 1);
        let header = Node::new_sentinel(K::FOOTER, MAX_LEVEL);

        // Safety: both pointers were just allocated by `Node::new` and are exclusively owned
        // here; nothing else has observed them yet.
        for level in 0..MAX_LEVEL {
            unsafe { (*header).init_next_relaxed(level, footer) };
        }
        unsafe { (*footer).init_next_relaxed(0, std::ptr::null_mut()) };

        let shared = Arc::new(Shared {
            header,
            footer,
            hazards: HazardRegistry::new(),
        });

        let writer = Self {
            shared: Arc::clone(&shared),
            level: 1,
            size: 0,
            lazy_trash: Vec::new(),
            rng: LevelRng::new(seed),
        };

        (writer, OrderedMap { shared })
    }

    /// A fresh reader handle onto the same map.
    #[must_use]
    pub fn reader(&self) -> OrderedMap<K, V> {
        OrderedMap { shared: Arc::clone(&self.shared) }
    }

    /// Number of user-visible entries currently in the map.
    #[must_use]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether the map currently holds no user-visible entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The highest currently-populated level, in `1..=MAX_LEVEL`.
    #[must_use]
    pub fn level(&self) -> usize {
        self.level
    }

    /// Number of unlinked-but-not-yet-freed nodes awaiting a GC sweep.
    #[must_use]
    pub fn lazy_trash_len(&self) -> usize {
        self.lazy_trash.len()
    }

    fn header(&self) -> &Node<K, V> {
        // Safety: valid for the lifetime of `shared`, which this writer keeps alive.
        unsafe { &*self.shared.header }
    }

    /// The raw header pointer, for crate-internal callers (e.g. [`crate::snapshot`]) that need
    /// to walk level 0 without going through the writer's own traversal helpers.
    pub(crate) fn shared_header(&self) -> *mut Node<K, V> {
        self.shared.header
    }

    /// The raw footer pointer, used as the level-0 traversal's terminal sentinel.
    pub(crate) fn shared_footer(&self) -> *mut Node<K, V> {
        self.shared.footer
    }

    /// Traverse from the top populated level down to 0, filling `prev` with the last node at
    /// each level whose successor's key is `< key` (or, for unpopulated upper levels, left
    /// untouched by the caller). Returns `prev[0].next(0)`, the first node whose key is `>= key`.
    fn find_greater_or_equal(&self, key: &K, prev: &mut [*mut Node<K, V>; MAX_LEVEL]) -> *mut Node<K, V> {
        let mut x = self.header();
        let mut index = self.level - 1;

        loop {
            let next = x.next_relaxed(index);
            // Safety: everything reachable from `header` via the writer's own prior publishes
            // is a live node; the writer is the only mutator and thus never races itself.
            let next_ref = if next.is_null() { None } else { Some(unsafe { &*next }) };

            match next_ref {
                Some(n) if n.key < *key => x = n,
                _ => {
                    prev[index] = std::ptr::from_ref(x).cast_mut();
                    if index == 0 {
                        return next;
                    }
                    index -= 1;
                },
            }
        }
    }

    /// Insert `value` at `key`, or replace the existing value if `key` is already present.
    ///
    /// Returns `Ok(true)` for a fresh insert, `Ok(false)` for an update (the keyset is
    /// unchanged). Rejects the reserved sentinel footer key.
    pub fn insert(&mut self, key: K, value: V) -> Result<bool, ReservedKeyError> {
        if key == K::FOOTER {
            return Err(ReservedKeyError);
        }

        let mut prev = [std::ptr::null_mut(); MAX_LEVEL];
        let existing = self.find_greater_or_equal(&key, &mut prev);

        // Safety: `existing`, if non-null, is a live node reachable via the traversal above.
        let existing_ref = (!existing.is_null()).then(|| unsafe { &*existing });
        let is_update = existing_ref.is_some_and(|n| n.key == key);

        let chosen_level = if is_update {
            // Preserve the displaced node's fanout; see DESIGN.md for why this is kept.
            existing_ref.expect("is_update implies existing_ref is Some").level
        } else {
            self.rng.random_level()
        };

        if chosen_level > self.level {
            for level in self.level..chosen_level {
                prev[level] = std::ptr::from_ref(self.header()).cast_mut();
            }
            self.level = chosen_level;
        }

        let new_node = Node::new(key, value, chosen_level);
        for level in 0..chosen_level {
            // Safety: `new_node` is exclusively owned until the publish loop below, and
            // `existing`/`prev[level]` are live nodes from the traversal above.
            let successor = if is_update {
                unsafe { (*existing).next_relaxed(level) }
            } else {
                unsafe { (*prev[level]).next_relaxed(level) }
            };
            unsafe { (*new_node).init_next_relaxed(level, successor) };
            // Safety: `prev[level]` is a live node; this publish makes `new_node` reachable.
            unsafe { (*prev[level]).set_next(level, new_node) };
        }

        if is_update {
            self.defer_free(Trashed::Displaced(existing));
        } else {
            self.size += 1;
        }

        Ok(!is_update)
    }

    /// Remove `key`, returning its value if it was present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        // The footer key is reserved and never a real entry; never let it compare equal below.
        if *key == K::FOOTER {
            return None;
        }

        let mut prev = [std::ptr::null_mut(); MAX_LEVEL];
        let found = self.find_greater_or_equal(key, &mut prev);

        // Safety: `found`, if non-null, is a live node reached via the traversal above.
        let found_ref = (!found.is_null()).then(|| unsafe { &*found });
        if !found_ref.is_some_and(|n| n.key == *key) {
            return None;
        }

        for level in 0..self.level {
            // Safety: `prev[level]` is a live node from the traversal above.
            let predecessor = unsafe { &*prev[level] };
            if predecessor.next_relaxed(level) == found {
                // Safety: `found` is live; reading its forward pointer before unlinking it.
                let successor = unsafe { (*found).next_relaxed(level) };
                predecessor.set_next(level, successor);
            }
        }

        // Safety: `found` was just unlinked at every level that referenced it, its value was
        // initialized by `Node::new` (it is not a sentinel, since its key compared equal to a
        // non-footer `key`), and nothing else will ever read or move out `found`'s value again.
        let value = unsafe { (*found).value.assume_init_read() };

        self.defer_free(Trashed::Removed(found));

        while self.level > 1 && self.header().next_relaxed(self.level - 1) == self.shared.footer {
            self.level -= 1;
        }

        self.size -= 1;
        Some(value)
    }

    /// Push `node` onto the lazy-trash list and sweep if it has grown past [`GC_THRESHOLD`].
    fn defer_free(&mut self, node: Trashed<K, V>) {
        self.lazy_trash.push(node);
        self.gc_sweep();
    }

    /// Reclaim every trashed node that no hazard slot currently protects.
    ///
    /// Must only run after the unlink(s) that produced the trashed nodes have been published
    /// (release-stored), which `insert`/`remove` always do before calling this: any hazard
    /// acquired after the unlink will have observed the new successor and is therefore
    /// irrelevant to the unlinked node.
    fn gc_sweep(&mut self) {
        if self.lazy_trash.len() < GC_THRESHOLD {
            return;
        }

        let mut i = 0;
        while i < self.lazy_trash.len() {
            let node = self.lazy_trash[i].ptr();
            if self.shared.hazards.contains(node) {
                i += 1;
            } else {
                let trashed = self.lazy_trash.swap_remove(i);
                // Safety: `node` was unlinked before being trashed, and `contains` just proved
                // no hazard slot advertises it, so no reader can be (or can become, without
                // first observing the unlink) in the middle of dereferencing it.
                unsafe { trashed.reclaim() };
            }
        }
    }
}

impl<K, V> Drop for MapWriter<K, V> {
    fn drop(&mut self) {
        // Any node still in `lazy_trash` has already been unlinked from the live chain; whether
        // or not a hazard still (spuriously) references it, once the writer itself is being torn
        // down the caller has promised readers have quiesced (see the orderly-shutdown contract
        // in `kv-writer`), so it is safe to reclaim unconditionally here.
        for trashed in self.lazy_trash.drain(..) {
            // Safety: see above; the node is not reachable from the live chain, so `Shared::drop`
            // will not also try to free it.
            unsafe { trashed.reclaim() };
        }
    }
}
