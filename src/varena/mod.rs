//! Variable arena: a bank of [`Arena`]s indexed by the log2 size class of
//! a flexible struct's trailing array length, so that `alloc`/`realloc`/
//! `free` of many different trailing-array lengths still hit a handful of
//! slab-backed fixed arenas instead of one allocation per distinct size.

use std::ptr::NonNull;

use crate::arena::Arena;
use crate::config::{ArenaConfig, VArenaConfig};
use crate::size::flex_size;

/// Smallest `k` such that `2^k >= n` (for `n >= 1`; `0` for `n <= 1`).
fn ceil_log2(n: usize) -> u32 {
    if n <= 1 {
        0
    } else {
        usize::BITS - (n - 1).leading_zeros()
    }
}

/// A bank of fixed arenas, one per size class, for flexible structs with a
/// caller-chosen trailing-array length.
///
/// Size class indexing must be computed identically for `alloc` and
/// `free` of the same logical object — [`VArena::class_of`] is the single
/// function both paths call, so the two can never drift.
pub struct VArena {
    config: VArenaConfig,
    /// `2^shift` is the smallest power-of-two element count that already
    /// satisfies `config.min`, so class 0 always covers it.
    shift: u32,
    /// `arenas[k]` holds chunks sized for exactly `2^(shift+k)` trailing
    /// elements; grown lazily as higher classes are requested.
    arenas: Vec<Arena>,
}

impl VArena {
    /// `varena_init(varena, A, min, off, esz)`.
    #[must_use]
    pub fn new(config: VArenaConfig) -> Self {
        let min_count = if config.min() > config.off() {
            let diff = config.min() - config.off();
            diff.div_ceil(config.esz())
        } else {
            0
        };
        let shift = ceil_log2(min_count.max(1));

        Self {
            config,
            shift,
            arenas: Vec::new(),
        }
    }

    /// `b(n)` from the source contract: the size-class index of the
    /// smallest power-of-two element count `>= n` that is also `>=` the
    /// class-0 floor implied by `min`.
    #[must_use]
    pub fn class_of(&self, n: usize) -> usize {
        let target_shift = ceil_log2(n.max(1));
        target_shift.saturating_sub(self.shift) as usize
    }

    fn chunk_size_for_class(&self, class: usize) -> usize {
        let count = 1usize << (self.shift as usize + class);
        flex_size(
            self.config.align(),
            self.config.min(),
            self.config.off(),
            self.config.esz(),
            count,
        )
    }

    /// Ensures arenas `0..=class` exist, creating any missing ones.
    fn ensure_class(&mut self, class: usize) {
        while self.arenas.len() <= class {
            let idx = self.arenas.len();
            let chunk_size = self.chunk_size_for_class(idx);
            let arena_config = ArenaConfig::new(self.config.align(), chunk_size)
                .expect("size-class chunk size is always a valid, non-zero arena config");

            #[cfg(feature = "logging")]
            tracing::debug!(class = idx, chunk_size, "varena opened a new size class");

            self.arenas.push(Arena::new(arena_config));
        }
    }

    /// `varena_alloc(varena, n) -> pointer or null`.
    #[must_use]
    pub fn alloc(&mut self, n: usize) -> Option<NonNull<u8>> {
        let class = self.class_of(n);
        self.ensure_class(class);
        self.arenas[class].alloc()
    }

    /// `varena_free(varena, p, n)`; `n` must equal the `alloc`/last
    /// `realloc`'s `new` argument for `p`.
    ///
    /// # Safety
    ///
    /// `p` must be a live allocation from this `VArena` made with the same
    /// `n` (per [`VArena::class_of`]); see [`Arena::free`]'s safety
    /// requirements, which this forwards to. Freeing with the wrong `n`
    /// routes `p` to a different size class's `Arena`; in debug builds
    /// that `Arena` stamps its own `chunk_size` into `p`'s header, which
    /// almost never matches the `chunk_size` `p` was actually allocated
    /// under, so this panics rather than silently corrupting the wrong
    /// class's free list.
    pub unsafe fn free(&mut self, p: NonNull<u8>, n: usize) {
        let class = self.class_of(n);
        // SAFETY: caller guarantees `p` was allocated from this `VArena`
        // with element count `n`, which `class_of` deterministically maps
        // to the same class used at allocation time.
        unsafe { self.arenas[class].free(p) };
    }

    /// `varena_realloc(varena, p, old, new) -> pointer or null`.
    ///
    /// No-op (returns `p` unchanged) when `old` and `new` map to the same
    /// size class. Otherwise allocates a new chunk, copies the shared
    /// prefix, and frees the original. On allocation failure `p` remains
    /// valid and untouched.
    ///
    /// # Safety
    ///
    /// `p` must be a live allocation from this `VArena` made with element
    /// count `old`.
    pub unsafe fn realloc(
        &mut self,
        p: NonNull<u8>,
        old: usize,
        new: usize,
    ) -> Option<NonNull<u8>> {
        if self.class_of(old) == self.class_of(new) {
            return Some(p);
        }

        let new_ptr = self.alloc(new)?;
        let copy_len = flex_size(
            self.config.align(),
            self.config.min(),
            self.config.off(),
            self.config.esz(),
            old.min(new),
        );

        // SAFETY: `p` is `flex_size(.., old)` bytes (caller's guarantee),
        // `new_ptr` is freshly allocated and at least `flex_size(.., new)`
        // bytes, and `copy_len` is the smaller of the two, so both ranges
        // are in-bounds and the two allocations do not overlap.
        unsafe {
            std::ptr::copy_nonoverlapping(p.as_ptr(), new_ptr.as_ptr(), copy_len);
            self.free(p, old);
        }
        Some(new_ptr)
    }

    /// `varena_destroy(varena)`: frees every size class's slabs.
    pub fn destroy(&mut self) {
        self.arenas.clear();
    }

    #[must_use]
    pub fn config(&self) -> &VArenaConfig {
        &self.config
    }
}
