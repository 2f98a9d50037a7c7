//! Fixed-size slab/free-list arena: one (alignment, size) pair, fast
//! allocate and recycle, no return to the OS until [`Arena::destroy`].
//!
//! Not thread safe. `Arena` holds raw pointers and is therefore neither
//! `Send` nor `Sync`; sharing one across threads is a caller error the
//! type system already rejects, matching the "single-threaded, no internal
//! synchronization" contract.

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::config::ArenaConfig;
use crate::raw;
use crate::size::array_size;

const PAGE_SIZE: usize = 4096;

/// A singly-linked free-list node overlaid on the first machine word of a
/// free chunk. Never constructed directly; chunks are reinterpreted in
/// place via raw pointer writes in [`Arena::alloc`]/[`Arena::free`].
type FreeNode = Option<NonNull<u8>>;

/// Debug-only tag stamped into a per-chunk header to catch contract
/// violations (double-free, free of a pointer this arena never handed
/// out, free with a mismatched element count) per `SPEC_FULL.md` §7:
/// "implementations should detect in debug builds via poisoning or tagged
/// headers." Outside debug builds this header does not exist and chunks
/// are laid out exactly as the release geometry the source contract
/// describes.
///
/// A free chunk's header holds [`FREE`]; a live chunk's header holds the
/// `chunk_size` of the arena that allocated it. Stamping the owning
/// arena's geometry rather than a plain live/free bit means a chunk freed
/// through the wrong size class (as `VArena::free` would do with a
/// mismatched element count) is caught too: its header still reads the
/// *original* arena's `chunk_size`, which essentially never matches the
/// wrong arena's.
#[cfg(debug_assertions)]
mod debug_tag {
    /// Sentinel for a chunk currently on the free list. Chosen so it can
    /// never collide with a real `chunk_size`.
    pub const FREE: usize = usize::MAX;
}

/// Size of the per-chunk debug header reserved ahead of every chunk's
/// user-visible bytes. One full `align`-sized block in debug builds —
/// `ArenaConfig::new` rounds `align` up to at least pointer-alignment, so
/// this always has room for the `usize` stamp, and since it's a multiple
/// of `align` the chunk it precedes stays `align`-aligned with no extra
/// arithmetic. Zero in release builds, so `alloc`/`free` never touch
/// memory outside the chunk the caller was given.
#[cfg(debug_assertions)]
fn header_size(align: usize) -> usize {
    align
}
#[cfg(not(debug_assertions))]
fn header_size(_align: usize) -> usize {
    0
}

/// A slab-backed free-list allocator for chunks of one fixed `(align, size)`.
///
/// # Chunk lifecycle
///
/// A chunk handed out by [`alloc`](Self::alloc) is either *free* (linked
/// into [`Self::free_head`]) or *live* (owned by the caller) — never both,
/// never neither. `free` threads the chunk back onto the free list by
/// overwriting its first machine word with the current head; this is why
/// [`ArenaConfig`] rounds chunk size and alignment up to at least
/// pointer-size/pointer-alignment.
pub struct Arena {
    config: ArenaConfig,
    free_head: FreeNode,
    /// Backing allocations, tracked so `destroy`/`Drop` can free exactly
    /// what was allocated. The source contract chains slabs together via
    /// an intrusive pointer in the slab's first word; here that role is
    /// played by this `Vec` instead; see `DESIGN.md` for why.
    slabs: Vec<(NonNull<u8>, Layout)>,
    slab_generation: u32,
    /// Outstanding live-chunk count, tracked only for test introspection
    /// (invariant 1's "after the matched frees the arena holds no live
    /// chunks" clause). Not needed at runtime, so it doesn't exist outside
    /// `cfg(test)` builds.
    #[cfg(test)]
    live: usize,
}

impl Arena {
    /// `arena_init(arena, A, S)`.
    #[must_use]
    pub fn new(config: ArenaConfig) -> Self {
        Self {
            config,
            free_head: None,
            slabs: Vec::new(),
            slab_generation: 0,
            #[cfg(test)]
            live: 0,
        }
    }

    /// Number of chunks the next slab will carve, given how many
    /// generations have already grown.
    fn next_slab_chunk_count(&self) -> usize {
        let base = (PAGE_SIZE / self.config.chunk_size()).max(1);
        let factor = self.config.growth_factor.get();
        match factor.checked_pow(self.slab_generation) {
            Some(multiplier) => base.saturating_mul(multiplier),
            None => usize::MAX / self.config.chunk_size().max(1),
        }
    }

    /// Allocates a new slab and threads its chunks onto the free list in
    /// reverse, so that popping the free list visits chunks in ascending
    /// address order within the slab.
    fn grow(&mut self) -> bool {
        let align = self.config.align();
        let chunk_size = self.config.chunk_size();
        let header = header_size(align);
        let slot_stride = chunk_size + header;
        let count = self.next_slab_chunk_count().max(1);

        let total = array_size(align, slot_stride, count);
        if total == crate::size::sentinel(align) {
            return false;
        }

        let Some(base) = raw::zalloc(align, total) else {
            #[cfg(feature = "logging")]
            tracing::debug!(align, total, "arena slab allocation failed");
            return false;
        };

        #[cfg(feature = "logging")]
        tracing::debug!(
            generation = self.slab_generation,
            count,
            chunk_size,
            "arena grew a new slab"
        );

        // SAFETY: `layout` exactly matches the allocation above (same
        // align/total), recorded so `destroy` can free it later.
        let layout = unsafe { Layout::from_size_align_unchecked(total, align) };
        self.slabs.push((base, layout));

        for i in (0..count).rev() {
            // SAFETY: `i < count` and the slab is `count * slot_stride`
            // bytes, so this offset stays within the allocation.
            let slot = unsafe { base.as_ptr().add(i * slot_stride) };
            // SAFETY: `header` is `0` or one full `align`-aligned block, so
            // `chunk` stays inside the slab and `align`-aligned.
            let chunk = unsafe { slot.add(header) };
            // SAFETY: `chunk` is within the freshly allocated, chunk_size
            // (>= pointer-size) aligned slab; writing a pointer-sized
            // free-list link to its first word is in-bounds and aligned.
            unsafe { (chunk as *mut FreeNode).write(self.free_head) };
            // SAFETY: `slot` is the header reserved immediately before
            // `chunk`, freshly allocated and distinct from the chunk bytes
            // the caller ever sees; `header_size` guarantees room for a
            // `usize` at `slot`'s (already `align`-aligned) address.
            #[cfg(debug_assertions)]
            unsafe {
                (slot as *mut usize).write(debug_tag::FREE);
            }
            self.free_head = NonNull::new(chunk);
        }

        self.slab_generation = self.slab_generation.saturating_add(1);
        true
    }

    /// `arena_alloc(arena) -> pointer or null`.
    #[must_use]
    pub fn alloc(&mut self) -> Option<NonNull<u8>> {
        if self.free_head.is_none() && !self.grow() {
            return None;
        }

        let chunk = self.free_head.take()?;
        // SAFETY: `chunk` is the current free-list head, so its first word
        // holds a valid `FreeNode` written by `grow`/`free`.
        let next = unsafe { (chunk.as_ptr() as *const FreeNode).read() };
        self.free_head = next;

        // SAFETY: `chunk` came off the free list, so its header (the
        // `header_size` bytes immediately before it, carved by `grow` or
        // last written by `free`) is in-bounds and was tagged `FREE`.
        #[cfg(debug_assertions)]
        unsafe {
            let header = chunk.as_ptr().sub(header_size(self.config.align())) as *mut usize;
            let prev = header.read();
            assert_eq!(
                prev,
                debug_tag::FREE,
                "arena: free-list chunk at {:p} has a corrupted debug header \
                 (expected FREE) — the free list may already be corrupted",
                chunk.as_ptr()
            );
            header.write(self.config.chunk_size());
        }

        #[cfg(test)]
        {
            self.live += 1;
        }

        Some(chunk)
    }

    /// `arena_free(arena, p)`: returns `p` to the free list. Never returns
    /// memory to the OS — only [`Arena::destroy`]/[`Drop`] do that.
    ///
    /// # Safety
    ///
    /// `p` must have been returned by this arena's `alloc` and not already
    /// freed; double-free or freeing a foreign pointer is undefined
    /// behavior, per the source contract. In debug builds a corrupted or
    /// mismatched per-chunk header turns most such misuse into a panic
    /// instead of silent free-list corruption; this is a best-effort
    /// diagnostic, not a substitute for upholding the contract.
    pub unsafe fn free(&mut self, p: NonNull<u8>) {
        // SAFETY: caller guarantees `p` is a live chunk from this arena, so
        // its header is in-bounds and holds the `chunk_size` stamped by
        // the `alloc` (or `grow`, transitively) that handed it out.
        #[cfg(debug_assertions)]
        unsafe {
            let header = p.as_ptr().sub(header_size(self.config.align())) as *mut usize;
            let prev = header.read();
            if prev == debug_tag::FREE {
                panic!("arena: double free at {:p}", p.as_ptr());
            }
            assert_eq!(
                prev,
                self.config.chunk_size(),
                "arena: free of a pointer that was never allocated from this \
                 arena, or freed with a mismatched element count, at {:p}",
                p.as_ptr()
            );
            header.write(debug_tag::FREE);
        }

        // SAFETY: caller guarantees `p` is a live chunk from this arena,
        // which is at least pointer-sized/aligned (enforced by
        // `ArenaConfig::new`), so writing the free-list link is valid.
        unsafe { (p.as_ptr() as *mut FreeNode).write(self.free_head) };
        self.free_head = Some(p);

        #[cfg(test)]
        {
            self.live -= 1;
        }
    }

    /// Number of chunks currently live (allocated and not yet freed).
    /// Test-only introspection for asserting invariant 1's "after the
    /// matched frees the arena holds no live chunks" clause; not part of
    /// the runtime contract.
    #[cfg(test)]
    pub(crate) fn live_count(&self) -> usize {
        self.live
    }

    /// `arena_destroy(arena)`: frees every slab. Called automatically by
    /// `Drop`; exposed directly for parity with the source API.
    pub fn destroy(&mut self) {
        for (ptr, layout) in self.slabs.drain(..) {
            // SAFETY: `ptr`/`layout` were recorded verbatim by `grow` at
            // the matching allocation and have not been freed before
            // (each entry is drained exactly once).
            unsafe { raw::dealloc(ptr, layout.align(), layout.size()) };
        }
        self.free_head = None;
    }

    #[must_use]
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn arena(align: usize, size: usize) -> Arena {
        Arena::new(ArenaConfig::new(align, size).unwrap())
    }

    #[test]
    fn alloc_returns_aligned_disjoint_chunks() {
        let mut a = arena(8, 32);
        let mut seen = HashSet::new();
        let mut ptrs = Vec::new();
        for _ in 0..64 {
            let p = a.alloc().unwrap();
            assert_eq!(p.as_ptr() as usize % 8, 0);
            assert!(seen.insert(p.as_ptr() as usize));
            ptrs.push(p);
        }
        for p in ptrs {
            // SAFETY: each `p` was allocated above and freed exactly once.
            unsafe { a.free(p) };
        }
    }

    // S2: init with (8, 32); alloc 1000 chunks; free p[500..999] in
    // reverse; alloc 500 more; each equals one of the freed addresses
    // (LIFO recycling).
    #[test]
    fn s2_free_list_recycles_lifo() {
        let mut a = arena(8, 32);
        let ptrs: Vec<_> = (0..1000).map(|_| a.alloc().unwrap()).collect();

        let freed: Vec<_> = ptrs[500..1000].iter().rev().copied().collect();
        for &p in &freed {
            // SAFETY: these pointers were just allocated above and each is
            // freed exactly once here.
            unsafe { a.free(p) };
        }

        let freed_set: HashSet<usize> = freed.iter().map(|p| p.as_ptr() as usize).collect();
        for _ in 0..500 {
            let p = a.alloc().unwrap();
            assert!(freed_set.contains(&(p.as_ptr() as usize)));
        }
    }

    #[test]
    #[should_panic(expected = "double free")]
    #[cfg(debug_assertions)]
    fn double_free_panics_via_debug_tag() {
        let mut a = arena(8, 32);
        let p = a.alloc().unwrap();
        // SAFETY: `p` is live; this first free is correct.
        unsafe { a.free(p) };
        // SAFETY (deliberately violated for this test): `p` was already
        // freed above, so this second free is the double-free the debug
        // tag is meant to catch.
        unsafe { a.free(p) };
    }

    #[test]
    fn destroy_then_realloc_starts_fresh() {
        let mut a = arena(8, 16);
        let _ = a.alloc().unwrap();
        a.destroy();
        assert!(a.slabs.is_empty());
        let p = a.alloc().unwrap();
        assert_eq!(p.as_ptr() as usize % 8, 0);
    }

    proptest::proptest! {
        // Invariant 1: for any (A, S) pair and any free order, every
        // allocation is A-aligned and disjoint from every other live
        // allocation; after matched frees the arena holds no live chunks.
        #[test]
        fn prop_alignment_and_disjointness(
            align in proptest::sample::select(vec![1usize, 2, 4, 8, 16, 64]),
            size in 1usize..=1_048_576,
            n in 1usize..=200,
        ) {
            let mut a = arena(align, size);
            let ptrs: Vec<_> = (0..n).map(|_| a.alloc().unwrap()).collect();

            let mut addrs = HashSet::new();
            for p in &ptrs {
                prop_assert_eq!(p.as_ptr() as usize % a.config().align(), 0);
                prop_assert!(addrs.insert(p.as_ptr() as usize));
            }
            prop_assert_eq!(a.live_count(), n);

            for &p in ptrs.iter().rev() {
                // SAFETY: each `p` came from `a.alloc()` above and is
                // freed exactly once in this loop.
                unsafe { a.free(p) };
            }

            prop_assert_eq!(a.live_count(), 0);
        }
    }
}
