//! Validated configuration for arenas, variable arenas, and the I/O queue.
//!
//! The source contract takes `(align, size)`-style positional arguments at
//! every `init` call; these structs give call sites named fields and move
//! the validation the contract describes as "undefined behavior on misuse"
//! (mismatched alignment, zero sizes) to construction time instead.

use std::mem::{align_of, size_of};
use std::num::NonZeroUsize;

use crate::error::ArenaError;

/// Configuration for a fixed-size [`crate::arena::Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
    pub(crate) align: usize,
    pub(crate) chunk_size: usize,
    pub(crate) growth_factor: NonZeroUsize,
}

impl ArenaConfig {
    /// Default growth factor: each new slab holds twice as many chunks as
    /// the last.
    pub const DEFAULT_GROWTH_FACTOR: usize = 2;

    /// Builds a config for chunks of `chunk_size` bytes aligned to `align`.
    ///
    /// `align` is rounded up to at least `align_of::<*const ()>()` and
    /// `chunk_size` to at least `size_of::<*const ()>()` and a multiple of
    /// `align`, mirroring the source contract's "`init` enforces `A >=
    /// alignof(pointer)` and `S >= sizeof(pointer)` by rounding up" — a
    /// free chunk's first word doubles as the free-list link, so it must
    /// be at least pointer-sized and pointer-aligned.
    pub fn new(align: usize, chunk_size: usize) -> Result<Self, ArenaError> {
        if align == 0 || !align.is_power_of_two() {
            return Err(ArenaError::invalid_alignment(align));
        }
        if chunk_size == 0 {
            return Err(ArenaError::invalid_chunk_size(chunk_size, align));
        }

        let align = align.max(align_of::<*const ()>());
        let chunk_size = crate::size::align_ceil(align, chunk_size.max(size_of::<*const ()>()));

        Ok(Self {
            align,
            chunk_size,
            growth_factor: NonZeroUsize::new(Self::DEFAULT_GROWTH_FACTOR).unwrap(),
        })
    }

    /// `ARENA_INIT(arena, T)`: a config sized and aligned for `T`.
    #[must_use]
    pub fn for_type<T>() -> Self {
        Self::new(align_of::<T>(), size_of::<T>())
            .expect("alignof/sizeof a concrete type are always valid")
    }

    /// Overrides the per-slab growth factor (default
    /// [`Self::DEFAULT_GROWTH_FACTOR`]).
    #[must_use]
    pub fn with_growth_factor(mut self, factor: NonZeroUsize) -> Self {
        self.growth_factor = factor;
        self
    }

    #[must_use]
    pub fn align(&self) -> usize {
        self.align
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

/// Configuration for a [`crate::varena::VArena`] bank of flexible structs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VArenaConfig {
    pub(crate) align: usize,
    pub(crate) min: usize,
    pub(crate) off: usize,
    pub(crate) esz: usize,
}

impl VArenaConfig {
    /// `varena_init(varena, A, min, off, esz)`.
    ///
    /// `min` is the declared minimum size of the flexible struct at zero
    /// trailing elements; `off` is the byte offset of the trailing array;
    /// `esz` is the size of one trailing element.
    pub fn new(align: usize, min: usize, off: usize, esz: usize) -> Result<Self, ArenaError> {
        if align == 0 || !align.is_power_of_two() {
            return Err(ArenaError::invalid_alignment(align));
        }
        if esz == 0 {
            return Err(ArenaError::invalid_chunk_size(esz, align));
        }

        Ok(Self {
            align,
            min,
            off,
            esz,
        })
    }

    #[must_use]
    pub fn align(&self) -> usize {
        self.align
    }

    #[must_use]
    pub fn min(&self) -> usize {
        self.min
    }

    #[must_use]
    pub fn off(&self) -> usize {
        self.off
    }

    #[must_use]
    pub fn esz(&self) -> usize {
        self.esz
    }
}

/// Configuration for [`crate::ioq::Ioq::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoqConfig {
    pub(crate) depth: NonZeroUsize,
    pub(crate) workers: NonZeroUsize,
}

impl IoqConfig {
    /// `depth` bounds the number of entries concurrently outstanding;
    /// `workers` is the number of background dispatch threads.
    #[must_use]
    pub fn new(depth: NonZeroUsize, workers: NonZeroUsize) -> Self {
        Self { depth, workers }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers.get()
    }
}

impl Default for IoqConfig {
    /// A modest depth and `workers` sized to
    /// [`std::thread::available_parallelism`] (falling back to one worker
    /// if the platform can't report it).
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        Self {
            depth: NonZeroUsize::new(64).unwrap(),
            workers: NonZeroUsize::new(workers).unwrap_or(NonZeroUsize::new(1).unwrap()),
        }
    }
}
