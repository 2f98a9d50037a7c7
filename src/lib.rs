//! # bfs-core
//!
//! Arena allocators and an asynchronous I/O worker queue: the memory and
//! concurrency substrate a high-performance directory traversal tool sits
//! on.
//!
//! - [`arena`]: a slab-backed free-list allocator for many same-shaped
//!   objects of one fixed `(alignment, size)`.
//! - [`varena`]: a bank of [`arena::Arena`]s, bucketed by size class, for
//!   flexible structs with a trailing array whose length is chosen per
//!   allocation.
//! - [`ioq`]: a bounded async queue that off-loads blocking `close`/
//!   `opendir`/`closedir` syscalls onto a worker pool and returns
//!   completions through a concurrent channel.
//! - [`size`]/[`raw`]: the saturating size arithmetic and raw aligned
//!   allocation primitives both of the above are built on.
//! - [`config`]: validated, named configuration for all three.
//!
//! ## Quick start
//!
//! ```rust
//! use bfs_core::arena::Arena;
//! use bfs_core::config::ArenaConfig;
//!
//! let mut arena = Arena::new(ArenaConfig::new(8, 32).unwrap());
//! let chunk = arena.alloc().unwrap();
//! // SAFETY: `chunk` came from this arena and is freed exactly once.
//! unsafe { arena.free(chunk) };
//! ```
//!
//! ## Scope
//!
//! `arena`/`varena` are single-threaded by contract — neither type is
//! `Send` or `Sync`. `ioq` is the multi-threaded half: one driver thread
//! owns its API surface at a time while a worker pool executes the
//! filesystem syscalls it's handed. Neither subsystem defines a wire
//! format, persists state, or reads environment variables; directory
//! traversal, CLI parsing, and output formatting are out of scope — this
//! crate only defines the interfaces those collaborators call.
//!
//! ## Features
//!
//! - `std` (default): enabled unconditionally today; kept as a feature so
//!   a future `no_std` split has somewhere to hang off of.
//! - `arena` (default): [`arena`] and [`varena`].
//! - `ioq` (default): the asynchronous I/O queue, pulling in `crossbeam-queue`
//!   and `nix`.
//! - `logging` (default): structured `tracing` instrumentation across
//!   slab growth, worker lifecycle, and submission failures.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(clippy::all)]
#![warn(clippy::perf)]
#![warn(rust_2018_idioms)]
#![allow(clippy::module_name_repetitions)]
// Cast truncation/sign-loss in size/errno arithmetic is reviewed per-site.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
// Internal methods return Option/Result for API parity with the source
// contract even when a given branch can't currently fail.
#![allow(clippy::unnecessary_wraps)]

pub mod config;
pub mod error;

#[cfg(feature = "arena")]
#[cfg_attr(docsrs, doc(cfg(feature = "arena")))]
pub mod arena;
#[cfg(feature = "arena")]
#[cfg_attr(docsrs, doc(cfg(feature = "arena")))]
pub mod varena;

#[cfg(feature = "ioq")]
#[cfg_attr(docsrs, doc(cfg(feature = "ioq")))]
pub mod ioq;

pub mod raw;
pub mod size;

pub use crate::error::{ArenaError, ArenaResult, QueueError, QueueResult};

/// Convenient re-exports of the crate's core types.
pub mod prelude {
    pub use crate::config::{ArenaConfig, VArenaConfig};
    #[cfg(feature = "ioq")]
    pub use crate::config::IoqConfig;
    pub use crate::error::{ArenaError, ArenaResult, QueueError, QueueResult};

    #[cfg(feature = "arena")]
    pub use crate::arena::Arena;
    #[cfg(feature = "arena")]
    pub use crate::varena::VArena;

    #[cfg(feature = "ioq")]
    pub use crate::ioq::{DirSlot, Ioq, IoqEnt, IoqOp};
}
