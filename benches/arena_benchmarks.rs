//! Hot-path benchmarks for the arena family and the I/O queue's
//! submission/completion round trip.

use std::hint::black_box;
use std::num::NonZeroUsize;

use bfs_core::arena::Arena;
use bfs_core::config::{ArenaConfig, IoqConfig, VArenaConfig};
use bfs_core::ioq::Ioq;
use bfs_core::varena::VArena;
use criterion::{Criterion, criterion_group, criterion_main};

fn bench_arena_alloc_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena");

    group.bench_function("alloc_free_32b", |b| {
        let mut arena = Arena::new(ArenaConfig::new(8, 32).unwrap());
        b.iter(|| {
            let p = arena.alloc().unwrap();
            // SAFETY: `p` was just allocated above and is freed once here.
            unsafe { arena.free(p) };
            black_box(p);
        });
    });

    group.bench_function("alloc_1000_then_free_1000", |b| {
        b.iter(|| {
            let mut arena = Arena::new(ArenaConfig::new(8, 64).unwrap());
            let ptrs: Vec<_> = (0..1000).map(|_| arena.alloc().unwrap()).collect();
            for p in ptrs {
                // SAFETY: each `p` was allocated above and freed once.
                unsafe { arena.free(p) };
            }
            black_box(&arena);
        });
    });

    group.finish();
}

fn bench_varena_alloc_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("varena");

    group.bench_function("mixed_counts", |b| {
        let mut varena = VArena::new(VArenaConfig::new(8, 24, 16, 8).unwrap());
        let counts = [0usize, 1, 2, 7, 16, 64];
        b.iter(|| {
            let ptrs: Vec<_> = counts.iter().map(|&n| (varena.alloc(n).unwrap(), n)).collect();
            for (p, n) in ptrs {
                // SAFETY: each `p` was allocated above with count `n` and
                // is freed exactly once with the same count.
                unsafe { varena.free(p, n) };
            }
            black_box(&varena);
        });
    });

    group.finish();
}

fn bench_ioq_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("ioq");

    group.bench_function("close_submit_pop_free", |b| {
        let ioq = Ioq::create(IoqConfig::new(
            NonZeroUsize::new(64).unwrap(),
            NonZeroUsize::new(2).unwrap(),
        ))
        .unwrap();

        b.iter(|| {
            let fd = tempfile::tempfile().unwrap();
            use std::os::fd::IntoRawFd;
            ioq.close(fd.into_raw_fd(), 0).unwrap();
            let entry = ioq.pop().unwrap();
            // SAFETY: popped from this queue's completion ring, freed once.
            unsafe { ioq.free(entry) };
            black_box(entry);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_arena_alloc_free, bench_varena_alloc_free, bench_ioq_round_trip);
criterion_main!(benches);
