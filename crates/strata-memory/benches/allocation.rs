//! Allocation-path benchmarks: raw bumping, container growth, map traffic.

use std::hint::black_box;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use strata_memory::{Arena, ArenaList, ArenaMap, ArenaString};

fn bump_allocation(c: &mut Criterion) {
    c.bench_function("alloc_4096_u64", |b| {
        b.iter_batched(
            Arena::new,
            |arena| {
                for i in 0..4096u64 {
                    black_box(arena.alloc(i));
                }
                arena
            },
            BatchSize::SmallInput,
        );
    });

    c.bench_function("alloc_mixed_alignments", |b| {
        b.iter_batched(
            Arena::new,
            |arena| {
                for i in 0..1024usize {
                    let align = 1 << (i % 4);
                    black_box(arena.alloc_raw_uninit(24, align));
                }
                arena
            },
            BatchSize::SmallInput,
        );
    });
}

fn list_push(c: &mut Criterion) {
    c.bench_function("list_push_10k", |b| {
        b.iter_batched(
            Arena::new,
            |arena| {
                let mut list: ArenaList<'_, u64> = ArenaList::new(&arena, 0);
                for i in 0..10_000u64 {
                    list.push(i);
                }
                black_box(list.len());
                arena
            },
            BatchSize::SmallInput,
        );
    });
}

fn string_append(c: &mut Criterion) {
    c.bench_function("string_append_64k", |b| {
        b.iter_batched(
            Arena::new,
            |arena| {
                let mut s = ArenaString::new(&arena, 16);
                for _ in 0..4096 {
                    s.push_str("0123456789abcdef");
                }
                black_box(s.len());
                arena
            },
            BatchSize::SmallInput,
        );
    });
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Entry {
    key: u32,
    value: u32,
}

fn map_traffic(c: &mut Criterion) {
    c.bench_function("map_insert_4k", |b| {
        b.iter_batched(
            || {
                let arena = Arena::new();
                arena.set_hash_key(0x5eed);
                arena
            },
            |arena| {
                let mut map = ArenaMap::<Entry>::with_opaque_keys(&arena, 16, 4);
                for key in 0..4096u32 {
                    map.find_or_insert(Entry { key, value: key });
                }
                black_box(map.len());
                arena
            },
            BatchSize::SmallInput,
        );
    });

    c.bench_function("map_find_hit_4k", |b| {
        let arena = Arena::new();
        arena.set_hash_key(0x5eed);
        let mut map = ArenaMap::<Entry>::with_opaque_keys(&arena, 4096, 4);
        for key in 0..4096u32 {
            map.find_or_insert(Entry { key, value: key });
        }
        b.iter(|| {
            let mut sum = 0u64;
            for key in 0..4096u32 {
                sum += u64::from(map.find_opaque(&key).unwrap().value);
            }
            black_box(sum)
        });
    });
}

criterion_group!(benches, bump_allocation, list_push, string_append, map_traffic);
criterion_main!(benches);
