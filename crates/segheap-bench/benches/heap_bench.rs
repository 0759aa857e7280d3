//! Heap benchmarks.

use std::collections::HashSet;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use segheap_core::{CoalescePolicy, Heap, HeapConfig};
use segheap_harness::{Challenge, Op, RunOptions, WorkloadSpec, replay};

const POLICIES: [CoalescePolicy; 2] = [CoalescePolicy::Immediate, CoalescePolicy::Never];

fn quiet_heap(policy: CoalescePolicy) -> Heap {
    Heap::new(
        HeapConfig::default()
            .with_coalesce(policy)
            .with_log_capacity(0),
    )
}

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let sizes: &[usize] = &[16, 64, 256, 1024, 4000];
    let mut group = c.benchmark_group("alloc_free_cycle");

    for &size in sizes {
        group.bench_with_input(BenchmarkId::new("system", size), &size, |b, &sz| {
            b.iter(|| {
                let v = vec![0u8; sz];
                criterion::black_box(v);
            });
        });
        for policy in POLICIES {
            let mut heap = quiet_heap(policy);
            group.bench_with_input(BenchmarkId::new(policy.as_str(), size), &size, |b, &sz| {
                b.iter(|| {
                    let ptr = heap.allocate(sz).expect("allocate");
                    criterion::black_box(ptr);
                    // SAFETY: `ptr` was just allocated from `heap` and is freed once.
                    unsafe { heap.deallocate(ptr) };
                });
            });
        }
    }
    group.finish();
}

fn bench_alloc_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_burst");

    for policy in POLICIES {
        let mut heap = quiet_heap(policy);
        let mut ptrs = Vec::with_capacity(1000);
        group.bench_function(BenchmarkId::new(policy.as_str(), "1000x64B"), |b| {
            b.iter(|| {
                for _ in 0..1000 {
                    ptrs.push(heap.allocate(64).expect("allocate"));
                }
                for ptr in ptrs.drain(..) {
                    // SAFETY: each pointer came from `heap` and is drained once.
                    unsafe { heap.deallocate(ptr) };
                }
            });
        });
    }
    group.finish();
}

/// Challenge ops followed by frees of every survivor, so the heap returns to
/// an all-free state after each replay.
fn closed_ops(challenge: Challenge) -> Vec<Op> {
    let spec = WorkloadSpec {
        epochs: 5,
        allocs_per_epoch: 200,
        seed: 0xBE4C,
    };
    let mut ops = challenge.ops(&spec);
    let mut live = HashSet::new();
    for op in &ops {
        match *op {
            Op::Alloc { id, .. } => {
                live.insert(id);
            }
            Op::Free { id } => {
                live.remove(&id);
            }
        }
    }
    let mut survivors: Vec<u64> = live.into_iter().collect();
    survivors.sort_unstable();
    ops.extend(survivors.into_iter().map(|id| Op::Free { id }));
    ops
}

fn bench_challenge_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("challenge_replay");
    group.sample_size(20);

    for challenge in [Challenge::FixedSmall, Challenge::RandomSmall, Challenge::RandomMixed] {
        let ops = closed_ops(challenge);
        for policy in POLICIES {
            let mut heap = quiet_heap(policy);
            group.bench_with_input(
                BenchmarkId::new(policy.as_str(), challenge.name()),
                &ops,
                |b, ops| {
                    b.iter(|| {
                        let report = replay(&mut heap, challenge.name(), ops, RunOptions::default())
                            .expect("replay");
                        criterion::black_box(report.peak_live_bytes);
                    });
                },
            );
        }
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_alloc_free_cycle,
    bench_alloc_burst,
    bench_challenge_replay
);
criterion_main!(benches);
