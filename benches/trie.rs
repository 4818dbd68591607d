use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{thread_rng, Rng};

use pact::trible::Trible;
use pact::tribleset::TribleSet;
use pact::trie::PACT;

fn random_keys(count: usize) -> Vec<[u8; 64]> {
    let mut rng = thread_rng();
    (0..count)
        .map(|_| {
            let mut key = [0u8; 64];
            rng.fill(&mut key[..]);
            key
        })
        .collect()
}

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");
    for count in [1_000usize, 100_000] {
        let keys = random_keys(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(BenchmarkId::from_parameter(count), |b| {
            b.iter(|| {
                let mut tree = PACT::<64, ()>::new();
                for key in &keys {
                    tree.put(key, ());
                }
                black_box(tree)
            })
        });
    }
    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let keys = random_keys(100_000);
    let mut tree = PACT::<64, ()>::new();
    for key in &keys {
        tree.put(key, ());
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(keys.len() as u64));
    group.bench_function("100000", |b| {
        b.iter(|| {
            for key in &keys {
                black_box(tree.get(key));
            }
        })
    });
    group.finish();
}

fn bench_union(c: &mut Criterion) {
    let left_keys = random_keys(50_000);
    let right_keys = random_keys(50_000);
    let mut left = PACT::<64, ()>::new();
    for key in &left_keys {
        left.put(key, ());
    }
    let mut right = PACT::<64, ()>::new();
    for key in &right_keys {
        right.put(key, ());
    }

    let mut group = c.benchmark_group("union");
    group.throughput(Throughput::Elements(
        (left_keys.len() + right_keys.len()) as u64,
    ));
    group.bench_function("50000+50000", |b| {
        b.iter(|| black_box(PACT::union([left.clone(), right.clone()])))
    });
    group.finish();
}

fn bench_tribleset_add(c: &mut Criterion) {
    let mut rng = thread_rng();
    let tribles: Vec<Trible> = (0..10_000)
        .map(|_| {
            let mut data = [0u8; 64];
            rng.fill(&mut data[..]);
            Trible { data }
        })
        .collect();

    let mut group = c.benchmark_group("tribleset/add");
    group.throughput(Throughput::Elements(tribles.len() as u64));
    group.bench_function("10000", |b| {
        b.iter(|| {
            let mut set = TribleSet::new();
            for trible in &tribles {
                set.add(trible);
            }
            black_box(set)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_put, bench_get, bench_union, bench_tribleset_add);
criterion_main!(benches);
