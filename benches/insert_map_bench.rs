use atomic_insert_map::{AtomicInsertMap, MutAtom};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::atomic::Ordering::Relaxed;
use std::thread;

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

fn key(n: u64) -> String {
    format!("k{:016x}", n)
}

fn bench_insert(c: &mut Criterion) {
    c.bench_function("insert_map_insert_10k", |b| {
        b.iter_batched(
            || AtomicInsertMap::<String, u64>::new(10_000),
            |m| {
                for (i, x) in lcg(1).take(10_000).enumerate() {
                    m.insert(key(x), i as u64).unwrap();
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_find_hit(c: &mut Criterion) {
    c.bench_function("insert_map_find_hit", |b| {
        let m = AtomicInsertMap::<String, u64>::new(20_000);
        let keys: Vec<_> = lcg(7).take(20_000).map(key).collect();
        for (i, k) in keys.iter().cloned().enumerate() {
            m.insert(k, i as u64).unwrap();
        }
        let mut it = keys.iter().cycle();
        b.iter(|| {
            let k = it.next().unwrap();
            black_box(m.find(k).unwrap());
        })
    });
}

fn bench_find_miss(c: &mut Criterion) {
    c.bench_function("insert_map_find_miss", |b| {
        let m = AtomicInsertMap::<String, u64>::new(10_000);
        for (i, x) in lcg(11).take(10_000).enumerate() {
            m.insert(key(x), i as u64).unwrap();
        }
        let mut miss = lcg(0xdead_beef);
        b.iter(|| {
            let k = key(miss.next().unwrap());
            black_box(m.find(&k).is_none());
        })
    });
}

fn bench_contended_increment(c: &mut Criterion) {
    c.bench_function("insert_map_contended_increment_4thr", |b| {
        let m = AtomicInsertMap::<u64, MutAtom<u64>>::new(64);
        for i in 0..64 {
            m.insert(i, MutAtom::new(0)).unwrap();
        }
        b.iter(|| {
            thread::scope(|s| {
                for t in 0..4u64 {
                    let m = &m;
                    s.spawn(move || {
                        for i in 0..1_000u64 {
                            let k = (t.wrapping_mul(31).wrapping_add(i)) % 64;
                            m.get(&k).unwrap().fetch_add(1, Relaxed);
                        }
                    });
                }
            });
        })
    });
}

criterion_group!(
    benches,
    bench_insert,
    bench_find_hit,
    bench_find_miss,
    bench_contended_increment
);
criterion_main!(benches);
