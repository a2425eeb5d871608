use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rehash_map::{BytesBehavior, MapBehavior, RehashMap};

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

fn key(n: u64) -> String {
    format!("k{:016x}", n)
}

fn drive_idle<B: MapBehavior>(m: &mut RehashMap<B>) {
    while m.rehash(1024) {}
}

fn filled(n: usize, seed: u64) -> (RehashMap<BytesBehavior<String, u64>>, Vec<String>) {
    let mut m = RehashMap::new(BytesBehavior::new());
    let keys: Vec<String> = lcg(seed).take(n).map(key).collect();
    for (i, k) in keys.iter().enumerate() {
        m.add(k.clone(), i as u64).unwrap();
    }
    drive_idle(&mut m);
    (m, keys)
}

fn bench_add(c: &mut Criterion) {
    c.bench_function("rehash_map_add_10k", |b| {
        b.iter_batched(
            || RehashMap::<BytesBehavior<String, u64>>::new(BytesBehavior::new()),
            |mut m| {
                for (i, x) in lcg(1).take(10_000).enumerate() {
                    m.add(key(x), i as u64).unwrap();
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_find_hit(c: &mut Criterion) {
    c.bench_function("rehash_map_find_hit", |b| {
        let (mut m, keys) = filled(20_000, 7);
        let mut it = keys.iter().cycle();
        b.iter(|| {
            let k = it.next().unwrap();
            black_box(m.fetch_value(k));
        })
    });
}

fn bench_find_miss(c: &mut Criterion) {
    c.bench_function("rehash_map_find_miss", |b| {
        let (mut m, _keys) = filled(10_000, 11);
        let mut miss = lcg(0xdead_beef);
        b.iter(|| {
            let k = key(miss.next().unwrap());
            black_box(m.fetch_value(&k));
        })
    });
}

fn bench_delete_reinsert(c: &mut Criterion) {
    c.bench_function("rehash_map_delete_reinsert", |b| {
        let (mut m, keys) = filled(10_000, 23);
        let mut it = keys.iter().cycle();
        b.iter(|| {
            let k = it.next().unwrap();
            m.delete(k).unwrap();
            m.add(k.clone(), 0).unwrap();
        })
    });
}

fn bench_migration(c: &mut Criterion) {
    // Cost of driving a full migration of 8k entries in 100-bucket steps.
    c.bench_function("rehash_map_migrate_8k", |b| {
        b.iter_batched(
            || {
                let (mut m, _keys) = filled(8_192, 43);
                m.expand(m.slots() * 4).unwrap();
                m
            },
            |mut m| {
                while m.rehash(100) {}
                black_box(m)
            },
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(
    benches,
    bench_add,
    bench_find_hit,
    bench_find_miss,
    bench_delete_reinsert,
    bench_migration
);
criterion_main!(benches);
