use bloomcache::filter::BloomFilter;
use bloomcache::settings::Settings;
use bloomcache::Cache;
use chrono::Utc;
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

fn benchmark_filter_add_key(c: &mut Criterion) {
    let mut filter = BloomFilter::new_by_fail_rate(100_000, 0.01);

    c.bench_function("filter_add_key", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let key = format!("bench_key_{}", counter % 100_000);
            black_box(filter.add_key(key.as_bytes()))
        })
    });
}

fn benchmark_filter_has_key(c: &mut Criterion) {
    let mut filter = BloomFilter::new_by_fail_rate(100_000, 0.01);
    for i in 0..50_000 {
        filter.add_key(format!("bench_key_{}", i).as_bytes());
    }

    c.bench_function("filter_has_key", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            // half hits, half misses
            let key = format!("bench_key_{}", counter % 100_000);
            black_box(filter.has_key(key.as_bytes()))
        })
    });
}

fn benchmark_filter_serialize(c: &mut Criterion) {
    let mut filter = BloomFilter::new_by_fail_rate(10_000, 0.01);
    for i in 0..5_000 {
        filter.add_key(format!("bench_key_{}", i).as_bytes());
    }
    let capacity = filter.capacity();

    c.bench_function("filter_serialize_round_trip", |b| {
        b.iter(|| {
            let text = filter.convert_to_string();
            black_box(BloomFilter::convert_string_to_filter(&text, capacity))
        })
    });
}

fn benchmark_cache_set_and_evict(c: &mut Criterion) {
    let cache = Cache::local(Settings::default()).unwrap();

    c.bench_function("cache_set_expiration_and_evict", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let key = format!("ttl_key_{}", counter % 1000);
            cache.set_expiration(&key, "v", 0).unwrap();
            black_box(cache.evict_expired_keys(Utc::now()).unwrap())
        })
    });
}

criterion_group!(
    benches,
    benchmark_filter_add_key,
    benchmark_filter_has_key,
    benchmark_filter_serialize,
    benchmark_cache_set_and_evict
);
criterion_main!(benches);
