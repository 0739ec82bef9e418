use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use tempfile::tempdir;

use disk_cache::DiskCache;

const N: usize = 500;
const VAL_SIZE: usize = 100;

fn cache_write(c: &mut Criterion) {
    c.bench_function("cache_write_500", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let cache = DiskCache::open(dir.path(), 1, u64::MAX).unwrap();
                (dir, cache)
            },
            |(_dir, cache)| {
                let value = "x".repeat(VAL_SIZE);
                for i in 0..N {
                    let editor = cache.edit(&format!("k{i}")).unwrap().unwrap();
                    editor.set(0, &value).unwrap();
                    editor.commit().unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn cache_read_hit(c: &mut Criterion) {
    c.bench_function("cache_read_hit_500", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let cache = DiskCache::open(dir.path(), 1, u64::MAX).unwrap();
                let value = "x".repeat(VAL_SIZE);
                for i in 0..N {
                    let editor = cache.edit(&format!("k{i}")).unwrap().unwrap();
                    editor.set(0, &value).unwrap();
                    editor.commit().unwrap();
                }
                (dir, cache)
            },
            |(_dir, cache)| {
                for i in 0..N {
                    let mut snapshot = cache.read(&format!("k{i}")).unwrap().unwrap();
                    let value = snapshot.read_string(0).unwrap();
                    criterion::black_box(value);
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn cache_reopen(c: &mut Criterion) {
    c.bench_function("cache_reopen_500", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                {
                    let cache = DiskCache::open(dir.path(), 1, u64::MAX).unwrap();
                    let value = "x".repeat(VAL_SIZE);
                    for i in 0..N {
                        let editor = cache.edit(&format!("k{i}")).unwrap().unwrap();
                        editor.set(0, &value).unwrap();
                        editor.commit().unwrap();
                    }
                    cache.close().unwrap();
                }
                dir
            },
            |dir| {
                let cache = DiskCache::open(dir.path(), 1, u64::MAX).unwrap();
                assert_eq!(cache.size(), (N * VAL_SIZE) as u64);
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, cache_write, cache_read_hit, cache_reopen);

criterion_main!(benches);
