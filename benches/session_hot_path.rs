use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};

use vitalog::client::identity_cell;
use vitalog::ident::normalize_handle;
use vitalog::identity::{now_ms, Identity, TokenClaims, TokenCodec};

fn gen_handles(n: usize, seed: u64) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            if i % 2 == 0 {
                format!("User.{:06}@Example.COM  ", rng.gen::<u32>())
            } else {
                format!("+1 ({:03}) {:03}-{:04}", rng.gen_range(200..999), rng.gen_range(200..999), rng.gen_range(0..9999))
            }
        })
        .collect()
}

fn bench_session_hot_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_hot_path");

    // Token verify: every authenticated request pays this.
    let codec = TokenCodec::new(b"bench-secret-key-0123456789".to_vec());
    let user = Identity::new("u-bench", "bench@example.com", "Bench", now_ms());
    let claims = TokenClaims::new(user, now_ms(), 7 * 24 * 60 * 60 * 1000);
    let token = codec.mint(&claims).expect("mint");
    group.throughput(Throughput::Elements(1));
    group.bench_function("token_verify", |b| {
        let now = now_ms();
        b.iter(|| {
            let ok = codec.verify(&token, now);
            criterion::black_box(ok.is_some());
        });
    });
    group.bench_function("token_mint", |b| {
        b.iter(|| {
            let t = codec.mint(&claims).expect("mint");
            criterion::black_box(t);
        });
    });

    // Handle normalization over mixed email/phone inputs.
    for &n in &[1_000usize, 10_000usize] {
        let handles = gen_handles(n, 0xC0FF_EE00);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("normalize_handle", n.to_string()), &n, |b, _| {
            b.iter(|| {
                let mut total = 0usize;
                for h in &handles {
                    total += normalize_handle(h).len();
                }
                criterion::black_box(total);
            });
        });
    }

    // Volatile cache read: the synchronous "who is signed in" answer.
    let (cell, reader) = identity_cell();
    cell.set(Identity::new("u-cache", "cache@example.com", "Cache", now_ms()));
    group.throughput(Throughput::Elements(1));
    group.bench_function("identity_cache_read", |b| {
        b.iter(|| {
            let uid = reader.user_id_or_guest();
            criterion::black_box(uid);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_session_hot_path);
criterion_main!(benches);
