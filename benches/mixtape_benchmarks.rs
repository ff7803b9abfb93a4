//! # Mixtape Performance Benchmarks
//!
//! Benchmarks for the mining pipeline and the request path.
//!
//! ## Benchmark Categories
//!
//! - **Mining**: FP-Growth over synthetic playlist corpora of growing size
//! - **Rules**: Rule derivation from mined itemsets
//! - **Matching**: Index construction and per-query recommendation
//!
//! ## Running Benchmarks
//!
//! ```bash
//! cargo bench
//! cargo bench mining
//! ```

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use mixtape::artifact::{ArtifactMetadata, ModelArtifact};
use mixtape::fpgrowth::{mine, MiningParams};
use mixtape::matcher::Matcher;
use mixtape::rules::generate_rules;
use mixtape::transactions::Transaction;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

/// Playlists drawing from a skewed catalog so that a handful of tracks
/// co-occur often enough to be frequent.
fn create_playlists(count: usize, catalog: usize) -> Vec<Transaction> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|_| {
            let len = rng.gen_range(5..30);
            (0..len)
                .map(|_| {
                    let skewed = rng.gen_range(0.0f64..1.0).powi(3);
                    format!("track-{}", (skewed * catalog as f64) as usize)
                })
                .collect()
        })
        .collect()
}

fn benchmark_mining(c: &mut Criterion) {
    let mut group = c.benchmark_group("mining");
    group.sample_size(20);

    for size in [1_000, 5_000, 20_000] {
        let playlists = create_playlists(size, 2_000);
        group.bench_with_input(BenchmarkId::new("fpgrowth", size), &playlists, |b, playlists| {
            b.iter(|| mine(black_box(playlists), &MiningParams::new(0.02)))
        });
    }

    group.finish();
}

fn benchmark_rules(c: &mut Criterion) {
    let mut group = c.benchmark_group("rules");
    let playlists = create_playlists(5_000, 2_000);

    for ratio in [0.05, 0.02] {
        let itemsets = mine(&playlists, &MiningParams::new(ratio)).expect("benchmark corpus has frequent itemsets");
        group.bench_with_input(BenchmarkId::new("generate", ratio), &itemsets, |b, itemsets| {
            b.iter(|| generate_rules(black_box(itemsets), 0.3))
        });
    }

    group.finish();
}

fn benchmark_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("matching");
    let playlists = create_playlists(5_000, 2_000);
    let itemsets = mine(&playlists, &MiningParams::new(0.02)).expect("benchmark corpus has frequent itemsets");
    let artifact = ModelArtifact::new(generate_rules(&itemsets, 0.3), ArtifactMetadata::default());

    group.bench_function("build_index", |b| {
        b.iter(|| Matcher::new(black_box(artifact.clone())))
    });

    let matcher = Matcher::new(artifact);
    let query = ["TRACK-0 ", "track-1", "track-7", "unknown"];
    group.bench_function("recommend", |b| {
        b.iter(|| matcher.recommend(black_box(&query), Some(20)))
    });

    group.finish();
}

criterion_group!(benches, benchmark_mining, benchmark_rules, benchmark_matching);

criterion_main!(benches);
