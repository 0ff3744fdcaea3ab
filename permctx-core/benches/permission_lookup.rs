//! Benchmarks for permission resolution and cached lookups
//!
//! Run with: cargo bench -p permctx-core --bench permission_lookup

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use permctx_core::config::{CacheConfig, ResolutionConfig};
use permctx_core::context::Contexts;
use permctx_core::manager::GroupManager;
use permctx_core::models::{Node, User};
use permctx_core::resolver::Resolver;
use uuid::Uuid;

/// A chain of `depth` groups, each granting a handful of nodes
fn setup(depth: usize) -> (Arc<Resolver>, Arc<User>) {
    let groups = Arc::new(GroupManager::new());
    for level in 0..depth {
        let group = groups
            .get_or_make(&format!("rank{level}"))
            .expect("Failed to create group");
        group.set_permission(Node::weight(level as i32).expect("weight")).expect("set");
        for i in 0..20 {
            group
                .set_permission(Node::new(format!("plugin{level}.command{i}"), true).expect("node"))
                .expect("set");
        }
        group
            .set_permission(Node::new(format!("plugin{level}.admin.*"), level % 2 == 0).expect("node"))
            .expect("set");
        if level + 1 < depth {
            group
                .set_permission(Node::inheritance(&format!("rank{}", level + 1)).expect("node"))
                .expect("set");
        }
    }

    let resolver = Arc::new(Resolver::new(groups, ResolutionConfig::default()));
    let user = User::new(Uuid::new_v4(), None, resolver.clone(), &CacheConfig::default());
    user.set_permission(Node::inheritance("rank0").expect("node")).expect("set");
    (resolver, user)
}

/// Benchmark: full inheritance resolution
fn bench_export_nodes(c: &mut Criterion) {
    let mut group = c.benchmark_group("export_nodes");
    for depth in [1, 4, 16] {
        let (resolver, user) = setup(depth);
        let contexts = Contexts::allow_all();
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| black_box(resolver.export_nodes(user.holder(), black_box(&contexts))));
        });
    }
    group.finish();
}

/// Benchmark: lookups against a warm cache entry
fn bench_cached_lookup(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Failed to create runtime");
    let (_resolver, user) = setup(8);
    let contexts = Contexts::allow_all();
    let data = rt
        .block_on(user.cached_data().get_permission_data(&contexts))
        .expect("build failed");

    c.bench_function("lookup_exact", |b| {
        b.iter(|| black_box(data.check_permission(black_box("plugin3.command7"))));
    });
    c.bench_function("lookup_wildcard", |b| {
        b.iter(|| black_box(data.check_permission(black_box("plugin5.admin.reload"))));
    });
    c.bench_function("lookup_undefined", |b| {
        b.iter(|| black_box(data.check_permission(black_box("other.plugin.node"))));
    });

    c.bench_function("get_permission_data_hit", |b| {
        b.to_async(&rt).iter(|| async {
            let data = user
                .cached_data()
                .get_permission_data(black_box(&contexts))
                .await
                .expect("lookup failed");
            black_box(data);
        });
    });
}

criterion_group!(benches, bench_export_nodes, bench_cached_lookup);
criterion_main!(benches);
