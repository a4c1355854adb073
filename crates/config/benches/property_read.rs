// Hot-path property reads
// Run with: cargo bench -p strata-config

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use serde_json::json;
use strata_config::{Configuration, LayeredConfiguration, PropertyRegistry};

fn setup() -> (PropertyRegistry, Arc<LayeredConfiguration>) {
    let config = Arc::new(LayeredConfiguration::new());
    config.set_property("http.timeout_ms", json!("750")).unwrap();
    config.set_property("hosts", json!("a,b,c,d")).unwrap();
    let registry = PropertyRegistry::new();
    registry.install_configuration(config.clone()).unwrap();
    (registry, config)
}

/// Cached typed read, the path application code takes on every request
fn bench_cached_read(c: &mut Criterion) {
    let (registry, _config) = setup();
    let timeout = registry.int_property("http.timeout_ms", 500);
    c.bench_function("cached_int_read", |b| {
        b.iter(|| black_box(timeout.get()));
    });
}

/// Uncached lookup through the layer stack
fn bench_layered_lookup(c: &mut Criterion) {
    let (_registry, config) = setup();
    c.bench_function("layered_get_property", |b| {
        b.iter(|| black_box(config.get_property(black_box("http.timeout_ms"))));
    });
    c.bench_function("layered_get_list", |b| {
        b.iter(|| black_box(config.get_list(black_box("hosts"))));
    });
}

/// Write followed by a read that has to reparse
fn bench_update_and_read(c: &mut Criterion) {
    let (registry, config) = setup();
    let timeout = registry.int_property("http.timeout_ms", 500);
    let mut n = 0_u32;
    c.bench_function("set_then_cached_read", |b| {
        b.iter(|| {
            n = n.wrapping_add(1);
            config
                .set_property("http.timeout_ms", json!(n.to_string()))
                .unwrap();
            black_box(timeout.get())
        });
    });
}

criterion_group!(
    benches,
    bench_cached_read,
    bench_layered_lookup,
    bench_update_and_read
);
criterion_main!(benches);
