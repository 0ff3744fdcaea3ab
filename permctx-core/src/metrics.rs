//! Prometheus metrics for resolution and caching
//!
//! All metrics live in one crate-local registry; embedders expose them by
//! calling [`gather_metrics`] from whatever endpoint they serve.

use prometheus::{
    register_counter_vec_with_registry, register_histogram_vec_with_registry,
    register_int_counter_with_registry, CounterVec, Encoder, HistogramVec, IntCounter, Registry,
    TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: std::sync::LazyLock<Registry> = std::sync::LazyLock::new(Registry::new);

/// Resolution operations
pub mod resolution {
    use super::{
        register_counter_vec_with_registry, register_histogram_vec_with_registry,
        register_int_counter_with_registry, CounterVec, HistogramVec, IntCounter, REGISTRY,
    };

    /// Inheritance resolutions, by output kind ("permissions" or "meta")
    pub static RESOLUTIONS_TOTAL: std::sync::LazyLock<CounterVec> =
        std::sync::LazyLock::new(|| {
            register_counter_vec_with_registry!(
                "permctx_resolutions_total",
                "Total number of inheritance resolutions",
                &["kind"],
                REGISTRY.clone()
            )
            .expect("Failed to register RESOLUTIONS_TOTAL")
        });

    /// Resolution duration histogram
    pub static RESOLUTION_DURATION: std::sync::LazyLock<HistogramVec> =
        std::sync::LazyLock::new(|| {
            register_histogram_vec_with_registry!(
                "permctx_resolution_duration_seconds",
                "Inheritance resolution duration in seconds",
                &["kind"],
                vec![0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05],
                REGISTRY.clone()
            )
            .expect("Failed to register RESOLUTION_DURATION")
        });

    /// Groups skipped because they were already visited
    pub static INHERITANCE_CYCLES: std::sync::LazyLock<IntCounter> =
        std::sync::LazyLock::new(|| {
            register_int_counter_with_registry!(
                "permctx_inheritance_cycles_total",
                "Total number of already-visited groups skipped during resolution",
                REGISTRY.clone()
            )
            .expect("Failed to register INHERITANCE_CYCLES")
        });

    /// Inheritance edges pointing at groups that are not loaded
    pub static MISSING_GROUPS: std::sync::LazyLock<IntCounter> =
        std::sync::LazyLock::new(|| {
            register_int_counter_with_registry!(
                "permctx_missing_groups_total",
                "Total number of inheritance edges to unknown groups",
                REGISTRY.clone()
            )
            .expect("Failed to register MISSING_GROUPS")
        });
}

/// Cache operations
pub mod cache {
    use super::{register_counter_vec_with_registry, CounterVec, REGISTRY};

    /// Cache hit counter
    pub static CACHE_HITS: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "permctx_cache_hits_total",
            "Total number of cache hits",
            &["cache_type"],
            REGISTRY.clone()
        )
        .expect("Failed to register CACHE_HITS")
    });

    /// Cache miss counter
    pub static CACHE_MISSES: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "permctx_cache_misses_total",
            "Total number of cache misses",
            &["cache_type"],
            REGISTRY.clone()
        )
        .expect("Failed to register CACHE_MISSES")
    });

    /// Entries built from scratch
    pub static CACHE_BUILDS: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "permctx_cache_builds_total",
            "Total number of cache entries built",
            &["cache_type"],
            REGISTRY.clone()
        )
        .expect("Failed to register CACHE_BUILDS")
    });

    /// Entries recomputed in place
    pub static CACHE_REFRESHES: std::sync::LazyLock<CounterVec> =
        std::sync::LazyLock::new(|| {
            register_counter_vec_with_registry!(
                "permctx_cache_refreshes_total",
                "Total number of cache entries recomputed in place",
                &["cache_type"],
                REGISTRY.clone()
            )
            .expect("Failed to register CACHE_REFRESHES")
        });
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|_| prometheus::Error::Msg("Invalid UTF-8".to_string()))
}
