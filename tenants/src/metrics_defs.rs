//! Metrics definitions for tenant resolution.

use shared::metrics_defs::{MetricDef, MetricType};

pub const CACHE_HIT: MetricDef = MetricDef {
    name: "tenant.cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of resolutions answered from the route cache",
};

pub const CACHE_MISS: MetricDef = MetricDef {
    name: "tenant.cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of resolutions that fell through to the route sources",
};

pub const RESOLVE_NOT_FOUND: MetricDef = MetricDef {
    name: "tenant.resolve.not_found",
    metric_type: MetricType::Counter,
    description: "Number of secrets no source could resolve to a usable route",
};

pub const ALL_METRICS: &[MetricDef] = &[CACHE_HIT, CACHE_MISS, RESOLVE_NOT_FOUND];
