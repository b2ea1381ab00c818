use crate::cache::ExpiringCache;
use crate::metrics_defs::{CACHE_HIT, CACHE_MISS, RESOLVE_NOT_FOUND};
use crate::store::TenantStore;
use crate::types::TenantRoute;
use async_trait::async_trait;
use shared::counter;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ENV_PREFIX: &str = "CLIENT_";

pub type RouteCache = ExpiringCache<String, Arc<TenantRoute>>;

/// One step of the resolution chain that runs after a cache miss.
#[async_trait]
pub trait RouteSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lookup(&self, secret_id: &str) -> Option<TenantRoute>;
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Destination overrides read from the process environment.
pub struct EnvOverride {
    prefix: String,
    lookup: EnvLookup,
}

impl EnvOverride {
    pub fn new(prefix: &str) -> Self {
        Self::with_lookup(prefix, Box::new(|key| std::env::var(key).ok()))
    }

    pub fn with_lookup(prefix: &str, lookup: EnvLookup) -> Self {
        EnvOverride {
            prefix: prefix.to_string(),
            lookup,
        }
    }

    /// Keys tried in order: lowercase suffix, then uppercase suffix.
    pub fn candidate_keys(&self, secret_id: &str) -> [String; 2] {
        let suffix = secret_id.replace('-', "_");
        [
            format!("{}{}", self.prefix, suffix.to_lowercase()),
            format!("{}{}", self.prefix, suffix.to_uppercase()),
        ]
    }
}

#[async_trait]
impl RouteSource for EnvOverride {
    fn name(&self) -> &'static str {
        "env"
    }

    async fn lookup(&self, secret_id: &str) -> Option<TenantRoute> {
        self.candidate_keys(secret_id).iter().find_map(|key| {
            let value = (self.lookup)(key.as_str())?;
            let url = value.trim();
            if url.is_empty() {
                return None;
            }
            Some(TenantRoute::new(secret_id, url))
        })
    }
}

/// Adapts a tenant store into a source. Errors and timeouts are logged and
/// reported as not found.
pub struct StoreSource {
    store: Arc<dyn TenantStore>,
    timeout: Duration,
}

impl StoreSource {
    pub fn new(store: Arc<dyn TenantStore>, timeout: Duration) -> Self {
        StoreSource { store, timeout }
    }
}

#[async_trait]
impl RouteSource for StoreSource {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn lookup(&self, secret_id: &str) -> Option<TenantRoute> {
        match tokio::time::timeout(self.timeout, self.store.get_by_secret_id(secret_id)).await {
            Ok(Ok(route)) => route,
            Ok(Err(err)) => {
                tracing::error!(secret_id, error = %err, "tenant store lookup failed");
                None
            }
            Err(_) => {
                tracing::error!(secret_id, timeout = ?self.timeout, "tenant store lookup timed out");
                None
            }
        }
    }
}

/// Resolves a secret to its route: cache first, then each source in order.
/// The first usable route wins and is cached.
#[derive(Clone)]
pub struct Resolver {
    cache: Arc<RouteCache>,
    sources: Arc<Vec<Box<dyn RouteSource>>>,
}

impl Resolver {
    pub fn new(cache: Arc<RouteCache>, sources: Vec<Box<dyn RouteSource>>) -> Self {
        Resolver {
            cache,
            sources: Arc::new(sources),
        }
    }

    pub async fn resolve(&self, secret_id: &str) -> Option<Arc<TenantRoute>> {
        if let Some(route) = self.cache.get(secret_id) {
            counter!(CACHE_HIT).increment(1);
            return Some(route);
        }
        counter!(CACHE_MISS).increment(1);

        for source in self.sources.iter() {
            let Some(route) = source.lookup(secret_id).await else {
                continue;
            };
            if !route.is_usable() {
                tracing::debug!(secret_id, source = source.name(), "skipping unusable route");
                continue;
            }

            tracing::debug!(secret_id, source = source.name(), "resolved tenant route");
            let route = Arc::new(route);
            self.cache.set(secret_id.to_string(), route.clone());
            return Some(route);
        }

        counter!(RESOLVE_NOT_FOUND).increment(1);
        None
    }

    /// Drops the cached route so the next request re-runs the chain.
    pub fn invalidate(&self, secret_id: &str) -> bool {
        self.cache.delete(secret_id)
    }

    pub fn cache(&self) -> &Arc<RouteCache> {
        &self.cache
    }
}
