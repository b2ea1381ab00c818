use crate::cache::DEFAULT_SWEEP_INTERVAL;
use crate::resolver::{DEFAULT_ENV_PREFIX, EnvOverride, Resolver, RouteCache, StoreSource};
use crate::store::{HttpTenantStore, StaticTenantStore, StoreError, TenantStore};
use crate::types::TenantRoute;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cache_ttl_secs cannot be 0")]
    ZeroCacheTtl,
    #[error("sweep_interval_secs cannot be 0")]
    ZeroSweepInterval,
    #[error("sweep_interval_secs ({sweep}) must not be shorter than cache_ttl_secs ({ttl})")]
    SweepShorterThanTtl { sweep: u64, ttl: u64 },
    #[error("store_timeout_secs cannot be 0")]
    ZeroStoreTimeout,
    #[error("tenant store URL is empty")]
    EmptyStoreUrl,
    #[error("static tenant has an empty secret_id")]
    EmptySecretId,
    #[error("duplicate static tenant: {0}")]
    DuplicateSecretId(String),
    #[error("could not build tenant store: {0}")]
    Store(#[from] StoreError),
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreConfig {
    Static {
        #[serde(default)]
        tenants: Vec<TenantRoute>,
    },
    Http {
        url: String,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Static {
            tenants: Vec::new(),
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    /// How long a resolved route is served from memory.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Prefix of the environment variables that override destinations.
    #[serde(default = "default_env_prefix")]
    pub env_prefix: String,
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_secs()
}

fn default_env_prefix() -> String {
    DEFAULT_ENV_PREFIX.to_string()
}

fn default_store_timeout_secs() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_ttl_secs: default_cache_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            env_prefix: default_env_prefix(),
            store_timeout_secs: default_store_timeout_secs(),
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_ttl_secs == 0 {
            return Err(ConfigError::ZeroCacheTtl);
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::ZeroSweepInterval);
        }
        if self.sweep_interval_secs < self.cache_ttl_secs {
            return Err(ConfigError::SweepShorterThanTtl {
                sweep: self.sweep_interval_secs,
                ttl: self.cache_ttl_secs,
            });
        }
        if self.store_timeout_secs == 0 {
            return Err(ConfigError::ZeroStoreTimeout);
        }

        match &self.store {
            StoreConfig::Http { url } if url.trim().is_empty() => Err(ConfigError::EmptyStoreUrl),
            StoreConfig::Http { .. } => Ok(()),
            StoreConfig::Static { tenants } => {
                let mut seen = HashSet::new();
                for tenant in tenants {
                    if tenant.secret_id.is_empty() {
                        return Err(ConfigError::EmptySecretId);
                    }
                    if !seen.insert(&tenant.secret_id) {
                        return Err(ConfigError::DuplicateSecretId(tenant.secret_id.clone()));
                    }
                }
                Ok(())
            }
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    fn build_store(&self) -> Result<Arc<dyn TenantStore>, ConfigError> {
        let store: Arc<dyn TenantStore> = match &self.store {
            StoreConfig::Static { tenants } => {
                Arc::new(StaticTenantStore::new(tenants.iter().cloned()))
            }
            StoreConfig::Http { url } => Arc::new(HttpTenantStore::new(url, self.store_timeout())?),
        };
        Ok(store)
    }

    /// Builds the resolver chain: cache, environment overrides, tenant store.
    pub fn build_resolver(&self) -> Result<Resolver, ConfigError> {
        self.validate()?;

        let cache = Arc::new(RouteCache::new(self.cache_ttl()));
        let store = self.build_store()?;

        Ok(Resolver::new(
            cache,
            vec![
                Box::new(EnvOverride::new(&self.env_prefix)),
                Box::new(StoreSource::new(store, self.store_timeout())),
            ],
        ))
    }
}
