//! Tenant routing: maps an opaque webhook secret to the tenant's destination
//! and policy, memoized in an expiring cache.

pub mod cache;
pub mod config;
pub mod metrics_defs;
pub mod resolver;
pub mod store;
pub mod types;

pub use cache::{ExpiringCache, Sweeper};
pub use resolver::{Resolver, RouteSource};
pub use store::{StoreError, TenantStore};
pub use types::{Plan, TenantRoute};
