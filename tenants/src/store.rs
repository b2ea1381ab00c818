//! Read side of the tenant registry. Tenant administration (create, update,
//! delete) lives elsewhere; the relay only ever looks routes up by secret.
use crate::types::{Plan, TenantRoute};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("invalid tenant store URL: {0}")]
    InvalidUrl(String),
    #[error("tenant store returned status {0}")]
    UnexpectedStatus(StatusCode),
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    /// `Ok(None)` when no tenant owns `secret_id`.
    async fn get_by_secret_id(&self, secret_id: &str) -> Result<Option<TenantRoute>, StoreError>;
}

/// Fixed set of routes, loaded from configuration.
#[derive(Default)]
pub struct StaticTenantStore {
    routes: HashMap<String, TenantRoute>,
}

impl StaticTenantStore {
    pub fn new<I>(routes: I) -> Self
    where
        I: IntoIterator<Item = TenantRoute>,
    {
        let routes = routes
            .into_iter()
            .map(|route| (route.secret_id.clone(), route.normalized()))
            .collect();

        StaticTenantStore { routes }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[async_trait]
impl TenantStore for StaticTenantStore {
    async fn get_by_secret_id(&self, secret_id: &str) -> Result<Option<TenantRoute>, StoreError> {
        Ok(self.routes.get(secret_id).cloned())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveResponse {
    webhook_url: String,
    rate_limit_per_min: Option<u32>,
    #[serde(default)]
    plan: Plan,
    #[serde(default)]
    conversion_token: Option<String>,
}

/// Looks routes up through the tenant administration service:
/// `GET {base_url}/api/clients/by-secret/{secret_id}`. The service only
/// answers 200 for active tenants and 404 otherwise.
pub struct HttpTenantStore {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTenantStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let base_url =
            Url::parse(base_url).map_err(|e| StoreError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::InvalidUrl(base_url.to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(HttpTenantStore { client, base_url })
    }

    fn lookup_url(&self, secret_id: &str) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["api", "clients", "by-secret", secret_id]);
        Ok(url)
    }
}

#[async_trait]
impl TenantStore for HttpTenantStore {
    async fn get_by_secret_id(&self, secret_id: &str) -> Result<Option<TenantRoute>, StoreError> {
        let url = self.lookup_url(secret_id)?;
        let response = self.client.get(url).send().await?;

        match response.status() {
            StatusCode::OK => {
                let body = response.json::<ResolveResponse>().await?;
                let route = TenantRoute {
                    secret_id: secret_id.to_string(),
                    destination_url: body.webhook_url,
                    rate_per_minute: body.rate_limit_per_min.unwrap_or_default(),
                    plan: body.plan,
                    active: true,
                    conversion_token: body.conversion_token,
                };
                Ok(Some(route.normalized()))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(StoreError::UnexpectedStatus(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_RATE_PER_MINUTE;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_static_store() {
        let store = StaticTenantStore::new([
            TenantRoute::new("abc", "http://dest/x"),
            TenantRoute {
                rate_per_minute: 0,
                ..TenantRoute::new("def", "http://dest/y")
            },
        ]);
        assert_eq!(store.len(), 2);

        let route = store.get_by_secret_id("abc").await.unwrap().unwrap();
        assert_eq!(route.destination_url, "http://dest/x");

        let route = store.get_by_secret_id("def").await.unwrap().unwrap();
        assert_eq!(route.rate_per_minute, DEFAULT_RATE_PER_MINUTE);

        assert!(store.get_by_secret_id("zzz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_http_store_found() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/clients/by-secret/abc-123"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"webhookUrl": "http://dest/x", "rateLimitPerMin": 120, "plan": "PRO"}"#,
            ))
            .mount(&mock_server)
            .await;

        let store = HttpTenantStore::new(&mock_server.uri(), Duration::from_secs(5)).unwrap();
        let route = store.get_by_secret_id("abc-123").await.unwrap().unwrap();

        assert_eq!(route.secret_id, "abc-123");
        assert_eq!(route.destination_url, "http://dest/x");
        assert_eq!(route.rate_per_minute, 120);
        assert_eq!(route.plan, Plan::Pro);
        assert!(route.active);
        assert_eq!(route.conversion_token, None);
    }

    #[tokio::test]
    async fn test_http_store_not_found() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/clients/by-secret/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let store =
            HttpTenantStore::new(&format!("{}/", mock_server.uri()), Duration::from_secs(5))
                .unwrap();
        assert!(store.get_by_secret_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_http_store_error_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let store = HttpTenantStore::new(&mock_server.uri(), Duration::from_secs(5)).unwrap();
        let result = store.get_by_secret_id("abc").await;
        assert!(matches!(
            result,
            Err(StoreError::UnexpectedStatus(StatusCode::INTERNAL_SERVER_ERROR))
        ));
    }

    #[test]
    fn test_http_store_escapes_secret() {
        let store =
            HttpTenantStore::new("http://admin.internal/base/", Duration::from_secs(5)).unwrap();
        let url = store.lookup_url("a b/c").unwrap();
        assert_eq!(
            url.as_str(),
            "http://admin.internal/base/api/clients/by-secret/a%20b%2Fc"
        );
    }

    #[test]
    fn test_http_store_invalid_url() {
        assert!(matches!(
            HttpTenantStore::new("not a url", Duration::from_secs(5)),
            Err(StoreError::InvalidUrl(_))
        ));
        assert!(matches!(
            HttpTenantStore::new("mailto:ops@example.com", Duration::from_secs(5)),
            Err(StoreError::InvalidUrl(_))
        ));
    }
}
