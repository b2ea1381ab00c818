use crate::errors::IngestError;
use crate::pipeline::{WebhookOutcome, WebhookPipeline};
use futures::FutureExt;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HeaderMap};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use percent_encoding::percent_decode_str;
use routing::{RouteOutcome, Router};
use serde::Serialize;
use shared::http::{make_empty_response, make_error_response, make_json_response};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

const SERVICE_NAME: &str = "hookrelay";
const ADMIN_KEY_HEADER: &str = "x-admin-key";

#[derive(Clone, Copy, Debug, PartialEq)]
enum Action {
    Index,
    Healthz,
    Webhook,
    PurgeCache,
}

#[derive(Serialize)]
struct ServiceInfo {
    service: &'static str,
    status: &'static str,
    endpoints: &'static [&'static str],
}

#[derive(Serialize)]
struct Status {
    status: &'static str,
}

#[derive(Serialize)]
struct ErrorMessage {
    error: &'static str,
}

type ServiceResponse = Response<BoxBody<Bytes, IngestError>>;

const ENDPOINTS: &[&str] = &[
    "GET /healthz",
    "POST /webhook/{secret_id}",
    "POST /admin/cache/purge/{secret_id}",
];

struct Inner {
    pipeline: WebhookPipeline,
    router: Router<Action>,
    admin_token: Option<String>,
}

/// Main listener: webhook intake plus the small operational endpoints.
#[derive(Clone)]
pub struct IngestService {
    inner: Arc<Inner>,
}

impl IngestService {
    pub fn new(pipeline: WebhookPipeline, admin_token: Option<String>) -> Self {
        let router = Router::new()
            .route(Method::GET, "/", Action::Index)
            .route(Method::GET, "/healthz", Action::Healthz)
            .route(Method::POST, "/webhook/{secret_id}", Action::Webhook)
            .route(
                Method::POST,
                "/admin/cache/purge/{secret_id}",
                Action::PurgeCache,
            );

        IngestService {
            inner: Arc::new(Inner {
                pipeline,
                router,
                admin_token: admin_token.filter(|token| !token.trim().is_empty()),
            }),
        }
    }
}

impl Inner {
    async fn dispatch(&self, req: Request<Incoming>) -> ServiceResponse {
        let path = req.uri().path().to_string();
        let (action, secret_id) = match self.router.resolve(req.method(), &path) {
            RouteOutcome::Matched { action, params } => {
                (*action, params.get("secret_id").unwrap_or_default().to_string())
            }
            RouteOutcome::MethodNotAllowed => {
                return make_error_response(StatusCode::METHOD_NOT_ALLOWED);
            }
            RouteOutcome::NotFound => return make_error_response(StatusCode::NOT_FOUND),
        };

        match action {
            Action::Index => make_json_response(
                StatusCode::OK,
                &ServiceInfo {
                    service: SERVICE_NAME,
                    status: "ok",
                    endpoints: ENDPOINTS,
                },
            ),
            Action::Healthz => make_json_response(StatusCode::OK, &Status { status: "ok" }),
            Action::Webhook => match decode_secret(&secret_id) {
                Ok(secret_id) => self.webhook(&secret_id, req).await,
                Err(err) => err.into_response(),
            },
            Action::PurgeCache => self.purge(&secret_id, req.headers()),
        }
    }

    async fn webhook(
        &self,
        secret_id: &str,
        req: Request<Incoming>,
    ) -> ServiceResponse {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let query = req.uri().query().map(str::to_string);

        let result = self
            .pipeline
            .handle(
                secret_id,
                content_type.as_deref(),
                query.as_deref(),
                req.into_body(),
            )
            .await;

        match result {
            Ok(WebhookOutcome::Ignored(_)) => make_json_response(
                StatusCode::OK,
                &Status {
                    status: "ignored_group_message",
                },
            ),
            Ok(WebhookOutcome::Relayed(relayed)) => relayed.into_response(),
            Err(err) => err.into_response(),
        }
    }

    fn purge(&self, secret_id: &str, headers: &HeaderMap) -> ServiceResponse {
        let provided = headers
            .get(ADMIN_KEY_HEADER)
            .and_then(|value| value.to_str().ok());
        let authorized = matches!(
            (&self.admin_token, provided),
            (Some(expected), Some(provided)) if expected == provided
        );
        if !authorized {
            return make_json_response(
                StatusCode::UNAUTHORIZED,
                &ErrorMessage {
                    error: "unauthorized",
                },
            );
        }

        let secret_id = match decode_secret(secret_id) {
            Ok(secret_id) => secret_id,
            Err(err) => return err.into_response(),
        };
        let secret_id = secret_id.trim();
        if secret_id.is_empty() {
            return make_json_response(
                StatusCode::BAD_REQUEST,
                &ErrorMessage {
                    error: "secret id required",
                },
            );
        }

        let removed = self.pipeline.resolver().invalidate(secret_id);
        tracing::info!(secret_id, removed, "purged cached route");
        make_empty_response(StatusCode::NO_CONTENT)
    }

    /// Awaits `handler`, answering 500 and raising an alert if it panics.
    async fn recover<F>(&self, request: &str, handler: F) -> ServiceResponse
    where
        F: Future<Output = ServiceResponse>,
    {
        match AssertUnwindSafe(handler).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => {
                let message = panic_message(&*panic);
                tracing::error!(request, panic = message, "request handler panicked");
                self.pipeline
                    .alert(format!(":rotating_light: panic on {request}: {message}"));
                make_error_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

fn panic_message<'a>(panic: &'a (dyn Any + Send + 'static)) -> &'a str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Path captures arrive percent-encoded.
fn decode_secret(raw: &str) -> Result<String, IngestError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|secret_id| secret_id.into_owned())
        .map_err(|_| IngestError::InvalidSecret)
}

impl Service<Request<Incoming>> for IngestService {
    type Response = Response<BoxBody<Bytes, IngestError>>;
    type Error = IngestError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move {
            let start = Instant::now();
            let method = req.method().clone();
            let path = req.uri().path().to_string();

            let request = format!("{method} {path}");
            let response = inner.recover(&request, inner.dispatch(req)).await;

            tracing::info!(
                %method,
                path,
                status = response.status().as_u16(),
                latency_ms = start.elapsed().as_millis() as u64,
                "request"
            );
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertTarget, Alerter, Deduplicator};
    use crate::forward::{DEFAULT_FORWARD_TIMEOUT, Forwarder};
    use std::time::Duration;
    use tenants::resolver::{RouteCache, StoreSource};
    use tenants::store::StaticTenantStore;
    use tenants::{Resolver, TenantRoute};
    use tokio::net::TcpListener;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn start(routes: Vec<TenantRoute>, admin_token: Option<&str>) -> (String, Resolver) {
        let resolver = Resolver::new(
            Arc::new(RouteCache::new(Duration::from_secs(60))),
            vec![Box::new(StoreSource::new(
                Arc::new(StaticTenantStore::new(routes)),
                Duration::from_secs(5),
            ))],
        );
        let pipeline = WebhookPipeline::new(
            resolver.clone(),
            Forwarder::new(DEFAULT_FORWARD_TIMEOUT).unwrap(),
        );
        let service = IngestService::new(pipeline, admin_token.map(str::to_string));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(shared::http::serve(listener, service));

        (format!("http://{addr}"), resolver)
    }

    fn envelope(event: &str) -> String {
        serde_json::json!({ "jsonData": event }).to_string()
    }

    #[tokio::test]
    async fn test_group_message_is_ignored() {
        let (base, resolver) = start(vec![], None).await;
        resolver.cache().set(
            "abc".to_string(),
            Arc::new(TenantRoute::new("abc", "http://dest/x")),
        );

        let response = reqwest::Client::new()
            .post(format!("{base}/webhook/abc"))
            .header("content-type", "application/json")
            .body(envelope(r#"{"event":{"Info":{"Chat":"123@g.us"}}}"#))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.json::<serde_json::Value>().await.unwrap(),
            serde_json::json!({ "status": "ignored_group_message" })
        );
    }

    #[tokio::test]
    async fn test_relay_is_mirrored() {
        let destination = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_body_raw("ok", "text/plain"))
            .expect(1)
            .mount(&destination)
            .await;

        let (base, _) = start(vec![TenantRoute::new("abc", destination.uri())], None).await;
        let response = reqwest::Client::new()
            .post(format!("{base}/webhook/abc"))
            .header("content-type", "application/json")
            .body(envelope(r#"{"event":{"Info":{"Chat":"1@s.whatsapp.net"}}}"#))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_unknown_secret() {
        let (base, _) = start(vec![], None).await;
        let response = reqwest::Client::new()
            .post(format!("{base}/webhook/zzz"))
            .header("content-type", "application/json")
            .body(envelope("{}"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.json::<serde_json::Value>().await.unwrap(),
            serde_json::json!({ "error": "client not found" })
        );
    }

    #[tokio::test]
    async fn test_blank_secret() {
        let (base, _) = start(vec![], None).await;
        let response = reqwest::Client::new()
            .post(format!("{base}/webhook/%20"))
            .header("content-type", "application/json")
            .body(envelope("{}"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.json::<serde_json::Value>().await.unwrap(),
            serde_json::json!({ "error": "missing secret id" })
        );
    }

    #[tokio::test]
    async fn test_secret_is_percent_decoded() {
        let destination = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&destination)
            .await;

        let (base, _) = start(vec![TenantRoute::new("ab cd", destination.uri())], None).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{base}/webhook/ab%20cd"))
            .header("content-type", "application/json")
            .body(envelope(r#"{"event":{"Info":{"Chat":"1@s.whatsapp.net"}}}"#))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = client
            .post(format!("{base}/webhook/%FF"))
            .header("content-type", "application/json")
            .body(envelope("{}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.json::<serde_json::Value>().await.unwrap(),
            serde_json::json!({ "error": "invalid secret id" })
        );
    }

    async fn exploding_handler() -> ServiceResponse {
        panic!("handler exploded")
    }

    #[tokio::test]
    async fn test_panic_becomes_500_and_alert() {
        let slack = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&slack)
            .await;

        let resolver = Resolver::new(Arc::new(RouteCache::new(Duration::from_secs(60))), vec![]);
        let alerter = Alerter::new(
            AlertTarget::Webhook {
                url: format!("{}/hook", slack.uri()),
            },
            Arc::new(Deduplicator::default()),
        )
        .unwrap();
        let pipeline = WebhookPipeline::new(
            resolver,
            Forwarder::new(DEFAULT_FORWARD_TIMEOUT).unwrap(),
        )
        .with_alerter(alerter);
        let service = IngestService::new(pipeline, None);

        let response = service
            .inner
            .recover("POST /webhook/abc", exploding_handler())
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        for _ in 0..100 {
            if !slack.received_requests().await.unwrap_or_default().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let requests = slack.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(
            body["text"],
            ":rotating_light: panic on POST /webhook/abc: handler exploded"
        );
    }

    #[tokio::test]
    async fn test_operational_endpoints() {
        let (base, _) = start(vec![], None).await;
        let client = reqwest::Client::new();

        let response = client.get(format!("{base}/healthz")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.json::<serde_json::Value>().await.unwrap(),
            serde_json::json!({ "status": "ok" })
        );

        let info: serde_json::Value = client
            .get(format!("{base}/"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(info["service"], SERVICE_NAME);
        assert_eq!(info["endpoints"].as_array().unwrap().len(), ENDPOINTS.len());

        let response = client.get(format!("{base}/webhook/abc")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = client.get(format!("{base}/nope")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_purge() {
        let (base, resolver) =
            start(vec![TenantRoute::new("abc", "http://dest/x")], Some("s3cret")).await;
        resolver.resolve("abc").await.unwrap();
        assert_eq!(resolver.cache().len(), 1);

        let client = reqwest::Client::new();
        let url = format!("{base}/admin/cache/purge/abc");

        let response = client.post(&url).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = client
            .post(&url)
            .header(ADMIN_KEY_HEADER, "wrong")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resolver.cache().len(), 1);

        let response = client
            .post(&url)
            .header(ADMIN_KEY_HEADER, "s3cret")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_purge_decodes_secret() {
        let (base, resolver) = start(
            vec![TenantRoute::new("ab cd", "http://dest/x")],
            Some("s3cret"),
        )
        .await;
        resolver.resolve("ab cd").await.unwrap();
        assert_eq!(resolver.cache().len(), 1);

        let response = reqwest::Client::new()
            .post(format!("{base}/admin/cache/purge/ab%20cd"))
            .header(ADMIN_KEY_HEADER, "s3cret")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_purge_without_token_configured() {
        let (base, _) = start(vec![], None).await;
        let response = reqwest::Client::new()
            .post(format!("{base}/admin/cache/purge/abc"))
            .header(ADMIN_KEY_HEADER, "")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
