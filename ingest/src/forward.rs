use crate::metrics_defs::WEBHOOK_FORWARD_DURATION;
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::Response;
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{StatusCode, Url};
use shared::histogram;
use std::time::{Duration, Instant};

pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(thiserror::Error, Debug)]
pub enum ForwardError {
    #[error("invalid destination URL {url}: {reason}")]
    InvalidDestination { url: String, reason: String },
    #[error("destination unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),
}

/// The destination's answer. The body is streamed through as it arrives.
#[derive(Debug)]
pub struct Relayed {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    body: reqwest::Body,
}

impl Relayed {
    /// Mirrors status, content type and body onto an outbound response.
    pub fn into_response<E>(self) -> Response<BoxBody<Bytes, E>>
    where
        E: From<reqwest::Error> + 'static,
    {
        let mut response = Response::new(self.body.map_err(E::from).boxed());
        *response.status_mut() = self.status;
        if let Some(content_type) = self.content_type {
            response.headers_mut().insert(CONTENT_TYPE, content_type);
        }
        response
    }
}

/// Relays raw webhook bodies to tenant destinations.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Forwarder { client })
    }

    /// POSTs `raw_body` unchanged to `destination_url` with the original
    /// content type.
    pub async fn relay(
        &self,
        destination_url: &str,
        raw_body: Bytes,
        content_type: Option<&str>,
    ) -> Result<Relayed, ForwardError> {
        let url = parse_destination(destination_url)?;
        let content_type = content_type
            .map(str::trim)
            .filter(|ct| !ct.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE);

        let start = Instant::now();
        let result = self
            .client
            .post(url)
            .header(CONTENT_TYPE, content_type)
            .body(raw_body)
            .send()
            .await;
        histogram!(WEBHOOK_FORWARD_DURATION).record(start.elapsed().as_secs_f64());

        let response = result.map_err(|err| {
            if err.is_builder() {
                ForwardError::InvalidDestination {
                    url: destination_url.to_string(),
                    reason: err.to_string(),
                }
            } else {
                ForwardError::Unreachable(err)
            }
        })?;

        let status = response.status();
        let content_type = response.headers().get(CONTENT_TYPE).cloned();
        let body = http::Response::<reqwest::Body>::from(response).into_body();

        Ok(Relayed {
            status,
            content_type,
            body,
        })
    }
}

fn parse_destination(destination_url: &str) -> Result<Url, ForwardError> {
    let invalid = |reason: String| ForwardError::InvalidDestination {
        url: destination_url.to_string(),
        reason,
    };

    let url = Url::parse(destination_url.trim()).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(invalid(format!("unsupported scheme {scheme}"))),
    }
}
