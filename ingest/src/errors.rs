use crate::extract::ExtractError;
use crate::forward::ForwardError;
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use shared::http::make_json_response;

/// Result type alias for ingest operations
pub type Result<T, E = IngestError> = std::result::Result<T, E>;

/// Errors that end a webhook request or stop the service
#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("missing secret id")]
    MissingSecret,

    #[error("secret id is not valid UTF-8 once decoded")]
    InvalidSecret,

    #[error("failed to read request body: {0}")]
    InvalidBody(String),

    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("no tenant found for secret")]
    TenantNotFound,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl IngestError {
    pub fn status(&self) -> StatusCode {
        match self {
            IngestError::MissingSecret
            | IngestError::InvalidSecret
            | IngestError::InvalidBody(_)
            | IngestError::Extract(_) => StatusCode::BAD_REQUEST,
            IngestError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            IngestError::TenantNotFound => StatusCode::NOT_FOUND,
            IngestError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            IngestError::Forward(ForwardError::Unreachable(_)) => StatusCode::BAD_GATEWAY,
            IngestError::Forward(ForwardError::InvalidDestination { .. })
            | IngestError::HttpClient(_)
            | IngestError::InvalidConfig(_)
            | IngestError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message returned to the caller. Internal details stay in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            IngestError::MissingSecret => "missing secret id",
            IngestError::InvalidSecret => "invalid secret id",
            IngestError::InvalidBody(_) => "invalid body",
            IngestError::BodyTooLarge(_) => "body too large",
            IngestError::Extract(_) => "jsonData missing",
            IngestError::TenantNotFound => "client not found",
            IngestError::RateLimited => "rate limit exceeded",
            IngestError::Forward(ForwardError::Unreachable(_)) => "destination unavailable",
            IngestError::Forward(ForwardError::InvalidDestination { .. })
            | IngestError::HttpClient(_)
            | IngestError::InvalidConfig(_)
            | IngestError::Io(_) => "internal error",
        }
    }

    /// Short tag for the `webhook.rejected` metric.
    pub fn reason(&self) -> &'static str {
        match self {
            IngestError::MissingSecret => "missing_secret",
            IngestError::InvalidSecret => "invalid_secret",
            IngestError::InvalidBody(_) => "invalid_body",
            IngestError::BodyTooLarge(_) => "body_too_large",
            IngestError::Extract(_) => "missing_payload",
            IngestError::TenantNotFound => "client_not_found",
            IngestError::RateLimited => "rate_limited",
            IngestError::Forward(ForwardError::Unreachable(_)) => "destination_unreachable",
            IngestError::Forward(ForwardError::InvalidDestination { .. }) => "invalid_destination",
            IngestError::HttpClient(_) | IngestError::InvalidConfig(_) | IngestError::Io(_) => {
                "internal"
            }
        }
    }

    pub fn into_response<E>(self) -> Response<BoxBody<Bytes, E>> {
        make_json_response(
            self.status(),
            &ErrorBody {
                error: self.public_message(),
            },
        )
    }
}
