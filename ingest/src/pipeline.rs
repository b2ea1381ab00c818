use crate::alerts::{Alerter, Deduplicator};
use crate::classify::{Classification, ClassifiedEvent, classify, classify_with_conversion};
use crate::config::Config;
use crate::errors::{IngestError, Result};
use crate::extract::{DEFAULT_MAX_MULTIPART_BYTES, Extractor};
use crate::forward::{Forwarder, Relayed};
use crate::lid::LidConverter;
use crate::metrics_defs::{
    WEBHOOK_FORWARDED, WEBHOOK_IGNORED_GROUP, WEBHOOK_RECEIVED, WEBHOOK_REJECTED,
};
use crate::rate_limit::RateLimiter;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use shared::counter;
use std::error::Error as StdError;
use std::sync::Arc;
use tenants::Resolver;

#[derive(Debug)]
pub enum WebhookOutcome {
    /// Group or broadcast event, dropped without contacting the destination.
    Ignored(ClassifiedEvent),
    Relayed(Relayed),
}

/// resolve -> rate limit -> extract -> classify -> forward
pub struct WebhookPipeline {
    resolver: Resolver,
    extractor: Extractor,
    body_limit: usize,
    converter: Option<LidConverter>,
    forwarder: Forwarder,
    alerter: Option<Alerter>,
    rate_limiter: Option<RateLimiter>,
}

impl WebhookPipeline {
    pub fn new(resolver: Resolver, forwarder: Forwarder) -> Self {
        WebhookPipeline {
            resolver,
            extractor: Extractor::default(),
            body_limit: DEFAULT_MAX_MULTIPART_BYTES,
            converter: None,
            forwarder,
            alerter: None,
            rate_limiter: None,
        }
    }

    pub fn from_config(config: &Config, resolver: Resolver) -> Result<Self> {
        let mut pipeline = WebhookPipeline::new(resolver, Forwarder::new(config.forward_timeout())?)
            .with_extractor(Extractor::new(config.max_multipart_bytes))
            .with_body_limit(config.max_multipart_bytes);

        if let Some(converter) = &config.lid_converter {
            let converter = LidConverter::new(&converter.base_url, converter.timeout())
                .map_err(|err| IngestError::InvalidConfig(err.to_string()))?;
            pipeline = pipeline.with_converter(converter);
        }
        if let Some(target) = &config.alerts {
            let alerter = Alerter::new(target.clone(), Arc::new(Deduplicator::default()))
                .map_err(|err| IngestError::InvalidConfig(err.to_string()))?;
            pipeline = pipeline.with_alerter(alerter);
        }
        if config.enforce_rate_limits {
            pipeline = pipeline.with_rate_limiter(RateLimiter::new());
        }

        Ok(pipeline)
    }

    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Caps how much of a request body is read before giving up.
    pub fn with_body_limit(mut self, body_limit: usize) -> Self {
        self.body_limit = body_limit;
        self
    }

    pub fn with_converter(mut self, converter: LidConverter) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn with_alerter(mut self, alerter: Alerter) -> Self {
        self.alerter = Some(alerter);
        self
    }

    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub async fn handle<B>(
        &self,
        secret_id: &str,
        content_type: Option<&str>,
        query: Option<&str>,
        body: B,
    ) -> Result<WebhookOutcome>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        counter!(WEBHOOK_RECEIVED).increment(1);

        let result = self
            .process(secret_id.trim(), content_type, query, body)
            .await;
        if let Err(err) = &result {
            counter!(WEBHOOK_REJECTED, "reason" => err.reason()).increment(1);
        }
        result
    }

    async fn process<B>(
        &self,
        secret_id: &str,
        content_type: Option<&str>,
        query: Option<&str>,
        body: B,
    ) -> Result<WebhookOutcome>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        if secret_id.is_empty() {
            return Err(IngestError::MissingSecret);
        }

        let Some(route) = self.resolver.resolve(secret_id).await else {
            tracing::info!(secret_id, "client not found");
            self.alert(format!(":warning: client_not_found | secret_id={secret_id}"));
            return Err(IngestError::TenantNotFound);
        };

        if let Some(rate_limiter) = &self.rate_limiter
            && !rate_limiter.check(secret_id, route.rate_per_minute)
        {
            tracing::warn!(secret_id, rate_per_minute = route.rate_per_minute, "rate limit exceeded");
            return Err(IngestError::RateLimited);
        }

        let raw_body = match Limited::new(body, self.body_limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) if err.is::<LengthLimitError>() => {
                tracing::warn!(secret_id, limit = self.body_limit, "request body too large");
                return Err(IngestError::BodyTooLarge(self.body_limit));
            }
            Err(err) => {
                tracing::error!(secret_id, error = %err, "failed to read request body");
                self.alert(format!(
                    ":warning: could not read body | secret_id={secret_id} | err={err}"
                ));
                return Err(IngestError::InvalidBody(err.to_string()));
            }
        };

        let body_len = raw_body.len();
        let event = match self
            .extractor
            .extract(secret_id, raw_body, content_type, query)
            .await {
            Ok(event) => event,
            Err(err) => {
                let content_type = content_type.unwrap_or_default();
                tracing::error!(secret_id, content_type, body_len, "jsonData missing or empty");
                self.alert(format!(
                    ":warning: jsonData missing | secret_id={secret_id} | content_type={content_type} | len={body_len}"
                ));
                return Err(err.into());
            }
        };

        let classification = match (&self.converter, route.conversion_token()) {
            (Some(converter), Some(token)) => {
                classify_with_conversion(&event.json_payload, Some(converter), token).await
            }
            _ => Classification {
                event: classify(&event.json_payload),
                ..Default::default()
            },
        };

        if classification.event.is_group {
            let reason = classification
                .event
                .reason
                .map(|reason| reason.as_str())
                .unwrap_or("unknown");
            tracing::info!(secret_id, reason, "ignored group message");
            counter!(WEBHOOK_IGNORED_GROUP, "reason" => reason).increment(1);
            return Ok(WebhookOutcome::Ignored(classification.event));
        }

        tracing::info!(secret_id, size = event.raw_body.len(), "forwarding webhook");
        match self
            .forwarder
            .relay(
                &route.destination_url,
                event.raw_body,
                event.content_type.as_deref(),
            )
            .await
        {
            Ok(relayed) => {
                counter!(WEBHOOK_FORWARDED, "status" => relayed.status.as_u16().to_string())
                    .increment(1);
                Ok(WebhookOutcome::Relayed(relayed))
            }
            Err(err) => {
                tracing::error!(
                    secret_id,
                    destination = %route.destination_url,
                    error = %err,
                    "forward failed"
                );
                self.alert(format!(
                    ":warning: forward to {} failed | secret_id={secret_id} | err={err}",
                    route.destination_url
                ));
                Err(err.into())
            }
        }
    }

    pub(crate) fn alert(&self, text: String) {
        if let Some(alerter) = &self.alerter {
            alerter.notify(text);
        }
    }
}
