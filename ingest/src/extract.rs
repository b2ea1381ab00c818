//! Locates the embedded event JSON inside an inbound webhook body.
//!
//! Senders deliver the event in one of several shapes:
//! - a JSON body that is the event itself,
//! - a JSON envelope `{"jsonData": "<event>"}`,
//! - a JSON envelope whose `body` object carries the event, either as a key
//!   (the double-encoded variant) or as a string value, or as `body.jsonData`,
//! - a url-encoded or multipart form with a `jsonData` field. For forms the
//!   request's query string is consulted when the body lacks the field.

use futures::stream;
use hyper::body::Bytes;
use multer::{Constraints, Multipart, SizeLimit};
use serde_json::{Map, Value};

pub const PAYLOAD_FIELD: &str = "jsonData";
pub const DEFAULT_MAX_MULTIPART_BYTES: usize = 10 * 1024 * 1024;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ExtractError {
    #[error("jsonData missing or empty")]
    MissingPayload,
}

/// An inbound webhook whose event JSON has been located. `raw_body` is what
/// gets forwarded; `json_payload` is only used for classification.
#[derive(Debug, Clone)]
pub struct ExtractedEvent {
    pub secret_id: String,
    pub raw_body: Bytes,
    pub content_type: Option<String>,
    pub json_payload: String,
}

#[derive(Debug, PartialEq)]
enum BodyKind {
    Json,
    Multipart,
    Form,
}

impl BodyKind {
    fn detect(content_type: &str) -> Self {
        let lower = content_type.trim().to_ascii_lowercase();
        if lower.starts_with("application/json") {
            BodyKind::Json
        } else if lower.starts_with("multipart/form-data") {
            BodyKind::Multipart
        } else {
            if !lower.starts_with("application/x-www-form-urlencoded") {
                tracing::warn!(content_type, "unexpected content type, parsing as form");
            }
            BodyKind::Form
        }
    }
}

#[derive(Debug, Clone)]
pub struct Extractor {
    max_multipart_bytes: usize,
}

impl Default for Extractor {
    fn default() -> Self {
        Extractor::new(DEFAULT_MAX_MULTIPART_BYTES)
    }
}

impl Extractor {
    pub fn new(max_multipart_bytes: usize) -> Self {
        Extractor {
            max_multipart_bytes,
        }
    }

    pub async fn extract(
        &self,
        secret_id: &str,
        raw_body: Bytes,
        content_type: Option<&str>,
        query: Option<&str>,
    ) -> Result<ExtractedEvent, ExtractError> {
        let json_payload = self
            .payload(&raw_body, content_type.unwrap_or_default(), query)
            .await?;

        Ok(ExtractedEvent {
            secret_id: secret_id.to_string(),
            raw_body,
            content_type: content_type.map(str::to_string),
            json_payload,
        })
    }

    /// Returns the event JSON found in `raw_body`, dispatching on the
    /// declared content type. A form field in the body takes precedence over
    /// the same field in `query`.
    pub async fn payload(
        &self,
        raw_body: &Bytes,
        content_type: &str,
        query: Option<&str>,
    ) -> Result<String, ExtractError> {
        let from_query = || query.and_then(|query| payload_from_form(query.as_bytes()));
        let payload = match BodyKind::detect(content_type) {
            BodyKind::Json => payload_from_json(raw_body),
            BodyKind::Multipart => self
                .payload_from_multipart(raw_body.clone(), content_type)
                .await
                .or_else(from_query)
                .unwrap_or_default(),
            BodyKind::Form => payload_from_form(raw_body)
                .or_else(from_query)
                .unwrap_or_default(),
        };

        if payload.trim().is_empty() {
            tracing::debug!(
                content_type,
                body_len = raw_body.len(),
                "no event payload found in body"
            );
            return Err(ExtractError::MissingPayload);
        }
        Ok(payload)
    }

    async fn payload_from_multipart(&self, body: Bytes, content_type: &str) -> Option<String> {
        let boundary = match multer::parse_boundary(content_type) {
            Ok(boundary) => boundary,
            Err(err) => {
                tracing::warn!(error = %err, "invalid multipart content type");
                return None;
            }
        };

        let constraints = Constraints::new()
            .size_limit(SizeLimit::new().whole_stream(self.max_multipart_bytes as u64));
        let body_stream = stream::once(async move { Ok::<_, std::io::Error>(body) });
        let mut multipart = Multipart::with_constraints(body_stream, boundary, constraints);

        loop {
            match multipart.next_field().await {
                Ok(Some(field)) if field.name() == Some(PAYLOAD_FIELD) => {
                    return match field.text().await {
                        Ok(text) => Some(text),
                        Err(err) => {
                            tracing::warn!(error = %err, "could not read multipart field");
                            None
                        }
                    };
                }
                Ok(Some(_)) => continue,
                Ok(None) => return None,
                Err(err) => {
                    tracing::warn!(error = %err, "could not parse multipart body");
                    return None;
                }
            }
        }
    }
}

fn payload_from_json(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let Ok(envelope) = serde_json::from_slice::<Map<String, Value>>(body) else {
        return trimmed.to_string();
    };

    if let Some(data) = non_blank_string(envelope.get(PAYLOAD_FIELD)) {
        return data.to_string();
    }

    if let Some(Value::Object(inner)) = envelope.get("body") {
        // Document order: the first entry carrying an object wins
        for (key, value) in inner {
            if key.starts_with('{') && key.ends_with('}') {
                return key.clone();
            }
            if let Value::String(value) = value
                && value.starts_with('{')
            {
                return value.clone();
            }
        }

        if let Some(data) = non_blank_string(inner.get(PAYLOAD_FIELD)) {
            return data.to_string();
        }
    }

    trimmed.to_string()
}

fn non_blank_string(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn payload_from_form(body: &[u8]) -> Option<String> {
    url::form_urlencoded::parse(body)
        .find(|(key, _)| key == PAYLOAD_FIELD)
        .map(|(_, value)| value.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENT: &str = r#"{"event":{"Info":{"Chat":"123@s.whatsapp.net"}}}"#;

    async fn json(body: &str) -> Result<String, ExtractError> {
        Extractor::default()
            .payload(&Bytes::from(body.to_string()), "application/json; charset=utf-8", None)
            .await
    }

    #[tokio::test]
    async fn test_json_data_envelope() {
        let body = serde_json::json!({ "jsonData": EVENT }).to_string();
        assert_eq!(json(&body).await.unwrap(), EVENT);
    }

    #[tokio::test]
    async fn test_body_key_holds_event() {
        assert_eq!(
            json(r#"{"body": {"{\"a\":1}": "x"}}"#).await.unwrap(),
            r#"{"a":1}"#
        );
    }

    #[tokio::test]
    async fn test_body_value_holds_event() {
        assert_eq!(
            json(r#"{"body": {"plain": "x", "payload": "{\"a\":2}"}}"#)
                .await
                .unwrap(),
            r#"{"a":2}"#
        );
    }

    #[tokio::test]
    async fn test_body_first_entry_in_document_order() {
        assert_eq!(
            json(r#"{"body": {"z": "{\"first\":1}", "{\"second\":2}": ""}}"#)
                .await
                .unwrap(),
            r#"{"first":1}"#
        );
    }

    #[tokio::test]
    async fn test_body_json_data() {
        // A non-blank jsonData that is not an object is still used as a fallback
        assert_eq!(
            json(r#"{"body": {"other": "x", "jsonData": "[1]"}}"#)
                .await
                .unwrap(),
            "[1]"
        );
    }

    #[tokio::test]
    async fn test_falls_back_to_whole_body() {
        let body = format!("  {EVENT}\n");
        assert_eq!(json(&body).await.unwrap(), EVENT);

        assert_eq!(
            json(r#"{"jsonData": "  ", "x": 1}"#).await.unwrap(),
            r#"{"jsonData": "  ", "x": 1}"#
        );
        assert_eq!(
            json(r#"{"body": {"a": "b"}}"#).await.unwrap(),
            r#"{"body": {"a": "b"}}"#
        );
        assert_eq!(json("not json").await.unwrap(), "not json");
        assert_eq!(json("[1, 2]").await.unwrap(), "[1, 2]");
    }

    #[tokio::test]
    async fn test_empty_json_body() {
        assert_eq!(json("  \n").await, Err(ExtractError::MissingPayload));
    }

    #[tokio::test]
    async fn test_form() {
        let body: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("other", "1")
            .append_pair(PAYLOAD_FIELD, EVENT)
            .finish();
        let extractor = Extractor::default();

        let payload = extractor
            .payload(&Bytes::from(body.clone()), "application/x-www-form-urlencoded", None)
            .await
            .unwrap();
        assert_eq!(payload, EVENT);

        // Empty and unknown content types are parsed as forms too
        assert_eq!(
            extractor.payload(&Bytes::from(body.clone()), "", None).await.unwrap(),
            EVENT
        );
        assert_eq!(
            extractor
                .payload(&Bytes::from(body), "text/plain", None)
                .await
                .unwrap(),
            EVENT
        );
    }

    #[tokio::test]
    async fn test_form_without_payload() {
        let result = Extractor::default()
            .payload(
                &Bytes::from_static(b"a=1&jsonData=%20%20"),
                "application/x-www-form-urlencoded",
                None,
            )
            .await;
        assert_eq!(result, Err(ExtractError::MissingPayload));
    }

    #[tokio::test]
    async fn test_form_falls_back_to_query() {
        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair(PAYLOAD_FIELD, EVENT)
            .finish();
        let extractor = Extractor::default();

        let payload = extractor
            .payload(&Bytes::new(), "application/x-www-form-urlencoded", Some(&query))
            .await
            .unwrap();
        assert_eq!(payload, EVENT);

        // The body field wins over the query
        let payload = extractor
            .payload(
                &Bytes::from_static(b"jsonData=%7B%7D"),
                "application/x-www-form-urlencoded",
                Some(&query),
            )
            .await
            .unwrap();
        assert_eq!(payload, "{}");

        // JSON bodies never look at the query
        let result = extractor
            .payload(&Bytes::new(), "application/json", Some(&query))
            .await;
        assert_eq!(result, Err(ExtractError::MissingPayload));
    }

    fn multipart_body(boundary: &str, fields: &[(&str, &str)]) -> String {
        let mut body = String::new();
        for (name, value) in fields {
            body.push_str(&format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        body.push_str(&format!("--{boundary}--\r\n"));
        body
    }

    #[tokio::test]
    async fn test_multipart() {
        let body = multipart_body("XYZ", &[("other", "1"), (PAYLOAD_FIELD, EVENT)]);
        let payload = Extractor::default()
            .payload(&Bytes::from(body), "multipart/form-data; boundary=XYZ", None)
            .await
            .unwrap();
        assert_eq!(payload, EVENT);
    }

    #[tokio::test]
    async fn test_multipart_limits() {
        let body = multipart_body("XYZ", &[(PAYLOAD_FIELD, EVENT)]);

        let result = Extractor::new(16)
            .payload(&Bytes::from(body.clone()), "multipart/form-data; boundary=XYZ", None)
            .await;
        assert_eq!(result, Err(ExtractError::MissingPayload));

        let result = Extractor::default()
            .payload(&Bytes::from(body), "multipart/form-data", None)
            .await;
        assert_eq!(result, Err(ExtractError::MissingPayload));
    }

    #[tokio::test]
    async fn test_multipart_falls_back_to_query() {
        let body = multipart_body("XYZ", &[("other", "1")]);
        let payload = Extractor::default()
            .payload(
                &Bytes::from(body),
                "multipart/form-data; boundary=XYZ",
                Some("jsonData=%7B%22a%22%3A1%7D"),
            )
            .await
            .unwrap();
        assert_eq!(payload, r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_extract_keeps_raw_body() {
        let raw = Bytes::from(serde_json::json!({ "jsonData": EVENT }).to_string());
        let event = Extractor::default()
            .extract("abc", raw.clone(), Some("application/json"), None)
            .await
            .unwrap();
        assert_eq!(event.secret_id, "abc");
        assert_eq!(event.raw_body, raw);
        assert_eq!(event.content_type.as_deref(), Some("application/json"));
        assert_eq!(event.json_payload, EVENT);
    }
}
