//! Legacy identifier (`...@lid`) normalization through the external
//! `parselid` API. Conversion only enriches classification; the forwarded
//! bytes are never rewritten.

use crate::classify::{Envelope, info_string, is_group_flag};
use crate::metrics_defs::LID_CONVERSION_FAILURE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::counter;
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_CONVERTER_TIMEOUT: Duration = Duration::from_secs(10);

const LEGACY_SUFFIX: &str = "@lid";
const ERROR_BODY_PREVIEW: usize = 200;

pub fn is_lid(id: &str) -> bool {
    id.to_lowercase().ends_with(LEGACY_SUFFIX)
}

#[derive(thiserror::Error, Debug)]
pub enum ConversionError {
    #[error("normalization API base URL is not configured")]
    NotConfigured,
    #[error("no API token provided for identifier conversion")]
    TokenMissing,
    #[error("normalization request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("normalization API returned status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("could not decode normalization response: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("normalization API rejected the identifier")]
    Rejected,
    #[error("could not parse event: {0}")]
    InvalidEvent(#[source] serde_json::Error),
}

/// Identifier fields of `event.Info` that may carry legacy identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IdField {
    Chat,
    Sender,
    SenderAlt,
    RecipientAlt,
}

impl IdField {
    pub const fn as_str(&self) -> &'static str {
        match self {
            IdField::Chat => "Chat",
            IdField::Sender => "Sender",
            IdField::SenderAlt => "SenderAlt",
            IdField::RecipientAlt => "RecipientAlt",
        }
    }
}

#[derive(Serialize)]
struct ParseLidRequest<'a> {
    lid: &'a str,
}

#[derive(Deserialize)]
struct ParseLidResponse {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    data: ParseLidData,
}

#[derive(Deserialize, Default)]
struct ParseLidData {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    jid: String,
}

/// Original and canonical identifiers of one event.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConvertedEvent {
    original: String,
    pub chat: Option<String>,
    pub chat_jid: Option<String>,
    pub sender: Option<String>,
    pub sender_jid: Option<String>,
    pub sender_alt: Option<String>,
    pub sender_alt_jid: Option<String>,
    pub recipient_alt: Option<String>,
    pub recipient_alt_jid: Option<String>,
    pub is_group: bool,
    pub conversions: BTreeMap<IdField, String>,
}

impl ConvertedEvent {
    pub fn final_chat(&self) -> &str {
        self.chat_jid
            .as_deref()
            .or(self.chat.as_deref())
            .unwrap_or_default()
    }

    pub fn final_sender(&self) -> &str {
        self.sender_jid
            .as_deref()
            .or(self.sender.as_deref())
            .unwrap_or_default()
    }

    pub fn has_conversions(&self) -> bool {
        !self.conversions.is_empty()
    }

    fn pairs(&self) -> [(IdField, &Option<String>, &Option<String>); 4] {
        [
            (IdField::Chat, &self.chat, &self.chat_jid),
            (IdField::Sender, &self.sender, &self.sender_jid),
            (IdField::SenderAlt, &self.sender_alt, &self.sender_alt_jid),
            (
                IdField::RecipientAlt,
                &self.recipient_alt,
                &self.recipient_alt_jid,
            ),
        ]
    }

    /// The original event JSON with canonical identifiers substituted into
    /// `event.Info`. Returned unchanged when nothing converted.
    pub fn apply_conversions(&self) -> Result<String, ConversionError> {
        if !self.has_conversions() {
            return Ok(self.original.clone());
        }

        let mut document: Value =
            serde_json::from_str(&self.original).map_err(ConversionError::InvalidEvent)?;

        if let Some(info) = document
            .get_mut("event")
            .and_then(|event| event.get_mut("Info"))
            .and_then(Value::as_object_mut)
        {
            for (field, original, canonical) in self.pairs() {
                if let (Some(original), Some(canonical)) = (original, canonical)
                    && !original.is_empty()
                    && !canonical.is_empty()
                    && original != canonical
                {
                    info.insert(field.as_str().to_string(), Value::String(canonical.clone()));
                }
            }
        }

        serde_json::to_string(&document).map_err(ConversionError::InvalidEvent)
    }
}

#[derive(Clone)]
pub struct LidConverter {
    base_url: String,
    client: reqwest::Client,
}

impl LidConverter {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConversionError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(LidConverter {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Returns the canonical identifier for `id`. Identifiers that are not
    /// legacy are returned as they are.
    pub async fn convert_identifier(&self, id: &str, token: &str) -> Result<String, ConversionError> {
        if !is_lid(id) {
            return Ok(id.to_string());
        }
        if self.base_url.is_empty() {
            return Err(ConversionError::NotConfigured);
        }
        if token.is_empty() {
            return Err(ConversionError::TokenMissing);
        }

        let response = self
            .client
            .post(format!("{}/user/parselid", self.base_url))
            .bearer_auth(token)
            .json(&ParseLidRequest { lid: id })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConversionError::Status {
                status,
                body: body.chars().take(ERROR_BODY_PREVIEW).collect(),
            });
        }

        let bytes = response.bytes().await?;
        let parsed: ParseLidResponse =
            serde_json::from_slice(&bytes).map_err(ConversionError::Decode)?;
        if !parsed.status || !parsed.data.success || parsed.data.jid.is_empty() {
            return Err(ConversionError::Rejected);
        }

        Ok(parsed.data.jid)
    }

    /// `None` unless `id` is a legacy identifier that converted. Failures are
    /// logged and counted.
    async fn convert_field(&self, field: IdField, id: Option<&str>, token: &str) -> Option<String> {
        let id = id.filter(|id| is_lid(id))?;
        match self.convert_identifier(id, token).await {
            Ok(jid) => Some(jid),
            Err(err) => {
                tracing::warn!(field = field.as_str(), id, error = %err, "identifier conversion failed");
                counter!(LID_CONVERSION_FAILURE, "field" => field.as_str()).increment(1);
                None
            }
        }
    }

    /// Extracts the identifier fields of an event and converts the legacy
    /// ones concurrently. Only an unparseable event is an error; each field
    /// that fails to convert is left out of `conversions`.
    pub async fn detect_and_convert(
        &self,
        payload: &str,
        token: &str,
    ) -> Result<ConvertedEvent, ConversionError> {
        let envelope = Envelope::parse(payload).map_err(ConversionError::InvalidEvent)?;

        let mut result = ConvertedEvent {
            original: payload.to_string(),
            ..Default::default()
        };

        let Some(info) = envelope.info() else {
            return Ok(result);
        };

        let field = |key: &str| info_string(info, key).filter(|value| !value.is_empty());
        let chat = field("Chat");
        let sender = field("Sender");
        let sender_alt = field("SenderAlt");
        let recipient_alt = field("RecipientAlt");

        let (chat_jid, sender_jid, sender_alt_jid, recipient_alt_jid) = tokio::join!(
            self.convert_field(IdField::Chat, chat, token),
            self.convert_field(IdField::Sender, sender, token),
            self.convert_field(IdField::SenderAlt, sender_alt, token),
            self.convert_field(IdField::RecipientAlt, recipient_alt, token),
        );

        let mut conversions = BTreeMap::new();
        for (field, original, canonical) in [
            (IdField::Chat, chat, &chat_jid),
            (IdField::Sender, sender, &sender_jid),
            (IdField::SenderAlt, sender_alt, &sender_alt_jid),
            (IdField::RecipientAlt, recipient_alt, &recipient_alt_jid),
        ] {
            if let (Some(original), Some(canonical)) = (original, canonical) {
                conversions.insert(field, format!("{original} -> {canonical}"));
            }
        }
        result.conversions = conversions;

        result.chat = chat.map(str::to_string);
        result.sender = sender.map(str::to_string);
        result.sender_alt = sender_alt.map(str::to_string);
        result.recipient_alt = recipient_alt.map(str::to_string);

        // Identifiers that are not legacy are already canonical
        result.chat_jid = chat_jid.or_else(|| chat.filter(|id| !is_lid(id)).map(str::to_string));
        result.sender_jid =
            sender_jid.or_else(|| sender.filter(|id| !is_lid(id)).map(str::to_string));
        result.sender_alt_jid = sender_alt_jid;
        result.recipient_alt_jid = recipient_alt_jid;

        if result.sender_jid.is_none() {
            result.sender_jid = result.sender_alt_jid.clone();
        }
        if result.chat_jid.is_none() {
            result.chat_jid = result.recipient_alt_jid.clone();
        }

        let chat_marks_group = result.chat_jid.as_deref().is_some_and(|chat| {
            let lower = chat.to_lowercase();
            lower.contains("@g.us") || lower.contains("@broadcast")
        });
        result.is_group = is_group_flag(info) || chat_marks_group;

        Ok(result)
    }
}
