//! Decides whether an event comes from a group or broadcast chat. Those are
//! dropped; everything else is relayed.

use crate::lid::{IdField, LidConverter};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const GROUP_SUFFIX: &str = "@g.us";
const BROADCAST: &str = "@broadcast";
const STATUS_BROADCAST: &str = "status@broadcast";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassificationReason {
    RawGroupJid,
    RawBroadcast,
    RawIsGroupFlag,
    RawEscapedIsGroupFlag,
    IsGroupTrue,
    ChatHasGUs,
    ChatStatusBroadcast,
    ChatBroadcast,
    MessageGroupIdBroadcast,
    JsonParseFailed,
}

impl ClassificationReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ClassificationReason::RawGroupJid => "raw_g_us",
            ClassificationReason::RawBroadcast => "raw_broadcast",
            ClassificationReason::RawIsGroupFlag => "raw_is_group_true",
            ClassificationReason::RawEscapedIsGroupFlag => "raw_escaped_is_group_true",
            ClassificationReason::IsGroupTrue => "is_group_true",
            ClassificationReason::ChatHasGUs => "chat_has_g_us",
            ClassificationReason::ChatStatusBroadcast => "chat_status_broadcast",
            ClassificationReason::ChatBroadcast => "chat_broadcast",
            ClassificationReason::MessageGroupIdBroadcast => "message_group_id_broadcast",
            ClassificationReason::JsonParseFailed => "json_parse_failed",
        }
    }
}

// Checked in order on the lower-cased payload, then on its compact form.
const RAW_MARKERS: &[(&str, ClassificationReason)] = &[
    (GROUP_SUFFIX, ClassificationReason::RawGroupJid),
    (BROADCAST, ClassificationReason::RawBroadcast),
    (STATUS_BROADCAST, ClassificationReason::RawBroadcast),
    (r#""isgroup":true"#, ClassificationReason::RawIsGroupFlag),
    (r#"\"isgroup\":true"#, ClassificationReason::RawEscapedIsGroupFlag),
];

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClassifiedEvent {
    pub is_group: bool,
    pub chat: String,
    pub sender: String,
    /// Always set for group events.
    pub reason: Option<ClassificationReason>,
}

/// Classification together with whatever identifier conversion happened on
/// the way.
#[derive(Debug, Default)]
pub struct Classification {
    pub event: ClassifiedEvent,
    /// Field -> `"from -> to"`, only for identifiers that converted.
    pub conversions: BTreeMap<IdField, String>,
    pub conversion_error: Option<String>,
}

#[derive(Deserialize, Default)]
pub(crate) struct Envelope {
    #[serde(default)]
    pub event: Option<EventFields>,
}

#[derive(Deserialize, Default)]
pub(crate) struct EventFields {
    #[serde(rename = "Info", default)]
    pub info: Option<Map<String, Value>>,
    #[serde(rename = "Message", default)]
    pub message: Option<Map<String, Value>>,
}

impl Envelope {
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    pub fn info(&self) -> Option<&Map<String, Value>> {
        self.event.as_ref()?.info.as_ref()
    }

    fn message(&self) -> Option<&Map<String, Value>> {
        self.event.as_ref()?.message.as_ref()
    }
}

/// `IsGroup` may be sent as a bool or as a string.
pub(crate) fn is_group_flag(info: &Map<String, Value>) -> bool {
    match info.get("IsGroup") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(flag)) => flag.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

pub(crate) fn info_string<'a>(info: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    info.get(key).and_then(Value::as_str)
}

fn raw_signal(payload: &str) -> Option<ClassificationReason> {
    let lower = payload.to_lowercase();
    let compact: String = lower
        .chars()
        .filter(|c| !matches!(c, ' ' | '\n' | '\r' | '\t'))
        .collect();

    [lower.as_str(), compact.as_str()].into_iter().find_map(|text| {
        RAW_MARKERS
            .iter()
            .find(|(marker, _)| text.contains(marker))
            .map(|(_, reason)| *reason)
    })
}

fn mark_group(event: &mut ClassifiedEvent, reason: ClassificationReason) {
    event.is_group = true;
    event.reason.get_or_insert(reason);
}

fn structured(payload: &str) -> ClassifiedEvent {
    let Ok(envelope) = Envelope::parse(payload) else {
        return ClassifiedEvent {
            reason: Some(ClassificationReason::JsonParseFailed),
            ..Default::default()
        };
    };

    let mut event = ClassifiedEvent::default();

    if let Some(info) = envelope.info() {
        if is_group_flag(info) {
            mark_group(&mut event, ClassificationReason::IsGroupTrue);
        }
        event.chat = info_string(info, "Chat").unwrap_or_default().to_string();
        event.sender = info_string(info, "Sender").unwrap_or_default().to_string();
    }

    let chat = event.chat.to_lowercase();
    if chat.contains(GROUP_SUFFIX) {
        mark_group(&mut event, ClassificationReason::ChatHasGUs);
    }
    if chat.contains(BROADCAST) {
        mark_group(&mut event, ClassificationReason::ChatStatusBroadcast);
    }

    let group_id = envelope
        .message()
        .and_then(|message| message.get("senderKeyDistributionMessage"))
        .and_then(|skdm| skdm.get("groupID"))
        .and_then(Value::as_str)
        .map(str::to_lowercase);
    if let Some(group_id) = group_id
        && [BROADCAST, STATUS_BROADCAST, GROUP_SUFFIX]
            .iter()
            .any(|marker| group_id.contains(marker))
    {
        mark_group(&mut event, ClassificationReason::MessageGroupIdBroadcast);
    }

    event
}

/// Runs the raw substring layer, then the structured layer. The first signal
/// found decides the reason.
pub fn classify(payload: &str) -> ClassifiedEvent {
    let raw = raw_signal(payload);
    let mut event = structured(payload);

    if let Some(reason) = raw {
        event.is_group = true;
        event.reason = Some(reason);
    }
    event
}

/// Like [`classify`], but derives chat and sender from canonical identifiers
/// when a converter is available. Payloads already caught by the raw layer
/// are dropped anyway and skip conversion.
pub async fn classify_with_conversion(
    payload: &str,
    converter: Option<&LidConverter>,
    token: &str,
) -> Classification {
    let Some(converter) = converter else {
        return Classification {
            event: classify(payload),
            ..Default::default()
        };
    };
    if raw_signal(payload).is_some() {
        return Classification {
            event: classify(payload),
            ..Default::default()
        };
    }

    let converted = match converter.detect_and_convert(payload, token).await {
        Ok(converted) => converted,
        Err(err) => {
            tracing::warn!(error = %err, "identifier conversion failed, classifying original payload");
            return Classification {
                event: classify(payload),
                conversion_error: Some(err.to_string()),
                ..Default::default()
            };
        }
    };

    let chat = converted.final_chat().to_string();
    let reason = converted.is_group.then(|| {
        let lower = chat.to_lowercase();
        if lower.contains(GROUP_SUFFIX) {
            ClassificationReason::ChatHasGUs
        } else if lower.contains(BROADCAST) {
            ClassificationReason::ChatBroadcast
        } else {
            ClassificationReason::IsGroupTrue
        }
    });

    for (field, conversion) in &converted.conversions {
        tracing::debug!(
            field = field.as_str(),
            conversion = conversion.as_str(),
            "converted identifier"
        );
    }

    Classification {
        event: ClassifiedEvent {
            is_group: converted.is_group,
            sender: converted.final_sender().to_string(),
            chat,
            reason,
        },
        conversions: converted.conversions,
        conversion_error: None,
    }
}
