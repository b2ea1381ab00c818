//! Metrics definitions for webhook ingestion.

use shared::metrics_defs::{MetricDef, MetricType};

pub const WEBHOOK_RECEIVED: MetricDef = MetricDef {
    name: "webhook.received",
    metric_type: MetricType::Counter,
    description: "Number of inbound webhook requests",
};

pub const WEBHOOK_FORWARDED: MetricDef = MetricDef {
    name: "webhook.forwarded",
    metric_type: MetricType::Counter,
    description: "Number of webhooks relayed to their destination, tagged by status",
};

pub const WEBHOOK_IGNORED_GROUP: MetricDef = MetricDef {
    name: "webhook.ignored_group",
    metric_type: MetricType::Counter,
    description: "Number of group or broadcast events dropped, tagged by reason",
};

pub const WEBHOOK_REJECTED: MetricDef = MetricDef {
    name: "webhook.rejected",
    metric_type: MetricType::Counter,
    description: "Number of webhooks answered with an error, tagged by reason",
};

pub const WEBHOOK_FORWARD_DURATION: MetricDef = MetricDef {
    name: "webhook.forward.duration",
    metric_type: MetricType::Histogram,
    description: "Time until the destination answered, in seconds",
};

pub const LID_CONVERSION_FAILURE: MetricDef = MetricDef {
    name: "lid.conversion.failure",
    metric_type: MetricType::Counter,
    description: "Number of legacy identifiers that could not be converted, tagged by field",
};

pub const ALERT_SENT: MetricDef = MetricDef {
    name: "alert.sent",
    metric_type: MetricType::Counter,
    description: "Number of alerts delivered",
};

pub const ALERT_SUPPRESSED: MetricDef = MetricDef {
    name: "alert.suppressed",
    metric_type: MetricType::Counter,
    description: "Number of alerts dropped as duplicates",
};

pub const ALL_METRICS: &[MetricDef] = &[
    WEBHOOK_RECEIVED,
    WEBHOOK_FORWARDED,
    WEBHOOK_IGNORED_GROUP,
    WEBHOOK_REJECTED,
    WEBHOOK_FORWARD_DURATION,
    LID_CONVERSION_FAILURE,
    ALERT_SENT,
    ALERT_SUPPRESSED,
];
