use shared::metrics_defs::{MetricDef, MetricType};

pub const SUBMISSIONS: MetricDef = MetricDef {
    name: "contact.submissions",
    metric_type: MetricType::Counter,
    description: "Contact submissions handled. Tagged with outcome.",
};

pub const SMTP_VERIFY_ATTEMPTS: MetricDef = MetricDef {
    name: "contact.smtp.verify_attempts",
    metric_type: MetricType::Counter,
    description: "SMTP transport verifications. Tagged with result.",
};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "contact.request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with status.",
};

pub const ALL_METRICS: &[MetricDef] = &[SUBMISSIONS, SMTP_VERIFY_ATTEMPTS, REQUEST_DURATION];
