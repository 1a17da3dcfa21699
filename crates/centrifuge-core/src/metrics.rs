//! Engine instrumentation.
//!
//! Uses the `metrics` crate facade; nothing is recorded unless the
//! application installs a recorder.

use centrifuge_protocol::Method;
use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "centrifuge_client_requests_total";
    pub const REPLIES_TOTAL: &str = "centrifuge_client_replies_total";
    pub const PUSHES_TOTAL: &str = "centrifuge_client_pushes_total";
    pub const VIOLATIONS_TOTAL: &str = "centrifuge_client_violations_total";
    pub const DISCONNECTS_TOTAL: &str = "centrifuge_client_disconnects_total";
    pub const PENDING_REQUESTS: &str = "centrifuge_client_pending_requests";
    pub const SUBSCRIPTIONS_ACTIVE: &str = "centrifuge_client_subscriptions_active";
}

/// Register metric descriptions with the installed recorder.
pub fn describe() {
    metrics::describe_counter!(names::REQUESTS_TOTAL, "Requests sent, by method");
    metrics::describe_counter!(names::REPLIES_TOTAL, "Replies received, by method and outcome");
    metrics::describe_counter!(names::PUSHES_TOTAL, "Server pushes received, by method");
    metrics::describe_counter!(
        names::VIOLATIONS_TOTAL,
        "Inbound envelopes that broke the protocol contract"
    );
    metrics::describe_counter!(names::DISCONNECTS_TOTAL, "Session terminations, by cause");
    metrics::describe_gauge!(names::PENDING_REQUESTS, "Requests awaiting a reply");
    metrics::describe_gauge!(names::SUBSCRIPTIONS_ACTIVE, "Registered channel subscriptions");
}

pub(crate) fn record_request(method: Method) {
    counter!(names::REQUESTS_TOTAL, "method" => method.as_str()).increment(1);
}

pub(crate) fn record_reply(method: Method, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!(names::REPLIES_TOTAL, "method" => method.as_str(), "outcome" => outcome).increment(1);
}

pub(crate) fn record_push(method: Method) {
    counter!(names::PUSHES_TOTAL, "method" => method.as_str()).increment(1);
}

pub(crate) fn record_violation() {
    counter!(names::VIOLATIONS_TOTAL).increment(1);
}

pub(crate) fn record_disconnect(cause: &'static str) {
    counter!(names::DISCONNECTS_TOTAL, "cause" => cause).increment(1);
}

pub(crate) fn set_pending(count: usize) {
    gauge!(names::PENDING_REQUESTS).set(count as f64);
}

pub(crate) fn set_subscriptions(count: usize) {
    gauge!(names::SUBSCRIPTIONS_ACTIVE).set(count as f64);
}
