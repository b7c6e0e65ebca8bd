//! Best-effort telemetry sink
//!
//! The tracker publishes warning events (channel evictions, skipped
//! algorithms) to an optional external sink. Delivery is best-effort by
//! contract: a sink failure must never disturb a tracking run, so the
//! capability is infallible at this seam and implementations swallow their
//! own transport errors.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Topic carrying warning events
pub const LOG_TOPIC: &str = "measurement/log";

/// Numeric level of warning events, matching the platform's log scale
pub const WARNING_LEVEL: u8 = 30;

/// A log event published on [`LOG_TOPIC`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEvent {
    /// Severity on the platform's numeric scale
    pub level: u8,
    /// Human-readable message
    pub msg: String,
}

/// Append-only telemetry capability provided by a collaborator.
///
/// Assumed thread-safe by the collaborator; the tracker never blocks on it.
pub trait TelemetrySink: Send + Sync {
    /// Append a serialized payload to the given topic
    fn append_payload(&self, topic: &str, payload: &[u8]);
}

/// Publish a warning event, best-effort
pub(crate) fn emit_warning(sink: Option<&Arc<dyn TelemetrySink>>, msg: &str) {
    let Some(sink) = sink else {
        return;
    };
    let event = LogEvent {
        level: WARNING_LEVEL,
        msg: msg.to_string(),
    };
    if let Ok(payload) = serde_json::to_vec(&event) {
        sink.append_payload(LOG_TOPIC, &payload);
    }
}
