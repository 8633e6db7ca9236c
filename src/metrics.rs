//! Telemetry side channel
//!
//! Counters live in the prometheus default registry so an embedding process
//! can expose them next to its own metrics.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, TextEncoder, register_int_counter};
use tracing::error;

lazy_static! {
    pub static ref EVENTS_COUNTER: IntCounter = register_int_counter!(
        "health_watch_events_total",
        "Number of health transition events emitted"
    )
    .expect("metric can not be created");
}

/// Count one emitted event
pub fn record_event() {
    EVENTS_COUNTER.inc();
}

/// Number of events emitted so far by this process
pub fn events_emitted() -> u64 {
    EVENTS_COUNTER.get()
}

/// Default registry rendered in the text exposition format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!("failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
